//! Result packaging: bundle completed conversions into one ZIP archive.
//!
//! The archive is the batch's sole successful-output artifact, so entry
//! naming has to be deterministic and collision-free: an explicit
//! filename-map entry wins, otherwise the input name gets its extension
//! swapped to `.md`, and duplicates are deconflicted as `name (1).md`,
//! `name (2).md`, … in job order. Byte-level ZIP encoding is the `zip`
//! crate's problem; this module only decides names and content.

use crate::error::BatchError;
use crate::output::{ConversionJob, JobStatus};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Build a ZIP archive with one Markdown entry per `Complete` job.
///
/// `filename_map` overrides output names by input index. Call only with at
/// least one completed job — an empty archive is never produced by the batch.
pub fn package_markdown(
    jobs: &[ConversionJob],
    filename_map: &HashMap<usize, String>,
) -> Result<Vec<u8>, BatchError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used = HashSet::new();

    for job in jobs {
        if job.status != JobStatus::Complete {
            continue;
        }
        let markdown = match job.markdown {
            Some(ref md) => md,
            // Complete without content never leaves the client, but the
            // packager must not invent an empty entry if it ever did.
            None => continue,
        };

        let desired = filename_map
            .get(&job.index)
            .cloned()
            .unwrap_or_else(|| markdown_name(&job.file_name));
        let entry = deconflict(&desired, &mut used);

        writer
            .start_file(&entry, opts)
            .map_err(|e| BatchError::Packaging(format!("entry {entry}: {e}")))?;
        writer
            .write_all(markdown.as_bytes())
            .map_err(|e| BatchError::Packaging(format!("entry {entry}: {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| BatchError::Packaging(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Swap the input filename's extension for `.md` ("doc.pdf" → "doc.md").
/// A name without an extension just gains `.md`.
fn markdown_name(input: &str) -> String {
    match input.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => format!("{stem}.md"),
        _ => format!("{input}.md"),
    }
}

/// First unused variant of `desired`: the name itself, then
/// `stem (1).ext`, `stem (2).ext`, …
fn deconflict(desired: &str, used: &mut HashSet<String>) -> String {
    if used.insert(desired.to_string()) {
        return desired.to_string();
    }
    let (stem, ext) = match desired.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s.to_string(), format!(".{e}")),
        _ => (desired.to_string(), String::new()),
    };
    let mut n = 1usize;
    loop {
        let candidate = format!("{stem} ({n}){ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
