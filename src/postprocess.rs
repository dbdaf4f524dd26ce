//! Post-processing: deterministic cleanup of server-generated Markdown.
//!
//! ## Why is post-processing necessary?
//!
//! Marker's Markdown output is structurally sound but carries service
//! artefacts that downstream consumers rarely want:
//!
//! - Pagination separators (`{12}----…----`) when `paginate` was requested
//! - Windows-style `\r\n` line endings from some OCR paths
//! - Runs of blank lines where page boundaries were stitched together
//! - Invisible Unicode (zero-width spaces, BOM, soft hyphens) surviving OCR
//!
//! This module applies cheap, deterministic regex/string rules that fix
//! those quirks without touching content. Each rule is a pure function
//! (`&str → String`) and independently testable.
//!
//! ## Rule Order
//!
//! Normalise line endings first so the page-break regex only has to match
//! `\n`, strip page breaks before collapsing blank lines so the gaps they
//! leave get merged, and run the final-newline pass last.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to Markdown returned by the conversion service.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Remove pagination separator lines (`{N}----…`)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to 2
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 6. Ensure the file ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_page_breaks(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove pagination separators ─────────────────────────────────────

// Marker emits `{page_number}` followed by a long dash rule between pages
// when pagination is on. The whole line is an artefact.
static RE_PAGE_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\{\d+\}-{4,}\s*$\n?").unwrap());

fn remove_page_breaks(input: &str) -> String {
    RE_PAGE_BREAK.replace_all(input, "").to_string()
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 5: Remove invisible Unicode characters ──────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 6: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
