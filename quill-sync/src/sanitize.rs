//! Markdown corruption sanitizer.
//!
//! Editors that round-trip rich text through markdown occasionally produce
//! corrupted snapshots: the entire body duplicated end-to-end (a CRDT
//! feedback loop re-applying its own output), or the document's title
//! heading followed by a stale copy of everything before it. This module
//! detects and repairs both patterns, plus the placeholder paragraphs
//! (blank / non-breaking-space lines) editors pad documents with.
//!
//! Pipeline, first match wins for repetition:
//!
//! 1. Trim leading/trailing placeholder lines
//! 2. Exact full-body repetition — minimal period via prefix-function scan
//! 3. Leading-heading repetition — `# …` first line recurring verbatim
//! 4. Otherwise return the trimmed content unchanged
//!
//! Pure and allocation-light: no I/O, no shared state, linear in input
//! length, safe to call speculatively and repeatedly.

/// Non-breaking space. Rich-text editors insert these as "empty" paragraph
/// content, so a line holding only U+00A0 is still a placeholder.
const NBSP: char = '\u{a0}';

/// Length guards for the repetition detectors.
///
/// Empirically tuned: short documents legitimately repeat headings and
/// paragraph blocks, so collapsing is only allowed past these minimums.
#[derive(Debug, Clone)]
pub struct SanitizeLimits {
    /// Minimum total length (chars) before full-body repetition collapses.
    pub min_repeat_len: usize,
    /// Minimum total length (chars) before the heading scan runs at all.
    pub min_heading_scan_len: usize,
    /// Minimum kept content (chars) for a heading collapse to be accepted.
    pub min_heading_keep: usize,
    /// Minimum removed tail (chars) for a heading collapse to be accepted.
    pub min_heading_tail: usize,
}

impl Default for SanitizeLimits {
    fn default() -> Self {
        Self {
            min_repeat_len: 1024,
            min_heading_scan_len: 2048,
            min_heading_keep: 800,
            min_heading_tail: 512,
        }
    }
}

/// Result of one sanitizer pass. Pure value, recomputed each call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitization {
    /// Repaired markdown.
    pub content: String,
    /// How many copies of the body were found (1 = no repetition).
    pub repeat_count: usize,
    /// Whether leading placeholder lines were removed.
    pub stripped_leading_placeholders: bool,
    /// Whether trailing placeholder lines were removed.
    pub stripped_trailing_placeholders: bool,
}

impl Sanitization {
    /// True if the pass changed nothing at all.
    pub fn is_clean(&self) -> bool {
        self.repeat_count == 1
            && !self.stripped_leading_placeholders
            && !self.stripped_trailing_placeholders
    }

    /// True if a repetition was collapsed or a leading placeholder removed.
    /// Trailing-only trims are excluded: they are cosmetic and must not
    /// trigger a live-document rebuild (see the persist coordinator).
    pub fn is_corruption(&self) -> bool {
        self.repeat_count > 1 || self.stripped_leading_placeholders
    }
}

/// Sanitize with the default limits.
pub fn sanitize(input: &str) -> Sanitization {
    sanitize_with(input, &SanitizeLimits::default())
}

/// Sanitize markdown: trim placeholders, then collapse whichever repetition
/// pattern (if any) matches first.
pub fn sanitize_with(input: &str, limits: &SanitizeLimits) -> Sanitization {
    let (trimmed, stripped_leading, stripped_trailing) = trim_placeholder_lines(input);

    if let Some((period, count)) = full_body_repetition(&trimmed, limits) {
        return Sanitization {
            content: period,
            repeat_count: count,
            stripped_leading_placeholders: stripped_leading,
            stripped_trailing_placeholders: stripped_trailing,
        };
    }

    if let Some((kept, count)) = heading_repetition(&trimmed, limits) {
        return Sanitization {
            content: kept,
            repeat_count: count,
            stripped_leading_placeholders: stripped_leading,
            stripped_trailing_placeholders: stripped_trailing,
        };
    }

    Sanitization {
        content: trimmed,
        repeat_count: 1,
        stripped_leading_placeholders: stripped_leading,
        stripped_trailing_placeholders: stripped_trailing,
    }
}

/// A placeholder line: empty, or whitespace/NBSP only.
fn is_placeholder_line(line: &str) -> bool {
    line.chars().all(|c| c.is_whitespace() || c == NBSP)
}

/// Strip leading and trailing placeholder lines.
///
/// A single final newline is canonical markdown and is preserved (and
/// restored after a trailing trim); it never counts as a placeholder.
fn trim_placeholder_lines(input: &str) -> (String, bool, bool) {
    let ends_with_newline = input.ends_with('\n');
    let mut lines: Vec<&str> = input.split('\n').collect();
    if ends_with_newline {
        // split leaves an empty artifact after the final newline
        lines.pop();
    }

    let mut stripped_leading = false;
    let mut stripped_trailing = false;

    let mut start = 0;
    while start < lines.len() && is_placeholder_line(lines[start]) {
        start += 1;
        stripped_leading = true;
    }
    let mut end = lines.len();
    while end > start && is_placeholder_line(lines[end - 1]) {
        end -= 1;
        stripped_trailing = true;
    }

    let mut content = lines[start..end].join("\n");
    if !content.is_empty() && (ends_with_newline || stripped_trailing) {
        content.push('\n');
    }
    (content, stripped_leading, stripped_trailing)
}

/// Minimal period of `bytes` via the classic prefix-function (failure
/// function) scan. Returns `bytes.len()` when the string is aperiodic.
fn minimal_period(bytes: &[u8]) -> usize {
    let n = bytes.len();
    if n == 0 {
        return 0;
    }
    let mut pi = vec![0usize; n];
    let mut k = 0usize;
    for i in 1..n {
        while k > 0 && bytes[i] != bytes[k] {
            k = pi[k - 1];
        }
        if bytes[i] == bytes[k] {
            k += 1;
        }
        pi[i] = k;
    }
    let period = n - pi[n - 1];
    if n % period == 0 {
        period
    } else {
        n
    }
}

/// Detect the whole string being one block repeated `k >= 2` times.
///
/// Guards: total length at least `min_repeat_len` chars and a non-blank
/// period, so short legitimate documents are never collapsed.
fn full_body_repetition(content: &str, limits: &SanitizeLimits) -> Option<(String, usize)> {
    let n = content.len();
    if n == 0 || content.chars().count() < limits.min_repeat_len {
        return None;
    }
    let period = minimal_period(content.as_bytes());
    if period == 0 || period >= n {
        return None;
    }
    // Period of a byte-periodic UTF-8 string always falls on a char boundary:
    // every block starts with the same lead byte as the string itself.
    let block = &content[..period];
    if block.trim().is_empty() {
        return None;
    }
    Some((block.to_string(), n / period))
}

/// Detect the first line being a top-level heading that reoccurs verbatim
/// later, with everything after the reoccurrence being a stale duplicate.
///
/// Accepted only when the kept prefix and the removed tail are both large
/// enough; a short note that repeats its own title is legitimate.
fn heading_repetition(content: &str, limits: &SanitizeLimits) -> Option<(String, usize)> {
    if content.chars().count() < limits.min_heading_scan_len {
        return None;
    }
    let first_line = content.lines().next()?;
    if !first_line.starts_with("# ") {
        return None;
    }

    let needle = format!("\n{first_line}\n");
    let search_from = first_line.len();
    let pos = content[search_from..].find(&needle)? + search_from;

    let kept = content[..pos].trim();
    let tail = &content[pos..];
    if kept.chars().count() < limits.min_heading_keep
        || tail.chars().count() < limits.min_heading_tail
    {
        return None;
    }

    let occurrences = 1 + content[search_from..].matches(&needle).count();
    Some((kept.to_string(), occurrences))
}
