//! Unified-diff parsing and application for the apply-patch builtin tool.
//!
//! No teacher file does text diffing (the vendored SDK never touched the
//! filesystem); grounded on the algorithm described for apply-patch
//! dispatch, written in the teacher's free-function style (see
//! `context.rs`'s `estimate_tokens`/`truncate_messages`: plain functions
//! over `&[...]`, no struct wrapper for what is fundamentally a pure
//! transform).

/// One line of a hunk, tagged with its unified-diff prefix.
#[derive(Debug, Clone, PartialEq)]
pub enum HunkLine {
    Context(String),
    Added(String),
    Removed(String),
}

/// A single `@@ -A,B +C,D @@` block and its tagged lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Hunk {
    pub old_start: usize,
    pub lines: Vec<HunkLine>,
}

/// Parse a unified diff into its hunks. Lenient: unparsable hunk headers
/// are skipped rather than rejected, and lines before the first header
/// are ignored entirely (along with `---`/`+++` file-header lines).
pub fn parse_diff(diff: &str) -> Vec<Hunk> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        if line.starts_with("---") || line.starts_with("+++") {
            continue;
        }

        if let Some(old_start) = parse_hunk_header(line) {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            current = Some(Hunk {
                old_start,
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            continue;
        };

        if line.is_empty() {
            hunk.lines.push(HunkLine::Context(String::new()));
            continue;
        }

        match line.as_bytes()[0] {
            b'+' => hunk.lines.push(HunkLine::Added(line[1..].to_string())),
            b'-' => hunk.lines.push(HunkLine::Removed(line[1..].to_string())),
            b' ' => hunk.lines.push(HunkLine::Context(line[1..].to_string())),
            _ => hunk.lines.push(HunkLine::Context(line.to_string())),
        }
    }

    if let Some(hunk) = current {
        hunks.push(hunk);
    }

    hunks
}

/// Parses `@@ -A[,B] +C[,D] @@...` and returns `A` (1-based old start
/// line), or `None` if the line doesn't match.
fn parse_hunk_header(line: &str) -> Option<usize> {
    let rest = line.strip_prefix("@@ -")?;
    let old_range_end = rest.find(' ')?;
    let old_range = &rest[..old_range_end];
    let old_start = old_range.split(',').next()?;
    old_start.parse::<usize>().ok()
}

/// Apply a unified diff to `original`, producing the patched content.
///
/// A `diff` with no `+`/`-` content lines (including the empty string)
/// has no patch to apply, so `original` is returned unchanged. Otherwise,
/// with zero hunks, `diff` is treated as a bare content block for a new
/// file: file-header lines are filtered out, a leading `+` is stripped
/// from each remaining line, and the result is joined with `\n`.
pub fn apply_diff(original: &str, diff: &str) -> String {
    let hunks = parse_diff(diff);

    if hunks.is_empty() {
        let has_content_lines = diff
            .lines()
            .any(|l| (l.starts_with('+') || l.starts_with('-')) && !l.starts_with("---") && !l.starts_with("+++"));

        if !has_content_lines {
            return original.to_string();
        }

        return diff
            .lines()
            .filter(|l| !l.starts_with("---") && !l.starts_with("+++"))
            .map(|l| l.strip_prefix('+').unwrap_or(l))
            .collect::<Vec<_>>()
            .join("\n");
    }

    let original_lines: Vec<&str> = original.lines().collect();
    let mut output: Vec<String> = Vec::new();
    let mut cursor = 0usize;

    for hunk in &hunks {
        let hunk_start = hunk.old_start.saturating_sub(1);
        while cursor < hunk_start && cursor < original_lines.len() {
            output.push(original_lines[cursor].to_string());
            cursor += 1;
        }

        for line in &hunk.lines {
            match line {
                HunkLine::Removed(_) => {
                    cursor += 1;
                }
                HunkLine::Added(text) => {
                    output.push(text.clone());
                }
                HunkLine::Context(text) => {
                    output.push(text.clone());
                    cursor += 1;
                }
            }
        }
    }

    while cursor < original_lines.len() {
        output.push(original_lines[cursor].to_string());
        cursor += 1;
    }

    output.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_diff_empty_diff_returns_original() {
        assert_eq!(apply_diff("hello", ""), "hello");
    }

    #[test]
    fn test_parse_diff_no_hunks_for_bare_content() {
        assert_eq!(parse_diff("just some text\nmore text").len(), 0);
    }

    #[test]
    fn test_apply_diff_bare_content_block_for_new_file() {
        let diff = "+line one\n+line two";
        assert_eq!(apply_diff("", diff), "line one\nline two");
    }

    #[test]
    fn test_parse_diff_recognizes_hunk_header() {
        let diff = "--- a\n+++ b\n@@ -1,2 +1,2 @@\n context\n-old\n+new";
        let hunks = parse_diff(diff);
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].old_start, 1);
        assert_eq!(hunks[0].lines.len(), 3);
    }

    #[test]
    fn test_apply_diff_single_hunk_replaces_line() {
        let original = "one\ntwo\nthree";
        let diff = "@@ -1,3 +1,3 @@\n one\n-two\n+TWO\n three";
        assert_eq!(apply_diff(original, diff), "one\nTWO\nthree");
    }

    #[test]
    fn test_apply_diff_preserves_lines_before_and_after_hunk() {
        let original = "a\nb\nc\nd\ne";
        let diff = "@@ -3,1 +3,1 @@\n-c\n+C";
        assert_eq!(apply_diff(original, diff), "a\nb\nC\nd\ne");
    }

    #[test]
    fn test_apply_diff_multiple_hunks() {
        let original = "a\nb\nc\nd\ne";
        let diff = "@@ -1,1 +1,1 @@\n-a\n+A\n@@ -5,1 +5,1 @@\n-e\n+E";
        assert_eq!(apply_diff(original, diff), "A\nb\nc\nd\nE");
    }
}
