// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Edit scripts between two document snapshots.
//!
//! [`diff`] produces a character-level script used to patch the front end
//! without replacing its whole document. [`line_edits`] produces the line
//! ranges sent to the backend with `nvim_buf_set_lines`.

use similar::{Algorithm, ChangeTag, TextDiff};
use std::time::{Duration, Instant};

/// Default time budget for a character diff before `similar` falls back to a
/// coarser (still correct) script.
pub const DEFAULT_DIFF_DEADLINE: Duration = Duration::from_millis(200);

/// One step of an edit script, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOp {
    Equal(String),
    Insert(String),
    Delete(String),
}

impl DiffOp {
    pub fn text(&self) -> &str {
        match self {
            DiffOp::Equal(text) | DiffOp::Insert(text) | DiffOp::Delete(text) => text,
        }
    }

    pub fn char_len(&self) -> usize {
        self.text().chars().count()
    }

    pub fn byte_len(&self) -> usize {
        self.text().len()
    }

    pub fn is_equal(&self) -> bool {
        matches!(self, DiffOp::Equal(_))
    }

    fn tag(&self) -> ChangeTag {
        match self {
            DiffOp::Equal(_) => ChangeTag::Equal,
            DiffOp::Insert(_) => ChangeTag::Insert,
            DiffOp::Delete(_) => ChangeTag::Delete,
        }
    }

    fn push_str(&mut self, value: &str) {
        match self {
            DiffOp::Equal(text) | DiffOp::Insert(text) | DiffOp::Delete(text) => {
                text.push_str(value)
            }
        }
    }
}

/// Compute a character-level edit script from `old` to `new`.
pub fn diff(old: &str, new: &str) -> Vec<DiffOp> {
    diff_with_deadline(old, new, DEFAULT_DIFF_DEADLINE)
}

pub fn diff_with_deadline(old: &str, new: &str, deadline: Duration) -> Vec<DiffOp> {
    if old == new {
        return if old.is_empty() {
            Vec::new()
        } else {
            vec![DiffOp::Equal(old.to_string())]
        };
    }

    let text_diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .deadline(Instant::now() + deadline)
        .diff_chars(old, new);

    let mut ops: Vec<DiffOp> = Vec::new();
    for change in text_diff.iter_all_changes() {
        let value = change.value();
        match ops.last_mut() {
            Some(last) if last.tag() == change.tag() => last.push_str(value),
            _ => ops.push(match change.tag() {
                ChangeTag::Equal => DiffOp::Equal(value.to_string()),
                ChangeTag::Insert => DiffOp::Insert(value.to_string()),
                ChangeTag::Delete => DiffOp::Delete(value.to_string()),
            }),
        }
    }
    ops
}

/// Apply an edit script to the text it was computed from.
pub fn apply(old: &str, ops: &[DiffOp]) -> String {
    let mut result = String::with_capacity(old.len());
    let mut rest = old;
    for op in ops {
        match op {
            DiffOp::Equal(text) => {
                result.push_str(text);
                rest = rest.get(text.len()..).unwrap_or_default();
            }
            DiffOp::Insert(text) => result.push_str(text),
            DiffOp::Delete(text) => rest = rest.get(text.len()..).unwrap_or_default(),
        }
    }
    result
}

/// Where a caret at char offset `cursor` in the old text ends up after the
/// script is applied.
///
/// Only edits in front of the caret move it. A caret inside a deleted span
/// lands on the start of that span.
pub fn track_cursor(ops: &[DiffOp], cursor: usize) -> usize {
    let mut remaining = cursor;
    let mut position = cursor;
    for op in ops {
        if remaining == 0 {
            break;
        }
        match op {
            DiffOp::Equal(_) => remaining = remaining.saturating_sub(op.char_len()),
            DiffOp::Insert(_) => position += op.char_len(),
            DiffOp::Delete(_) => {
                let consumed = op.char_len().min(remaining);
                remaining -= consumed;
                position -= consumed;
            }
        }
    }
    position
}

/// A replacement of backend lines `start..end` (0-based, end exclusive).
/// `end == -1` addresses the end of the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEdit {
    pub start: i64,
    pub end: i64,
    pub replacement: Vec<String>,
}

impl LineEdit {
    /// Replace every line of the buffer with the lines of `text`.
    pub fn replace_all(text: &str) -> Self {
        Self {
            start: 0,
            end: -1,
            replacement: split_lines(text),
        }
    }
}

/// Split text into backend lines. The empty document is one empty line, and a
/// trailing newline produces a trailing empty line.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n').map(str::to_string).collect()
}

/// Line ranges that turn `old` into `new`, ordered from the end of the
/// document backwards so that applying them one after another keeps the
/// indices of the remaining edits valid.
pub fn line_edits(old: &str, new: &str) -> Vec<LineEdit> {
    let old_lines: Vec<&str> = old.split('\n').collect();
    let new_lines: Vec<&str> = new.split('\n').collect();

    let mut edits: Vec<LineEdit> = Vec::new();
    for op in similar::capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines) {
        if let similar::DiffOp::Equal { .. } = op {
            continue;
        }
        let old_range = op.old_range();
        let new_range = op.new_range();
        let replacement = new_lines[new_range].iter().map(|line| line.to_string());

        match edits.last_mut() {
            Some(last) if last.end == old_range.start as i64 => {
                last.end = old_range.end as i64;
                last.replacement.extend(replacement);
            }
            _ => edits.push(LineEdit {
                start: old_range.start as i64,
                end: old_range.end as i64,
                replacement: replacement.collect(),
            }),
        }
    }

    edits.reverse();
    edits
}

/// Apply backend line edits to a list of lines, the way the backend would.
pub fn apply_line_edits(lines: &mut Vec<String>, edits: &[LineEdit]) {
    for edit in edits {
        let end = if edit.end < 0 {
            lines.len()
        } else {
            (edit.end as usize).min(lines.len())
        };
        let start = (edit.start as usize).min(end);
        lines.splice(start..end, edit.replacement.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rebuild(ops: &[DiffOp]) -> (String, String) {
        let mut old = String::new();
        let mut new = String::new();
        for op in ops {
            match op {
                DiffOp::Equal(text) => {
                    old.push_str(text);
                    new.push_str(text);
                }
                DiffOp::Insert(text) => new.push_str(text),
                DiffOp::Delete(text) => old.push_str(text),
            }
        }
        (old, new)
    }

    #[test]
    fn test_single_line_replacement() {
        let ops = diff("a\nb\nc", "a\nX\nc");
        assert_eq!(
            ops,
            vec![
                DiffOp::Equal("a\n".into()),
                DiffOp::Delete("b".into()),
                DiffOp::Insert("X".into()),
                DiffOp::Equal("\nc".into()),
            ]
        );
    }

    #[test]
    fn test_identical_text_has_no_edits() {
        for text in ["", "x", "hello\nworld\n", "ünïcödé"] {
            let ops = diff(text, text);
            assert!(ops.iter().all(DiffOp::is_equal), "{ops:?}");
            assert!(line_edits(text, text).is_empty());
        }
    }

    #[test]
    fn test_scripts_rebuild_both_sides() {
        let cases = [
            ("", "abc"),
            ("abc", ""),
            ("hello world", "hello brave new world"),
            ("fn a() {}\nfn b() {}\n", "fn b() {}\nfn a() {}\n"),
            ("naïve café", "naive cafe\n"),
            ("line1\nline2\nline3", "line0\nline1\nline3\nline4"),
        ];
        for (old, new) in cases {
            let ops = diff(old, new);
            assert_eq!(rebuild(&ops), (old.to_string(), new.to_string()));
            assert_eq!(apply(old, &ops), new);
        }
    }

    #[test]
    fn test_op_lengths() {
        let op = DiffOp::Insert("é!".into());
        assert_eq!(op.char_len(), 2);
        assert_eq!(op.byte_len(), 3);
    }

    #[test]
    fn test_line_edit_touches_only_changed_line() {
        let edits = line_edits("a\nb\nc", "a\nX\nc");
        assert_eq!(
            edits,
            vec![LineEdit {
                start: 1,
                end: 2,
                replacement: vec!["X".to_string()],
            }]
        );
    }

    #[test]
    fn test_line_edits_are_applied_back_to_front() {
        let old = "one\ntwo\nthree\nfour\nfive";
        let new = "zero\none\nthree\nFOUR\nfive\nsix";
        let edits = line_edits(old, new);
        assert!(edits.len() > 1);
        assert!(edits.windows(2).all(|pair| pair[0].start >= pair[1].end));

        let mut lines = split_lines(old);
        apply_line_edits(&mut lines, &edits);
        assert_eq!(lines.join("\n"), new);
    }

    #[test]
    fn test_replace_all() {
        let mut lines = split_lines("old\ntext");
        apply_line_edits(&mut lines, &[LineEdit::replace_all("new\n")]);
        assert_eq!(lines, vec!["new".to_string(), String::new()]);
    }

    #[test]
    fn test_cursor_after_edit_in_front_moves() {
        // Cursor on 'c' of "abc"; "X" inserted at the start.
        let ops = diff("abc", "Xabc");
        assert_eq!(track_cursor(&ops, 2), 3);
    }

    #[test]
    fn test_cursor_before_edit_stays() {
        let ops = diff("abc\ndef", "abc\ndXXef");
        assert_eq!(track_cursor(&ops, 1), 1);
    }

    #[test]
    fn test_cursor_inside_deletion_moves_to_start() {
        let ops = vec![
            DiffOp::Equal("ab".into()),
            DiffOp::Delete("cdef".into()),
            DiffOp::Equal("g".into()),
        ];
        assert_eq!(track_cursor(&ops, 4), 2);
        assert_eq!(track_cursor(&ops, 7), 3);
    }
}
