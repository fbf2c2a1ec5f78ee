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

//! Translation between front-end character offsets and backend positions.
//!
//! The front end addresses text by `char` index into the document. The
//! backend addresses it by 1-based line and 1-based column, where the column
//! counts UTF-8 bytes of the line prefix. A column is only ever meaningful
//! against the text it was computed from, so every function here takes the
//! snapshot explicitly.

use ropey::{Rope, RopeSlice};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinateError {
    #[error("line {line} is outside the document ({line_count} lines)")]
    OutOfRange { line: u32, line_count: usize },
}

/// A backend cursor position: 1-based line, 1-based byte column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorState {
    pub line: u32,
    pub column: u32,
}

impl CursorState {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Character offset of the first character of the 0-based line `line_idx`.
pub fn line_start(text: &Rope, line_idx: usize) -> usize {
    text.line_to_char(line_idx.min(text.len_lines().saturating_sub(1)))
}

/// Character offset just before the newline terminating the 0-based line.
pub fn line_end(text: &Rope, line_idx: usize) -> usize {
    let line_idx = line_idx.min(text.len_lines().saturating_sub(1));
    line_start(text, line_idx) + line_len(text.line(line_idx))
}

/// Length of a line in characters, not counting its newline.
fn line_len(line: RopeSlice<'_>) -> usize {
    let len = line.len_chars();
    if len > 0 && line.char(len - 1) == '\n' {
        len - 1
    } else {
        len
    }
}

/// Convert a backend (line, byte column) to a character offset.
///
/// A column past the end of the line lands on the end of the line. A column
/// pointing into the middle of a multi-byte character lands on that
/// character.
pub fn to_offset(text: &Rope, line: u32, column: u32) -> Result<usize, CoordinateError> {
    let line_count = text.len_lines();
    if line == 0 || line as usize > line_count {
        return Err(CoordinateError::OutOfRange { line, line_count });
    }

    let line_idx = line as usize - 1;
    let target = column.saturating_sub(1) as usize;
    let mut offset = text.line_to_char(line_idx);
    let mut bytes = 0usize;
    for ch in text.line(line_idx).chars() {
        if ch == '\n' {
            break;
        }
        let next = bytes + ch.len_utf8();
        if next > target {
            break;
        }
        bytes = next;
        offset += 1;
    }

    Ok(offset)
}

/// Like [`to_offset`], but a line outside the document is clamped to the
/// nearest existing line. Backend and front end can briefly disagree on the
/// document length while an edit is in flight.
pub fn to_offset_clamped(text: &Rope, line: u32, column: u32) -> usize {
    let line = line.clamp(1, text.len_lines().max(1) as u32);
    to_offset(text, line, column).unwrap_or_else(|_| text.len_chars())
}

/// Convert a character offset to a backend (line, byte column).
pub fn to_line_col(text: &Rope, offset: usize) -> (u32, u32) {
    let offset = offset.min(text.len_chars());
    let line_idx = text.char_to_line(offset);
    let start = text.line_to_char(line_idx);
    let column = text.slice(start..offset).len_bytes() + 1;
    (line_idx as u32 + 1, column as u32)
}

/// Same as [`to_line_col`], as a [`CursorState`].
pub fn cursor_at(text: &Rope, offset: usize) -> CursorState {
    let (line, column) = to_line_col(text, offset);
    CursorState { line, column }
}

/// Display column (0-based) reached after the first `chars` characters of
/// `line`, expanding tabs to the next multiple of `tabstop`.
pub fn display_column(line: RopeSlice<'_>, chars: usize, tabstop: usize) -> usize {
    let tabstop = tabstop.max(1);
    line.chars()
        .take(chars.min(line_len(line)))
        .fold(0, |column, ch| advance(column, ch, tabstop))
}

/// Total display width of `line`, not counting its newline.
pub fn display_width(line: RopeSlice<'_>, tabstop: usize) -> usize {
    display_column(line, usize::MAX, tabstop)
}

/// Character index within `line` whose display column first reaches
/// `column`. Clamped to the end of the line.
pub fn offset_at_display_column(line: RopeSlice<'_>, column: usize, tabstop: usize) -> usize {
    let tabstop = tabstop.max(1);
    let mut current = 0;
    for (idx, ch) in line.chars().take(line_len(line)).enumerate() {
        if current >= column {
            return idx;
        }
        current = advance(current, ch, tabstop);
    }
    line_len(line)
}

fn advance(column: usize, ch: char, tabstop: usize) -> usize {
    if ch == '\t' {
        column + tabstop - column % tabstop
    } else {
        column + 1
    }
}
