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

//! The seam to the host editor.
//!
//! All methods are called from the session loop, which the host is expected
//! to run on its UI context. Offsets are `char` indices into the document.

use crate::diff::DiffOp;
use crate::EditorHandle;
use std::path::PathBuf;

/// A selection with a fixed end (`anchor`) and a moving end (`position`).
/// An empty range is a plain caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextRange {
    pub anchor: usize,
    pub position: usize,
}

impl TextRange {
    pub fn new(anchor: usize, position: usize) -> Self {
        Self { anchor, position }
    }

    pub fn caret(position: usize) -> Self {
        Self {
            anchor: position,
            position,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.position
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Single(TextRange),
    /// One range per line of a rectangular selection, in the order they were
    /// built (anchor line first). The last range carries the primary caret.
    Block(Vec<TextRange>),
}

impl Selection {
    pub fn caret(position: usize) -> Self {
        Selection::Single(TextRange::caret(position))
    }

    /// The range holding the caret the user moves.
    pub fn primary(&self) -> TextRange {
        match self {
            Selection::Single(range) => *range,
            Selection::Block(ranges) => ranges.last().copied().unwrap_or_default(),
        }
    }

    pub fn has_selection(&self) -> bool {
        match self {
            Selection::Single(range) => !range.is_empty(),
            Selection::Block(ranges) => ranges.len() > 1 || ranges.iter().any(|r| !r.is_empty()),
        }
    }
}

impl Default for Selection {
    fn default() -> Self {
        Selection::caret(0)
    }
}

/// A 24-bit colour as sent by the backend's `rgb` UI option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u32);

impl Rgb {
    pub fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn blue(self) -> u8 {
        self.0 as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Palette {
    pub foreground: Option<Rgb>,
    pub background: Option<Rgb>,
}

/// Backend window options mirrored onto the host view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayOptions {
    pub number: bool,
    pub relative_number: bool,
    pub wrap: bool,
}

/// Which kind of host document to open for a backend buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// A file opened in the host's language-aware editor.
    Code,
    /// A file opened as plain text.
    PlainText,
    /// A synthetic document showing a terminal buffer.
    Terminal,
    /// A synthetic document showing a help buffer.
    Help,
    /// A synthetic document for any other non-file buffer.
    Scratch,
}

pub trait Host {
    /// The editor that currently has focus.
    fn current_editor(&self) -> Option<EditorHandle>;

    /// File path of the editor's document, or its display name if it has no
    /// path.
    fn file_name(&self, editor: EditorHandle) -> Option<String>;

    /// Directory the backend should `cd` into when this editor gains focus.
    fn project_directory(&self, _editor: EditorHandle) -> Option<PathBuf> {
        None
    }

    fn file_exists(&self, path: &str) -> bool {
        std::path::Path::new(path).exists()
    }

    /// Open (or focus) a document for `path`. The host reports the open
    /// through the usual editor-opened event.
    fn open_document(&mut self, path: &str, kind: DocumentKind) -> Option<EditorHandle>;

    fn activate_editor(&mut self, editor: EditorHandle);

    /// Close a document. The host reports the close through the usual
    /// editor-closing event.
    fn close_document(&mut self, editor: EditorHandle);

    fn text(&self, editor: EditorHandle) -> String;

    /// Apply an edit script to the document as one undoable edit block.
    fn apply_patch(&mut self, editor: EditorHandle, ops: &[DiffOp]);

    fn selection(&self, editor: EditorHandle) -> Selection;

    fn set_selection(&mut self, editor: EditorHandle, selection: Selection);

    fn is_modified(&self, editor: EditorHandle) -> bool;

    fn set_modified(&mut self, editor: EditorHandle, modified: bool);

    /// Save the document to `path`. Returns whether the save succeeded.
    fn save(&mut self, editor: EditorHandle, path: &str) -> bool;

    fn set_cursor_width(&mut self, editor: EditorHandle, width: u32);

    /// Average advance of one character in the editor font, in pixels.
    fn average_char_width(&self, editor: EditorHandle) -> f32;

    fn set_palette(&mut self, editor: EditorHandle, palette: Palette);

    fn set_display_options(&mut self, _editor: EditorHandle, _options: DisplayOptions) {}

    fn beep(&mut self) {}

    /// Run a host command by id, as requested from the backend.
    fn trigger_command(&mut self, _command_id: &str) {}

    /// Tell the user the backend connection is gone.
    fn report_fatal(&mut self, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_channels() {
        let color = Rgb(0x12_34_56);
        assert_eq!((color.red(), color.green(), color.blue()), (0x12, 0x34, 0x56));
    }

    #[test]
    fn test_selection_primary() {
        let block = Selection::Block(vec![TextRange::new(0, 2), TextRange::new(4, 6)]);
        assert_eq!(block.primary(), TextRange::new(4, 6));
        assert!(block.has_selection());
        assert!(!Selection::caret(3).has_selection());
        assert!(Selection::Single(TextRange::new(1, 3)).has_selection());
    }
}
