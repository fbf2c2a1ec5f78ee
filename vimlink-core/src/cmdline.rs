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

//! Command line and message area state.

/// What the backend's external command line currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CmdlineState {
    pub visible: bool,
    /// `:`, `/`, `?` or nothing for `input()` prompts.
    pub first_char: Option<char>,
    /// Prompt of an `input()` call.
    pub prompt: String,
    /// Spaces between the prompt and the content.
    pub indent: usize,
    pub content: String,
    /// Cursor position within `content`, in characters.
    pub cursor_pos: usize,
}

impl CmdlineState {
    /// The full line as it should be displayed.
    pub fn rendered(&self) -> String {
        let mut text = String::new();
        if let Some(ch) = self.first_char.filter(|ch| !ch.is_control()) {
            text.push(ch);
        }
        text.push_str(&self.prompt);
        text.extend(std::iter::repeat(' ').take(self.indent));
        text.push_str(&self.content);
        text
    }

    /// Cursor position within [`CmdlineState::rendered`].
    pub fn display_cursor(&self) -> usize {
        let first = self.first_char.map_or(0, |ch| usize::from(!ch.is_control()));
        first + self.prompt.chars().count() + self.indent + self.cursor_pos
    }
}

/// The widget that renders the command line and messages.
pub trait CommandLineDisplay {
    /// Show an editable command line with the cursor at `cursor`.
    fn show(&mut self, text: &str, cursor: usize);

    fn set_cursor(&mut self, cursor: usize);

    fn hide(&mut self);

    /// Show a read-only message.
    fn show_message(&mut self, text: &str);

    fn clear(&mut self);
}
