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

//! Text, cursor and selection synchronisation between one bound editor and
//! its backend buffer.
//!
//! Everything here is synchronous. The session performs the RPCs and feeds
//! the results back in, so each step can be checked against the binding state
//! at the time the result arrives.

use crate::binding::BufferBinding;
use crate::coords::{self, CursorState};
use crate::diff::{self, DiffOp, LineEdit};
use crate::host::{DisplayOptions, Selection, TextRange};
use crate::rpc::{RpcError, Value};
use crate::BufferId;
use log::{debug, trace};
use ropey::Rope;
use std::time::Duration;

/// Expression evaluated at the start of every pull.
pub const PULL_EXPR: &str = "[bufnr(''), b:changedtick, mode(1), &modified, getpos('.'), \
                             getpos('v'), &number, &relativenumber, &wrap, &tabstop]";

/// Tags a pull request. Only the most recent one may be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SyncGeneration(u64);

/// Backend state reported by [`PULL_EXPR`].
#[derive(Debug, Clone, PartialEq)]
pub struct PullState {
    pub buffer: BufferId,
    pub change_tick: u64,
    /// `mode(1)`, e.g. `n`, `i`, `v`, `V`, `\x16`, `no`.
    pub mode: String,
    pub modified: bool,
    pub cursor: CursorState,
    pub anchor: CursorState,
    pub display: DisplayOptions,
    pub tabstop: usize,
}

impl PullState {
    pub fn decode(value: &Value) -> Result<Self, RpcError> {
        let items = value
            .as_array()
            .ok_or_else(|| RpcError::Decode(format!("pull state is not a list: {value:?}")))?;
        let field = |idx: usize| {
            items
                .get(idx)
                .ok_or_else(|| RpcError::Decode(format!("pull state has no field {idx}")))
        };
        let int = |idx: usize| {
            field(idx)?
                .as_i64()
                .ok_or_else(|| RpcError::Decode(format!("pull state field {idx} is not a number")))
        };
        let flag = |idx: usize| Ok::<_, RpcError>(field(idx)?.as_bool().unwrap_or(false));
        let position = |idx: usize| {
            let pos = field(idx)?
                .as_array()
                .filter(|pos| pos.len() >= 3)
                .ok_or_else(|| RpcError::Decode(format!("pull state field {idx} is not a position")))?;
            let part = |i: usize| pos[i].as_i64().unwrap_or(1).clamp(0, u32::MAX as i64) as u32;
            Ok::<_, RpcError>(CursorState::new(part(1), part(2)))
        };

        Ok(Self {
            buffer: BufferId(int(0)?),
            change_tick: int(1)?.max(0) as u64,
            mode: field(2)?.as_str().unwrap_or_default().to_string(),
            modified: flag(3)?,
            cursor: position(4)?,
            anchor: position(5)?,
            display: DisplayOptions {
                number: flag(6)?,
                relative_number: flag(7)?,
                wrap: flag(8)?,
            },
            tabstop: items
                .get(9)
                .and_then(Value::as_i64)
                .filter(|ts| *ts > 0)
                .unwrap_or(8) as usize,
        })
    }
}

/// What to do with a pull state that just arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDecision {
    /// A newer pull was requested, or the binding went away.
    Stale,
    /// The backend's current buffer is not the one bound to the editor.
    BufferMismatch,
    /// Text is unchanged since the last applied pull; reconcile the cursor.
    Unchanged,
    /// Fetch the buffer lines.
    Fetch,
}

/// Visual mode from the first character of `mode(1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualMode {
    Char,
    Line,
    Block,
}

impl VisualMode {
    pub fn from_mode(mode: &str) -> Option<Self> {
        match mode.chars().next()? {
            'v' => Some(VisualMode::Char),
            'V' => Some(VisualMode::Line),
            '\x16' => Some(VisualMode::Block),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushPlan {
    /// Local text equals the last agreed snapshot.
    Unchanged,
    /// `buf_set_lines` calls to make, in order.
    Edits(Vec<LineEdit>),
}

/// Whether local edits to `binding` may be pushed. Forced pushes are the
/// initial full push of a freshly bound buffer.
pub fn push_allowed(binding: &BufferBinding, forced: bool) -> bool {
    binding.kind.accepts_local_edits() && (forced || binding.initialized)
}

/// Lines from `buf_get_lines` joined back into document text.
pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}

/// Per-session synchronisation state.
///
/// The cursor and anchor are the last positions exchanged with the backend in
/// either direction; they suppress echoing a position back to where it came
/// from.
#[derive(Debug)]
pub struct SyncEngine {
    generation: u64,
    mode: String,
    cursor: CursorState,
    anchor: CursorState,
    diff_deadline: Duration,
}

impl Default for SyncEngine {
    fn default() -> Self {
        Self::new(diff::DEFAULT_DIFF_DEADLINE)
    }
}

impl SyncEngine {
    pub fn new(diff_deadline: Duration) -> Self {
        Self {
            generation: 0,
            mode: String::new(),
            cursor: CursorState::default(),
            anchor: CursorState::default(),
            diff_deadline,
        }
    }

    /// Last backend mode seen by a pull.
    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn in_visual_mode(&self) -> bool {
        VisualMode::from_mode(&self.mode).is_some()
    }

    /// Start a pull, superseding any pull still in flight.
    pub fn begin_pull(&mut self) -> SyncGeneration {
        self.generation += 1;
        SyncGeneration(self.generation)
    }

    pub fn is_current(&self, generation: SyncGeneration) -> bool {
        generation.0 == self.generation
    }

    pub fn decide(
        &self,
        generation: SyncGeneration,
        binding: Option<&BufferBinding>,
        state: &PullState,
    ) -> PullDecision {
        let Some(binding) = binding.filter(|_| self.is_current(generation)) else {
            trace!("Dropping stale pull {generation:?}");
            return PullDecision::Stale;
        };
        if binding.buffer != state.buffer {
            debug!(
                "Pull reported buffer {} but editor is bound to {}",
                state.buffer, binding.buffer
            );
            return PullDecision::BufferMismatch;
        }
        if binding.last_change_tick == Some(state.change_tick) {
            PullDecision::Unchanged
        } else {
            PullDecision::Fetch
        }
    }

    pub fn diff(&self, old: &str, new: &str) -> Vec<DiffOp> {
        diff::diff_with_deadline(old, new, self.diff_deadline)
    }

    /// Plan the line mutations that bring the backend from `last_text` to
    /// `local_text`.
    pub fn plan_push(&self, binding: &BufferBinding, local_text: &str, full: bool) -> PushPlan {
        if binding.last_text == local_text && binding.initialized {
            return PushPlan::Unchanged;
        }
        if full || !binding.initialized {
            return PushPlan::Edits(vec![LineEdit::replace_all(local_text)]);
        }
        let old = binding.last_text.to_string();
        PushPlan::Edits(diff::line_edits(&old, local_text))
    }

    /// Backend command that places the cursor after a push.
    pub fn push_cursor_command(&mut self, text: &Rope, caret: usize) -> String {
        self.cursor = coords::cursor_at(text, caret);
        format!("call cursor({},{})", self.cursor.line, self.cursor.column)
    }

    /// Map the backend cursor and anchor onto `text` and return the local
    /// selection for the reported mode.
    pub fn reconcile(&mut self, text: &Rope, state: &PullState) -> Selection {
        self.mode = state.mode.clone();
        self.cursor = state.cursor;
        self.anchor = state.anchor;
        selection_from_backend(
            text,
            VisualMode::from_mode(&state.mode),
            state.cursor,
            state.anchor,
            state.tabstop,
        )
    }

    /// `buffer N|call SetCursor(l,c)` for a local caret move, or `None` when
    /// there is nothing to send.
    pub fn cursor_command(
        &mut self,
        binding: &BufferBinding,
        local_text: &str,
        selection: &Selection,
    ) -> Option<String> {
        if binding.last_text != local_text || self.in_visual_mode() || selection.has_selection() {
            return None;
        }
        let cursor = coords::cursor_at(&binding.last_text, selection.primary().position);
        if cursor == self.cursor {
            return None;
        }
        self.cursor = cursor;
        Some(format!(
            "buffer {}|call SetCursor({},{})",
            binding.buffer, cursor.line, cursor.column
        ))
    }

    /// A `normal!` command reselecting a local selection in the backend, or
    /// `None` when there is nothing to send.
    pub fn selection_command(
        &mut self,
        binding: &BufferBinding,
        local_text: &str,
        selection: &Selection,
    ) -> Option<String> {
        if binding.last_text != local_text {
            return None;
        }
        let text = &binding.last_text;

        let (visual, mut cursor, mut anchor) = match selection {
            Selection::Block(ranges) if ranges.len() > 1 => {
                let main = selection.primary();
                let other = ranges.first().copied().unwrap_or(main);
                let mut cursor = char_position(text, main.position);
                let mut anchor = char_position(text, other.anchor);
                if anchor.column < cursor.column {
                    cursor.column -= 1;
                } else if anchor.column > cursor.column {
                    anchor.column -= 1;
                }
                ("\x16", cursor, anchor)
            }
            _ if VisualMode::from_mode(&self.mode) == Some(VisualMode::Line) => return None,
            _ => {
                let range = selection.primary();
                if range.is_empty() {
                    return None;
                }
                let (mut position, mut anchor) = (range.position, range.anchor);
                if anchor < position {
                    position -= 1;
                } else {
                    anchor -= 1;
                }
                ("v", char_position(text, position), char_position(text, anchor))
            }
        };
        cursor.line = cursor.line.max(1);
        anchor.line = anchor.line.max(1);

        if cursor == self.cursor && anchor == self.anchor {
            return None;
        }
        self.cursor = cursor;
        self.anchor = anchor;
        Some(format!(
            "buffer {}|normal! \x03{}G{}|{}{}G{}|",
            binding.buffer, anchor.line, anchor.column, visual, cursor.line, cursor.column
        ))
    }
}

/// Line and 1-based character column of a char offset. `normal!` column
/// motions count characters, not bytes.
fn char_position(text: &Rope, offset: usize) -> CursorState {
    let offset = offset.min(text.len_chars());
    let line_idx = text.char_to_line(offset);
    let column = offset - text.line_to_char(line_idx) + 1;
    CursorState::new(line_idx as u32 + 1, column as u32)
}

/// The local selection showing a backend cursor and visual anchor.
pub fn selection_from_backend(
    text: &Rope,
    visual: Option<VisualMode>,
    cursor: CursorState,
    anchor: CursorState,
    tabstop: usize,
) -> Selection {
    let len = text.len_chars();
    let mut position = coords::to_offset_clamped(text, cursor.line, cursor.column);
    let mut anchor_offset = coords::to_offset_clamped(text, anchor.line, anchor.column);

    match visual {
        None => Selection::caret(position),
        Some(VisualMode::Line) => {
            let cursor_line = text.char_to_line(position);
            let anchor_line = text.char_to_line(anchor_offset);
            let range = if anchor_offset < position {
                TextRange::new(
                    coords::line_start(text, anchor_line),
                    coords::line_end(text, cursor_line),
                )
            } else {
                TextRange::new(
                    coords::line_end(text, anchor_line),
                    coords::line_start(text, cursor_line),
                )
            };
            Selection::Single(range)
        }
        Some(VisualMode::Char) => {
            if anchor_offset > position {
                anchor_offset = (anchor_offset + 1).min(len);
            } else {
                position = (position + 1).min(len);
            }
            Selection::Single(TextRange::new(anchor_offset, position))
        }
        Some(VisualMode::Block) => {
            let anchor_line = text.char_to_line(anchor_offset);
            let cursor_line = text.char_to_line(position);
            let anchor_in_line = anchor_offset - text.line_to_char(anchor_line);
            let cursor_in_line = position - text.line_to_char(cursor_line);
            let mut anchor_col = coords::display_column(text.line(anchor_line), anchor_in_line, tabstop);
            let mut cursor_col = coords::display_column(text.line(cursor_line), cursor_in_line, tabstop);
            // The block includes the character under its right edge.
            if anchor_col > cursor_col {
                anchor_col += 1;
            } else {
                cursor_col += 1;
            }

            let lines: Box<dyn Iterator<Item = usize>> = if anchor_line <= cursor_line {
                Box::new(anchor_line..=cursor_line)
            } else {
                Box::new((cursor_line..=anchor_line).rev())
            };

            let ranges = lines
                .filter_map(|line_idx| {
                    let line = text.line(line_idx);
                    let width = coords::display_width(line, tabstop);
                    if width < anchor_col && width < cursor_col {
                        return None;
                    }
                    let start = text.line_to_char(line_idx);
                    Some(TextRange::new(
                        start + coords::offset_at_display_column(line, anchor_col, tabstop),
                        start + coords::offset_at_display_column(line, cursor_col, tabstop),
                    ))
                })
                .collect::<Vec<_>>();

            if ranges.is_empty() {
                Selection::caret(position)
            } else {
                Selection::Block(ranges)
            }
        }
    }
}
