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

//! Interpreter for the backend's `redraw` notifications.
//!
//! A notification carries a batch of `[name, args...]` entries, one argument
//! tuple per occurrence of the event. A frame ends with `flush`; the frame is
//! what counts as one UI update, and it may span several notifications.

use crate::cmdline::{CmdlineState, CommandLineDisplay};
use crate::host::{Palette, Rgb};
use crate::rpc::Value;
use log::{debug, trace, warn};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("redraw entry is not a [name, args...] array")]
    NotAnEvent,
    #[error("malformed `{event}` arguments: {reason}")]
    Malformed { event: String, reason: &'static str },
}

/// One decoded redraw event.
#[derive(Debug, Clone, PartialEq)]
pub enum RedrawEvent {
    ModeChange {
        mode: String,
        mode_idx: i64,
    },
    BusyStart,
    BusyStop,
    MouseOn,
    MouseOff,
    Bell,
    VisualBell,
    GridResize {
        grid: i64,
        width: u32,
        height: u32,
    },
    /// `None` for a colour the backend reports as unset (`-1`).
    DefaultColorsSet {
        foreground: Option<Rgb>,
        background: Option<Rgb>,
        special: Option<Rgb>,
    },
    CmdlineShow {
        content: String,
        pos: usize,
        first_char: Option<char>,
        prompt: String,
        indent: usize,
        level: i64,
    },
    CmdlinePos {
        pos: usize,
        level: i64,
    },
    CmdlineHide {
        level: i64,
    },
    MsgShow {
        kind: String,
        content: String,
        replace_last: bool,
    },
    MsgClear,
    MsgHistoryShow {
        entries: Vec<String>,
    },
    /// `win_pos`, `win_float_pos`, `win_hide`, `win_close`.
    Window {
        name: String,
        grid: i64,
    },
    Flush,
    /// Anything this interpreter has no state for (`grid_line`, `hl_attr_define`...).
    Other(String),
}

/// Events are grouped by whether they can change the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    Message,
    CommandLine,
    Flush,
    /// Anything else: grid content, cursor, mode, options...
    Content,
}

impl RedrawEvent {
    pub fn name(&self) -> &str {
        match self {
            RedrawEvent::ModeChange { .. } => "mode_change",
            RedrawEvent::BusyStart => "busy_start",
            RedrawEvent::BusyStop => "busy_stop",
            RedrawEvent::MouseOn => "mouse_on",
            RedrawEvent::MouseOff => "mouse_off",
            RedrawEvent::Bell => "bell",
            RedrawEvent::VisualBell => "visual_bell",
            RedrawEvent::GridResize { .. } => "grid_resize",
            RedrawEvent::DefaultColorsSet { .. } => "default_colors_set",
            RedrawEvent::CmdlineShow { .. } => "cmdline_show",
            RedrawEvent::CmdlinePos { .. } => "cmdline_pos",
            RedrawEvent::CmdlineHide { .. } => "cmdline_hide",
            RedrawEvent::MsgShow { .. } => "msg_show",
            RedrawEvent::MsgClear => "msg_clear",
            RedrawEvent::MsgHistoryShow { .. } => "msg_history_show",
            RedrawEvent::Window { name, .. } | RedrawEvent::Other(name) => name,
            RedrawEvent::Flush => "flush",
        }
    }

    pub fn family(&self) -> EventFamily {
        family_of(self.name())
    }

    /// Decode one argument tuple of the event called `name`.
    pub fn decode(name: &str, args: &[Value]) -> Result<Self, DecodeError> {
        let args = Args { event: name, args };
        let event = match name {
            "mode_change" => RedrawEvent::ModeChange {
                mode: args.string(0)?,
                mode_idx: args.int(1).unwrap_or(-1),
            },
            "busy_start" => RedrawEvent::BusyStart,
            "busy_stop" => RedrawEvent::BusyStop,
            "mouse_on" => RedrawEvent::MouseOn,
            "mouse_off" => RedrawEvent::MouseOff,
            "bell" => RedrawEvent::Bell,
            "visual_bell" => RedrawEvent::VisualBell,
            "grid_resize" => RedrawEvent::GridResize {
                grid: args.int(0)?,
                width: args.dimension(1)?,
                height: args.dimension(2)?,
            },
            "default_colors_set" => RedrawEvent::DefaultColorsSet {
                foreground: color(args.get(0)?),
                background: color(args.get(1)?),
                special: color(args.get(2)?),
            },
            "cmdline_show" => RedrawEvent::CmdlineShow {
                content: chunks(args.get(0)?),
                pos: args.count(1)?,
                first_char: args.string(2)?.chars().next(),
                prompt: args.string(3)?,
                indent: args.count(4)?,
                level: args.int(5).unwrap_or(1),
            },
            "cmdline_pos" => RedrawEvent::CmdlinePos {
                pos: args.count(0)?,
                level: args.int(1).unwrap_or(1),
            },
            "cmdline_hide" => RedrawEvent::CmdlineHide {
                level: args.int(0).unwrap_or(1),
            },
            "msg_show" => RedrawEvent::MsgShow {
                kind: args.string(0)?,
                content: chunks(args.get(1)?),
                replace_last: args.get(2).ok().and_then(Value::as_bool).unwrap_or(false),
            },
            "msg_clear" => RedrawEvent::MsgClear,
            "msg_history_show" => RedrawEvent::MsgHistoryShow {
                entries: args
                    .array(0)?
                    .iter()
                    .filter_map(|entry| entry.as_array()?.get(1).map(chunks))
                    .collect(),
            },
            "win_pos" | "win_float_pos" | "win_hide" | "win_close" => RedrawEvent::Window {
                name: name.to_string(),
                grid: args.int(0)?,
            },
            "flush" => RedrawEvent::Flush,
            _ => RedrawEvent::Other(name.to_string()),
        };
        Ok(event)
    }
}

/// Decode the arguments of a `redraw` notification. Malformed entries are
/// logged and skipped.
pub fn decode_batch(batch: &[Value]) -> Vec<RedrawEvent> {
    let mut events = Vec::new();
    for entry in batch {
        let Some((name, tuples)) = entry
            .as_array()
            .and_then(|items| Some((items.first()?.as_str()?, &items[1..])))
        else {
            warn!("Skipping redraw entry: {}", DecodeError::NotAnEvent);
            continue;
        };

        if tuples.is_empty() {
            push_decoded(&mut events, name, &[]);
        }
        for tuple in tuples {
            push_decoded(&mut events, name, tuple.as_array().unwrap_or_default());
        }
    }
    events
}

fn family_of(name: &str) -> EventFamily {
    if name == "flush" {
        EventFamily::Flush
    } else if name.starts_with("msg") {
        EventFamily::Message
    } else if name.starts_with("cmdline") {
        EventFamily::CommandLine
    } else {
        EventFamily::Content
    }
}

fn push_decoded(events: &mut Vec<RedrawEvent>, name: &str, args: &[Value]) {
    match RedrawEvent::decode(name, args) {
        Ok(event) => events.push(event),
        Err(e) => {
            warn!("Skipping redraw event: {e}");
            // Still a content change as far as the frame is concerned.
            if family_of(name) == EventFamily::Content {
                events.push(RedrawEvent::Other(name.to_string()));
            }
        }
    }
}

struct Args<'a> {
    event: &'a str,
    args: &'a [Value],
}

impl<'a> Args<'a> {
    fn malformed(&self, reason: &'static str) -> DecodeError {
        DecodeError::Malformed {
            event: self.event.to_string(),
            reason,
        }
    }

    fn get(&self, idx: usize) -> Result<&'a Value, DecodeError> {
        self.args
            .get(idx)
            .ok_or_else(|| self.malformed("missing argument"))
    }

    fn int(&self, idx: usize) -> Result<i64, DecodeError> {
        self.get(idx)?
            .as_i64()
            .ok_or_else(|| self.malformed("expected an integer"))
    }

    fn count(&self, idx: usize) -> Result<usize, DecodeError> {
        usize::try_from(self.int(idx)?).map_err(|_| self.malformed("expected a non-negative integer"))
    }

    fn dimension(&self, idx: usize) -> Result<u32, DecodeError> {
        u32::try_from(self.int(idx)?).map_err(|_| self.malformed("expected a grid dimension"))
    }

    fn string(&self, idx: usize) -> Result<String, DecodeError> {
        self.get(idx)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.malformed("expected a string"))
    }

    fn array(&self, idx: usize) -> Result<&'a [Value], DecodeError> {
        self.get(idx)?
            .as_array()
            .ok_or_else(|| self.malformed("expected an array"))
    }
}

fn color(value: &Value) -> Option<Rgb> {
    value
        .as_i64()
        .filter(|rgb| *rgb >= 0)
        .map(|rgb| Rgb(rgb as u32))
}

/// Concatenate the text of `[[attr, text, ...], ...]` chunks.
fn chunks(value: &Value) -> String {
    value
        .as_array()
        .unwrap_or_default()
        .iter()
        .filter_map(|chunk| chunk.as_array()?.get(1)?.as_str())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorShape {
    Hidden,
    /// Thin insert-style caret.
    Bar,
    /// One character wide.
    Block,
}

impl CursorShape {
    /// Shape for a backend UI mode. `None` means the mode has no opinion and
    /// the current shape should stay.
    pub fn for_mode(mode: &str, busy: bool) -> Option<Self> {
        if busy {
            return Some(CursorShape::Hidden);
        }
        match mode {
            "insert" | "visual" => Some(CursorShape::Bar),
            "normal" | "operator" => Some(CursorShape::Block),
            _ => None,
        }
    }

    /// Caret width in pixels given the editor's average character width.
    pub fn width(self, char_width: f32) -> u32 {
        match self {
            CursorShape::Hidden => 0,
            CursorShape::Bar => 1,
            CursorShape::Block => (char_width.round() as u32).max(1),
        }
    }
}

/// UI state accumulated from redraw events.
#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    /// Backend UI mode name from `mode_change` (`normal`, `insert`, ...).
    pub mode: String,
    pub busy: bool,
    pub mouse_enabled: bool,
    pub grid_width: u32,
    pub grid_height: u32,
    pub foreground: Option<Rgb>,
    pub background: Option<Rgb>,
    pub special: Option<Rgb>,
    pub command_line: CmdlineState,
}

impl UiState {
    pub fn new(grid_width: u32, grid_height: u32) -> Self {
        Self {
            mode: String::new(),
            busy: false,
            mouse_enabled: false,
            grid_width,
            grid_height,
            foreground: None,
            background: None,
            special: None,
            command_line: CmdlineState::default(),
        }
    }

    pub fn palette(&self) -> Palette {
        Palette {
            foreground: self.foreground,
            background: self.background,
        }
    }

    pub fn cursor_shape(&self) -> Option<CursorShape> {
        CursorShape::for_mode(&self.mode, self.busy)
    }
}

/// What the session has to do after a batch was interpreted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    /// A frame that touched content was flushed: pull from the backend.
    pub pull: bool,
    /// Default colours changed; apply right away.
    pub palette: Option<Palette>,
    pub bell: bool,
}

#[derive(Debug, Default)]
pub struct RedrawInterpreter {
    /// The frame in progress contains a content event.
    frame_dirty: bool,
}

impl RedrawInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_dirty(&self) -> bool {
        self.frame_dirty
    }

    /// Interpret one batch of events in order.
    pub fn process(
        &mut self,
        events: &[RedrawEvent],
        ui: &mut UiState,
        display: &mut dyn CommandLineDisplay,
    ) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();

        for event in events {
            match event.family() {
                EventFamily::Content => self.frame_dirty = true,
                EventFamily::Flush => {
                    if std::mem::take(&mut self.frame_dirty) {
                        outcome.pull = true;
                    }
                }
                EventFamily::Message | EventFamily::CommandLine => {}
            }

            match event {
                RedrawEvent::ModeChange { mode, .. } => ui.mode = mode.clone(),
                RedrawEvent::BusyStart => ui.busy = true,
                RedrawEvent::BusyStop => ui.busy = false,
                RedrawEvent::MouseOn => ui.mouse_enabled = true,
                RedrawEvent::MouseOff => ui.mouse_enabled = false,
                RedrawEvent::Bell | RedrawEvent::VisualBell => outcome.bell = true,
                RedrawEvent::GridResize {
                    grid,
                    width,
                    height,
                } => {
                    if *grid == 1 {
                        ui.grid_width = *width;
                        ui.grid_height = *height;
                    }
                }
                RedrawEvent::DefaultColorsSet {
                    foreground,
                    background,
                    special,
                } => {
                    ui.foreground = foreground.or(ui.foreground);
                    ui.background = background.or(ui.background);
                    ui.special = special.or(ui.special);
                    outcome.palette = Some(ui.palette());
                }
                RedrawEvent::CmdlineShow {
                    content,
                    pos,
                    first_char,
                    prompt,
                    indent,
                    ..
                } => {
                    let cmdline = &mut ui.command_line;
                    cmdline.visible = true;
                    cmdline.content = content.clone();
                    cmdline.cursor_pos = *pos;
                    cmdline.first_char = *first_char;
                    cmdline.prompt = prompt.clone();
                    cmdline.indent = *indent;
                    display.show(&cmdline.rendered(), cmdline.display_cursor());
                }
                RedrawEvent::CmdlinePos { pos, .. } => {
                    ui.command_line.cursor_pos = *pos;
                    display.set_cursor(ui.command_line.display_cursor());
                }
                RedrawEvent::CmdlineHide { .. } => {
                    ui.command_line = CmdlineState::default();
                    display.clear();
                    display.hide();
                }
                RedrawEvent::MsgShow { content, .. } => display.show_message(content),
                RedrawEvent::MsgClear => display.clear(),
                RedrawEvent::MsgHistoryShow { entries } => display.show_message(&entries.join("\n")),
                RedrawEvent::Window { name, grid } => debug!("{name} for grid {grid}"),
                RedrawEvent::Flush => trace!("flush"),
                RedrawEvent::Other(_) => {}
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingDisplay;

    fn entry(name: &str, tuples: Vec<Vec<Value>>) -> Value {
        let mut items = vec![Value::from(name)];
        items.extend(tuples.into_iter().map(Value::Array));
        Value::Array(items)
    }

    fn chunk(text: &str) -> Value {
        Value::Array(vec![Value::Integer(0), Value::from(text)])
    }

    fn run(events: &[RedrawEvent]) -> (FrameOutcome, UiState, RecordingDisplay) {
        let mut interpreter = RedrawInterpreter::new();
        let mut ui = UiState::new(80, 24);
        let mut display = RecordingDisplay::default();
        let outcome = interpreter.process(events, &mut ui, &mut display);
        (outcome, ui, display)
    }

    #[test]
    fn test_decode_batch_expands_tuples() {
        let batch = vec![
            entry(
                "grid_line",
                vec![vec![Value::Integer(1)], vec![Value::Integer(1)]],
            ),
            entry("mode_change", vec![vec![Value::from("insert"), Value::Integer(3)]]),
            entry("flush", vec![vec![]]),
        ];
        let events = decode_batch(&batch);
        assert_eq!(
            events,
            vec![
                RedrawEvent::Other("grid_line".into()),
                RedrawEvent::Other("grid_line".into()),
                RedrawEvent::ModeChange {
                    mode: "insert".into(),
                    mode_idx: 3
                },
                RedrawEvent::Flush,
            ]
        );
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let batch = vec![
            Value::Integer(5),
            entry("grid_resize", vec![vec![Value::Integer(1)]]),
            entry("busy_start", vec![vec![]]),
        ];
        assert_eq!(
            decode_batch(&batch),
            vec![RedrawEvent::Other("grid_resize".into()), RedrawEvent::BusyStart]
        );

        let batch = vec![entry("msg_show", vec![vec![Value::Integer(1)]])];
        assert!(decode_batch(&batch).is_empty());
    }

    #[test]
    fn test_malformed_content_event_still_pulls() {
        let batch = vec![
            entry("grid_resize", vec![vec![Value::from("two")]]),
            entry("flush", vec![vec![]]),
        ];
        let events = decode_batch(&batch);
        assert_eq!(
            events,
            vec![RedrawEvent::Other("grid_resize".into()), RedrawEvent::Flush]
        );
        let (outcome, _, _) = run(&events);
        assert!(outcome.pull);
    }

    #[test]
    fn test_decode_cmdline_show() {
        let args = vec![
            Value::Array(vec![chunk("s/a"), chunk("/b")]),
            Value::Integer(5),
            Value::from(":"),
            Value::from(""),
            Value::Integer(0),
            Value::Integer(1),
        ];
        assert_eq!(
            RedrawEvent::decode("cmdline_show", &args),
            Ok(RedrawEvent::CmdlineShow {
                content: "s/a/b".into(),
                pos: 5,
                first_char: Some(':'),
                prompt: String::new(),
                indent: 0,
                level: 1,
            })
        );
    }

    #[test]
    fn test_decode_default_colors_unset() {
        let args = vec![
            Value::Integer(0xffffff),
            Value::Integer(-1),
            Value::Integer(0xff0000),
            Value::Integer(-1),
            Value::Integer(-1),
        ];
        assert_eq!(
            RedrawEvent::decode("default_colors_set", &args),
            Ok(RedrawEvent::DefaultColorsSet {
                foreground: Some(Rgb(0xffffff)),
                background: None,
                special: Some(Rgb(0xff0000)),
            })
        );
    }

    #[test]
    fn test_content_frame_pulls_once_on_flush() {
        let (outcome, _, _) = run(&[
            RedrawEvent::Other("grid_line".into()),
            RedrawEvent::Other("grid_cursor_goto".into()),
            RedrawEvent::Flush,
        ]);
        assert!(outcome.pull);
    }

    #[test]
    fn test_message_and_cmdline_frames_do_not_pull() {
        let (outcome, _, display) = run(&[
            RedrawEvent::MsgShow {
                kind: "echo".into(),
                content: "hi".into(),
                replace_last: false,
            },
            RedrawEvent::CmdlinePos { pos: 1, level: 1 },
            RedrawEvent::Flush,
        ]);
        assert!(!outcome.pull);
        assert_eq!(display.messages, vec!["hi".to_string()]);
    }

    #[test]
    fn test_no_pull_without_flush() {
        let (outcome, _, _) = run(&[RedrawEvent::Other("grid_line".into())]);
        assert!(!outcome.pull);
    }

    #[test]
    fn test_frame_spans_notifications() {
        let mut interpreter = RedrawInterpreter::new();
        let mut ui = UiState::new(80, 24);
        let mut display = RecordingDisplay::default();

        let first = interpreter.process(
            &[RedrawEvent::Other("grid_line".into())],
            &mut ui,
            &mut display,
        );
        assert!(!first.pull);
        assert!(interpreter.frame_dirty());

        let second = interpreter.process(&[RedrawEvent::Flush], &mut ui, &mut display);
        assert!(second.pull);
        assert!(!interpreter.frame_dirty());

        let third = interpreter.process(&[RedrawEvent::Flush], &mut ui, &mut display);
        assert!(!third.pull);
    }

    #[test]
    fn test_flags_and_grid() {
        let (_, ui, _) = run(&[
            RedrawEvent::BusyStart,
            RedrawEvent::MouseOn,
            RedrawEvent::GridResize {
                grid: 2,
                width: 10,
                height: 10,
            },
            RedrawEvent::GridResize {
                grid: 1,
                width: 120,
                height: 40,
            },
        ]);
        assert!(ui.busy);
        assert!(ui.mouse_enabled);
        assert_eq!((ui.grid_width, ui.grid_height), (120, 40));
    }

    #[test]
    fn test_palette_applies_without_flush() {
        let (outcome, ui, _) = run(&[RedrawEvent::DefaultColorsSet {
            foreground: Some(Rgb(0xdddddd)),
            background: Some(Rgb(0x101010)),
            special: None,
        }]);
        assert_eq!(
            outcome.palette,
            Some(Palette {
                foreground: Some(Rgb(0xdddddd)),
                background: Some(Rgb(0x101010)),
            })
        );
        assert_eq!(ui.special, None);
    }

    #[test]
    fn test_cmdline_lifecycle() {
        let (_, ui, display) = run(&[
            RedrawEvent::CmdlineShow {
                content: "wq".into(),
                pos: 2,
                first_char: Some(':'),
                prompt: String::new(),
                indent: 0,
                level: 1,
            },
            RedrawEvent::CmdlinePos { pos: 1, level: 1 },
        ]);
        assert!(ui.command_line.visible);
        assert_eq!(display.shown, vec![(":wq".to_string(), 3)]);
        assert_eq!(display.cursor, Some(2));

        let (_, ui, display) = run(&[RedrawEvent::CmdlineHide { level: 1 }]);
        assert!(!ui.command_line.visible);
        assert!(display.hidden);
    }

    #[test]
    fn test_cursor_shape_by_mode() {
        assert_eq!(CursorShape::for_mode("normal", false), Some(CursorShape::Block));
        assert_eq!(CursorShape::for_mode("operator", false), Some(CursorShape::Block));
        assert_eq!(CursorShape::for_mode("insert", false), Some(CursorShape::Bar));
        assert_eq!(CursorShape::for_mode("visual", false), Some(CursorShape::Bar));
        assert_eq!(CursorShape::for_mode("insert", true), Some(CursorShape::Hidden));
        assert_eq!(CursorShape::for_mode("cmdline_normal", false), None);
        assert_eq!(CursorShape::Block.width(7.6), 8);
        assert_eq!(CursorShape::Bar.width(7.6), 1);
        assert_eq!(CursorShape::Hidden.width(7.6), 0);
    }
}
