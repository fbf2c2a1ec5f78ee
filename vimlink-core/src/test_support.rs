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

//! In-memory collaborators for tests.

use crate::cmdline::CommandLineDisplay;
use crate::diff::{self, DiffOp, LineEdit};
use crate::host::{DisplayOptions, DocumentKind, Host, Palette, Selection};
use crate::rpc::{Backend, RpcError, Value};
use crate::sync::PULL_EXPR;
use crate::{BufferId, EditorHandle};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    UiAttach { width: u32, height: u32 },
    Resize { width: u32, height: u32 },
    Input(String),
    Command(String),
    Exec(String),
    Eval(String),
    GetLines(BufferId),
    SetLines {
        buffer: BufferId,
        start: i64,
        end: i64,
        replacement: Vec<String>,
    },
    SetOption {
        buffer: BufferId,
        name: String,
        value: Value,
    },
    SetName { buffer: BufferId, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Attach {
    #[default]
    Accept,
    Refuse,
    Hang,
}

/// Backend state the fake reports through the pull expression.
#[derive(Debug)]
pub struct FakeState {
    pub calls: Vec<Call>,
    pub attach: Attach,
    pub buffers: HashMap<BufferId, Vec<String>>,
    pub current: BufferId,
    pub next_buffer: i64,
    pub tick: u64,
    pub mode: String,
    /// (line, byte column)
    pub cursor: (i64, i64),
    pub anchor: (i64, i64),
    pub modified: bool,
    /// Reject every `nvim_buf_set_lines` while set.
    pub fail_set_lines: bool,
}

/// A backend that keeps buffers in memory and records every call.
#[derive(Debug)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                calls: Vec::new(),
                attach: Attach::Accept,
                buffers: HashMap::new(),
                current: BufferId(0),
                next_buffer: 1,
                tick: 0,
                mode: "n".into(),
                cursor: (1, 1),
                anchor: (1, 1),
                modified: false,
                fail_set_lines: false,
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.state().calls)
    }

    pub fn lines(&self, buffer: BufferId) -> Vec<String> {
        self.state().buffers.get(&buffer).cloned().unwrap_or_default()
    }

    /// Simulate an edit made inside the backend.
    pub fn edit(&self, buffer: BufferId, text: &str, cursor: (i64, i64)) {
        let mut state = self.state();
        state.buffers.insert(buffer, diff::split_lines(text));
        state.tick += 1;
        state.cursor = cursor;
        state.anchor = cursor;
    }

    fn record(&self, call: Call) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

fn position((line, column): (i64, i64)) -> Value {
    Value::Array(vec![
        Value::Integer(0),
        Value::Integer(line),
        Value::Integer(column),
        Value::Integer(0),
    ])
}

#[async_trait]
impl Backend for FakeBackend {
    fn channel_id(&self) -> i64 {
        1
    }

    async fn ui_attach(
        &self,
        width: u32,
        height: u32,
        _options: Vec<(String, Value)>,
    ) -> Result<(), RpcError> {
        let attach = self.record(Call::UiAttach { width, height }).attach;
        match attach {
            Attach::Accept => Ok(()),
            Attach::Refuse => Err(RpcError::Disconnected),
            Attach::Hang => std::future::pending().await,
        }
    }

    async fn ui_try_resize_grid(&self, _grid: i64, width: u32, height: u32) -> Result<(), RpcError> {
        self.record(Call::Resize { width, height });
        Ok(())
    }

    async fn input(&self, keys: &str) -> Result<i64, RpcError> {
        self.record(Call::Input(keys.to_string()));
        Ok(keys.len() as i64)
    }

    async fn command(&self, command: &str) -> Result<(), RpcError> {
        let mut state = self.record(Call::Command(command.to_string()));
        for part in command.split('|').map(str::trim) {
            if part.starts_with("edit ") {
                let buffer = BufferId(state.next_buffer);
                state.next_buffer += 1;
                state.buffers.insert(buffer, vec![String::new()]);
                state.current = buffer;
            } else if let Some(number) = part.strip_prefix("buffer ") {
                if let Ok(number) = number.parse() {
                    state.current = BufferId(number);
                }
            } else if let Some(number) = part.strip_prefix("bd! ") {
                if let Ok(number) = number.parse() {
                    state.buffers.remove(&BufferId(number));
                }
            }
        }
        Ok(())
    }

    async fn exec(&self, source: &str) -> Result<(), RpcError> {
        self.record(Call::Exec(source.to_string()));
        Ok(())
    }

    async fn eval(&self, expr: &str) -> Result<Value, RpcError> {
        let state = self.record(Call::Eval(expr.to_string()));
        if expr == "bufnr('')" {
            return Ok(Value::Integer(state.current.0));
        }
        if expr == PULL_EXPR {
            return Ok(Value::Array(vec![
                Value::Integer(state.current.0),
                Value::Integer(state.tick as i64),
                Value::from(state.mode.as_str()),
                Value::Boolean(state.modified),
                position(state.cursor),
                position(state.anchor),
                Value::Boolean(true),
                Value::Boolean(false),
                Value::Boolean(true),
                Value::Integer(8),
            ]));
        }
        Ok(Value::Nil)
    }

    async fn buf_get_lines(
        &self,
        buffer: BufferId,
        _start: i64,
        _end: i64,
        _strict: bool,
    ) -> Result<Vec<String>, RpcError> {
        let state = self.record(Call::GetLines(buffer));
        state
            .buffers
            .get(&buffer)
            .cloned()
            .ok_or_else(|| RpcError::Remote(format!("invalid buffer {buffer}")))
    }

    async fn buf_set_lines(
        &self,
        buffer: BufferId,
        start: i64,
        end: i64,
        _strict: bool,
        replacement: Vec<String>,
    ) -> Result<(), RpcError> {
        let mut state = self.record(Call::SetLines {
            buffer,
            start,
            end,
            replacement: replacement.clone(),
        });
        if state.fail_set_lines {
            return Err(RpcError::Remote("E21: Cannot make changes".into()));
        }
        let lines = state.buffers.entry(buffer).or_default();
        diff::apply_line_edits(
            lines,
            &[LineEdit {
                start,
                end,
                replacement,
            }],
        );
        state.tick += 1;
        Ok(())
    }

    async fn buf_set_option(&self, buffer: BufferId, name: &str, value: Value) -> Result<(), RpcError> {
        self.record(Call::SetOption {
            buffer,
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    async fn buf_set_name(&self, buffer: BufferId, name: &str) -> Result<(), RpcError> {
        self.record(Call::SetName {
            buffer,
            name: name.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    pub path: Option<String>,
    pub kind: Option<DocumentKind>,
    pub text: String,
    pub selection: Selection,
    pub modified: bool,
}

/// A host whose documents are plain strings.
#[derive(Debug, Default)]
pub struct MemoryHost {
    pub current: Option<EditorHandle>,
    pub documents: HashMap<EditorHandle, Document>,
    pub next_editor: u64,
    pub existing_files: HashSet<String>,
    pub project_dir: Option<PathBuf>,
    pub save_succeeds: bool,
    pub activated: Vec<EditorHandle>,
    pub closed: Vec<EditorHandle>,
    pub saved: Vec<(EditorHandle, String)>,
    pub cursor_widths: HashMap<EditorHandle, u32>,
    pub palettes: Vec<Palette>,
    pub display_options: Option<DisplayOptions>,
    pub beeps: usize,
    pub triggered: Vec<String>,
    pub fatal: Vec<String>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            next_editor: 1,
            save_succeeds: true,
            ..Self::default()
        }
    }

    /// Add a document and make it current.
    pub fn open(&mut self, path: &str, text: &str) -> EditorHandle {
        let editor = EditorHandle(self.next_editor);
        self.next_editor += 1;
        self.documents.insert(
            editor,
            Document {
                path: Some(path.to_string()),
                text: text.to_string(),
                ..Document::default()
            },
        );
        self.current = Some(editor);
        editor
    }

    pub fn document(&self, editor: EditorHandle) -> &Document {
        &self.documents[&editor]
    }

    pub fn document_mut(&mut self, editor: EditorHandle) -> &mut Document {
        self.documents.get_mut(&editor).unwrap()
    }
}

impl Host for MemoryHost {
    fn current_editor(&self) -> Option<EditorHandle> {
        self.current
    }

    fn file_name(&self, editor: EditorHandle) -> Option<String> {
        self.documents.get(&editor)?.path.clone()
    }

    fn project_directory(&self, _editor: EditorHandle) -> Option<PathBuf> {
        self.project_dir.clone()
    }

    fn file_exists(&self, path: &str) -> bool {
        self.existing_files.contains(path)
    }

    fn open_document(&mut self, path: &str, kind: DocumentKind) -> Option<EditorHandle> {
        let editor = self.open(path, "");
        self.document_mut(editor).kind = Some(kind);
        Some(editor)
    }

    fn activate_editor(&mut self, editor: EditorHandle) {
        self.activated.push(editor);
        self.current = Some(editor);
    }

    fn close_document(&mut self, editor: EditorHandle) {
        self.closed.push(editor);
        self.documents.remove(&editor);
        if self.current == Some(editor) {
            self.current = None;
        }
    }

    fn text(&self, editor: EditorHandle) -> String {
        self.documents
            .get(&editor)
            .map(|doc| doc.text.clone())
            .unwrap_or_default()
    }

    fn apply_patch(&mut self, editor: EditorHandle, ops: &[DiffOp]) {
        if let Some(doc) = self.documents.get_mut(&editor) {
            doc.text = diff::apply(&doc.text, ops);
        }
    }

    fn selection(&self, editor: EditorHandle) -> Selection {
        self.documents
            .get(&editor)
            .map(|doc| doc.selection.clone())
            .unwrap_or_default()
    }

    fn set_selection(&mut self, editor: EditorHandle, selection: Selection) {
        if let Some(doc) = self.documents.get_mut(&editor) {
            doc.selection = selection;
        }
    }

    fn is_modified(&self, editor: EditorHandle) -> bool {
        self.documents.get(&editor).is_some_and(|doc| doc.modified)
    }

    fn set_modified(&mut self, editor: EditorHandle, modified: bool) {
        if let Some(doc) = self.documents.get_mut(&editor) {
            doc.modified = modified;
        }
    }

    fn save(&mut self, editor: EditorHandle, path: &str) -> bool {
        self.saved.push((editor, path.to_string()));
        if self.save_succeeds {
            if let Some(doc) = self.documents.get_mut(&editor) {
                doc.path = Some(path.to_string());
                doc.modified = false;
            }
        }
        self.save_succeeds
    }

    fn set_cursor_width(&mut self, editor: EditorHandle, width: u32) {
        self.cursor_widths.insert(editor, width);
    }

    fn average_char_width(&self, _editor: EditorHandle) -> f32 {
        8.0
    }

    fn set_palette(&mut self, _editor: EditorHandle, palette: Palette) {
        self.palettes.push(palette);
    }

    fn set_display_options(&mut self, _editor: EditorHandle, options: DisplayOptions) {
        self.display_options = Some(options);
    }

    fn beep(&mut self) {
        self.beeps += 1;
    }

    fn trigger_command(&mut self, command_id: &str) {
        self.triggered.push(command_id.to_string());
    }

    fn report_fatal(&mut self, message: &str) {
        self.fatal.push(message.to_string());
    }
}

#[derive(Debug, Default)]
pub struct RecordingDisplay {
    pub shown: Vec<(String, usize)>,
    pub cursor: Option<usize>,
    pub hidden: bool,
    pub messages: Vec<String>,
    pub cleared: usize,
}

impl CommandLineDisplay for RecordingDisplay {
    fn show(&mut self, text: &str, cursor: usize) {
        self.hidden = false;
        self.shown.push((text.to_string(), cursor));
    }

    fn set_cursor(&mut self, cursor: usize) {
        self.cursor = Some(cursor);
    }

    fn hide(&mut self) {
        self.hidden = true;
    }

    fn show_message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }

    fn clear(&mut self) {
        self.cleared += 1;
    }
}

