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

//! The session loop: the one place where bindings, UI state and the
//! collaborators meet.
//!
//! Host and backend events arrive on a channel. Every backend round trip is a
//! future in a [`FuturesUnordered`] set whose output is a [`Continuation`],
//! resumed on the same loop. A continuation therefore sees the binding state as
//! it is when the reply arrives, not as it was when the request went out.

use crate::bootstrap;
use crate::cmdline::CommandLineDisplay;
use crate::config::Config;
use crate::diff::{self, LineEdit};
use crate::host::{Host, Selection};
use crate::lifecycle::{Effect, FileEvent, HostContext, Initialization, LifecycleManager};
use crate::redraw::{self, RedrawInterpreter, UiState};
use crate::rpc::{escape_path, Backend, Notification, RpcError, Value};
use crate::sync::{self, PullDecision, PullState, PushPlan, SyncEngine, SyncGeneration};
use crate::{BufferId, EditorHandle};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use log::{debug, error, info, trace, warn};
use ropey::Rope;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("backend did not accept the UI within {0:?}")]
    AttachTimeout(Duration),
    #[error("backend unreachable: {0}")]
    BackendUnreachable(#[source] RpcError),
}

/// Everything the session reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A notification from the backend (`redraw`, `Gui`).
    Notification(Notification),
    /// The host opened or focused an editor.
    EditorOpened(EditorHandle),
    EditorClosing(EditorHandle),
    TextChanged(EditorHandle),
    CursorMoved(EditorHandle),
    SelectionChanged(EditorHandle),
    /// The editor area now fits this many character cells.
    ViewportResized { columns: u32, rows: u32 },
    /// Keys to forward verbatim, in backend key notation.
    Input(String),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterPush {
    Nothing,
    Initialize,
}

/// A finished backend round trip, waiting to be applied.
enum Continuation {
    BufferOpened {
        editor: EditorHandle,
        result: Result<Value, RpcError>,
    },
    UndoDisabled {
        buffer: BufferId,
        result: Result<(), RpcError>,
    },
    Pushed {
        editor: EditorHandle,
        buffer: BufferId,
        text: Rope,
        after: AfterPush,
        result: Result<(), RpcError>,
    },
    PullState {
        editor: EditorHandle,
        generation: SyncGeneration,
        result: Result<Value, RpcError>,
    },
    PullLines {
        editor: EditorHandle,
        generation: SyncGeneration,
        state: PullState,
        result: Result<Vec<String>, RpcError>,
    },
    /// A call whose only follow-up is logging a failure.
    Fired {
        what: String,
        result: Result<(), RpcError>,
    },
}

async fn open_in_backend(backend: Arc<dyn Backend>, path: String) -> Result<Value, RpcError> {
    backend.command(&format!("edit {}", escape_path(&path))).await?;
    backend.eval("bufnr('')").await
}

async fn push_lines(
    backend: Arc<dyn Backend>,
    buffer: BufferId,
    edits: Vec<LineEdit>,
    cursor: String,
) -> Result<(), RpcError> {
    for edit in edits {
        backend
            .buf_set_lines(buffer, edit.start, edit.end, false, edit.replacement)
            .await?;
    }
    backend.command(&cursor).await
}

async fn rename_buffer(backend: Arc<dyn Backend>, buffer: BufferId, path: String) -> Result<(), RpcError> {
    backend.buf_set_name(buffer, &path).await?;
    backend.command("edit!").await
}

pub struct Session<H: Host, D: CommandLineDisplay> {
    backend: Arc<dyn Backend>,
    host: H,
    display: D,
    config: Config,
    lifecycle: LifecycleManager,
    sync: SyncEngine,
    interpreter: RedrawInterpreter,
    ui: UiState,
    pending: FuturesUnordered<BoxFuture<'static, Continuation>>,
    stopping: bool,
}

impl<H: Host, D: CommandLineDisplay> Session<H, D> {
    pub fn new(backend: Arc<dyn Backend>, host: H, display: D, config: Config) -> Self {
        Self {
            lifecycle: LifecycleManager::new(config.files.clone()),
            sync: SyncEngine::new(config.sync.diff_deadline()),
            interpreter: RedrawInterpreter::new(),
            ui: UiState::new(config.ui.width, config.ui.height),
            pending: FuturesUnordered::new(),
            stopping: false,
            backend,
            host,
            display,
            config,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Attach, then serve events until shutdown or until the channel closes.
    pub async fn run(&mut self, events: mpsc::Receiver<SessionEvent>) -> Result<(), SessionError> {
        self.attach().await?;
        self.serve(events).await;
        Ok(())
    }

    /// Attach as an external UI and install the startup script.
    pub async fn attach(&mut self) -> Result<(), SessionError> {
        let ui = &self.config.ui;
        let timeout = ui.attach_timeout();
        let attach = self
            .backend
            .ui_attach(ui.width, ui.height, bootstrap::attach_options(ui));
        let attached = tokio::time::timeout(timeout, attach).await;
        match attached {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.fatal(SessionError::BackendUnreachable(e))),
            Err(_) => return Err(self.fatal(SessionError::AttachTimeout(timeout))),
        }

        let channel = self.backend.channel_id();
        info!("Attached to backend on channel {channel}");
        let script = bootstrap::startup_script(channel, &self.config);
        let installed = self.backend.exec(&script).await;
        if let Err(e) = installed {
            return Err(self.fatal(SessionError::BackendUnreachable(e)));
        }

        if let Some(editor) = self.host.current_editor() {
            self.editor_opened(editor);
        }
        Ok(())
    }

    fn fatal(&mut self, err: SessionError) -> SessionError {
        error!("{err}");
        self.host.report_fatal(&err.to_string());
        err
    }

    /// Serve events and finished calls until shutdown.
    pub async fn serve(&mut self, mut events: mpsc::Receiver<SessionEvent>) {
        while !self.stopping {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                Some(continuation) = self.pending.next(), if !self.pending.is_empty() => {
                    self.resume(continuation);
                }
            }
        }
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        info!("Shutting down backend session");
        let editors: Vec<EditorHandle> = self
            .lifecycle
            .bindings()
            .iter()
            .map(|(_, binding)| binding.editor)
            .collect();
        for editor in editors {
            self.host.set_cursor_width(editor, 1);
        }
        if let Err(e) = self.backend.command("q!").await {
            debug!("Backend went away during shutdown: {e}");
        }
    }

    /// Resume the next finished backend call. Returns `false` when nothing is
    /// in flight.
    pub async fn step(&mut self) -> bool {
        match self.pending.next().await {
            Some(continuation) => {
                self.resume(continuation);
                true
            }
            None => false,
        }
    }

    /// Resume finished calls until nothing is in flight.
    pub async fn settle(&mut self) {
        while self.step().await {}
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Notification(notification) => self.handle_notification(notification),
            SessionEvent::EditorOpened(editor) => self.editor_opened(editor),
            SessionEvent::EditorClosing(editor) => {
                let effects = self.lifecycle.editor_closing(editor);
                self.execute(effects);
            }
            SessionEvent::TextChanged(editor) => self.request_push(editor, false, AfterPush::Nothing),
            SessionEvent::CursorMoved(editor) => self.cursor_moved(editor),
            SessionEvent::SelectionChanged(editor) => self.selection_changed(editor),
            SessionEvent::ViewportResized { columns, rows } => self.resize(columns, rows),
            SessionEvent::Input(keys) => self.input(keys),
            SessionEvent::Shutdown => self.stopping = true,
        }
    }

    fn spawn(&mut self, future: impl Future<Output = Continuation> + Send + 'static) {
        self.pending.push(future.boxed());
    }

    fn command(&mut self, command: String) {
        debug!("Sending `{}`", command.escape_debug());
        let backend = self.backend.clone();
        self.spawn(async move {
            let result = backend.command(&command).await;
            Continuation::Fired {
                what: command,
                result,
            }
        });
    }

    fn set_option(&mut self, buffer: BufferId, name: &'static str, value: Value) {
        let backend = self.backend.clone();
        self.spawn(async move {
            let result = backend.buf_set_option(buffer, name, value).await;
            Continuation::Fired {
                what: format!("setting {name} on buffer {buffer}"),
                result,
            }
        });
    }

    fn input(&mut self, keys: String) {
        let backend = self.backend.clone();
        self.spawn(async move {
            let result = backend.input(&keys).await.map(|_| ());
            Continuation::Fired {
                what: "input".into(),
                result,
            }
        });
    }

    fn resize(&mut self, columns: u32, rows: u32) {
        if columns == 0 || rows == 0 || (columns, rows) == (self.ui.grid_width, self.ui.grid_height) {
            return;
        }
        let backend = self.backend.clone();
        self.spawn(async move {
            let result = backend.ui_try_resize_grid(1, columns, rows).await;
            Continuation::Fired {
                what: format!("resizing grid to {columns}x{rows}"),
                result,
            }
        });
    }

    fn handle_notification(&mut self, notification: Notification) {
        match notification.method.as_str() {
            "redraw" => self.redraw(&notification.args),
            "Gui" => self.gui(&notification.args),
            other => debug!("Ignoring notification {other}"),
        }
    }

    fn gui(&mut self, args: &[Value]) {
        let Some((method, rest)) = args.split_first() else {
            return;
        };
        match method.as_str() {
            Some("triggerCommand") => {
                for command_id in rest.iter().filter_map(Value::as_str) {
                    self.host.trigger_command(command_id);
                }
            }
            Some("fileAutoCommand") => match FileEvent::decode(rest) {
                Ok(event) => self.file_event(event),
                Err(e) => warn!("Malformed fileAutoCommand: {e}"),
            },
            other => debug!("Ignoring Gui method {other:?}"),
        }
    }

    fn file_event(&mut self, event: FileEvent) {
        debug!("{:?} for buffer {} ({})", event.kind, event.buffer, event.path);
        let current_editor = self.host.current_editor();
        let current_path = current_editor.and_then(|editor| self.host.file_name(editor));
        let host = HostContext {
            current_editor,
            current_path: current_path.as_deref(),
            file_exists: !event.path.is_empty() && self.host.file_exists(&event.path),
        };
        let effects = self.lifecycle.file_event(&event, host);
        self.execute(effects);
    }

    fn redraw(&mut self, args: &[Value]) {
        let events = redraw::decode_batch(args);
        let outcome = self.interpreter.process(&events, &mut self.ui, &mut self.display);
        let current = self.host.current_editor();

        if let (Some(editor), Some(palette)) = (current, outcome.palette) {
            self.host.set_palette(editor, palette);
        }
        if outcome.bell {
            self.host.beep();
        }
        if let Some(editor) = current {
            self.update_cursor(editor);
        }
        if outcome.pull {
            self.pull();
        }
    }

    fn update_cursor(&mut self, editor: EditorHandle) {
        if let Some(shape) = self.ui.cursor_shape() {
            let width = shape.width(self.host.average_char_width(editor));
            self.host.set_cursor_width(editor, width);
        }
    }

    fn editor_opened(&mut self, editor: EditorHandle) {
        let path = self.host.file_name(editor);
        let project = self.host.project_directory(editor);
        let effects = self
            .lifecycle
            .editor_opened(editor, path.as_deref(), project.as_deref());
        self.update_cursor(editor);
        self.execute(effects);
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Command(command) => self.command(command),
                Effect::OpenInBackend { editor, path } => {
                    let backend = self.backend.clone();
                    self.spawn(async move {
                        let result = open_in_backend(backend, path).await;
                        Continuation::BufferOpened { editor, result }
                    });
                }
                Effect::InitializeBuffer(buffer) => self.initialize_buffer(buffer),
                Effect::Pull => self.pull(),
                Effect::OpenDocument { path, kind } => {
                    if self.host.open_document(&path, kind).is_none() {
                        warn!("Host could not open {path}");
                        self.lifecycle.clear_pending();
                    }
                }
                Effect::ActivateEditor(editor) => self.host.activate_editor(editor),
                Effect::CloseDocument(editor) => self.host.close_document(editor),
                Effect::Save {
                    editor,
                    buffer,
                    path,
                } => {
                    let previous = self.host.file_name(editor);
                    let saved = self.host.save(editor, &path);
                    if !saved {
                        warn!("Saving {path} failed");
                    }
                    let effects =
                        self.lifecycle
                            .save_finished(editor, buffer, &path, previous.as_deref(), saved);
                    self.execute(effects);
                }
                Effect::SetBufferOption {
                    buffer,
                    name,
                    value,
                } => self.set_option(buffer, name, value),
                Effect::RenameBuffer { buffer, path } => {
                    let backend = self.backend.clone();
                    self.spawn(async move {
                        let what = format!("renaming buffer {buffer} to {path}");
                        let result = rename_buffer(backend, buffer, path).await;
                        Continuation::Fired { what, result }
                    });
                }
                Effect::MarkModified(editor) => self.host.set_modified(editor, true),
            }
        }
    }

    fn initialize_buffer(&mut self, buffer: BufferId) {
        match self.lifecycle.initialization(buffer) {
            Initialization::PushFull => {
                let backend = self.backend.clone();
                self.spawn(async move {
                    let result = backend
                        .buf_set_option(buffer, "undolevels", Value::Integer(-1))
                        .await;
                    Continuation::UndoDisabled { buffer, result }
                });
            }
            Initialization::PullOnly => {
                self.set_option(buffer, "modified", Value::Boolean(false));
                self.pull();
            }
        }
    }

    fn finish_initialization(&mut self, editor: EditorHandle, buffer: BufferId) {
        let file_exists = self
            .host
            .file_name(editor)
            .is_some_and(|path| self.host.file_exists(&path));
        let effects = self.lifecycle.initialized(buffer, file_exists);
        self.execute(effects);
    }

    fn request_push(&mut self, editor: EditorHandle, full: bool, after: AfterPush) {
        let Some(binding) = self.lifecycle.bindings_mut().for_editor_mut(editor) else {
            return;
        };
        if !sync::push_allowed(binding, full) {
            return;
        }
        if binding.push_in_flight {
            binding.push_queued = true;
            return;
        }

        let buffer = binding.buffer;
        let local = self.host.text(editor);
        let edits = match self.sync.plan_push(binding, &local, full) {
            PushPlan::Edits(edits) => edits,
            PushPlan::Unchanged => {
                if after == AfterPush::Initialize {
                    self.finish_initialization(editor, buffer);
                }
                return;
            }
        };
        binding.push_in_flight = true;

        let text = Rope::from_str(&local);
        let caret = self.host.selection(editor).primary().position;
        let cursor = self.sync.push_cursor_command(&text, caret);
        let backend = self.backend.clone();
        self.spawn(async move {
            let result = push_lines(backend, buffer, edits, cursor).await;
            Continuation::Pushed {
                editor,
                buffer,
                text,
                after,
                result,
            }
        });
    }

    fn pull(&mut self) {
        let Some(editor) = self
            .host
            .current_editor()
            .filter(|editor| self.lifecycle.bindings().for_editor(*editor).is_some())
        else {
            return;
        };
        let generation = self.sync.begin_pull();
        let backend = self.backend.clone();
        self.spawn(async move {
            let result = backend.eval(sync::PULL_EXPR).await;
            Continuation::PullState {
                editor,
                generation,
                result,
            }
        });
    }

    fn cursor_moved(&mut self, editor: EditorHandle) {
        if self.host.current_editor() != Some(editor) {
            return;
        }
        let Some(binding) = self.lifecycle.bindings().for_editor(editor) else {
            return;
        };
        let text = self.host.text(editor);
        let selection = self.host.selection(editor);
        let command = self.sync.cursor_command(binding, &text, &selection);
        if let Some(command) = command {
            self.command(command);
        }
    }

    fn selection_changed(&mut self, editor: EditorHandle) {
        if self.host.current_editor() != Some(editor) {
            return;
        }
        let Some(binding) = self.lifecycle.bindings().for_editor(editor) else {
            return;
        };
        let text = self.host.text(editor);
        let selection = self.host.selection(editor);
        let command = self.sync.selection_command(binding, &text, &selection);
        if let Some(command) = command {
            self.command(command);
        }
    }

    fn resume(&mut self, continuation: Continuation) {
        match continuation {
            Continuation::BufferOpened { editor, result } => {
                let buffer = result.and_then(|value| {
                    value
                        .as_i64()
                        .ok_or_else(|| RpcError::Decode(format!("bufnr returned {value:?}")))
                });
                match buffer {
                    Ok(buffer) => {
                        let effects = self.lifecycle.buffer_assigned(editor, BufferId(buffer));
                        self.execute(effects);
                    }
                    Err(e) => {
                        warn!("Opening editor {editor:?} in the backend failed: {e}");
                        self.lifecycle.assignment_failed(editor);
                    }
                }
            }
            Continuation::UndoDisabled { buffer, result } => {
                if let Err(e) = result {
                    warn!("Disabling undo for buffer {buffer} failed: {e}");
                }
                if let Some(editor) = self.lifecycle.bindings().editor_for(buffer) {
                    self.request_push(editor, true, AfterPush::Initialize);
                }
            }
            Continuation::Pushed {
                editor,
                buffer,
                text,
                after,
                result,
            } => self.pushed(editor, buffer, text, after, result),
            Continuation::PullState {
                editor,
                generation,
                result,
            } => self.pull_state(editor, generation, result),
            Continuation::PullLines {
                editor,
                generation,
                state,
                result,
            } => self.pull_lines(editor, generation, state, result),
            Continuation::Fired { what, result } => {
                if let Err(e) = result {
                    warn!("{what} failed: {e}");
                }
            }
        }
    }

    fn pushed(
        &mut self,
        editor: EditorHandle,
        buffer: BufferId,
        text: Rope,
        after: AfterPush,
        result: Result<(), RpcError>,
    ) {
        let Some(binding) = self
            .lifecycle
            .bindings_mut()
            .for_editor_mut(editor)
            .filter(|binding| binding.buffer == buffer)
        else {
            trace!("Push to buffer {buffer} finished after it was unbound");
            return;
        };
        binding.push_in_flight = false;
        let queued = std::mem::take(&mut binding.push_queued);
        let pushed = match result {
            Ok(()) => {
                binding.last_text = text;
                binding.initialized = true;
                true
            }
            Err(e) => {
                warn!("Push to buffer {buffer} failed: {e}");
                binding.initial_push_failed = after == AfterPush::Initialize;
                false
            }
        };

        if pushed && after == AfterPush::Initialize {
            self.finish_initialization(editor, buffer);
        }
        if queued {
            self.request_push(editor, false, AfterPush::Nothing);
        }
    }

    fn pull_state(
        &mut self,
        editor: EditorHandle,
        generation: SyncGeneration,
        result: Result<Value, RpcError>,
    ) {
        let state = match result.and_then(|value| PullState::decode(&value)) {
            Ok(state) => state,
            Err(e) => {
                warn!("Reading backend state failed: {e}");
                return;
            }
        };

        let binding = self.lifecycle.bindings().for_editor(editor);
        match self.sync.decide(generation, binding, &state) {
            PullDecision::Stale | PullDecision::BufferMismatch => {}
            PullDecision::Unchanged => {
                self.host.set_display_options(editor, state.display);
                self.reconcile(editor, &state);
            }
            PullDecision::Fetch => {
                self.host.set_display_options(editor, state.display);
                let backend = self.backend.clone();
                self.spawn(async move {
                    let result = backend.buf_get_lines(state.buffer, 0, -1, true).await;
                    Continuation::PullLines {
                        editor,
                        generation,
                        state,
                        result,
                    }
                });
            }
        }
    }

    fn pull_lines(
        &mut self,
        editor: EditorHandle,
        generation: SyncGeneration,
        state: PullState,
        result: Result<Vec<String>, RpcError>,
    ) {
        if !self.sync.is_current(generation) {
            trace!("Dropping stale lines of buffer {}", state.buffer);
            return;
        }
        let lines = match result {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Fetching buffer {} failed: {e}", state.buffer);
                return;
            }
        };

        let local = self.host.text(editor);
        let Some(binding) = self
            .lifecycle
            .bindings_mut()
            .for_editor_mut(editor)
            .filter(|binding| binding.buffer == state.buffer)
        else {
            return;
        };
        if binding.kind.accepts_local_edits() {
            if !binding.initialized {
                if std::mem::take(&mut binding.initial_push_failed) {
                    debug!("Retrying the initial push of buffer {}", state.buffer);
                    self.request_push(editor, true, AfterPush::Initialize);
                }
                return;
            }
            if binding.last_text != local.as_str() {
                debug!("Buffer {} has unpushed local edits, pushing first", state.buffer);
                self.request_push(editor, false, AfterPush::Nothing);
                return;
            }
        }

        let remote = sync::join_lines(&lines);
        let ops = self.sync.diff(&local, &remote);
        binding.last_text = Rope::from_str(&remote);
        binding.last_change_tick = Some(state.change_tick);
        binding.initialized = true;

        if ops.iter().any(|op| !op.is_equal()) {
            let caret = self.host.selection(editor).primary().position;
            self.host.apply_patch(editor, &ops);
            self.host
                .set_selection(editor, Selection::caret(diff::track_cursor(&ops, caret)));
        }
        if self.host.is_modified(editor) != state.modified {
            self.host.set_modified(editor, state.modified);
        }
        self.reconcile(editor, &state);
    }

    fn reconcile(&mut self, editor: EditorHandle, state: &PullState) {
        let local = self.host.text(editor);
        let Some(binding) = self.lifecycle.bindings().for_editor(editor) else {
            return;
        };
        if binding.kind.accepts_local_edits() && binding.last_text != local.as_str() {
            trace!("Dropping backend cursor for editor {editor:?}, local text has not round-tripped");
            self.request_push(editor, false, AfterPush::Nothing);
            return;
        }
        let selection = self.sync.reconcile(&binding.last_text, state);
        if self.host.selection(editor) != selection {
            self.host.set_selection(editor, selection);
        }
    }
}
