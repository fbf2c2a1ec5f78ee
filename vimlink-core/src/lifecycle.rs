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

//! Which host editor shows which backend buffer, and how that changes.
//!
//! Opens, focus changes, closes and saves can start on either side. The
//! manager keeps the bindings and answers every trigger with a list of
//! [`Effect`]s; the session carries them out.

use crate::binding::{Bindings, BufferKind};
use crate::config::FilesConfig;
use crate::host::DocumentKind;
use crate::rpc::{escape_path, RpcError, Value};
use crate::{BufferId, EditorHandle};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    Unbound,
    /// `edit <path>` was sent; waiting for the buffer number.
    AwaitingBufferAssignment,
    Bound(BufferId),
    /// Closed while its buffer number was still pending.
    Closing,
}

/// Set when the manager asked the host to open or focus an editor, so the
/// editor-open event that follows is recognised as an echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingOrigin {
    #[default]
    None,
    /// The backend switched to this buffer.
    Buffer(BufferId),
    /// The backend closed the current editor; don't switch the backend to
    /// whatever the host focuses next.
    SuppressSwitch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Command(String),
    /// Send `edit <path>`, then evaluate `bufnr('')` and report the result
    /// through [`LifecycleManager::buffer_assigned`].
    OpenInBackend { editor: EditorHandle, path: String },
    /// Run the initialization sequence for a freshly bound buffer.
    InitializeBuffer(BufferId),
    Pull,
    OpenDocument { path: String, kind: DocumentKind },
    ActivateEditor(EditorHandle),
    CloseDocument(EditorHandle),
    /// Save the host document to `path`, then report through
    /// [`LifecycleManager::save_finished`].
    Save {
        editor: EditorHandle,
        buffer: BufferId,
        path: String,
    },
    SetBufferOption {
        buffer: BufferId,
        name: &'static str,
        value: Value,
    },
    /// `nvim_buf_set_name`, then `edit!`.
    RenameBuffer { buffer: BufferId, path: String },
    MarkModified(EditorHandle),
}

/// How a freshly bound buffer is brought in line with its editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialization {
    /// Disable undo, push the editor's text in full, then
    /// [`LifecycleManager::initialized`].
    PushFull,
    /// Clear `modified` and pull.
    PullOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    BufReadCmd,
    TermOpen,
    BufWriteCmd,
    BufEnter,
    BufDelete,
    BufHidden,
    BufWipeout,
}

impl FileEventKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "BufReadCmd" => FileEventKind::BufReadCmd,
            "TermOpen" => FileEventKind::TermOpen,
            "BufWriteCmd" => FileEventKind::BufWriteCmd,
            "BufEnter" => FileEventKind::BufEnter,
            "BufDelete" => FileEventKind::BufDelete,
            "BufHidden" => FileEventKind::BufHidden,
            "BufWipeout" => FileEventKind::BufWipeout,
            _ => return None,
        })
    }
}

/// Payload of a `fileAutoCommand` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub buffer: BufferId,
    /// Full path, empty for unnamed buffers.
    pub path: String,
    pub buftype: String,
    pub listed: bool,
    pub bufhidden: String,
    /// `g:vimlink_always_text` at the time of the event, if reported.
    pub always_text: Option<bool>,
}

impl FileEvent {
    /// Decode `[event, abuf, afile, buftype, buflisted, bufhidden, always_text?]`.
    pub fn decode(args: &[Value]) -> Result<Self, RpcError> {
        let string = |idx: usize| {
            args.get(idx)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| RpcError::Decode(format!("fileAutoCommand argument {idx} is not a string")))
        };
        let name = string(0)?;
        let kind = FileEventKind::parse(&name)
            .ok_or_else(|| RpcError::Decode(format!("unknown file event {name}")))?;
        let buffer = args
            .get(1)
            .and_then(Value::as_i64)
            .ok_or_else(|| RpcError::Decode("fileAutoCommand without a buffer number".into()))?;

        Ok(Self {
            kind,
            buffer: BufferId(buffer),
            path: string(2)?,
            buftype: string(3)?,
            listed: args.get(4).and_then(Value::as_bool).unwrap_or(false),
            bufhidden: string(5).unwrap_or_default(),
            always_text: args.get(6).and_then(Value::as_bool),
        })
    }
}

/// What the host looks like when a file event is handled.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostContext<'a> {
    pub current_editor: Option<EditorHandle>,
    pub current_path: Option<&'a str>,
    /// Whether the event's path exists on disk.
    pub file_exists: bool,
}

pub struct LifecycleManager {
    bindings: Bindings,
    awaiting: HashSet<EditorHandle>,
    closing: HashSet<EditorHandle>,
    kinds: HashMap<BufferId, BufferKind>,
    pending: PendingOrigin,
    files: FilesConfig,
}

impl LifecycleManager {
    pub fn new(files: FilesConfig) -> Self {
        Self {
            bindings: Bindings::new(),
            awaiting: HashSet::new(),
            closing: HashSet::new(),
            kinds: HashMap::new(),
            pending: PendingOrigin::None,
            files,
        }
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }

    pub fn pending(&self) -> PendingOrigin {
        self.pending
    }

    pub fn state(&self, editor: EditorHandle) -> EditorState {
        if let Some(buffer) = self.bindings.buffer_for(editor) {
            EditorState::Bound(buffer)
        } else if self.awaiting.contains(&editor) {
            EditorState::AwaitingBufferAssignment
        } else if self.closing.contains(&editor) {
            EditorState::Closing
        } else {
            EditorState::Unbound
        }
    }

    fn kind_of(&self, buffer: BufferId) -> BufferKind {
        self.kinds.get(&buffer).copied().unwrap_or_default()
    }

    /// The host opened or focused `editor`.
    pub fn editor_opened(
        &mut self,
        editor: EditorHandle,
        path: Option<&str>,
        project_dir: Option<&Path>,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(dir) = project_dir.and_then(Path::to_str).filter(|dir| !dir.is_empty()) {
            effects.push(Effect::Command(format!("cd {}", escape_path(dir))));
        }

        let pending = std::mem::take(&mut self.pending);
        match self.state(editor) {
            EditorState::Bound(buffer) => {
                if pending == PendingOrigin::None {
                    effects.push(Effect::Command(format!("buffer {buffer}")));
                }
            }
            EditorState::AwaitingBufferAssignment => {}
            EditorState::Unbound | EditorState::Closing => {
                if let PendingOrigin::Buffer(buffer) = pending {
                    self.closing.remove(&editor);
                    self.bindings.bind(editor, buffer, self.kind_of(buffer));
                    effects.push(Effect::InitializeBuffer(buffer));
                } else if let Some(path) = path.filter(|path| !path.is_empty()) {
                    self.closing.remove(&editor);
                    self.awaiting.insert(editor);
                    effects.push(Effect::OpenInBackend {
                        editor,
                        path: path.to_string(),
                    });
                } else {
                    debug!("Editor {editor:?} has no file to open in the backend");
                }
            }
        }
        effects
    }

    /// `bufnr('')` answered for an editor opened with `edit`.
    pub fn buffer_assigned(&mut self, editor: EditorHandle, buffer: BufferId) -> Vec<Effect> {
        if self.awaiting.remove(&editor) {
            self.bindings.bind(editor, buffer, self.kind_of(buffer));
            return vec![Effect::InitializeBuffer(buffer)];
        }

        self.closing.remove(&editor);
        if self.bindings.for_buffer(buffer).is_some() {
            return Vec::new();
        }
        debug!("Editor {editor:?} closed before buffer {buffer} was assigned");
        self.kinds.remove(&buffer);
        vec![Effect::Command(format!("bd! {buffer}"))]
    }

    /// `edit` or `bufnr('')` failed; the editor can be opened again later.
    pub fn assignment_failed(&mut self, editor: EditorHandle) {
        self.awaiting.remove(&editor);
        self.closing.remove(&editor);
    }

    /// The host could not carry out an open or activate request.
    pub fn clear_pending(&mut self) {
        self.pending = PendingOrigin::None;
    }

    /// The host is closing `editor`.
    pub fn editor_closing(&mut self, editor: EditorHandle) -> Vec<Effect> {
        if self.awaiting.remove(&editor) {
            self.closing.insert(editor);
            return Vec::new();
        }
        match self.bindings.remove_editor(editor) {
            Some(binding) => {
                self.kinds.remove(&binding.buffer);
                vec![Effect::Command(format!("bd! {}", binding.buffer))]
            }
            None => Vec::new(),
        }
    }

    pub fn initialization(&self, buffer: BufferId) -> Initialization {
        match self.bindings.for_buffer(buffer) {
            Some(binding) if binding.kind.accepts_local_edits() => Initialization::PushFull,
            _ => Initialization::PullOnly,
        }
    }

    /// The full push of [`Initialization::PushFull`] finished.
    pub fn initialized(&mut self, buffer: BufferId, file_exists: bool) -> Vec<Effect> {
        let mut effects = vec![
            Effect::SetBufferOption {
                buffer,
                name: "undolevels",
                value: Value::Integer(-123456),
            },
            Effect::SetBufferOption {
                buffer,
                name: "modified",
                value: Value::Boolean(false),
            },
        ];
        if let Some(binding) = self.bindings.for_buffer_mut(buffer) {
            if binding.kind == BufferKind::Normal && file_exists {
                binding.kind = BufferKind::AutoWrite;
                self.kinds.insert(buffer, BufferKind::AutoWrite);
                effects.push(Effect::SetBufferOption {
                    buffer,
                    name: "buftype",
                    value: Value::from("acwrite"),
                });
            }
        }
        effects
    }

    pub fn file_event(&mut self, event: &FileEvent, host: HostContext<'_>) -> Vec<Effect> {
        let buffer = event.buffer;
        let kind = BufferKind::from_buftype(&event.buftype);
        match event.kind {
            FileEventKind::BufReadCmd | FileEventKind::TermOpen => {
                self.kinds.insert(buffer, kind);
                if let Some(binding) = self.bindings.for_buffer_mut(buffer) {
                    binding.kind = kind;
                    binding.reset();
                    vec![Effect::InitializeBuffer(buffer)]
                } else if event.kind == FileEventKind::TermOpen {
                    vec![Effect::Command("doautocmd BufEnter".into())]
                } else {
                    Vec::new()
                }
            }
            FileEventKind::BufWriteCmd => match self.bindings.editor_for(buffer) {
                Some(editor) => vec![Effect::Save {
                    editor,
                    buffer,
                    path: event.path.clone(),
                }],
                None => Vec::new(),
            },
            FileEventKind::BufEnter => {
                self.kinds.insert(buffer, kind);
                if event.path.is_empty() || host.current_path == Some(event.path.as_str()) {
                    return Vec::new();
                }
                match self.bindings.editor_for(buffer) {
                    Some(editor) if Some(editor) == host.current_editor => Vec::new(),
                    Some(editor) => {
                        self.pending = PendingOrigin::Buffer(buffer);
                        vec![Effect::ActivateEditor(editor)]
                    }
                    None => {
                        self.pending = PendingOrigin::Buffer(buffer);
                        let kind = self.document_kind(event, host.file_exists);
                        vec![Effect::OpenDocument {
                            path: event.path.clone(),
                            kind,
                        }]
                    }
                }
            }
            FileEventKind::BufDelete if event.listed => self.close_from_backend(buffer, host),
            FileEventKind::BufHidden
                if matches!(event.bufhidden.as_str(), "wipe" | "delete" | "unload")
                    || event.buftype == "help" =>
            {
                self.close_from_backend(buffer, host)
            }
            FileEventKind::BufWipeout if !event.listed => self.close_from_backend(buffer, host),
            FileEventKind::BufDelete | FileEventKind::BufHidden | FileEventKind::BufWipeout => {
                Vec::new()
            }
        }
    }

    fn document_kind(&self, event: &FileEvent, file_exists: bool) -> DocumentKind {
        match event.buftype.as_str() {
            "" if file_exists => {
                let always_text = event.always_text.unwrap_or(self.files.always_text);
                if !always_text || self.files.is_code_file(&event.path) {
                    DocumentKind::Code
                } else {
                    DocumentKind::PlainText
                }
            }
            "terminal" => DocumentKind::Terminal,
            "help" => DocumentKind::Help,
            _ => DocumentKind::Scratch,
        }
    }

    fn close_from_backend(&mut self, buffer: BufferId, host: HostContext<'_>) -> Vec<Effect> {
        self.kinds.remove(&buffer);
        let Some(binding) = self.bindings.remove_buffer(buffer) else {
            return Vec::new();
        };
        if host.current_editor == Some(binding.editor) {
            self.pending = PendingOrigin::SuppressSwitch;
        }
        vec![Effect::CloseDocument(binding.editor)]
    }

    /// The host finished an [`Effect::Save`]. `previous_path` is the
    /// document's path before saving.
    pub fn save_finished(
        &mut self,
        editor: EditorHandle,
        buffer: BufferId,
        path: &str,
        previous_path: Option<&str>,
        saved: bool,
    ) -> Vec<Effect> {
        if !saved {
            return vec![
                Effect::SetBufferOption {
                    buffer,
                    name: "modified",
                    value: Value::Boolean(true),
                },
                Effect::MarkModified(editor),
            ];
        }
        if previous_path.is_some_and(|previous| previous != path) {
            self.bindings.remove_buffer(buffer);
            return vec![Effect::RenameBuffer {
                buffer,
                path: path.to_string(),
            }];
        }
        vec![Effect::SetBufferOption {
            buffer,
            name: "modified",
            value: Value::Boolean(false),
        }]
    }
}
