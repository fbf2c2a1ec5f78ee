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

//! Associations between host editors and backend buffers.

use crate::{BindingId, BufferId, EditorHandle};
use ropey::Rope;
use slotmap::SlotMap;
use std::collections::HashMap;

/// What kind of backend buffer a binding shows. Decides which way text may
/// flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferKind {
    /// A regular file buffer (`buftype` empty).
    #[default]
    Normal,
    /// A buffer whose writes are intercepted (`buftype=acwrite`), so saving
    /// goes through the host document.
    AutoWrite,
    Terminal,
    Help,
    /// `nofile`, `nowrite`, `quickfix`, `prompt` and anything else.
    ReadOnlyScratch,
}

impl BufferKind {
    /// Classify from the backend's `buftype` option.
    pub fn from_buftype(buftype: &str) -> Self {
        match buftype {
            "" => BufferKind::Normal,
            "acwrite" => BufferKind::AutoWrite,
            "terminal" => BufferKind::Terminal,
            "help" => BufferKind::Help,
            _ => BufferKind::ReadOnlyScratch,
        }
    }

    /// Whether local edits are pushed to the backend. Every other kind is
    /// pull-only.
    pub fn accepts_local_edits(self) -> bool {
        matches!(self, BufferKind::Normal | BufferKind::AutoWrite)
    }
}

pub struct BufferBinding {
    pub editor: EditorHandle,
    pub buffer: BufferId,
    /// The text both sides agreed on at the last completed round trip.
    pub last_text: Rope,
    /// Backend `b:changedtick` at the last applied pull.
    pub last_change_tick: Option<u64>,
    /// Cleared until the first push or pull completes. Ordinary pushes are
    /// suppressed meanwhile so an empty snapshot is never diffed.
    pub initialized: bool,
    pub kind: BufferKind,
    pub(crate) push_in_flight: bool,
    pub(crate) push_queued: bool,
    /// The initial full push failed and must be retried before any pull.
    pub(crate) initial_push_failed: bool,
}

impl BufferBinding {
    pub fn new(editor: EditorHandle, buffer: BufferId, kind: BufferKind) -> Self {
        Self {
            editor,
            buffer,
            last_text: Rope::new(),
            last_change_tick: None,
            initialized: false,
            kind,
            push_in_flight: false,
            push_queued: false,
            initial_push_failed: false,
        }
    }

    /// Forget everything learned from the backend, as if freshly bound.
    pub fn reset(&mut self) {
        self.last_text = Rope::new();
        self.last_change_tick = None;
        self.initialized = false;
        self.initial_push_failed = false;
    }

    pub fn push_in_flight(&self) -> bool {
        self.push_in_flight
    }
}

/// All live bindings, indexed both ways.
///
/// The two indices are only touched by `bind` and `remove`, which keep them
/// consistent with the arena.
#[derive(Default)]
pub struct Bindings {
    arena: SlotMap<BindingId, BufferBinding>,
    by_editor: HashMap<EditorHandle, BindingId>,
    by_buffer: HashMap<BufferId, BindingId>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `editor` to `buffer`, dropping any binding either side already
    /// had.
    pub fn bind(&mut self, editor: EditorHandle, buffer: BufferId, kind: BufferKind) -> BindingId {
        self.remove_editor(editor);
        self.remove_buffer(buffer);
        let id = self.arena.insert(BufferBinding::new(editor, buffer, kind));
        self.by_editor.insert(editor, id);
        self.by_buffer.insert(buffer, id);
        id
    }

    pub fn remove(&mut self, id: BindingId) -> Option<BufferBinding> {
        let binding = self.arena.remove(id)?;
        self.by_editor.remove(&binding.editor);
        self.by_buffer.remove(&binding.buffer);
        Some(binding)
    }

    pub fn remove_editor(&mut self, editor: EditorHandle) -> Option<BufferBinding> {
        let id = self.by_editor.get(&editor).copied()?;
        self.remove(id)
    }

    pub fn remove_buffer(&mut self, buffer: BufferId) -> Option<BufferBinding> {
        let id = self.by_buffer.get(&buffer).copied()?;
        self.remove(id)
    }

    pub fn id_for_editor(&self, editor: EditorHandle) -> Option<BindingId> {
        self.by_editor.get(&editor).copied()
    }

    pub fn id_for_buffer(&self, buffer: BufferId) -> Option<BindingId> {
        self.by_buffer.get(&buffer).copied()
    }

    pub fn get(&self, id: BindingId) -> Option<&BufferBinding> {
        self.arena.get(id)
    }

    pub fn get_mut(&mut self, id: BindingId) -> Option<&mut BufferBinding> {
        self.arena.get_mut(id)
    }

    pub fn for_editor(&self, editor: EditorHandle) -> Option<&BufferBinding> {
        self.get(self.id_for_editor(editor)?)
    }

    pub fn for_editor_mut(&mut self, editor: EditorHandle) -> Option<&mut BufferBinding> {
        let id = self.id_for_editor(editor)?;
        self.get_mut(id)
    }

    pub fn for_buffer(&self, buffer: BufferId) -> Option<&BufferBinding> {
        self.get(self.id_for_buffer(buffer)?)
    }

    pub fn for_buffer_mut(&mut self, buffer: BufferId) -> Option<&mut BufferBinding> {
        let id = self.id_for_buffer(buffer)?;
        self.get_mut(id)
    }

    pub fn buffer_for(&self, editor: EditorHandle) -> Option<BufferId> {
        self.for_editor(editor).map(|binding| binding.buffer)
    }

    pub fn editor_for(&self, buffer: BufferId) -> Option<EditorHandle> {
        self.for_buffer(buffer).map(|binding| binding.editor)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BindingId, &BufferBinding)> {
        self.arena.iter()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        self.by_editor.clear();
        self.by_buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_lookup_both_ways() {
        let mut bindings = Bindings::new();
        let id = bindings.bind(EditorHandle(1), BufferId(3), BufferKind::Normal);
        assert_eq!(bindings.id_for_editor(EditorHandle(1)), Some(id));
        assert_eq!(bindings.id_for_buffer(BufferId(3)), Some(id));
        assert_eq!(bindings.buffer_for(EditorHandle(1)), Some(BufferId(3)));
        assert_eq!(bindings.editor_for(BufferId(3)), Some(EditorHandle(1)));
    }

    #[test]
    fn test_rebinding_keeps_one_to_one() {
        let mut bindings = Bindings::new();
        bindings.bind(EditorHandle(1), BufferId(3), BufferKind::Normal);
        bindings.bind(EditorHandle(2), BufferId(4), BufferKind::Normal);

        // Editor 1 now shows buffer 4: both old bindings must go.
        bindings.bind(EditorHandle(1), BufferId(4), BufferKind::Normal);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings.buffer_for(EditorHandle(1)), Some(BufferId(4)));
        assert!(bindings.for_editor(EditorHandle(2)).is_none());
        assert!(bindings.for_buffer(BufferId(3)).is_none());
    }

    #[test]
    fn test_remove_from_either_side() {
        let mut bindings = Bindings::new();
        bindings.bind(EditorHandle(1), BufferId(3), BufferKind::Normal);
        bindings.bind(EditorHandle(2), BufferId(4), BufferKind::Help);

        let removed = bindings.remove_buffer(BufferId(3)).unwrap();
        assert_eq!(removed.editor, EditorHandle(1));
        assert!(bindings.id_for_editor(EditorHandle(1)).is_none());

        bindings.remove_editor(EditorHandle(2));
        assert!(bindings.id_for_buffer(BufferId(4)).is_none());
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(BufferKind::from_buftype(""), BufferKind::Normal);
        assert_eq!(BufferKind::from_buftype("acwrite"), BufferKind::AutoWrite);
        assert_eq!(BufferKind::from_buftype("terminal"), BufferKind::Terminal);
        assert_eq!(BufferKind::from_buftype("help"), BufferKind::Help);
        assert_eq!(BufferKind::from_buftype("nofile"), BufferKind::ReadOnlyScratch);
        assert!(BufferKind::AutoWrite.accepts_local_edits());
        assert!(!BufferKind::Terminal.accepts_local_edits());
        assert!(!BufferKind::Help.accepts_local_edits());
    }

    #[test]
    fn test_new_binding_is_uninitialized() {
        let mut binding = BufferBinding::new(EditorHandle(1), BufferId(1), BufferKind::Normal);
        assert!(!binding.initialized);
        binding.last_text = Rope::from_str("text");
        binding.last_change_tick = Some(4);
        binding.initialized = true;
        binding.reset();
        assert_eq!(binding.last_text.len_chars(), 0);
        assert_eq!(binding.last_change_tick, None);
        assert!(!binding.initialized);
    }
}
