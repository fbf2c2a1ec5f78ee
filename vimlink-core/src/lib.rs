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

//! Keeps a Neovim backend and a rich-text editor widget looking at the same
//! document, cursor and selection.
//!
//! The host editor and the RPC transport are collaborators reached through the
//! [`host::Host`], [`cmdline::CommandLineDisplay`] and [`rpc::Backend`] traits.
//! Everything else runs on a single [`session::Session`] loop.

use slotmap::new_key_type;

pub mod binding;
pub mod bootstrap;
pub mod cmdline;
pub mod config;
pub mod coords;
pub mod diff;
pub mod host;
pub mod lifecycle;
pub mod redraw;
pub mod rpc;
pub mod session;
pub mod sync;

#[cfg(test)]
mod test_support;

new_key_type! {
    pub struct BindingId;
}

/// Opaque identifier of a front-end document view. Owned by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EditorHandle(pub u64);

/// Buffer number assigned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub i64);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub use binding::{BufferBinding, BufferKind, Bindings};
pub use config::Config;
pub use diff::DiffOp;
pub use host::{Host, Selection, TextRange};
pub use redraw::{RedrawEvent, RedrawInterpreter, UiState};
pub use session::{Session, SessionError, SessionEvent};
pub use sync::SyncEngine;
