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

//! The seam to the backend's msgpack RPC transport.
//!
//! The transport itself lives outside this crate. It implements [`Backend`]
//! for outbound calls and feeds inbound notifications to the session as
//! [`Notification`]s.

use crate::BufferId;
use async_trait::async_trait;
use thiserror::Error;

/// A dynamically typed msgpack value, as carried by RPC arguments and results.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Boolean(b) => Some(*b as i64),
            Value::Float(f) => Some(*f as i64),
            // Vimscript `expand()` hands numbers over as strings
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Vimscript has no booleans on the wire; options come back as 0/1.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::String(s) => s.trim().parse::<i64>().ok().map(|i| i != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Binary(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::Array(values.into_iter().map(Into::into).collect())
    }
}

/// An inbound notification: method name plus positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub args: Vec<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    #[error("backend connection closed")]
    Disconnected,
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("backend error: {0}")]
    Remote(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Outbound calls, shaped after the Neovim API.
///
/// Every call completes independently of the others. Implementations must not
/// block; the session awaits the returned futures on its own loop. Requests
/// must reach the backend in the order their futures are first polled.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The RPC channel id the backend assigned to this client. Used by the
    /// startup script to address `rpcnotify`.
    fn channel_id(&self) -> i64;

    async fn ui_attach(
        &self,
        width: u32,
        height: u32,
        options: Vec<(String, Value)>,
    ) -> Result<(), RpcError>;

    async fn ui_try_resize_grid(&self, grid: i64, width: u32, height: u32)
        -> Result<(), RpcError>;

    async fn input(&self, keys: &str) -> Result<i64, RpcError>;

    async fn command(&self, command: &str) -> Result<(), RpcError>;

    /// Run a multi-line Vimscript chunk.
    async fn exec(&self, source: &str) -> Result<(), RpcError>;

    async fn eval(&self, expr: &str) -> Result<Value, RpcError>;

    async fn buf_get_lines(
        &self,
        buffer: BufferId,
        start: i64,
        end: i64,
        strict: bool,
    ) -> Result<Vec<String>, RpcError>;

    async fn buf_set_lines(
        &self,
        buffer: BufferId,
        start: i64,
        end: i64,
        strict: bool,
        replacement: Vec<String>,
    ) -> Result<(), RpcError>;

    async fn buf_set_option(&self, buffer: BufferId, name: &str, value: Value)
        -> Result<(), RpcError>;

    async fn buf_set_name(&self, buffer: BufferId, name: &str) -> Result<(), RpcError>;
}

/// Quote a path for use as an Ex command argument.
pub fn escape_path(path: &str) -> String {
    if !path.contains(['\\', '\'', '"', ' ']) {
        return path.to_string();
    }
    let mut escaped = String::with_capacity(path.len() + 2);
    escaped.push('"');
    for ch in path.chars() {
        if matches!(ch, '\\' | '\'' | '"' | ' ') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    escaped
}
