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

//! Session configuration, read from TOML.
//!
//! ```toml
//! [ui]
//! width = 120
//! attach_timeout_ms = 5000
//!
//! [files]
//! always_text = false
//!
//! [commands]
//! Build = "ProjectExplorer.Build"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub ui: UiConfig,
    pub sync: SyncConfig,
    pub files: FilesConfig,
    /// Backend user command name to host command id.
    pub commands: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UiConfig {
    /// Initial grid size, until the first viewport resize.
    pub width: u32,
    pub height: u32,
    pub attach_timeout_ms: u64,
    pub ext_popupmenu: bool,
    pub ext_tabline: bool,
    pub ext_cmdline: bool,
    pub ext_wildmenu: bool,
    pub ext_messages: bool,
    pub ext_multigrid: bool,
    pub ext_hlstate: bool,
    pub rgb: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
            attach_timeout_ms: 10_000,
            ext_popupmenu: true,
            ext_tabline: false,
            ext_cmdline: true,
            ext_wildmenu: true,
            ext_messages: true,
            ext_multigrid: true,
            ext_hlstate: true,
            rgb: true,
        }
    }
}

impl UiConfig {
    pub fn attach_timeout(&self) -> Duration {
        Duration::from_millis(self.attach_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Upper bound on a single character diff before it falls back to a
    /// coarser result.
    pub diff_deadline_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            diff_deadline_ms: 200,
        }
    }
}

impl SyncConfig {
    pub fn diff_deadline(&self) -> Duration {
        Duration::from_millis(self.diff_deadline_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesConfig {
    /// Open files without a code suffix in the plain text editor.
    pub always_text: bool,
    pub code_suffixes: Vec<String>,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            always_text: true,
            code_suffixes: ["js", "qml", "cpp", "c", "cc", "hpp", "h", "pro"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl FilesConfig {
    /// Case-insensitive suffix match against `code_suffixes`.
    pub fn is_code_file(&self, path: &str) -> bool {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.code_suffixes
                    .iter()
                    .any(|suffix| suffix.eq_ignore_ascii_case(ext))
            })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ui: UiConfig::default(),
            sync: SyncConfig::default(),
            files: FilesConfig::default(),
            commands: default_commands(),
        }
    }
}

fn default_commands() -> BTreeMap<String, String> {
    [
        ("Build", "ProjectExplorer.Build"),
        ("BuildAll", "ProjectExplorer.BuildSession"),
        ("Rebuild", "ProjectExplorer.Rebuild"),
        ("RebuildAll", "ProjectExplorer.RebuildSession"),
        ("Clean", "ProjectExplorer.Clean"),
        ("CleanAll", "ProjectExplorer.CleanSession"),
        ("Deploy", "ProjectExplorer.Deploy"),
        ("Run", "ProjectExplorer.Run"),
        ("Debug", "ProjectExplorer.Debug"),
        ("DebugContinue", "ProjectExplorer.Continue"),
    ]
    .into_iter()
    .map(|(name, id)| (name.to_string(), id.to_string()))
    .collect()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }
}
