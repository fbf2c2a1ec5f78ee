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

//! Vimscript sent to the backend right after attaching.

use crate::config::{Config, UiConfig};
use crate::rpc::Value;
use std::fmt::Write;

/// Buffer events reported back through `fileAutoCommand`.
pub const FILE_EVENTS: [&str; 7] = [
    "BufReadCmd",
    "TermOpen",
    "BufWriteCmd",
    "BufEnter",
    "BufDelete",
    "BufHidden",
    "BufWipeout",
];

// Moves the cursor, breaking the insert-mode undo sequence first so the jump
// does not merge two edits into one undo step.
const SET_CURSOR: &str = "\
function! SetCursor(line, col)
    call cursor(a:line, a:col)
    if mode()[0] ==# 'i' || mode()[0] ==# 'R'
        normal! i\x07u\x03
    endif
    call cursor(a:line, a:col)
endfunction
";

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn file_autocommand(event: &str) -> String {
    // Events that can switch buffers must be nested so BufEnter fires for the
    // buffer they switch to.
    let nested = match event {
        "BufReadCmd" | "TermOpen" | "BufWriteCmd" => "",
        _ => "nested ",
    };
    let suffix = if event == "BufWriteCmd" {
        "|set nomodified"
    } else {
        ""
    };
    format!(
        "autocmd {event} * {nested}call rpcnotify(g:vimlink_channel, 'Gui', 'fileAutoCommand', \
         '{event}', expand('<abuf>'), expand('<afile>:p'), &buftype, &buflisted, &bufhidden, \
         g:vimlink_always_text){suffix}"
    )
}

/// The script to `exec` once the UI is attached on channel `channel`.
pub fn startup_script(channel: i64, config: &Config) -> String {
    let mut script = String::new();
    let always_text = if config.files.always_text {
        "v:true"
    } else {
        "v:false"
    };
    let _ = writeln!(script, "let g:vimlink_channel = {channel}");
    let _ = writeln!(script, "let g:vimlink_always_text = {always_text}");

    for (name, command_id) in &config.commands {
        let _ = writeln!(
            script,
            "command! -bar {name} call rpcnotify(g:vimlink_channel, 'Gui', 'triggerCommand', {})",
            quote(command_id)
        );
    }

    script.push_str("augroup vimlink\nautocmd!\n");
    for event in FILE_EVENTS {
        script.push_str(&file_autocommand(event));
        script.push('\n');
    }
    script.push_str("autocmd FileType help set modifiable|read <afile>|set nomodifiable\n");
    script.push_str("augroup END\n");
    script.push_str(SET_CURSOR);
    script
}

/// Options for `nvim_ui_attach`.
pub fn attach_options(ui: &UiConfig) -> Vec<(String, Value)> {
    [
        ("ext_popupmenu", ui.ext_popupmenu),
        ("ext_tabline", ui.ext_tabline),
        ("ext_cmdline", ui.ext_cmdline),
        ("ext_wildmenu", ui.ext_wildmenu),
        ("ext_messages", ui.ext_messages),
        ("ext_multigrid", ui.ext_multigrid),
        ("ext_hlstate", ui.ext_hlstate),
        ("rgb", ui.rgb),
    ]
    .into_iter()
    .map(|(name, enabled)| (name.to_string(), Value::Boolean(enabled)))
    .collect()
}
