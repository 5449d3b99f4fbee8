/*
 * pacwrap-core
 *
 * Copyright (C) 2023-2024 Xavier Moffett <sapphirus@azorium.net>
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This library is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, version 3.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::env::var;

use lazy_static::lazy_static;
use nix::unistd::{getegid, geteuid};

use crate::{error, utils::{ansi::*, unix_time_as_seconds}, Error, ErrorKind};

pub const BWRAP_EXECUTABLE: &str = "bwrap";
pub const DBUS_PROXY_EXECUTABLE: &str = "xdg-dbus-proxy";
pub const LDCONFIG_EXECUTABLE: &str = "ldconfig";
pub const DEFAULT_PATH: &str = "/app/bin:/usr/bin";
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Top-level directory names excluded from a `--filesystem=host` expansion; these
/// are owned by the sandbox's own `/usr`, `/app` merge rather than the host.
pub const HOST_BLACKLIST: &[&str] =
    &[".", "..", "lib", "lib32", "lib64", "bin", "sbin", "usr", "boot", "root", "tmp", "etc", "app", "run", "proc", "sys", "dev", "var"];

/// Host prefixes that `expose()` may never bind over, regardless of requested mode.
pub const PROTECTED_PREFIXES: &[&str] = &["/lib", "/lib32", "/lib64", "/bin", "/sbin", "/usr", "/etc", "/app", "/dev"];

/// Recursion cap when walking a chain of symlinked path prefixes, matching `ELOOP`.
pub const SYMLINK_RECURSION_LIMIT: usize = 40;

/// Environment variables forwarded verbatim from the host into every sandbox.
pub const PRESERVED_ENV_VARS: &[&str] = &[
    "PWD", "HOME", "USER", "USERNAME", "LOGNAME", "TERM", "LANG", "LC_ALL", "LC_MESSAGES", "LC_ADDRESS", "LC_COLLATE", "LC_CTYPE",
    "LC_IDENTIFICATION", "LC_MEASUREMENT", "LC_MONETARY", "LC_NAME", "LC_NUMERIC", "LC_PAPER", "LC_TELEPHONE", "LC_TIME",
];

/// Environment variables stripped by default since they could redirect the
/// sandboxed process's library or interpreter search path onto host state.
pub const STRIPPED_ENV_VARS: &[&str] = &["LD_LIBRARY_PATH", "PYTHONPATH", "PERLLIB", "PERL5LIB", "XCURSOR_PATH", "TMPDIR"];

#[macro_export]
macro_rules! format_str {
    ( $( $x:expr ),+ ) => {
        format!($( $x, )+).leak()
    };
}

#[macro_export]
macro_rules! to_static_str {
    ( $x:expr ) => {
        $x.to_string().leak()
    };
}

lazy_static! {
    pub static ref VERBOSE: bool = var("SANDBOX_VERBOSE").is_ok_and(|v| v == "1");
    pub static ref UID: u32 = geteuid().as_raw();
    pub static ref GID: u32 = getegid().as_raw();
    pub static ref HOME: &'static str = env("HOME");
    pub static ref USER: &'static str = env_default("USER", "user");
    pub static ref SHELL_NAME: &'static str = env_default("SHELL", DEFAULT_SHELL);
    pub static ref TERM: &'static str = env_opt("TERM");
    pub static ref VERSION_MAJOR: u32 = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap();
    pub static ref VERSION_MINOR: u32 = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap();
    pub static ref VERSION_PATCH: u32 = env!("CARGO_PKG_VERSION_PATCH").parse().unwrap();
    pub static ref LAUNCHER_VERSION: String = format!("{}.{}.{}", *VERSION_MAJOR, *VERSION_MINOR, *VERSION_PATCH);
    pub static ref UNIX_TIMESTAMP: u64 = unix_time_as_seconds();
    pub static ref COLORTERM: &'static str = env_opt("COLORTERM");
    pub static ref LANG: &'static str = env_default("LANG", "en_US.UTF-8");
    pub static ref WAYLAND_DISPLAY: &'static str = env_opt("WAYLAND_DISPLAY");
    pub static ref X11_DISPLAY: &'static str = env_opt("DISPLAY");
    pub static ref XAUTHORITY: &'static str = env_opt("XAUTHORITY");
    pub static ref XDG_RUNTIME_DIR: String = env_default_var("XDG_RUNTIME_DIR", format!("/run/user/{}", *UID));
    pub static ref XDG_CACHE_HOME: String = env_default_var("XDG_CACHE_HOME", format!("{}/.cache", *HOME));
    pub static ref XDG_CONFIG_HOME: String = env_default_var("XDG_CONFIG_HOME", format!("{}/.config", *HOME));
    pub static ref XDG_DATA_HOME: String = env_default_var("XDG_DATA_HOME", format!("{}/.local/share", *HOME));
    /// The user-scope install root (parent of every per-app instance directory);
    /// hidden behind a Tmpfs by the exposure planner (§4.2 step 5) so a sandboxed
    /// app can't enumerate sibling instances' data through its own data bind.
    pub static ref USER_INSTALL_ROOT: String = format!("{}/sandbox-launcher", *XDG_DATA_HOME);
    pub static ref WAYLAND_SOCKET: String = format!("{}/{}", *XDG_RUNTIME_DIR, *WAYLAND_DISPLAY);
    pub static ref DBUS_PROXY_DIR: String = format!("{}/.dbus-proxy", *XDG_RUNTIME_DIR);
    pub static ref LD_CACHE_DIR: String = format!("{}/sandbox-launcher/ld.so", *XDG_CACHE_HOME);
    pub static ref LOG_LOCATION: String = format!("{}/sandbox-launcher.log", *XDG_CACHE_HOME);
    pub static ref IS_COLOR_TERMINAL: bool = is_color_terminal();
    pub static ref IS_TRUECOLOR_TERMINLAL: bool = is_truecolor_terminal();
    pub static ref BOLD: &'static str = bold();
    pub static ref RESET: &'static str = reset();
    pub static ref DIM: &'static str = dim();
    pub static ref YELLOW: &'static str = yellow();
    pub static ref CHECKMARK: &'static str = checkmark();
    pub static ref BOLD_WHITE: &'static str = bold_white();
    pub static ref BOLD_YELLOW: &'static str = bold_yellow();
    pub static ref BOLD_RED: &'static str = bold_red();
    pub static ref BOLD_GREEN: &'static str = bold_green();
    pub static ref BAR_GREEN: &'static str = bar_green();
    pub static ref BAR_CYAN: &'static str = bar_cyan();
    pub static ref BAR_RED: &'static str = bar_red();
    pub static ref ARROW_CYAN: &'static str = arrow_cyan();
    pub static ref ARROW_RED: &'static str = arrow_red();
    pub static ref ARROW_GREEN: &'static str = arrow_green();
    pub static ref UNDERLINE: &'static str = underline();
}

fn env(env: &'static str) -> &'static str {
    var(env).map_or_else(|_| error!(ErrorKind::EnvVarUnset(env)).fatal(), |var| var.leak())
}

fn env_opt(env: &str) -> &'static str {
    var(env).map_or_else(|_| "", |var| var.leak())
}

fn env_default(env: &str, default: &'static str) -> &'static str {
    var(env).map_or_else(|_| default, |var| var.leak())
}

fn env_default_var(env: &str, default: String) -> String {
    var(env).unwrap_or(default)
}
