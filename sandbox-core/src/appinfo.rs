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

//! Builds the immutable per-instance info record mounted unfakeably at
//! `/.flatpak-info` (C8).

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    fs::OpenOptions,
    os::fd::{IntoRawFd, RawFd},
    path::PathBuf,
};

use crate::{
    constants::{LAUNCHER_VERSION, UID},
    context::Context,
    impl_error,
};

#[derive(Debug)]
pub struct AppInstance<'a> {
    pub name: &'a str,
    pub app_ref: &'a str,
    pub app_path: Option<&'a str>,
    pub app_commit: Option<&'a str>,
    pub runtime_ref: &'a str,
    pub runtime_path: &'a str,
    pub runtime_commit: &'a str,
    pub extensions_summary: &'a str,
    pub branch: &'a str,
    pub session_bus_proxy: bool,
    pub system_bus_proxy: bool,
    pub context: &'a Context,
}

#[derive(Debug)]
pub enum AppInfoError {
    Io(std::io::Error),
}

impl_error!(AppInfoError);

impl Display for AppInfoError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Io(err) => write!(fmter, "failed to materialize app info blob: {err}"),
        }
    }
}

impl From<std::io::Error> for AppInfoError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl<'a> AppInstance<'a> {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("[Application]\n");
        out.push_str(&format!("name={}\n", self.name));
        out.push_str(&format!("ref={}\n", self.app_ref));

        if let Some(path) = self.app_path {
            out.push_str(&format!("path={path}\n"));
        }

        if let Some(commit) = self.app_commit {
            out.push_str(&format!("commit={commit}\n"));
        }

        out.push_str(&format!("branch={}\n", self.branch));
        out.push('\n');

        out.push_str("[Runtime]\n");
        out.push_str(&format!("ref={}\n", self.runtime_ref));
        out.push_str(&format!("path={}\n", self.runtime_path));
        out.push_str(&format!("commit={}\n", self.runtime_commit));
        out.push('\n');

        out.push_str("[Instance]\n");
        out.push_str(&format!("extensions={}\n", self.extensions_summary));
        out.push_str(&format!("launcher-version={}\n", *LAUNCHER_VERSION));
        out.push_str(&format!("session-bus-proxy={}\n", self.session_bus_proxy));
        out.push_str(&format!("system-bus-proxy={}\n", self.system_bus_proxy));
        out.push('\n');

        out.push_str(&self.context.serialize(true));
        out
    }
}

pub struct AppInfoHandles {
    pub file_fd: RawFd,
    pub bind_data_fd: RawFd,
}

/// Writes the rendered instance record to a throwaway temp file, opens two
/// independent read-only descriptors to it, then unlinks it: the file stays
/// alive only through the two fds, so neither the host path nor a later
/// namespace teardown can invalidate `/proc/self/fd/<fd>` lookups against it.
pub fn materialize(instance: &AppInstance) -> Result<AppInfoHandles, AppInfoError> {
    let rendered = instance.render();
    let path = PathBuf::from(format!("/run/user/{}/.sandbox-launcher-info-{}", *UID, std::process::id()));

    fs::write(&path, rendered.as_bytes())?;

    let file_fd = OpenOptions::new().read(true).open(&path)?.into_raw_fd();
    let bind_data_fd = OpenOptions::new().read(true).open(&path)?.into_raw_fd();

    let _ = fs::remove_file(&path);

    Ok(AppInfoHandles { file_fd, bind_data_fd })
}

pub fn proc_fd_path(fd: RawFd) -> String {
    format!("/proc/self/fd/{fd}")
}

pub fn symlink_target() -> &'static str {
    "../../../.flatpak-info"
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Context;

    #[test]
    fn render_includes_expected_groups() {
        let ctx = Context::new();
        let instance = AppInstance {
            name: "org.example.App",
            app_ref: "app/org.example.App/x86_64/stable",
            app_path: Some("/deploy/app"),
            app_commit: Some("abc123"),
            runtime_ref: "runtime/org.example.Runtime/x86_64/stable",
            runtime_path: "/deploy/runtime",
            runtime_commit: "def456",
            extensions_summary: "local",
            branch: "stable",
            session_bus_proxy: true,
            system_bus_proxy: false,
            context: &ctx,
        };

        let rendered = instance.render();
        assert!(rendered.contains("[Application]"));
        assert!(rendered.contains("[Runtime]"));
        assert!(rendered.contains("[Instance]"));
        assert!(rendered.contains("session-bus-proxy=true"));
    }

    #[test]
    fn proc_fd_path_formats_correctly() {
        assert_eq!(proc_fd_path(7), "/proc/self/fd/7");
    }
}
