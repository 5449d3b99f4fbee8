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

//! Filtering D-Bus proxy orchestration (C6): composes the proxy's filter
//! argument list, and synchronizes its readiness with the sandboxed app via
//! a one-byte pipe rendezvous.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io::Read,
    os::fd::{IntoRawFd, RawFd},
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::mpsc,
    thread,
    time::Duration,
};

use os_pipe::{pipe, PipeReader};

use crate::{
    constants::{DBUS_PROXY_DIR, DBUS_PROXY_EXECUTABLE, UID},
    context::fsmode::BusPolicy,
    impl_error,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum ProxyError {
    SpawnFailed(std::io::Error),
    Timeout,
    Eof,
}

impl_error!(ProxyError);

impl Display for ProxyError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::SpawnFailed(err) => write!(fmter, "failed to spawn xdg-dbus-proxy: {err}"),
            Self::Timeout => write!(fmter, "proxy did not signal readiness within {:?}", DEFAULT_TIMEOUT),
            Self::Eof => write!(fmter, "proxy closed the sync pipe before signaling readiness"),
        }
    }
}

pub enum BusKind {
    Session,
    System,
    Accessibility,
}

pub struct BusSocket {
    pub host_socket_path: String,
    pub env_var: &'static str,
    pub sandbox_path: String,
}

impl BusKind {
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Session => "DBUS_SESSION_BUS_ADDRESS",
            Self::System => "DBUS_SYSTEM_BUS_ADDRESS",
            Self::Accessibility => "AT_SPI_BUS_ADDRESS",
        }
    }

    pub fn sandbox_path(&self) -> String {
        match self {
            Self::Session => format!("/run/user/{}/bus", *UID),
            Self::System => "/run/dbus/system_bus_socket".to_string(),
            Self::Accessibility => format!("/run/user/{}/at-spi-bus", *UID),
        }
    }
}

/// Builds the `xdg-dbus-proxy` argument list for a filtered session-bus
/// proxy: ownership of the app id (and its `.*` subtree), then one
/// `--see`/`--talk`/`--own` clause per policy entry.
pub fn session_filter_args(upstream_address: &str, proxy_socket: &str, app_id: &str, policy: &[(String, BusPolicy)]) -> Vec<String> {
    let mut args = vec![upstream_address.to_string(), proxy_socket.to_string(), "--filter".to_string()];
    args.push(format!("--own={app_id}"));
    args.push(format!("--own={app_id}.*"));
    args.extend(policy_args(policy));
    args
}

pub fn system_filter_args(upstream_address: &str, proxy_socket: &str, policy: &[(String, BusPolicy)]) -> Vec<String> {
    let mut args = vec![upstream_address.to_string(), proxy_socket.to_string(), "--filter".to_string()];
    args.extend(policy_args(policy));
    args
}

/// Accessibility bus proxies only ever need registration calls; the filter
/// is fixed regardless of the app's own policy map.
pub fn accessibility_filter_args(upstream_address: &str, proxy_socket: &str) -> Vec<String> {
    vec![
        upstream_address.to_string(),
        proxy_socket.to_string(),
        "--filter".to_string(),
        "--call=org.a11y.atspi.Socket.Embed@/org/a11y/atspi/accessible/root=*".to_string(),
        "--call=org.a11y.atspi.Socket.Unembed@/org/a11y/atspi/accessible/root=*".to_string(),
        "--broadcast=org.a11y.atspi.*=*".to_string(),
    ]
}

fn policy_args(policy: &[(String, BusPolicy)]) -> Vec<String> {
    policy
        .iter()
        .filter(|(_, p)| *p != BusPolicy::None)
        .map(|(name, p)| format!("--{}={name}", p.name()))
        .collect()
}

pub fn unique_proxy_socket_path(label: &str) -> String {
    format!("{}/{label}-{}", *DBUS_PROXY_DIR, std::process::id())
}

pub struct ProxyHandle {
    pub child: Child,
    pub sync_read_fd: RawFd,
}

/// Spawns `xdg-dbus-proxy` (wrapped by `executor` with `wrapper_args`) and
/// blocks until it signals readiness by writing one byte to the sync pipe,
/// or until `timeout` elapses. The returned read-end fd is handed to the
/// sandboxed app as `--sync-fd`; its closure (app exit) is what the proxy
/// watches for via EOF to know it should exit.
pub fn launch(executor: &str, wrapper_args: &[String], proxy_args: &[String], timeout: Option<Duration>) -> Result<ProxyHandle, ProxyError> {
    let (mut reader, writer) = pipe().map_err(ProxyError::SpawnFailed)?;

    let mut args = wrapper_args.to_vec();
    args.push(DBUS_PROXY_EXECUTABLE.to_string());
    args.extend(proxy_args.iter().cloned());
    args.push(format!("--fd={}", writer_fd_number()));

    let child = Command::new(executor)
        .args(&args)
        .stdin(Stdio::null())
        .spawn()
        .map_err(ProxyError::SpawnFailed)?;

    drop(writer);

    wait_for_readiness(&mut reader, timeout.unwrap_or(DEFAULT_TIMEOUT))?;

    Ok(ProxyHandle { child, sync_read_fd: reader.into_raw_fd() })
}

fn writer_fd_number() -> i32 {
    3
}

/// The sync pipe has no inherent timeout (§9 Design Notes); this reads it on
/// a helper thread so the caller can bound the wait rather than block forever
/// on a proxy that never becomes ready.
fn wait_for_readiness(reader: &mut PipeReader, timeout: Duration) -> Result<(), ProxyError> {
    let mut clone = reader.try_clone().map_err(ProxyError::SpawnFailed)?;
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let mut byte = [0u8; 1];
        let result = match clone.read(&mut byte) {
            Ok(1) => Ok(()),
            Ok(_) => Err(ProxyError::Eof),
            Err(_) => Err(ProxyError::Eof),
        };
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(ProxyError::Timeout),
    }
}

/// Builds the proxy's own minimal wrapper sandbox arg list (§4.6, third
/// paragraph): a bind or symlink for every top-level host entry, `tmp`/
/// `var`/`run` writable, everything else read-only, plus the proxy socket
/// directory bound writable and the app-info fd injected as `/.flatpak-info`.
pub fn wrapper_args(host_entries: Vec<(PathBuf, WrapperEntry)>, proxy_socket_dir: &str, app_info_fd: RawFd) -> Vec<String> {
    let mut args = Vec::new();

    for (path, entry) in host_entries {
        match entry {
            WrapperEntry::Writable => {
                args.push("--bind".to_string());
                args.push(path.display().to_string());
                args.push(path.display().to_string());
            }
            WrapperEntry::ReadOnly => {
                args.push("--ro-bind".to_string());
                args.push(path.display().to_string());
                args.push(path.display().to_string());
            }
            WrapperEntry::Symlink(target) => {
                args.push("--symlink".to_string());
                args.push(target);
                args.push(path.display().to_string());
            }
        }
    }

    args.push("--bind".to_string());
    args.push(proxy_socket_dir.to_string());
    args.push(proxy_socket_dir.to_string());

    args.push("--file".to_string());
    args.push(app_info_fd.to_string());
    args.push("/.flatpak-info".to_string());

    args
}

#[derive(Debug, Clone)]
pub enum WrapperEntry {
    Writable,
    ReadOnly,
    Symlink(String),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn session_filter_owns_app_id_and_subtree() {
        let args = session_filter_args("unix:path=/run/bus", "/tmp/proxy", "org.example.App", &[]);
        assert!(args.contains(&"--own=org.example.App".to_string()));
        assert!(args.contains(&"--own=org.example.App.*".to_string()));
    }

    #[test]
    fn policy_entries_rendered_by_grant() {
        let args = session_filter_args(
            "unix:path=/run/bus",
            "/tmp/proxy",
            "org.example.App",
            &[("org.example.Other".to_string(), BusPolicy::Talk)],
        );
        assert!(args.contains(&"--talk=org.example.Other".to_string()));
    }

    #[test]
    fn none_policy_entries_are_omitted() {
        let args = session_filter_args("unix:path=/run/bus", "/tmp/proxy", "org.example.App", &[("org.example.Hidden".to_string(), BusPolicy::None)]);
        assert!(!args.iter().any(|a| a.contains("Hidden")));
    }

    #[test]
    fn accessibility_filter_is_fixed() {
        let args = accessibility_filter_args("unix:path=/run/bus", "/tmp/a11y");
        assert!(args.iter().any(|a| a.contains("atspi")));
    }
}
