/*
 * pacwrap
 *
 * Copyright (C) 2023-2024 Xavier Moffett <sapphirus@azorium.net>
 * SPDX-License-Identifier: GPL-3.0-only
 *
 * This program is free software: you can redistribute it and/or modify
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

//! Applies the `sockets` grants from the finalized [`Context`] (§4.10 step 9):
//! X11 (rewritten to display `:99` with a filtered Xauthority), Wayland,
//! PulseAudio, and the session/system/accessibility D-Bus buses, the latter
//! three always routed through [`busproxy`].

use std::{fs, os::fd::RawFd, path::Path, process::Child};

use sandbox_core::{
    busproxy::{self, BusKind, ProxyHandle, WrapperEntry},
    configblobs,
    constants::{BWRAP_EXECUTABLE, DBUS_PROXY_DIR, UID, WAYLAND_DISPLAY, WAYLAND_SOCKET, X11_DISPLAY, XAUTHORITY, XDG_RUNTIME_DIR},
    context::{caps::Sockets, fsmode::BusPolicy, Context},
    exec::args::ArgStream,
};

/// Everything socket application produced that the caller must track for the
/// remainder of the launch: spawned proxy children (to be killed on exit, per
/// §5 ordering guarantees) and env vars to set for the child.
#[derive(Default)]
pub struct SocketOutcome {
    pub env: Vec<(String, String)>,
    pub proxies: Vec<Child>,
}

pub fn apply(ctx: &Context, app_id: &str, app_info_fd: RawFd, args: &mut ArgStream) -> SocketOutcome {
    let mut outcome = SocketOutcome::default();

    args.add("--tmpfs", &["/tmp/.X11-unix"]);

    if ctx.sockets.is_granted(Sockets::X11) {
        apply_x11(args, &mut outcome);
    }

    if ctx.sockets.is_granted(Sockets::WAYLAND) {
        apply_wayland(args, &mut outcome);
    }

    if ctx.sockets.is_granted(Sockets::PULSEAUDIO) {
        apply_pulseaudio(args, &mut outcome);
    }

    if ctx.sockets.is_granted(Sockets::SESSION_BUS) {
        if let Some(proxy) = apply_bus(BusKind::Session, app_id, app_info_fd, &ctx.session_bus_policy, args) {
            outcome.env.push(("DBUS_SESSION_BUS_ADDRESS".to_string(), format!("unix:path={}", proxy.sandbox_path)));
            outcome.proxies.push(proxy.child);
        }
    }

    if ctx.sockets.is_granted(Sockets::SYSTEM_BUS) {
        if let Some(proxy) = apply_bus(BusKind::System, app_id, app_info_fd, &ctx.system_bus_policy, args) {
            outcome.env.push(("DBUS_SYSTEM_BUS_ADDRESS".to_string(), format!("unix:path={}", proxy.sandbox_path)));
            outcome.proxies.push(proxy.child);
        }
    }

    // The accessibility bus is always proxied when reachable (§4.10 step 9),
    // independent of the app's own socket grants.
    if let Some(proxy) = apply_bus(BusKind::Accessibility, app_id, app_info_fd, &[], args) {
        outcome.env.push(("AT_SPI_BUS_ADDRESS".to_string(), format!("unix:path={}", proxy.sandbox_path)));
        outcome.proxies.push(proxy.child);
    }

    outcome
}

/// A launched proxy plus the bus info the caller needs: the sandbox-side
/// socket path for the env var, and the proxy's own child to track for
/// cleanup. The sync fd has already been attached to `args`.
struct LaunchedProxy {
    child: Child,
    sandbox_path: String,
}

fn apply_x11(args: &mut ArgStream, outcome: &mut SocketOutcome) {
    let display_num: u32 = X11_DISPLAY.trim_start_matches(':').split('.').next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let host_socket = format!("/tmp/.X11-unix/X{display_num}");

    if !Path::new(&host_socket).exists() {
        return;
    }

    args.add("--ro-bind", &[&host_socket, "/tmp/.X11-unix/X99"]);
    outcome.env.push(("DISPLAY".to_string(), ":99.0".to_string()));

    if XAUTHORITY.is_empty() {
        return;
    }

    let hostname = hostname();

    if let Ok(blob) = configblobs::xauth_blob(&XAUTHORITY, &hostname, display_num) {
        let sandbox_path = format!("/run/user/{}/Xauthority", *UID);

        if args.add_data("xauthority", &blob, &sandbox_path).is_ok() {
            outcome.env.push(("XAUTHORITY".to_string(), sandbox_path));
        }
    }
}

fn apply_wayland(args: &mut ArgStream, outcome: &mut SocketOutcome) {
    if WAYLAND_DISPLAY.is_empty() || !Path::new(&*WAYLAND_SOCKET).exists() {
        return;
    }

    let sandbox_path = format!("/run/user/{}/{}", *UID, *WAYLAND_DISPLAY);
    args.add("--ro-bind", &[&WAYLAND_SOCKET, &sandbox_path]);
    outcome.env.push(("WAYLAND_DISPLAY".to_string(), WAYLAND_DISPLAY.to_string()));
}

fn apply_pulseaudio(args: &mut ArgStream, outcome: &mut SocketOutcome) {
    let host_socket = format!("{}/pulse/native", *XDG_RUNTIME_DIR);

    if !Path::new(&host_socket).exists() {
        return;
    }

    let sandbox_socket = format!("/run/user/{}/pulse/native", *UID);
    args.add("--ro-bind", &[&host_socket, &sandbox_socket]);

    let config = configblobs::pulse_client_conf_blob();
    let sandbox_config = format!("/run/user/{}/pulse/config", *UID);

    if args.add_data("pulse-config", config.as_bytes(), &sandbox_config).is_ok() {
        outcome.env.push(("PULSE_CLIENTCONFIG".to_string(), sandbox_config));
    }

    outcome.env.push(("PULSE_SERVER".to_string(), format!("unix:{sandbox_socket}")));
}

fn apply_bus(
    kind: BusKind,
    app_id: &str,
    app_info_fd: RawFd,
    policy_map: &indexmap::IndexMap<String, BusPolicy>,
    args: &mut ArgStream,
) -> Option<LaunchedProxy> {
    let Ok(upstream) = std::env::var(kind.env_var()) else { return None };

    fs::create_dir_all(&*DBUS_PROXY_DIR).ok()?;

    let label = match kind {
        BusKind::Session => "session",
        BusKind::System => "system",
        BusKind::Accessibility => "a11y",
    };
    let proxy_socket = busproxy::unique_proxy_socket_path(label);
    let policy: Vec<(String, BusPolicy)> = policy_map.iter().map(|(k, v)| (k.clone(), *v)).collect();

    let proxy_args = match kind {
        BusKind::Session => busproxy::session_filter_args(&upstream, &proxy_socket, app_id, &policy),
        BusKind::System => busproxy::system_filter_args(&upstream, &proxy_socket, &policy),
        BusKind::Accessibility => busproxy::accessibility_filter_args(&upstream, &proxy_socket),
    };

    let wrapper = busproxy::wrapper_args(wrapper_host_entries(), &*DBUS_PROXY_DIR, app_info_fd);
    let handle: ProxyHandle = busproxy::launch(BWRAP_EXECUTABLE, &wrapper, &proxy_args, None).ok()?;

    // The sync fd is handed to the sandboxed app itself; its closure on app
    // exit is the signal the proxy watches for to know when to stop (§4.6).
    args.add_fd_only("--sync-fd", handle.sync_read_fd);

    Some(LaunchedProxy { child: handle.child, sandbox_path: kind.sandbox_path() })
}

/// Top-level host entries for the proxy's own wrapper sandbox (§4.6): every
/// entry read-only except the writable scratch directories.
fn wrapper_host_entries() -> Vec<(std::path::PathBuf, WrapperEntry)> {
    let mut entries = Vec::new();

    let Ok(read_dir) = fs::read_dir("/") else { return entries };

    for entry in read_dir.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        let kind = if matches!(name.as_ref(), "tmp" | "var" | "run") {
            WrapperEntry::Writable
        } else if let Ok(target) = fs::read_link(&path) {
            WrapperEntry::Symlink(target.display().to_string())
        } else {
            WrapperEntry::ReadOnly
        };

        entries.push((path, kind));
    }

    entries
}

fn hostname() -> String {
    let mut buf = [0u8; 256];

    match nix::unistd::gethostname(&mut buf) {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(_) => "localhost".to_string(),
    }
}
