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

//! CLI front-end (§1: out of scope beyond its interface to the core). Parses
//! the `--share=`/`--socket=`/`--filesystem=`/... surface (§6) into a
//! [`Context`], resolves the concrete collaborators (a filesystem-backed
//! deploy store, no document portal or session-bus scope yet), and hands off
//! to [`launch::launch`] (C9).

use std::env::args;

use sandbox_core::{context::cli::parse_cli_args, err, Error, ErrorKind, Result};

mod deploy;
mod forwarding;
mod instance;
mod launch;
mod refs;
mod sockets;

use deploy::FilesystemDeployStore;
use forwarding::NullPortal;
use launch::{LaunchRequest, NullScope};

const USAGE: &str = "\
sandbox-launcher run [OPTIONS] <REF> [-- COMMAND...]

Launches a deployed application in an unprivileged bwrap sandbox.

OPTIONS:
    --share=<k> / --unshare=<k>            network, ipc
    --socket=<k> / --nosocket=<k>          x11, wayland, pulseaudio, session-bus, system-bus
    --device=<k> / --nodevice=<k>          dri, all, kvm
    --allow=<k> / --disallow=<k>           devel, multiarch
    --filesystem=<spec>[:ro|:rw|:create]   --nofilesystem=<spec>
    --env=<NAME>=<VALUE>
    --own-name=<name> / --talk-name=<name>
    --system-own-name=<name> / --system-talk-name=<name>
    --add-policy=<subsys>.<key>=<value> / --remove-policy=<subsys>.<key>=<value>
    --persist=<home-relative-path>
    --runtime=<runtime-ref>                override the runtime declared by app metadata
    --background                           return once the executor has forked rather than blocking
    --debug                                echo log lines to stderr as well as the log file
    -h, --help                             print this message
    -V, --version                          print the launcher version

REF is either a full ref (`app/<id>/<arch>/<branch>`) or a bare app id, in
which case the host architecture and branch `stable` are assumed.
";

fn main() {
    if let Err(error) = run() {
        error.fatal()
    }
}

fn run() -> Result<()> {
    let argv: Vec<String> = args().skip(1).collect();

    if argv.is_empty() || matches!(argv[0].as_str(), "-h" | "--help" | "help") {
        print!("{USAGE}");
        return Ok(());
    }

    if matches!(argv[0].as_str(), "-V" | "--version" | "version") {
        println!("sandbox-launcher {}", *sandbox_core::constants::LAUNCHER_VERSION);
        return Ok(());
    }

    let rest = if argv[0] == "run" { &argv[1 ..] } else { &argv[..] };
    let split = rest.iter().position(|a| a == "--").unwrap_or(rest.len());
    let (head, tail) = rest.split_at(split);
    let command: Vec<String> = tail.iter().skip(1).cloned().collect();

    let mut cli_flags = Vec::new();
    let mut app_ref = None;
    let mut runtime_ref = None;
    let mut background = false;
    let mut debug = false;

    for arg in head {
        if arg == "--background" {
            background = true;
        } else if arg == "--debug" {
            debug = true;
        } else if let Some(value) = arg.strip_prefix("--runtime=") {
            runtime_ref = Some(value.to_string());
        } else if arg.starts_with("--") && arg.contains('=') {
            cli_flags.push(arg.clone());
        } else if arg.starts_with('-') {
            return err!(ErrorKind::Message("Unrecognized option; see `sandbox-launcher --help`."));
        } else if app_ref.is_none() {
            app_ref = Some(arg.clone());
        } else {
            return err!(ErrorKind::Message("A single target ref is expected before `--`."));
        }
    }

    let Some(app_ref) = app_ref else {
        return err!(ErrorKind::Message("Target ref not specified; see `sandbox-launcher --help`."));
    };

    let app_ref = normalize_ref("app", &app_ref);
    let runtime_ref_override = runtime_ref.as_ref().map(|r| normalize_ref("runtime", r));
    let extra_context = parse_cli_args(&cli_flags).map_err(|err| Error::new(Box::new(err)))?;

    let mut logger = sandbox_core::log::Logger::new("sandbox-launcher").init()?;
    logger.set_verbosity(if debug { 4 } else { 3 });

    let deploy = FilesystemDeployStore::new();
    let portal = NullPortal;
    let scope = NullScope;
    let request = LaunchRequest {
        app_ref: &app_ref,
        runtime_ref_override: runtime_ref_override.as_deref(),
        extra_context,
        command,
        background,
    };

    launch::launch(&deploy, &portal, &scope, &mut logger, request)
}

/// Accepts either a full `{app|runtime}/<id>/<arch>/<branch>` ref or a bare
/// app/runtime id, defaulting to the host architecture and the `stable`
/// branch in the latter case.
fn normalize_ref(kind: &str, reference: &str) -> String {
    if reference.contains('/') {
        return reference.to_string();
    }

    format!("{kind}/{reference}/{}/stable", host_arch())
}

fn host_arch() -> &'static str {
    std::env::consts::ARCH
}
