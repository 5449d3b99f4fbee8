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

//! Process bookkeeping around the final executor invocation: waiting on it
//! (optionally blocking until its PID namespace is gone for the background
//! launch mode), decoding its `--info-fd` readiness blob, and waiting on the
//! helper processes (bus proxy, `ldconfig`) the Launcher spawns alongside it.

use std::{
    path::Path,
    process::{exit, Child},
    thread,
    time::Duration,
};

use crate::{constants::BWRAP_EXECUTABLE, err, error::*, utils::TermControl, ErrorKind};

static PROCESS_SLEEP_DURATION: Duration = Duration::from_millis(250);

/// Waits on the executor. `block` mirrors the background launch mode (§4.10
/// step 13): when set, spin until `/proc/<bwrap_pid>` disappears so that the
/// caller only returns once the sandboxed process's namespace has fully torn
/// down. `jobs` are helper children (the bus proxy) killed once the executor
/// exits, since their sync-pipe read end closing would otherwise be their
/// only other signal to stop.
pub fn wait_on_executor(
    mut process: Child,
    term: TermControl,
    bwrap_pid: i32,
    block: bool,
    jobs: Option<Vec<Child>>,
    trap_cb: fn(i32),
    exit_cb: fn() -> Result<()>,
) -> Result<()> {
    trap_cb(bwrap_pid);

    match process.wait() {
        Ok(status) => {
            if block {
                let proc: &str = &format!("/proc/{}/", bwrap_pid);
                let proc = Path::new(proc);

                while proc.exists() {
                    thread::sleep(PROCESS_SLEEP_DURATION);
                }
            }

            if let Some(mut jobs) = jobs {
                for job in jobs.iter_mut() {
                    job.kill().ok();
                }
            }

            if let Err(err) = exit_cb() {
                err.warn();
            }

            if let Err(err) = term.reset_terminal() {
                err.warn();
            }

            match status.code() {
                Some(code) => exit(code),
                None => {
                    eprintln!("\nsandbox executor process {status}");
                    exit(ErrorKind::FatalSandbox(1).code())
                }
            }
        }
        Err(error) => err!(ErrorKind::ProcessWaitFailure(BWRAP_EXECUTABLE, error.kind())),
    }
}
