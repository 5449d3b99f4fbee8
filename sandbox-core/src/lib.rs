/*
 * pacwrap-core
 *
 * Copyright (C) 2023-2024 Xavier R.M. <sapphirus@azorium.net>
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

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::constants::{BOLD, RESET};

pub mod appinfo;
pub mod busproxy;
pub mod configblobs;
pub mod constants;
pub mod context;
pub mod deploy;
pub mod error;
pub mod exec;
pub mod exposure;
pub mod extensions;
pub mod ldcache;
pub mod log;
pub mod utils;

pub use error::*;

/// Taxonomy of errors surfaced by the orchestration stages the Launcher drives.
///
/// `ConfigError`, `ParseError` and `BindError` live closer to their owning
/// module (`context`, `exposure`); this enum carries the cross-cutting cases
/// that don't have a single natural home.
#[derive(Debug)]
pub enum ErrorKind {
    EnvVarUnset(&'static str),
    ProcessInitFailure(&'static str, std::io::ErrorKind),
    ProcessWaitFailure(&'static str, std::io::ErrorKind),
    IOError(String, std::io::ErrorKind),
    Message(&'static str),
    Termios(nix::errno::Errno),
    DeployNotFound(String),
    RuntimeNotFound(String),
    ProxyFailure(String),
    ProxyTimeout,
    LdCacheFailure(String),
    SeccompFailure(String),
    FatalSandbox(i32),
}

impl Display for ErrorKind {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Message(err) => write!(fmter, "{}", err),
            Self::EnvVarUnset(var) => write!(fmter, "${}{var}{} is unset.", *BOLD, *RESET),
            Self::ProcessInitFailure(exec, err) => write!(fmter, "Unable to initialize '{exec}': {err}"),
            Self::ProcessWaitFailure(exec, err) => write!(fmter, "Unable to wait on '{exec}': {err}"),
            Self::IOError(ins, error) => write!(fmter, "'{ins}': {error}"),
            Self::Termios(errno) => write!(fmter, "Failed to restore termios parameters: {errno}."),
            Self::DeployNotFound(ins) => write!(fmter, "Deployment '{}{ins}{}' not found.", *BOLD, *RESET),
            Self::RuntimeNotFound(ins) => write!(fmter, "Runtime '{}{ins}{}' not found.", *BOLD, *RESET),
            Self::ProxyFailure(msg) => write!(fmter, "D-Bus proxy failed to start: {msg}"),
            Self::ProxyTimeout => write!(fmter, "D-Bus proxy did not signal readiness in time."),
            Self::LdCacheFailure(msg) => write!(fmter, "ld.so.cache regeneration failed: {msg}"),
            Self::SeccompFailure(msg) => write!(fmter, "seccomp filter compilation failed: {msg}"),
            Self::FatalSandbox(code) => write!(fmter, "Sandbox executor exited with code {code}."),
        }
    }
}

impl ErrorTrait for ErrorKind {
    fn code(&self) -> i32 {
        match self {
            Self::IOError(..) => 2,
            Self::FatalSandbox(code) => *code,
            _ => 1,
        }
    }
}
