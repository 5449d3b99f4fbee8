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

//! The append-only argument stream (C3): a plain string vector plus a
//! parallel list of owned fds that travel with it. Everything destined for
//! the sandbox flows through kernel-anonymous fds rather than host paths, so
//! there is no host-visible temp file for the child to race against.

use std::{
    ffi::CString,
    fmt::{Debug, Display, Formatter},
    io::Write,
    os::fd::{FromRawFd, IntoRawFd, RawFd},
};

use nix::{
    fcntl::{fcntl, FcntlArg},
    sys::memfd::{memfd_create, MemFdCreateFlag},
};

use crate::impl_error;

#[derive(Debug)]
pub enum ArgStreamError {
    MemfdCreate(nix::Error),
    Seal(nix::Error),
    Write(std::io::Error),
    TempFile(std::io::Error),
}

impl_error!(ArgStreamError);

impl Display for ArgStreamError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemfdCreate(err) => write!(fmter, "memfd_create failed: {err}"),
            Self::Seal(err) => write!(fmter, "failed to seal anonymous memory file: {err}"),
            Self::Write(err) => write!(fmter, "failed to write blob into anonymous memory file: {err}"),
            Self::TempFile(err) => write!(fmter, "fallback temp file failed: {err}"),
        }
    }
}

/// An append-only stream of `bwrap`-style arguments plus the fds referenced
/// by `--bind-data`/`--file`/`--seccomp`/`--sync-fd`-style entries. Each fd is
/// owned by exactly one slot; transfer happens the moment it is added here.
#[derive(Default)]
pub struct ArgStream {
    args: Vec<String>,
    fds: Vec<RawFd>,
}

impl ArgStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, op: &str, extra: &[&str]) {
        self.args.push(op.to_string());
        self.args.extend(extra.iter().map(|s| s.to_string()));
    }

    /// Consumes `fd`, writing its decimal number as the argument immediately
    /// following `op`, then `after_arg` (typically the in-sandbox path).
    pub fn add_fd(&mut self, op: &str, fd: RawFd, after_arg: &str) {
        self.args.push(op.to_string());
        self.args.push(fd.to_string());
        self.args.push(after_arg.to_string());
        self.fds.push(fd);
    }

    /// Like [`Self::add_fd`] for single-argument fd options (`--sync-fd`,
    /// `--seccomp`) that take no trailing sandbox path.
    pub fn add_fd_only(&mut self, op: &str, fd: RawFd) {
        self.args.push(op.to_string());
        self.args.push(fd.to_string());
        self.fds.push(fd);
    }

    /// Materializes `bytes` into a sealed anonymous memory file (falling back
    /// to an unlinked temp file where sealing is unsupported) and emits
    /// `--bind-data <fd> <sandbox_path>`.
    pub fn add_data(&mut self, name: &str, bytes: &[u8], sandbox_path: &str) -> Result<(), ArgStreamError> {
        let fd = create_sealed_blob(name, bytes)?;
        self.add_fd("--bind-data", fd, sandbox_path);
        Ok(())
    }

    pub fn fds(&self) -> &[RawFd] {
        &self.fds
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<RawFd>) {
        (self.args, self.fds)
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn extend_raw<I: IntoIterator<Item = String>>(&mut self, args: I) {
        self.args.extend(args);
    }
}

impl Debug for ArgStream {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(fmter, "args: {:?}", self.args)?;
        writeln!(fmter, "fds:  {:?}", self.fds)
    }
}

/// Shrink+grow+write+seal locks the blob's content the instant it is built;
/// the child can read it but never mutate or resize it.
pub fn create_sealed_blob(name: &str, bytes: &[u8]) -> Result<RawFd, ArgStreamError> {
    match create_memfd(name, bytes) {
        Ok(fd) => Ok(fd),
        Err(_) => create_unlinked_tempfile(bytes),
    }
}

fn create_memfd(name: &str, bytes: &[u8]) -> Result<RawFd, ArgStreamError> {
    let cname = CString::new(name).unwrap_or_else(|_| CString::new("blob").unwrap());
    let raw = memfd_create(&cname, MemFdCreateFlag::MFD_ALLOW_SEALING).map_err(ArgStreamError::MemfdCreate)?;

    {
        let mut file = unsafe { std::fs::File::from_raw_fd(raw) };
        file.write_all(bytes).map_err(ArgStreamError::Write)?;
        std::mem::forget(file);
    }

    let seals = nix::libc::F_SEAL_SHRINK | nix::libc::F_SEAL_GROW | nix::libc::F_SEAL_WRITE | nix::libc::F_SEAL_SEAL;
    fcntl(raw, FcntlArg::F_ADD_SEALS(seals)).map_err(ArgStreamError::Seal)?;

    Ok(raw)
}

fn create_unlinked_tempfile(bytes: &[u8]) -> Result<RawFd, ArgStreamError> {
    let mut file = tempfile_backed().map_err(ArgStreamError::TempFile)?;
    file.write_all(bytes).map_err(ArgStreamError::Write)?;
    Ok(file.into_raw_fd())
}

fn tempfile_backed() -> std::io::Result<std::fs::File> {
    let path = std::env::temp_dir().join(format!(".sandbox-launcher-{}-{}", std::process::id(), unique_suffix()));
    let file = std::fs::OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)?;
    let _ = std::fs::remove_file(&path);
    Ok(file)
}

fn unique_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_pushes_op_and_extra_args() {
        let mut stream = ArgStream::new();
        stream.add("--ro-bind", &["/usr", "/usr"]);
        assert_eq!(stream.arguments(), &["--ro-bind", "/usr", "/usr"]);
    }

    #[test]
    fn add_fd_tracks_ownership() {
        let mut stream = ArgStream::new();
        stream.add_fd("--file", 42, "/.flatpak-info");
        assert_eq!(stream.arguments(), &["--file", "42", "/.flatpak-info"]);
        assert_eq!(stream.fds(), &[42]);
    }

    #[test]
    fn add_fd_only_omits_trailing_arg() {
        let mut stream = ArgStream::new();
        stream.add_fd_only("--sync-fd", 9);
        assert_eq!(stream.arguments(), &["--sync-fd", "9"]);
        assert_eq!(stream.fds(), &[9]);
    }

    #[test]
    fn add_data_materializes_and_emits_bind_data() {
        let mut stream = ArgStream::new();
        stream.add_data("passwd", b"root:x:0:0::/root:/bin/sh\n", "/etc/passwd").unwrap();
        assert_eq!(stream.arguments()[0], "--bind-data");
        assert_eq!(stream.arguments()[2], "/etc/passwd");
        assert_eq!(stream.fds().len(), 1);
    }
}
