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

//! Content-addressed `ld.so.cache` regeneration (C7). The cache key is
//! derived from everything that can change the link graph: both commits and
//! both extension summaries, so a cache is reused across launches as long as
//! none of those change.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    os::fd::{IntoRawFd, RawFd},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use sha2::{Digest, Sha256};

use crate::{constants::LDCONFIG_EXECUTABLE, impl_error};

#[derive(Debug)]
pub enum LdCacheError {
    Io(std::io::Error),
    LdconfigFailed(Option<i32>),
}

impl_error!(LdCacheError);

impl Display for LdCacheError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Io(err) => write!(fmter, "{err}"),
            Self::LdconfigFailed(code) => write!(fmter, "ldconfig exited with {code:?}"),
        }
    }
}

impl From<std::io::Error> for LdCacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

pub fn cache_key(app_commit: Option<&str>, runtime_commit: &str, app_summary: &str, runtime_summary: &str) -> String {
    let mut hasher = Sha256::new();

    if let Some(commit) = app_commit {
        hasher.update(commit.as_bytes());
    }

    hasher.update(runtime_commit.as_bytes());
    hasher.update(app_summary.as_bytes());
    hasher.update(runtime_summary.as_bytes());

    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn cache_dir(app_data_dir: Option<&Path>, user_cache_dir: &str) -> PathBuf {
    match app_data_dir {
        Some(dir) => dir.join(".ld.so"),
        None => PathBuf::from(format!("{user_cache_dir}/flatpak/ld.so")),
    }
}

/// Opens an existing cache entry for `key`, if present.
pub fn lookup(dir: &Path, key: &str) -> Option<RawFd> {
    let path = dir.join(key);
    let file = fs::File::open(path).ok()?;
    Some(file.into_raw_fd())
}

/// Runs `ldconfig -X -C <dir>/<key>` inside the sandbox described by
/// `sandbox_args` (expected to already contain the usr/runtime binds, a
/// `/proc`, a `/dev`, and the writable cache-dir bind at
/// `/run/ld-so-cache-dir`). On success, opens the regenerated file read-only,
/// atomically repoints `<dir>/active` at `key` (garbage-collecting the prior
/// target) when `app_data_dir` is set, or unlinks it immediately otherwise so
/// the returned fd is the cache's only reference.
pub fn regenerate(
    executor: &str,
    sandbox_args: &[String],
    dir: &Path,
    key: &str,
    tied_to_app: bool,
) -> Result<RawFd, LdCacheError> {
    fs::create_dir_all(dir)?;
    let target = dir.join(key);

    let mut args: Vec<String> = sandbox_args.to_vec();
    args.push(LDCONFIG_EXECUTABLE.to_string());
    args.push("-X".to_string());
    args.push("-C".to_string());
    args.push(format!("/run/ld-so-cache-dir/{key}"));

    let status = Command::new(executor).args(&args).stdin(Stdio::null()).status()?;

    if !status.success() {
        return Err(LdCacheError::LdconfigFailed(status.code()));
    }

    let file = fs::File::open(&target)?;
    let fd = file.into_raw_fd();

    if tied_to_app {
        switch_active(dir, key)?;
    } else {
        fs::remove_file(&target)?;
    }

    Ok(fd)
}

fn switch_active(dir: &Path, key: &str) -> Result<(), LdCacheError> {
    let active = dir.join("active");
    let previous = fs::read_link(&active).ok();

    let tmp = dir.join(format!(".active-{key}"));
    let _ = fs::remove_file(&tmp);

    #[cfg(unix)]
    std::os::unix::fs::symlink(key, &tmp)?;

    fs::rename(&tmp, &active)?;

    if let Some(prev_target) = previous {
        if prev_target.to_string_lossy() != key {
            let _ = fs::remove_file(dir.join(&prev_target));
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cache_key_is_deterministic() {
        let a = cache_key(Some("appcommit"), "runtimecommit", "a=1", "b=2");
        let b = cache_key(Some("appcommit"), "runtimecommit", "a=1", "b=2");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn cache_key_changes_with_any_input() {
        let base = cache_key(Some("appcommit"), "runtimecommit", "a=1", "b=2");
        let different_runtime = cache_key(Some("appcommit"), "other", "a=1", "b=2");
        let no_app_commit = cache_key(None, "runtimecommit", "a=1", "b=2");
        assert_ne!(base, different_runtime);
        assert_ne!(base, no_app_commit);
    }

    #[test]
    fn cache_dir_falls_back_to_user_cache() {
        let dir = cache_dir(None, "/home/user/.cache");
        assert_eq!(dir, PathBuf::from("/home/user/.cache/flatpak/ld.so"));
    }
}
