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

//! On-demand generation of the small configuration blobs the sandbox needs
//! (C4): `/etc/passwd`, `/etc/group`, `/etc/ld.so.conf`, a filtered
//! Xauthority, a PulseAudio client config, and the `user-dirs.dirs` file.
//! Callers hand the returned bytes to `ArgStream::add_data`.

use std::{fmt::Display, fs};

use crate::{
    constants::{GID, HOME, SHELL_NAME, UID, USER},
    impl_error,
};

#[derive(Debug)]
pub enum ConfigBlobError {
    XauthUnreadable(std::io::Error),
}

impl_error!(ConfigBlobError);

impl Display for ConfigBlobError {
    fn fmt(&self, fmter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::XauthUnreadable(err) => write!(fmter, "failed to read host Xauthority: {err}"),
        }
    }
}

pub fn passwd_blob() -> String {
    format!("{}:x:{}:{}:{}:{}:{}\nnobody:x:65534:65534:nobody:/:/sbin/nologin\n", *USER, *UID, *GID, *USER, *HOME, *SHELL_NAME)
}

pub fn group_blob() -> String {
    format!("{0}:x:{1}:\nnobody:x:65534:\n", *USER, *GID)
}

/// Runtime libraries must win over app-bundled ones unless the app's own
/// `.conf` fragment explicitly overrides, hence the runtime line comes last.
pub fn ld_so_conf_blob() -> String {
    "include /run/flatpak/ld.so.conf.d/app-*.conf\n/app/etc/ld.so.conf\n/app/lib\ninclude /run/flatpak/ld.so.conf.d/runtime-*.conf\n".to_string()
}

pub fn pulse_client_conf_blob() -> String {
    "enable-shm=no\n".to_string()
}

pub fn user_dirs_blob(entries: &[(&str, &str)]) -> String {
    let mut out = String::new();

    for (name, path) in entries {
        out.push_str(&format!("XDG_{name}_DIR=\"{path}\"\n"));
    }

    out
}

/// Filters the host's Xauthority down to local/wild-family entries for
/// `display`, rewriting each kept entry to `display 99` (the sandbox's
/// internal X11 display number) and returns the rewritten bytes.
pub fn xauth_blob(host_path: &str, hostname: &str, display: u32) -> Result<Vec<u8>, ConfigBlobError> {
    let data = fs::read(host_path).map_err(ConfigBlobError::XauthUnreadable)?;
    Ok(rewrite_xauth_entries(&data, hostname, display))
}

/// `.Xauthority` is a sequence of binary entries:
/// `family(u16) addr_len(u16) addr addr_len(u16)... number_len(u16) number
/// name_len(u16) name data_len(u16) data`. Family 0 (local) and 0xFFFF
/// (wild) entries matching `display` are kept, rewritten to display `99`.
fn rewrite_xauth_entries(data: &[u8], hostname: &str, display: u32) -> Vec<u8> {
    const FAMILY_LOCAL: u16 = 256;
    const FAMILY_WILD: u16 = 0xFFFF;

    let mut out = Vec::new();
    let mut cursor = 0usize;
    let display_str = display.to_string();
    let target_display = "99";

    while cursor + 2 <= data.len() {
        let start = cursor;
        let family = read_u16(data, &mut cursor);

        let Some(addr) = read_field(data, &mut cursor) else { break };
        let Some(number) = read_field(data, &mut cursor) else { break };
        let Some(name) = read_field(data, &mut cursor) else { break };
        let Some(auth_data) = read_field(data, &mut cursor) else { break };

        let number_str = String::from_utf8_lossy(&number);
        let matches_host = family == FAMILY_WILD || (family == FAMILY_LOCAL && addr == hostname.as_bytes());

        if matches_host && (number_str == display_str || number_str.is_empty()) {
            out.extend_from_slice(&family.to_be_bytes());
            write_field(&mut out, &addr);
            write_field(&mut out, target_display.as_bytes());
            write_field(&mut out, &name);
            write_field(&mut out, &auth_data);
        }

        let _ = start;
    }

    out
}

fn read_u16(data: &[u8], cursor: &mut usize) -> u16 {
    let value = u16::from_be_bytes([data[*cursor], data[*cursor + 1]]);
    *cursor += 2;
    value
}

fn read_field(data: &[u8], cursor: &mut usize) -> Option<Vec<u8>> {
    if *cursor + 2 > data.len() {
        return None;
    }

    let len = read_u16(data, cursor) as usize;

    if *cursor + len > data.len() {
        return None;
    }

    let field = data[*cursor .. *cursor + len].to_vec();
    *cursor += len;
    Some(field)
}

fn write_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u16).to_be_bytes());
    out.extend_from_slice(field);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn passwd_blob_has_two_lines() {
        let blob = passwd_blob();
        assert_eq!(blob.lines().count(), 2);
        assert!(blob.contains(&format!(":{}:{}:", *UID, *GID)));
    }

    #[test]
    fn ld_so_conf_lists_runtime_last() {
        let blob = ld_so_conf_blob();
        let runtime_pos = blob.find("runtime-*.conf").unwrap();
        let app_pos = blob.find("app-*.conf").unwrap();
        assert!(runtime_pos > app_pos);
    }

    #[test]
    fn xauth_roundtrip_keeps_matching_entry() {
        let mut entry = Vec::new();
        entry.extend_from_slice(&256u16.to_be_bytes());
        write_field(&mut entry, b"myhost");
        write_field(&mut entry, b"3");
        write_field(&mut entry, b"MIT-MAGIC-COOKIE-1");
        write_field(&mut entry, b"0123456789abcdef");

        let rewritten = rewrite_xauth_entries(&entry, "myhost", 3);
        let mut cursor = 2;
        let addr = read_field(&rewritten, &mut cursor).unwrap();
        let number = read_field(&rewritten, &mut cursor).unwrap();
        assert_eq!(addr, b"myhost");
        assert_eq!(number, b"99");
    }

    #[test]
    fn xauth_drops_nonmatching_display() {
        let mut entry = Vec::new();
        entry.extend_from_slice(&256u16.to_be_bytes());
        write_field(&mut entry, b"myhost");
        write_field(&mut entry, b"7");
        write_field(&mut entry, b"MIT-MAGIC-COOKIE-1");
        write_field(&mut entry, b"0123456789abcdef");

        let rewritten = rewrite_xauth_entries(&entry, "myhost", 3);
        assert!(rewritten.is_empty());
    }
}
