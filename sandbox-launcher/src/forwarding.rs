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

//! Document-portal argument forwarding (§4.10, last paragraph): between
//! `@@`/`@@u` toggles in the caller's positional args, any local path or
//! `file:` URI not already visible in the sandbox is exported through the
//! document portal and rewritten to its `<doc-mount>/<id>/<basename>` form.

use std::path::{Path, PathBuf};

use sandbox_core::exposure::ExposurePlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toggle {
    Off,
    Path,
    Uri,
}

#[derive(Debug)]
pub enum PortalError {
    Unavailable(String),
}

impl std::fmt::Display for PortalError {
    fn fmt(&self, fmter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(fmter, "document portal unavailable: {msg}"),
        }
    }
}

/// The document portal is an external collaborator (a D-Bus service) this
/// crate never talks to directly; callers supply whatever implementation
/// reaches it. A portal-unavailable error downgrades to passthrough rather
/// than aborting the launch (§7).
pub trait DocumentPortal {
    fn export(&self, path: &Path) -> Result<String, PortalError>;
}

/// Stands in when no real portal connection exists: every export request
/// fails, so file-forwarding toggles degrade to passthrough.
pub struct NullPortal;

impl DocumentPortal for NullPortal {
    fn export(&self, path: &Path) -> Result<String, PortalError> {
        Err(PortalError::Unavailable(path.display().to_string()))
    }
}

/// Rewrites `args` in place with the caller's positional arguments, honoring
/// `@@`/`@@u` toggles. Arguments outside a toggle span pass through
/// unchanged; a portal failure for a given argument also passes it through
/// unchanged rather than aborting forwarding for the rest.
pub fn rewrite_args(args: &[String], plan: &ExposurePlan, portal: &dyn DocumentPortal, doc_mount: &str) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut toggle = Toggle::Off;

    for arg in args {
        match arg.as_str() {
            "@@" => {
                toggle = if toggle == Toggle::Path { Toggle::Off } else { Toggle::Path };
                continue;
            }
            "@@u" => {
                toggle = if toggle == Toggle::Uri { Toggle::Off } else { Toggle::Uri };
                continue;
            }
            _ => {}
        }

        if toggle == Toggle::Off {
            out.push(arg.clone());
            continue;
        }

        out.push(forward_one(arg, toggle, plan, portal, doc_mount));
    }

    out
}

fn forward_one(arg: &str, toggle: Toggle, plan: &ExposurePlan, portal: &dyn DocumentPortal, doc_mount: &str) -> String {
    let Some(path) = resolve_local_path(arg) else { return arg.to_string() };

    if plan.visibility_query(&path) {
        return arg.to_string();
    }

    match portal.export(&path) {
        Ok(id) => {
            let basename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let mounted = format!("{doc_mount}/{id}/{basename}");

            match toggle {
                Toggle::Uri => format!("file://{mounted}"),
                _ => mounted,
            }
        }
        Err(_) => arg.to_string(),
    }
}

fn resolve_local_path(arg: &str) -> Option<PathBuf> {
    if let Some(rest) = arg.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }

    if arg.starts_with('/') {
        return Some(PathBuf::from(arg));
    }

    None
}

#[cfg(test)]
mod test {
    use super::*;

    struct AlwaysExports;

    impl DocumentPortal for AlwaysExports {
        fn export(&self, _path: &Path) -> Result<String, PortalError> {
            Ok("doc-id-1".to_string())
        }
    }

    #[test]
    fn passthrough_outside_toggle() {
        let plan = ExposurePlan::default();
        let args = vec!["/etc/hidden".to_string()];
        let out = rewrite_args(&args, &plan, &NullPortal, "/run/user/1000/doc");
        assert_eq!(out, args);
    }

    #[test]
    fn forwards_hidden_path_between_toggles() {
        let plan = ExposurePlan::default();
        let args = vec!["@@".to_string(), "/home/user/file.txt".to_string(), "@@".to_string()];
        let out = rewrite_args(&args, &plan, &AlwaysExports, "/run/user/1000/doc");
        assert_eq!(out, vec!["/run/user/1000/doc/doc-id-1/file.txt".to_string()]);
    }

    #[test]
    fn uri_toggle_rewrites_to_file_uri() {
        let plan = ExposurePlan::default();
        let args = vec!["@@u".to_string(), "file:///home/user/file.txt".to_string(), "@@u".to_string()];
        let out = rewrite_args(&args, &plan, &AlwaysExports, "/run/user/1000/doc");
        assert_eq!(out, vec!["file:///run/user/1000/doc/doc-id-1/file.txt".to_string()]);
    }

    #[test]
    fn portal_failure_passes_through_unchanged() {
        let plan = ExposurePlan::default();
        let args = vec!["@@".to_string(), "/home/user/file.txt".to_string(), "@@".to_string()];
        let out = rewrite_args(&args, &plan, &NullPortal, "/run/user/1000/doc");
        assert_eq!(out, vec!["/home/user/file.txt".to_string()]);
    }
}
