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

//! Extension binding (C5): locates runtime/app extensions and decides the
//! binds, ld.so.conf fragments, `LD_LIBRARY_PATH` edits and merge-dir
//! symlinks they contribute, in priority order.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct Extension {
    pub installed_id: String,
    pub files_path: PathBuf,
    pub directory: String,
    pub subdir_suffix: Option<String>,
    pub add_ld_path: Option<String>,
    pub merge_dirs: Vec<String>,
    pub needs_tmpfs: bool,
    pub commit: Option<String>,
    pub is_runtime: bool,
    pub has_ref_marker: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionBind {
    Tmpfs(PathBuf),
    ReadOnly(PathBuf, PathBuf),
    LockFile(PathBuf),
    LdConfigFragment(PathBuf, String),
    LdLibraryPathPrepend(String),
    LdLibraryPathAppend(String),
    Symlink(PathBuf, PathBuf),
}

pub struct MountPlan {
    pub binds: Vec<ExtensionBind>,
    /// `id=commit[;id=commit…]`, `local` substituted for a missing commit.
    pub summary: String,
}

pub fn mount(extensions: &[Extension]) -> MountPlan {
    let mut binds = Vec::new();
    let mut seen_tmpfs = HashSet::new();

    let mut by_directory = extensions.to_vec();
    by_directory.sort_by(|a, b| a.directory.cmp(&b.directory));

    for ext in &by_directory {
        let prefix = if ext.is_runtime { "/usr" } else { "/app" };
        let target_dir = PathBuf::from(prefix).join(&ext.directory);

        if ext.needs_tmpfs {
            let parent = target_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| target_dir.clone());

            if seen_tmpfs.insert(parent.clone()) {
                binds.push(ExtensionBind::Tmpfs(parent));
            }
        }

        let target = match &ext.subdir_suffix {
            Some(suffix) => target_dir.join(suffix),
            None => target_dir,
        };

        binds.push(ExtensionBind::ReadOnly(ext.files_path.clone(), target.clone()));

        if ext.has_ref_marker {
            binds.push(ExtensionBind::LockFile(target.join(".ref")));
        }
    }

    let mut fragment_counter: u32 = 0;

    for ext in extensions {
        let prefix = if ext.is_runtime { "/usr" } else { "/app" };

        if let Some(ld_path) = &ext.add_ld_path {
            let search_path = PathBuf::from(prefix).join(&ext.directory).join(ld_path);

            if ext.is_runtime {
                binds.push(ExtensionBind::LdLibraryPathPrepend(search_path.to_string_lossy().into_owned()));
            } else {
                binds.push(ExtensionBind::LdLibraryPathAppend(search_path.to_string_lossy().into_owned()));
            }

            fragment_counter += 1;
            let frag_prefix = if ext.is_runtime { "runtime" } else { "app" };
            let frag_path = PathBuf::from(format!("/run/flatpak/ld.so.conf.d/{frag_prefix}-{fragment_counter:03}-{}.conf", ext.installed_id));
            binds.push(ExtensionBind::LdConfigFragment(frag_path, format!("{}\n", search_path.display())));
        }

        for merge_dir in &ext.merge_dirs {
            let source_dir = ext.files_path.join(merge_dir);
            let target_parent = PathBuf::from(prefix).join(&ext.directory).join(merge_dir);

            let Ok(read_dir) = fs::read_dir(&source_dir) else { continue };

            for entry in read_dir.flatten() {
                let name = entry.file_name();
                let link_path = target_parent.join(&name);

                if binds.iter().any(|b| matches!(b, ExtensionBind::Symlink(p, _) if *p == link_path)) {
                    continue;
                }

                binds.push(ExtensionBind::Symlink(link_path, entry.path()));
            }
        }
    }

    let summary = extensions
        .iter()
        .map(|ext| format!("{}={}", ext.installed_id, ext.commit.clone().unwrap_or_else(|| "local".to_string())))
        .collect::<Vec<_>>()
        .join(";");

    MountPlan { binds, summary }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ext(id: &str, directory: &str, is_runtime: bool) -> Extension {
        Extension {
            installed_id: id.to_string(),
            files_path: PathBuf::from(format!("/deploy/{id}")),
            directory: directory.to_string(),
            subdir_suffix: None,
            add_ld_path: None,
            merge_dirs: Vec::new(),
            needs_tmpfs: false,
            commit: None,
            is_runtime,
            has_ref_marker: false,
        }
    }

    #[test]
    fn sorts_binds_by_directory() {
        let extensions = vec![ext("b", "extensions/b", false), ext("a", "extensions/a", false)];
        let plan = mount(&extensions);
        let first_bind = plan.binds.iter().find(|b| matches!(b, ExtensionBind::ReadOnly(..))).unwrap();
        assert!(matches!(first_bind, ExtensionBind::ReadOnly(src, _) if src.to_string_lossy().ends_with("/a")));
    }

    #[test]
    fn summary_uses_local_for_missing_commit() {
        let mut e = ext("a", "extensions/a", false);
        e.commit = Some("deadbeef".into());
        let extensions = vec![e, ext("b", "extensions/b", true)];
        let plan = mount(&extensions);
        assert_eq!(plan.summary, "a=deadbeef;b=local");
    }

    #[test]
    fn runtime_ld_path_prepends_app_appends() {
        let mut runtime = ext("rt", "extensions/rt", true);
        runtime.add_ld_path = Some("lib".into());
        let mut app = ext("app", "extensions/app", false);
        app.add_ld_path = Some("lib".into());

        let plan = mount(&[runtime, app]);
        assert!(plan.binds.iter().any(|b| matches!(b, ExtensionBind::LdLibraryPathPrepend(_))));
        assert!(plan.binds.iter().any(|b| matches!(b, ExtensionBind::LdLibraryPathAppend(_))));
    }
}
