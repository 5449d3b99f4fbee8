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

//! A plain filesystem-backed [`DeployStore`]: deployments live under
//! `$XDG_DATA_HOME/sandbox-launcher/deploy/{app,runtime}/<id>/<arch>/<branch>`,
//! each holding a `files/` tree, a `metadata` INI blob (the §6 grammar,
//! plus an `[Application]` `runtime=` key the core itself never reads) and
//! an optional `commit` file. Overrides live alongside under `overrides/`.
//! Mirrors the env-var-override-then-XDG-default shape `ContainerVariables`
//! uses for per-instance paths.

use std::{env::var, fs, path::PathBuf};

use sandbox_core::{
    context::ini::{split_list, IniDocument},
    deploy::{DeployError, DeployStore, Deployment},
    extensions::Extension,
};

use crate::refs::{AppRef, RefKind};

pub struct FilesystemDeployStore {
    root: PathBuf,
}

impl FilesystemDeployStore {
    pub fn new() -> Self {
        let root = var("SANDBOX_DEPLOY_DIR").unwrap_or_else(|_| format!("{}/sandbox-launcher/deploy", *sandbox_core::constants::XDG_DATA_HOME));
        Self { root: PathBuf::from(root) }
    }

    fn deployment_dir(&self, reference: &AppRef) -> PathBuf {
        let kind = match reference.kind {
            RefKind::App => "app",
            RefKind::Runtime => "runtime",
        };

        self.root.join(kind).join(&reference.id).join(&reference.arch).join(&reference.branch)
    }

    fn resolve(&self, reference: &str) -> Result<Deployment, DeployError> {
        let parsed = AppRef::parse(reference).map_err(|_| DeployError::NotFound(reference.to_string()))?;
        let dir = self.deployment_dir(&parsed);

        if !dir.exists() {
            return Err(DeployError::NotFound(reference.to_string()));
        }

        let metadata = fs::read_to_string(dir.join("metadata")).unwrap_or_default();
        let commit = fs::read_to_string(dir.join("commit")).map(|s| s.trim().to_string()).unwrap_or_else(|_| "unknown".to_string());
        let extensions = read_extensions(&dir);

        Ok(Deployment { reference: reference.to_string(), commit, files_path: dir.join("files"), metadata, extensions })
    }
}

impl Default for FilesystemDeployStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeployStore for FilesystemDeployStore {
    fn resolve_app(&self, app_ref: &str) -> Result<Deployment, DeployError> {
        self.resolve(app_ref)
    }

    fn resolve_runtime(&self, runtime_ref: &str) -> Result<Deployment, DeployError> {
        self.resolve(runtime_ref)
    }

    fn load_overrides(&self, app_id: &str) -> Result<Option<String>, DeployError> {
        let path = self.root.join("overrides").join(app_id);

        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(DeployError::Unreadable(app_id.to_string(), err)),
        }
    }
}

/// `[Extension <id>]` groups in `<dir>/extensions.ini`. Extension file trees
/// live at `<dir>/extensions/<id>/`.
fn read_extensions(dir: &std::path::Path) -> Vec<Extension> {
    let Ok(text) = fs::read_to_string(dir.join("extensions.ini")) else { return Vec::new() };
    let doc = IniDocument::parse(&text);
    let mut extensions = Vec::new();

    for (group, entries) in doc.groups_with_prefix("Extension ") {
        let id = group.trim_start_matches("Extension ").trim().to_string();

        extensions.push(Extension {
            installed_id: id.clone(),
            files_path: dir.join("extensions").join(&id),
            directory: entries.get("directory").cloned().unwrap_or_else(|| format!("extensions/{id}")),
            subdir_suffix: entries.get("subdirectory").cloned(),
            add_ld_path: entries.get("add-ld-path").cloned(),
            merge_dirs: entries.get("merge-dirs").map(|v| split_list(v)).unwrap_or_default(),
            needs_tmpfs: entries.get("needs-tmpfs").is_some_and(|v| v == "true"),
            commit: entries.get("commit").cloned(),
            is_runtime: entries.get("runtime-extension").is_some_and(|v| v == "true"),
            has_ref_marker: entries.get("ref-marker").is_some_and(|v| v == "true"),
        });
    }

    extensions
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_deployment_is_not_found() {
        let store = FilesystemDeployStore { root: PathBuf::from("/nonexistent-sandbox-launcher-root") };
        assert!(matches!(store.resolve_app("app/org.example.App/x86_64/stable"), Err(DeployError::NotFound(_))));
    }

    #[test]
    fn malformed_ref_is_not_found() {
        let store = FilesystemDeployStore { root: PathBuf::from("/nonexistent-sandbox-launcher-root") };
        assert!(matches!(store.resolve_app("not-a-ref"), Err(DeployError::NotFound(_))));
    }
}
