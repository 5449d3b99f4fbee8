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

//! The interface this core expects from the deploy store: an external
//! collaborator, out of scope here, that resolves a ref to a file root,
//! commit id, metadata blob and any stored override data. The Launcher
//! depends only on this trait, never on a concrete store implementation.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Deployment {
    pub reference: String,
    pub commit: String,
    pub files_path: PathBuf,
    pub metadata: String,
    pub extensions: Vec<crate::extensions::Extension>,
}

#[derive(Debug)]
pub enum DeployError {
    NotFound(String),
    Unreadable(String, std::io::Error),
}

crate::impl_error!(DeployError);

impl std::fmt::Display for DeployError {
    fn fmt(&self, fmter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(reference) => write!(fmter, "'{reference}': not deployed."),
            Self::Unreadable(reference, err) => write!(fmter, "'{reference}': {err}"),
        }
    }
}

/// A store that, given a ref, yields the data the Launcher needs without the
/// core ever touching installation or repository management itself.
pub trait DeployStore {
    fn resolve_app(&self, app_ref: &str) -> Result<Deployment, DeployError>;

    fn resolve_runtime(&self, runtime_ref: &str) -> Result<Deployment, DeployError>;

    /// Stored per-app override metadata (§4.1's `load_overrides` input), if any.
    fn load_overrides(&self, app_id: &str) -> Result<Option<String>, DeployError>;
}

#[cfg(test)]
mod test {
    use super::*;

    struct StaticStore;

    impl DeployStore for StaticStore {
        fn resolve_app(&self, app_ref: &str) -> Result<Deployment, DeployError> {
            Ok(Deployment {
                reference: app_ref.to_string(),
                commit: "abc123".to_string(),
                files_path: PathBuf::from("/deploy/app"),
                metadata: String::new(),
                extensions: Vec::new(),
            })
        }

        fn resolve_runtime(&self, runtime_ref: &str) -> Result<Deployment, DeployError> {
            Ok(Deployment {
                reference: runtime_ref.to_string(),
                commit: "def456".to_string(),
                files_path: PathBuf::from("/deploy/runtime"),
                metadata: String::new(),
                extensions: Vec::new(),
            })
        }

        fn load_overrides(&self, _app_id: &str) -> Result<Option<String>, DeployError> {
            Ok(None)
        }
    }

    #[test]
    fn static_store_resolves_both_refs() {
        let store = StaticStore;
        assert!(store.resolve_app("app/org.example.App/x86_64/stable").is_ok());
        assert!(store.resolve_runtime("runtime/org.example.Runtime/x86_64/stable").is_ok());
    }
}
