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

//! Per-app data directory resolution (§4.10 step 3): `data`, `cache`,
//! `cache/fontconfig`, `cache/tmp`, `config`, created eagerly with `0700`.

use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf};

use sandbox_core::{constants::XDG_DATA_HOME, err, ErrorKind, Result};

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
    pub data: PathBuf,
    pub cache: PathBuf,
    pub cache_fontconfig: PathBuf,
    pub cache_tmp: PathBuf,
    pub config: PathBuf,
}

impl AppPaths {
    pub fn resolve(app_id: &str) -> Result<Self> {
        let root = PathBuf::from(format!("{}/sandbox-launcher/instances/{app_id}", *XDG_DATA_HOME));
        let paths = Self {
            data: root.join("data"),
            cache: root.join("cache"),
            cache_fontconfig: root.join("cache").join("fontconfig"),
            cache_tmp: root.join("cache").join("tmp"),
            config: root.join("config"),
            root,
        };

        for dir in [&paths.data, &paths.cache, &paths.cache_fontconfig, &paths.cache_tmp, &paths.config] {
            create_private_dir(dir)?;
        }

        Ok(paths)
    }
}

fn create_private_dir(path: &PathBuf) -> Result<()> {
    if let Err(error) = fs::create_dir_all(path) {
        return err!(ErrorKind::IOError(path.display().to_string(), error.kind()));
    }

    if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
        return err!(ErrorKind::IOError(path.display().to_string(), error.kind()));
    }

    Ok(())
}
