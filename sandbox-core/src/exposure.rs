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

//! The exposure planner (C2): turns a [`Context`]'s `filesystems` map into a
//! minimal, acyclic set of bind/dir/tmpfs/symlink operations keyed by the
//! sandbox path they target.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Component, Path, PathBuf},
};

use indexmap::IndexMap;

use crate::{
    constants::{HOME, HOST_BLACKLIST, PROTECTED_PREFIXES, SYMLINK_RECURSION_LIMIT, USER_INSTALL_ROOT},
    context::{fsmode::FsMode, Context},
    impl_error,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exposure {
    Bind(FsMode),
    Dir,
    Tmpfs,
    Symlink(PathBuf),
}

#[derive(Debug)]
pub enum ExposureError {
    NotAbsolute(PathBuf),
    Protected(PathBuf),
    UnsupportedType(PathBuf),
    SymlinkLoop(PathBuf),
    Io(PathBuf, std::io::Error),
}

impl_error!(ExposureError);

impl Display for ExposureError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::NotAbsolute(path) => write!(fmter, "'{}': exposure paths must be absolute.", path.display()),
            Self::Protected(path) => write!(fmter, "'{}': refusing to bind over a protected prefix.", path.display()),
            Self::UnsupportedType(path) => write!(fmter, "'{}': not a file, directory, symlink or socket.", path.display()),
            Self::SymlinkLoop(path) => write!(fmter, "'{}': symlink recursion exceeded {} levels.", path.display(), SYMLINK_RECURSION_LIMIT),
            Self::Io(path, err) => write!(fmter, "'{}': {err}", path.display()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ExposurePlan {
    entries: IndexMap<PathBuf, Exposure>,
    hidden: IndexMap<PathBuf, ()>,
}

impl ExposurePlan {
    pub fn get(&self, path: &Path) -> Option<&Exposure> {
        self.entries.get(path)
    }

    /// Entries sorted shortest-path-first so parent mounts precede children;
    /// a `Tmpfs` whose path is a strict prefix of another mapped entry
    /// degrades to a plain `Dir`, since the child mount already isolates it.
    pub fn render_sorted(&self) -> Vec<(PathBuf, Exposure)> {
        let mut entries: Vec<(PathBuf, Exposure)> = self.entries.iter().map(|(p, e)| (p.clone(), e.clone())).collect();
        entries.sort_by(|(a, _), (b, _)| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)));

        for i in 0..entries.len() {
            if !matches!(entries[i].1, Exposure::Tmpfs) {
                continue;
            }

            let parent = entries[i].0.clone();
            let has_child = entries.iter().any(|(p, _)| p != &parent && p.starts_with(&parent));

            if has_child {
                entries[i].1 = Exposure::Dir;
            }
        }

        entries
    }

    /// Resolves `path` through the plan's own symlink entries, reporting
    /// whether it lands on a mapped (non-hidden) entry inside the sandbox.
    pub fn visibility_query(&self, path: &Path) -> bool {
        if self.hidden.contains_key(path) {
            return false;
        }

        let mut current = path.to_path_buf();

        for _ in 0..SYMLINK_RECURSION_LIMIT {
            if self.hidden.contains_key(&current) {
                return false;
            }

            match self.entries.get(&current) {
                Some(Exposure::Symlink(target)) => {
                    current = normalize(&current.parent().unwrap_or(Path::new("/")).join(target));
                }
                Some(_) => return true,
                None => {
                    if let Some(parent) = current.parent() {
                        if parent == current {
                            return false;
                        }

                        current = parent.to_path_buf();
                        continue;
                    }

                    return false;
                }
            }
        }

        false
    }

    fn insert_bind(&mut self, path: PathBuf, mode: FsMode) {
        if mode.is_negated() {
            self.entries.shift_remove(&path);
            self.hidden.insert(path, ());
            return;
        }

        self.hidden.shift_remove(&path);

        let merged = match self.entries.get(&path) {
            Some(Exposure::Bind(existing)) => existing.stronger(mode),
            _ => mode,
        };

        self.entries.insert(path, Exposure::Bind(merged));
    }

    fn insert_dir(&mut self, path: PathBuf) {
        self.entries.entry(path).or_insert(Exposure::Dir);
    }

    fn insert_tmpfs(&mut self, path: PathBuf) {
        self.entries.entry(path).or_insert(Exposure::Tmpfs);
    }

    fn insert_symlink(&mut self, path: PathBuf, target: PathBuf) {
        self.entries.insert(path, Exposure::Symlink(target));
    }
}

fn depth(path: &Path) -> usize {
    path.components().count()
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");

    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }

    out
}

fn is_protected(path: &Path) -> bool {
    PROTECTED_PREFIXES.iter().any(|prefix| path == Path::new(prefix) || path.starts_with(prefix))
}

/// Builds the exposure plan for a finalized context. `app_data_dir` is the
/// per-instance writable directory that must remain reachable even when the
/// host root is hidden behind a tmpfs. The user-scope install root
/// (`USER_INSTALL_ROOT`, the parent of every per-app instance directory) is
/// always hidden behind its own tmpfs, independent of `app_data_dir`.
pub fn plan(context: &Context, app_data_dir: Option<&Path>) -> Result<ExposurePlan, ExposureError> {
    let mut plan = ExposurePlan::default();
    let mut home_access = false;

    let host_mode = context.filesystems.get("host").copied().filter(|m| !m.is_negated());

    if let Some(mode) = host_mode {
        for entry in fs::read_dir("/").map_err(|e| ExposureError::Io(PathBuf::from("/"), e))? {
            let entry = entry.map_err(|e| ExposureError::Io(PathBuf::from("/"), e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if HOST_BLACKLIST.contains(&name.as_ref()) {
                continue;
            }

            expose(&mut plan, mode, &entry.path(), 0)?;
        }

        expose(&mut plan, mode, Path::new("/run/media"), 0)?;
        home_access = true;
    }

    if let Some(mode) = context.filesystems.get("home").copied().filter(|m| !m.is_negated()) {
        let resolved = host_mode.map(|h| h.stronger(mode)).unwrap_or(mode);
        expose(&mut plan, resolved, Path::new(*HOME), 0)?;
        home_access = true;
    }

    let _ = home_access;

    for (spec, mode) in &context.filesystems {
        if spec == "host" || spec == "home" || mode.is_negated() {
            continue;
        }

        let Some(resolved) = resolve_spec(spec) else { continue };

        if *mode == FsMode::Create && !resolved.exists() {
            fs::create_dir_all(&resolved).map_err(|e| ExposureError::Io(resolved.clone(), e))?;
        }

        if !resolved.exists() {
            continue;
        }

        expose(&mut plan, *mode, &resolved, 0)?;
    }

    for (spec, mode) in &context.filesystems {
        if mode.is_negated() && spec != "host" && spec != "home" {
            if let Some(resolved) = resolve_spec(spec) {
                plan.hidden.insert(resolved, ());
            }
        }
    }

    if let Some(data_dir) = app_data_dir {
        if let Some(parent) = data_dir.parent() {
            plan.insert_tmpfs(parent.to_path_buf());
        }

        plan.insert_bind(data_dir.to_path_buf(), FsMode::ReadWrite);
    }

    plan.insert_tmpfs(PathBuf::from(&*USER_INSTALL_ROOT));
    plan.insert_dir(PathBuf::from(*HOME));

    Ok(plan)
}

fn resolve_spec(spec: &str) -> Option<PathBuf> {
    if let Some(rest) = spec.strip_prefix("xdg-") {
        return Some(resolve_xdg_dir(rest));
    }

    if let Some(rest) = spec.strip_prefix("~/") {
        return Some(Path::new(*HOME).join(rest));
    }

    if spec == "~" {
        return Some(PathBuf::from(*HOME));
    }

    if let Some(rest) = spec.strip_prefix('/') {
        return Some(PathBuf::from("/").join(rest));
    }

    None
}

/// Resolves an `xdg-<name>[/sub]` spec against `~/.config/user-dirs.dirs`
/// when present, falling back to the XDG-conventional subdirectory name.
fn resolve_xdg_dir(rest: &str) -> PathBuf {
    let (name, sub) = match rest.split_once('/') {
        Some((name, sub)) => (name, Some(sub)),
        None => (rest, None),
    };

    let base = read_user_dirs_file().get(&name.to_uppercase()).cloned().unwrap_or_else(|| {
        let fallback = match name.to_lowercase().as_str() {
            "desktop" => "Desktop",
            "documents" => "Documents",
            "download" => "Downloads",
            "music" => "Music",
            "pictures" => "Pictures",
            "publicshare" => "Public",
            "templates" => "Templates",
            "videos" => "Videos",
            other => other,
        };

        format!("{}/{}", *HOME, fallback)
    });

    match sub {
        Some(sub) => PathBuf::from(base).join(sub),
        None => PathBuf::from(base),
    }
}

fn read_user_dirs_file() -> IndexMap<String, String> {
    let mut out = IndexMap::new();
    let path = format!("{}/.config/user-dirs.dirs", *HOME);

    let Ok(text) = fs::read_to_string(path) else { return out };

    for line in text.lines() {
        let line = line.trim();

        if !line.starts_with("XDG_") {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim().strip_prefix("XDG_").unwrap_or(key).trim_end_matches("_DIR");
        let value = value.trim().trim_matches('"').replace("$HOME", *HOME);
        out.insert(key.to_string(), value);
    }

    out
}

fn expose(plan: &mut ExposurePlan, mode: FsMode, path: &Path, depth: usize) -> Result<(), ExposureError> {
    if depth > SYMLINK_RECURSION_LIMIT {
        return Err(ExposureError::SymlinkLoop(path.to_path_buf()));
    }

    if !path.is_absolute() {
        return Err(ExposureError::NotAbsolute(path.to_path_buf()));
    }

    if is_protected(path) {
        return Err(ExposureError::Protected(path.to_path_buf()));
    }

    let normalized = normalize(path);
    let mut walked = PathBuf::from("/");
    let mut components: Vec<Component> = normalized.components().collect();
    components.remove(0);

    for (i, component) in components.iter().enumerate() {
        walked.push(component.as_os_str());

        if walked == Path::new("/tmp") {
            continue;
        }

        let meta = match fs::symlink_metadata(&walked) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ExposureError::Io(walked.clone(), e)),
        };

        if !meta.file_type().is_symlink() {
            continue;
        }

        let link = fs::read_link(&walked).map_err(|e| ExposureError::Io(walked.clone(), e))?;
        let resolved_target =
            if link.is_absolute() { link.clone() } else { walked.parent().unwrap_or(Path::new("/")).join(&link) };

        let suffix: PathBuf = components[i + 1 ..].iter().collect();
        let full_target = if suffix.as_os_str().is_empty() { resolved_target.clone() } else { resolved_target.join(&suffix) };

        expose(plan, mode, &full_target, depth + 1)?;

        let relative = relative_link(&walked, &resolved_target);
        plan.insert_symlink(walked.clone(), relative);
        return Ok(());
    }

    let meta = match fs::symlink_metadata(&normalized) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ExposureError::Io(normalized, e)),
    };

    let file_type = meta.file_type();

    if !(file_type.is_file() || file_type.is_dir() || file_type.is_symlink() || file_type.is_socket()) {
        return Err(ExposureError::UnsupportedType(normalized));
    }

    plan.insert_bind(normalized, mode);
    Ok(())
}

fn relative_link(from: &Path, to: &Path) -> PathBuf {
    let parent = from.parent().unwrap_or(Path::new("/"));
    let from_components: Vec<_> = parent.components().collect();
    let to_components: Vec<_> = to.components().collect();

    let common = from_components.iter().zip(to_components.iter()).take_while(|(a, b)| a == b).count();

    let mut out = PathBuf::new();

    for _ in common .. from_components.len() {
        out.push("..");
    }

    for component in &to_components[common ..] {
        out.push(component.as_os_str());
    }

    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

trait FileTypeExt {
    fn is_socket(&self) -> bool;
}

impl FileTypeExt for fs::FileType {
    fn is_socket(&self) -> bool {
        use std::os::unix::fs::FileTypeExt as _;
        std::fs::FileType::is_socket(self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn protected_prefix_rejected() {
        let mut plan = ExposurePlan::default();
        let err = expose(&mut plan, FsMode::ReadOnly, Path::new("/usr/lib/foo"), 0);
        assert!(matches!(err, Err(ExposureError::Protected(_))));
    }

    #[test]
    fn relative_path_rejected() {
        let mut plan = ExposurePlan::default();
        let err = expose(&mut plan, FsMode::ReadOnly, Path::new("relative"), 0);
        assert!(matches!(err, Err(ExposureError::NotAbsolute(_))));
    }

    #[test]
    fn symlink_recursion_cap_enforced() {
        let mut plan = ExposurePlan::default();
        let err = expose(&mut plan, FsMode::ReadOnly, Path::new("/home/user"), SYMLINK_RECURSION_LIMIT + 1);
        assert!(matches!(err, Err(ExposureError::SymlinkLoop(_))));
    }

    #[test]
    fn render_sorted_orders_shortest_first() {
        let mut plan = ExposurePlan::default();
        plan.insert_bind(PathBuf::from("/home/user/a/b"), FsMode::ReadOnly);
        plan.insert_bind(PathBuf::from("/home/user"), FsMode::ReadOnly);
        let sorted = plan.render_sorted();
        assert_eq!(sorted[0].0, PathBuf::from("/home/user"));
        assert_eq!(sorted[1].0, PathBuf::from("/home/user/a/b"));
    }

    #[test]
    fn tmpfs_with_mapped_child_degrades_to_dir() {
        let mut plan = ExposurePlan::default();
        plan.insert_tmpfs(PathBuf::from("/run/user/1000/doc"));
        plan.insert_bind(PathBuf::from("/run/user/1000/doc/inner"), FsMode::ReadOnly);
        let sorted = plan.render_sorted();
        let root = sorted.iter().find(|(p, _)| p == Path::new("/run/user/1000/doc")).unwrap();
        assert_eq!(root.1, Exposure::Dir);
    }

    #[test]
    fn negated_entry_hides_prior_bind() {
        let mut plan = ExposurePlan::default();
        plan.insert_bind(PathBuf::from("/srv"), FsMode::ReadOnly);
        assert!(plan.visibility_query(Path::new("/srv")));
        plan.insert_bind(PathBuf::from("/srv"), FsMode::Negated);
        assert!(!plan.visibility_query(Path::new("/srv")));
    }

    #[test]
    fn stronger_bind_wins_on_collision() {
        let mut plan = ExposurePlan::default();
        plan.insert_bind(PathBuf::from("/srv"), FsMode::ReadOnly);
        plan.insert_bind(PathBuf::from("/srv"), FsMode::ReadWrite);
        assert_eq!(plan.get(Path::new("/srv")), Some(&Exposure::Bind(FsMode::ReadWrite)));
    }

    #[test]
    fn plan_hides_user_install_root() {
        let plan = plan(&Context::default(), None).unwrap();
        assert_eq!(plan.get(Path::new(&*USER_INSTALL_ROOT)), Some(&Exposure::Tmpfs));
    }
}
