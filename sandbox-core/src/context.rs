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

//! The permission context (C1): an additive/subtractive capability set that
//! is built up by merging the default permissions, runtime metadata, app
//! metadata, stored overrides and extra CLI context, in that order, before
//! being handed once to the exposure planner and sandbox composer.

use std::fmt::{Display, Formatter, Result as FmtResult};

use indexmap::IndexMap;

use crate::{
    context::{
        caps::{CapSet, Devices, Features, Shares, Sockets},
        fsmode::{BusPolicy, FsMode},
        ini::{join_list, split_list, IniDocument},
    },
    impl_error,
};

pub mod caps;
pub mod cli;
pub mod fsmode;
pub mod ini;

pub use fsmode::{BusPolicy as Policy, FsMode as FilesystemMode};

#[derive(Debug, Clone, Default)]
pub struct Context {
    pub shares: CapSet<Shares>,
    pub sockets: CapSet<Sockets>,
    pub devices: CapSet<Devices>,
    pub features: CapSet<Features>,
    pub env_vars: IndexMap<String, String>,
    pub persistent: IndexMap<String, ()>,
    pub filesystems: IndexMap<String, FsMode>,
    pub session_bus_policy: IndexMap<String, BusPolicy>,
    pub system_bus_policy: IndexMap<String, BusPolicy>,
    pub generic_policy: IndexMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub enum ParseError {
    UnknownName { kind: &'static str, value: String, valid_values: &'static [&'static str] },
    BadBusName(String),
    BadFilesystemSpec(String),
    BadGenericPolicyKey(String),
    NegationNotAllowed(String),
}

impl_error!(ParseError);

impl Display for ParseError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::UnknownName { kind, value, valid_values } =>
                write!(fmter, "Unknown {kind} '{value}'; expected one of: {}", valid_values.join(", ")),
            Self::BadBusName(name) => write!(fmter, "'{name}': not a valid well-known D-Bus name or '.*' pattern."),
            Self::BadFilesystemSpec(spec) => write!(fmter, "'{spec}': not a valid filesystem path-spec."),
            Self::BadGenericPolicyKey(key) => write!(fmter, "'{key}': generic policy keys must be 'subsystem.key'."),
            Self::NegationNotAllowed(value) => write!(fmter, "'{value}': removal values ('!'-prefixed) are not accepted here."),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// The permission set granted before any metadata is loaded: talk rights
    /// to the portal bus names every sandboxed app needs to function.
    pub fn defaults() -> Self {
        let mut ctx = Self::new();
        ctx.session_bus_policy.insert("org.freedesktop.portal.*".into(), BusPolicy::Talk);
        ctx
    }

    pub fn parse(metadata: &str) -> Result<Self, ParseError> {
        let doc = IniDocument::parse(metadata);
        let mut ctx = Self::new();

        if let Some(group) = doc.group("Context") {
            if let Some(value) = group.get("shared") {
                apply_cap_list::<Shares>(&mut ctx.shares, value, "shared capability")?;
            }

            if let Some(value) = group.get("sockets") {
                apply_cap_list::<Sockets>(&mut ctx.sockets, value, "socket")?;
            }

            if let Some(value) = group.get("devices") {
                apply_cap_list::<Devices>(&mut ctx.devices, value, "device")?;
            }

            if let Some(value) = group.get("features") {
                apply_cap_list::<Features>(&mut ctx.features, value, "feature")?;
            }

            if let Some(value) = group.get("filesystems") {
                for entry in split_list(value) {
                    let (negate, spec) = strip_negation(&entry);
                    validate_filesystem_spec(spec)?;

                    if negate {
                        ctx.filesystems.insert(spec.to_string(), FsMode::Negated);
                    } else {
                        ctx.filesystems.insert(spec.to_string(), FsMode::ReadOnly);
                    }
                }
            }

            if let Some(value) = group.get("persistent") {
                for entry in split_list(value) {
                    ctx.persistent.insert(entry, ());
                }
            }
        }

        if let Some(group) = doc.group("Environment") {
            for (key, value) in group {
                ctx.env_vars.insert(key.clone(), value.clone());
            }
        }

        if let Some(group) = doc.group("Session Bus Policy") {
            for (name, policy) in group {
                ctx.session_bus_policy.insert(validate_bus_name(name)?.to_string(), parse_policy(policy)?);
            }
        }

        if let Some(group) = doc.group("System Bus Policy") {
            for (name, policy) in group {
                ctx.system_bus_policy.insert(validate_bus_name(name)?.to_string(), parse_policy(policy)?);
            }
        }

        for (group, entries) in doc.groups_with_prefix("Policy") {
            let subsystem = group.trim_start_matches("Policy").trim().to_lowercase();

            for (key, value) in entries {
                let policy_key = format!("{}.{}", subsystem, key);
                validate_generic_policy_key(&policy_key)?;

                let values = ctx.generic_policy.entry(policy_key).or_default();

                for item in split_list(value) {
                    apply_policy_value(values, &item);
                }
            }
        }

        Ok(ctx)
    }

    pub fn load_overrides(bytes: &str) -> Result<Self, ParseError> {
        Self::parse(bytes)
    }

    /// `self` is the lower-priority layer; `other` wins wherever it has an opinion.
    pub fn merge(&mut self, other: &Context) {
        self.shares.merge(&other.shares);
        self.sockets.merge(&other.sockets);
        self.devices.merge(&other.devices);
        self.features.merge(&other.features);

        for (key, value) in &other.env_vars {
            self.env_vars.insert(key.clone(), value.clone());
        }

        for key in other.persistent.keys() {
            self.persistent.insert(key.clone(), ());
        }

        for (key, mode) in &other.filesystems {
            self.filesystems.insert(key.clone(), *mode);
        }

        for (name, policy) in &other.session_bus_policy {
            self.session_bus_policy.insert(name.clone(), *policy);
        }

        for (name, policy) in &other.system_bus_policy {
            self.system_bus_policy.insert(name.clone(), *policy);
        }

        for (key, values) in &other.generic_policy {
            let target = self.generic_policy.entry(key.clone()).or_default();

            for value in values {
                apply_policy_value(target, value);
            }
        }
    }

    pub fn serialize(&self, flatten: bool) -> String {
        let mut doc = IniDocument::default();
        let shares = if flatten { self.shares.flatten() } else { self.shares };
        let sockets = if flatten { self.sockets.flatten() } else { self.sockets };
        let devices = if flatten { self.devices.flatten() } else { self.devices };
        let features = if flatten { self.features.flatten() } else { self.features };

        let shared_list = cap_list(&shares, Shares::all_names(), Shares::from_name);
        let socket_list = cap_list(&sockets, Sockets::all_names(), Sockets::from_name);
        let device_list = cap_list(&devices, Devices::all_names(), Devices::from_name);
        let feature_list = cap_list(&features, Features::all_names(), Features::from_name);

        if !shared_list.is_empty() {
            doc.set("Context", "shared", join_list(shared_list));
        }

        if !socket_list.is_empty() {
            doc.set("Context", "sockets", join_list(socket_list));
        }

        if !device_list.is_empty() {
            doc.set("Context", "devices", join_list(device_list));
        }

        if !feature_list.is_empty() {
            doc.set("Context", "features", join_list(feature_list));
        }

        let fs_list: Vec<String> = self
            .filesystems
            .iter()
            .filter(|(_, mode)| !flatten || !mode.is_negated())
            .map(|(spec, mode)| if mode.is_negated() { format!("!{spec}") } else { spec.clone() })
            .collect();

        if !fs_list.is_empty() {
            doc.set("Context", "filesystems", join_list(fs_list));
        }

        if !self.persistent.is_empty() {
            doc.set("Context", "persistent", join_list(self.persistent.keys().cloned()));
        }

        for (key, value) in &self.env_vars {
            doc.set("Environment", key, value.clone());
        }

        for (name, policy) in &self.session_bus_policy {
            doc.set("Session Bus Policy", name, policy.name());
        }

        for (name, policy) in &self.system_bus_policy {
            doc.set("System Bus Policy", name, policy.name());
        }

        for (key, values) in &self.generic_policy {
            let (subsystem, field) = key.split_once('.').expect("validated at parse time");
            let group = format!("Policy {subsystem}");
            let values: Vec<&String> = values.iter().filter(|v| !flatten || !v.starts_with('!')).collect();

            if !values.is_empty() {
                doc.set(&group, field, join_list(values));
            }
        }

        doc.render()
    }

    /// Emits the CLI argument list that reconstructs this context's
    /// representable subset (§6); bus grants below `Talk` have no CLI surface.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        emit_cap_args(&mut args, &self.shares, "--share=", "--unshare=", Shares::all_names(), Shares::from_name);
        emit_cap_args(&mut args, &self.sockets, "--socket=", "--nosocket=", Sockets::all_names(), Sockets::from_name);
        emit_cap_args(&mut args, &self.devices, "--device=", "--nodevice=", Devices::all_names(), Devices::from_name);
        emit_cap_args(&mut args, &self.features, "--allow=", "--disallow=", Features::all_names(), Features::from_name);

        for (spec, mode) in &self.filesystems {
            match mode {
                FsMode::Negated => args.push(format!("--nofilesystem={spec}")),
                other => match other.suffix() {
                    Some(suffix) => args.push(format!("--filesystem={spec}:{suffix}")),
                    None => args.push(format!("--filesystem={spec}")),
                },
            }
        }

        for path in self.persistent.keys() {
            args.push(format!("--persist={path}"));
        }

        for (key, value) in &self.env_vars {
            args.push(format!("--env={key}={value}"));
        }

        for (name, policy) in &self.session_bus_policy {
            match policy {
                BusPolicy::Own => args.push(format!("--own-name={name}")),
                BusPolicy::Talk => args.push(format!("--talk-name={name}")),
                _ => {}
            }
        }

        for (name, policy) in &self.system_bus_policy {
            match policy {
                BusPolicy::Own => args.push(format!("--system-own-name={name}")),
                BusPolicy::Talk => args.push(format!("--system-talk-name={name}")),
                _ => {}
            }
        }

        for (key, values) in &self.generic_policy {
            for value in values {
                if let Some(removed) = value.strip_prefix('!') {
                    args.push(format!("--remove-policy={key}={removed}"));
                } else {
                    args.push(format!("--add-policy={key}={value}"));
                }
            }
        }

        args
    }
}

fn strip_negation(value: &str) -> (bool, &str) {
    match value.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, value),
    }
}

fn apply_cap_list<T>(caps: &mut CapSet<T>, value: &str, kind: &'static str) -> Result<(), ParseError>
where
    T: Copy + Default + PartialEq + std::ops::BitAnd<Output = T> + std::ops::BitOr<Output = T> + std::ops::Not<Output = T>,
{
    for entry in split_list(value) {
        let (negate, name) = strip_negation(&entry);

        match parse_named_bit::<T>(name, kind)? {
            bit =>
                if negate {
                    caps.deny(bit);
                } else {
                    caps.grant(bit);
                },
        }
    }

    Ok(())
}

fn parse_named_bit<T>(name: &str, kind: &'static str) -> Result<T, ParseError>
where
    T: NamedBits,
{
    T::from_name(name).ok_or_else(|| ParseError::UnknownName {
        kind,
        value: name.to_string(),
        valid_values: T::all_names(),
    })
}

pub trait NamedBits: Sized {
    fn from_name(name: &str) -> Option<Self>;
    fn all_names() -> &'static [&'static str];
}

macro_rules! impl_named_bits {
    ($ty:ty) => {
        impl NamedBits for $ty {
            fn from_name(name: &str) -> Option<Self> {
                <$ty>::from_name(name)
            }

            fn all_names() -> &'static [&'static str] {
                <$ty>::all_names()
            }
        }
    };
}

impl_named_bits!(Shares);
impl_named_bits!(Sockets);
impl_named_bits!(Devices);
impl_named_bits!(Features);

fn cap_list<T>(caps: &CapSet<T>, names: &'static [&'static str], from_name: fn(&str) -> Option<T>) -> Vec<String>
where
    T: Copy + Default + PartialEq + std::ops::BitAnd<Output = T> + std::ops::BitOr<Output = T> + std::ops::Not<Output = T>,
{
    let mut out = Vec::new();

    for name in names {
        let bit = from_name(name).expect("name table is exhaustive");

        if caps.is_granted(bit) {
            out.push(name.to_string());
        } else if caps.is_denied(bit) {
            out.push(format!("!{name}"));
        }
    }

    out
}

fn emit_cap_args<T>(
    args: &mut Vec<String>,
    caps: &CapSet<T>,
    grant_prefix: &str,
    deny_prefix: &str,
    names: &'static [&'static str],
    from_name: fn(&str) -> Option<T>,
) where
    T: Copy + Default + PartialEq + std::ops::BitAnd<Output = T> + std::ops::BitOr<Output = T> + std::ops::Not<Output = T>,
{
    for name in names {
        let bit = from_name(name).expect("name table is exhaustive");

        if caps.is_granted(bit) {
            args.push(format!("{grant_prefix}{name}"));
        } else if caps.is_denied(bit) {
            args.push(format!("{deny_prefix}{name}"));
        }
    }
}

fn parse_policy(value: &str) -> Result<BusPolicy, ParseError> {
    BusPolicy::from_name(value).ok_or_else(|| ParseError::UnknownName {
        kind: "bus policy",
        value: value.to_string(),
        valid_values: &["none", "see", "filtered", "talk", "own"],
    })
}

/// `filesystems` path-specs: `host`, `home`, `xdg-<name>[/sub]`, `~/sub`, `/sub`.
fn validate_filesystem_spec(spec: &str) -> Result<(), ParseError> {
    if spec == "host" || spec == "home" {
        return Ok(());
    }

    if let Some(rest) = spec.strip_prefix("xdg-") {
        if rest.is_empty() {
            return Err(ParseError::BadFilesystemSpec(spec.into()));
        }

        return Ok(());
    }

    if spec.starts_with("~/") || spec == "~" {
        return Ok(());
    }

    if spec.starts_with('/') && spec.len() > 1 {
        return Ok(());
    }

    Err(ParseError::BadFilesystemSpec(spec.into()))
}

fn validate_generic_policy_key(key: &str) -> Result<(), ParseError> {
    match key.split_once('.') {
        Some((subsystem, field)) if !subsystem.is_empty() && !field.is_empty() && !field.contains('.') => Ok(()),
        _ => Err(ParseError::BadGenericPolicyKey(key.into())),
    }
}

/// A value removes any existing entry whose raw text (leading `!` stripped)
/// equals its own raw text, then is appended verbatim. This makes merges
/// order-independent in their last-writer semantics: a later `!X` shadows an
/// earlier `X` and vice versa, and applying the same value twice is a no-op
/// beyond moving it to the end.
pub fn apply_policy_value(values: &mut Vec<String>, value: &str) {
    let bare = value.strip_prefix('!').unwrap_or(value);
    values.retain(|existing| existing.strip_prefix('!').unwrap_or(existing) != bare);
    values.push(value.to_string());
}

/// Well-known D-Bus names are dot-separated, each element non-empty and not
/// starting with a digit; unique (`:`-prefixed) names are rejected. A `.*`
/// suffix is allowed in policy patterns, matching any name under the prefix.
fn validate_bus_name(name: &str) -> Result<&str, ParseError> {
    let base = name.strip_suffix(".*").unwrap_or(name);
    let valid = !base.is_empty()
        && !base.starts_with(':')
        && base.contains('.')
        && base.split('.').all(|elem| {
            !elem.is_empty() && !elem.chars().next().unwrap().is_ascii_digit() && elem.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });

    if valid {
        Ok(name)
    } else {
        Err(ParseError::BadBusName(name.into()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn merge_idempotence_self() {
        let mut a = Context::parse("[Context]\nshared=network\nfilesystems=home:rw\n").unwrap();
        a.filesystems.insert("home".into(), FsMode::ReadWrite);
        let snapshot = a.clone();
        let other = a.clone();
        a.merge(&other);
        assert_eq!(a.shares, snapshot.shares);
        assert_eq!(a.filesystems, snapshot.filesystems);
    }

    #[test]
    fn merge_idempotence_empty() {
        let mut a = Context::parse("[Context]\nshared=network;!ipc\n").unwrap();
        let snapshot = a.clone();
        a.merge(&Context::new());
        assert_eq!(a.shares, snapshot.shares);
    }

    #[test]
    fn round_trip_parse_serialize() {
        let original = "[Context]\nshared=network;!ipc\nsockets=x11\nfilesystems=host;!home\n\n[Environment]\nFOO=bar\n";
        let ctx = Context::parse(original).unwrap();
        let serialized = ctx.serialize(false);
        let reparsed = Context::parse(&serialized).unwrap();

        assert_eq!(ctx.shares, reparsed.shares);
        assert_eq!(ctx.sockets, reparsed.sockets);
        assert_eq!(ctx.filesystems, reparsed.filesystems);
        assert_eq!(ctx.env_vars, reparsed.env_vars);
    }

    #[test]
    fn flatten_soundness_grants_survive() {
        let mut ctx = Context::new();
        ctx.shares.grant(Shares::NETWORK);
        ctx.shares.deny(Shares::IPC);

        let flat = Context::parse(&ctx.serialize(true)).unwrap();
        let mut merged = Context::new();
        merged.merge(&flat);

        assert!(merged.shares.is_granted(Shares::NETWORK));
        assert!(!merged.shares.is_denied(Shares::IPC));
        assert!(!merged.shares.is_granted(Shares::IPC));
    }

    #[test]
    fn cli_round_trip() {
        let mut ctx = Context::new();
        ctx.shares.grant(Shares::NETWORK);
        ctx.sockets.deny(Sockets::X11);
        ctx.filesystems.insert("home".into(), FsMode::ReadWrite);
        ctx.persistent.insert(".config/app".into(), ());
        ctx.session_bus_policy.insert("org.example.A".into(), BusPolicy::Own);

        let args = ctx.to_cli_args();
        let reparsed = crate::context::cli::parse_cli_args(&args).unwrap();

        assert!(reparsed.shares.is_granted(Shares::NETWORK));
        assert!(reparsed.sockets.is_denied(Sockets::X11));
        assert_eq!(reparsed.filesystems.get("home"), Some(&FsMode::ReadWrite));
        assert!(reparsed.persistent.contains_key(".config/app"));
        assert_eq!(reparsed.session_bus_policy.get("org.example.A"), Some(&BusPolicy::Own));
    }

    #[test]
    fn generic_policy_merge_sequence() {
        let mut values = Vec::new();
        apply_policy_value(&mut values, "foo");
        apply_policy_value(&mut values, "!foo");
        apply_policy_value(&mut values, "foo");
        assert_eq!(values, vec!["foo".to_string()]);
    }

    #[test]
    fn policy_merge_last_writer_wins() {
        let mut metadata = Context::new();
        metadata.session_bus_policy.insert("org.example.A".into(), BusPolicy::Talk);

        let mut overrides = Context::new();
        overrides.session_bus_policy.insert("org.example.A".into(), BusPolicy::Own);

        metadata.merge(&overrides);
        assert_eq!(metadata.session_bus_policy.get("org.example.A"), Some(&BusPolicy::Own));
        assert_eq!(metadata.to_cli_args(), vec!["--own-name=org.example.A".to_string()]);
    }

    #[test]
    fn rejects_unique_bus_names() {
        assert!(validate_bus_name(":1.42").is_err());
    }

    #[test]
    fn rejects_malformed_filesystem_spec() {
        assert!(validate_filesystem_spec("relative/path").is_err());
        assert!(validate_filesystem_spec("/abs").is_ok());
        assert!(validate_filesystem_spec("xdg-music/Podcasts").is_ok());
    }

    #[test]
    fn rejects_bad_generic_policy_key() {
        assert!(validate_generic_policy_key("nodot").is_err());
        assert!(validate_generic_policy_key("a.b.c").is_err());
        assert!(validate_generic_policy_key("a.b").is_ok());
    }
}
