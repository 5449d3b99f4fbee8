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

//! Parses the `--share=`/`--filesystem=`/`--env=`/... flag surface (§6) back
//! into a [`Context`], the inverse of [`Context::to_cli_args`].

use crate::context::{
    caps::{Devices, Features, Shares, Sockets},
    fsmode::{BusPolicy, FsMode},
    Context,
    NamedBits,
    ParseError,
};

pub fn parse_cli_args<S: AsRef<str>>(args: &[S]) -> Result<Context, ParseError> {
    let mut ctx = Context::new();

    for arg in args {
        let arg = arg.as_ref();
        let (flag, value) = arg.split_once('=').ok_or_else(|| ParseError::BadFilesystemSpec(arg.into()))?;

        match flag {
            "--share" => grant_named::<Shares>(&mut ctx.shares, value, "shared capability")?,
            "--unshare" => deny_named::<Shares>(&mut ctx.shares, value, "shared capability")?,
            "--socket" => grant_named::<Sockets>(&mut ctx.sockets, value, "socket")?,
            "--nosocket" => deny_named::<Sockets>(&mut ctx.sockets, value, "socket")?,
            "--device" => grant_named::<Devices>(&mut ctx.devices, value, "device")?,
            "--nodevice" => deny_named::<Devices>(&mut ctx.devices, value, "device")?,
            "--allow" => grant_named::<Features>(&mut ctx.features, value, "feature")?,
            "--disallow" => deny_named::<Features>(&mut ctx.features, value, "feature")?,
            "--filesystem" => {
                let (spec, suffix) = match value.rsplit_once(':') {
                    Some((spec, suffix)) if FsMode::from_suffix(Some(suffix)).is_some() => (spec, Some(suffix)),
                    _ => (value, None),
                };
                let mode = FsMode::from_suffix(suffix).ok_or_else(|| ParseError::BadFilesystemSpec(value.into()))?;
                ctx.filesystems.insert(spec.to_string(), mode);
            }
            "--nofilesystem" => {
                ctx.filesystems.insert(value.to_string(), FsMode::Negated);
            }
            "--persist" => {
                ctx.persistent.insert(value.to_string(), ());
            }
            "--env" => {
                let (key, val) = value.split_once('=').ok_or_else(|| ParseError::BadFilesystemSpec(arg.into()))?;
                ctx.env_vars.insert(key.to_string(), val.to_string());
            }
            "--own-name" => {
                ctx.session_bus_policy.insert(value.to_string(), BusPolicy::Own);
            }
            "--talk-name" => {
                ctx.session_bus_policy.insert(value.to_string(), BusPolicy::Talk);
            }
            "--system-own-name" => {
                ctx.system_bus_policy.insert(value.to_string(), BusPolicy::Own);
            }
            "--system-talk-name" => {
                ctx.system_bus_policy.insert(value.to_string(), BusPolicy::Talk);
            }
            "--add-policy" | "--remove-policy" => {
                let (key, val) = value.split_once('=').ok_or_else(|| ParseError::BadFilesystemSpec(arg.into()))?;
                let entries = ctx.generic_policy.entry(key.to_string()).or_default();
                let raw = if flag == "--remove-policy" { format!("!{val}") } else { val.to_string() };
                crate::context::apply_policy_value(entries, &raw);
            }
            _ => return Err(ParseError::UnknownName { kind: "CLI flag", value: flag.into(), valid_values: &[] }),
        }
    }

    Ok(ctx)
}

fn grant_named<T: NamedBits + Copy>(
    caps: &mut crate::context::caps::CapSet<T>,
    name: &str,
    kind: &'static str,
) -> Result<(), ParseError>
where
    T: Default + PartialEq + std::ops::BitAnd<Output = T> + std::ops::BitOr<Output = T> + std::ops::Not<Output = T>,
{
    let bit = T::from_name(name).ok_or_else(|| ParseError::UnknownName { kind, value: name.into(), valid_values: T::all_names() })?;
    caps.grant(bit);
    Ok(())
}

fn deny_named<T: NamedBits + Copy>(
    caps: &mut crate::context::caps::CapSet<T>,
    name: &str,
    kind: &'static str,
) -> Result<(), ParseError>
where
    T: Default + PartialEq + std::ops::BitAnd<Output = T> + std::ops::BitOr<Output = T> + std::ops::Not<Output = T>,
{
    let bit = T::from_name(name).ok_or_else(|| ParseError::UnknownName { kind, value: name.into(), valid_values: T::all_names() })?;
    caps.deny(bit);
    Ok(())
}
