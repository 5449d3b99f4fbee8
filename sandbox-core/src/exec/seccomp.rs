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

//! Builds the seccomp filter applied to the sandboxed process (§4.9): allow
//! by default, deny a fixed set of syscalls known to enable container escape
//! or fingerprinting, gated further by the final [`Context`]'s `devel` and
//! `multiarch` features.
//!
//! Syscall blocklist derived from `flatpak-run.c` in the flatpak project:
//! <https://github.com/flatpak/flatpak/blob/main/common/flatpak-run.c#L1835>

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    os::fd::AsRawFd,
};

use libseccomp::{ScmpAction as Action, ScmpArch, ScmpArgCompare as Compare, ScmpCompareOp as Op, ScmpFilterContext, ScmpSyscall as Syscall};
use nix::libc;
use os_pipe::{PipeReader, PipeWriter};

use crate::{context::Context, impl_error};

#[derive(Debug)]
pub enum SeccompError {
    Context(String),
    Arch(String),
    Rule(String),
    Export(std::io::Error),
}

impl_error!(SeccompError);

impl Display for SeccompError {
    fn fmt(&self, fmter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Context(err) => write!(fmter, "failed to allocate seccomp filter: {err}"),
            Self::Arch(err) => write!(fmter, "failed to register architecture: {err}"),
            Self::Rule(err) => write!(fmter, "failed to add seccomp rule: {err}"),
            Self::Export(err) => write!(fmter, "failed to export BPF program: {err}"),
        }
    }
}

static EPERM: Action = Action::Errno(libc::EPERM);
static EAFNOSUPPORT: Action = Action::Errno(libc::EAFNOSUPPORT);

/// `personality.h`'s `PER_LINUX` / `PER_LINUX32`; the filter rejects every
/// other personality value outright.
const PER_LINUX: u64 = 0x0000;
const PER_LINUX32: u64 = 0x0008;

/// Syscalls refused unconditionally (§4.9, first bullet).
static UNCONDITIONAL: &[&str] = &[
    "syslog",
    "uselib",
    "acct",
    "modify_ldt",
    "quotactl",
    "add_key",
    "keyctl",
    "request_key",
    "move_pages",
    "mbind",
    "get_mempolicy",
    "set_mempolicy",
    "migrate_pages",
    "unshare",
    "mount",
    "pivot_root",
];

/// Refused only when the `devel` feature is not granted.
static DEVEL_GATED: &[&str] = &["perf_event_open", "ptrace"];

/// `socket(2)` address families refused outright, plus a range check for
/// everything numerically past `AF_NETLINK`.
static BLOCKED_FAMILIES: &[i32] = &[
    libc::AF_AX25,
    libc::AF_IPX,
    libc::AF_APPLETALK,
    libc::AF_NETROM,
    libc::AF_BRIDGE,
    libc::AF_ATMPVC,
    libc::AF_X25,
    libc::AF_ROSE,
    libc::AF_DECnet,
    libc::AF_NETBEUI,
    libc::AF_SECURITY,
    libc::AF_KEY,
];

/// Parameters derived from a finalized [`Context`] that the filter compiler
/// needs: whether `devel`/`multiarch` are granted and the target architecture
/// when it differs from the host, so 32-bit personality switches are covered.
pub struct SeccompParams {
    pub devel: bool,
    pub multiarch: bool,
    pub foreign_arch: Option<ScmpArch>,
}

impl SeccompParams {
    pub fn from_context(context: &Context, foreign_arch: Option<ScmpArch>) -> Self {
        use crate::context::caps::Features;
        Self {
            devel: context.features.is_granted(Features::DEVEL),
            multiarch: context.features.is_granted(Features::MULTIARCH),
            foreign_arch,
        }
    }

    /// `allowed_personality` (§4.9): `PER_LINUX32` iff the target is a 32-bit
    /// variant of a 64-bit host and `multiarch` is granted, else `PER_LINUX`.
    pub fn allowed_personality(&self) -> u64 {
        match (self.foreign_arch, self.multiarch) {
            (Some(arch), true) if is_32_bit(arch) => PER_LINUX32,
            _ => PER_LINUX,
        }
    }
}

fn is_32_bit(arch: ScmpArch) -> bool {
    matches!(arch, ScmpArch::X86 | ScmpArch::Arm)
}

/// Builds and exports the BPF program, returning the fd to pass via
/// `--seccomp`. The program is allow-by-default; every rule below narrows it.
pub fn build(params: &SeccompParams, reader: &PipeReader, mut writer: PipeWriter) -> Result<i32, SeccompError> {
    let mut filter = ScmpFilterContext::new_filter(Action::Allow).map_err(|e| SeccompError::Context(e.to_string()))?;

    filter.add_arch(ScmpArch::Native).map_err(|e| SeccompError::Arch(e.to_string()))?;

    if let Some(arch) = params.foreign_arch {
        filter.add_arch(arch).map_err(|e| SeccompError::Arch(e.to_string()))?;

        if params.multiarch {
            match arch {
                ScmpArch::X8664 => {
                    let _ = filter.add_arch(ScmpArch::X86);
                }
                ScmpArch::Aarch64 => {
                    let _ = filter.add_arch(ScmpArch::Arm);
                }
                _ => {}
            }
        }
    }

    for name in UNCONDITIONAL {
        add_rule(&mut filter, name, EPERM)?;
    }

    if !params.devel {
        for name in DEVEL_GATED {
            add_rule(&mut filter, name, EPERM)?;
        }
    }

    add_conditional(&mut filter, "personality", EPERM, Compare::new(0, Op::NotEqual, params.allowed_personality()))?;
    add_conditional(
        &mut filter,
        "clone",
        EPERM,
        Compare::new(0, Op::MaskedEqual(libc::CLONE_NEWUSER as u64), libc::CLONE_NEWUSER as u64),
    )?;
    add_conditional(&mut filter, "ioctl", EPERM, Compare::new(1, Op::MaskedEqual(libc::TIOCSTI as u64), libc::TIOCSTI as u64))?;

    for family in BLOCKED_FAMILIES {
        add_conditional(&mut filter, "socket", EAFNOSUPPORT, Compare::new(0, Op::Equal, *family as u64))?;
    }

    add_conditional(&mut filter, "socket", EAFNOSUPPORT, Compare::new(0, Op::GreaterThan, libc::AF_NETLINK as u64))?;

    filter.export_bpf(&mut writer).map_err(SeccompError::Export)?;
    Ok(reader.as_raw_fd())
}

fn add_rule(filter: &mut ScmpFilterContext, name: &str, action: Action) -> Result<(), SeccompError> {
    let syscall = Syscall::from_name(name).map_err(|e| SeccompError::Rule(format!("{name}: {e}")))?;
    filter.add_rule(action, syscall).map_err(|e| SeccompError::Rule(format!("{name}: {e}")))
}

fn add_conditional(filter: &mut ScmpFilterContext, name: &str, action: Action, compare: Compare) -> Result<(), SeccompError> {
    let syscall = Syscall::from_name(name).map_err(|e| SeccompError::Rule(format!("{name}: {e}")))?;
    filter.add_rule_conditional(action, syscall, &[compare]).map_err(|e| SeccompError::Rule(format!("{name}: {e}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::caps::Features;

    #[test]
    fn devel_lifts_ptrace_gate() {
        let mut ctx = Context::new();
        let params = SeccompParams::from_context(&ctx, None);
        assert!(!params.devel);

        ctx.features.grant(Features::DEVEL);
        let params = SeccompParams::from_context(&ctx, None);
        assert!(params.devel);
    }

    #[test]
    fn personality_defaults_to_per_linux() {
        let ctx = Context::new();
        let params = SeccompParams::from_context(&ctx, None);
        assert_eq!(params.allowed_personality(), PER_LINUX);
    }

    #[test]
    fn multiarch_32bit_target_allows_per_linux32() {
        let mut ctx = Context::new();
        ctx.features.grant(Features::MULTIARCH);
        let params = SeccompParams::from_context(&ctx, Some(ScmpArch::X86));
        assert_eq!(params.allowed_personality(), PER_LINUX32);
    }

    #[test]
    fn without_multiarch_32bit_target_stays_per_linux() {
        let ctx = Context::new();
        let params = SeccompParams::from_context(&ctx, Some(ScmpArch::X86));
        assert_eq!(params.allowed_personality(), PER_LINUX);
    }
}
