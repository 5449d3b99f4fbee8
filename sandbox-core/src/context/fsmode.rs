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

use std::cmp::Ordering;

/// Requested mode for a `filesystems` path-spec entry. `Negated` shadows any
/// broader rule that would otherwise expose the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsMode {
    ReadOnly,
    ReadWrite,
    Create,
    Negated,
}

impl FsMode {
    pub fn from_suffix(suffix: Option<&str>) -> Option<Self> {
        match suffix {
            None => Some(Self::ReadOnly),
            Some("ro") => Some(Self::ReadOnly),
            Some("rw") => Some(Self::ReadWrite),
            Some("create") => Some(Self::Create),
            _ => None,
        }
    }

    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Self::ReadOnly => None,
            Self::ReadWrite => Some("rw"),
            Self::Create => Some("create"),
            Self::Negated => None,
        }
    }

    /// Ordering used to resolve two rules targeting the same exposed path:
    /// `ReadWrite` beats `ReadOnly`; `Create` only affects allocation, not the
    /// resulting access mode, so it is treated as equivalent to `ReadOnly` here.
    fn rank(self) -> u8 {
        match self {
            Self::Negated => 0,
            Self::ReadOnly => 1,
            Self::Create => 1,
            Self::ReadWrite => 2,
        }
    }

    pub fn stronger(self, other: Self) -> Self {
        match self.rank().cmp(&other.rank()) {
            Ordering::Less => other,
            _ => self,
        }
    }

    pub fn is_negated(self) -> bool {
        matches!(self, Self::Negated)
    }
}

/// Ordinal D-Bus policy grant, from least to most privileged. Ordering matters:
/// `PartialOrd`/`Ord` let callers compute "the most privileged of two rules".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BusPolicy {
    None,
    See,
    Filtered,
    Talk,
    Own,
}

impl BusPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::None),
            "see" => Some(Self::See),
            "filtered" => Some(Self::Filtered),
            "talk" => Some(Self::Talk),
            "own" => Some(Self::Own),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::See => "see",
            Self::Filtered => "filtered",
            Self::Talk => "talk",
            Self::Own => "own",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stronger_prefers_readwrite() {
        assert_eq!(FsMode::ReadOnly.stronger(FsMode::ReadWrite), FsMode::ReadWrite);
        assert_eq!(FsMode::ReadWrite.stronger(FsMode::ReadOnly), FsMode::ReadWrite);
    }

    #[test]
    fn policy_ordinal_ordering() {
        assert!(BusPolicy::Own > BusPolicy::Talk);
        assert!(BusPolicy::Talk > BusPolicy::Filtered);
        assert!(BusPolicy::Filtered > BusPolicy::See);
        assert!(BusPolicy::See > BusPolicy::None);
    }
}
