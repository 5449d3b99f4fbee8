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

//! Three-valued capability bitmasks.
//!
//! A plain bitmask cannot express "explicitly denied" versus "never mentioned",
//! which later merge layers need in order to let a lower-priority deny survive
//! a higher layer's silence. Each capability group is a pair of bitmasks,
//! `enabled` and `valid`: a bit is granted iff set in both, denied iff set in
//! `valid` but clear in `enabled`, and unspecified iff clear in `valid`.

use std::ops::{BitAnd, BitOr, Not};

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Shares: u8 {
        const NETWORK = 0b0000_0001;
        const IPC      = 0b0000_0010;
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Sockets: u8 {
        const X11         = 0b0000_0001;
        const WAYLAND      = 0b0000_0010;
        const PULSEAUDIO   = 0b0000_0100;
        const SESSION_BUS  = 0b0000_1000;
        const SYSTEM_BUS   = 0b0001_0000;
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Devices: u8 {
        const DRI = 0b0000_0001;
        const ALL = 0b0000_0010;
        const KVM = 0b0000_0100;
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct Features: u8 {
        const DEVEL     = 0b0000_0001;
        const MULTIARCH = 0b0000_0010;
    }
}

macro_rules! named_bits {
    ($ty:ident, $( $bit:expr => $name:expr ),+ $(,)?) => {
        impl $ty {
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $( $name => Some($bit), )+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                $( if self == $bit { return $name; } )+
                "unknown"
            }

            pub fn all_names() -> &'static [&'static str] {
                &[ $( $name ),+ ]
            }
        }
    };
}

named_bits!(Shares, Self::NETWORK => "network", Self::IPC => "ipc");
named_bits!(
    Sockets,
    Self::X11 => "x11",
    Self::WAYLAND => "wayland",
    Self::PULSEAUDIO => "pulseaudio",
    Self::SESSION_BUS => "session-bus",
    Self::SYSTEM_BUS => "system-bus",
);
named_bits!(Devices, Self::DRI => "dri", Self::ALL => "all", Self::KVM => "kvm");
named_bits!(Features, Self::DEVEL => "devel", Self::MULTIARCH => "multiarch");

/// A tri-state capability group: `enabled` bits are only meaningful where the
/// matching `valid` bit is also set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapSet<T> {
    pub enabled: T,
    pub valid: T,
}

impl<T> CapSet<T>
where
    T: Copy + Default + PartialEq + BitAnd<Output = T> + BitOr<Output = T> + Not<Output = T>,
{
    pub fn new() -> Self {
        Self {
            enabled: T::default(),
            valid: T::default(),
        }
    }

    pub fn grant(&mut self, bits: T) {
        self.enabled = self.enabled | bits;
        self.valid = self.valid | bits;
    }

    pub fn deny(&mut self, bits: T) {
        self.enabled = self.enabled & !bits;
        self.valid = self.valid | bits;
    }

    pub fn is_granted(&self, bits: T) -> bool {
        (self.enabled & bits) == bits && (self.valid & bits) == bits
    }

    pub fn is_denied(&self, bits: T) -> bool {
        (self.valid & bits) == bits && (self.enabled & bits) != bits
    }

    /// `a.merge(b)`: `b` takes priority over `a` wherever `b` has an opinion.
    pub fn merge(&mut self, other: &CapSet<T>) {
        self.enabled = (self.enabled & !other.valid) | other.enabled;
        self.valid = self.valid | other.valid;
    }

    /// Clears the `valid` bits entirely for bits outside `enabled`, so that a
    /// flattened serialization omits denials (they become "unspecified").
    pub fn flatten(&self) -> Self {
        Self {
            enabled: self.enabled,
            valid: self.enabled,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn grant_then_deny_same_bit() {
        let mut caps = CapSet::<Shares>::new();
        caps.grant(Shares::NETWORK);
        assert!(caps.is_granted(Shares::NETWORK));
        caps.deny(Shares::NETWORK);
        assert!(caps.is_denied(Shares::NETWORK));
        assert!(!caps.is_granted(Shares::NETWORK));
    }

    #[test]
    fn merge_lets_later_deny_win() {
        let mut a = CapSet::<Shares>::new();
        a.grant(Shares::NETWORK);

        let mut b = CapSet::<Shares>::new();
        b.deny(Shares::NETWORK);

        a.merge(&b);
        assert!(a.is_denied(Shares::NETWORK));
    }

    #[test]
    fn merge_with_empty_is_identity() {
        let mut a = CapSet::<Shares>::new();
        a.grant(Shares::NETWORK);
        a.deny(Shares::IPC);

        let before = a;
        a.merge(&CapSet::<Shares>::new());
        assert_eq!(a, before);
    }

    #[test]
    fn unspecified_bit_is_neither_granted_nor_denied() {
        let caps = CapSet::<Shares>::new();
        assert!(!caps.is_granted(Shares::IPC));
        assert!(!caps.is_denied(Shares::IPC));
    }
}
