// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

use super::ParseError;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use core::ops::Deref;
use core::str::FromStr;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

/// A MAC address.
#[derive(Clone, Copy, Default, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct MacAddr {
    inner: [u8; 6],
}

impl MacAddr {
    pub const BROADCAST: Self = Self { inner: [0xFF; 6] };
    pub const ZERO: Self = Self { inner: [0x00; 6] };

    /// Return the bytes of the MAC address.
    #[inline]
    pub fn bytes(&self) -> [u8; 6] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }

    /// The address packed into the low 48 bits of a `u64`, most
    /// significant octet first.
    ///
    /// This is the layout the switch uses when an Ethernet address is
    /// copied into a wider metadata field such as `ct_label`.
    pub fn to_u64(&self) -> u64 {
        self.inner.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
    }

    /// The inverse of [`MacAddr::to_u64()`]; bits above 47 are ignored.
    pub fn from_u64(val: u64) -> Self {
        let b = val.to_be_bytes();
        Self { inner: [b[2], b[3], b[4], b[5], b[6], b[7]] }
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }
}

impl From<&[u8; 6]> for MacAddr {
    fn from(bytes: &[u8; 6]) -> Self {
        Self { inner: *bytes }
    }
}

impl AsRef<[u8]> for MacAddr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl Deref for MacAddr {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl FromStr for MacAddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = |reason: String| ParseError::BadMac {
            addr: s.to_string(),
            reason,
        };

        let octets: Vec<u8> = s
            .split(':')
            .map(|o| {
                if o.is_empty() || o.len() > 2 {
                    return Err(bad(format!("bad octet: {o:?}")));
                }
                u8::from_str_radix(o, 16)
                    .map_err(|_| bad(format!("bad octet: {o:?}")))
            })
            .collect::<Result<Vec<u8>, _>>()?;

        let bytes: [u8; 6] = octets.as_slice().try_into().map_err(|_| {
            bad(format!("incorrect number of bytes: {}", octets.len()))
        })?;

        Ok(MacAddr { inner: bytes })
    }
}

// The switch prints and parses Ethernet addresses in lower case;
// keeping the same form here lets rendered flows be compared against
// `ovs-ofctl dump-flows` output verbatim.
impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.inner[0],
            self.inner[1],
            self.inner[2],
            self.inner[3],
            self.inner[4],
            self.inner[5]
        )
    }
}

// There's no reason to view the MAC address as its raw array, so just
// present it in a human-friendly manner.
impl Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MacAddr {{ inner: {self} }}")
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
