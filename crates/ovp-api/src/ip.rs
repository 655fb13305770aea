// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

use super::ParseError;
use core::fmt;
use core::fmt::Display;
use core::result;
use core::str::FromStr;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use std::net::Ipv4Addr;

/// A valid IPv4 prefix length.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
    Ord,
    PartialOrd,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Ipv4PrefixLen(u8);

impl TryFrom<u8> for Ipv4PrefixLen {
    type Error = ParseError;

    fn try_from(p: u8) -> Result<Self, Self::Error> {
        Self::new(p)
    }
}

impl From<Ipv4PrefixLen> for u8 {
    fn from(p: Ipv4PrefixLen) -> Self {
        p.0
    }
}

impl Ipv4PrefixLen {
    pub const NETMASK_NONE: Self = Self(0);
    pub const NETMASK_ALL: Self = Self(32);

    pub fn new(prefix_len: u8) -> Result<Self, ParseError> {
        if prefix_len > 32 {
            return Err(ParseError::BadPrefixLen(prefix_len));
        }

        Ok(Self(prefix_len))
    }

    /// The subnet mask as a host-order integer.
    pub fn mask_bits(self) -> u32 {
        match self.0 {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n)),
        }
    }

    /// Convert the prefix length into a subnet mask.
    pub fn to_netmask(self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    pub fn val(&self) -> u8 {
        self.0
    }
}

fn safe_mask(ip: Ipv4Addr, prefix_len: Ipv4PrefixLen) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) & prefix_len.mask_bits())
}

/// An IPv4 CIDR.
///
/// The host bits of the address are always cleared on construction,
/// so two CIDRs naming the same block compare equal no matter how
/// they were written.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Ipv4Cidr {
    ip: Ipv4Addr,
    prefix_len: Ipv4PrefixLen,
}

impl core::cmp::Ord for Ipv4Cidr {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        if self.ip != other.ip {
            self.ip.cmp(&other.ip)
        } else {
            self.prefix_len.cmp(&other.prefix_len)
        }
    }
}

impl core::cmp::PartialOrd for Ipv4Cidr {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Ipv4Cidr {
    type Err = ParseError;

    /// Convert a string like "192.168.2.0/24" into an `Ipv4Cidr`.
    fn from_str(val: &str) -> result::Result<Self, Self::Err> {
        let bad = |reason: &str| ParseError::BadCidr {
            cidr: val.to_string(),
            reason: reason.to_string(),
        };

        let (ip_s, prefix_s) = match val.split_once('/') {
            Some(v) => v,
            None => return Err(bad("no '/' found")),
        };

        let ip = match ip_s.parse::<Ipv4Addr>() {
            Ok(v) => v,
            Err(_) => return Err(bad("bad IP")),
        };

        let raw = match prefix_s.parse::<u8>() {
            Ok(v) => v,
            Err(_) => return Err(bad("bad prefix length")),
        };

        let prefix_len = Ipv4PrefixLen::new(raw)?;
        Ok(Ipv4Cidr::new(ip, prefix_len))
    }
}

impl Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len.val())
    }
}

impl Serialize for Ipv4Cidr {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Ipv4Cidr {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Ipv4Cidr {
    pub fn new(ip: Ipv4Addr, prefix_len: Ipv4PrefixLen) -> Self {
        let ip = safe_mask(ip, prefix_len);
        Ipv4Cidr { ip, prefix_len }
    }

    pub fn new_checked(
        ip: Ipv4Addr,
        prefix_len: u8,
    ) -> Result<Self, ParseError> {
        let pl = Ipv4PrefixLen::new(prefix_len)?;
        Ok(Self::new(ip, pl))
    }

    /// A single-address block.
    pub fn host(ip: Ipv4Addr) -> Self {
        Self { ip, prefix_len: Ipv4PrefixLen::NETMASK_ALL }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn parts(&self) -> (Ipv4Addr, Ipv4PrefixLen) {
        (self.ip, self.prefix_len)
    }

    pub fn prefix_len(self) -> u8 {
        self.prefix_len.val()
    }

    /// Convert the CIDR prefix length into a subnet mask.
    pub fn to_mask(self) -> Ipv4Addr {
        self.prefix_len.to_netmask()
    }

    /// Is this `ip` a member of the CIDR?
    pub fn is_member(&self, ip: Ipv4Addr) -> bool {
        safe_mask(ip, self.prefix_len) == self.ip
    }

    /// Do the two blocks share at least one address?
    ///
    /// CIDR blocks either nest or are disjoint, so it is enough to
    /// test the shorter prefix against the other's network address.
    pub fn overlaps(&self, other: &Self) -> bool {
        if self.prefix_len <= other.prefix_len {
            self.is_member(other.ip)
        } else {
            other.is_member(self.ip)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cidr_masks_host_bits() {
        let cidr: Ipv4Cidr = "10.96.10.1/12".parse().unwrap();
        assert_eq!(cidr.ip(), Ipv4Addr::new(10, 96, 0, 0));
        assert_eq!(cidr.to_string(), "10.96.0.0/12");
        assert_eq!(cidr.to_mask(), Ipv4Addr::new(255, 240, 0, 0));
    }

    #[test]
    fn cidr_membership() {
        let cidr: Ipv4Cidr = "10.96.0.0/12".parse().unwrap();
        assert!(cidr.is_member(Ipv4Addr::new(10, 96, 0, 1)));
        assert!(cidr.is_member(Ipv4Addr::new(10, 111, 255, 255)));
        assert!(!cidr.is_member(Ipv4Addr::new(10, 112, 0, 0)));
        assert!(!cidr.is_member(Ipv4Addr::new(10, 95, 255, 255)));

        let any: Ipv4Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(any.is_member(Ipv4Addr::new(192, 0, 2, 1)));
    }

    #[test]
    fn cidr_overlap() {
        let a: Ipv4Cidr = "10.10.0.0/16".parse().unwrap();
        let b: Ipv4Cidr = "10.10.1.0/24".parse().unwrap();
        let c: Ipv4Cidr = "10.11.0.0/24".parse().unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(!c.overlaps(&b));
    }

    #[test]
    fn cidr_parse_errors() {
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0/8".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/x".parse::<Ipv4Cidr>().is_err());
    }
}
