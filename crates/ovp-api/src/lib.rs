// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Value types shared by the flow engine, the pipeline generators and
//! the administration tool.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

pub mod ip;
pub mod mac;

pub use ip::*;
pub use mac::*;

/// An error produced while parsing one of the API value types from
/// its textual form.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("bad MAC address {addr:?}: {reason}")]
    BadMac { addr: String, reason: String },

    #[error("bad IPv4 address {0:?}")]
    BadIpv4(String),

    #[error("bad IPv4 CIDR {cidr:?}: {reason}")]
    BadCidr { cidr: String, reason: String },

    #[error("bad prefix length: {0}")]
    BadPrefixLen(u8),

    #[error("bad OpenFlow port {0:?}")]
    BadPort(String),
}

/// An OpenFlow port number on the bridge.
///
/// Port numbers are assigned by the switch when an interface is
/// attached. Zero is never a valid interface port.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct OfPort(u32);

impl OfPort {
    pub const fn new(port: u32) -> Self {
        Self(port)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for OfPort {
    fn from(port: u32) -> Self {
        Self(port)
    }
}

impl From<OfPort> for u32 {
    fn from(port: OfPort) -> Self {
        port.0
    }
}

impl FromStr for OfPort {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(Self)
            .map_err(|_| ParseError::BadPort(s.to_string()))
    }
}

impl Display for OfPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
