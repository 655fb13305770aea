// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Match fields used for `Flow` matching.

use super::action::Field;
use super::reg::BitRange;
use super::reg::NX_REG_COUNT;
use super::reg::NxReg;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use ovp_api::Ipv4Cidr;
use ovp_api::MacAddr;
use ovp_api::OfPort;
use serde::Deserialize;
use serde::Serialize;
use std::net::Ipv4Addr;

/// The Ethernet payload a flow is restricted to.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum Protocol {
    Ip,
    Arp,
}

impl Protocol {
    pub fn ether_type(self) -> u16 {
        match self {
            Self::Ip => 0x0800,
            Self::Arp => 0x0806,
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ip => write!(f, "ip"),
            Self::Arp => write!(f, "arp"),
        }
    }
}

/// Describe how to match an IPv4 address
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Ipv4AddrMatch {
    /// Match an exact address
    Exact(Ipv4Addr),
    /// Match an address in the same CIDR block
    Prefix(Ipv4Cidr),
}

impl Ipv4AddrMatch {
    fn matches(&self, ip: Ipv4Addr) -> bool {
        match self {
            Self::Exact(addr) => ip == *addr,
            Self::Prefix(cidr) => cidr.is_member(ip),
        }
    }
}

impl Display for Ipv4AddrMatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exact(ip) => write!(f, "{ip}"),
            Self::Prefix(cidr) => write!(f, "{cidr}"),
        }
    }
}

bitflags! {
    /// The connection tracking state of a packet, as reported by the
    /// switch after the packet has passed through `ct()`.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq,
        Serialize,
    )]
    pub struct CtState: u8 {
        /// The start of a new connection.
        const NEW = 1 << 0;
        /// Part of an established connection.
        const EST = 1 << 1;
        /// Related to an established connection.
        const REL = 1 << 2;
        /// In the reply direction.
        const RPL = 1 << 3;
        /// Invalid; conntrack could not make sense of it.
        const INV = 1 << 4;
        /// Tracked; the packet has been through conntrack.
        const TRK = 1 << 5;
    }
}

impl CtState {
    const NAMES: [(CtState, &'static str); 6] = [
        (CtState::NEW, "new"),
        (CtState::EST, "est"),
        (CtState::REL, "rel"),
        (CtState::RPL, "rpl"),
        (CtState::INV, "inv"),
        (CtState::TRK, "trk"),
    ];
}

/// A `ct_state` match: bits in `set` must be on, bits in `unset`
/// must be off, every other bit is a wildcard.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct CtStateMatch {
    set: CtState,
    unset: CtState,
}

impl CtStateMatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `state` to be on.
    pub fn with(mut self, state: CtState) -> Self {
        self.set |= state;
        self.unset &= !state;
        self
    }

    /// Require `state` to be off.
    pub fn without(mut self, state: CtState) -> Self {
        self.unset |= state;
        self.set &= !state;
        self
    }

    pub fn set(&self) -> CtState {
        self.set
    }

    pub fn unset(&self) -> CtState {
        self.unset
    }

    pub fn matches(&self, state: CtState) -> bool {
        state.contains(self.set) && (state & self.unset).is_empty()
    }
}

impl Display for CtStateMatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (flag, name) in CtState::NAMES {
            if self.set.contains(flag) {
                write!(f, "+{name}")?;
            } else if self.unset.contains(flag) {
                write!(f, "-{name}")?;
            }
        }
        Ok(())
    }
}

/// A single predicate of a flow's match.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum MatchField {
    InPort(OfPort),
    EthSrc(MacAddr),
    EthDst(MacAddr),
    Ipv4Src(Ipv4AddrMatch),
    Ipv4Dst(Ipv4AddrMatch),
    ArpOp(u16),
    ArpSha(MacAddr),
    ArpSpa(Ipv4Addr),
    ArpTpa(Ipv4Addr),
    /// Match `value` against the bits `range` of register `reg`.
    Reg { reg: NxReg, range: BitRange, value: u32 },
    CtState(CtStateMatch),
    CtMark(u32),
}

impl MatchField {
    /// The protocol a field implies, if any.
    pub fn protocol(&self) -> Option<Protocol> {
        match self {
            Self::Ipv4Src(_) | Self::Ipv4Dst(_) => Some(Protocol::Ip),
            Self::ArpOp(_)
            | Self::ArpSha(_)
            | Self::ArpSpa(_)
            | Self::ArpTpa(_) => Some(Protocol::Arp),
            _ => None,
        }
    }

    /// Two fields of the same kind may not appear in one flow. The
    /// exception is registers, where disjoint ranges of the same
    /// register are independent sub-fields.
    pub(crate) fn conflicts(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Reg { reg: r1, range: g1, .. },
                Self::Reg { reg: r2, range: g2, .. },
            ) => {
                r1 == r2 && g1.field_mask() & g2.field_mask() != 0
            }
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }

    pub fn is_match(&self, pkt: &PacketFields) -> bool {
        match self {
            Self::InPort(port) => pkt.in_port == Some(*port),
            Self::EthSrc(mac) => pkt.dl_src == *mac,
            Self::EthDst(mac) => pkt.dl_dst == *mac,
            Self::Ipv4Src(m) => pkt.nw_src.is_some_and(|ip| m.matches(ip)),
            Self::Ipv4Dst(m) => pkt.nw_dst.is_some_and(|ip| m.matches(ip)),
            Self::ArpOp(op) => pkt.arp_op == Some(*op),
            Self::ArpSha(mac) => pkt.arp_sha == Some(*mac),
            Self::ArpSpa(ip) => pkt.arp_spa == Some(*ip),
            Self::ArpTpa(ip) => pkt.arp_tpa == Some(*ip),
            Self::Reg { reg, range, value } => {
                let field = u128::from(pkt.regs[usize::from(reg.id())]);
                range.extract(field) == u128::from(*value)
            }
            Self::CtState(m) => m.matches(pkt.ct_state),
            Self::CtMark(mark) => pkt.ct_mark == *mark,
        }
    }
}

impl Display for MatchField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InPort(port) => write!(f, "in_port={port}"),
            Self::EthSrc(mac) => write!(f, "dl_src={mac}"),
            Self::EthDst(mac) => write!(f, "dl_dst={mac}"),
            Self::Ipv4Src(m) => write!(f, "nw_src={m}"),
            Self::Ipv4Dst(m) => write!(f, "nw_dst={m}"),
            Self::ArpOp(op) => write!(f, "arp_op={op}"),
            Self::ArpSha(mac) => write!(f, "arp_sha={mac}"),
            Self::ArpSpa(ip) => write!(f, "arp_spa={ip}"),
            Self::ArpTpa(ip) => write!(f, "arp_tpa={ip}"),
            Self::Reg { reg, range, value } => {
                let full = BitRange::full(super::reg::NX_REG_BITS);
                if *range == full {
                    write!(f, "{}={:#x}", reg.reg(), value)
                } else {
                    let shifted = u128::from(*value) << range.start();
                    write!(
                        f,
                        "{}={:#x}/{:#x}",
                        reg.reg(),
                        shifted,
                        range.field_mask()
                    )
                }
            }
            Self::CtState(m) => write!(f, "ct_state={m}"),
            Self::CtMark(mark) => write!(f, "ct_mark={mark:#x}"),
        }
    }
}

/// A concrete description of a packet and its metadata at some
/// point of its traversal, used to evaluate flows offline.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PacketFields {
    pub in_port: Option<OfPort>,
    pub protocol: Option<Protocol>,
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub nw_ttl: u8,
    pub arp_op: Option<u16>,
    pub arp_sha: Option<MacAddr>,
    pub arp_tha: Option<MacAddr>,
    pub arp_spa: Option<Ipv4Addr>,
    pub arp_tpa: Option<Ipv4Addr>,
    pub tun_dst: Option<Ipv4Addr>,
    pub regs: [u32; NX_REG_COUNT],
    pub ct_state: CtState,
    pub ct_mark: u32,
    pub ct_label: u128,
}

impl PacketFields {
    /// An IPv4 packet arriving on `in_port`.
    pub fn ip(
        in_port: OfPort,
        dl_src: MacAddr,
        dl_dst: MacAddr,
        nw_src: Ipv4Addr,
        nw_dst: Ipv4Addr,
    ) -> Self {
        Self {
            in_port: Some(in_port),
            protocol: Some(Protocol::Ip),
            dl_src,
            dl_dst,
            nw_src: Some(nw_src),
            nw_dst: Some(nw_dst),
            nw_ttl: 64,
            ..Default::default()
        }
    }

    /// An ARP request from `sha`/`spa` asking who has `tpa`.
    pub fn arp_request(
        in_port: OfPort,
        sha: MacAddr,
        spa: Ipv4Addr,
        tpa: Ipv4Addr,
    ) -> Self {
        Self {
            in_port: Some(in_port),
            protocol: Some(Protocol::Arp),
            dl_src: sha,
            dl_dst: MacAddr::BROADCAST,
            arp_op: Some(1),
            arp_sha: Some(sha),
            arp_tha: Some(MacAddr::ZERO),
            arp_spa: Some(spa),
            arp_tpa: Some(tpa),
            ..Default::default()
        }
    }

    pub fn with_reg(mut self, reg: NxReg, value: u32) -> Self {
        self.regs[usize::from(reg.id())] = value;
        self
    }

    pub fn with_ct(mut self, state: CtState, mark: u32) -> Self {
        self.ct_state = state;
        self.ct_mark = mark;
        self
    }

    /// Read a whole field as an unsigned integer. Absent fields read
    /// as zero, as they do on the switch.
    pub fn get(&self, field: Field) -> u128 {
        let mac = |m: MacAddr| u128::from(m.to_u64());
        let ip = |a: Option<Ipv4Addr>| a.map_or(0, |a| u128::from(u32::from(a)));
        match field {
            Field::EthSrc => mac(self.dl_src),
            Field::EthDst => mac(self.dl_dst),
            Field::ArpOp => self.arp_op.map_or(0, u128::from),
            Field::ArpSha => self.arp_sha.map_or(0, mac),
            Field::ArpTha => self.arp_tha.map_or(0, mac),
            Field::ArpSpa => ip(self.arp_spa),
            Field::ArpTpa => ip(self.arp_tpa),
            Field::Ipv4Src => ip(self.nw_src),
            Field::Ipv4Dst => ip(self.nw_dst),
            Field::TunDst => ip(self.tun_dst),
            Field::CtMark => u128::from(self.ct_mark),
            Field::CtLabel => self.ct_label,
            Field::Reg(r) => u128::from(self.regs[usize::from(r.id())]),
        }
    }

    /// Write a whole field; bits beyond the field's width are dropped.
    pub fn set(&mut self, field: Field, value: u128) {
        let value = BitRange::full(field.bits()).extract(value);
        // The masking above guarantees each narrowing below is lossless.
        let mac = || MacAddr::from_u64(value as u64);
        let ip = || Some(Ipv4Addr::from(value as u32));
        match field {
            Field::EthSrc => self.dl_src = mac(),
            Field::EthDst => self.dl_dst = mac(),
            Field::ArpOp => self.arp_op = Some(value as u16),
            Field::ArpSha => self.arp_sha = Some(mac()),
            Field::ArpTha => self.arp_tha = Some(mac()),
            Field::ArpSpa => self.arp_spa = ip(),
            Field::ArpTpa => self.arp_tpa = ip(),
            Field::Ipv4Src => self.nw_src = ip(),
            Field::Ipv4Dst => self.nw_dst = ip(),
            Field::TunDst => self.tun_dst = ip(),
            Field::CtMark => self.ct_mark = value as u32,
            Field::CtLabel => self.ct_label = value,
            Field::Reg(r) => self.regs[usize::from(r.id())] = value as u32,
        }
    }
}
