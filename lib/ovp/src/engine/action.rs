// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Flow actions.

use super::reg::BitRange;
use super::reg::NX_REG_BITS;
use super::reg::NxReg;
use super::table::TableId;
use core::fmt;
use core::fmt::Display;
use ovp_api::MacAddr;
use ovp_api::OfPort;
use serde::Deserialize;
use serde::Serialize;
use std::net::Ipv4Addr;

/// A packet or connection field an action may read or write.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum Field {
    EthSrc,
    EthDst,
    ArpOp,
    ArpSha,
    ArpTha,
    ArpSpa,
    ArpTpa,
    Ipv4Src,
    Ipv4Dst,
    TunDst,
    CtMark,
    CtLabel,
    Reg(NxReg),
}

impl Field {
    /// The width of the field in bits.
    pub fn bits(self) -> u16 {
        match self {
            Self::EthSrc | Self::EthDst | Self::ArpSha | Self::ArpTha => 48,
            Self::ArpOp => 16,
            Self::ArpSpa
            | Self::ArpTpa
            | Self::Ipv4Src
            | Self::Ipv4Dst
            | Self::TunDst
            | Self::CtMark => 32,
            Self::CtLabel => 128,
            Self::Reg(_) => NX_REG_BITS,
        }
    }

    /// The NXM/OXM name used by `load`, `move` and `output`.
    pub fn nxm(self) -> String {
        match self {
            Self::EthSrc => "NXM_OF_ETH_SRC".to_string(),
            Self::EthDst => "NXM_OF_ETH_DST".to_string(),
            Self::ArpOp => "NXM_OF_ARP_OP".to_string(),
            Self::ArpSha => "NXM_NX_ARP_SHA".to_string(),
            Self::ArpTha => "NXM_NX_ARP_THA".to_string(),
            Self::ArpSpa => "NXM_OF_ARP_SPA".to_string(),
            Self::ArpTpa => "NXM_OF_ARP_TPA".to_string(),
            Self::Ipv4Src => "NXM_OF_IP_SRC".to_string(),
            Self::Ipv4Dst => "NXM_OF_IP_DST".to_string(),
            Self::TunDst => "NXM_NX_TUN_IPV4_DST".to_string(),
            Self::CtMark => "NXM_NX_CT_MARK".to_string(),
            Self::CtLabel => "NXM_NX_CT_LABEL".to_string(),
            Self::Reg(r) => r.nxm(),
        }
    }

    /// The short name used by `set_field` and in matches.
    pub fn name(self) -> String {
        match self {
            Self::EthSrc => "dl_src".to_string(),
            Self::EthDst => "dl_dst".to_string(),
            Self::ArpOp => "arp_op".to_string(),
            Self::ArpSha => "arp_sha".to_string(),
            Self::ArpTha => "arp_tha".to_string(),
            Self::ArpSpa => "arp_spa".to_string(),
            Self::ArpTpa => "arp_tpa".to_string(),
            Self::Ipv4Src => "nw_src".to_string(),
            Self::Ipv4Dst => "nw_dst".to_string(),
            Self::TunDst => "tun_dst".to_string(),
            Self::CtMark => "ct_mark".to_string(),
            Self::CtLabel => "ct_label".to_string(),
            Self::Reg(r) => r.reg(),
        }
    }

    /// Connection metadata lives with the connection, not the packet,
    /// and may only be written from inside a committing `ct()`.
    pub fn is_ct_metadata(self) -> bool {
        matches!(self, Self::CtMark | Self::CtLabel)
    }
}

fn fmt_nxm(
    f: &mut fmt::Formatter,
    field: Field,
    range: Option<BitRange>,
) -> fmt::Result {
    match range {
        Some(r) => write!(f, "{}[{}..{}]", field.nxm(), r.start(), r.end()),
        None => write!(f, "{}[]", field.nxm()),
    }
}

/// A typed value for `set_field`.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FieldValue {
    EthSrc(MacAddr),
    EthDst(MacAddr),
    ArpSha(MacAddr),
    ArpTha(MacAddr),
    ArpSpa(Ipv4Addr),
    ArpTpa(Ipv4Addr),
    Ipv4Src(Ipv4Addr),
    Ipv4Dst(Ipv4Addr),
    TunDst(Ipv4Addr),
}

impl FieldValue {
    pub fn field(&self) -> Field {
        match self {
            Self::EthSrc(_) => Field::EthSrc,
            Self::EthDst(_) => Field::EthDst,
            Self::ArpSha(_) => Field::ArpSha,
            Self::ArpTha(_) => Field::ArpTha,
            Self::ArpSpa(_) => Field::ArpSpa,
            Self::ArpTpa(_) => Field::ArpTpa,
            Self::Ipv4Src(_) => Field::Ipv4Src,
            Self::Ipv4Dst(_) => Field::Ipv4Dst,
            Self::TunDst(_) => Field::TunDst,
        }
    }

    /// The value as a whole-field integer.
    pub fn raw(&self) -> u128 {
        match self {
            Self::EthSrc(m)
            | Self::EthDst(m)
            | Self::ArpSha(m)
            | Self::ArpTha(m) => u128::from(m.to_u64()),
            Self::ArpSpa(ip)
            | Self::ArpTpa(ip)
            | Self::Ipv4Src(ip)
            | Self::Ipv4Dst(ip)
            | Self::TunDst(ip) => u128::from(u32::from(*ip)),
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EthSrc(m)
            | Self::EthDst(m)
            | Self::ArpSha(m)
            | Self::ArpTha(m) => write!(f, "{m}"),
            Self::ArpSpa(ip)
            | Self::ArpTpa(ip)
            | Self::Ipv4Src(ip)
            | Self::Ipv4Dst(ip)
            | Self::TunDst(ip) => write!(f, "{ip}"),
        }
    }
}

/// Send the packet through the connection tracker.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct CtAction {
    /// Commit the connection so that later packets are tracked as
    /// part of it.
    pub commit: bool,

    /// The table the packet is recirculated to once conntrack has
    /// filled in `ct_state`. `None` leaves the packet where it is.
    pub table: Option<TableId>,

    /// The conntrack zone isolating this connection space.
    pub zone: u16,

    /// Actions run against the connection when committing. Only
    /// `load` and `move` into `ct_mark`/`ct_label` are valid here.
    pub exec: Vec<FlowAction>,
}

impl Display for CtAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ct(")?;
        if self.commit {
            write!(f, "commit,")?;
        }
        if let Some(table) = self.table {
            write!(f, "table={table},")?;
        }
        write!(f, "zone={}", self.zone)?;
        if !self.exec.is_empty() {
            write!(f, ",exec(")?;
            for (i, act) in self.exec.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{act}")?;
            }
            write!(f, ")")?;
        }
        write!(f, ")")
    }
}

/// A single action of a flow's action list.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FlowAction {
    /// Continue processing in another table.
    Resubmit(TableId),
    Drop,
    /// Hand the packet to the switch's built-in L2 learning switch.
    Normal,
    Output(OfPort),
    /// Output to the port the packet arrived on.
    OutputInPort,
    /// Output to the port number held in `range` of `field`.
    OutputField { field: Field, range: BitRange },
    /// Load an immediate into `range` of `field`, or all of it.
    Load { field: Field, range: Option<BitRange>, value: u64 },
    /// Copy bits from one field into another.
    Move {
        src: Field,
        src_range: Option<BitRange>,
        dst: Field,
        dst_range: Option<BitRange>,
    },
    SetField(FieldValue),
    Ct(CtAction),
    DecTtl,
}

impl FlowAction {
    /// Does this action end the packet's processing?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Drop
                | Self::Normal
                | Self::Output(_)
                | Self::OutputInPort
                | Self::OutputField { .. }
        )
    }
}

impl Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Resubmit(table) => write!(f, "resubmit(,{table})"),
            Self::Drop => write!(f, "drop"),
            Self::Normal => write!(f, "NORMAL"),
            Self::Output(port) => write!(f, "output:{port}"),
            Self::OutputInPort => write!(f, "IN_PORT"),
            Self::OutputField { field, range } => {
                write!(f, "output:")?;
                fmt_nxm(f, *field, Some(*range))
            }
            Self::Load { field, range, value } => {
                write!(f, "load:{value:#x}->")?;
                fmt_nxm(f, *field, *range)
            }
            Self::Move { src, src_range, dst, dst_range } => {
                write!(f, "move:")?;
                fmt_nxm(f, *src, *src_range)?;
                write!(f, "->")?;
                fmt_nxm(f, *dst, *dst_range)
            }
            Self::SetField(val) => {
                write!(f, "set_field:{val}->{}", val.field().name())
            }
            Self::Ct(ct) => write!(f, "{ct}"),
            Self::DecTtl => write!(f, "dec_ttl"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn action_display() {
        let load = FlowAction::Load {
            field: Field::Reg(NxReg::new(0)),
            range: Some(BitRange::new(16, 31)),
            value: 0x1,
        };
        assert_eq!(load.to_string(), "load:0x1->NXM_NX_REG0[16..31]");

        let mv = FlowAction::Move {
            src: Field::EthSrc,
            src_range: None,
            dst: Field::EthDst,
            dst_range: None,
        };
        assert_eq!(mv.to_string(), "move:NXM_OF_ETH_SRC[]->NXM_OF_ETH_DST[]");

        let out = FlowAction::OutputField {
            field: Field::Reg(NxReg::new(1)),
            range: BitRange::new(0, 31),
        };
        assert_eq!(out.to_string(), "output:NXM_NX_REG1[0..31]");

        let set = FlowAction::SetField(FieldValue::TunDst(Ipv4Addr::new(
            192, 168, 1, 2,
        )));
        assert_eq!(set.to_string(), "set_field:192.168.1.2->tun_dst");
    }

    #[test]
    fn ct_display() {
        let ct = CtAction {
            commit: true,
            table: Some(TableId::new(40)),
            zone: 0xfff0,
            exec: vec![FlowAction::Load {
                field: Field::CtMark,
                range: None,
                value: 0x20,
            }],
        };
        assert_eq!(
            ct.to_string(),
            "ct(commit,table=40,zone=65520,exec(load:0x20->NXM_NX_CT_MARK[]))"
        );

        let ct = CtAction {
            commit: false,
            table: Some(TableId::new(31)),
            zone: 0xfff0,
            exec: vec![],
        };
        assert_eq!(ct.to_string(), "ct(table=31,zone=65520)");
    }
}
