// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! The ARP responder.

use super::ARP_RESPONDER_TABLE;
use super::GLOBAL_VIRTUAL_MAC;
use super::PRIORITY_LOW;
use super::PRIORITY_NORMAL;
use super::Pipeline;
use super::PipelineError;
use ovp::engine::Field;
use ovp::engine::FieldValue;
use ovp::engine::Flow;
use ovp::engine::MatchField;
use ovp::engine::Protocol;
use std::net::Ipv4Addr;

/// ARP request opcode.
pub const ARP_OP_REQUEST: u16 = 1;

/// ARP reply opcode.
pub const ARP_OP_REPLY: u16 = 2;

impl Pipeline {
    /// Answer requests for a peer's gateway IP with the virtual MAC,
    /// turning the request around on its ingress port.
    ///
    /// Local pods then address all traffic for the peer to the virtual
    /// MAC, which is exactly what L3 forwarding to remote expects.
    pub fn arp_responder_flow(
        &self,
        peer_gateway_ip: Ipv4Addr,
    ) -> Result<Flow, PipelineError> {
        Ok(self
            .table(ARP_RESPONDER_TABLE)?
            .build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Arp)
            .match_field(MatchField::ArpOp(ARP_OP_REQUEST))
            .match_field(MatchField::ArpTpa(peer_gateway_ip))
            .move_field(Field::EthSrc, Field::EthDst)
            .set_field(FieldValue::EthSrc(GLOBAL_VIRTUAL_MAC))
            .load(Field::ArpOp, u64::from(ARP_OP_REPLY))
            .move_field(Field::ArpSha, Field::ArpTha)
            .set_field(FieldValue::ArpSha(GLOBAL_VIRTUAL_MAC))
            .move_field(Field::ArpSpa, Field::ArpTpa)
            .set_field(FieldValue::ArpSpa(peer_gateway_ip))
            .output_in_port()
            .done()?)
    }

    /// Anything the responder doesn't answer is handled by normal
    /// learning-switch ARP.
    pub fn arp_normal_flow(&self) -> Result<Flow, PipelineError> {
        Ok(self
            .table(ARP_RESPONDER_TABLE)?
            .build_flow()
            .priority(PRIORITY_LOW)
            .match_protocol(Protocol::Arp)
            .normal()
            .done()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn responder() {
        let pl = Pipeline::new("br-int").unwrap();
        let f = pl.arp_responder_flow("10.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(
            f.to_string(),
            "table=20,priority=200,arp,arp_op=1,arp_tpa=10.0.0.1,\
             actions=move:NXM_OF_ETH_SRC[]->NXM_OF_ETH_DST[],\
             set_field:aa:bb:cc:dd:ee:ff->dl_src,\
             load:0x2->NXM_OF_ARP_OP[],\
             move:NXM_NX_ARP_SHA[]->NXM_NX_ARP_THA[],\
             set_field:aa:bb:cc:dd:ee:ff->arp_sha,\
             move:NXM_OF_ARP_SPA[]->NXM_OF_ARP_TPA[],\
             set_field:10.0.0.1->arp_spa,IN_PORT"
        );
    }

    #[test]
    fn fallback() {
        let pl = Pipeline::new("br-int").unwrap();
        let f = pl.arp_normal_flow().unwrap();
        assert_eq!(f.to_string(), "table=20,priority=190,arp,actions=NORMAL");
    }
}
