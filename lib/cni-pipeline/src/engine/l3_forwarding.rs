// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! L3 forwarding.
//!
//! Routed traffic between nodes is always addressed to the global
//! virtual MAC. The sending node rewrites the destination MAC to it and
//! picks the tunnel endpoint; the receiving node resolves the real pod
//! MAC. No real MAC ever crosses the wire between nodes.

use super::GLOBAL_VIRTUAL_MAC;
use super::L3_FORWARDING_TABLE;
use super::PRIORITY_NORMAL;
use super::Pipeline;
use super::PipelineError;
use ovp::api::Ipv4Cidr;
use ovp::api::MacAddr;
use ovp::engine::FieldValue;
use ovp::engine::Flow;
use ovp::engine::Ipv4AddrMatch;
use ovp::engine::MatchField;
use ovp::engine::Protocol;
use std::net::Ipv4Addr;

impl Pipeline {
    /// Deliver traffic routed to a local pod.
    pub fn l3_to_pod_flow(
        &self,
        pod_ip: Ipv4Addr,
        pod_mac: MacAddr,
        gateway_mac: MacAddr,
    ) -> Result<Flow, PipelineError> {
        let t = self.table(L3_FORWARDING_TABLE)?;
        Ok(t.build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .match_field(MatchField::EthDst(GLOBAL_VIRTUAL_MAC))
            .match_field(MatchField::Ipv4Dst(Ipv4AddrMatch::Exact(pod_ip)))
            .set_field(FieldValue::EthSrc(gateway_mac))
            .set_field(FieldValue::EthDst(pod_mac))
            .dec_ttl()
            .resubmit(t.next())
            .done()?)
    }

    /// Traffic for the gateway itself. This is a same-host hop, so the
    /// TTL is left alone.
    pub fn l3_to_gateway_flow(
        &self,
        gateway_ip: Ipv4Addr,
        gateway_mac: MacAddr,
    ) -> Result<Flow, PipelineError> {
        let t = self.table(L3_FORWARDING_TABLE)?;
        Ok(t.build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .match_field(MatchField::Ipv4Dst(Ipv4AddrMatch::Exact(gateway_ip)))
            .set_field(FieldValue::EthDst(gateway_mac))
            .resubmit(t.next())
            .done()?)
    }

    /// Route traffic for a peer's pod subnet into the tunnel towards
    /// `peer_tunnel`.
    pub fn l3_to_remote_flow(
        &self,
        peer_subnet: Ipv4Cidr,
        peer_tunnel: Ipv4Addr,
        local_gateway_mac: MacAddr,
    ) -> Result<Flow, PipelineError> {
        let t = self.table(L3_FORWARDING_TABLE)?;
        Ok(t.build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .match_field(MatchField::Ipv4Dst(Ipv4AddrMatch::Prefix(
                peer_subnet,
            )))
            .dec_ttl()
            .set_field(FieldValue::EthSrc(local_gateway_mac))
            .set_field(FieldValue::EthDst(GLOBAL_VIRTUAL_MAC))
            .set_field(FieldValue::TunDst(peer_tunnel))
            .resubmit(t.next())
            .done()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn to_pod() {
        let pl = Pipeline::new("br-int").unwrap();
        let f = pl
            .l3_to_pod_flow(
                "10.10.0.5".parse().unwrap(),
                "02:00:0a:0a:00:05".parse().unwrap(),
                "02:00:0a:0a:00:01".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(
            f.to_string(),
            "table=70,priority=200,ip,dl_dst=aa:bb:cc:dd:ee:ff,\
             nw_dst=10.10.0.5,actions=set_field:02:00:0a:0a:00:01->dl_src,\
             set_field:02:00:0a:0a:00:05->dl_dst,dec_ttl,resubmit(,80)"
        );
    }

    #[test]
    fn to_gateway_keeps_ttl() {
        let pl = Pipeline::new("br-int").unwrap();
        let f = pl
            .l3_to_gateway_flow(
                "10.10.0.1".parse().unwrap(),
                "02:00:0a:0a:00:01".parse().unwrap(),
            )
            .unwrap();
        assert!(!f.action_string().contains("dec_ttl"));
        assert_eq!(
            f.action_string(),
            "set_field:02:00:0a:0a:00:01->dl_dst,resubmit(,80)"
        );
    }

    #[test]
    fn to_remote() {
        let pl = Pipeline::new("br-int").unwrap();
        let f = pl
            .l3_to_remote_flow(
                "10.10.1.0/24".parse().unwrap(),
                "192.168.1.12".parse().unwrap(),
                "02:00:0a:0a:00:01".parse().unwrap(),
            )
            .unwrap();
        assert_eq!(
            f.to_string(),
            "table=70,priority=200,ip,nw_dst=10.10.1.0/24,actions=dec_ttl,\
             set_field:02:00:0a:0a:00:01->dl_src,\
             set_field:aa:bb:cc:dd:ee:ff->dl_dst,\
             set_field:192.168.1.12->tun_dst,resubmit(,80)"
        );
    }
}
