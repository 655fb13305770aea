// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! The spoof guard.
//!
//! A pod may only send from the MAC and IP it was assigned, on the
//! port it was attached to. There are no deny flows: anything not
//! explicitly allowed here falls through to the table's drop miss.
//! The gateway is trusted and allowed by port alone.

use super::ARP_RESPONDER_TABLE;
use super::PRIORITY_NORMAL;
use super::Pipeline;
use super::PipelineError;
use super::SPOOF_GUARD_TABLE;
use ovp::api::MacAddr;
use ovp::api::OfPort;
use ovp::engine::Flow;
use ovp::engine::Ipv4AddrMatch;
use ovp::engine::MatchField;
use ovp::engine::Protocol;
use std::net::Ipv4Addr;

impl Pipeline {
    pub fn pod_ip_spoof_guard_flow(
        &self,
        port: OfPort,
        mac: MacAddr,
        ip: Ipv4Addr,
    ) -> Result<Flow, PipelineError> {
        let t = self.table(SPOOF_GUARD_TABLE)?;
        Ok(t.build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .match_in_port(port)
            .match_field(MatchField::EthSrc(mac))
            .match_field(MatchField::Ipv4Src(Ipv4AddrMatch::Exact(ip)))
            .resubmit(t.next())
            .done()?)
    }

    pub fn pod_arp_spoof_guard_flow(
        &self,
        port: OfPort,
        mac: MacAddr,
        ip: Ipv4Addr,
    ) -> Result<Flow, PipelineError> {
        Ok(self
            .table(SPOOF_GUARD_TABLE)?
            .build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Arp)
            .match_in_port(port)
            .match_field(MatchField::ArpSha(mac))
            .match_field(MatchField::ArpSpa(ip))
            .resubmit(ARP_RESPONDER_TABLE)
            .done()?)
    }

    pub fn gateway_ip_spoof_guard_flow(
        &self,
        port: OfPort,
    ) -> Result<Flow, PipelineError> {
        let t = self.table(SPOOF_GUARD_TABLE)?;
        Ok(t.build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .match_in_port(port)
            .resubmit(t.next())
            .done()?)
    }

    pub fn gateway_arp_spoof_guard_flow(
        &self,
        port: OfPort,
    ) -> Result<Flow, PipelineError> {
        Ok(self
            .table(SPOOF_GUARD_TABLE)?
            .build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Arp)
            .match_in_port(port)
            .resubmit(ARP_RESPONDER_TABLE)
            .done()?)
    }
}
