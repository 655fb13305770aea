// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Service redirection.
//!
//! Service VIPs are not handled by this pipeline. Traffic for them is
//! handed to the gateway, where the host's service proxy takes over.

use super::DNAT_TABLE;
use super::PRIORITY_NORMAL;
use super::Pipeline;
use super::PipelineError;
use ovp::api::Ipv4Cidr;
use ovp::api::OfPort;
use ovp::engine::Flow;
use ovp::engine::Ipv4AddrMatch;
use ovp::engine::MatchField;
use ovp::engine::Protocol;

impl Pipeline {
    pub fn service_cidr_dnat_flow(
        &self,
        service_cidr: Ipv4Cidr,
        gateway_port: OfPort,
    ) -> Result<Flow, PipelineError> {
        Ok(self
            .table(DNAT_TABLE)?
            .build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .match_field(MatchField::Ipv4Dst(Ipv4AddrMatch::Prefix(
                service_cidr,
            )))
            .output(gateway_port)
            .done()?)
    }
}
