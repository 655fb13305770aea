// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Classification of traffic by ingress port.
//!
//! Every port attached to the bridge plays exactly one role. The
//! classifier records that role in the source mark so later stages can
//! tell tunnel, gateway and pod traffic apart.

use super::CLASSIFIER_TABLE;
use super::CONNTRACK_STATE_TABLE;
use super::PRIORITY_LOW;
use super::PRIORITY_NORMAL;
use super::Pipeline;
use super::PipelineError;
use super::RegField;
use super::TrafficSource;
use ovp::api::OfPort;
use ovp::engine::Flow;
use ovp::engine::TableId;

impl Pipeline {
    fn classifier_flow(
        &self,
        port: OfPort,
        source: TrafficSource,
        priority: u16,
        next: TableId,
    ) -> Result<Flow, PipelineError> {
        let b = self
            .table(CLASSIFIER_TABLE)?
            .build_flow()
            .priority(priority)
            .match_in_port(port);
        Ok(self
            .load_reg(b, RegField::SourceMark, source.mark())?
            .resubmit(next)
            .done()?)
    }

    /// Tunnel traffic has no per-interface identity to verify. It skips
    /// the spoof guard and the tracker, and is judged on the state it
    /// already carries.
    pub fn tunnel_classifier_flow(
        &self,
        port: OfPort,
    ) -> Result<Flow, PipelineError> {
        self.classifier_flow(
            port,
            TrafficSource::Tunnel,
            PRIORITY_NORMAL,
            CONNTRACK_STATE_TABLE,
        )
    }

    pub fn gateway_classifier_flow(
        &self,
        port: OfPort,
    ) -> Result<Flow, PipelineError> {
        let next = self.table(CLASSIFIER_TABLE)?.next();
        self.classifier_flow(port, TrafficSource::Gateway, PRIORITY_NORMAL, next)
    }

    /// Pod flows sit below the tunnel and gateway flows so a port that
    /// is ever claimed twice resolves to the more specific role.
    pub fn pod_classifier_flow(
        &self,
        port: OfPort,
    ) -> Result<Flow, PipelineError> {
        let next = self.table(CLASSIFIER_TABLE)?.next();
        self.classifier_flow(port, TrafficSource::Local, PRIORITY_LOW, next)
    }
}

#[cfg(test)]
mod test {
    use super::super::SPOOF_GUARD_TABLE;
    use super::*;

    #[test]
    fn classifier_flows() {
        let pl = Pipeline::new("br-int").unwrap();
        let port = OfPort::new(7);

        let f = pl.gateway_classifier_flow(port).unwrap();
        assert_eq!(
            f.to_string(),
            "table=0,priority=200,in_port=7,\
             actions=load:0x1->NXM_NX_REG0[0..15],resubmit(,10)"
        );

        let f = pl.pod_classifier_flow(port).unwrap();
        assert_eq!(f.priority(), PRIORITY_NORMAL - 10);
        assert_eq!(
            f.action_string(),
            format!("load:0x2->NXM_NX_REG0[0..15],resubmit(,{SPOOF_GUARD_TABLE})")
        );

        let f = pl.tunnel_classifier_flow(port).unwrap();
        assert_eq!(
            f.action_string(),
            "load:0x0->NXM_NX_REG0[0..15],resubmit(,31)"
        );
    }
}
