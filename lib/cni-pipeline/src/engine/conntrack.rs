// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Connection tracking.
//!
//! Conntrack runs in two tables. The first sends all IP traffic
//! through the tracker in the pipeline's private zone. The second
//! decides what to do based on the source mark, the connection mark and
//! the tracker state:
//!
//! | pri | match                               | action                 |
//! |-----|-------------------------------------|------------------------|
//! | 210 | gateway, ct_mark=gw, -new+trk       | continue               |
//! | 200 | gateway, +new-inv+trk               | commit, mark and label |
//! | 200 | ct_mark=gw, -new+trk                | restore dl_dst, cont.  |
//! | 190 | +new-inv+trk                        | commit                 |
//! | 200 | +new+inv                            | drop                   |
//!
//! Whatever the packet, the highest-priority matching flow is unique.
//! Connections from the gateway remember the gateway's MAC in
//! `ct_label`; replies to them get it back as their destination MAC no
//! matter what MAC was used to route them.

use super::CONNTRACK_STATE_TABLE;
use super::CONNTRACK_TABLE;
use super::CT_LABEL_MAC_RANGE;
use super::CT_ZONE;
use super::GATEWAY_CT_MARK;
use super::PRIORITY_HIGH;
use super::PRIORITY_LOW;
use super::PRIORITY_NORMAL;
use super::Pipeline;
use super::PipelineError;
use super::RegField;
use super::TrafficSource;
use ovp::engine::BitRange;
use ovp::engine::CtState;
use ovp::engine::CtStateMatch;
use ovp::engine::Field;
use ovp::engine::Flow;
use ovp::engine::FlowAction;
use ovp::engine::Protocol;

impl Pipeline {
    /// Send all IP traffic through the tracker, then on to the state
    /// table with `ct_state` filled in.
    pub fn conntrack_flow(&self) -> Result<Flow, PipelineError> {
        let t = self.table(CONNTRACK_TABLE)?;
        Ok(t.build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .ct(false, Some(t.next()), CT_ZONE, vec![])
            .done()?)
    }

    /// The flows of both conntrack tables.
    pub fn conntrack_flows(&self) -> Result<Vec<Flow>, PipelineError> {
        let t = self.table(CONNTRACK_STATE_TABLE)?;
        let next = t.next();
        let marks = RegField::SourceMark.register().nx();
        let gw_mark = TrafficSource::Gateway.mark();
        let source = RegField::SourceMark.range();

        let reply = CtStateMatch::new()
            .without(CtState::NEW)
            .with(CtState::TRK);
        let new_valid = CtStateMatch::new()
            .with(CtState::NEW)
            .without(CtState::INV)
            .with(CtState::TRK);
        let new_invalid =
            CtStateMatch::new().with(CtState::NEW).with(CtState::INV);

        let gw_reply = t
            .build_flow()
            .priority(PRIORITY_HIGH)
            .match_protocol(Protocol::Ip)
            .match_reg_range(marks, gw_mark, source)
            .match_ct_mark(GATEWAY_CT_MARK)
            .match_ct_state(reply)
            .resubmit(next)
            .done()?;

        let gw_commit = t
            .build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .match_reg_range(marks, gw_mark, source)
            .match_ct_state(new_valid)
            .ct(
                true,
                Some(next),
                CT_ZONE,
                vec![
                    FlowAction::Load {
                        field: Field::CtMark,
                        range: None,
                        value: u64::from(GATEWAY_CT_MARK),
                    },
                    FlowAction::Move {
                        src: Field::EthSrc,
                        src_range: None,
                        dst: Field::CtLabel,
                        dst_range: Some(CT_LABEL_MAC_RANGE),
                    },
                ],
            )
            .done()?;

        let restore_mac = t
            .build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .match_ct_mark(GATEWAY_CT_MARK)
            .match_ct_state(reply)
            .move_range(
                Field::CtLabel,
                Field::EthDst,
                CT_LABEL_MAC_RANGE,
                BitRange::full(Field::EthDst.bits()),
            )
            .resubmit(next)
            .done()?;

        let commit = t
            .build_flow()
            .priority(PRIORITY_LOW)
            .match_protocol(Protocol::Ip)
            .match_ct_state(new_valid)
            .ct(true, Some(next), CT_ZONE, vec![])
            .done()?;

        let invalid = t
            .build_flow()
            .priority(PRIORITY_NORMAL)
            .match_protocol(Protocol::Ip)
            .match_ct_state(new_invalid)
            .drop()
            .done()?;

        Ok(vec![
            self.conntrack_flow()?,
            gw_reply,
            gw_commit,
            restore_mac,
            commit,
            invalid,
        ])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rendered() {
        let pl = Pipeline::new("br-int").unwrap();
        let flows = pl.conntrack_flows().unwrap();
        let text: Vec<String> = flows.iter().map(ToString::to_string).collect();
        assert_eq!(
            text,
            vec![
                "table=30,priority=200,ip,actions=ct(table=31,zone=65520)",
                "table=31,priority=210,ip,reg0=0x1/0xffff,ct_mark=0x20,\
                 ct_state=-new+trk,actions=resubmit(,40)",
                "table=31,priority=200,ip,reg0=0x1/0xffff,\
                 ct_state=+new-inv+trk,actions=ct(commit,table=40,\
                 zone=65520,exec(load:0x20->NXM_NX_CT_MARK[],\
                 move:NXM_OF_ETH_SRC[]->NXM_NX_CT_LABEL[0..47]))",
                "table=31,priority=200,ip,ct_mark=0x20,ct_state=-new+trk,\
                 actions=move:NXM_NX_CT_LABEL[0..47]->NXM_OF_ETH_DST[0..47],\
                 resubmit(,40)",
                "table=31,priority=190,ip,ct_state=+new-inv+trk,\
                 actions=ct(commit,table=40,zone=65520)",
                "table=31,priority=200,ip,ct_state=+new+inv,actions=drop",
            ]
        );
    }

    #[test]
    fn deterministic() {
        let pl = Pipeline::new("br-int").unwrap();
        assert_eq!(pl.conntrack_flows().unwrap(), pl.conntrack_flows().unwrap());
    }
}
