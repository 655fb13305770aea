// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Offline evaluation of a flow set against a single packet.
//!
//! This walks a packet through a list of flows the way the switch
//! would: in each table the highest-priority matching flow wins, its
//! actions are applied to the packet in order, and `resubmit` or a
//! recirculating `ct()` continues in another table. It exists to check
//! generated pipelines, not to forward traffic, and it only models the
//! subset of the switch the engine's actions can express.

use super::action::FlowAction;
use super::flow::Flow;
use super::predicate::CtState;
use super::predicate::PacketFields;
use super::reg::BitRange;
use super::table::MissAction;
use super::table::Table;
use super::table::TableId;
use core::fmt;
use core::fmt::Display;
use ovp_api::OfPort;

/// The number of table visits after which a trace gives up.
pub const MAX_TABLE_VISITS: usize = 64;

/// How a traced packet left the pipeline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Output(OfPort),
    InPort,
    Normal,
    Drop,
    /// TTL ran out on `dec_ttl`.
    TtlExceeded,
    /// No flow matched and the table is not one of the known tables.
    NoMatch(TableId),
    LoopLimit,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Output(port) => write!(f, "output:{port}"),
            Self::InPort => write!(f, "output:IN_PORT"),
            Self::Normal => write!(f, "NORMAL"),
            Self::Drop => write!(f, "drop"),
            Self::TtlExceeded => write!(f, "drop (ttl exceeded)"),
            Self::NoMatch(t) => write!(f, "no match in table {t}"),
            Self::LoopLimit => write!(f, "loop limit reached"),
        }
    }
}

/// One table visited during a trace.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TraceStep {
    pub table: TableId,
    /// The winning flow, or `None` when the table's miss action
    /// applied.
    pub flow: Option<Flow>,
}

#[derive(Clone, Debug)]
pub struct Trace {
    pub steps: Vec<TraceStep>,
    pub verdict: Verdict,
    /// The packet as it stood when it left the pipeline.
    pub pkt: PacketFields,
}

/// Pick the flow the switch would use for `pkt` in `table`.
///
/// Ties at the same priority are resolved in favour of the flow
/// listed first; a correct pipeline never depends on that.
pub fn lookup<'a>(
    flows: &'a [Flow],
    table: TableId,
    pkt: &PacketFields,
) -> Option<&'a Flow> {
    let mut best: Option<&Flow> = None;
    for flow in flows.iter().filter(|f| f.table() == table) {
        if !flow.is_match(pkt) {
            continue;
        }

        match best {
            Some(b) if b.priority() >= flow.priority() => {}
            _ => best = Some(flow),
        }
    }
    best
}

enum Step {
    Goto(TableId),
    Done(Verdict),
}

/// Run the packet's actions for one flow.
fn apply(actions: &[FlowAction], pkt: &mut PacketFields) -> Option<Step> {
    for act in actions {
        match act {
            FlowAction::Resubmit(t) => return Some(Step::Goto(*t)),
            FlowAction::Drop => return Some(Step::Done(Verdict::Drop)),
            FlowAction::Normal => return Some(Step::Done(Verdict::Normal)),
            FlowAction::Output(port) => {
                return Some(Step::Done(Verdict::Output(*port)));
            }
            FlowAction::OutputInPort => {
                return Some(Step::Done(Verdict::InPort));
            }
            FlowAction::OutputField { field, range } => {
                // An output field range is at most one register wide.
                let port = range.extract(pkt.get(*field)) as u32;
                return Some(Step::Done(Verdict::Output(OfPort::new(port))));
            }
            FlowAction::Ct(ct) => {
                if !pkt.ct_state.contains(CtState::TRK) {
                    pkt.ct_state = CtState::TRK | CtState::NEW;
                }
                if ct.commit {
                    apply(&ct.exec, pkt);
                }
                if let Some(t) = ct.table {
                    return Some(Step::Goto(t));
                }
            }
            FlowAction::DecTtl => {
                if pkt.nw_ttl <= 1 {
                    return Some(Step::Done(Verdict::TtlExceeded));
                }
                pkt.nw_ttl -= 1;
            }
            _ => apply_write(act, pkt),
        }
    }
    None
}

fn apply_write(act: &FlowAction, pkt: &mut PacketFields) {
    match act {
        FlowAction::Load { field, range, value } => {
            let r = range.unwrap_or(BitRange::full(field.bits()));
            let cur = pkt.get(*field);
            pkt.set(*field, r.deposit(cur, u128::from(*value)));
        }
        FlowAction::Move { src, src_range, dst, dst_range } => {
            let sr = src_range.unwrap_or(BitRange::full(src.bits()));
            let dr = dst_range.unwrap_or(BitRange::full(dst.bits()));
            let val = sr.extract(pkt.get(*src));
            let cur = pkt.get(*dst);
            pkt.set(*dst, dr.deposit(cur, val));
        }
        FlowAction::SetField(val) => pkt.set(val.field(), val.raw()),
        _ => {}
    }
}

/// Trace `pkt` through `flows`, starting at table `start`.
///
/// `tables` supplies the miss behaviour of tables in which no flow
/// matched.
pub fn trace(
    flows: &[Flow],
    tables: &[Table],
    start: TableId,
    mut pkt: PacketFields,
) -> Trace {
    let mut steps = vec![];
    let mut cur = start;

    for _ in 0..MAX_TABLE_VISITS {
        let step = match lookup(flows, cur, &pkt) {
            Some(flow) => {
                steps.push(TraceStep { table: cur, flow: Some(flow.clone()) });
                // Every finalized flow ends in a terminal or a jump.
                apply(flow.actions(), &mut pkt)
                    .unwrap_or(Step::Done(Verdict::NoMatch(cur)))
            }

            None => {
                steps.push(TraceStep { table: cur, flow: None });
                match tables.iter().find(|t| t.id() == cur) {
                    None => Step::Done(Verdict::NoMatch(cur)),
                    Some(t) => match t.miss_action() {
                        MissAction::Drop => Step::Done(Verdict::Drop),
                        MissAction::Normal => Step::Done(Verdict::Normal),
                        MissAction::Next if t.next().is_last() => {
                            Step::Done(Verdict::Drop)
                        }
                        MissAction::Next => Step::Goto(t.next()),
                    },
                }
            }
        };

        match step {
            Step::Goto(next) => cur = next,
            Step::Done(verdict) => return Trace { steps, verdict, pkt },
        }
    }

    Trace { steps, verdict: Verdict::LoopLimit, pkt }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::action::Field;
    use crate::engine::action::FieldValue;
    use crate::engine::predicate::CtStateMatch;
    use crate::engine::predicate::MatchField;
    use crate::engine::predicate::Protocol;
    use crate::engine::reg::NxReg;
    use crate::engine::table::Bridge;
    use ovp_api::MacAddr;
    use std::net::Ipv4Addr;

    fn tables() -> Vec<Table> {
        let br = Bridge::new("br-test");
        vec![
            br.create_table(TableId::new(0), TableId::new(10), MissAction::Next),
            br.create_table(TableId::new(10), TableId::LAST, MissAction::Drop),
        ]
    }

    fn pkt() -> PacketFields {
        PacketFields::ip(
            OfPort::new(3),
            "02:00:00:00:00:03".parse().unwrap(),
            "02:00:00:00:00:04".parse().unwrap(),
            Ipv4Addr::new(10, 0, 0, 3),
            Ipv4Addr::new(10, 0, 0, 4),
        )
    }

    #[test]
    fn highest_priority_wins() {
        let t = tables();
        let flows = vec![
            t[0].build_flow().priority(100).normal().done().unwrap(),
            t[0]
                .build_flow()
                .priority(200)
                .match_in_port(OfPort::new(3))
                .output(OfPort::new(9))
                .done()
                .unwrap(),
        ];
        let tr = trace(&flows, &t, TableId::new(0), pkt());
        assert_eq!(tr.verdict, Verdict::Output(OfPort::new(9)));
        assert_eq!(tr.steps.len(), 1);
    }

    #[test]
    fn registers_carry_across_tables() {
        let t = tables();
        let reg = NxReg::new(1);
        let flows = vec![
            t[0]
                .build_flow()
                .load_reg_range(reg, 7, BitRange::new(0, 31))
                .resubmit(TableId::new(10))
                .done()
                .unwrap(),
            t[1]
                .build_flow()
                .output_reg_range(reg, BitRange::new(0, 31))
                .done()
                .unwrap(),
        ];
        let tr = trace(&flows, &t, TableId::new(0), pkt());
        assert_eq!(tr.verdict, Verdict::Output(OfPort::new(7)));
        assert_eq!(tr.pkt.regs[1], 7);
    }

    #[test]
    fn miss_follows_table_policy() {
        let t = tables();
        let tr = trace(&[], &t, TableId::new(0), pkt());
        assert_eq!(tr.verdict, Verdict::Drop);
        assert_eq!(tr.steps.len(), 2);
        assert!(tr.steps.iter().all(|s| s.flow.is_none()));

        let tr = trace(&[], &t, TableId::new(42), pkt());
        assert_eq!(tr.verdict, Verdict::NoMatch(TableId::new(42)));
    }

    #[test]
    fn ct_commit_runs_exec() {
        let t = tables();
        let flows = vec![
            t[0]
                .build_flow()
                .match_protocol(Protocol::Ip)
                .ct(
                    true,
                    Some(TableId::new(10)),
                    1,
                    vec![
                        FlowAction::Load {
                            field: Field::CtMark,
                            range: None,
                            value: 0x20,
                        },
                        FlowAction::Move {
                            src: Field::EthSrc,
                            src_range: None,
                            dst: Field::CtLabel,
                            dst_range: Some(BitRange::new(0, 47)),
                        },
                    ],
                )
                .done()
                .unwrap(),
            t[1]
                .build_flow()
                .match_ct_state(
                    CtStateMatch::new().with(CtState::NEW).with(CtState::TRK),
                )
                .set_field(FieldValue::EthDst(MacAddr::BROADCAST))
                .dec_ttl()
                .normal()
                .done()
                .unwrap(),
        ];

        let tr = trace(&flows, &t, TableId::new(0), pkt());
        assert_eq!(tr.verdict, Verdict::Normal);
        assert_eq!(tr.pkt.ct_mark, 0x20);
        assert_eq!(tr.pkt.ct_label, 0x0200_0000_0003);
        assert_eq!(tr.pkt.dl_dst, MacAddr::BROADCAST);
        assert_eq!(tr.pkt.nw_ttl, 63);
    }

    #[test]
    fn resubmit_loop_is_bounded() {
        let t = tables();
        let flows = vec![
            t[0].build_flow().resubmit(TableId::new(10)).done().unwrap(),
            t[1].build_flow().resubmit(TableId::new(0)).done().unwrap(),
        ];
        let tr = trace(&flows, &t, TableId::new(0), pkt());
        assert_eq!(tr.verdict, Verdict::LoopLimit);
        assert_eq!(tr.steps.len(), MAX_TABLE_VISITS);
    }

    #[test]
    fn arp_field_match() {
        let t = tables();
        let flows = vec![
            t[0]
                .build_flow()
                .match_protocol(Protocol::Arp)
                .match_field(MatchField::ArpTpa(Ipv4Addr::new(10, 0, 0, 1)))
                .output_in_port()
                .done()
                .unwrap(),
        ];
        let req = PacketFields::arp_request(
            OfPort::new(3),
            "02:00:00:00:00:03".parse().unwrap(),
            Ipv4Addr::new(10, 0, 0, 3),
            Ipv4Addr::new(10, 0, 0, 1),
        );
        let tr = trace(&flows, &t, TableId::new(0), req);
        assert_eq!(tr.verdict, Verdict::InPort);

        // An IP packet never satisfies an ARP flow.
        let tr = trace(&flows, &t, TableId::new(0), pkt());
        assert_eq!(tr.verdict, Verdict::Drop);
    }
}
