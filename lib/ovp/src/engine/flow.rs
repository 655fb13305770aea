// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Flows and the flow builder.
//!
//! A [`Flow`] is built in two phases. While the builder is in the
//! [`Matching`] state, match fields and the priority may be set. The
//! first action moves it to the [`Acting`] state, after which only
//! further actions may be appended. [`FlowBuilder::done()`] validates
//! the result and produces an immutable `Flow`.
//!
//! Every builder call consumes the builder and hands back a new one,
//! so a half-built flow can never be observed or shared.

use super::action::CtAction;
use super::action::Field;
use super::action::FieldValue;
use super::action::FlowAction;
use super::predicate::CtStateMatch;
use super::predicate::MatchField;
use super::predicate::PacketFields;
use super::predicate::Protocol;
use super::reg::BitRange;
use super::reg::NxReg;
use super::table::TableId;
use core::fmt;
use core::fmt::Display;
use core::marker::PhantomData;
use ovp_api::OfPort;
use serde::Deserialize;
use serde::Serialize;

/// The priority a flow gets when none is given, as on the switch.
pub const DEFAULT_PRIORITY: u16 = 0x8000;

/// An error found while finalizing a flow.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FlowError {
    #[error("table {0}: flow has no actions")]
    NoActions(TableId),

    #[error("table {table}: {field} is matched more than once")]
    DuplicateMatch { table: TableId, field: String },

    #[error("table {table}: {field} requires {needs}, flow matches {has}")]
    ProtocolMismatch {
        table: TableId,
        field: String,
        needs: Protocol,
        has: Protocol,
    },

    #[error("table {table}: range {range} does not fit {field}")]
    RangeOutOfBounds { table: TableId, field: String, range: BitRange },

    #[error("table {table}: value {value:#x} does not fit {field}{range}")]
    ValueTooWide {
        table: TableId,
        field: String,
        range: BitRange,
        value: u128,
    },

    #[error(
        "table {table}: move of {src_bits} bits into {dst_bits} bits"
    )]
    MoveWidthMismatch { table: TableId, src_bits: u16, dst_bits: u16 },

    #[error("table {0}: cannot resubmit to the terminal table")]
    ResubmitToLast(TableId),

    #[error("table {table}: {action} must be the last action")]
    ActionAfterTerminal { table: TableId, action: String },

    #[error("table {0}: drop cannot be combined with other actions")]
    DropNotAlone(TableId),

    #[error("table {table}: {reason}")]
    BadCtAction { table: TableId, reason: String },
}

/// The state of a [`FlowBuilder`].
pub trait BuilderState {}

/// Match fields may still be added.
#[derive(Clone, Debug)]
pub struct Matching;
impl BuilderState for Matching {}

/// At least one action has been added; the match is locked.
#[derive(Clone, Debug)]
pub struct Acting;
impl BuilderState for Acting {}

#[derive(Clone, Debug)]
pub struct FlowBuilder<S: BuilderState> {
    table: TableId,
    priority: u16,
    protocol: Option<Protocol>,
    matches: Vec<MatchField>,
    actions: Vec<FlowAction>,
    _state: PhantomData<S>,
}

impl FlowBuilder<Matching> {
    pub(crate) fn new(table: TableId) -> Self {
        Self {
            table,
            priority: DEFAULT_PRIORITY,
            protocol: None,
            matches: vec![],
            actions: vec![],
            _state: PhantomData,
        }
    }

    pub fn priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    pub fn match_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn match_field(mut self, field: MatchField) -> Self {
        self.matches.push(field);
        self
    }

    pub fn match_in_port(self, port: OfPort) -> Self {
        self.match_field(MatchField::InPort(port))
    }

    /// Match `value` in bits `range` of `reg`.
    pub fn match_reg_range(
        self,
        reg: NxReg,
        value: u32,
        range: BitRange,
    ) -> Self {
        self.match_field(MatchField::Reg { reg, range, value })
    }

    pub fn match_ct_state(self, state: CtStateMatch) -> Self {
        self.match_field(MatchField::CtState(state))
    }

    pub fn match_ct_mark(self, mark: u32) -> Self {
        self.match_field(MatchField::CtMark(mark))
    }
}

impl<S: BuilderState> FlowBuilder<S> {
    /// The table the flow will live in.
    pub fn table(&self) -> TableId {
        self.table
    }

    fn act(self, action: FlowAction) -> FlowBuilder<Acting> {
        let mut actions = self.actions;
        actions.push(action);
        FlowBuilder {
            table: self.table,
            priority: self.priority,
            protocol: self.protocol,
            matches: self.matches,
            actions,
            _state: PhantomData,
        }
    }

    pub fn resubmit(self, table: TableId) -> FlowBuilder<Acting> {
        self.act(FlowAction::Resubmit(table))
    }

    pub fn drop(self) -> FlowBuilder<Acting> {
        self.act(FlowAction::Drop)
    }

    pub fn normal(self) -> FlowBuilder<Acting> {
        self.act(FlowAction::Normal)
    }

    pub fn output(self, port: OfPort) -> FlowBuilder<Acting> {
        self.act(FlowAction::Output(port))
    }

    pub fn output_in_port(self) -> FlowBuilder<Acting> {
        self.act(FlowAction::OutputInPort)
    }

    /// Output to the port number held in `range` of `reg`.
    pub fn output_reg_range(
        self,
        reg: NxReg,
        range: BitRange,
    ) -> FlowBuilder<Acting> {
        self.act(FlowAction::OutputField { field: Field::Reg(reg), range })
    }

    /// Load `value` into bits `range` of `reg`.
    pub fn load_reg_range(
        self,
        reg: NxReg,
        value: u32,
        range: BitRange,
    ) -> FlowBuilder<Acting> {
        self.act(FlowAction::Load {
            field: Field::Reg(reg),
            range: Some(range),
            value: u64::from(value),
        })
    }

    /// Load `value` into the whole of `field`.
    pub fn load(self, field: Field, value: u64) -> FlowBuilder<Acting> {
        self.act(FlowAction::Load { field, range: None, value })
    }

    /// Copy the whole of `src` into the whole of `dst`.
    pub fn move_field(self, src: Field, dst: Field) -> FlowBuilder<Acting> {
        self.act(FlowAction::Move {
            src,
            src_range: None,
            dst,
            dst_range: None,
        })
    }

    pub fn move_range(
        self,
        src: Field,
        dst: Field,
        src_range: BitRange,
        dst_range: BitRange,
    ) -> FlowBuilder<Acting> {
        self.act(FlowAction::Move {
            src,
            src_range: Some(src_range),
            dst,
            dst_range: Some(dst_range),
        })
    }

    pub fn set_field(self, value: FieldValue) -> FlowBuilder<Acting> {
        self.act(FlowAction::SetField(value))
    }

    /// Send the packet through conntrack in `zone`, optionally
    /// committing it and running `exec` against the connection, then
    /// continue in `table`.
    pub fn ct(
        self,
        commit: bool,
        table: Option<TableId>,
        zone: u16,
        exec: Vec<FlowAction>,
    ) -> FlowBuilder<Acting> {
        self.act(FlowAction::Ct(CtAction { commit, table, zone, exec }))
    }

    pub fn dec_ttl(self) -> FlowBuilder<Acting> {
        self.act(FlowAction::DecTtl)
    }
}

impl FlowBuilder<Acting> {
    /// Finalize the flow; locking its match and actions in stone.
    pub fn done(self) -> Result<Flow, FlowError> {
        let table = self.table;

        for (i, m) in self.matches.iter().enumerate() {
            if self.matches[..i].iter().any(|prev| prev.conflicts(m)) {
                return Err(FlowError::DuplicateMatch {
                    table,
                    field: m.to_string(),
                });
            }

            if let (Some(needs), Some(has)) = (m.protocol(), self.protocol) {
                if needs != has {
                    return Err(FlowError::ProtocolMismatch {
                        table,
                        field: m.to_string(),
                        needs,
                        has,
                    });
                }
            }

            if let MatchField::Reg { reg, range, value } = m {
                check_fits(table, Field::Reg(*reg), Some(*range), u128::from(*value))?;
            }
        }

        if self.actions.is_empty() {
            return Err(FlowError::NoActions(table));
        }

        let last = self.actions.len() - 1;
        for (i, act) in self.actions.iter().enumerate() {
            if act.is_terminal() && i != last {
                return Err(FlowError::ActionAfterTerminal {
                    table,
                    action: act.to_string(),
                });
            }

            if matches!(act, FlowAction::Drop) && self.actions.len() != 1 {
                return Err(FlowError::DropNotAlone(table));
            }

            check_action(table, act)?;
        }

        Ok(Flow {
            table,
            priority: self.priority,
            protocol: self.protocol,
            matches: self.matches,
            actions: self.actions,
        })
    }
}

fn field_name(field: Field, range: Option<BitRange>) -> String {
    match range {
        Some(r) => format!("{}{}", field.nxm(), r),
        None => field.nxm(),
    }
}

fn check_range(
    table: TableId,
    field: Field,
    range: Option<BitRange>,
) -> Result<BitRange, FlowError> {
    let range = range.unwrap_or(BitRange::full(field.bits()));
    if !range.fits(field.bits()) {
        return Err(FlowError::RangeOutOfBounds {
            table,
            field: field.nxm(),
            range,
        });
    }
    Ok(range)
}

fn check_fits(
    table: TableId,
    field: Field,
    range: Option<BitRange>,
    value: u128,
) -> Result<(), FlowError> {
    let r = check_range(table, field, range)?;
    if !r.holds(value) {
        return Err(FlowError::ValueTooWide {
            table,
            field: field.nxm(),
            range: r,
            value,
        });
    }
    Ok(())
}

fn check_action(table: TableId, act: &FlowAction) -> Result<(), FlowError> {
    match act {
        FlowAction::Resubmit(t) if t.is_last() => {
            Err(FlowError::ResubmitToLast(table))
        }

        FlowAction::OutputField { field, range } => {
            check_range(table, *field, Some(*range)).map(|_| ())
        }

        FlowAction::Load { field, range, value } => {
            if field.is_ct_metadata() {
                return Err(FlowError::BadCtAction {
                    table,
                    reason: format!(
                        "{} may only be written inside ct(commit)",
                        field_name(*field, *range)
                    ),
                });
            }
            check_fits(table, *field, *range, u128::from(*value))
        }

        FlowAction::Move { src, src_range, dst, dst_range } => {
            if dst.is_ct_metadata() {
                return Err(FlowError::BadCtAction {
                    table,
                    reason: format!(
                        "{} may only be written inside ct(commit)",
                        field_name(*dst, *dst_range)
                    ),
                });
            }
            check_move(table, *src, *src_range, *dst, *dst_range)
        }

        FlowAction::Ct(ct) => check_ct(table, ct),

        _ => Ok(()),
    }
}

fn check_move(
    table: TableId,
    src: Field,
    src_range: Option<BitRange>,
    dst: Field,
    dst_range: Option<BitRange>,
) -> Result<(), FlowError> {
    let s = check_range(table, src, src_range)?;
    let d = check_range(table, dst, dst_range)?;
    if s.width() != d.width() {
        return Err(FlowError::MoveWidthMismatch {
            table,
            src_bits: s.width(),
            dst_bits: d.width(),
        });
    }
    Ok(())
}

fn check_ct(table: TableId, ct: &CtAction) -> Result<(), FlowError> {
    if let Some(t) = ct.table {
        if t.is_last() {
            return Err(FlowError::ResubmitToLast(table));
        }
    }

    if !ct.exec.is_empty() && !ct.commit {
        return Err(FlowError::BadCtAction {
            table,
            reason: "exec() requires commit".to_string(),
        });
    }

    for act in &ct.exec {
        match act {
            FlowAction::Load { field, range, value }
                if field.is_ct_metadata() =>
            {
                check_fits(table, *field, *range, u128::from(*value))?;
            }

            FlowAction::Move { src, src_range, dst, dst_range }
                if dst.is_ct_metadata() =>
            {
                check_move(table, *src, *src_range, *dst, *dst_range)?;
            }

            _ => {
                return Err(FlowError::BadCtAction {
                    table,
                    reason: format!("{act} is not allowed in exec()"),
                });
            }
        }
    }

    Ok(())
}

/// The part of a flow the switch identifies it by: table, priority and
/// match. Adding a flow whose key is already present replaces that
/// entry's actions, and a strict delete removes whatever entry has the
/// key.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FlowKey {
    table: TableId,
    priority: u16,
    protocol: Option<Protocol>,
    matches: Vec<MatchField>,
}

impl FlowKey {
    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }
}

/// An immutable flow entry.
///
/// Two flows are equal when they share a [`FlowKey`] and have the same
/// action list, in the same order. Equality is what regeneration must
/// reproduce; the switch itself only tells flows apart by key.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Flow {
    table: TableId,
    priority: u16,
    protocol: Option<Protocol>,
    matches: Vec<MatchField>,
    actions: Vec<FlowAction>,
}

impl Flow {
    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    pub fn matches(&self) -> &[MatchField] {
        &self.matches
    }

    /// The identity of this flow on the switch.
    pub fn key(&self) -> FlowKey {
        FlowKey {
            table: self.table,
            priority: self.priority,
            protocol: self.protocol,
            matches: self.matches.clone(),
        }
    }

    /// Does `other` occupy the same switch entry as this flow?
    pub fn same_key(&self, other: &Flow) -> bool {
        self.table == other.table
            && self.priority == other.priority
            && self.protocol == other.protocol
            && self.matches == other.matches
    }

    pub fn actions(&self) -> &[FlowAction] {
        &self.actions
    }

    /// Does the packet satisfy this flow's match?
    ///
    /// A flow with no match fields matches anything of its protocol.
    pub fn is_match(&self, pkt: &PacketFields) -> bool {
        if let Some(proto) = self.protocol {
            if pkt.protocol != Some(proto) {
                return false;
            }
        }

        self.matches.iter().all(|m| m.is_match(pkt))
    }

    /// The match portion in `ovs-ofctl` syntax, without table and
    /// priority.
    pub fn match_string(&self) -> String {
        let mut parts: Vec<String> = vec![];
        if let Some(proto) = self.protocol {
            parts.push(proto.to_string());
        }
        parts.extend(self.matches.iter().map(ToString::to_string));
        parts.join(",")
    }

    /// The action portion in `ovs-ofctl` syntax.
    pub fn action_string(&self) -> String {
        self.actions
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "table={},priority={}", self.table, self.priority)?;
        let m = self.match_string();
        if !m.is_empty() {
            write!(f, ",{m}")?;
        }
        write!(f, ",actions={}", self.action_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::predicate::CtState;
    use crate::engine::table::Bridge;
    use crate::engine::table::MissAction;
    use ovp_api::MacAddr;

    fn table() -> crate::engine::table::Table {
        Bridge::new("br-test").create_table(
            TableId::new(80),
            TableId::new(110),
            MissAction::Next,
        )
    }

    #[test]
    fn build_and_render() {
        let mac: MacAddr = "02:00:00:00:00:01".parse().unwrap();
        let flow = table()
            .build_flow()
            .priority(200)
            .match_field(MatchField::EthDst(mac))
            .load_reg_range(NxReg::new(1), 3, BitRange::new(0, 31))
            .load_reg_range(NxReg::new(0), 1, BitRange::new(16, 31))
            .resubmit(TableId::new(110))
            .done()
            .unwrap();

        assert_eq!(
            flow.to_string(),
            "table=80,priority=200,dl_dst=02:00:00:00:00:01,\
             actions=load:0x3->NXM_NX_REG1[0..31],\
             load:0x1->NXM_NX_REG0[16..31],resubmit(,110)"
        );
    }

    #[test]
    fn identical_builds_are_equal() {
        let build = || {
            table()
                .build_flow()
                .priority(200)
                .match_protocol(Protocol::Ip)
                .match_ct_state(CtStateMatch::new().with(CtState::TRK))
                .resubmit(TableId::new(110))
                .done()
                .unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn json_form() {
        let flow = table()
            .build_flow()
            .priority(200)
            .match_protocol(Protocol::Ip)
            .match_ct_state(CtStateMatch::new().with(CtState::TRK))
            .match_field(MatchField::EthDst(MacAddr::BROADCAST))
            .resubmit(TableId::new(110))
            .done()
            .unwrap();
        let json = serde_json::to_string(&flow).unwrap();
        assert!(json.contains("\"ff:ff:ff:ff:ff:ff\""), "{json}");
        let back: Flow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flow);
    }

    #[test]
    fn key_ignores_actions() {
        let build = |port| {
            table()
                .build_flow()
                .priority(200)
                .match_field(MatchField::EthDst(MacAddr::BROADCAST))
                .output(OfPort::new(port))
                .done()
                .unwrap()
        };
        let (a, b) = (build(1), build(2));
        assert_ne!(a, b);
        assert!(a.same_key(&b));
        assert_eq!(a.key(), b.key());

        let c = table()
            .build_flow()
            .priority(190)
            .match_field(MatchField::EthDst(MacAddr::BROADCAST))
            .output(OfPort::new(1))
            .done()
            .unwrap();
        assert!(!a.same_key(&c));
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn value_too_wide() {
        let res = table()
            .build_flow()
            .load_reg_range(NxReg::new(0), 0x1_0000, BitRange::new(0, 15))
            .done();
        assert!(matches!(res, Err(FlowError::ValueTooWide { .. })));

        let res = table()
            .build_flow()
            .match_reg_range(NxReg::new(0), 0x1_0000, BitRange::new(16, 31))
            .normal()
            .done();
        assert!(matches!(res, Err(FlowError::ValueTooWide { .. })));
    }

    #[test]
    fn range_out_of_bounds() {
        let res = table()
            .build_flow()
            .load_reg_range(NxReg::new(0), 1, BitRange::new(16, 47))
            .done();
        assert!(matches!(res, Err(FlowError::RangeOutOfBounds { .. })));
    }

    #[test]
    fn resubmit_to_last() {
        let res = table().build_flow().resubmit(TableId::LAST).done();
        assert_eq!(res, Err(FlowError::ResubmitToLast(TableId::new(80))));
    }

    #[test]
    fn terminal_must_be_last() {
        let res = table()
            .build_flow()
            .output(OfPort::new(1))
            .resubmit(TableId::new(110))
            .done();
        assert!(matches!(res, Err(FlowError::ActionAfterTerminal { .. })));
    }

    #[test]
    fn protocol_mismatch() {
        let res = table()
            .build_flow()
            .match_protocol(Protocol::Ip)
            .match_field(MatchField::ArpOp(1))
            .normal()
            .done();
        assert!(matches!(res, Err(FlowError::ProtocolMismatch { .. })));
    }

    #[test]
    fn duplicate_match() {
        let res = table()
            .build_flow()
            .match_in_port(OfPort::new(1))
            .match_in_port(OfPort::new(2))
            .normal()
            .done();
        assert!(matches!(res, Err(FlowError::DuplicateMatch { .. })));
    }

    #[test]
    fn ct_exec_rules() {
        let mark = FlowAction::Load {
            field: Field::CtMark,
            range: None,
            value: 0x20,
        };

        let res = table()
            .build_flow()
            .ct(false, Some(TableId::new(110)), 1, vec![mark.clone()])
            .done();
        assert!(matches!(res, Err(FlowError::BadCtAction { .. })));

        let res = table()
            .build_flow()
            .ct(true, Some(TableId::new(110)), 1, vec![FlowAction::DecTtl])
            .done();
        assert!(matches!(res, Err(FlowError::BadCtAction { .. })));

        let res = table().build_flow().load(Field::CtMark, 0x20).done();
        assert!(matches!(res, Err(FlowError::BadCtAction { .. })));

        let flow = table()
            .build_flow()
            .ct(true, Some(TableId::new(110)), 1, vec![mark])
            .done()
            .unwrap();
        assert_eq!(flow.actions().len(), 1);
    }

    #[test]
    fn no_actions() {
        // The typestate forbids calling done() before an action, so
        // the only empty list reachable is through an empty builder
        // that was converted by hand.
        let b = FlowBuilder::<Acting> {
            table: TableId::new(80),
            priority: 1,
            protocol: None,
            matches: vec![],
            actions: vec![],
            _state: PhantomData,
        };
        assert_eq!(b.done(), Err(FlowError::NoActions(TableId::new(80))));
    }
}
