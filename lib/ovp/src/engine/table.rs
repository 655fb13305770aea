// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Pipeline tables.
//!
//! A table is one stage of the pipeline. It knows the table that
//! follows it and what the switch should do with a packet no flow in
//! the table matched. Tables are ordered by their `next` pointer, not
//! by their numeric id: ids leave gaps so that stages can be inserted
//! later without renumbering.

use super::flow::FlowBuilder;
use super::flow::Matching;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// The id of an OpenFlow table.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct TableId(u8);

impl TableId {
    /// The terminal sentinel. A table whose `next` is `LAST` ends the
    /// pipeline; nothing may be resubmitted to it.
    pub const LAST: Self = Self(u8::MAX);

    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn is_last(self) -> bool {
        self.0 == u8::MAX
    }
}

impl Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_last() { write!(f, "LAST") } else { write!(f, "{}", self.0) }
    }
}

/// What a table does with a packet that matched none of its flows.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum MissAction {
    /// Continue at the table's `next` table.
    Next,
    /// Hand the packet to the switch's built-in L2 learning switch.
    Normal,
    /// Drop the packet.
    Drop,
}

impl Display for MissAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Next => write!(f, "next"),
            Self::Normal => write!(f, "normal"),
            Self::Drop => write!(f, "drop"),
        }
    }
}

/// One stage of the pipeline. Immutable once created.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Table {
    id: TableId,
    next: TableId,
    miss_action: MissAction,
}

impl Table {
    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn next(&self) -> TableId {
        self.next
    }

    pub fn miss_action(&self) -> MissAction {
        self.miss_action
    }

    /// Start building a flow that lives in this table.
    pub fn build_flow(&self) -> FlowBuilder<Matching> {
        FlowBuilder::new(self.id)
    }
}

/// The switch bridge owning the pipeline's tables.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Bridge {
    name: String,
}

impl Bridge {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a table on this bridge.
    ///
    /// Whether `next` resolves is a property of the whole pipeline,
    /// so it is the caller's job to verify once all tables exist.
    pub fn create_table(
        &self,
        id: TableId,
        next: TableId,
        miss_action: MissAction,
    ) -> Table {
        Table { id, next, miss_action }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn create_table() {
        let br = Bridge::new("br-int");
        let t = br.create_table(TableId::new(0), TableId::new(10), MissAction::Next);
        assert_eq!(t.id(), TableId::new(0));
        assert_eq!(t.next(), TableId::new(10));
        assert_eq!(t.miss_action(), MissAction::Next);
        assert_eq!(br.name(), "br-int");
    }

    #[test]
    fn last_sentinel() {
        assert!(TableId::LAST.is_last());
        assert!(!TableId::new(0).is_last());
        assert_eq!(TableId::LAST.to_string(), "LAST");
    }
}
