// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! The flow engine proper.

pub mod action;
pub mod flow;
pub mod predicate;
pub mod reg;
pub mod table;
pub mod trace;
pub mod transport;

pub use action::CtAction;
pub use action::Field;
pub use action::FieldValue;
pub use action::FlowAction;
pub use flow::Acting;
pub use flow::BuilderState;
pub use flow::Flow;
pub use flow::FlowBuilder;
pub use flow::FlowError;
pub use flow::FlowKey;
pub use flow::Matching;
pub use predicate::CtState;
pub use predicate::CtStateMatch;
pub use predicate::Ipv4AddrMatch;
pub use predicate::MatchField;
pub use predicate::PacketFields;
pub use predicate::Protocol;
pub use reg::BitRange;
pub use reg::NxReg;
pub use table::Bridge;
pub use table::MissAction;
pub use table::Table;
pub use table::TableId;
pub use transport::FlowTransport;
pub use transport::TransportError;
pub use trace::Trace;
pub use trace::Verdict;
