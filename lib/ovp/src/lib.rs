// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! The Open vSwitch Pipeline flow engine.
//!
//! This crate models the pieces of an OpenFlow switch that a pipeline
//! generator needs to reason about: tables chained by an explicit
//! "next" pointer, immutable flows built through a typestate builder,
//! the match fields and actions those flows carry, and the seam
//! through which flows are handed to the switch. It performs no wire
//! encoding and never talks to a switch itself.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub use ovp_api as api;

pub mod engine;
#[cfg(feature = "std")]
pub mod print;
