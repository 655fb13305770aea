// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! The flow pipeline of a Kubernetes CNI node.
//!
//! This turns a node's topology (its gateway, tunnel and pod ports,
//! its peers and the cluster's service CIDRs) into the flows of a
//! fixed multi-table switch pipeline, and keeps track of which flows
//! were installed for which entity so they can be removed again.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod cfg;
pub mod engine;

pub use ovp;
pub use ovp::api;

pub use cfg::ConfigError;
pub use cfg::NodeCfg;
pub use engine::Client;
pub use engine::Pipeline;
pub use engine::PipelineError;
