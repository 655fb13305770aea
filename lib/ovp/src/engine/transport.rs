// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! The seam between flow generation and the switch.

use super::flow::Flow;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("switch unavailable: {0}")]
    Unavailable(String),

    #[error("switch rejected flow batch: {0}")]
    Rejected(String),
}

/// Something that can program flows into a switch.
///
/// Each call is applied as a batch: either every flow in `flows` took
/// effect or, on error, none did. Callers rely on this to keep their
/// view of the switch consistent.
pub trait FlowTransport {
    fn add_flows(&mut self, flows: &[Flow]) -> Result<(), TransportError>;

    /// Delete flows by identity. Deleting a flow the switch doesn't
    /// have is not an error.
    fn delete_flows(&mut self, flows: &[Flow]) -> Result<(), TransportError>;
}

impl<T: FlowTransport + ?Sized> FlowTransport for &mut T {
    fn add_flows(&mut self, flows: &[Flow]) -> Result<(), TransportError> {
        (**self).add_flows(flows)
    }

    fn delete_flows(&mut self, flows: &[Flow]) -> Result<(), TransportError> {
        (**self).delete_flows(flows)
    }
}
