// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

// Let's make our lives easier and pub use a bunch of stuff.
pub use cni_pipeline::Client;
pub use cni_pipeline::NodeCfg;
pub use cni_pipeline::Pipeline;
pub use cni_pipeline::PipelineError;
pub use cni_pipeline::cfg::GatewayCfg;
pub use cni_pipeline::cfg::PeerCfg;
pub use cni_pipeline::cfg::PodCfg;
pub use cni_pipeline::engine::*;
pub use ovp::api::Ipv4Cidr;
pub use ovp::api::MacAddr;
pub use ovp::api::OfPort;
pub use ovp::engine::CtState;
pub use ovp::engine::Flow;
pub use ovp::engine::FlowKey;
pub use ovp::engine::FlowTransport;
pub use ovp::engine::PacketFields;
pub use ovp::engine::TransportError;
pub use ovp::engine::trace::Trace;
pub use ovp::engine::trace::Verdict;
pub use ovp::engine::trace::trace;
pub use std::net::Ipv4Addr;

use slog::Logger;
use slog::o;

pub const BRIDGE: &str = "br-int";
pub const TUNNEL_PORT: OfPort = OfPort::new(1);
pub const GATEWAY_PORT: OfPort = OfPort::new(2);
pub const POD_A_PORT: OfPort = OfPort::new(5);
pub const POD_B_PORT: OfPort = OfPort::new(6);

pub const GATEWAY_MAC: MacAddr =
    MacAddr::from_const([0x02, 0x00, 0x0a, 0x0a, 0x00, 0x01]);
pub const POD_A_MAC: MacAddr =
    MacAddr::from_const([0x02, 0x00, 0x0a, 0x0a, 0x00, 0x05]);
pub const POD_B_MAC: MacAddr =
    MacAddr::from_const([0x02, 0x00, 0x0a, 0x0a, 0x00, 0x06]);

pub const GATEWAY_IP: Ipv4Addr = Ipv4Addr::new(10, 10, 0, 1);
pub const POD_A_IP: Ipv4Addr = Ipv4Addr::new(10, 10, 0, 5);
pub const POD_B_IP: Ipv4Addr = Ipv4Addr::new(10, 10, 0, 6);

pub const NODE_B_GATEWAY_IP: Ipv4Addr = Ipv4Addr::new(10, 10, 1, 1);
pub const NODE_B_POD_IP: Ipv4Addr = Ipv4Addr::new(10, 10, 1, 7);
pub const NODE_B_TUNNEL_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 12);

/// A logger that goes nowhere.
pub fn test_log() -> Logger {
    Logger::root(slog::Discard, o!())
}

pub fn gateway_cfg() -> GatewayCfg {
    GatewayCfg { ip: GATEWAY_IP, mac: GATEWAY_MAC, port: GATEWAY_PORT }
}

pub fn pod_a_cfg() -> PodCfg {
    PodCfg {
        interface: "pod-a-eth0".to_string(),
        ip: POD_A_IP,
        mac: POD_A_MAC,
        port: POD_A_PORT,
    }
}

pub fn pod_b_cfg() -> PodCfg {
    PodCfg {
        interface: "pod-b-eth0".to_string(),
        ip: POD_B_IP,
        mac: POD_B_MAC,
        port: POD_B_PORT,
    }
}

pub fn node_b_cfg() -> PeerCfg {
    PeerCfg {
        hostname: "node-b".to_string(),
        gateway_ip: NODE_B_GATEWAY_IP,
        subnet: "10.10.1.0/24".parse().unwrap(),
        tunnel_ip: NODE_B_TUNNEL_IP,
    }
}

pub fn node_c_cfg() -> PeerCfg {
    PeerCfg {
        hostname: "node-c".to_string(),
        gateway_ip: Ipv4Addr::new(10, 10, 2, 1),
        subnet: "10.10.2.0/24".parse().unwrap(),
        tunnel_ip: Ipv4Addr::new(192, 168, 1, 13),
    }
}

pub fn service_cidr() -> Ipv4Cidr {
    "10.96.0.0/12".parse().unwrap()
}

/// The canonical node: two pods, two peers and one service CIDR.
pub fn node_cfg() -> NodeCfg {
    let cfg = NodeCfg {
        bridge: BRIDGE.to_string(),
        gateway: gateway_cfg(),
        tunnel_port: TUNNEL_PORT,
        service_cidrs: vec![service_cidr()],
        pods: vec![pod_a_cfg(), pod_b_cfg()],
        peers: vec![node_b_cfg(), node_c_cfg()],
    };
    cfg.validate().unwrap();
    cfg
}

pub fn client() -> Client {
    Client::new(BRIDGE, &test_log()).unwrap()
}

/// Trace `pkt` through `flows` from the classifier.
pub fn trace_pkt(pl: &Pipeline, flows: &[Flow], pkt: PacketFields) -> Trace {
    trace(flows, pl.tables(), CLASSIFIER_TABLE, pkt)
}

/// An IP packet from pod A.
pub fn pod_a_ip_pkt(dst_mac: MacAddr, dst_ip: Ipv4Addr) -> PacketFields {
    PacketFields::ip(POD_A_PORT, POD_A_MAC, dst_mac, POD_A_IP, dst_ip)
}

/// A transport that applies every batch to an in-memory flow table.
///
/// Entries are identified the way the switch identifies them, by
/// [`FlowKey`]: adding a flow replaces the actions of any entry with the
/// same key, and deleting a flow removes the entry with its key.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub installed: Vec<Flow>,
    pub add_calls: usize,
    pub delete_calls: usize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Is exactly this flow, actions included, on the switch?
    pub fn has(&self, flow: &Flow) -> bool {
        self.installed.contains(flow)
    }

    /// The entry occupying `flow`'s key, whatever its actions.
    pub fn entry(&self, flow: &Flow) -> Option<&Flow> {
        self.installed.iter().find(|f| f.same_key(flow))
    }
}

impl FlowTransport for RecordingTransport {
    fn add_flows(&mut self, flows: &[Flow]) -> Result<(), TransportError> {
        self.add_calls += 1;
        for f in flows {
            match self.installed.iter_mut().find(|i| i.same_key(f)) {
                Some(entry) => *entry = f.clone(),
                None => self.installed.push(f.clone()),
            }
        }
        Ok(())
    }

    fn delete_flows(&mut self, flows: &[Flow]) -> Result<(), TransportError> {
        self.delete_calls += 1;
        self.installed.retain(|i| !flows.iter().any(|f| f.same_key(i)));
        Ok(())
    }
}

/// A transport that can be told to reject adds or deletes.
#[derive(Debug, Default)]
pub struct FailingTransport {
    pub inner: RecordingTransport,
    pub fail_add: bool,
    pub fail_delete: bool,
}

impl FlowTransport for FailingTransport {
    fn add_flows(&mut self, flows: &[Flow]) -> Result<(), TransportError> {
        if self.fail_add {
            return Err(TransportError::Rejected("add refused".to_string()));
        }
        self.inner.add_flows(flows)
    }

    fn delete_flows(&mut self, flows: &[Flow]) -> Result<(), TransportError> {
        if self.fail_delete {
            return Err(TransportError::Unavailable("switch gone".to_string()));
        }
        self.inner.delete_flows(flows)
    }
}
