// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! The inventory of a single node.
//!
//! This is everything the pipeline needs to know about the node it
//! runs on and its peers in order to regenerate the complete flow set.
//! It is usually read from a TOML file.

use ovp::api::Ipv4Cidr;
use ovp::api::MacAddr;
use ovp::api::OfPort;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse node inventory: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0} has port 0, which is never a valid port")]
    ZeroPort(String),

    #[error("port {port} is claimed by both {first} and {second}")]
    DuplicatePort { port: OfPort, first: String, second: String },

    #[error("duplicate pod interface {0}")]
    DuplicateInterface(String),

    #[error("duplicate peer {0}")]
    DuplicatePeer(String),

    #[error("subnets of peers {first} ({a}) and {second} ({b}) overlap")]
    OverlappingSubnets { first: String, a: Ipv4Cidr, second: String, b: Ipv4Cidr },

    #[error("gateway IP {ip} lies inside subnet {subnet} of peer {peer}")]
    GatewayInPeerSubnet { ip: Ipv4Addr, peer: String, subnet: Ipv4Cidr },
}

/// The local gateway interface.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GatewayCfg {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub port: OfPort,
}

/// A pod interface attached to the bridge.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PodCfg {
    /// The name of the host side of the pod's interface.
    pub interface: String,
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub port: OfPort,
}

/// Another node of the cluster, reached through the tunnel.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PeerCfg {
    pub hostname: String,

    /// The peer's gateway IP, answered locally by the ARP responder.
    pub gateway_ip: Ipv4Addr,

    /// The pod subnet of the peer.
    pub subnet: Ipv4Cidr,

    /// The underlay address of the peer's tunnel endpoint.
    pub tunnel_ip: Ipv4Addr,
}

/// The overall configuration of one node.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeCfg {
    pub bridge: String,
    pub gateway: GatewayCfg,
    pub tunnel_port: OfPort,

    #[serde(default)]
    pub service_cidrs: Vec<Ipv4Cidr>,

    #[serde(default)]
    pub pods: Vec<PodCfg>,

    #[serde(default)]
    pub peers: Vec<PeerCfg>,
}

impl NodeCfg {
    /// Parse and validate an inventory from its TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate an inventory file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| {
            ConfigError::Read { path: path.display().to_string(), source }
        })?;
        Self::from_toml(&text)
    }

    /// Check the inventory is internally consistent.
    ///
    /// Flows generated from an inconsistent inventory would overlap in
    /// ways the priority scheme can't resolve, so we refuse it up
    /// front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ports: BTreeMap<OfPort, String> = BTreeMap::new();
        let mut claim = |port: OfPort, who: String| {
            if port.get() == 0 {
                return Err(ConfigError::ZeroPort(who));
            }
            match ports.get(&port) {
                Some(first) => Err(ConfigError::DuplicatePort {
                    port,
                    first: first.clone(),
                    second: who,
                }),
                None => {
                    ports.insert(port, who);
                    Ok(())
                }
            }
        };

        claim(self.gateway.port, "gateway".to_string())?;
        claim(self.tunnel_port, "tunnel".to_string())?;

        let mut ifaces = BTreeSet::new();
        for pod in &self.pods {
            if !ifaces.insert(pod.interface.as_str()) {
                return Err(ConfigError::DuplicateInterface(
                    pod.interface.clone(),
                ));
            }
            claim(pod.port, format!("pod {}", pod.interface))?;
        }

        let mut hosts = BTreeSet::new();
        for (i, peer) in self.peers.iter().enumerate() {
            if !hosts.insert(peer.hostname.as_str()) {
                return Err(ConfigError::DuplicatePeer(peer.hostname.clone()));
            }

            if peer.subnet.is_member(self.gateway.ip) {
                return Err(ConfigError::GatewayInPeerSubnet {
                    ip: self.gateway.ip,
                    peer: peer.hostname.clone(),
                    subnet: peer.subnet,
                });
            }

            for other in &self.peers[..i] {
                if other.subnet.overlaps(&peer.subnet) {
                    return Err(ConfigError::OverlappingSubnets {
                        first: other.hostname.clone(),
                        a: other.subnet,
                        second: peer.hostname.clone(),
                        b: peer.subnet,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const INVENTORY: &str = r#"
        bridge = "br-int"
        tunnel_port = 1
        service_cidrs = ["10.96.0.0/12"]

        [gateway]
        ip = "10.10.0.1"
        mac = "02:00:0a:0a:00:01"
        port = 2

        [[pods]]
        interface = "pod-a-eth0"
        ip = "10.10.0.5"
        mac = "02:00:0a:0a:00:05"
        port = 5

        [[peers]]
        hostname = "node-b"
        gateway_ip = "10.10.1.1"
        subnet = "10.10.1.0/24"
        tunnel_ip = "192.168.1.12"
    "#;

    #[test]
    fn parse_inventory() {
        let cfg = NodeCfg::from_toml(INVENTORY).unwrap();
        assert_eq!(cfg.bridge, "br-int");
        assert_eq!(cfg.gateway.port, OfPort::new(2));
        assert_eq!(cfg.pods[0].mac.to_string(), "02:00:0a:0a:00:05");
        assert_eq!(cfg.peers[0].subnet.to_string(), "10.10.1.0/24");
        assert_eq!(cfg.service_cidrs.len(), 1);
    }

    #[test]
    fn parse_error() {
        let res = NodeCfg::from_toml("bridge = 7");
        assert!(matches!(res, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn duplicate_port() {
        let mut cfg = NodeCfg::from_toml(INVENTORY).unwrap();
        cfg.pods[0].port = OfPort::new(1);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicatePort { .. })
        ));
    }

    #[test]
    fn zero_port() {
        let mut cfg = NodeCfg::from_toml(INVENTORY).unwrap();
        cfg.tunnel_port = OfPort::new(0);
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroPort(_))));
    }

    #[test]
    fn overlapping_peers() {
        let mut cfg = NodeCfg::from_toml(INVENTORY).unwrap();
        let mut peer = cfg.peers[0].clone();
        peer.hostname = "node-c".to_string();
        peer.subnet = "10.10.0.0/16".parse().unwrap();
        peer.gateway_ip = "10.10.2.1".parse().unwrap();
        cfg.peers.push(peer);
        // The new subnet also covers the local gateway; that is
        // reported first.
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::GatewayInPeerSubnet { .. })
        ));

        cfg.peers[1].subnet = "10.10.1.128/25".parse().unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OverlappingSubnets { .. })
        ));
    }

    #[test]
    fn duplicate_names() {
        let mut cfg = NodeCfg::from_toml(INVENTORY).unwrap();
        let mut pod = cfg.pods[0].clone();
        pod.port = OfPort::new(6);
        cfg.pods.push(pod);
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::DuplicateInterface(_))
        ));

        let mut cfg = NodeCfg::from_toml(INVENTORY).unwrap();
        let mut peer = cfg.peers[0].clone();
        peer.subnet = "10.10.2.0/24".parse().unwrap();
        cfg.peers.push(peer);
        assert!(matches!(cfg.validate(), Err(ConfigError::DuplicatePeer(_))));
    }
}
