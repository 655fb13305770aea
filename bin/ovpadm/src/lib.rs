// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! Support routines for `ovpadm`.

use anyhow::Context;
use cni_pipeline::Client;
use cni_pipeline::NodeCfg;
use cni_pipeline::engine::CLASSIFIER_TABLE;
use ovp::api::MacAddr;
use ovp::api::OfPort;
use ovp::engine::Flow;
use ovp::engine::PacketFields;
use ovp::engine::TableId;
use ovp::engine::trace::Trace;
use ovp::engine::trace::trace;
use slog::Drain;
use slog::Logger;
use slog::o;
use std::net::Ipv4Addr;
use std::path::Path;

/// Build the root logger: terminal output, filtered by `RUST_LOG`.
pub fn root_logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "ovpadm"))
}

/// Load an inventory and build a client for its bridge.
pub fn load(path: &Path, log: &Logger) -> anyhow::Result<(NodeCfg, Client)> {
    let cfg = NodeCfg::load(path)
        .with_context(|| format!("loading inventory {}", path.display()))?;
    let client = Client::new(&cfg.bridge, log)
        .with_context(|| format!("building pipeline for {}", cfg.bridge))?;
    Ok((cfg, client))
}

/// The flows implied by `cfg`, optionally restricted to one table.
pub fn flows_for(
    client: &Client,
    cfg: &NodeCfg,
    table: Option<u8>,
) -> anyhow::Result<Vec<Flow>> {
    let mut flows = client.all_flows(cfg).context("generating flows")?;
    if let Some(id) = table {
        let id = TableId::new(id);
        client.table(id)?;
        flows.retain(|f| f.table() == id);
    }
    Ok(flows)
}

/// A packet described on the command line.
#[derive(Clone, Debug, Default)]
pub struct PacketDesc {
    pub in_port: u32,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub arp: bool,
}

impl PacketDesc {
    /// With `arp` set this is a request from `dl_src`/`nw_src` for
    /// `nw_dst`; otherwise it is an IPv4 packet.
    pub fn to_fields(&self) -> PacketFields {
        let src = self.dl_src.unwrap_or(MacAddr::ZERO);
        let spa = self.nw_src.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let tpa = self.nw_dst.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let port = OfPort::new(self.in_port);

        if self.arp {
            let mut pkt = PacketFields::arp_request(port, src, spa, tpa);
            if let Some(dst) = self.dl_dst {
                pkt.dl_dst = dst;
            }
            pkt
        } else {
            let dst = self.dl_dst.unwrap_or(MacAddr::ZERO);
            PacketFields::ip(port, src, dst, spa, tpa)
        }
    }
}

/// Trace a packet through everything `cfg` implies.
pub fn trace_packet(
    client: &Client,
    cfg: &NodeCfg,
    desc: &PacketDesc,
) -> anyhow::Result<Trace> {
    let flows = client.all_flows(cfg).context("generating flows")?;
    Ok(trace(
        &flows,
        client.pipeline().tables(),
        CLASSIFIER_TABLE,
        desc.to_fields(),
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use ovp::engine::Protocol;
    use ovp::engine::trace::Verdict;

    const INVENTORY: &str = r#"
        bridge = "br-int"
        tunnel_port = 1

        [gateway]
        ip = "10.10.0.1"
        mac = "02:00:0a:0a:00:01"
        port = 2

        [[pods]]
        interface = "pod-a-eth0"
        ip = "10.10.0.5"
        mac = "02:00:0a:0a:00:05"
        port = 5
    "#;

    fn setup() -> (NodeCfg, Client) {
        let cfg = NodeCfg::from_toml(INVENTORY).unwrap();
        let log = Logger::root(slog::Discard, o!());
        let client = Client::new(&cfg.bridge, &log).unwrap();
        (cfg, client)
    }

    #[test]
    fn arp_request_fields() {
        let desc = PacketDesc {
            in_port: 5,
            nw_src: Some("10.10.0.5".parse().unwrap()),
            nw_dst: Some("10.10.0.1".parse().unwrap()),
            arp: true,
            ..Default::default()
        };
        let pkt = desc.to_fields();
        assert_eq!(pkt.protocol, Some(Protocol::Arp));
        assert_eq!(pkt.dl_dst, MacAddr::BROADCAST);
        assert_eq!(pkt.arp_tpa, Some("10.10.0.1".parse().unwrap()));
    }

    #[test]
    fn table_filter() {
        let (cfg, client) = setup();
        let flows = flows_for(&client, &cfg, Some(80)).unwrap();
        // Gateway, tunnel and one pod.
        assert_eq!(flows.iter().filter(|f| f.priority() == 200).count(), 3);
        assert!(flows.iter().all(|f| f.table() == TableId::new(80)));
        assert!(flows_for(&client, &cfg, Some(99)).is_err());
    }

    #[test]
    fn trace_to_gateway() {
        let (cfg, client) = setup();
        let desc = PacketDesc {
            in_port: 5,
            dl_src: Some("02:00:0a:0a:00:05".parse().unwrap()),
            dl_dst: Some("02:00:0a:0a:00:01".parse().unwrap()),
            nw_src: Some("10.10.0.5".parse().unwrap()),
            nw_dst: Some("10.10.0.1".parse().unwrap()),
            arp: false,
        };
        let tr = trace_packet(&client, &cfg, &desc).unwrap();
        assert_eq!(tr.verdict, Verdict::Output(OfPort::new(2)));
    }
}
