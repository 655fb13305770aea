// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

use std::path::PathBuf;

use clap::Args;
use clap::Parser;

use cni_pipeline::Pipeline;
use ovp::api::MacAddr;
use ovp::print::print_flows;
use ovp::print::print_tables;
use ovp::print::print_trace;
use ovpadm::PacketDesc;
use slog::info;
use std::net::Ipv4Addr;

/// Inspect the CNI flow pipeline and the flows a node inventory implies.
#[derive(Debug, Parser)]
#[command(version)]
enum Command {
    /// Dump the table registry.
    DumpTables {
        /// Bridge name, only used for logging.
        #[arg(long, default_value = "br-int")]
        bridge: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Dump every flow the inventory implies, in pipeline order.
    DumpFlows {
        #[arg(short, long)]
        config: PathBuf,

        /// Only show flows in this table.
        #[arg(short, long)]
        table: Option<u8>,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Validate an inventory and the pipeline it builds.
    Check {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Walk a packet through the flows the inventory implies.
    Trace {
        #[arg(short, long)]
        config: PathBuf,

        #[command(flatten)]
        pkt: PacketArgs,
    },
}

#[derive(Args, Clone, Debug)]
struct PacketArgs {
    /// The ingress port.
    #[arg(long)]
    in_port: u32,

    #[arg(long)]
    dl_src: Option<MacAddr>,

    #[arg(long)]
    dl_dst: Option<MacAddr>,

    /// Source IP; the sender address for ARP.
    #[arg(long)]
    nw_src: Option<Ipv4Addr>,

    /// Destination IP; the target address for ARP.
    #[arg(long)]
    nw_dst: Option<Ipv4Addr>,

    /// Send an ARP request instead of an IPv4 packet.
    #[arg(long)]
    arp: bool,
}

impl From<PacketArgs> for PacketDesc {
    fn from(a: PacketArgs) -> Self {
        Self {
            in_port: a.in_port,
            dl_src: a.dl_src,
            dl_dst: a.dl_dst,
            nw_src: a.nw_src,
            nw_dst: a.nw_dst,
            arp: a.arp,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cmd = Command::parse();
    let log = ovpadm::root_logger();

    match cmd {
        Command::DumpTables { bridge, json } => {
            let pl = Pipeline::new(&bridge)?;
            if json {
                println!("{}", serde_json::to_string_pretty(pl.tables())?);
            } else {
                print_tables(pl.tables())?;
            }
        }

        Command::DumpFlows { config, table, json } => {
            let (cfg, client) = ovpadm::load(&config, &log)?;
            let flows = ovpadm::flows_for(&client, &cfg, table)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&flows)?);
            } else {
                print_flows(&flows)?;
            }
        }

        Command::Check { config } => {
            let (cfg, client) = ovpadm::load(&config, &log)?;
            let flows = client.all_flows(&cfg)?;
            let tables = client.pipeline().tables();
            for t in tables {
                let n = flows.iter().filter(|f| f.table() == t.id()).count();
                info!(log, "table ok"; "table" => t.id().get(), "flows" => n);
            }
            println!(
                "{}: {} tables, {} flows, {} pods, {} peers, {} service CIDRs",
                cfg.bridge,
                tables.len(),
                flows.len(),
                cfg.pods.len(),
                cfg.peers.len(),
                cfg.service_cidrs.len(),
            );
        }

        Command::Trace { config, pkt } => {
            let (cfg, client) = ovpadm::load(&config, &log)?;
            let desc = PacketDesc::from(pkt);
            let tr = ovpadm::trace_packet(&client, &cfg, &desc)?;
            print_trace(&tr)?;
            info!(log, "trace done";
                "verdict" => %tr.verdict, "visits" => tr.steps.len());
        }
    }

    Ok(())
}
