// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 The OVP Authors

//! The CNI flow pipeline.
//!
//! # Tables
//!
//! The pipeline is a fixed chain of tables. A packet enters at the
//! classifier and is handed stage to stage by `resubmit` until some
//! stage outputs or drops it:
//!
//! ```text
//! classifier -> spoof guard -> conntrack -> conntrack state -> dnat
//!     -> l3 forwarding -> l2 forwarding calc -> l2 forwarding out
//!                  \
//!                   -> arp responder
//! ```
//!
//! # Registers
//!
//! Stages that are not adjacent share per-packet state through two
//! registers. `reg0` is split in two: bits `[0..15]` hold the
//! [`TrafficSource`] the classifier found, and bits `[16..31]` hold
//! the port-found flag set by L2 forwarding calc. `reg1` holds the
//! output port L2 forwarding calc resolved. Every field has exactly one
//! writer table, see [`RegField::owner()`].
//!
//! # Connection marks
//!
//! Connections initiated from the gateway are stamped with
//! [`GATEWAY_CT_MARK`] and carry the initiator's MAC in the low 48 bits
//! of `ct_label`, so the reply path can restore it.

use crate::cfg::GatewayCfg;
use crate::cfg::NodeCfg;
use crate::cfg::PeerCfg;
use crate::cfg::PodCfg;
use cache::FlowCache;
use core::fmt;
use core::fmt::Display;
use ovp::api::Ipv4Cidr;
use ovp::api::MacAddr;
use ovp::api::OfPort;
use ovp::engine::Acting;
use ovp::engine::BitRange;
use ovp::engine::Bridge;
use ovp::engine::BuilderState;
use ovp::engine::Flow;
use ovp::engine::FlowBuilder;
use ovp::engine::FlowError;
use ovp::engine::FlowTransport;
use ovp::engine::MissAction;
use ovp::engine::NxReg;
use ovp::engine::Protocol;
use ovp::engine::Table;
use ovp::engine::TableId;
use ovp::engine::TransportError;
use slog::Logger;
use slog::debug;
use slog::info;
use slog::o;
use std::cmp::Reverse;

pub mod arp;
pub mod cache;
pub mod classifier;
pub mod conntrack;
pub mod l2_forwarding;
pub mod l3_forwarding;
pub mod service;
pub mod spoof_guard;

pub const CLASSIFIER_TABLE: TableId = TableId::new(0);
pub const SPOOF_GUARD_TABLE: TableId = TableId::new(10);
pub const ARP_RESPONDER_TABLE: TableId = TableId::new(20);
pub const CONNTRACK_TABLE: TableId = TableId::new(30);
pub const CONNTRACK_STATE_TABLE: TableId = TableId::new(31);
pub const DNAT_TABLE: TableId = TableId::new(40);
pub const L3_FORWARDING_TABLE: TableId = TableId::new(70);
pub const L2_FORWARDING_CALC_TABLE: TableId = TableId::new(80);
pub const L2_FORWARDING_OUT_TABLE: TableId = TableId::new(110);

/// The priority of every table's catch-all flow.
pub const PRIORITY_MISS: u16 = 80;
pub const PRIORITY_LOW: u16 = 190;
pub const PRIORITY_NORMAL: u16 = 200;
pub const PRIORITY_HIGH: u16 = 210;

/// The conntrack zone of all connections this pipeline tracks.
pub const CT_ZONE: u16 = 0xfff0;

/// The `ct_mark` of connections initiated from the gateway.
pub const GATEWAY_CT_MARK: u32 = 0x20;

/// The `ct_label` bits holding the gateway-side MAC.
pub const CT_LABEL_MAC_RANGE: BitRange = BitRange::new(0, 47);

/// The placeholder next-hop MAC of routed inter-node traffic. It is
/// replaced by a real MAC on the last hop and never resolves to an
/// interface.
pub const GLOBAL_VIRTUAL_MAC: MacAddr =
    MacAddr::from_const([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

/// The table layout: `(id, next, miss action)` in pipeline order.
pub const TABLE_LAYOUT: [(TableId, TableId, MissAction); 9] = [
    (CLASSIFIER_TABLE, SPOOF_GUARD_TABLE, MissAction::Next),
    (SPOOF_GUARD_TABLE, CONNTRACK_TABLE, MissAction::Drop),
    (ARP_RESPONDER_TABLE, TableId::LAST, MissAction::Drop),
    (CONNTRACK_TABLE, CONNTRACK_STATE_TABLE, MissAction::Next),
    (CONNTRACK_STATE_TABLE, DNAT_TABLE, MissAction::Next),
    (DNAT_TABLE, L3_FORWARDING_TABLE, MissAction::Next),
    (L3_FORWARDING_TABLE, L2_FORWARDING_CALC_TABLE, MissAction::Next),
    (L2_FORWARDING_CALC_TABLE, L2_FORWARDING_OUT_TABLE, MissAction::Next),
    (L2_FORWARDING_OUT_TABLE, TableId::LAST, MissAction::Drop),
];

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("table {table} points at missing table {next}")]
    DanglingTable { table: TableId, next: TableId },

    #[error("table {0} is defined more than once")]
    DuplicateTable(TableId),

    #[error("no such table {0}")]
    NoSuchTable(TableId),

    #[error("table {table} may not write {field}, owned by table {owner}")]
    RegisterOwnership { table: TableId, field: RegField, owner: TableId },

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The registers the pipeline uses.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Register {
    /// `reg0`: traffic source and port-found flag.
    Marks,
    /// `reg1`: the resolved output port.
    PortCache,
}

impl Register {
    pub const fn id(self) -> u8 {
        match self {
            Self::Marks => 0,
            Self::PortCache => 1,
        }
    }

    pub const fn nx(self) -> NxReg {
        NxReg::new(self.id())
    }

    /// The name used in matches, e.g. `reg0`.
    pub fn reg(self) -> String {
        self.nx().reg()
    }

    /// The name used in actions, e.g. `NXM_NX_REG0`.
    pub fn nxm(self) -> String {
        self.nx().nxm()
    }
}

/// A field of one of the pipeline's registers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RegField {
    SourceMark,
    PortFound,
    PortCache,
}

impl RegField {
    pub const fn register(self) -> Register {
        match self {
            Self::SourceMark | Self::PortFound => Register::Marks,
            Self::PortCache => Register::PortCache,
        }
    }

    pub const fn range(self) -> BitRange {
        match self {
            Self::SourceMark => BitRange::new(0, 15),
            Self::PortFound => BitRange::new(16, 31),
            Self::PortCache => BitRange::new(0, 31),
        }
    }

    /// The only table allowed to write the field.
    pub const fn owner(self) -> TableId {
        match self {
            Self::SourceMark => CLASSIFIER_TABLE,
            Self::PortFound | Self::PortCache => L2_FORWARDING_CALC_TABLE,
        }
    }
}

impl Display for RegField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.register().reg(), self.range())
    }
}

/// Where a packet entered the bridge.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrafficSource {
    Tunnel,
    Gateway,
    Local,
}

impl TrafficSource {
    pub const fn mark(self) -> u32 {
        match self {
            Self::Tunnel => 0,
            Self::Gateway => 1,
            Self::Local => 2,
        }
    }

    pub const fn from_mark(mark: u32) -> Option<Self> {
        match mark {
            0 => Some(Self::Tunnel),
            1 => Some(Self::Gateway),
            2 => Some(Self::Local),
            _ => None,
        }
    }
}

impl Display for TrafficSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Tunnel => "tunnel",
            Self::Gateway => "gateway",
            Self::Local => "local",
        };
        write!(f, "{s}")
    }
}

/// The value of the port-found field once a port has been resolved.
pub const PORT_FOUND: u32 = 0x1;

/// The decoded contents of the marks register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Marks {
    pub source: TrafficSource,
    pub port_found: bool,
}

impl Marks {
    pub fn to_reg(self) -> u32 {
        let found = if self.port_found { PORT_FOUND } else { 0 };
        let val = RegField::SourceMark
            .range()
            .deposit(0, u128::from(self.source.mark()));
        let val = RegField::PortFound.range().deposit(val, u128::from(found));
        // Both fields lie within the register's 32 bits.
        val as u32
    }

    pub fn from_reg(val: u32) -> Option<Self> {
        let val = u128::from(val);
        let source = RegField::SourceMark.range().extract(val) as u32;
        let found = RegField::PortFound.range().extract(val) as u32;
        let port_found = match found {
            0 => false,
            PORT_FOUND => true,
            _ => return None,
        };
        Some(Self { source: TrafficSource::from_mark(source)?, port_found })
    }
}

/// The table registry, and the generators of every flow the pipeline
/// needs.
///
/// Generation is a pure function of the registry and its inputs: the
/// same inputs always produce equal flows, in the same order.
#[derive(Clone, Debug)]
pub struct Pipeline {
    bridge: Bridge,
    tables: Vec<Table>,
}

impl Pipeline {
    /// Build the pipeline's tables on `bridge`.
    pub fn new(bridge: &str) -> Result<Self, PipelineError> {
        Self::with_layout(bridge, &TABLE_LAYOUT)
    }

    /// Build a pipeline from an arbitrary layout, checking that every
    /// `next` pointer resolves.
    pub fn with_layout(
        bridge: &str,
        layout: &[(TableId, TableId, MissAction)],
    ) -> Result<Self, PipelineError> {
        let bridge = Bridge::new(bridge);
        let mut tables: Vec<Table> = vec![];
        for (id, next, miss) in layout {
            if tables.iter().any(|t| t.id() == *id) {
                return Err(PipelineError::DuplicateTable(*id));
            }
            tables.push(bridge.create_table(*id, *next, *miss));
        }

        for t in &tables {
            let found = tables.iter().any(|o| o.id() == t.next());
            let terminal = t.next().is_last() && t.miss_action() != MissAction::Next;
            if !found && !terminal {
                return Err(PipelineError::DanglingTable {
                    table: t.id(),
                    next: t.next(),
                });
            }
        }

        Ok(Self { bridge, tables })
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// The tables in pipeline order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, id: TableId) -> Result<&Table, PipelineError> {
        self.tables
            .iter()
            .find(|t| t.id() == id)
            .ok_or(PipelineError::NoSuchTable(id))
    }

    fn position(&self, id: TableId) -> usize {
        self.tables.iter().position(|t| t.id() == id).unwrap_or(usize::MAX)
    }

    /// Load `value` into a register field, provided the flow lives in
    /// the table owning it.
    pub(crate) fn load_reg<S: BuilderState>(
        &self,
        builder: FlowBuilder<S>,
        field: RegField,
        value: u32,
    ) -> Result<FlowBuilder<Acting>, PipelineError> {
        if builder.table() != field.owner() {
            return Err(PipelineError::RegisterOwnership {
                table: builder.table(),
                field,
                owner: field.owner(),
            });
        }

        Ok(builder.load_reg_range(
            field.register().nx(),
            value,
            field.range(),
        ))
    }

    /// One catch-all IP flow per table, implementing the table's miss
    /// action, in pipeline order.
    pub fn default_flows(&self) -> Result<Vec<Flow>, PipelineError> {
        let mut flows = vec![];
        for t in &self.tables {
            let b = t
                .build_flow()
                .priority(PRIORITY_MISS)
                .match_protocol(Protocol::Ip);
            let b = match t.miss_action() {
                MissAction::Next => b.resubmit(t.next()),
                MissAction::Normal => b.normal(),
                MissAction::Drop => b.drop(),
            };
            flows.push(b.done()?);
        }
        Ok(flows)
    }

    /// Flows every node needs regardless of inventory.
    pub fn init_flows(&self) -> Result<Vec<Flow>, PipelineError> {
        let mut flows = self.default_flows()?;
        flows.extend(self.conntrack_flows()?);
        flows.push(self.l2_forward_output_flow()?);
        flows.push(self.arp_normal_flow()?);
        Ok(flows)
    }

    pub fn gateway_flows(
        &self,
        gw: &GatewayCfg,
    ) -> Result<Vec<Flow>, PipelineError> {
        Ok(vec![
            self.gateway_classifier_flow(gw.port)?,
            self.gateway_ip_spoof_guard_flow(gw.port)?,
            self.gateway_arp_spoof_guard_flow(gw.port)?,
            self.l3_to_gateway_flow(gw.ip, gw.mac)?,
            self.l2_forward_calc_flow(gw.mac, gw.port)?,
        ])
    }

    /// The tunnel classifier, and L2 calc sending everything routed to
    /// the virtual MAC into the tunnel.
    pub fn tunnel_flows(
        &self,
        tunnel_port: OfPort,
    ) -> Result<Vec<Flow>, PipelineError> {
        Ok(vec![
            self.tunnel_classifier_flow(tunnel_port)?,
            self.l2_forward_calc_flow(GLOBAL_VIRTUAL_MAC, tunnel_port)?,
        ])
    }

    pub fn pod_flows(
        &self,
        pod: &PodCfg,
        gateway_mac: MacAddr,
    ) -> Result<Vec<Flow>, PipelineError> {
        Ok(vec![
            self.pod_classifier_flow(pod.port)?,
            self.pod_ip_spoof_guard_flow(pod.port, pod.mac, pod.ip)?,
            self.pod_arp_spoof_guard_flow(pod.port, pod.mac, pod.ip)?,
            self.l2_forward_calc_flow(pod.mac, pod.port)?,
            self.l3_to_pod_flow(pod.ip, pod.mac, gateway_mac)?,
        ])
    }

    pub fn node_flows(
        &self,
        peer: &PeerCfg,
        local_gateway_mac: MacAddr,
    ) -> Result<Vec<Flow>, PipelineError> {
        Ok(vec![
            self.arp_responder_flow(peer.gateway_ip)?,
            self.l3_to_remote_flow(
                peer.subnet,
                peer.tunnel_ip,
                local_gateway_mac,
            )?,
        ])
    }

    pub fn service_flows(
        &self,
        cidr: Ipv4Cidr,
        gateway_port: OfPort,
    ) -> Result<Vec<Flow>, PipelineError> {
        Ok(vec![self.service_cidr_dnat_flow(cidr, gateway_port)?])
    }

    /// Every flow implied by `cfg`, ordered by table in pipeline order
    /// and by descending priority within a table.
    pub fn all_flows(&self, cfg: &NodeCfg) -> Result<Vec<Flow>, PipelineError> {
        let mut flows = self.init_flows()?;
        flows.extend(self.gateway_flows(&cfg.gateway)?);
        flows.extend(self.tunnel_flows(cfg.tunnel_port)?);
        for pod in &cfg.pods {
            flows.extend(self.pod_flows(pod, cfg.gateway.mac)?);
        }
        for peer in &cfg.peers {
            flows.extend(self.node_flows(peer, cfg.gateway.mac)?);
        }
        for cidr in &cfg.service_cidrs {
            flows.extend(self.service_flows(*cidr, cfg.gateway.port)?);
        }
        self.sort_flows(&mut flows);
        Ok(flows)
    }

    /// Stable sort into pipeline order.
    pub fn sort_flows(&self, flows: &mut [Flow]) {
        flows.sort_by_key(|f| (self.position(f.table()), Reverse(f.priority())));
    }
}

/// The pipeline client.
///
/// This owns the pipeline and the record of which flows were installed
/// on behalf of which entity, so that removing an entity removes
/// exactly what it contributed. All mutation goes through `&mut self`:
/// callers sharing a client across threads must serialise access to
/// it, which gives at most one in-flight change per entity.
pub struct Client {
    pipeline: Pipeline,
    infra_flows: FlowCache,
    node_flows: FlowCache,
    pod_flows: FlowCache,
    service_flows: FlowCache,
    log: Logger,
}

const INIT_KEY: &str = "init";
const GATEWAY_KEY: &str = "gateway";
const TUNNEL_KEY: &str = "tunnel";

impl Client {
    pub fn new(bridge: &str, log: &Logger) -> Result<Self, PipelineError> {
        let pipeline = Pipeline::new(bridge)?;
        let log = log.new(o!("bridge" => bridge.to_string()));
        debug!(log, "pipeline created"; "tables" => pipeline.tables().len());
        Ok(Self {
            pipeline,
            infra_flows: FlowCache::new(),
            node_flows: FlowCache::new(),
            pod_flows: FlowCache::new(),
            service_flows: FlowCache::new(),
            log,
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn table(&self, id: TableId) -> Result<&Table, PipelineError> {
        self.pipeline.table(id)
    }

    pub fn all_flows(&self, cfg: &NodeCfg) -> Result<Vec<Flow>, PipelineError> {
        self.pipeline.all_flows(cfg)
    }

    /// Install the flows every node needs: table misses, connection
    /// tracking, L2 output and the ARP fallback.
    pub fn initialize<T: FlowTransport>(
        &mut self,
        transport: &mut T,
    ) -> Result<(), PipelineError> {
        let flows = self.pipeline.init_flows()?;
        install(&self.log, &mut self.infra_flows, transport, INIT_KEY, flows)
    }

    pub fn install_gateway_flows<T: FlowTransport>(
        &mut self,
        transport: &mut T,
        gateway: &GatewayCfg,
    ) -> Result<(), PipelineError> {
        let flows = self.pipeline.gateway_flows(gateway)?;
        install(&self.log, &mut self.infra_flows, transport, GATEWAY_KEY, flows)
    }

    pub fn install_tunnel_flows<T: FlowTransport>(
        &mut self,
        transport: &mut T,
        tunnel_port: OfPort,
    ) -> Result<(), PipelineError> {
        let flows = self.pipeline.tunnel_flows(tunnel_port)?;
        install(&self.log, &mut self.infra_flows, transport, TUNNEL_KEY, flows)
    }

    pub fn install_node_flows<T: FlowTransport>(
        &mut self,
        transport: &mut T,
        peer: &PeerCfg,
        local_gateway_mac: MacAddr,
    ) -> Result<(), PipelineError> {
        let flows = self.pipeline.node_flows(peer, local_gateway_mac)?;
        install(&self.log, &mut self.node_flows, transport, &peer.hostname, flows)
    }

    pub fn uninstall_node_flows<T: FlowTransport>(
        &mut self,
        transport: &mut T,
        hostname: &str,
    ) -> Result<(), PipelineError> {
        uninstall(&self.log, &mut self.node_flows, transport, hostname)
    }

    pub fn install_pod_flows<T: FlowTransport>(
        &mut self,
        transport: &mut T,
        pod: &PodCfg,
        gateway_mac: MacAddr,
    ) -> Result<(), PipelineError> {
        let flows = self.pipeline.pod_flows(pod, gateway_mac)?;
        install(&self.log, &mut self.pod_flows, transport, &pod.interface, flows)
    }

    pub fn uninstall_pod_flows<T: FlowTransport>(
        &mut self,
        transport: &mut T,
        interface: &str,
    ) -> Result<(), PipelineError> {
        uninstall(&self.log, &mut self.pod_flows, transport, interface)
    }

    pub fn install_service_flows<T: FlowTransport>(
        &mut self,
        transport: &mut T,
        cidr: Ipv4Cidr,
        gateway_port: OfPort,
    ) -> Result<(), PipelineError> {
        let flows = self.pipeline.service_flows(cidr, gateway_port)?;
        let key = cidr.to_string();
        install(&self.log, &mut self.service_flows, transport, &key, flows)
    }

    pub fn uninstall_service_flows<T: FlowTransport>(
        &mut self,
        transport: &mut T,
        cidr: Ipv4Cidr,
    ) -> Result<(), PipelineError> {
        let key = cidr.to_string();
        uninstall(&self.log, &mut self.service_flows, transport, &key)
    }

    pub fn node_cache(&self) -> &FlowCache {
        &self.node_flows
    }

    pub fn pod_cache(&self) -> &FlowCache {
        &self.pod_flows
    }

    pub fn service_cache(&self) -> &FlowCache {
        &self.service_flows
    }

    /// Every flow currently recorded as installed, in pipeline order.
    pub fn installed_flows(&self) -> Vec<Flow> {
        let mut flows: Vec<Flow> = [
            &self.infra_flows,
            &self.node_flows,
            &self.pod_flows,
            &self.service_flows,
        ]
        .into_iter()
        .flat_map(|c| c.flows().cloned())
        .collect();
        self.pipeline.sort_flows(&mut flows);
        flows
    }
}

/// Install `flows` for `key` and record them.
///
/// An earlier flow for `key` whose switch entry is reused by one of
/// `flows` was overwritten by the add. The rest are stale and get
/// deleted. The cache only changes once the switch has accepted the new
/// flows; if deleting the stale flows then fails, they stay recorded so
/// a later uninstall still removes them.
fn install<T: FlowTransport>(
    log: &Logger,
    cache: &mut FlowCache,
    transport: &mut T,
    key: &str,
    flows: Vec<Flow>,
) -> Result<(), PipelineError> {
    transport.add_flows(&flows)?;

    let stale: Vec<Flow> = cache
        .get(key)
        .map(|old| {
            old.iter()
                .filter(|f| !flows.iter().any(|n| n.same_key(f)))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    if cache.get(key).is_some() {
        info!(log, "replacing flows"; "key" => key, "stale" => stale.len());
    }

    if !stale.is_empty() {
        if let Err(e) = transport.delete_flows(&stale) {
            let mut keep = flows;
            keep.extend(stale);
            cache.insert(key, keep);
            return Err(e.into());
        }
    }

    debug!(log, "installed flows"; "key" => key, "flows" => flows.len());
    cache.insert(key, flows);
    Ok(())
}

/// Delete whatever was recorded for `key`. Nothing recorded is not an
/// error.
fn uninstall<T: FlowTransport>(
    log: &Logger,
    cache: &mut FlowCache,
    transport: &mut T,
    key: &str,
) -> Result<(), PipelineError> {
    let Some(flows) = cache.get(key) else {
        debug!(log, "no flows to remove"; "key" => key);
        return Ok(());
    };

    transport.delete_flows(flows)?;
    debug!(log, "removed flows"; "key" => key, "flows" => flows.len());
    cache.remove(key);
    Ok(())
}
