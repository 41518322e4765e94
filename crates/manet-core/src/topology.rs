//! Topology construction
//!
//! The builder creates nodes and joins them into broadcast domains: ad-hoc
//! clusters with a designated head, bridge clusters whose members are the
//! heads of other clusters, flat ad-hoc networks, access-point networks and
//! point-to-point links. Each domain consumes one `AddressBlock`; devices are
//! numbered from host `.1` in installation order.
//!
//! Mobility models are recorded per node but never integrated. Only the
//! initial placement is computed here.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::address::AddressBlock;
use crate::data_rate::DataRate;
use crate::errors::{ConfigurationError, ResourceConflict, Result};
use crate::random::RandomSource;
use crate::routing::RoutingStack;

/// Horizontal spacing between cluster members, in metres
pub const MEMBER_SPACING_M: f64 = 10.0;

/// Grid used to place access-point networks
const GRID_DELTA_X: f64 = 5.0;
const GRID_DELTA_Y: f64 = 10.0;
const GRID_WIDTH: usize = 3;

/// Half-width of the square stations roam in
const STATION_WALK_BOUND_M: f64 = 100.0;

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

// ----------------------------------------------------------------------------
// Placement and mobility
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Axis-aligned rectangle in metres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Rectangle {
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Square of half-width `radius` centred on the origin
    pub fn centred(radius: f64) -> Self {
        Self::new(-radius, radius, -radius, radius)
    }

    pub fn contains(&self, position: &Position) -> bool {
        (self.min_x..=self.max_x).contains(&position.x)
            && (self.min_y..=self.max_y).contains(&position.y)
    }
}

/// Mobility model attached to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum MobilityModel {
    ConstantPosition,
    RandomWalk2d { bounds: Rectangle },
    RandomWaypoint { max_speed_mps: f64, pause_secs: f64 },
}

impl MobilityModel {
    pub fn name(&self) -> &'static str {
        match self {
            MobilityModel::ConstantPosition => "ConstantPosition",
            MobilityModel::RandomWalk2d { .. } => "RandomWalk2d",
            MobilityModel::RandomWaypoint { .. } => "RandomWaypoint",
        }
    }
}

// ----------------------------------------------------------------------------
// Links, interfaces and nodes
// ----------------------------------------------------------------------------

/// Wired link parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointToPointLink {
    pub data_rate: DataRate,
    pub delay: Duration,
}

impl Default for PointToPointLink {
    fn default() -> Self {
        Self {
            data_rate: DataRate::from_mbps(5),
            delay: Duration::from_millis(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkKind {
    Adhoc,
    Infrastructure { ssid: String },
    PointToPoint(PointToPointLink),
}

/// One network device on a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub domain: DomainId,
    pub address: Ipv4Addr,
    pub block: AddressBlock,
}

#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    interfaces: Vec<Interface>,
    routing: Option<RoutingStack>,
    position: Position,
    mobility: MobilityModel,
}

impl Node {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            interfaces: Vec::new(),
            routing: None,
            position: Position::default(),
            mobility: MobilityModel::ConstantPosition,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// Address of the first installed interface
    pub fn primary_address(&self) -> Option<Ipv4Addr> {
        self.interfaces.first().map(|iface| iface.address)
    }

    pub fn routing(&self) -> Option<&RoutingStack> {
        self.routing.as_ref()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn mobility(&self) -> &MobilityModel {
        &self.mobility
    }

    pub(crate) fn set_routing(&mut self, stack: RoutingStack) {
        self.routing = Some(stack);
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastDomain {
    pub id: DomainId,
    pub name: String,
    pub kind: LinkKind,
    pub block: AddressBlock,
    pub members: Vec<NodeId>,
}

/// Ad-hoc cluster with a designated head
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    /// Members in placement order, head excluded
    pub members: Vec<NodeId>,
    pub head: NodeId,
    pub radius: f64,
    pub domain: DomainId,
}

/// Devices installed by one `build_cluster` call
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDevices {
    pub cluster: ClusterId,
    pub domain: DomainId,
    pub block: AddressBlock,
    /// Installed devices, members first then head
    pub interfaces: Vec<(NodeId, Ipv4Addr)>,
}

impl ClusterDevices {
    pub fn device_count(&self) -> usize {
        self.interfaces.len()
    }

    pub fn address_of(&self, node: NodeId) -> Option<Ipv4Addr> {
        self.interfaces
            .iter()
            .find(|(id, _)| *id == node)
            .map(|(_, addr)| *addr)
    }
}

// ----------------------------------------------------------------------------
// Topology
// ----------------------------------------------------------------------------

/// Finished node graph
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<Node>,
    domains: Vec<BroadcastDomain>,
    clusters: Vec<Cluster>,
    address_index: HashMap<Ipv4Addr, NodeId>,
}

impl Topology {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_by_address(&self, address: Ipv4Addr) -> Option<NodeId> {
        self.address_index.get(&address).copied()
    }

    pub fn domains(&self) -> &[BroadcastDomain] {
        &self.domains
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Total installed network devices across all nodes
    pub fn device_count(&self) -> usize {
        self.nodes.iter().map(|n| n.interfaces.len()).sum()
    }

    /// Fewest domain hops between two nodes, `None` if disconnected
    pub fn hop_distance(&self, from: NodeId, to: NodeId) -> Option<u32> {
        self.node(from)?;
        self.node(to)?;
        if from == to {
            return Some(0);
        }

        let mut visited = HashSet::from([from]);
        let mut queue = VecDeque::from([(from, 0u32)]);

        while let Some((current, hops)) = queue.pop_front() {
            let node = self.node(current)?;
            for iface in &node.interfaces {
                let Some(domain) = self.domains.get(iface.domain.0 as usize) else {
                    continue;
                };
                for &neighbour in &domain.members {
                    if neighbour == to {
                        return Some(hops + 1);
                    }
                    if visited.insert(neighbour) {
                        queue.push_back((neighbour, hops + 1));
                    }
                }
            }
        }
        None
    }
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Incrementally composes a `Topology`
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    topology: Topology,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `count` fresh nodes
    pub fn create_nodes(&mut self, count: usize) -> Vec<NodeId> {
        let first = self.topology.nodes.len() as u32;
        let ids: Vec<NodeId> = (first..first + count as u32).map(NodeId).collect();
        self.topology.nodes.extend(ids.iter().map(|&id| Node::new(id)));
        debug!("[TOPOLOGY] Created {} nodes", count);
        ids
    }

    /// Join `members` and `head` into one ad-hoc cluster
    ///
    /// Member `i` is placed at `(radius + i*10, radius, 0)` and the head at
    /// `(radius, radius, 0)`; every node gets a random walk bounded by
    /// `[-radius, radius]` on both axes.
    pub fn build_cluster(
        &mut self,
        name: &str,
        members: &[NodeId],
        head: NodeId,
        radius: f64,
        block: AddressBlock,
    ) -> Result<ClusterDevices> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(ConfigurationError::invalid("cluster radius", format!("{radius}")).into());
        }

        let mut seen = HashSet::from([head]);
        let members: Vec<NodeId> = members.iter().copied().filter(|id| seen.insert(*id)).collect();
        if members.is_empty() {
            return Err(ConfigurationError::EmptyCluster {
                cluster: name.to_string(),
            }
            .into());
        }

        let mut devices = members.clone();
        devices.push(head);
        let (domain, interfaces) = self.install_domain(name, LinkKind::Adhoc, &devices, block)?;

        let walk = MobilityModel::RandomWalk2d {
            bounds: Rectangle::centred(radius),
        };
        for (i, &member) in members.iter().enumerate() {
            let position = Position::new(radius + i as f64 * MEMBER_SPACING_M, radius, 0.0);
            self.place(member, position, walk.clone())?;
        }
        self.place(head, Position::new(radius, radius, 0.0), walk)?;

        let cluster = ClusterId(self.topology.clusters.len() as u32);
        self.topology.clusters.push(Cluster {
            id: cluster,
            name: name.to_string(),
            members,
            head,
            radius,
            domain,
        });

        info!(
            "[TOPOLOGY] Built cluster '{}' with {} devices on {} (head {})",
            name,
            interfaces.len(),
            block,
            head
        );

        Ok(ClusterDevices {
            cluster,
            domain,
            block,
            interfaces,
        })
    }

    /// Join cluster heads through a bridge node acting as head
    pub fn build_bridge(
        &mut self,
        heads: &[NodeId],
        bridge: NodeId,
        radius: f64,
        block: AddressBlock,
    ) -> Result<ClusterDevices> {
        self.build_cluster("bridge", heads, bridge, radius, block)
    }

    /// Flat ad-hoc network with nodes placed uniformly in `area`
    pub fn build_adhoc(
        &mut self,
        name: &str,
        nodes: &[NodeId],
        block: AddressBlock,
        area: Rectangle,
        mobility: MobilityModel,
        rng: &mut dyn RandomSource,
    ) -> Result<DomainId> {
        if nodes.is_empty() {
            return Err(ConfigurationError::EmptyCluster {
                cluster: name.to_string(),
            }
            .into());
        }

        let (domain, interfaces) = self.install_domain(name, LinkKind::Adhoc, nodes, block)?;
        for (node, _) in &interfaces {
            let position = Position::new(
                rng.gen_range_f64(area.min_x, area.max_x),
                rng.gen_range_f64(area.min_y, area.max_y),
                0.0,
            );
            self.place(*node, position, mobility.clone())?;
        }

        info!(
            "[TOPOLOGY] Built ad-hoc network '{}' with {} nodes on {}",
            name,
            interfaces.len(),
            block
        );
        Ok(domain)
    }

    /// Wired two-node link
    pub fn build_point_to_point(
        &mut self,
        a: NodeId,
        b: NodeId,
        link: PointToPointLink,
        block: AddressBlock,
    ) -> Result<DomainId> {
        if a == b {
            return Err(ConfigurationError::invalid(
                "point-to-point link",
                format!("both ends are node {a}"),
            )
            .into());
        }
        let name = format!("p2p-{a}-{b}");
        let (domain, _) = self.install_domain(&name, LinkKind::PointToPoint(link), &[a, b], block)?;
        info!(
            "[TOPOLOGY] Linked {} and {} at {} with {:?} delay",
            a, b, link.data_rate, link.delay
        );
        Ok(domain)
    }

    /// Stations associated with one access point
    ///
    /// Stations come first in address order, the access point last. All
    /// devices sit on a grid three columns wide; stations roam, the access
    /// point stays put.
    pub fn build_infrastructure(
        &mut self,
        stations: &[NodeId],
        access_point: NodeId,
        ssid: &str,
        block: AddressBlock,
    ) -> Result<DomainId> {
        let mut seen = HashSet::from([access_point]);
        let stations: Vec<NodeId> = stations.iter().copied().filter(|id| seen.insert(*id)).collect();
        if stations.is_empty() {
            return Err(ConfigurationError::EmptyCluster {
                cluster: ssid.to_string(),
            }
            .into());
        }

        let mut devices = stations.clone();
        devices.push(access_point);
        let kind = LinkKind::Infrastructure {
            ssid: ssid.to_string(),
        };
        let (domain, _) = self.install_domain(ssid, kind, &devices, block)?;

        let walk = MobilityModel::RandomWalk2d {
            bounds: Rectangle::centred(STATION_WALK_BOUND_M),
        };
        for (slot, &station) in stations.iter().enumerate() {
            self.place(station, grid_position(slot), walk.clone())?;
        }
        self.place(
            access_point,
            grid_position(stations.len()),
            MobilityModel::ConstantPosition,
        )?;

        info!(
            "[TOPOLOGY] Built infrastructure network '{}' with {} stations on {} (AP {})",
            ssid,
            stations.len(),
            block,
            access_point
        );
        Ok(domain)
    }

    /// Topology built so far
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn finish(self) -> Topology {
        self.topology
    }

    fn install_domain(
        &mut self,
        name: &str,
        kind: LinkKind,
        nodes: &[NodeId],
        block: AddressBlock,
    ) -> Result<(DomainId, Vec<(NodeId, Ipv4Addr)>)> {
        if let Some(&unknown) = nodes.iter().find(|id| self.topology.node(**id).is_none()) {
            return Err(ResourceConflict::UnknownNode { node: unknown }.into());
        }
        if nodes.len() > block.host_capacity() {
            return Err(ResourceConflict::AddressBlockExhausted {
                block,
                needed: nodes.len(),
                capacity: block.host_capacity(),
            }
            .into());
        }

        let domain = DomainId(self.topology.domains.len() as u32);
        let mut interfaces = Vec::with_capacity(nodes.len());
        for (index, &node) in nodes.iter().enumerate() {
            let address = block.host(index).ok_or(ResourceConflict::AddressBlockExhausted {
                block,
                needed: nodes.len(),
                capacity: block.host_capacity(),
            })?;
            let entry = self
                .topology
                .node_mut(node)
                .ok_or(ResourceConflict::UnknownNode { node })?;
            entry.interfaces.push(Interface {
                domain,
                address,
                block,
            });
            self.topology.address_index.insert(address, node);
            interfaces.push((node, address));
        }

        self.topology.domains.push(BroadcastDomain {
            id: domain,
            name: name.to_string(),
            kind,
            block,
            members: nodes.to_vec(),
        });
        Ok((domain, interfaces))
    }

    fn place(&mut self, node: NodeId, position: Position, mobility: MobilityModel) -> Result<()> {
        let entry = self
            .topology
            .node_mut(node)
            .ok_or(ResourceConflict::UnknownNode { node })?;
        entry.position = position;
        entry.mobility = mobility;
        Ok(())
    }
}

fn grid_position(slot: usize) -> Position {
    Position::new(
        (slot % GRID_WIDTH) as f64 * GRID_DELTA_X,
        (slot / GRID_WIDTH) as f64 * GRID_DELTA_Y,
        0.0,
    )
}
