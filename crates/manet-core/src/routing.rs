//! Routing protocol selection and installation
//!
//! Four mutually exclusive strategies are supported. OLSR, AODV and DSDV are
//! installed through a list-routing stack at priority 100; DSR brings its
//! own routing agent on top of a plain internet stack and cannot coexist
//! with flow monitoring.
//!
//! Protocol internals are opaque: installing a protocol tags each node with
//! a `RoutingStack`, and forwarding is decided by topology reachability.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{ConfigurationError, ResourceConflict};
use crate::topology::{NodeId, Topology};

/// Priority of the protocol entry in the list-routing stack
pub const LIST_ROUTING_PRIORITY: i16 = 100;

const FLOW_MONITOR_FEATURE: &str = "flow monitoring";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RoutingProtocol {
    Olsr,
    Aodv,
    Dsdv,
    Dsr,
}

impl RoutingProtocol {
    pub const ALL: [RoutingProtocol; 4] = [
        RoutingProtocol::Olsr,
        RoutingProtocol::Aodv,
        RoutingProtocol::Dsdv,
        RoutingProtocol::Dsr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RoutingProtocol::Olsr => "OLSR",
            RoutingProtocol::Aodv => "AODV",
            RoutingProtocol::Dsdv => "DSDV",
            RoutingProtocol::Dsr => "DSR",
        }
    }

    pub fn supports_flow_monitoring(&self) -> bool {
        !matches!(self, RoutingProtocol::Dsr)
    }

    /// List-routing priority, `None` when the protocol installs its own agent
    pub fn list_priority(&self) -> Option<i16> {
        match self {
            RoutingProtocol::Dsr => None,
            _ => Some(LIST_ROUTING_PRIORITY),
        }
    }
}

impl fmt::Display for RoutingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RoutingProtocol {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RoutingProtocol::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigurationError::UnknownProtocol {
                name: wanted.to_string(),
            })
    }
}

impl TryFrom<String> for RoutingProtocol {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoutingProtocol> for String {
    fn from(protocol: RoutingProtocol) -> Self {
        protocol.name().to_string()
    }
}

/// Routing state installed on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingStack {
    pub protocol: RoutingProtocol,
    pub list_priority: Option<i16>,
}

// ----------------------------------------------------------------------------
// Selected configuration
// ----------------------------------------------------------------------------

/// The protocol chosen for a run. Immutable once selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingProtocolConfig {
    protocol: RoutingProtocol,
    flow_monitor: bool,
}

impl RoutingProtocolConfig {
    pub fn protocol(&self) -> RoutingProtocol {
        self.protocol
    }

    pub fn name(&self) -> &'static str {
        self.protocol.name()
    }

    pub fn supports_flow_monitoring(&self) -> bool {
        self.protocol.supports_flow_monitoring()
    }

    /// Whether flow statistics are collected in this run
    pub fn flow_monitor_enabled(&self) -> bool {
        self.flow_monitor && self.supports_flow_monitoring()
    }

    /// Install the protocol on every node in `nodes`.
    ///
    /// All nodes are checked before any is modified, so a conflict leaves
    /// the topology untouched. Returns the number of nodes configured.
    pub fn install(&self, topology: &mut Topology, nodes: &[NodeId]) -> Result<usize, ResourceConflict> {
        let mut seen = std::collections::HashSet::new();
        for &node in nodes {
            let entry = topology.node(node).ok_or(ResourceConflict::UnknownNode { node })?;
            if let Some(existing) = entry.routing() {
                return Err(ResourceConflict::AlreadyConfigured {
                    node,
                    protocol: existing.protocol.name().to_string(),
                });
            }
            if !seen.insert(node) {
                return Err(ResourceConflict::AlreadyConfigured {
                    node,
                    protocol: self.name().to_string(),
                });
            }
        }

        let stack = RoutingStack {
            protocol: self.protocol,
            list_priority: self.protocol.list_priority(),
        };
        for &node in nodes {
            if let Some(entry) = topology.node_mut(node) {
                entry.set_routing(stack);
            }
        }

        match stack.list_priority {
            Some(priority) => info!(
                "[ROUTING] Installed {} on {} nodes via list routing (priority {})",
                self.name(),
                nodes.len(),
                priority
            ),
            None => info!(
                "[ROUTING] Installed internet stack with {} agent on {} nodes",
                self.name(),
                nodes.len()
            ),
        }
        Ok(nodes.len())
    }
}

// ----------------------------------------------------------------------------
// Selector
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Unselected,
    Selected(RoutingProtocolConfig),
}

/// One-shot protocol selection
#[derive(Debug, Clone)]
pub struct RoutingProtocolSelector {
    flow_monitor_requested: bool,
    state: SelectorState,
}

impl RoutingProtocolSelector {
    pub fn new(flow_monitor_requested: bool) -> Self {
        Self {
            flow_monitor_requested,
            state: SelectorState::Unselected,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// Resolve `name` (case-insensitive) and lock in the choice
    pub fn select(&mut self, name: &str) -> Result<RoutingProtocolConfig, ConfigurationError> {
        if let SelectorState::Selected(current) = self.state {
            return Err(ConfigurationError::ProtocolAlreadySelected {
                current: current.name().to_string(),
            });
        }

        let protocol: RoutingProtocol = name.parse().inspect_err(|_| {
            warn!("[ROUTING] No such protocol: {}", name);
        })?;

        if self.flow_monitor_requested && !protocol.supports_flow_monitoring() {
            return Err(ConfigurationError::IncompatibleFeature {
                protocol: protocol.name().to_string(),
                feature: FLOW_MONITOR_FEATURE.to_string(),
            });
        }

        let config = RoutingProtocolConfig {
            protocol,
            flow_monitor: self.flow_monitor_requested,
        };
        self.state = SelectorState::Selected(config);
        info!("[ROUTING] Routing protocol: {}", protocol);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyBuilder;

    fn small_topology() -> (Topology, Vec<NodeId>) {
        let mut builder = TopologyBuilder::new();
        let nodes = builder.create_nodes(3);
        builder
            .build_cluster("c0", &nodes[1..], nodes[0], 10.0, "10.1.0.0/24".parse().unwrap())
            .unwrap();
        (builder.finish(), nodes)
    }

    #[test]
    fn test_select_is_case_insensitive() {
        for name in ["olsr", "Aodv", "DSDV", "dsr"] {
            let mut selector = RoutingProtocolSelector::new(false);
            assert!(selector.select(name).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn test_unknown_protocol() {
        let mut selector = RoutingProtocolSelector::new(false);
        assert_eq!(
            selector.select("TCP").unwrap_err(),
            ConfigurationError::UnknownProtocol {
                name: "TCP".to_string()
            }
        );
        assert_eq!(selector.state(), SelectorState::Unselected);
    }

    #[test]
    fn test_dsr_with_flow_monitor_is_incompatible() {
        let mut selector = RoutingProtocolSelector::new(true);
        assert!(matches!(
            selector.select("DSR"),
            Err(ConfigurationError::IncompatibleFeature { .. })
        ));

        let mut selector = RoutingProtocolSelector::new(false);
        let config = selector.select("DSR").unwrap();
        assert!(!config.flow_monitor_enabled());
    }

    #[test]
    fn test_second_selection_rejected() {
        let mut selector = RoutingProtocolSelector::new(false);
        selector.select("OLSR").unwrap();
        assert!(matches!(
            selector.select("AODV"),
            Err(ConfigurationError::ProtocolAlreadySelected { .. })
        ));
    }

    #[test]
    fn test_install_tags_every_node() {
        let (mut topology, nodes) = small_topology();
        let config = RoutingProtocolSelector::new(true).select("AODV").unwrap();

        assert_eq!(config.install(&mut topology, &nodes).unwrap(), 3);
        for node in topology.nodes() {
            let stack = node.routing().unwrap();
            assert_eq!(stack.protocol, RoutingProtocol::Aodv);
            assert_eq!(stack.list_priority, Some(LIST_ROUTING_PRIORITY));
        }
        assert!(config.flow_monitor_enabled());
    }

    #[test]
    fn test_reinstall_rejected_without_partial_changes() {
        let (mut topology, nodes) = small_topology();
        let dsr = RoutingProtocolSelector::new(false).select("DSR").unwrap();
        dsr.install(&mut topology, &nodes[..1]).unwrap();
        assert_eq!(topology.node(nodes[0]).unwrap().routing().unwrap().list_priority, None);

        let olsr = RoutingProtocolSelector::new(false).select("OLSR").unwrap();
        let err = olsr.install(&mut topology, &[nodes[1], nodes[2], nodes[0]]);
        assert!(matches!(err, Err(ResourceConflict::AlreadyConfigured { .. })));
        assert!(topology.node(nodes[1]).unwrap().routing().is_none());
    }
}
