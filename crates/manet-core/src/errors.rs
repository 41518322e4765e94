//! Error types for the experiment harness
//!
//! Configuration mistakes and resource conflicts surface before the
//! scheduler starts and abort the run. Delivery anomalies are per-packet:
//! they are logged and counted but never stop a simulation. Output failures
//! abort the run because the written results are the only product of an
//! experiment.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

use thiserror::Error;

use crate::address::AddressBlock;
use crate::topology::NodeId;

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Misconfigured experiment, fatal before the simulation starts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("No such protocol: {name} (expected one of OLSR, AODV, DSDV, DSR)")]
    UnknownProtocol { name: String },
    #[error("Cluster '{cluster}' has no members")]
    EmptyCluster { cluster: String },
    #[error("{feature} does not work with {protocol}")]
    IncompatibleFeature { protocol: String, feature: String },
    #[error("Routing protocol already selected: {current}")]
    ProtocolAlreadySelected { current: String },
    #[error("Topology has {available} nodes but {required} are needed for {sinks} sink/source pairs")]
    InsufficientNodes {
        required: usize,
        available: usize,
        sinks: usize,
    },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigurationError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Resource Conflicts
// ----------------------------------------------------------------------------

/// Build-time conflicts over addresses, nodes and installed stacks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceConflict {
    #[error("Address block {requested} overlaps {existing} (already assigned to {owner})")]
    OverlappingAddressBlocks {
        requested: AddressBlock,
        existing: AddressBlock,
        owner: String,
    },
    #[error("Address block {block} has {capacity} usable hosts but {needed} devices need addresses")]
    AddressBlockExhausted {
        block: AddressBlock,
        needed: usize,
        capacity: usize,
    },
    #[error("No free address block left after {after}")]
    AddressSpaceExhausted { after: AddressBlock },
    #[error("Node {node} already has a routing protocol installed ({protocol})")]
    AlreadyConfigured { node: NodeId, protocol: String },
    #[error("Unknown node {node}")]
    UnknownNode { node: NodeId },
    #[error("Node {node} has no network interface")]
    NoInterface { node: NodeId },
    #[error("A sink is already bound to {address}")]
    SinkAddressInUse { address: SocketAddrV4 },
}

// ----------------------------------------------------------------------------
// Scheduler Errors
// ----------------------------------------------------------------------------

/// Rejected scheduling requests
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SchedulerError {
    #[error("Invalid delay: {delay_secs}s (delays must be finite and non-negative)")]
    InvalidDelay { delay_secs: f64 },
    #[error("Invalid period for a repeating timer: {period_secs}s")]
    InvalidPeriod { period_secs: f64 },
}

// ----------------------------------------------------------------------------
// Delivery Anomalies
// ----------------------------------------------------------------------------

/// Per-packet problems observed while the simulation runs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryAnomaly {
    #[error("No node owns destination {destination}")]
    UnknownDestination { destination: SocketAddrV4 },
    #[error("No sink bound to {destination}")]
    NoListener { destination: SocketAddrV4 },
    #[error("Packet {uid} carries an empty payload")]
    EmptyPayload { uid: u64 },
    #[error("No route from {source_addr} to {destination}")]
    NoRoute {
        source_addr: Ipv4Addr,
        destination: Ipv4Addr,
    },
}

// ----------------------------------------------------------------------------
// Output Errors
// ----------------------------------------------------------------------------

/// Failures while writing experiment results
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize {what}: {source}")]
    Serialization {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

impl OutputError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        OutputError::Io {
            path: path.into(),
            source,
        }
    }
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Unified error returned by the orchestrator and builders
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Resource conflict: {0}")]
    Resource(#[from] ResourceConflict),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Failed to load configuration from {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },
}

impl ExperimentError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ExperimentError::Configuration(_) | ExperimentError::ConfigLoad { .. } => 2,
            ExperimentError::Resource(_) => 3,
            ExperimentError::Output(_) => 4,
            ExperimentError::Scheduler(_) => 5,
        }
    }
}

/// Result type for experiment operations
pub type Result<T> = std::result::Result<T, ExperimentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_non_zero() {
        let errors = [
            ExperimentError::from(ConfigurationError::UnknownProtocol {
                name: "TCP".to_string(),
            }),
            ExperimentError::from(ResourceConflict::UnknownNode { node: NodeId(3) }),
            ExperimentError::from(SchedulerError::InvalidDelay { delay_secs: -1.0 }),
            ExperimentError::from(OutputError::io(
                "out.csv",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            )),
        ];

        for error in &errors {
            assert_ne!(error.exit_code(), 0, "{error} must fail the process");
        }
    }

    #[test]
    fn test_unknown_protocol_message_names_the_protocol() {
        let error = ConfigurationError::UnknownProtocol {
            name: "TCP".to_string(),
        };
        assert!(error.to_string().contains("TCP"));
    }
}
