//! MANET Experiment Core
//!
//! Experiment harness for mobile ad-hoc network routing studies. The crate
//! builds node topologies, selects one of four routing protocols, injects
//! synthetic traffic and samples delivered throughput once per simulated
//! second, all driven by a single-threaded discrete-event scheduler.
//!
//! # Features
//!
//! ## Deterministic scheduling
//!
//! Every timed action goes through [`EventScheduler`]. Events fire in time
//! order and equal-time events fire in registration order, so a run with a
//! fixed seed is reproducible bit for bit.
//!
//! ## Topology composition
//!
//! [`TopologyBuilder`] builds flat ad-hoc networks, clusters with a head node,
//! bridge clusters joining several heads, and access-point networks joined by
//! point-to-point links. Address blocks are handed out by an [`AddressPlan`]
//! that rejects overlapping blocks.
//!
//! ## Measurement
//!
//! [`ReceiveSink`]s count delivered bytes, the [`ThroughputSampler`] turns
//! those counters into one [`SampleRecord`] per period and appends it to the
//! throughput CSV.
//!
//! ## Usage
//!
//! ```ignore
//! use manet_core::{ExperimentConfig, ExperimentOrchestrator};
//!
//! fn main() -> Result<(), manet_core::ExperimentError> {
//!     let config = ExperimentConfig::from_toml_file("experiment.toml".as_ref())?;
//!     let report = ExperimentOrchestrator::new(config)?.run()?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

// Core abstractions for deterministic simulation
pub mod clock;
pub mod random;
pub mod scheduler;

pub mod errors;

// Experiment building blocks
pub mod address;
pub mod channel;
pub mod config;
pub mod data_rate;
pub mod flow_monitor;
pub mod packet;
pub mod routing;
pub mod sampler;
pub mod sink;
pub mod topology;
pub mod trace;
pub mod traffic;

// Runtime wiring
pub mod orchestrator;
pub mod world;

// Re-export key types for public API
pub use address::{AddressBlock, AddressPlan};
pub use channel::{Channel, IdealChannel, LossyChannel, Transit};
pub use clock::{SimTime, VirtualClock};
pub use config::{
    AddressingSettings, ChannelConfig, ExperimentConfig, ExperimentSettings, OutputSettings,
    RadioSettings, RoutingSettings, TopologyConfig, TrafficPattern, TrafficSettings,
};
pub use data_rate::DataRate;
pub use errors::{
    ConfigurationError, DeliveryAnomaly, ExperimentError, OutputError, ResourceConflict, Result,
    SchedulerError,
};
pub use flow_monitor::{FlowMonitor, FlowMonitorReport, FlowStats};
pub use orchestrator::{ExperimentOrchestrator, ExperimentReport};
pub use packet::{FlowKey, Packet};
pub use random::{RandomSource, SeededRandom};
pub use routing::{
    RoutingProtocol, RoutingProtocolConfig, RoutingProtocolSelector, RoutingStack,
    SelectorState,
};
pub use sampler::{CsvSampleWriter, SampleRecord, SampleSink, ThroughputSampler};
pub use scheduler::{EventHandle, EventScheduler, RunOutcome, SchedulerStats, TimerId};
pub use sink::{FlowRecord, ReceiveSink, SinkHandle, SinkSet};
pub use topology::{
    Cluster, ClusterDevices, MobilityModel, Node, NodeId, PointToPointLink, Position, Rectangle,
    Topology, TopologyBuilder,
};
pub use trace::{CsvPacketTrace, LogObserver, PacketObserver, TransmitEvent};
pub use traffic::{JitterWindow, SourceHandle, SourceKind, TrafficGenerator, TrafficSource};
pub use world::{AnomalyCounters, DeliveryStats, SimWorld};

/// Version of the experiment core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
