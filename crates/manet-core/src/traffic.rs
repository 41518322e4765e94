//! Synthetic traffic sources
//!
//! Two kinds of source are supported. A constant-bit-rate source is an
//! always-on on/off application over UDP that emits one fixed-size packet
//! every `packet_size * 8 / rate` seconds. A bulk source pushes segments
//! over TCP at the line rate until `max_bytes` have been sent (zero means
//! unlimited) or its stop time is reached.
//!
//! Sources do nothing on their own; `TrafficGenerator::schedule` places the
//! first send of every source on the scheduler and the world keeps each
//! source going from there.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::SimTime;
use crate::data_rate::DataRate;
use crate::errors::{ConfigurationError, ResourceConflict, Result, SchedulerError};
use crate::packet::{TCP_PROTOCOL, UDP_PROTOCOL};
use crate::random::RandomSource;
use crate::scheduler::EventScheduler;
use crate::sink::{SinkHandle, SinkSet};
use crate::topology::{NodeId, Topology};
use crate::world::SimWorld;

/// First ephemeral port handed to a source
pub const EPHEMERAL_PORT_BASE: u16 = 49153;

/// Default bulk segment size in bytes
pub const DEFAULT_SEGMENT_SIZE: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    ConstantBitRate {
        rate: DataRate,
        packet_size: u32,
    },
    Bulk {
        max_bytes: u64,
        segment_size: u32,
        line_rate: DataRate,
    },
}

impl SourceKind {
    pub fn protocol(&self) -> u8 {
        match self {
            SourceKind::ConstantBitRate { .. } => UDP_PROTOCOL,
            SourceKind::Bulk { .. } => TCP_PROTOCOL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrafficSource {
    handle: SourceHandle,
    node: NodeId,
    local: SocketAddrV4,
    destination: SocketAddrV4,
    kind: SourceKind,
    start: SimTime,
    stop: SimTime,
    packets_sent: u64,
    bytes_sent: u64,
}

impl TrafficSource {
    pub fn handle(&self) -> SourceHandle {
        self.handle
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn local(&self) -> SocketAddrV4 {
        self.local
    }

    pub fn destination(&self) -> SocketAddrV4 {
        self.destination
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn start(&self) -> SimTime {
        self.start
    }

    pub fn stop(&self) -> SimTime {
        self.stop
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Size of the next packet, `None` once a bulk source has sent everything
    pub fn next_packet_size(&self) -> Option<u32> {
        match self.kind {
            SourceKind::ConstantBitRate { packet_size, .. } => Some(packet_size),
            SourceKind::Bulk {
                max_bytes,
                segment_size,
                ..
            } => {
                if max_bytes == 0 {
                    return Some(segment_size);
                }
                let remaining = max_bytes.saturating_sub(self.bytes_sent);
                if remaining == 0 {
                    None
                } else {
                    Some(remaining.min(u64::from(segment_size)) as u32)
                }
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_packet_size().is_none()
    }

    /// Gap between sending a packet of `size` bytes and the next one
    pub fn interval(&self, size: u32) -> Option<Duration> {
        match self.kind {
            SourceKind::ConstantBitRate { rate, packet_size } => {
                rate.transmission_time(u64::from(packet_size))
            }
            SourceKind::Bulk { line_rate, .. } => line_rate.transmission_time(u64::from(size)),
        }
    }

    pub fn record_sent(&mut self, size: u32) {
        self.packets_sent += 1;
        self.bytes_sent += u64::from(size);
    }
}

// ----------------------------------------------------------------------------
// Start jitter
// ----------------------------------------------------------------------------

/// Window in which source start times are drawn uniformly
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JitterWindow {
    #[serde(default = "default_jitter_start")]
    pub start_secs: f64,
    #[serde(default = "default_jitter_end")]
    pub end_secs: f64,
}

fn default_jitter_start() -> f64 {
    100.0
}

fn default_jitter_end() -> f64 {
    101.0
}

impl Default for JitterWindow {
    fn default() -> Self {
        Self {
            start_secs: default_jitter_start(),
            end_secs: default_jitter_end(),
        }
    }
}

impl JitterWindow {
    pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
        if !self.start_secs.is_finite()
            || !self.end_secs.is_finite()
            || self.start_secs < 0.0
            || self.end_secs < self.start_secs
            || SimTime::from_secs_f64(self.end_secs).is_none()
        {
            return Err(ConfigurationError::invalid(
                "traffic.jitter",
                format!("[{}, {}] is not a valid window", self.start_secs, self.end_secs),
            ));
        }
        Ok(())
    }

    /// Start time drawn uniformly from `[start_secs, end_secs)`
    pub fn draw(&self, rng: &mut dyn RandomSource) -> std::result::Result<SimTime, ConfigurationError> {
        self.validate()?;
        let secs = rng.gen_range_f64(self.start_secs, self.end_secs);
        SimTime::from_secs_f64(secs).ok_or_else(|| {
            ConfigurationError::invalid("traffic.jitter", format!("{secs} s is not a valid start time"))
        })
    }
}

// ----------------------------------------------------------------------------
// Generator
// ----------------------------------------------------------------------------

/// Owns every traffic source of a run
#[derive(Debug, Clone)]
pub struct TrafficGenerator {
    sources: Vec<TrafficSource>,
    segment_size: u32,
    line_rate: DataRate,
}

impl Default for TrafficGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficGenerator {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            line_rate: DataRate::from_mbps(5),
        }
    }

    /// Segment size and line rate used by bulk sources
    pub fn with_bulk_settings(mut self, segment_size: u32, line_rate: DataRate) -> Self {
        self.segment_size = segment_size;
        self.line_rate = line_rate;
        self
    }

    /// Constant-bit-rate source on `node` sending to `destination`
    #[allow(clippy::too_many_arguments)]
    pub fn install_cbr(
        &mut self,
        topology: &Topology,
        node: NodeId,
        destination: SocketAddrV4,
        rate: DataRate,
        packet_size: u32,
        start: SimTime,
        stop: SimTime,
    ) -> Result<SourceHandle> {
        self.install(
            topology,
            node,
            destination,
            SourceKind::ConstantBitRate { rate, packet_size },
            start,
            stop,
        )
    }

    /// Bulk source on `node` sending up to `max_bytes` to `destination`
    pub fn install_bulk(
        &mut self,
        topology: &Topology,
        node: NodeId,
        destination: SocketAddrV4,
        max_bytes: u64,
        start: SimTime,
        stop: SimTime,
    ) -> Result<SourceHandle> {
        let kind = SourceKind::Bulk {
            max_bytes,
            segment_size: self.segment_size,
            line_rate: self.line_rate,
        };
        self.install(topology, node, destination, kind, start, stop)
    }

    /// Install `pairs` sink/source pairs over `nodes`.
    ///
    /// Sink `i` listens on the primary address of `nodes[i]` at `port`;
    /// source `i` runs on `nodes[i + pairs]` and sends to sink `i`. Each
    /// source starts at a time drawn from `jitter`.
    #[allow(clippy::too_many_arguments)]
    pub fn install_pairs(
        &mut self,
        topology: &Topology,
        sinks: &mut SinkSet,
        nodes: &[NodeId],
        pairs: usize,
        port: u16,
        kind: SourceKind,
        jitter: JitterWindow,
        stop: SimTime,
        rng: &mut dyn RandomSource,
    ) -> Result<Vec<(SinkHandle, SourceHandle)>> {
        let required = pairs * 2;
        if required > nodes.len() {
            return Err(ConfigurationError::InsufficientNodes {
                required,
                available: nodes.len(),
                sinks: pairs,
            }
            .into());
        }

        let mut installed = Vec::with_capacity(pairs);
        for i in 0..pairs {
            let sink_node = nodes[i];
            let sink_address = SocketAddrV4::new(primary_address(topology, sink_node)?, port);
            let sink = sinks.install(sink_node, sink_address)?;

            let start = jitter.draw(rng)?;
            let source = self.install(topology, nodes[i + pairs], sink_address, kind, start, stop)?;
            installed.push((sink, source));
        }

        info!(
            "[TRAFFIC] Installed {} sink/source pairs on port {}",
            pairs, port
        );
        Ok(installed)
    }

    pub fn sources(&self) -> &[TrafficSource] {
        &self.sources
    }

    pub fn source(&self, handle: SourceHandle) -> Option<&TrafficSource> {
        self.sources.get(handle.0)
    }

    pub(crate) fn source_mut(&mut self, handle: SourceHandle) -> Option<&mut TrafficSource> {
        self.sources.get_mut(handle.0)
    }

    /// Queue the first send of every source at its start time
    pub fn schedule(&self, scheduler: &mut EventScheduler<SimWorld>) -> std::result::Result<(), SchedulerError> {
        for source in &self.sources {
            let handle = source.handle;
            scheduler.schedule_at(source.start, move |sched: &mut EventScheduler<SimWorld>, world: &mut SimWorld| {
                world.send_from(handle, sched);
            })?;
        }
        debug!("[TRAFFIC] Scheduled {} sources", self.sources.len());
        Ok(())
    }

    fn install(
        &mut self,
        topology: &Topology,
        node: NodeId,
        destination: SocketAddrV4,
        kind: SourceKind,
        start: SimTime,
        stop: SimTime,
    ) -> Result<SourceHandle> {
        let (field, size) = match kind {
            SourceKind::ConstantBitRate { packet_size, .. } => ("packet_size", packet_size),
            SourceKind::Bulk { segment_size, .. } => ("segment_size", segment_size),
        };
        if size == 0 {
            return Err(ConfigurationError::invalid(field, "must be non-zero").into());
        }

        let handle = SourceHandle(self.sources.len());
        let port = EPHEMERAL_PORT_BASE.wrapping_add(handle.0 as u16);
        let local = SocketAddrV4::new(primary_address(topology, node)?, port);

        self.sources.push(TrafficSource {
            handle,
            node,
            local,
            destination,
            kind,
            start,
            stop,
            packets_sent: 0,
            bytes_sent: 0,
        });
        debug!(
            "[TRAFFIC] Source {} on node {}: {} -> {} from {}",
            handle.0, node, local, destination, start
        );
        Ok(handle)
    }
}

fn primary_address(topology: &Topology, node: NodeId) -> std::result::Result<Ipv4Addr, ResourceConflict> {
    topology
        .node(node)
        .ok_or(ResourceConflict::UnknownNode { node })?
        .primary_address()
        .ok_or(ResourceConflict::NoInterface { node })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExperimentError;
    use crate::random::SeededRandom;
    use crate::topology::TopologyBuilder;

    fn topology(nodes: usize) -> (Topology, Vec<NodeId>) {
        let mut builder = TopologyBuilder::new();
        let ids = builder.create_nodes(nodes);
        builder
            .build_cluster("c0", &ids[1..], ids[0], 50.0, "10.1.0.0/24".parse().unwrap())
            .unwrap();
        (builder.finish(), ids)
    }

    fn sink_addr() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 1, 0, 1), 9)
    }

    #[test]
    fn test_cbr_interval() {
        let (topology, nodes) = topology(2);
        let mut generator = TrafficGenerator::new();
        let handle = generator
            .install_cbr(
                &topology,
                nodes[1],
                sink_addr(),
                DataRate::from_bps(2048),
                64,
                SimTime::from_secs(100),
                SimTime::from_secs(200),
            )
            .unwrap();

        let source = generator.source(handle).unwrap();
        assert_eq!(source.next_packet_size(), Some(64));
        assert_eq!(source.interval(64), Some(Duration::from_millis(250)));
        assert_eq!(source.kind().protocol(), UDP_PROTOCOL);
        assert_eq!(source.local().port(), EPHEMERAL_PORT_BASE);
    }

    #[test]
    fn test_bulk_stops_at_max_bytes() {
        let (topology, nodes) = topology(2);
        let mut generator = TrafficGenerator::new();
        let handle = generator
            .install_bulk(&topology, nodes[1], sink_addr(), 1200, SimTime::ZERO, SimTime::from_secs(10))
            .unwrap();

        let source = generator.source_mut(handle).unwrap();
        let mut sizes = Vec::new();
        while let Some(size) = source.next_packet_size() {
            source.record_sent(size);
            sizes.push(size);
        }

        assert_eq!(sizes, vec![512, 512, 176]);
        assert_eq!(source.bytes_sent(), 1200);
        assert!(source.is_exhausted());
        assert_eq!(source.kind().protocol(), TCP_PROTOCOL);
    }

    #[test]
    fn test_bulk_zero_max_bytes_is_unlimited() {
        let (topology, nodes) = topology(2);
        let mut generator = TrafficGenerator::new();
        let handle = generator
            .install_bulk(&topology, nodes[1], sink_addr(), 0, SimTime::ZERO, SimTime::from_secs(10))
            .unwrap();
        let source = generator.source_mut(handle).unwrap();
        for _ in 0..1000 {
            source.record_sent(512);
        }
        assert_eq!(source.next_packet_size(), Some(512));
    }

    #[test]
    fn test_install_pairs_consistent_rule() {
        let (topology, nodes) = topology(6);
        let mut generator = TrafficGenerator::new();
        let mut sinks = SinkSet::new();
        let mut rng = SeededRandom::new(1);

        let pairs = generator
            .install_pairs(
                &topology,
                &mut sinks,
                &nodes,
                3,
                9,
                SourceKind::ConstantBitRate {
                    rate: DataRate::from_bps(2048),
                    packet_size: 64,
                },
                JitterWindow::default(),
                SimTime::from_secs(200),
                &mut rng,
            )
            .unwrap();

        assert_eq!(pairs.len(), 3);
        for (i, (sink, source)) in pairs.iter().enumerate() {
            let sink = sinks.get(*sink).unwrap();
            let source = generator.source(*source).unwrap();
            assert_eq!(sink.node(), nodes[i]);
            assert_eq!(source.node(), nodes[i + 3]);
            assert_eq!(source.destination(), sink.address());
            let start = source.start().as_secs_f64();
            assert!((100.0..101.0).contains(&start), "start {start} outside jitter window");
        }
    }

    #[test]
    fn test_install_pairs_needs_enough_nodes() {
        let (topology, nodes) = topology(5);
        let mut generator = TrafficGenerator::new();
        let mut sinks = SinkSet::new();
        let mut rng = SeededRandom::new(1);

        let err = generator
            .install_pairs(
                &topology,
                &mut sinks,
                &nodes,
                3,
                9,
                SourceKind::ConstantBitRate {
                    rate: DataRate::from_bps(2048),
                    packet_size: 64,
                },
                JitterWindow::default(),
                SimTime::from_secs(200),
                &mut rng,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            ExperimentError::Configuration(ConfigurationError::InsufficientNodes {
                required: 6,
                available: 5,
                sinks: 3
            })
        ));
    }

    #[test]
    fn test_zero_sized_packets_rejected() {
        let (topology, nodes) = topology(2);
        let mut generator = TrafficGenerator::new();

        let err = generator
            .install_cbr(
                &topology,
                nodes[1],
                sink_addr(),
                DataRate::from_bps(2048),
                0,
                SimTime::ZERO,
                SimTime::from_secs(1),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::Configuration(ConfigurationError::InvalidValue { .. })
        ));

        let mut bulk = TrafficGenerator::new().with_bulk_settings(0, DataRate::from_mbps(5));
        assert!(bulk
            .install_bulk(&topology, nodes[1], sink_addr(), 1024, SimTime::ZERO, SimTime::from_secs(1))
            .is_err());

        assert!(generator.sources().is_empty());
        assert!(bulk.sources().is_empty());
    }

    #[test]
    fn test_unknown_node_rejected() {
        let (topology, _) = topology(2);
        let mut generator = TrafficGenerator::new();
        let err = generator
            .install_bulk(&topology, NodeId(42), sink_addr(), 1024, SimTime::ZERO, SimTime::from_secs(1))
            .unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::Resource(ResourceConflict::UnknownNode { node: NodeId(42) })
        ));
    }

    #[test]
    fn test_jitter_window_validation() {
        assert!(JitterWindow::default().validate().is_ok());
        let backwards = JitterWindow {
            start_secs: 5.0,
            end_secs: 1.0,
        };
        assert!(backwards.validate().is_err());
        let unrepresentable = JitterWindow {
            start_secs: 100.0,
            end_secs: 1e20,
        };
        assert!(unrepresentable.validate().is_err());
        assert!(unrepresentable.draw(&mut SeededRandom::new(1)).is_err());
    }
}
