//! Experiment orchestration
//!
//! Runs one experiment end to end: validate the configuration, build the
//! topology, select and install the routing protocol, install sinks and
//! sources, start the sampler, run the scheduler to the configured end time
//! and write the results.

use serde::Serialize;
use tracing::{info, warn};

use crate::address::AddressPlan;
use crate::channel::{Channel, IdealChannel, LossyChannel};
use crate::clock::SimTime;
use crate::config::{
    cluster_name, duration_from_secs, ChannelConfig, ExperimentConfig, TopologyConfig, TrafficPattern,
};
use crate::errors::{ConfigurationError, Result};
use crate::flow_monitor::{FlowMonitor, FlowMonitorReport};
use crate::random::SeededRandom;
use crate::routing::{RoutingProtocol, RoutingProtocolSelector};
use crate::sampler::{CsvSampleWriter, SampleRecord, SampleSink, ThroughputSampler};
use crate::scheduler::{EventScheduler, RunOutcome, SchedulerStats};
use crate::sink::SinkSet;
use crate::topology::{MobilityModel, NodeId, PointToPointLink, Topology, TopologyBuilder};
use crate::trace::{write_mobility_trace, CsvPacketTrace, LogObserver};
use crate::traffic::TrafficGenerator;
use crate::world::{AnomalyCounters, DeliveryStats, SimWorld};

/// Random streams derived from the run seed
const PLACEMENT_STREAM: u64 = 1;
const JITTER_STREAM: u64 = 2;
const CHANNEL_STREAM: u64 = 3;

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub protocol: String,
    pub nodes: usize,
    pub sinks: usize,
    pub samples: Vec<SampleRecord>,
    pub delivery: DeliveryStats,
    pub anomalies: AnomalyCounters,
    pub flows: Option<FlowMonitorReport>,
    pub scheduler: SchedulerStats,
    pub final_time_secs: f64,
}

impl ExperimentReport {
    /// Fraction of sent packets that reached a sink
    pub fn delivery_ratio(&self) -> f64 {
        if self.delivery.packets_sent == 0 {
            0.0
        } else {
            self.delivery.packets_delivered as f64 / self.delivery.packets_sent as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} nodes, {} sinks, {} samples, {}/{} packets delivered ({:.1}%), {} anomalies",
            self.protocol,
            self.nodes,
            self.sinks,
            self.samples.len(),
            self.delivery.packets_delivered,
            self.delivery.packets_sent,
            self.delivery_ratio() * 100.0,
            self.anomalies.total()
        )
    }
}

pub struct ExperimentOrchestrator {
    config: ExperimentConfig,
}

impl ExperimentOrchestrator {
    /// Validate `config` and take ownership of it
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn run(self) -> Result<ExperimentReport> {
        let config = &self.config;
        let seed = SeededRandom::new(config.experiment.seed);
        info!(
            "[EXPERIMENT] Starting '{}' (seed {}, {} s)",
            config.experiment.name,
            seed.seed(),
            config.experiment.total_time_secs
        );

        // Topology
        let mut placement = seed.fork(PLACEMENT_STREAM);
        let mut plan =
            AddressPlan::with_explicit(config.addressing.base, config.addressing.explicit.clone());
        let (mut topology, order) = build_topology(&config.topology, &mut plan, &mut placement)?;

        // Routing
        let mut selector = RoutingProtocolSelector::new(config.routing.flow_monitor);
        let routing = selector.select(&config.routing.protocol)?;
        let all_nodes: Vec<NodeId> = topology.nodes().iter().map(|n| n.id()).collect();
        routing.install(&mut topology, &all_nodes)?;
        info!(
            "[EXPERIMENT] {} on {} nodes, tx power {} dBm, {} ({})",
            routing.name(),
            topology.node_count(),
            config.radio.tx_power_dbm,
            config.radio.phy_mode,
            config.radio.standard
        );

        // Sinks and sources
        let stop = SimTime::from(config.total_time()?);
        let mut jitter = seed.fork(JITTER_STREAM);
        let mut sinks = SinkSet::new();
        let mut traffic = match config.traffic.pattern {
            TrafficPattern::Bulk {
                segment_size,
                line_rate,
                ..
            } => TrafficGenerator::new().with_bulk_settings(segment_size, line_rate),
            _ => TrafficGenerator::new(),
        };
        traffic.install_pairs(
            &topology,
            &mut sinks,
            &order,
            config.traffic.sinks,
            config.traffic.port,
            config.traffic.pattern.source_kind(),
            config.traffic.jitter,
            stop,
            &mut jitter,
        )?;

        // Outputs
        let output: Option<Box<dyn SampleSink>> = match &config.output.csv_path {
            Some(path) => Some(Box::new(CsvSampleWriter::create(path)?)),
            None => None,
        };
        let sampler = ThroughputSampler::new(routing.name(), config.radio.tx_power_dbm, output)
            .with_period(config.sample_period()?);

        if config.output.mobility_trace {
            write_mobility_trace(&config.output.mobility_trace_path, &topology)?;
        }

        let channel = build_channel(&config.channel, &seed)?;
        let node_count = topology.node_count();
        let mut world = SimWorld::new(topology, traffic, sinks, sampler, channel);
        if routing.flow_monitor_enabled() {
            world = world.with_flow_monitor(FlowMonitor::new());
        }
        if let Some(path) = &config.output.packet_trace_path {
            world = world.with_observer(Box::new(CsvPacketTrace::create(path)?));
        }
        if config.output.log_packets {
            world = world.with_observer(Box::new(LogObserver));
        }

        // Run
        let mut scheduler = EventScheduler::new();
        world.traffic().schedule(&mut scheduler)?;
        world.sampler().start(&mut scheduler)?;
        let outcome = scheduler.run(&mut world, stop);

        if let Some(failure) = world.take_failure() {
            return Err(failure.into());
        }
        if outcome == RunOutcome::Halted {
            warn!("[EXPERIMENT] Run halted early at {}", scheduler.now());
        }
        world.finish()?;

        let delivery = world.stats();
        let anomalies = world.anomalies();
        let sink_count = world.sinks().len();
        let (sampler, flow_monitor) = world.into_parts();

        let flows = match flow_monitor {
            Some(monitor) => Some(monitor.export_json(&config.output.flow_monitor_path)?),
            None => None,
        };

        let report = ExperimentReport {
            protocol: routing.name().to_string(),
            nodes: node_count,
            sinks: sink_count,
            samples: sampler.into_records(),
            delivery,
            anomalies,
            flows,
            scheduler: scheduler.stats(),
            final_time_secs: scheduler.now().as_secs_f64(),
        };
        info!("[EXPERIMENT] {}", report.summary());
        Ok(report)
    }
}

/// Build the configured topology. Returns it with the node order used for
/// sink/source pairing.
fn build_topology(
    config: &TopologyConfig,
    plan: &mut AddressPlan,
    rng: &mut SeededRandom,
) -> Result<(Topology, Vec<NodeId>)> {
    let mut builder = TopologyBuilder::new();

    match config {
        TopologyConfig::Flat {
            nodes,
            area,
            max_speed_mps,
            pause_secs,
        } => {
            let ids = builder.create_nodes(*nodes);
            let block = plan.allocate("adhoc")?;
            let mobility = MobilityModel::RandomWaypoint {
                max_speed_mps: *max_speed_mps,
                pause_secs: *pause_secs,
            };
            builder.build_adhoc("adhoc", &ids, block, *area, mobility, rng)?;
        }
        TopologyConfig::Hierarchical {
            groups,
            first_radius,
            radius_step,
            bridge_radius,
        } => {
            let mut heads = Vec::with_capacity(groups.len());
            for (index, &size) in groups.iter().enumerate() {
                let ids = builder.create_nodes(size);
                let Some((&head, members)) = ids.split_first() else {
                    return Err(ConfigurationError::EmptyCluster {
                        cluster: cluster_name(index),
                    }
                    .into());
                };
                let name = cluster_name(index);
                let block = plan.allocate(&name)?;
                let radius = first_radius + index as f64 * radius_step;
                builder.build_cluster(&name, members, head, radius, block)?;
                heads.push(head);
            }

            let bridge = builder.create_nodes(1);
            let block = plan.allocate("bridge")?;
            builder.build_bridge(&heads, bridge[0], *bridge_radius, block)?;
        }
        TopologyConfig::AccessPoint {
            stations,
            ssid,
            link_rate,
            link_delay_ms,
        } => {
            let access_points = builder.create_nodes(stations.len());
            let link = PointToPointLink {
                data_rate: *link_rate,
                delay: duration_from_secs("topology.link_delay_ms", link_delay_ms / 1000.0)?,
            };
            for pair in access_points.windows(2) {
                let block = plan.allocate(&format!("p2p-{}-{}", pair[0], pair[1]))?;
                builder.build_point_to_point(pair[0], pair[1], link, block)?;
            }
            for (index, (&ap, &count)) in access_points.iter().zip(stations).enumerate() {
                let ids = builder.create_nodes(count);
                let network = format!("{ssid}-{index}");
                let block = plan.allocate(&network)?;
                builder.build_infrastructure(&ids, ap, &network, block)?;
            }
        }
    }

    let topology = builder.finish();
    let order = topology.nodes().iter().map(|n| n.id()).collect();
    Ok((topology, order))
}

fn build_channel(config: &ChannelConfig, seed: &SeededRandom) -> Result<Box<dyn Channel>> {
    let delay = config.per_hop_delay()?;
    let channel: Box<dyn Channel> = match config {
        ChannelConfig::Ideal { .. } => Box::new(IdealChannel::new(delay)),
        ChannelConfig::Lossy { loss_rate, .. } => Box::new(LossyChannel::new(
            delay,
            *loss_rate,
            seed.fork(CHANNEL_STREAM),
        )),
    };
    info!("[CHANNEL] {} channel, {:?} per hop", channel.name(), delay);
    Ok(channel)
}

/// Protocols that can be compared in one batch with the given flow-monitor setting
pub fn comparable_protocols(flow_monitor: bool) -> Vec<RoutingProtocol> {
    RoutingProtocol::ALL
        .into_iter()
        .filter(|p| !flow_monitor || p.supports_flow_monitoring())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ExperimentError, ResourceConflict};

    fn quiet(mut config: ExperimentConfig) -> ExperimentConfig {
        config.output.csv_path = None;
        config
    }

    #[test]
    fn test_hierarchical_topology_layout() {
        let mut plan = AddressPlan::new(crate::address::AddressBlock::DEFAULT_BASE);
        let mut rng = SeededRandom::new(1);
        let (topology, order) =
            build_topology(&TopologyConfig::default_hierarchical(), &mut plan, &mut rng).unwrap();

        assert_eq!(topology.node_count(), 51);
        assert_eq!(order.len(), 51);
        assert_eq!(topology.clusters().len(), 4);
        // 50 cluster devices plus 3 heads and the bridge on the bridge domain
        assert_eq!(topology.device_count(), 54);
        assert_eq!(topology.clusters()[1].radius, 150.0);
        assert_eq!(plan.assigned().len(), 4);
    }

    #[test]
    fn test_access_point_topology_layout() {
        let mut plan = AddressPlan::new(crate::address::AddressBlock::DEFAULT_BASE);
        let mut rng = SeededRandom::new(1);
        let (topology, _) =
            build_topology(&TopologyConfig::default_access_point(), &mut plan, &mut rng).unwrap();

        assert_eq!(topology.node_count(), 12);
        assert_eq!(topology.domains().len(), 3);
        // Station in the first network reaches a station in the second via both APs
        assert_eq!(topology.hop_distance(NodeId(2), NodeId(7)), Some(3));
    }

    #[test]
    fn test_dsr_with_flow_monitor_fails_before_running() {
        let mut config = quiet(ExperimentConfig::default());
        config.routing.protocol = "DSR".to_string();
        config.routing.flow_monitor = true;

        let err = ExperimentOrchestrator::new(config).unwrap().run().unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::Configuration(ConfigurationError::IncompatibleFeature { .. })
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_unrepresentable_total_time_is_a_configuration_error() {
        let mut config = quiet(ExperimentConfig::default());
        config.experiment.total_time_secs = 1e20;

        let err = ExperimentOrchestrator::new(config).err().unwrap();
        assert!(matches!(
            err,
            ExperimentError::Configuration(ConfigurationError::InvalidValue { .. })
        ));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_overlapping_explicit_blocks_are_a_conflict() {
        let mut config = quiet(ExperimentConfig::default());
        let block = crate::address::AddressBlock::DEFAULT_BASE;
        config.addressing.explicit = vec![block, block];

        let err = ExperimentOrchestrator::new(config).unwrap().run().unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::Resource(ResourceConflict::OverlappingAddressBlocks { .. })
        ));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_comparable_protocols() {
        assert_eq!(comparable_protocols(false).len(), 4);
        assert!(!comparable_protocols(true).contains(&RoutingProtocol::Dsr));
    }

    #[test]
    fn test_short_flat_run() {
        let mut config = quiet(ExperimentConfig::default());
        config.topology = TopologyConfig::Flat {
            nodes: 6,
            area: crate::topology::Rectangle::new(0.0, 300.0, 0.0, 1500.0),
            max_speed_mps: 20.0,
            pause_secs: 0.0,
        };
        config.traffic.sinks = 3;
        config.traffic.jitter.start_secs = 1.0;
        config.traffic.jitter.end_secs = 2.0;
        config.experiment.total_time_secs = 10.0;

        let report = ExperimentOrchestrator::new(config).unwrap().run().unwrap();

        assert_eq!(report.samples.len(), 10);
        assert_eq!(report.sinks, 3);
        assert!(report.delivery.packets_delivered > 0);
        assert_eq!(report.anomalies.total(), 0);
        assert_eq!(report.final_time_secs, 10.0);
        assert!(report.flows.is_none());
    }
}
