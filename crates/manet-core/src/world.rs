//! Simulation world
//!
//! Everything the scheduled callbacks touch lives here: the finished
//! topology, traffic sources, sinks, the sampler and the optional flow
//! monitor. The orchestrator owns the world and lends it to the scheduler
//! for the duration of `run`.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::channel::{Channel, Transit};
use crate::errors::{DeliveryAnomaly, OutputError};
use crate::flow_monitor::FlowMonitor;
use crate::packet::Packet;
use crate::sampler::ThroughputSampler;
use crate::scheduler::EventScheduler;
use crate::sink::SinkSet;
use crate::topology::{NodeId, Topology};
use crate::trace::{PacketObserver, TransmitEvent};
use crate::traffic::{SourceHandle, TrafficGenerator};

/// Per-kind counts of delivery anomalies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AnomalyCounters {
    pub unknown_destination: u64,
    pub no_listener: u64,
    pub empty_payload: u64,
    pub no_route: u64,
}

impl AnomalyCounters {
    pub fn total(&self) -> u64 {
        self.unknown_destination + self.no_listener + self.empty_payload + self.no_route
    }

    fn count(&mut self, anomaly: &DeliveryAnomaly) {
        match anomaly {
            DeliveryAnomaly::UnknownDestination { .. } => self.unknown_destination += 1,
            DeliveryAnomaly::NoListener { .. } => self.no_listener += 1,
            DeliveryAnomaly::EmptyPayload { .. } => self.empty_payload += 1,
            DeliveryAnomaly::NoRoute { .. } => self.no_route += 1,
        }
    }
}

/// Packet totals over the whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_delivered: u64,
    pub bytes_delivered: u64,
    pub packets_lost: u64,
}

pub struct SimWorld {
    topology: Topology,
    traffic: TrafficGenerator,
    sinks: SinkSet,
    sampler: ThroughputSampler,
    flow_monitor: Option<FlowMonitor>,
    channel: Box<dyn Channel>,
    observers: Vec<Box<dyn PacketObserver>>,
    routes: HashMap<(NodeId, NodeId), Option<u32>>,
    next_uid: u64,
    anomalies: AnomalyCounters,
    stats: DeliveryStats,
    failure: Option<OutputError>,
}

impl SimWorld {
    pub fn new(
        topology: Topology,
        traffic: TrafficGenerator,
        sinks: SinkSet,
        sampler: ThroughputSampler,
        channel: Box<dyn Channel>,
    ) -> Self {
        Self {
            topology,
            traffic,
            sinks,
            sampler,
            flow_monitor: None,
            channel,
            observers: Vec::new(),
            routes: HashMap::new(),
            next_uid: 0,
            anomalies: AnomalyCounters::default(),
            stats: DeliveryStats::default(),
            failure: None,
        }
    }

    pub fn with_flow_monitor(mut self, monitor: FlowMonitor) -> Self {
        self.flow_monitor = Some(monitor);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn PacketObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn traffic(&self) -> &TrafficGenerator {
        &self.traffic
    }

    pub fn sinks(&self) -> &SinkSet {
        &self.sinks
    }

    pub fn sampler(&self) -> &ThroughputSampler {
        &self.sampler
    }

    pub fn flow_monitor(&self) -> Option<&FlowMonitor> {
        self.flow_monitor.as_ref()
    }

    pub fn anomalies(&self) -> AnomalyCounters {
        self.anomalies
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats
    }

    // ------------------------------------------------------------------------
    // Scheduled actions
    // ------------------------------------------------------------------------

    /// Emit the next packet of a source and queue the one after it
    pub fn send_from(&mut self, handle: SourceHandle, sched: &mut EventScheduler<SimWorld>) {
        let now = sched.now();
        let Some(source) = self.traffic.source_mut(handle) else {
            return;
        };
        if now >= source.stop() {
            return;
        }
        let Some(size) = source.next_packet_size() else {
            return;
        };

        source.record_sent(size);
        let packet = Packet {
            uid: self.next_uid,
            source_node: source.node(),
            source: source.local(),
            destination: source.destination(),
            size,
            protocol: source.kind().protocol(),
            sent_at: now,
        };
        let gap = source.interval(size);
        let more = !source.is_exhausted();
        let stop = source.stop();
        self.next_uid += 1;

        self.transmit(packet, sched);

        if let (true, Some(gap)) = (more, gap) {
            if now + gap < stop {
                sched.schedule(gap, move |sched: &mut EventScheduler<SimWorld>, world: &mut SimWorld| {
                    world.send_from(handle, sched);
                });
            }
        }
    }

    /// Hand a packet to the channel and schedule its delivery
    pub fn transmit(&mut self, packet: Packet, sched: &mut EventScheduler<SimWorld>) {
        let now = sched.now();
        let event = TransmitEvent {
            time: now,
            source: *packet.source.ip(),
            destination: *packet.destination.ip(),
            size: packet.size,
            protocol: packet.protocol,
        };
        let mut failure = None;
        for observer in &mut self.observers {
            if let Err(e) = observer.record(&event) {
                failure = Some(e);
                break;
            }
        }
        if let Some(e) = failure {
            self.fail(e, sched);
            return;
        }

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += u64::from(packet.size);
        if let Some(monitor) = self.flow_monitor.as_mut() {
            monitor.record_tx(&packet, now);
        }

        let Some(destination) = self.topology.node_by_address(*packet.destination.ip()) else {
            self.drop_packet(&packet, DeliveryAnomaly::UnknownDestination {
                destination: packet.destination,
            });
            return;
        };
        let Some(hops) = self.route(packet.source_node, destination) else {
            self.drop_packet(&packet, DeliveryAnomaly::NoRoute {
                source_addr: *packet.source.ip(),
                destination: *packet.destination.ip(),
            });
            return;
        };

        match self.channel.transit(&packet, hops) {
            Transit::Deliver { after } => {
                sched.schedule(after, move |sched: &mut EventScheduler<SimWorld>, world: &mut SimWorld| {
                    world.deliver(packet, sched);
                });
            }
            Transit::Lost => {
                self.stats.packets_lost += 1;
                if let Some(monitor) = self.flow_monitor.as_mut() {
                    monitor.record_loss(&packet);
                }
            }
        }
    }

    /// Hand an arrived packet to the sink bound to its destination
    pub fn deliver(&mut self, packet: Packet, sched: &mut EventScheduler<SimWorld>) {
        if packet.size == 0 {
            self.drop_packet(&packet, DeliveryAnomaly::EmptyPayload { uid: packet.uid });
            return;
        }
        let Some(sink) = self.sinks.by_address_mut(packet.destination) else {
            self.drop_packet(&packet, DeliveryAnomaly::NoListener {
                destination: packet.destination,
            });
            return;
        };

        sink.on_deliver(*packet.source.ip(), packet.size);
        self.stats.packets_delivered += 1;
        self.stats.bytes_delivered += u64::from(packet.size);
        if let Some(monitor) = self.flow_monitor.as_mut() {
            monitor.record_rx(&packet, sched.now());
        }
    }

    /// One sampler tick
    pub fn sample_tick(&mut self, sched: &mut EventScheduler<SimWorld>) {
        if let Err(e) = self.sampler.tick(sched.now(), &mut self.sinks) {
            self.fail(e, sched);
        }
    }

    /// Record a fatal output error and halt the run
    pub fn fail(&mut self, failure: OutputError, sched: &mut EventScheduler<SimWorld>) {
        error!("[WORLD] Output failure at {}: {}", sched.now(), failure);
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
        sched.stop();
    }

    pub fn take_failure(&mut self) -> Option<OutputError> {
        self.failure.take()
    }

    /// Flush every output stream
    pub fn finish(&mut self) -> Result<(), OutputError> {
        self.sampler.finish()?;
        for observer in &mut self.observers {
            observer.flush()?;
        }
        Ok(())
    }

    pub fn into_parts(self) -> (ThroughputSampler, Option<FlowMonitor>) {
        (self.sampler, self.flow_monitor)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Hop count when both ends run a routing stack and are connected
    fn route(&mut self, from: NodeId, to: NodeId) -> Option<u32> {
        if let Some(cached) = self.routes.get(&(from, to)) {
            return *cached;
        }
        let routed = |id: NodeId| {
            self.topology
                .node(id)
                .is_some_and(|node| node.routing().is_some())
        };
        let hops = if routed(from) && routed(to) {
            self.topology.hop_distance(from, to)
        } else {
            None
        };
        self.routes.insert((from, to), hops);
        hops
    }

    fn drop_packet(&mut self, packet: &Packet, anomaly: DeliveryAnomaly) {
        self.stats.packets_lost += 1;
        if let Some(monitor) = self.flow_monitor.as_mut() {
            monitor.record_loss(packet);
        }
        self.record_anomaly(anomaly);
    }

    fn record_anomaly(&mut self, anomaly: DeliveryAnomaly) {
        // Warn once per kind, repeats go to debug
        let first = match anomaly {
            DeliveryAnomaly::UnknownDestination { .. } => self.anomalies.unknown_destination == 0,
            DeliveryAnomaly::NoListener { .. } => self.anomalies.no_listener == 0,
            DeliveryAnomaly::EmptyPayload { .. } => self.anomalies.empty_payload == 0,
            DeliveryAnomaly::NoRoute { .. } => self.anomalies.no_route == 0,
        };
        if first {
            warn!("[DELIVERY] {}", anomaly);
        } else {
            debug!("[DELIVERY] {}", anomaly);
        }
        self.anomalies.count(&anomaly);
    }
}
