//! Per-flow statistics
//!
//! Tracks every five-tuple seen on the transmit path together with what was
//! received and lost. At the end of a run the statistics are exported as a
//! JSON document. Not available with DSR.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::SocketAddrV4;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::clock::SimTime;
use crate::errors::OutputError;
use crate::packet::{FlowKey, Packet};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub lost_packets: u64,
    pub delay_sum_secs: f64,
    pub first_tx_secs: Option<f64>,
    pub last_tx_secs: Option<f64>,
    pub first_rx_secs: Option<f64>,
    pub last_rx_secs: Option<f64>,
}

impl FlowStats {
    pub fn mean_delay_secs(&self) -> Option<f64> {
        (self.rx_packets > 0).then(|| self.delay_sum_secs / self.rx_packets as f64)
    }

    /// Received kbps between first transmission and last reception
    pub fn throughput_kbps(&self) -> Option<f64> {
        let span = self.last_rx_secs? - self.first_tx_secs?;
        (span > 0.0).then(|| self.rx_bytes as f64 * 8.0 / 1000.0 / span)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowEntry {
    pub flow_id: u32,
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    pub protocol: u8,
    #[serde(flatten)]
    pub stats: FlowStats,
    pub mean_delay_secs: Option<f64>,
    pub throughput_kbps: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlowMonitorReport {
    pub flows: Vec<FlowEntry>,
}

impl FlowMonitorReport {
    pub fn total_lost(&self) -> u64 {
        self.flows.iter().map(|f| f.stats.lost_packets).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlowMonitor {
    flows: BTreeMap<FlowKey, FlowStats>,
}

impl FlowMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tx(&mut self, packet: &Packet, now: SimTime) {
        let stats = self.flows.entry(packet.flow_key()).or_default();
        stats.tx_packets += 1;
        stats.tx_bytes += u64::from(packet.size);
        stats.first_tx_secs.get_or_insert(now.as_secs_f64());
        stats.last_tx_secs = Some(now.as_secs_f64());
    }

    pub fn record_rx(&mut self, packet: &Packet, now: SimTime) {
        let stats = self.flows.entry(packet.flow_key()).or_default();
        stats.rx_packets += 1;
        stats.rx_bytes += u64::from(packet.size);
        stats.delay_sum_secs += (now - packet.sent_at).as_secs_f64();
        stats.first_rx_secs.get_or_insert(now.as_secs_f64());
        stats.last_rx_secs = Some(now.as_secs_f64());
    }

    pub fn record_loss(&mut self, packet: &Packet) {
        self.flows.entry(packet.flow_key()).or_default().lost_packets += 1;
    }

    pub fn flow(&self, key: &FlowKey) -> Option<&FlowStats> {
        self.flows.get(key)
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Snapshot with flow ids assigned from 1 in five-tuple order
    pub fn report(&self) -> FlowMonitorReport {
        let flows = self
            .flows
            .iter()
            .enumerate()
            .map(|(index, (key, stats))| FlowEntry {
                flow_id: index as u32 + 1,
                source: key.source,
                destination: key.destination,
                protocol: key.protocol,
                stats: stats.clone(),
                mean_delay_secs: stats.mean_delay_secs(),
                throughput_kbps: stats.throughput_kbps(),
            })
            .collect();
        FlowMonitorReport { flows }
    }

    pub fn export_json(&self, path: &Path) -> Result<FlowMonitorReport, OutputError> {
        let report = self.report();
        let file = File::create(path).map_err(|e| OutputError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &report).map_err(|source| {
            OutputError::Serialization {
                what: "flow statistics".to_string(),
                source,
            }
        })?;
        writer.flush().map_err(|e| OutputError::io(path, e))?;
        info!(
            "[FLOWMON] Exported {} flows to {}",
            report.flows.len(),
            path.display()
        );
        Ok(report)
    }
}
