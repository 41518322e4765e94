//! Packet and mobility traces
//!
//! Observers sit on the transmit path and see every packet a source emits.
//! The CSV trace keeps a running count per source/destination pair.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::clock::SimTime;
use crate::errors::OutputError;
use crate::topology::Topology;

pub const PACKET_TRACE_HEADER: &str =
    "SourceAddress,DestinationAddress,PacketSize,ProtocolNumber,Count";

pub const MOBILITY_TRACE_HEADER: &str = "NodeId,X,Y,Z,Model";

/// A packet leaving its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitEvent {
    pub time: SimTime,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub size: u32,
    pub protocol: u8,
}

pub trait PacketObserver {
    fn record(&mut self, event: &TransmitEvent) -> Result<(), OutputError>;

    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

/// CSV packet trace
pub struct CsvPacketTrace {
    path: PathBuf,
    writer: BufWriter<File>,
    counts: HashMap<(Ipv4Addr, Ipv4Addr), u64>,
}

impl CsvPacketTrace {
    pub fn create(path: &Path) -> Result<Self, OutputError> {
        let file = File::create(path).map_err(|e| OutputError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{PACKET_TRACE_HEADER}").map_err(|e| OutputError::io(path, e))?;
        info!("[TRACE] Writing packet trace to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            counts: HashMap::new(),
        })
    }
}

impl PacketObserver for CsvPacketTrace {
    fn record(&mut self, event: &TransmitEvent) -> Result<(), OutputError> {
        let count = self.counts.entry((event.source, event.destination)).or_insert(0);
        *count += 1;
        writeln!(
            self.writer,
            "{},{},{},{},{}",
            event.source, event.destination, event.size, event.protocol, count
        )
        .map_err(|e| OutputError::io(&self.path, e))
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush().map_err(|e| OutputError::io(&self.path, e))
    }
}

/// Logs each transmission at debug level
#[derive(Debug, Default)]
pub struct LogObserver;

impl PacketObserver for LogObserver {
    fn record(&mut self, event: &TransmitEvent) -> Result<(), OutputError> {
        debug!(
            "[TRACE] Sending packet from {} to {} ({} bytes)",
            event.source, event.destination, event.size
        );
        Ok(())
    }
}

/// Write the initial placement and mobility model of every node
pub fn write_mobility_trace(path: &Path, topology: &Topology) -> Result<(), OutputError> {
    let file = File::create(path).map_err(|e| OutputError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "{MOBILITY_TRACE_HEADER}").map_err(|e| OutputError::io(path, e))?;
    for node in topology.nodes() {
        let position = node.position();
        writeln!(
            writer,
            "{},{},{},{},{}",
            node.id(),
            position.x,
            position.y,
            position.z,
            node.mobility().name()
        )
        .map_err(|e| OutputError::io(path, e))?;
    }
    writer.flush().map_err(|e| OutputError::io(path, e))?;
    info!(
        "[TRACE] Wrote mobility trace for {} nodes to {}",
        topology.node_count(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::TopologyBuilder;

    fn event(source: u8, destination: u8) -> TransmitEvent {
        TransmitEvent {
            time: SimTime::ZERO,
            source: Ipv4Addr::new(10, 1, 0, source),
            destination: Ipv4Addr::new(10, 1, 0, destination),
            size: 64,
            protocol: 17,
        }
    }

    #[test]
    fn test_packet_trace_counts_per_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.csv");
        let mut trace = CsvPacketTrace::create(&path).unwrap();

        trace.record(&event(2, 1)).unwrap();
        trace.record(&event(3, 1)).unwrap();
        trace.record(&event(2, 1)).unwrap();
        trace.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], PACKET_TRACE_HEADER);
        assert_eq!(lines[1], "10.1.0.2,10.1.0.1,64,17,1");
        assert_eq!(lines[2], "10.1.0.3,10.1.0.1,64,17,1");
        assert_eq!(lines[3], "10.1.0.2,10.1.0.1,64,17,2");
    }

    #[test]
    fn test_mobility_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mobility.csv");
        let mut builder = TopologyBuilder::new();
        let nodes = builder.create_nodes(2);
        builder
            .build_cluster("c0", &nodes[1..], nodes[0], 50.0, "10.1.0.0/24".parse().unwrap())
            .unwrap();

        write_mobility_trace(&path, &builder.finish()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec![MOBILITY_TRACE_HEADER, "0,50,50,0,RandomWalk2d", "1,50,50,0,RandomWalk2d"]);
    }
}
