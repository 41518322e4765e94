//! Periodic throughput sampling
//!
//! Once per period the sampler sums the bytes and packets every sink
//! received since the previous tick, emits a `SampleRecord`, appends it to
//! the throughput CSV and resets the sinks' interval counters.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::SimTime;
use crate::errors::{OutputError, SchedulerError};
use crate::scheduler::{EventScheduler, TimerId};
use crate::sink::SinkSet;
use crate::world::SimWorld;

pub const CSV_HEADER: &str =
    "SimulationSecond,ReceiveRate(kbps),PacketsReceived,NumberOfSinks,RoutingProtocol,TransmissionPower";

/// Default sampling period
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// One throughput sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    pub time_secs: f64,
    pub kbps: f64,
    pub packets: u64,
    pub sinks: usize,
    pub protocol: String,
    pub tx_power_dbm: f64,
}

impl SampleRecord {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.time_secs, self.kbps, self.packets, self.sinks, self.protocol, self.tx_power_dbm
        )
    }
}

/// Destination for sample rows
pub trait SampleSink {
    fn append(&mut self, record: &SampleRecord) -> Result<(), OutputError>;

    fn flush(&mut self) -> Result<(), OutputError>;
}

/// Throughput CSV file. Truncated and given its header on creation.
pub struct CsvSampleWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CsvSampleWriter {
    pub fn create(path: &Path) -> Result<Self, OutputError> {
        let file = File::create(path).map_err(|e| OutputError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{CSV_HEADER}").map_err(|e| OutputError::io(path, e))?;
        writer.flush().map_err(|e| OutputError::io(path, e))?;
        info!("[SAMPLER] Writing throughput samples to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSink for CsvSampleWriter {
    fn append(&mut self, record: &SampleRecord) -> Result<(), OutputError> {
        writeln!(self.writer, "{}", record.to_csv_row()).map_err(|e| OutputError::io(&self.path, e))?;
        self.flush()
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush().map_err(|e| OutputError::io(&self.path, e))
    }
}

// ----------------------------------------------------------------------------
// Sampler
// ----------------------------------------------------------------------------

pub struct ThroughputSampler {
    protocol: String,
    tx_power_dbm: f64,
    period: Duration,
    output: Option<Box<dyn SampleSink>>,
    records: Vec<SampleRecord>,
}

impl ThroughputSampler {
    pub fn new(protocol: &str, tx_power_dbm: f64, output: Option<Box<dyn SampleSink>>) -> Self {
        Self {
            protocol: protocol.to_string(),
            tx_power_dbm,
            period: DEFAULT_PERIOD,
            output,
            records: Vec::new(),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Take one sample and reset the sinks' interval counters
    pub fn tick(&mut self, now: SimTime, sinks: &mut SinkSet) -> Result<SampleRecord, OutputError> {
        let (bytes, packets) = sinks.interval_totals();
        let kbps = (bytes as f64 * 8.0 / 1000.0) / self.period.as_secs_f64();

        let record = SampleRecord {
            time_secs: now.as_secs_f64(),
            kbps,
            packets,
            sinks: sinks.len(),
            protocol: self.protocol.clone(),
            tx_power_dbm: self.tx_power_dbm,
        };
        sinks.reset_intervals();

        if let Some(output) = self.output.as_mut() {
            output.append(&record)?;
        }
        debug!(
            "[SAMPLER] {}: {} kbps, {} packets",
            now, record.kbps, record.packets
        );
        self.records.push(record.clone());
        Ok(record)
    }

    /// Arm the periodic tick; it keeps firing until the run ends
    pub fn start(&self, scheduler: &mut EventScheduler<SimWorld>) -> Result<TimerId, SchedulerError> {
        scheduler.schedule_repeating(
            self.period,
            |sched: &mut EventScheduler<SimWorld>, world: &mut SimWorld| world.sample_tick(sched),
        )
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<SampleRecord> {
        self.records
    }

    pub fn finish(&mut self) -> Result<(), OutputError> {
        match self.output.as_mut() {
            Some(output) => output.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::NodeId;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn sinks(count: u8) -> SinkSet {
        let mut sinks = SinkSet::new();
        for i in 0..count {
            sinks
                .install(NodeId(i as u32), SocketAddrV4::new(Ipv4Addr::new(10, 1, 0, i + 1), 9))
                .unwrap();
        }
        sinks
    }

    #[test]
    fn test_tick_converts_bytes_to_kbps_and_resets() {
        let mut sinks = sinks(2);
        let mut sampler = ThroughputSampler::new("AODV", 7.5, None);
        let dest = SocketAddrV4::new(Ipv4Addr::new(10, 1, 0, 1), 9);
        sinks
            .by_address_mut(dest)
            .unwrap()
            .on_deliver(Ipv4Addr::new(10, 1, 0, 9), 1024);

        let first = sampler.tick(SimTime::from_secs(1), &mut sinks).unwrap();
        assert_eq!(first.kbps, 8.192);
        assert_eq!(first.packets, 1);
        assert_eq!(first.sinks, 2);

        let second = sampler.tick(SimTime::from_secs(2), &mut sinks).unwrap();
        assert_eq!(second.kbps, 0.0);
        assert_eq!(second.packets, 0);
        assert_eq!(sampler.records().len(), 2);
    }

    #[test]
    fn test_csv_row_format() {
        let record = SampleRecord {
            time_secs: 3.0,
            kbps: 8.192,
            packets: 16,
            sinks: 10,
            protocol: "OLSR".to_string(),
            tx_power_dbm: 7.5,
        };
        assert_eq!(record.to_csv_row(), "3,8.192,16,10,OLSR,7.5");
    }

    #[test]
    fn test_csv_header_written_on_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("throughput.csv");
        std::fs::write(&path, "stale contents\n").unwrap();

        let writer = CsvSampleWriter::create(&path).unwrap();
        drop(writer);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{CSV_HEADER}\n"));
    }

    #[test]
    fn test_ticks_append_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("throughput.csv");
        let writer = CsvSampleWriter::create(&path).unwrap();
        let mut sampler = ThroughputSampler::new("DSDV", 1.0, Some(Box::new(writer)));
        let mut sinks = sinks(1);

        sampler.tick(SimTime::from_secs(1), &mut sinks).unwrap();
        sampler.tick(SimTime::from_secs(2), &mut sinks).unwrap();
        sampler.finish().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1,0,0,1,DSDV,1");
        assert_eq!(lines[2], "2,0,0,1,DSDV,1");
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.csv");
        assert!(matches!(
            CsvSampleWriter::create(&path),
            Err(OutputError::Io { .. })
        ));
    }
}
