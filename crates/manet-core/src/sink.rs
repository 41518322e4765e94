//! Receive sinks
//!
//! A sink listens on one socket address and counts what arrives, per
//! sending address. Counters since the last sampler tick are kept apart
//! from lifetime totals; the sampler resets the former on every tick.

use std::collections::{BTreeMap, HashMap};
use std::net::{Ipv4Addr, SocketAddrV4};

use serde::Serialize;
use tracing::debug;

use crate::errors::ResourceConflict;
use crate::topology::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkHandle(pub usize);

/// Counters for one sending address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlowRecord {
    pub bytes_since_tick: u64,
    pub packets_since_tick: u64,
    pub total_bytes: u64,
    pub total_packets: u64,
}

#[derive(Debug, Clone)]
pub struct ReceiveSink {
    handle: SinkHandle,
    node: NodeId,
    address: SocketAddrV4,
    flows: BTreeMap<Ipv4Addr, FlowRecord>,
}

impl ReceiveSink {
    pub fn new(handle: SinkHandle, node: NodeId, address: SocketAddrV4) -> Self {
        Self {
            handle,
            node,
            address,
            flows: BTreeMap::new(),
        }
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }

    /// Count one received packet of `bytes` from `from`
    pub fn on_deliver(&mut self, from: Ipv4Addr, bytes: u32) {
        let record = self.flows.entry(from).or_default();
        record.bytes_since_tick += u64::from(bytes);
        record.packets_since_tick += 1;
        record.total_bytes += u64::from(bytes);
        record.total_packets += 1;
        debug!(
            "[SINK] {} received {} bytes from {}",
            self.address, bytes, from
        );
    }

    pub fn flows(&self) -> &BTreeMap<Ipv4Addr, FlowRecord> {
        &self.flows
    }

    pub fn interval_bytes(&self) -> u64 {
        self.flows.values().map(|r| r.bytes_since_tick).sum()
    }

    pub fn interval_packets(&self) -> u64 {
        self.flows.values().map(|r| r.packets_since_tick).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.flows.values().map(|r| r.total_bytes).sum()
    }

    pub fn total_packets(&self) -> u64 {
        self.flows.values().map(|r| r.total_packets).sum()
    }

    pub fn reset_interval(&mut self) {
        for record in self.flows.values_mut() {
            record.bytes_since_tick = 0;
            record.packets_since_tick = 0;
        }
    }
}

// ----------------------------------------------------------------------------
// Sink registry
// ----------------------------------------------------------------------------

/// All sinks of a run, indexed by listening address
#[derive(Debug, Clone, Default)]
pub struct SinkSet {
    sinks: Vec<ReceiveSink>,
    by_address: HashMap<SocketAddrV4, usize>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new sink on `node` at `address`
    pub fn install(&mut self, node: NodeId, address: SocketAddrV4) -> Result<SinkHandle, ResourceConflict> {
        if self.by_address.contains_key(&address) {
            return Err(ResourceConflict::SinkAddressInUse { address });
        }
        let handle = SinkHandle(self.sinks.len());
        self.sinks.push(ReceiveSink::new(handle, node, address));
        self.by_address.insert(address, handle.0);
        debug!("[SINK] Sink {} listening on {} (node {})", handle.0, address, node);
        Ok(handle)
    }

    pub fn get(&self, handle: SinkHandle) -> Option<&ReceiveSink> {
        self.sinks.get(handle.0)
    }

    pub fn by_address_mut(&mut self, address: SocketAddrV4) -> Option<&mut ReceiveSink> {
        let index = *self.by_address.get(&address)?;
        self.sinks.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReceiveSink> {
        self.sinks.iter()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Bytes and packets received by all sinks since the last reset
    pub fn interval_totals(&self) -> (u64, u64) {
        self.sinks.iter().fold((0, 0), |(bytes, packets), sink| {
            (bytes + sink.interval_bytes(), packets + sink.interval_packets())
        })
    }

    pub fn reset_intervals(&mut self) {
        for sink in &mut self.sinks {
            sink.reset_interval();
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.sinks.iter().map(ReceiveSink::total_bytes).sum()
    }

    pub fn total_packets(&self) -> u64 {
        self.sinks.iter().map(ReceiveSink::total_packets).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(10, 1, 0, last), port)
    }

    #[test]
    fn test_on_deliver_accumulates_per_sender() {
        let mut sink = ReceiveSink::new(SinkHandle(0), NodeId(0), addr(1, 9));
        let a = Ipv4Addr::new(10, 1, 0, 2);
        let b = Ipv4Addr::new(10, 1, 0, 3);

        sink.on_deliver(a, 64);
        sink.on_deliver(a, 64);
        sink.on_deliver(b, 512);

        assert_eq!(sink.flows()[&a].packets_since_tick, 2);
        assert_eq!(sink.interval_bytes(), 640);
        assert_eq!(sink.interval_packets(), 3);

        sink.reset_interval();
        assert_eq!(sink.interval_bytes(), 0);
        assert_eq!(sink.total_bytes(), 640);
        assert_eq!(sink.total_packets(), 3);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut sinks = SinkSet::new();
        sinks.install(NodeId(0), addr(1, 9)).unwrap();
        assert!(sinks.install(NodeId(1), addr(2, 9)).is_ok());
        assert_eq!(
            sinks.install(NodeId(2), addr(1, 9)),
            Err(ResourceConflict::SinkAddressInUse {
                address: addr(1, 9)
            })
        );
        assert_eq!(sinks.len(), 2);
    }

    #[test]
    fn test_interval_totals_across_sinks() {
        let mut sinks = SinkSet::new();
        sinks.install(NodeId(0), addr(1, 9)).unwrap();
        sinks.install(NodeId(1), addr(2, 9)).unwrap();

        let from = Ipv4Addr::new(10, 1, 0, 9);
        sinks.by_address_mut(addr(1, 9)).unwrap().on_deliver(from, 100);
        sinks.by_address_mut(addr(2, 9)).unwrap().on_deliver(from, 50);

        assert_eq!(sinks.interval_totals(), (150, 2));
        sinks.reset_intervals();
        assert_eq!(sinks.interval_totals(), (0, 0));
        assert_eq!(sinks.total_bytes(), 150);
        assert!(sinks.by_address_mut(addr(3, 9)).is_none());
    }
}
