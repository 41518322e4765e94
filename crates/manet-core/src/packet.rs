//! Packets exchanged between traffic sources and sinks

use std::net::SocketAddrV4;

use serde::{Deserialize, Serialize};

use crate::clock::SimTime;
use crate::topology::NodeId;

/// IP protocol number for UDP (constant-bit-rate traffic)
pub const UDP_PROTOCOL: u8 = 17;
/// IP protocol number for TCP (bulk traffic)
pub const TCP_PROTOCOL: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub uid: u64,
    pub source_node: NodeId,
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    /// Payload size in bytes
    pub size: u32,
    pub protocol: u8,
    pub sent_at: SimTime,
}

impl Packet {
    pub fn flow_key(&self) -> FlowKey {
        FlowKey {
            source: self.source,
            destination: self.destination,
            protocol: self.protocol,
        }
    }
}

/// Five-tuple identifying a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub source: SocketAddrV4,
    pub destination: SocketAddrV4,
    pub protocol: u8,
}
