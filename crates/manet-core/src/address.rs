//! IPv4 address blocks and the per-run address plan
//!
//! An `AddressBlock` is a network base plus prefix length. Every device
//! installation (a cluster, a bridge, a point-to-point link) consumes one
//! block. The `AddressPlan` hands blocks out and refuses any block that
//! overlaps one already in use.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ConfigurationError, ResourceConflict};

/// Longest prefix that still leaves two usable host addresses
pub const MAX_PREFIX_LEN: u8 = 30;

/// IPv4 network block, e.g. `10.1.0.0/24` or `10.1.0.0/255.255.255.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AddressBlock {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl AddressBlock {
    /// `10.1.0.0/24`, where sequential plans start by default
    pub const DEFAULT_BASE: AddressBlock = AddressBlock {
        network: Ipv4Addr::new(10, 1, 0, 0),
        prefix_len: 24,
    };

    /// Create a block; host bits in `base` are cleared
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Result<Self, ConfigurationError> {
        if prefix_len > MAX_PREFIX_LEN {
            return Err(ConfigurationError::invalid(
                "address block",
                format!("prefix /{prefix_len} leaves no usable hosts (max /{MAX_PREFIX_LEN})"),
            ));
        }
        let mask = prefix_mask(prefix_len);
        Ok(Self {
            network: Ipv4Addr::from(u32::from(base) & mask),
            prefix_len,
        })
    }

    /// Create a block from a dotted netmask such as `255.255.255.0`
    pub fn with_mask(base: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, ConfigurationError> {
        let bits = u32::from(mask);
        let prefix_len = bits.leading_ones();
        if bits.checked_shl(prefix_len).unwrap_or(0) != 0 {
            return Err(ConfigurationError::invalid(
                "address block",
                format!("netmask {mask} is not contiguous"),
            ));
        }
        Self::new(base, prefix_len as u8)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(prefix_mask(self.prefix_len))
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !prefix_mask(self.prefix_len))
    }

    /// Usable host addresses (network and broadcast excluded)
    pub fn host_capacity(&self) -> usize {
        (1usize << (32 - self.prefix_len as u32)) - 2
    }

    /// The `index`-th usable host address; index 0 is `.1`
    pub fn host(&self, index: usize) -> Option<Ipv4Addr> {
        if index >= self.host_capacity() {
            return None;
        }
        Some(Ipv4Addr::from(u32::from(self.network) + index as u32 + 1))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & prefix_mask(self.prefix_len) == u32::from(self.network)
    }

    pub fn overlaps(&self, other: &AddressBlock) -> bool {
        let shorter = self.prefix_len.min(other.prefix_len);
        let mask = prefix_mask(shorter);
        u32::from(self.network) & mask == u32::from(other.network) & mask
    }

    /// The block of the same size immediately after this one
    pub fn next_sibling(&self) -> Option<AddressBlock> {
        let size = 1u64 << (32 - self.prefix_len as u32);
        let next = u64::from(u32::from(self.network)) + size;
        let next = u32::try_from(next).ok()?;
        Some(AddressBlock {
            network: Ipv4Addr::from(next),
            prefix_len: self.prefix_len,
        })
    }
}

fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len as u32)
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for AddressBlock {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, prefix) = s.trim().split_once('/').ok_or_else(|| {
            ConfigurationError::invalid("address block", format!("'{s}' is not in a.b.c.d/n form"))
        })?;
        let base: Ipv4Addr = base.parse().map_err(|_| {
            ConfigurationError::invalid("address block", format!("'{base}' is not an IPv4 address"))
        })?;
        // `a.b.c.d/255.255.255.0` is accepted alongside `a.b.c.d/24`
        if let Ok(mask) = prefix.parse::<Ipv4Addr>() {
            return AddressBlock::with_mask(base, mask);
        }
        let prefix_len: u8 = prefix.parse().map_err(|_| {
            ConfigurationError::invalid("address block", format!("'{prefix}' is not a prefix length"))
        })?;
        AddressBlock::new(base, prefix_len)
    }
}

impl TryFrom<String> for AddressBlock {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AddressBlock> for String {
    fn from(block: AddressBlock) -> Self {
        block.to_string()
    }
}

// ----------------------------------------------------------------------------
// Address Plan
// ----------------------------------------------------------------------------

/// Hands out non-overlapping address blocks for one run
#[derive(Debug, Clone)]
pub struct AddressPlan {
    explicit: Vec<AddressBlock>,
    cursor: Option<AddressBlock>,
    assigned: Vec<(AddressBlock, String)>,
}

impl AddressPlan {
    /// Sequential plan starting at `base`
    pub fn new(base: AddressBlock) -> Self {
        Self {
            explicit: Vec::new(),
            cursor: Some(base),
            assigned: Vec::new(),
        }
    }

    /// Blocks in `explicit` are used first, in order, then the sequential plan takes over
    pub fn with_explicit(base: AddressBlock, explicit: Vec<AddressBlock>) -> Self {
        let mut plan = Self::new(base);
        plan.explicit = explicit;
        plan.explicit.reverse();
        plan
    }

    /// Reserve a specific block for `purpose`
    pub fn claim(&mut self, block: AddressBlock, purpose: &str) -> Result<AddressBlock, ResourceConflict> {
        if let Some((existing, owner)) = self.assigned.iter().find(|(b, _)| b.overlaps(&block)) {
            return Err(ResourceConflict::OverlappingAddressBlocks {
                requested: block,
                existing: *existing,
                owner: owner.clone(),
            });
        }
        debug!("[ADDRESS] Assigned {} to {}", block, purpose);
        self.assigned.push((block, purpose.to_string()));
        Ok(block)
    }

    /// Next block for `purpose`: an explicit block if any remain, else the
    /// next free sequential block
    pub fn allocate(&mut self, purpose: &str) -> Result<AddressBlock, ResourceConflict> {
        if let Some(block) = self.explicit.pop() {
            return self.claim(block, purpose);
        }

        loop {
            let candidate = self.cursor.ok_or_else(|| self.exhausted())?;
            self.cursor = candidate.next_sibling();
            if !self.assigned.iter().any(|(b, _)| b.overlaps(&candidate)) {
                return self.claim(candidate, purpose);
            }
        }
    }

    /// Blocks handed out so far with their purpose
    pub fn assigned(&self) -> &[(AddressBlock, String)] {
        &self.assigned
    }

    fn exhausted(&self) -> ResourceConflict {
        let after = self
            .assigned
            .last()
            .map(|(b, _)| *b)
            .unwrap_or(AddressBlock {
                network: Ipv4Addr::BROADCAST,
                prefix_len: MAX_PREFIX_LEN,
            });
        ResourceConflict::AddressSpaceExhausted { after }
    }
}
