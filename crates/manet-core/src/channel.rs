//! Radio channel abstraction
//!
//! The physical and MAC layers are not simulated. A `Channel` only decides
//! whether a routed packet arrives and how long it takes, given the number
//! of hops between sender and receiver.

use std::time::Duration;

use tracing::trace;

use crate::packet::Packet;
use crate::random::{RandomSource, SeededRandom};

/// Fate of a packet crossing the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transit {
    Deliver { after: Duration },
    Lost,
}

pub trait Channel {
    fn transit(&mut self, packet: &Packet, hops: u32) -> Transit;

    fn name(&self) -> &'static str;
}

/// Loss-free channel with a fixed delay per hop
#[derive(Debug, Clone)]
pub struct IdealChannel {
    per_hop_delay: Duration,
}

impl IdealChannel {
    pub fn new(per_hop_delay: Duration) -> Self {
        Self { per_hop_delay }
    }
}

impl Channel for IdealChannel {
    fn transit(&mut self, _packet: &Packet, hops: u32) -> Transit {
        Transit::Deliver {
            after: self.per_hop_delay.saturating_mul(hops.max(1)),
        }
    }

    fn name(&self) -> &'static str {
        "ideal"
    }
}

/// Each hop drops the packet independently with probability `loss_rate`
pub struct LossyChannel {
    per_hop_delay: Duration,
    loss_rate: f64,
    rng: SeededRandom,
}

impl LossyChannel {
    pub fn new(per_hop_delay: Duration, loss_rate: f64, rng: SeededRandom) -> Self {
        Self {
            per_hop_delay,
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng,
        }
    }
}

impl Channel for LossyChannel {
    fn transit(&mut self, packet: &Packet, hops: u32) -> Transit {
        let hops = hops.max(1);
        for hop in 0..hops {
            if self.rng.gen_bool(self.loss_rate) {
                trace!("[CHANNEL] Packet {} lost on hop {}", packet.uid, hop + 1);
                return Transit::Lost;
            }
        }
        Transit::Deliver {
            after: self.per_hop_delay.saturating_mul(hops),
        }
    }

    fn name(&self) -> &'static str {
        "lossy"
    }
}
