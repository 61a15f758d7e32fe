//! Point-to-point links: one drop-tail device queue and one transmitter per direction.

use dumbbell_lab_abstract::{LinkParams, Packet};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::engine::{LinkId, NodeId};
use crate::error_model::RateErrorModel;
use crate::topology::AddressBlock;

pub const DEFAULT_QUEUE_PACKETS: usize = 100;

/// Which end of a link a packet leaves from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChannelStats {
    pub enqueued: u64,
    pub transmitted: u64,
    pub queue_drops: u64,
    pub error_drops: u64,
    pub max_queue_len: usize,
}

/// What happened to a packet handed to a channel.
#[derive(Debug)]
pub enum Enqueued {
    /// The transmitter was idle; the packet goes on the wire now.
    Transmit(Packet),
    Queued,
    /// The device queue was full.
    Dropped(Packet),
}

#[derive(Debug, Default)]
pub struct Channel {
    queue: VecDeque<Packet>,
    busy: bool,
    stats: ChannelStats,
}

impl Channel {
    pub fn enqueue(&mut self, packet: Packet, limit: usize) -> Enqueued {
        self.stats.enqueued += 1;
        if !self.busy {
            self.busy = true;
            self.stats.transmitted += 1;
            return Enqueued::Transmit(packet);
        }
        if self.queue.len() >= limit {
            self.stats.queue_drops += 1;
            return Enqueued::Dropped(packet);
        }
        self.queue.push_back(packet);
        self.stats.max_queue_len = self.stats.max_queue_len.max(self.queue.len());
        Enqueued::Queued
    }

    /// The transmitter finished a packet; returns the next one to put on the wire.
    pub fn transmit_complete(&mut self) -> Option<Packet> {
        let next = self.queue.pop_front();
        self.busy = next.is_some();
        if next.is_some() {
            self.stats.transmitted += 1;
        }
        next
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }
}

#[derive(Debug)]
pub struct PointToPointLink {
    pub id: LinkId,
    /// `endpoints[0]` is side A (host `.1`), `endpoints[1]` side B (host `.2`).
    pub endpoints: [NodeId; 2],
    pub params: LinkParams,
    pub block: AddressBlock,
    pub queue_limit: usize,
    /// Receive-side loss, shared by both directions.
    pub error_model: Option<RateErrorModel>,
    channels: [Channel; 2],
}

impl PointToPointLink {
    pub fn new(
        id: LinkId,
        a: NodeId,
        b: NodeId,
        params: LinkParams,
        block: AddressBlock,
        queue_limit: usize,
        error_model: Option<RateErrorModel>,
    ) -> Self {
        Self {
            id,
            endpoints: [a, b],
            params,
            block,
            queue_limit,
            error_model,
            channels: [Channel::default(), Channel::default()],
        }
    }

    pub fn address(&self, side: Side) -> Ipv4Addr {
        self.block.host(side.index() as u32 + 1)
    }

    pub fn node(&self, side: Side) -> NodeId {
        self.endpoints[side.index()]
    }

    pub fn side_of(&self, node: NodeId) -> Option<Side> {
        if self.endpoints[0] == node {
            Some(Side::A)
        } else if self.endpoints[1] == node {
            Some(Side::B)
        } else {
            None
        }
    }

    pub fn tx_time(&self, packet: &Packet) -> Duration {
        self.params.bandwidth.tx_time(packet.size())
    }

    pub fn delay(&self) -> Duration {
        self.params.delay
    }

    pub fn channel(&self, from: Side) -> &Channel {
        &self.channels[from.index()]
    }

    pub fn channel_mut(&mut self, from: Side) -> &mut Channel {
        &mut self.channels[from.index()]
    }

    pub(crate) fn record_error_drop(&mut self, from: Side) {
        self.channels[from.index()].stats.error_drops += 1;
    }
}
