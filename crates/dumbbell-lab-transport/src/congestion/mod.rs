//! Congestion control algorithms, one per file, behind [`CongestionOps`].

mod highspeed;
mod newreno;
mod scalable;
mod vegas;
mod westwood;

pub use highspeed::HighSpeed;
pub use newreno::{LinuxReno, NewReno};
pub use scalable::Scalable;
pub use vegas::Vegas;
pub use westwood::{Westwood, WestwoodFlavor};

use serde::Serialize;
use std::time::Duration;

/// Loss-recovery phase of a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CongestionState {
    /// Normal operation.
    Open,
    /// Duplicate ACKs seen, not yet enough for fast retransmit.
    Disorder,
    /// Fast recovery after a fast retransmit.
    Recovery,
    /// Retransmission timeout recovery.
    Loss,
}

/// The part of a sender's control block congestion control may read or steer.
#[derive(Debug, Clone)]
pub struct TcpState {
    pub cwnd: u32,
    pub ssthresh: u32,
    pub segment_size: u32,
    /// Oldest unacknowledged byte.
    pub snd_una: u64,
    /// Next byte to transmit.
    pub snd_nxt: u64,
    /// Highest byte ever transmitted, plus one.
    pub high_tx_mark: u64,
    pub bytes_in_flight: u32,
    pub min_rtt: Option<Duration>,
    pub last_rtt: Option<Duration>,
    pub ca_state: CongestionState,
    /// Simulated time of the event being processed.
    pub now: Duration,
}

impl TcpState {
    pub fn new(segment_size: u32, cwnd: u32, ssthresh: u32) -> Self {
        Self {
            cwnd,
            ssthresh,
            segment_size,
            snd_una: 0,
            snd_nxt: 0,
            high_tx_mark: 0,
            bytes_in_flight: 0,
            min_rtt: None,
            last_rtt: None,
            ca_state: CongestionState::Open,
            now: Duration::ZERO,
        }
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    pub fn cwnd_segments(&self) -> u32 {
        self.cwnd / self.segment_size.max(1)
    }
}

/// Window management of one congestion control algorithm.
pub trait CongestionOps {
    fn name(&self) -> &'static str;

    /// Grow the window after `segments_acked` new segments were acknowledged.
    fn increase_window(&mut self, tcb: &mut TcpState, segments_acked: u32);

    /// Slow start threshold to use after a loss is detected.
    fn ssthresh(&mut self, tcb: &TcpState, bytes_in_flight: u32) -> u32;

    /// Called for every ACK of new data, with an RTT sample when Karn's rule allows one.
    fn pkts_acked(&mut self, _tcb: &TcpState, _segments_acked: u32, _rtt: Option<Duration>) {}

    fn congestion_state_set(&mut self, _tcb: &TcpState, _new_state: CongestionState) {}
}
