use std::time::Duration;

use super::newreno::NewReno;
use super::{CongestionOps, TcpState};

const FILTER_ALPHA: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WestwoodFlavor {
    /// One bandwidth sample per ACK.
    Westwood,
    /// One bandwidth sample per RTT.
    WestwoodPlus,
}

/// Westwood keeps NewReno's window growth but, after a loss, sets the threshold
/// to its bandwidth estimate times the minimum RTT instead of halving.
#[derive(Debug)]
pub struct Westwood {
    flavor: WestwoodFlavor,
    /// Filtered bandwidth estimate, bytes per second.
    current_bw: f64,
    last_sample_bw: f64,
    last_bw: f64,
    acked_segments: u32,
    sample_started_at: Option<Duration>,
}

impl Westwood {
    pub fn new(flavor: WestwoodFlavor) -> Self {
        Self {
            flavor,
            current_bw: 0.0,
            last_sample_bw: 0.0,
            last_bw: 0.0,
            acked_segments: 0,
            sample_started_at: None,
        }
    }

    pub fn bandwidth_estimate(&self) -> f64 {
        self.current_bw
    }

    fn estimate_bw(&mut self, interval: Duration, tcb: &TcpState) {
        let seconds = interval.as_secs_f64();
        if seconds <= 0.0 {
            return;
        }
        let sample = self.acked_segments as f64 * tcb.segment_size as f64 / seconds;
        self.acked_segments = 0;

        // Tustin low-pass filter
        self.current_bw =
            FILTER_ALPHA * self.last_bw + (1.0 - FILTER_ALPHA) * ((sample + self.last_sample_bw) / 2.0);
        self.last_sample_bw = sample;
        self.last_bw = self.current_bw;
    }
}

impl CongestionOps for Westwood {
    fn name(&self) -> &'static str {
        match self.flavor {
            WestwoodFlavor::Westwood => "TcpWestwood",
            WestwoodFlavor::WestwoodPlus => "TcpWestwoodPlus",
        }
    }

    fn increase_window(&mut self, tcb: &mut TcpState, segments_acked: u32) {
        NewReno::grow(tcb, segments_acked);
    }

    fn pkts_acked(&mut self, tcb: &TcpState, segments_acked: u32, rtt: Option<Duration>) {
        let Some(rtt) = rtt else {
            return;
        };
        self.acked_segments += segments_acked;

        match self.flavor {
            WestwoodFlavor::Westwood => self.estimate_bw(rtt, tcb),
            WestwoodFlavor::WestwoodPlus => {
                let started = *self.sample_started_at.get_or_insert(tcb.now);
                let elapsed = tcb.now.saturating_sub(started);
                if elapsed >= rtt {
                    self.estimate_bw(elapsed, tcb);
                    self.sample_started_at = Some(tcb.now);
                }
            }
        }
    }

    fn ssthresh(&mut self, tcb: &TcpState, _bytes_in_flight: u32) -> u32 {
        let min_rtt = tcb.min_rtt.unwrap_or_default().as_secs_f64();
        let bdp = (self.current_bw * min_rtt).min(u32::MAX as f64) as u32;
        bdp.max(2 * tcb.segment_size)
    }
}
