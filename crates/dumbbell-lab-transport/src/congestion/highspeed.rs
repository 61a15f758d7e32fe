use super::newreno::{NewReno, halve_in_flight, slow_start};
use super::{CongestionOps, TcpState};

const LOW_WINDOW: f64 = 38.0;
const HIGH_WINDOW: f64 = 83_000.0;
const HIGH_DECREASE: f64 = 0.1;

/// Decrease factor b(w) of the HighSpeed response function.
fn decrease_factor(w: f64) -> f64 {
    if w <= LOW_WINDOW {
        return 0.5;
    }
    (HIGH_DECREASE - 0.5) * (w.ln() - LOW_WINDOW.ln()) / (HIGH_WINDOW.ln() - LOW_WINDOW.ln()) + 0.5
}

/// Increase a(w), in segments per window of ACKs.
fn increase_factor(w: f64) -> u32 {
    if w <= LOW_WINDOW {
        return 1;
    }
    let p = 0.078 / w.powf(1.2);
    let b = decrease_factor(w);
    (w * w * p * 2.0 * b / (2.0 - b)).round().max(1.0) as u32
}

/// HighSpeed TCP: NewReno below 38 segments, larger increases and gentler
/// decreases above it.
#[derive(Debug, Default)]
pub struct HighSpeed {
    ack_cnt: u32,
}

impl CongestionOps for HighSpeed {
    fn name(&self) -> &'static str {
        "TcpHighSpeed"
    }

    fn increase_window(&mut self, tcb: &mut TcpState, mut segments_acked: u32) {
        let window = tcb.cwnd_segments() as f64;
        if window <= LOW_WINDOW {
            NewReno::grow(tcb, segments_acked);
            return;
        }
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }
        if !tcb.in_slow_start() && segments_acked > 0 {
            let mut segments = tcb.cwnd_segments();
            self.ack_cnt += segments_acked * increase_factor(segments as f64);
            if self.ack_cnt >= segments {
                segments += 1;
                self.ack_cnt = 0;
            }
            tcb.cwnd = segments.saturating_mul(tcb.segment_size);
        }
    }

    fn ssthresh(&mut self, tcb: &TcpState, bytes_in_flight: u32) -> u32 {
        let window = tcb.cwnd_segments() as f64;
        if window <= LOW_WINDOW {
            return halve_in_flight(tcb, bytes_in_flight);
        }
        let b = decrease_factor(window);
        ((1.0 - b) * window).max(2.0) as u32 * tcb.segment_size
    }
}
