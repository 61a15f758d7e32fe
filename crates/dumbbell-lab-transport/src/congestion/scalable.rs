use super::newreno::slow_start;
use super::{CongestionOps, TcpState};

const AI_FACTOR: u32 = 50;
const MD_FACTOR: f64 = 0.125;

/// Scalable TCP: fixed increase per `min(cwnd, 50)` ACKed segments and a
/// multiplicative decrease of 1/8.
#[derive(Debug, Default)]
pub struct Scalable {
    ack_cnt: u32,
}

impl CongestionOps for Scalable {
    fn name(&self) -> &'static str {
        "TcpScalable"
    }

    fn increase_window(&mut self, tcb: &mut TcpState, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }
        if !tcb.in_slow_start() && segments_acked > 0 {
            self.ack_cnt += segments_acked;
            let threshold = tcb.cwnd_segments().min(AI_FACTOR).max(1);
            if self.ack_cnt >= threshold {
                tcb.cwnd = tcb.cwnd.saturating_add(tcb.segment_size);
                self.ack_cnt = 0;
            }
        }
    }

    fn ssthresh(&mut self, tcb: &TcpState, _bytes_in_flight: u32) -> u32 {
        let segments = (tcb.cwnd_segments() as f64 * (1.0 - MD_FACTOR)).max(2.0);
        segments as u32 * tcb.segment_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::test_support::{MSS, state};

    #[test]
    fn increase_is_capped_at_fifty_acks() {
        let mut tcb = state(200, 100);
        let mut cc = Scalable::default();
        cc.increase_window(&mut tcb, 49);
        assert_eq!(tcb.cwnd, 200 * MSS);
        cc.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 201 * MSS);
    }

    #[test]
    fn decrease_is_one_eighth() {
        let tcb = state(80, 100);
        assert_eq!(Scalable::default().ssthresh(&tcb, 0), 70 * MSS);
        let small = state(1, 100);
        assert_eq!(Scalable::default().ssthresh(&small, 0), 2 * MSS);
    }
}
