use super::{CongestionOps, TcpState};

/// One segment per ACK while below the threshold; returns the ACKed segments left over.
pub(crate) fn slow_start(tcb: &mut TcpState, segments_acked: u32) -> u32 {
    if segments_acked >= 1 {
        tcb.cwnd = tcb.cwnd.saturating_add(tcb.segment_size);
        return segments_acked - 1;
    }
    0
}

/// Roughly one segment per window of ACKs.
pub(crate) fn congestion_avoidance(tcb: &mut TcpState, segments_acked: u32) {
    if segments_acked > 0 {
        let mss = tcb.segment_size as f64;
        let adder = (mss * mss / tcb.cwnd.max(1) as f64).max(1.0);
        tcb.cwnd = tcb.cwnd.saturating_add(adder as u32);
    }
}

pub(crate) fn halve_in_flight(tcb: &TcpState, bytes_in_flight: u32) -> u32 {
    (bytes_in_flight / 2).max(2 * tcb.segment_size)
}

#[derive(Debug, Default)]
pub struct NewReno;

impl NewReno {
    pub(crate) fn grow(tcb: &mut TcpState, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }
        if !tcb.in_slow_start() {
            congestion_avoidance(tcb, segments_acked);
        }
    }
}

impl CongestionOps for NewReno {
    fn name(&self) -> &'static str {
        "TcpNewReno"
    }

    fn increase_window(&mut self, tcb: &mut TcpState, segments_acked: u32) {
        Self::grow(tcb, segments_acked);
    }

    fn ssthresh(&mut self, tcb: &TcpState, bytes_in_flight: u32) -> u32 {
        halve_in_flight(tcb, bytes_in_flight)
    }
}

/// Reno with Linux-style congestion avoidance: ACKed segments are counted and the
/// window grows by a whole segment once a full window has been acknowledged.
#[derive(Debug, Default)]
pub struct LinuxReno {
    cwnd_cnt: u32,
}

impl CongestionOps for LinuxReno {
    fn name(&self) -> &'static str {
        "TcpLinuxReno"
    }

    fn increase_window(&mut self, tcb: &mut TcpState, mut segments_acked: u32) {
        if tcb.in_slow_start() {
            segments_acked = slow_start(tcb, segments_acked);
        }
        if !tcb.in_slow_start() && segments_acked > 0 {
            let window = tcb.cwnd_segments().max(1);
            self.cwnd_cnt += segments_acked;
            if self.cwnd_cnt >= window {
                let delta = self.cwnd_cnt / window;
                tcb.cwnd = tcb.cwnd.saturating_add(delta * tcb.segment_size);
                self.cwnd_cnt -= delta * window;
            }
        }
    }

    fn ssthresh(&mut self, tcb: &TcpState, bytes_in_flight: u32) -> u32 {
        halve_in_flight(tcb, bytes_in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::test_support::{MSS, state};

    #[test]
    fn slow_start_adds_one_segment_per_ack() {
        let mut tcb = state(2, u32::MAX / MSS);
        let mut cc = NewReno;
        cc.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 3 * MSS);
    }

    #[test]
    fn congestion_avoidance_grows_sub_linearly() {
        let mut tcb = state(10, 5);
        let mut cc = NewReno;
        cc.increase_window(&mut tcb, 1);
        // MSS^2 / cwnd = 100 bytes
        assert_eq!(tcb.cwnd, 10 * MSS + 100);
    }

    #[test]
    fn leftover_acks_spill_into_avoidance() {
        // cwnd one segment below ssthresh: first ACKed segment finishes slow start
        let mut tcb = state(9, 10);
        NewReno.increase_window(&mut tcb, 2);
        assert_eq!(tcb.cwnd, 10 * MSS + 100);
    }

    #[test]
    fn ssthresh_halves_flight_with_floor() {
        let tcb = state(10, 20);
        assert_eq!(NewReno.ssthresh(&tcb, 10 * MSS), 5 * MSS);
        assert_eq!(NewReno.ssthresh(&tcb, MSS), 2 * MSS);
    }

    #[test]
    fn linux_reno_adds_segment_per_window() {
        let mut tcb = state(4, 2);
        let mut cc = LinuxReno::default();
        cc.increase_window(&mut tcb, 3);
        assert_eq!(tcb.cwnd, 4 * MSS);
        cc.increase_window(&mut tcb, 1);
        assert_eq!(tcb.cwnd, 5 * MSS);
    }
}
