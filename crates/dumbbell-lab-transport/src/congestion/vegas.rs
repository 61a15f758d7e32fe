use std::time::Duration;

use super::newreno::{NewReno, slow_start};
use super::{CongestionOps, CongestionState, TcpState};

const ALPHA: u32 = 2;
const BETA: u32 = 4;
const GAMMA: u32 = 1;

/// Delay-based Vegas: once per RTT compare the expected and actual rate and
/// steer the window to keep between `ALPHA` and `BETA` segments queued.
#[derive(Debug)]
pub struct Vegas {
    base_rtt: Duration,
    min_rtt: Duration,
    cnt_rtt: u32,
    doing_vegas_now: bool,
    beg_snd_nxt: u64,
}

impl Default for Vegas {
    fn default() -> Self {
        Self {
            base_rtt: Duration::MAX,
            min_rtt: Duration::MAX,
            cnt_rtt: 0,
            doing_vegas_now: true,
            beg_snd_nxt: 0,
        }
    }
}

impl Vegas {
    fn reduced_ssthresh(tcb: &TcpState) -> u32 {
        tcb.ssthresh
            .min(tcb.cwnd.saturating_sub(tcb.segment_size))
            .max(2 * tcb.segment_size)
    }
}

impl CongestionOps for Vegas {
    fn name(&self) -> &'static str {
        "TcpVegas"
    }

    fn pkts_acked(&mut self, _tcb: &TcpState, _segments_acked: u32, rtt: Option<Duration>) {
        let Some(rtt) = rtt else {
            return;
        };
        self.base_rtt = self.base_rtt.min(rtt);
        self.min_rtt = self.min_rtt.min(rtt);
        self.cnt_rtt += 1;
    }

    fn congestion_state_set(&mut self, tcb: &TcpState, new_state: CongestionState) {
        if new_state == CongestionState::Open {
            self.doing_vegas_now = true;
            self.beg_snd_nxt = tcb.snd_nxt;
            self.cnt_rtt = 0;
            self.min_rtt = Duration::MAX;
        } else {
            self.doing_vegas_now = false;
        }
    }

    fn increase_window(&mut self, tcb: &mut TcpState, segments_acked: u32) {
        if !self.doing_vegas_now {
            NewReno::grow(tcb, segments_acked);
            return;
        }

        if tcb.snd_una >= self.beg_snd_nxt {
            // A full RTT has elapsed since the last adjustment.
            self.beg_snd_nxt = tcb.snd_nxt;

            if self.cnt_rtt <= 2 {
                NewReno::grow(tcb, segments_acked);
            } else {
                let mut segments = tcb.cwnd_segments();
                let target = (segments as f64 * self.base_rtt.as_secs_f64()
                    / self.min_rtt.as_secs_f64()) as u32;
                let diff = segments.saturating_sub(target);

                if diff > GAMMA && tcb.in_slow_start() {
                    segments = segments.min(target + 1);
                    tcb.cwnd = segments * tcb.segment_size;
                    tcb.ssthresh = Self::reduced_ssthresh(tcb);
                } else if tcb.in_slow_start() {
                    slow_start(tcb, segments_acked);
                } else {
                    if diff > BETA {
                        segments = segments.saturating_sub(1).max(2);
                        tcb.ssthresh = Self::reduced_ssthresh(tcb);
                    } else if diff < ALPHA {
                        segments += 1;
                    }
                    tcb.cwnd = segments * tcb.segment_size;
                }
                tcb.ssthresh = tcb.ssthresh.max(3 * (tcb.cwnd / 4));
            }

            self.cnt_rtt = 0;
            self.min_rtt = Duration::MAX;
        } else if tcb.in_slow_start() {
            slow_start(tcb, segments_acked);
        }
    }

    fn ssthresh(&mut self, tcb: &TcpState, _bytes_in_flight: u32) -> u32 {
        Self::reduced_ssthresh(tcb)
    }
}
