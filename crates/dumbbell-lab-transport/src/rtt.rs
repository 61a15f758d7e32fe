use serde::Serialize;
use std::time::Duration;

/// Upper bound on the retransmission timeout.
pub const MAX_RTO: Duration = Duration::from_secs(60);
/// Clock granularity `G` of the mean-deviation formula.
pub const CLOCK_GRANULARITY: Duration = Duration::from_millis(1);

/// How the retransmission timeout is derived from RTT samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RtoStrategy {
    /// Jacobson/Karels: `srtt + max(G, 4 * rttvar)`.
    #[default]
    MeanDeviation,
    /// Jump to RTT peaks, then decay towards the current sample.
    PeakHopper,
}

/// Smoothed RTT and retransmission timeout of one connection.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    strategy: RtoStrategy,
    min_rto: Duration,
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    last_sample: Option<Duration>,
    /// PeakHopper's decaying spike factor.
    delta: f64,
    samples: u64,
}

impl RttEstimator {
    pub fn new(strategy: RtoStrategy, initial_rto: Duration, min_rto: Duration) -> Self {
        Self {
            strategy,
            min_rto,
            srtt: None,
            rttvar: Duration::ZERO,
            rto: initial_rto.clamp(min_rto, MAX_RTO),
            last_sample: None,
            delta: 0.0,
            samples: 0,
        }
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Feed one RTT measurement. Callers apply Karn's rule and never pass samples
    /// taken from retransmitted segments.
    pub fn sample(&mut self, rtt: Duration) {
        self.samples += 1;
        match self.srtt {
            None => {
                self.srtt = Some(rtt);
                self.rttvar = rtt / 2;
            }
            Some(srtt) => {
                let err = if srtt > rtt { srtt - rtt } else { rtt - srtt };
                self.rttvar = self.rttvar.mul_f64(0.75) + err.mul_f64(0.25);
                self.srtt = Some(srtt.mul_f64(0.875) + rtt.mul_f64(0.125));
            }
        }

        self.rto = match self.strategy {
            RtoStrategy::MeanDeviation => self.mean_deviation_rto(),
            RtoStrategy::PeakHopper => self.peak_hopper_rto(rtt),
        }
        .clamp(self.min_rto, MAX_RTO);
        self.last_sample = Some(rtt);
    }

    /// Double the timeout after an expiry.
    pub fn backoff(&mut self) {
        self.rto = (self.rto * 2).min(MAX_RTO);
    }

    fn mean_deviation_rto(&self) -> Duration {
        let srtt = self.srtt.unwrap_or_default();
        srtt + (self.rttvar * 4).max(CLOCK_GRANULARITY)
    }

    fn peak_hopper_rto(&mut self, rtt: Duration) -> Duration {
        let spike = match self.last_sample {
            Some(prev) if !prev.is_zero() => {
                let change = (rtt.as_secs_f64() - prev.as_secs_f64()).abs() / prev.as_secs_f64();
                change.clamp(0.0, 1.0)
            }
            _ => 0.0,
        };
        self.delta = spike.max(self.delta * 7.0 / 8.0);

        let target = rtt.mul_f64(1.0 + self.delta).max(self.min_rto);
        if target > self.rto {
            target
        } else {
            self.rto - (self.rto - target) / 8
        }
    }
}
