use dumbbell_lab_abstract::{HarnessError, Packet, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seed shared by every run; the run index selects the stream.
pub const ERROR_MODEL_SEED: u32 = 1;

/// Drops each packet independently with probability `rate`.
#[derive(Debug, Clone)]
pub struct RateErrorModel {
    rate: f64,
    rng: StdRng,
}

impl RateErrorModel {
    pub fn new(rate: f64, run: u32) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(HarnessError::invalid(
                "error_p",
                format!("{rate} is not a probability"),
            ));
        }
        let stream = ((ERROR_MODEL_SEED as u64) << 32) | run as u64;
        Ok(Self {
            rate,
            rng: StdRng::seed_from_u64(stream),
        })
    }

    /// One draw per packet traversal, whatever its size.
    pub fn should_drop(&mut self, _packet: &Packet) -> bool {
        self.rng.random::<f64>() < self.rate
    }
}
