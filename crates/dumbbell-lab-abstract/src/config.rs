use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{HarnessError, Result};
use crate::units::{DataRate, delay_serde};

/// Bandwidth and one-way propagation delay of a point-to-point link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkParams {
    pub bandwidth: DataRate,
    #[serde(with = "delay_serde")]
    pub delay: Duration,
}

impl LinkParams {
    pub fn new(bandwidth: DataRate, delay: Duration) -> Self {
        Self { bandwidth, delay }
    }
}

/// Everything one run of the dumbbell experiment needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Congestion control algorithm name, e.g. `TcpWestwood` (an `ns3::` prefix is tolerated).
    pub transport_prot: String,
    /// Fast recovery algorithm name, `TcpClassicRecovery` or `TcpPrrRecovery`.
    pub recovery: String,
    /// Per-packet drop probability on the bottleneck link.
    pub error_p: f64,
    pub bottleneck: LinkParams,
    /// Access links of even-indexed flows.
    pub access_even: LinkParams,
    /// Access links of odd-indexed flows.
    pub access_odd: LinkParams,
    pub num_flows: u16,
    /// Megabytes each sender transmits; 0 sends until stopped.
    pub data_mbytes: u64,
    pub mtu_bytes: u32,
    /// Simulated seconds; also the receivers' stop time.
    pub duration: f64,
    /// Start stagger in seconds: flow `i` starts at `start_time * i`.
    pub start_time: f64,
    /// Run index selecting the random stream of the error model.
    pub run: u32,
    pub tracing: bool,
    pub flow_monitor: bool,
    /// Use the PeakHopper RTO strategy instead of the mean-deviation one.
    pub peak_hopper: bool,
    pub prefix_file_name: String,
    /// Index of the flow whose socket state is traced.
    pub trace_flow: usize,
    /// Device queue limit of every link direction, in packets.
    pub queue_packets: usize,
    /// Receive window advertised by every sink, in bytes.
    pub rcv_window_bytes: u32,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            transport_prot: "TcpWestwood".to_string(),
            recovery: "TcpClassicRecovery".to_string(),
            error_p: 0.001,
            bottleneck: LinkParams::new(DataRate::from_mbps(10), Duration::from_millis(50)),
            access_even: LinkParams::new(DataRate::from_mbps(2), Duration::from_millis(175)),
            access_odd: LinkParams::new(DataRate::from_mbps(2), Duration::from_millis(85)),
            num_flows: 6,
            data_mbytes: 0,
            mtu_bytes: 400,
            duration: 20.0,
            start_time: 0.1,
            run: 0,
            tracing: true,
            flow_monitor: true,
            peak_hopper: false,
            prefix_file_name: String::new(),
            trace_flow: 0,
            queue_packets: 100,
            rcv_window_bytes: 65_535,
        }
    }
}

impl ExperimentConfig {
    /// Reject values no run could succeed with. Algorithm names are checked later,
    /// by the congestion control selector.
    pub fn validate(&self) -> Result<()> {
        if self.num_flows == 0 {
            return Err(HarnessError::NoFlows);
        }
        if !(0.0..=1.0).contains(&self.error_p) {
            return Err(HarnessError::invalid(
                "error_p",
                format!("{} is not a probability", self.error_p),
            ));
        }
        if Duration::try_from_secs_f64(self.duration).map_or(true, |d| d.is_zero()) {
            return Err(HarnessError::invalid(
                "duration",
                format!("{} is not a representable positive number of seconds", self.duration),
            ));
        }
        if Duration::try_from_secs_f64(self.start_time).is_err() {
            return Err(HarnessError::invalid(
                "start_time",
                format!("{} is not a representable non-negative number of seconds", self.start_time),
            ));
        }
        if self.queue_packets == 0 {
            return Err(HarnessError::invalid("queue_packets", "must hold at least one packet"));
        }
        if self.rcv_window_bytes == 0 {
            return Err(HarnessError::invalid("rcv_window_bytes", "must be positive"));
        }
        Ok(())
    }

    /// Saturates on values `validate` rejects.
    pub fn stop_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration).unwrap_or(Duration::MAX)
    }

    pub fn start_stagger(&self) -> Duration {
        Duration::try_from_secs_f64(self.start_time).unwrap_or(Duration::MAX)
    }

    pub fn payload_bytes(&self) -> u64 {
        self.data_mbytes.saturating_mul(1_000_000)
    }
}

/// Partial configuration read from a TOML file; unset fields keep their current value.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ExperimentOverride {
    pub transport_prot: Option<String>,
    pub recovery: Option<String>,
    pub error_p: Option<f64>,
    pub bottleneck: Option<LinkParams>,
    pub access_even: Option<LinkParams>,
    pub access_odd: Option<LinkParams>,
    pub num_flows: Option<u16>,
    pub data_mbytes: Option<u64>,
    pub mtu_bytes: Option<u32>,
    pub duration: Option<f64>,
    pub start_time: Option<f64>,
    pub run: Option<u32>,
    pub tracing: Option<bool>,
    pub flow_monitor: Option<bool>,
    pub peak_hopper: Option<bool>,
    pub prefix_file_name: Option<String>,
    pub trace_flow: Option<usize>,
    pub queue_packets: Option<usize>,
    pub rcv_window_bytes: Option<u32>,
}

impl ExperimentOverride {
    pub fn apply_to(&self, config: &mut ExperimentConfig) {
        if let Some(v) = &self.transport_prot {
            config.transport_prot = v.clone();
        }
        if let Some(v) = &self.recovery {
            config.recovery = v.clone();
        }
        if let Some(v) = self.error_p {
            config.error_p = v;
        }
        if let Some(v) = self.bottleneck {
            config.bottleneck = v;
        }
        if let Some(v) = self.access_even {
            config.access_even = v;
        }
        if let Some(v) = self.access_odd {
            config.access_odd = v;
        }
        if let Some(v) = self.num_flows {
            config.num_flows = v;
        }
        if let Some(v) = self.data_mbytes {
            config.data_mbytes = v;
        }
        if let Some(v) = self.mtu_bytes {
            config.mtu_bytes = v;
        }
        if let Some(v) = self.duration {
            config.duration = v;
        }
        if let Some(v) = self.start_time {
            config.start_time = v;
        }
        if let Some(v) = self.run {
            config.run = v;
        }
        if let Some(v) = self.tracing {
            config.tracing = v;
        }
        if let Some(v) = self.flow_monitor {
            config.flow_monitor = v;
        }
        if let Some(v) = self.peak_hopper {
            config.peak_hopper = v;
        }
        if let Some(v) = &self.prefix_file_name {
            config.prefix_file_name = v.clone();
        }
        if let Some(v) = self.trace_flow {
            config.trace_flow = v;
        }
        if let Some(v) = self.queue_packets {
            config.queue_packets = v;
        }
        if let Some(v) = self.rcv_window_bytes {
            config.rcv_window_bytes = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_experiment() {
        let config = ExperimentConfig::default();
        assert_eq!(config.num_flows, 6);
        assert_eq!(config.bottleneck.bandwidth, DataRate::from_mbps(10));
        assert_eq!(config.access_even.delay, Duration::from_millis(175));
        assert_eq!(config.access_odd.delay, Duration::from_millis(85));
        assert_eq!(config.stop_time(), Duration::from_secs(20));
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_unrepresentable_times() {
        for duration in [1e20, f64::NAN, f64::INFINITY, 0.0, -1.0] {
            let config = ExperimentConfig {
                duration,
                ..Default::default()
            };
            assert!(
                matches!(
                    config.validate(),
                    Err(HarnessError::InvalidParameter { field: "duration", .. })
                ),
                "duration {duration} accepted"
            );
        }
        for start_time in [1e20, f64::NAN, -0.5] {
            let config = ExperimentConfig {
                start_time,
                ..Default::default()
            };
            assert!(
                matches!(
                    config.validate(),
                    Err(HarnessError::InvalidParameter { field: "start_time", .. })
                ),
                "start_time {start_time} accepted"
            );
        }
        let config = ExperimentConfig {
            start_time: 0.0,
            ..Default::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_zero_flows_and_bad_probability() {
        let config = ExperimentConfig {
            num_flows: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HarnessError::NoFlows)));

        let config = ExperimentConfig {
            error_p: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(HarnessError::InvalidParameter { field: "error_p", .. })
        ));
    }

    #[test]
    fn toml_override_applies_only_set_fields() {
        let raw = r#"
            transport_prot = "TcpNewReno"
            num_flows = 2
            error_p = 0.0

            [bottleneck]
            bandwidth = "20Mbps"
            delay = "10ms"
        "#;
        let over: ExperimentOverride = toml::from_str(raw).unwrap();
        let mut config = ExperimentConfig::default();
        over.apply_to(&mut config);

        assert_eq!(config.transport_prot, "TcpNewReno");
        assert_eq!(config.num_flows, 2);
        assert_eq!(config.error_p, 0.0);
        assert_eq!(config.bottleneck.bandwidth, DataRate::from_mbps(20));
        assert_eq!(config.bottleneck.delay, Duration::from_millis(10));
        // untouched
        assert_eq!(config.mtu_bytes, 400);
        assert_eq!(config.access_odd.delay, Duration::from_millis(85));
    }

    #[test]
    fn toml_override_rejects_malformed_rate() {
        let raw = r#"
            [access_even]
            bandwidth = "lots"
            delay = "10ms"
        "#;
        assert!(toml::from_str::<ExperimentOverride>(raw).is_err());
    }
}
