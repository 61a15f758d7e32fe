use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dumbbell_lab_abstract::units::parse_delay;
use dumbbell_lab_abstract::{DataRate, ExperimentConfig, ExperimentOverride};
use dumbbell_lab_simulator::{ExperimentDriver, ExperimentReport};

/// Flags left unset keep the value from `--config` (or the built-in default).
#[derive(Parser, Debug)]
#[command(author, version, about = "Dumbbell congestion-control experiment")]
struct Args {
    /// TOML file with experiment settings, applied before the flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Congestion control: TcpNewReno, TcpLinuxReno, TcpHighSpeed, TcpVegas,
    /// TcpScalable, TcpWestwood or TcpWestwoodPlus.
    #[arg(long)]
    transport_prot: Option<String>,

    /// Packet error rate of the bottleneck.
    #[arg(long)]
    error_p: Option<f64>,

    /// Bottleneck bandwidth.
    #[arg(long)]
    bandwidth: Option<DataRate>,
    /// Bottleneck delay.
    #[arg(long)]
    delay: Option<String>,

    /// Access link bandwidth of even flows.
    #[arg(long)]
    access_bandwidth: Option<DataRate>,
    /// Access link delay of even flows.
    #[arg(long)]
    access_delay: Option<String>,
    /// Access link bandwidth of odd flows.
    #[arg(long)]
    access_bandwidth2: Option<DataRate>,
    /// Access link delay of odd flows.
    #[arg(long)]
    access_delay2: Option<String>,

    /// Write traced socket state to files.
    #[arg(long)]
    tracing: Option<bool>,

    /// Use the PeakHopper RTO strategy.
    #[arg(long)]
    peak_hopper: Option<bool>,

    /// Prefix of the output trace file names.
    #[arg(long)]
    prefix_name: Option<String>,

    /// Megabytes each flow sends (0 = unlimited).
    #[arg(long)]
    data: Option<u64>,

    /// Size of the IP packets to send, in bytes.
    #[arg(long)]
    mtu: Option<u32>,

    #[arg(long)]
    num_flows: Option<u16>,

    /// Simulated seconds.
    #[arg(long)]
    duration: Option<f64>,

    /// Run index, selects the random stream of the error model.
    #[arg(long)]
    run: Option<u32>,

    /// Collect and print per-flow statistics.
    #[arg(long)]
    flow_monitor: Option<bool>,

    /// TcpClassicRecovery or TcpPrrRecovery.
    #[arg(long)]
    recovery: Option<String>,

    /// Device queue limit, in packets.
    #[arg(long)]
    queue_packets: Option<usize>,

    /// Index of the flow whose socket state is traced.
    #[arg(long)]
    trace_flow: Option<usize>,

    /// Write the full report as JSON.
    #[arg(long)]
    report_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    info!("dumbbell-lab starting…");

    let config = args.build_config()?;
    let report = ExperimentDriver::new(config)
        .run()
        .context("Experiment failed")?;

    print!("{}", report.render_flow_stats());

    if let Some(path) = &args.report_out {
        write_report(path, &report)?;
    }
    Ok(())
}

fn init_logging() {
    // Logs go to stderr; stdout carries the flow report.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl Args {
    fn build_config(&self) -> Result<ExperimentConfig> {
        let mut config = ExperimentConfig::default();
        if let Some(path) = &self.config {
            load_override(path)?.apply_to(&mut config);
        }

        if let Some(v) = &self.transport_prot {
            config.transport_prot = v.clone();
        }
        if let Some(v) = &self.recovery {
            config.recovery = v.clone();
        }
        if let Some(v) = self.error_p {
            config.error_p = v;
        }
        if let Some(v) = self.bandwidth {
            config.bottleneck.bandwidth = v;
        }
        if let Some(v) = &self.delay {
            config.bottleneck.delay = parse_delay(v).context("--delay")?;
        }
        if let Some(v) = self.access_bandwidth {
            config.access_even.bandwidth = v;
        }
        if let Some(v) = &self.access_delay {
            config.access_even.delay = parse_delay(v).context("--access-delay")?;
        }
        if let Some(v) = self.access_bandwidth2 {
            config.access_odd.bandwidth = v;
        }
        if let Some(v) = &self.access_delay2 {
            config.access_odd.delay = parse_delay(v).context("--access-delay2")?;
        }
        if let Some(v) = self.tracing {
            config.tracing = v;
        }
        if let Some(v) = self.peak_hopper {
            config.peak_hopper = v;
        }
        if let Some(v) = &self.prefix_name {
            config.prefix_file_name = v.clone();
        }
        if let Some(v) = self.data {
            config.data_mbytes = v;
        }
        if let Some(v) = self.mtu {
            config.mtu_bytes = v;
        }
        if let Some(v) = self.num_flows {
            config.num_flows = v;
        }
        if let Some(v) = self.duration {
            config.duration = v;
        }
        if let Some(v) = self.run {
            config.run = v;
        }
        if let Some(v) = self.flow_monitor {
            config.flow_monitor = v;
        }
        if let Some(v) = self.queue_packets {
            config.queue_packets = v;
        }
        if let Some(v) = self.trace_flow {
            config.trace_flow = v;
        }
        Ok(config)
    }
}

fn load_override(path: &Path) -> Result<ExperimentOverride> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let over: ExperimentOverride =
        toml::from_str(&content).context("Failed to parse config file")?;
    Ok(over)
}

fn write_report(path: &Path, report: &ExperimentReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize experiment report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write report file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "dumbbell-lab",
            "--transport-prot",
            "TcpHighSpeed",
            "--bandwidth",
            "20Mbps",
            "--access-delay2",
            "40ms",
            "--num-flows",
            "2",
            "--tracing",
            "false",
        ]);
        let config = args.build_config().unwrap();
        assert_eq!(config.transport_prot, "TcpHighSpeed");
        assert_eq!(config.bottleneck.bandwidth, DataRate::from_mbps(20));
        assert_eq!(config.access_odd.delay, Duration::from_millis(40));
        assert_eq!(config.num_flows, 2);
        assert!(!config.tracing);
        assert_eq!(config.mtu_bytes, 400);
    }

    #[test]
    fn malformed_delay_is_rejected() {
        let args = Args::parse_from(["dumbbell-lab", "--delay", "soon"]);
        assert!(args.build_config().is_err());
    }

    #[test]
    fn malformed_rate_fails_to_parse() {
        assert!(Args::try_parse_from(["dumbbell-lab", "--bandwidth", "fast"]).is_err());
    }
}
