//! One complete dumbbell experiment, from configuration to report.

use dumbbell_lab_abstract::packet::segment_size_for_mtu;
use dumbbell_lab_abstract::{ExperimentConfig, HarnessError, Metric, Result};
use dumbbell_lab_transport::CongestionControlSelector;
use std::path::PathBuf;
use tracing::info;

use crate::ascii::AsciiTrace;
use crate::engine::Simulator;
use crate::error_model::RateErrorModel;
use crate::report::ExperimentReport;
use crate::scheduler::FlowScheduler;
use crate::topology::TopologyBuilder;
use crate::tracer::{MetricsTracer, TraceOutput};

pub struct ExperimentDriver {
    config: ExperimentConfig,
    trace_output: Option<TraceOutput>,
}

impl ExperimentDriver {
    pub fn new(config: ExperimentConfig) -> Self {
        Self {
            config,
            trace_output: None,
        }
    }

    /// Override where traces go. By default they are files named after the
    /// configured prefix.
    pub fn with_trace_output(mut self, output: TraceOutput) -> Self {
        self.trace_output = Some(output);
        self
    }

    fn trace_output(&self) -> TraceOutput {
        self.trace_output.clone().unwrap_or_else(|| TraceOutput::Files {
            prefix: self.config.prefix_file_name.clone(),
        })
    }

    pub fn run(&self) -> Result<ExperimentReport> {
        let config = &self.config;
        config.validate()?;

        let selection = CongestionControlSelector.select(
            &config.transport_prot,
            &config.recovery,
            config.peak_hopper,
        )?;
        let segment_size = segment_size_for_mtu(config.mtu_bytes).ok_or_else(|| {
            HarnessError::invalid(
                "mtu_bytes",
                format!("{} leaves no room for a payload", config.mtu_bytes),
            )
        })?;

        let mut sim = Simulator::new();
        sim.select_transport(selection)?;
        sim.set_receive_window(config.rcv_window_bytes)?;

        let topology = TopologyBuilder::new(config.bottleneck, config.access_even, config.access_odd)
            .queue_limit(config.queue_packets)
            .error_model(RateErrorModel::new(config.error_p, config.run)?)
            .build(&mut sim, usize::from(config.num_flows))?;

        let payload = config.payload_bytes();
        let scheduler = FlowScheduler {
            start_stagger: config.start_stagger(),
            stop_time: config.stop_time(),
            payload_bytes: (payload > 0).then_some(payload),
            segment_size,
        };
        let flows = scheduler.schedule(&mut sim, &topology)?;

        if config.tracing {
            let output = self.trace_output();
            let tracer = MetricsTracer::arm(&flows, config.trace_flow, &Metric::ALL, &output)?;
            sim.attach_tracer(tracer)?;
            if let TraceOutput::Files { prefix } = &output {
                let path = PathBuf::from(format!("{prefix}-ascii"));
                sim.enable_ascii(AsciiTrace::create(&path)?);
            }
        }
        if config.flow_monitor {
            sim.enable_flow_monitor();
        }

        sim.stop(config.stop_time());
        info!(
            algorithm = %selection.algorithm,
            flows = flows.len(),
            segment_size,
            stop = config.duration,
            "running experiment"
        );
        sim.run();
        sim.finish()?;

        Ok(ExperimentReport::collect(&sim, config.clone(), selection, flows))
    }
}
