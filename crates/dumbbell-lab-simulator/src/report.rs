use dumbbell_lab_abstract::units::delay_serde;
use dumbbell_lab_abstract::{ApplicationReport, DataRate, ExperimentConfig, Metric};
use dumbbell_lab_transport::TransportSelection;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::engine::{AppId, EngineCounters, LinkId, NodeId, Simulator};
use crate::link::{ChannelStats, Side};
use crate::monitor::{FlowStatsAggregator, FlowStatsRecord};
use crate::scheduler::FlowHandle;
use crate::tracer::MetricSample;

#[derive(Debug, Clone, Serialize)]
pub struct TraceSeries {
    pub metric: Metric,
    pub recorded: u64,
    /// Empty when the series was written to a file.
    pub samples: Vec<MetricSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkSummary {
    pub id: LinkId,
    pub endpoints: [NodeId; 2],
    pub subnet: String,
    pub bandwidth: DataRate,
    #[serde(with = "delay_serde")]
    pub delay: Duration,
    /// Traffic leaving side A.
    pub forward: ChannelStats,
    /// Traffic leaving side B.
    pub reverse: ChannelStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppSummary {
    pub flow: usize,
    pub app: AppId,
    pub node: NodeId,
    #[serde(flatten)]
    pub report: ApplicationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub config: ExperimentConfig,
    pub transport: TransportSelection,
    pub segment_size: u32,
    pub final_time: Duration,
    pub counters: EngineCounters,
    pub flows: Vec<FlowHandle>,
    /// Empty when the flow monitor was off.
    pub flow_stats: BTreeMap<u32, FlowStatsRecord>,
    pub applications: Vec<AppSummary>,
    /// Empty when tracing was off.
    pub traces: Vec<TraceSeries>,
    pub links: Vec<LinkSummary>,
}

impl ExperimentReport {
    /// Snapshot a halted simulator.
    pub fn collect(
        sim: &Simulator,
        config: ExperimentConfig,
        transport: TransportSelection,
        flows: Vec<FlowHandle>,
    ) -> Self {
        let flow_stats = sim
            .flow_monitor()
            .map(FlowStatsAggregator::aggregate)
            .unwrap_or_default();

        let traces = sim
            .tracer()
            .map(|tracer| {
                tracer
                    .iter()
                    .map(|(metric, series)| TraceSeries {
                        metric,
                        recorded: series.recorded(),
                        samples: series.samples().to_vec(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut applications = Vec::with_capacity(flows.len() * 2);
        for flow in &flows {
            for app in [flow.sender, flow.receiver] {
                if let (Some(report), Some(node)) = (sim.app_report(app), sim.app_node(app)) {
                    applications.push(AppSummary {
                        flow: flow.index,
                        app,
                        node,
                        report,
                    });
                }
            }
        }

        let links = sim
            .links()
            .iter()
            .map(|link| LinkSummary {
                id: link.id,
                endpoints: link.endpoints,
                subnet: link.block.to_string(),
                bandwidth: link.params.bandwidth,
                delay: link.params.delay,
                forward: link.channel(Side::A).stats(),
                reverse: link.channel(Side::B).stats(),
            })
            .collect();

        Self {
            config,
            transport,
            segment_size: sim.socket_defaults().segment_size,
            final_time: sim.now(),
            counters: sim.counters(),
            flows,
            flow_stats,
            applications,
            traces,
            links,
        }
    }

    /// The text block printed after a run, one section per monitored flow.
    pub fn render_flow_stats(&self) -> String {
        FlowStatsAggregator::render(&self.flow_stats)
    }

    pub fn trace(&self, metric: Metric) -> Option<&TraceSeries> {
        self.traces.iter().find(|t| t.metric == metric)
    }

    pub fn sender_report(&self, flow: usize) -> Option<&ApplicationReport> {
        let handle = self.flows.get(flow)?;
        self.applications
            .iter()
            .find(|a| a.app == handle.sender)
            .map(|a| &a.report)
    }

    pub fn receiver_report(&self, flow: usize) -> Option<&ApplicationReport> {
        let handle = self.flows.get(flow)?;
        self.applications
            .iter()
            .find(|a| a.app == handle.receiver)
            .map(|a| &a.report)
    }

    pub fn total_lost_packets(&self) -> u64 {
        self.flow_stats.values().map(|r| r.lost_packets).sum()
    }
}
