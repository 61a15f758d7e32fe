pub mod ascii;
pub mod driver;
pub mod engine;
pub mod error_model;
pub mod link;
pub mod monitor;
pub mod report;
pub mod routing;
pub mod scheduler;
pub mod topology;
pub mod tracer;

pub use driver::ExperimentDriver;
pub use engine::{AppId, EngineCounters, LinkId, NodeId, Simulator};
pub use error_model::RateErrorModel;
pub use monitor::{FlowMonitor, FlowStatsAggregator, FlowStatsRecord};
pub use report::ExperimentReport;
pub use scheduler::{FlowHandle, FlowScheduler};
pub use topology::{Topology, TopologyBuilder};
pub use tracer::{MetricSample, MetricsTracer, TraceOutput};
