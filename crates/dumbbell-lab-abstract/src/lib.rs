pub mod config;
pub mod error;
pub mod interface;
pub mod metric;
pub mod packet;
pub mod units;

pub use interface::{Application, ApplicationReport, SystemContext};
pub use packet::{FiveTuple, Packet, TcpHeader};
// Re-export flags module from packet so users can access TcpHeader flags
pub use packet::flags;

pub use config::{ExperimentConfig, ExperimentOverride, LinkParams};
pub use error::{ErrorKind, HarnessError, Result};
pub use metric::{Metric, MetricMap};
pub use units::DataRate;
