pub mod congestion;
pub mod recovery;
pub mod registry;
pub mod rtt;
pub mod sink;
pub mod socket;

pub use congestion::{CongestionOps, CongestionState, TcpState};
pub use recovery::{ClassicRecovery, PrrRecovery, RecoveryOps};
pub use registry::{
    Algorithm, CongestionControlSelector, Recovery, SocketDefaults, TransportSelection,
    algorithm_by_name, recovery_by_name,
};
pub use rtt::{RtoStrategy, RttEstimator};
pub use sink::PacketSink;
pub use socket::TcpBulkSender;
