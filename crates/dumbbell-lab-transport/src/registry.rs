//! Symbolic names of the transport variants and the defaults every socket is built from.

use dumbbell_lab_abstract::{HarnessError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::congestion::{
    CongestionOps, HighSpeed, LinuxReno, NewReno, Scalable, Vegas, Westwood, WestwoodFlavor,
};
use crate::recovery::{ClassicRecovery, PrrRecovery, RecoveryOps};
use crate::rtt::RtoStrategy;

const NS3_PREFIX: &str = "ns3::";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Algorithm {
    #[default]
    NewReno,
    LinuxReno,
    Westwood,
    WestwoodPlus,
    Scalable,
    HighSpeed,
    Vegas,
}

impl Algorithm {
    pub const ALL: [Algorithm; 7] = [
        Algorithm::NewReno,
        Algorithm::LinuxReno,
        Algorithm::Westwood,
        Algorithm::WestwoodPlus,
        Algorithm::Scalable,
        Algorithm::HighSpeed,
        Algorithm::Vegas,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::NewReno => "TcpNewReno",
            Algorithm::LinuxReno => "TcpLinuxReno",
            Algorithm::Westwood => "TcpWestwood",
            Algorithm::WestwoodPlus => "TcpWestwoodPlus",
            Algorithm::Scalable => "TcpScalable",
            Algorithm::HighSpeed => "TcpHighSpeed",
            Algorithm::Vegas => "TcpVegas",
        }
    }

    pub fn create(&self) -> Box<dyn CongestionOps> {
        match self {
            Algorithm::NewReno => Box::new(NewReno),
            Algorithm::LinuxReno => Box::new(LinuxReno::default()),
            Algorithm::Westwood => Box::new(Westwood::new(WestwoodFlavor::Westwood)),
            Algorithm::WestwoodPlus => Box::new(Westwood::new(WestwoodFlavor::WestwoodPlus)),
            Algorithm::Scalable => Box::new(Scalable::default()),
            Algorithm::HighSpeed => Box::new(HighSpeed::default()),
            Algorithm::Vegas => Box::new(Vegas::default()),
        }
    }
}

impl FromStr for Algorithm {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        algorithm_by_name(s)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Recovery {
    #[default]
    Classic,
    Prr,
}

impl Recovery {
    pub fn name(&self) -> &'static str {
        match self {
            Recovery::Classic => "TcpClassicRecovery",
            Recovery::Prr => "TcpPrrRecovery",
        }
    }

    pub fn create(&self) -> Box<dyn RecoveryOps> {
        match self {
            Recovery::Classic => Box::new(ClassicRecovery),
            Recovery::Prr => Box::new(PrrRecovery::default()),
        }
    }
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn strip_prefix(name: &str) -> &str {
    let name = name.trim();
    name.strip_prefix(NS3_PREFIX).unwrap_or(name)
}

pub fn algorithm_by_name(name: &str) -> Result<Algorithm> {
    let bare = strip_prefix(name);
    Algorithm::ALL
        .into_iter()
        .find(|algo| algo.name() == bare)
        .ok_or_else(|| HarnessError::UnknownAlgorithm(name.to_string()))
}

pub fn recovery_by_name(name: &str) -> Result<Recovery> {
    match strip_prefix(name) {
        "TcpClassicRecovery" => Ok(Recovery::Classic),
        "TcpPrrRecovery" => Ok(Recovery::Prr),
        _ => Err(HarnessError::UnknownRecovery(name.to_string())),
    }
}

/// The transport variant chosen for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportSelection {
    pub algorithm: Algorithm,
    pub recovery: Recovery,
    /// Shared by the socket and its RTT estimator.
    pub rto_strategy: RtoStrategy,
}

/// Resolves configuration names into a [`TransportSelection`].
#[derive(Debug, Default)]
pub struct CongestionControlSelector;

impl CongestionControlSelector {
    pub fn select(&self, algorithm: &str, recovery: &str, peak_hopper: bool) -> Result<TransportSelection> {
        let selection = TransportSelection {
            algorithm: algorithm_by_name(algorithm)?,
            recovery: recovery_by_name(recovery)?,
            rto_strategy: if peak_hopper {
                RtoStrategy::PeakHopper
            } else {
                RtoStrategy::MeanDeviation
            },
        };
        info!(
            algorithm = %selection.algorithm,
            recovery = %selection.recovery,
            rto = ?selection.rto_strategy,
            "transport selected"
        );
        Ok(selection)
    }
}

/// Parameters every bulk sender and sink is created with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SocketDefaults {
    pub selection: TransportSelection,
    pub segment_size: u32,
    pub initial_cwnd_segments: u32,
    pub initial_ssthresh: u32,
    pub rcv_window: u32,
    pub initial_rto: Duration,
    pub min_rto: Duration,
}

impl Default for SocketDefaults {
    fn default() -> Self {
        Self {
            selection: TransportSelection {
                algorithm: Algorithm::default(),
                recovery: Recovery::default(),
                rto_strategy: RtoStrategy::default(),
            },
            segment_size: 536,
            initial_cwnd_segments: 10,
            initial_ssthresh: u32::MAX,
            rcv_window: 65_535,
            initial_rto: Duration::from_secs(1),
            min_rto: Duration::from_secs(1),
        }
    }
}
