use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Every failure the harness can report. All of them are setup-time faults:
/// a simulated run is deterministic given its seed, so nothing is retried.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("num_flows must be at least 1")]
    NoFlows,

    #[error("unknown congestion control algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("unknown recovery algorithm '{0}'")]
    UnknownRecovery(String),

    #[error("malformed {field}: '{value}'")]
    Malformed { field: &'static str, value: String },

    #[error("invalid {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("address space exhausted: cannot allocate more than {blocks} /16 blocks")]
    AddressExhausted { blocks: usize },

    #[error("trace target flow {flow} does not resolve to a live socket")]
    TraceTargetMissing { flow: usize },

    #[error("socket defaults can only be changed before the first socket is created")]
    DefaultsLocked,

    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Coarse classification used by callers that only care about the family of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ResourceExhaustion,
    TraceTargetMissing,
    Io,
}

impl HarnessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarnessError::NoFlows
            | HarnessError::UnknownAlgorithm(_)
            | HarnessError::UnknownRecovery(_)
            | HarnessError::Malformed { .. }
            | HarnessError::InvalidParameter { .. }
            | HarnessError::DefaultsLocked => ErrorKind::Configuration,
            HarnessError::AddressExhausted { .. } => ErrorKind::ResourceExhaustion,
            HarnessError::TraceTargetMissing { .. } => ErrorKind::TraceTargetMissing,
            HarnessError::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        HarnessError::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }
}
