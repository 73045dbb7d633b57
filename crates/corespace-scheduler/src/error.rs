//! Scheduler error types.

use std::fmt;

use thiserror::Error;

use corespace_state::{RequestId, ResourceKind, StateError};

use crate::probe::ProbeError;

/// Why capacity-based admission found no host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoValidHostReason {
    /// Cluster-wide committed disk would exceed shared-storage capacity.
    InsufficientSpace { required_gb: u64, available_gb: i64 },
    /// The first candidate in load order was already over its ceiling.
    OverCeiling { kind: ResourceKind },
    /// Another admission claimed the chosen host's room first.
    Contended { host: String },
    /// The candidate list ran out without a live host.
    NoLiveHost,
}

impl fmt::Display for NoValidHostReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientSpace {
                required_gb,
                available_gb,
            } => write!(
                f,
                "not enough space: {required_gb}GB committed, {available_gb}GB available"
            ),
            Self::OverCeiling { kind } => match kind {
                ResourceKind::Compute => f.write_str("all hosts have too many cores"),
                ResourceKind::Volume => f.write_str("all hosts have too many gigabytes"),
                ResourceKind::Network => f.write_str("all hosts have too many networks"),
            },
            Self::Contended { host } => {
                write!(f, "host {host} was claimed by a concurrent placement")
            }
            Self::NoLiveHost => f.write_str(
                "unable to locate a host for this request; is the appropriate service running?",
            ),
        }
    }
}

/// Errors that can occur while scheduling a request.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("will not schedule: host {host} is not alive")]
    WillNotSchedule { host: String },

    #[error("no valid host: {0}")]
    NoValidHost(NoValidHostReason),

    #[error("{kind} request not found: {id}")]
    RequestNotFound { kind: ResourceKind, id: RequestId },

    #[error("registry error: {0}")]
    Registry(#[from] StateError),

    #[error("capacity probe error: {0}")]
    Probe(#[from] ProbeError),
}

impl SchedulerError {
    /// The rejection class reported to the caller.
    pub fn reason_class(&self) -> &'static str {
        match self {
            Self::WillNotSchedule { .. } => "will_not_schedule",
            Self::NoValidHost(_) => "no_valid_host",
            Self::RequestNotFound { .. } | Self::Registry(_) | Self::Probe(_) => "infrastructure",
        }
    }

    /// Whether the failure came from the registry or the probe rather than
    /// from an admission decision.
    pub fn is_infrastructure(&self) -> bool {
        self.reason_class() == "infrastructure"
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
