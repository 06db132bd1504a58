use std::fmt;

use thiserror::Error;

use crate::monitoring::Metric;

/// The remote system an operation was talking to when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    Monitoring,
    Cluster,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::Monitoring => f.write_str("monitoring API"),
            Upstream::Cluster => f.write_str("cluster API"),
        }
    }
}

/// Everything that can go wrong during one scaling cycle.
///
/// Only `UpdateRejected` is recoverable: the capacity updater turns it into
/// an `UpdateOutcome::Rejected` instead of failing the run.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("monitoring API rejected credentials while fetching {metric} for {lb_id}: {body}")]
    Authentication {
        metric: Metric,
        lb_id: String,
        body: String,
    },

    #[error("monitoring API returned {status} while fetching {metric} for {lb_id}: {body}")]
    UnexpectedStatus {
        metric: Metric,
        lb_id: String,
        status: u16,
        body: String,
    },

    #[error("malformed {metric} response for {lb_id}: {reason}")]
    MalformedResponse {
        metric: Metric,
        lb_id: String,
        reason: String,
    },

    #[error("transport failure reaching {upstream} for {target}: {message}")]
    Transport {
        upstream: Upstream,
        target: String,
        message: String,
    },

    #[error("not found in cluster: {0}")]
    ResourceNotFound(String),

    #[error("cluster API refused to read service {namespace}/{name} ({status}): {message}")]
    ClusterRead {
        name: String,
        namespace: String,
        status: u16,
        message: String,
    },

    #[error("cluster API rejected update of service {namespace}/{name} ({status}): {message}")]
    UpdateRejected {
        name: String,
        namespace: String,
        status: u16,
        message: String,
    },

    #[error("cannot compute utilization for {lb_id}: connections {connections} / limit {limit}")]
    Computation {
        lb_id: String,
        connections: f64,
        limit: f64,
    },
}

impl ScaleError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScaleError::UpdateRejected { .. })
    }
}

pub type Result<T> = std::result::Result<T, ScaleError>;
