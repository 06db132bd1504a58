use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join;
use log::info;
use tokio::time::{Instant, timeout_at};

use crate::config::{ScaleConfig, ScaleTarget};
use crate::error::{Result, ScaleError, Upstream};
use crate::kubernetes::models::UpdateOutcome;
use crate::kubernetes::updater::CapacityUpdater;
use crate::monitoring::{Metric, MetricSample, MetricsSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    ScaleUp { size: u32 },
    ScaleDown { size: u32 },
}

impl Decision {
    pub fn size(&self) -> u32 {
        match self {
            Decision::ScaleUp { size } | Decision::ScaleDown { size } => *size,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::ScaleUp { size } => write!(f, "Alert! Need up to {size}"),
            Decision::ScaleDown { size } => write!(f, "Relax. Size down to {size}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub timestamp: f64,
    pub limit: f64,
    pub connections: f64,
    pub ratio: f64,
    pub decision: Decision,
    pub update: UpdateOutcome,
}

/// `connections / limit`. A zero limit has no meaningful ratio and must not
/// turn into a scale-down.
pub fn utilization(lb_id: &str, limit: f64, connections: f64) -> Result<f64> {
    let ratio = connections / limit;
    if limit == 0.0 || !ratio.is_finite() {
        return Err(ScaleError::Computation {
            lb_id: lb_id.to_string(),
            connections,
            limit,
        });
    }
    Ok(ratio)
}

/// Strictly above the threshold scales up; equal or below scales down.
///
/// `alert_percent` is compared against the raw ratio as configured, so the
/// default of 80 only triggers when connections exceed 80x the limit.
pub fn decide(ratio: f64, config: &ScaleConfig) -> Decision {
    if ratio > config.alert_percent {
        Decision::ScaleUp {
            size: config.max_size_unit,
        }
    } else {
        Decision::ScaleDown {
            size: config.min_size_unit,
        }
    }
}

fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One fetch-decide-apply cycle for a single load balancer / Service pair.
pub struct ScaleController {
    metrics: Arc<dyn MetricsSource>,
    updater: CapacityUpdater,
    run_timeout: Duration,
}

impl ScaleController {
    pub fn new(metrics: Arc<dyn MetricsSource>, updater: CapacityUpdater, run_timeout: Duration) -> Self {
        ScaleController {
            metrics,
            updater,
            run_timeout,
        }
    }

    pub async fn run(&self, config: &ScaleConfig, target: &ScaleTarget) -> Result<RunOutcome> {
        let deadline = Instant::now().checked_add(self.run_timeout).ok_or_else(|| {
            ScaleError::Configuration(format!("run timeout {:?} is out of range", self.run_timeout))
        })?;
        let timestamp = now_timestamp();

        let (limit, connections) = timeout_at(deadline, self.fetch_pair(&target.lb_id, timestamp))
            .await
            .map_err(|_| self.timed_out(Upstream::Monitoring, format!("load balancer {}", target.lb_id)))??;

        let ratio = utilization(&target.lb_id, limit.value, connections.value)?;
        info!(
            target: "scale_controller",
            "Load balancer {}: {} connections of {} allowed (ratio {:.4}, alert above {})",
            target.lb_id, connections.value, limit.value, ratio, config.alert_percent
        );

        let decision = decide(ratio, config);
        info!(target: "scale_controller", "{}", decision);

        let update = timeout_at(
            deadline,
            self.updater
                .set_capacity_unit(&target.service_name, &target.namespace, decision.size()),
        )
        .await
        .map_err(|_| {
            self.timed_out(
                Upstream::Cluster,
                format!("service {}/{}", target.namespace, target.service_name),
            )
        })??;

        Ok(RunOutcome {
            timestamp,
            limit: limit.value,
            connections: connections.value,
            ratio,
            decision,
            update,
        })
    }

    /// Both samples for the same instant, or the first error. A failure drops
    /// the other request without waiting for it.
    async fn fetch_pair(&self, lb_id: &str, timestamp: f64) -> Result<(MetricSample, MetricSample)> {
        try_join(
            self.metrics.fetch(Metric::ConnectionsLimit, lb_id, timestamp),
            self.metrics.fetch(Metric::ConnectionsCurrent, lb_id, timestamp),
        )
        .await
    }

    fn timed_out(&self, upstream: Upstream, target: String) -> ScaleError {
        ScaleError::Transport {
            upstream,
            target,
            message: format!("run did not finish within {:?}", self.run_timeout),
        }
    }
}
