//! Client for the load balancer monitoring API.
//!
//! Each call asks for a single metric over a zero-width window
//! (`start == end`) and returns the first value of the first series.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;

use crate::error::{Result, ScaleError, Upstream};

const METRICS_PATH: &str = "/v2/monitoring/metrics/load_balancer";
const USER_AGENT: &str = concat!("lb-autoscale/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    ConnectionsLimit,
    ConnectionsCurrent,
}

impl Metric {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Metric::ConnectionsLimit => "frontend_connections_limit",
            Metric::ConnectionsCurrent => "frontend_connections_current",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::ConnectionsLimit => f.write_str("frontend connection limit"),
            Metric::ConnectionsCurrent => f.write_str("frontend current connections"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub metric: Metric,
    pub lb_id: String,
    pub timestamp: f64,
    pub value: f64,
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch(&self, metric: Metric, lb_id: &str, timestamp: f64) -> Result<MetricSample>;
}

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub api_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

pub struct MonitoringClient {
    http_client: Client,
    api_url: String,
    api_key: String,
}

impl MonitoringClient {
    pub fn new(config: MonitoringConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ScaleError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(MonitoringClient {
            http_client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    pub fn metric_url(&self, metric: Metric, lb_id: &str, timestamp: f64) -> Result<Url> {
        let ts = timestamp.to_string();
        let base = format!("{}{}/{}", self.api_url, METRICS_PATH, metric.endpoint());
        Url::parse_with_params(&base, [("lb_id", lb_id), ("start", ts.as_str()), ("end", ts.as_str())])
            .map_err(|e| ScaleError::Configuration(format!("invalid monitoring API url {base}: {e}")))
    }
}

#[async_trait]
impl MetricsSource for MonitoringClient {
    async fn fetch(&self, metric: Metric, lb_id: &str, timestamp: f64) -> Result<MetricSample> {
        let url = self.metric_url(metric, lb_id, timestamp)?;
        debug!(target: "monitoring", "GET {}", url);

        let transport = |e: reqwest::Error| ScaleError::Transport {
            upstream: Upstream::Monitoring,
            target: format!("{metric} of {lb_id}"),
            message: e.to_string(),
        };

        let response = self
            .http_client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(ScaleError::Authentication {
                metric,
                lb_id: lb_id.to_string(),
                body,
            });
        }
        if !status.is_success() {
            return Err(ScaleError::UnexpectedStatus {
                metric,
                lb_id: lb_id.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let value = parse_metric_value(&body).map_err(|reason| ScaleError::MalformedResponse {
            metric,
            lb_id: lb_id.to_string(),
            reason,
        })?;
        debug!(target: "monitoring", "{} for {} at {}: {}", metric, lb_id, timestamp, value);

        Ok(MetricSample {
            metric,
            lb_id: lb_id.to_string(),
            timestamp,
            value,
        })
    }
}

/// Extracts `data.result[0].values[0][1]` from a metrics response body.
///
/// The API reports sample values as strings; plain JSON numbers are accepted too.
pub fn parse_metric_value(body: &str) -> std::result::Result<f64, String> {
    let json: Value = serde_json::from_str(body).map_err(|e| format!("response is not JSON: {e}"))?;

    let sample = json
        .pointer("/data/result/0/values/0/1")
        .ok_or_else(|| "no value at data.result[0].values[0][1]".to_string())?;

    let value = match sample {
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("value {s:?} is not numeric"))?,
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("value {n} is not representable as f64"))?,
        other => return Err(format!("value {other} is not numeric")),
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("value {value} is not finite"))
    }
}
