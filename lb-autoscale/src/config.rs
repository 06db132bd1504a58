use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use log::warn;

use crate::error::{Result, ScaleError};

pub const DEFAULT_API_URL: &str = "https://api.digitalocean.com";
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Invocation parameters. Every flag can also come from the environment so the
/// binary can be dropped into a CronJob or a serverless trigger unchanged.
#[derive(Debug, Clone, Parser)]
#[command(name = "lb-autoscale", version, about = "Right-size a load balancer from its connection utilization")]
pub struct Args {
    /// Threshold compared directly against connections / limit
    #[arg(long, env = "ALERT_PERCENT", default_value_t = 80.0)]
    pub alert_percent: f64,

    /// Load balancer identifier passed to the monitoring API as `lb_id`
    #[arg(long, env = "LB_URN")]
    pub lb_urn: Option<String>,

    #[arg(long, env = "MAX_SIZE_UNIT", default_value_t = 10)]
    pub max_size_unit: u32,

    #[arg(long, env = "MIN_SIZE_UNIT", default_value_t = 1)]
    pub min_size_unit: u32,

    #[arg(long, env = "SERVICE_NAME", default_value = "ingress-nginx-controller")]
    pub service_name: String,

    #[arg(long, env = "NAMESPACE", default_value = "ingress-nginx")]
    pub namespace: String,

    #[arg(long, env = "MONITORING_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Timeout for each individual HTTP call
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_SECS))]
    pub request_timeout_secs: u64,

    /// Budget for the whole cycle, fetch and update included
    #[arg(long, env = "RUN_TIMEOUT_SECS", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_SECS))]
    pub run_timeout_secs: u64,
}

impl Args {
    pub fn scale_config(&self) -> Result<ScaleConfig> {
        ScaleConfig::new(self.alert_percent, self.max_size_unit, self.min_size_unit)
    }

    pub fn scale_target(&self) -> Result<ScaleTarget> {
        ScaleTarget::new(
            &self.service_name,
            &self.namespace,
            self.lb_urn.as_deref().unwrap_or_default(),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleConfig {
    pub alert_percent: f64,
    pub max_size_unit: u32,
    pub min_size_unit: u32,
}

impl ScaleConfig {
    /// Both unit counts must be positive. An inverted min/max pair is accepted
    /// as-is and only reported.
    pub fn new(alert_percent: f64, max_size_unit: u32, min_size_unit: u32) -> Result<Self> {
        if !alert_percent.is_finite() {
            return Err(ScaleError::Configuration(format!(
                "alert_percent must be a finite number, got {alert_percent}"
            )));
        }
        if max_size_unit == 0 || min_size_unit == 0 {
            return Err(ScaleError::Configuration(format!(
                "size units must be positive (max_size_unit={max_size_unit}, min_size_unit={min_size_unit})"
            )));
        }
        if min_size_unit > max_size_unit {
            warn!(
                "min_size_unit ({}) is greater than max_size_unit ({}); scaling up will shrink the load balancer",
                min_size_unit, max_size_unit
            );
        }
        if alert_percent > 1.0 {
            warn!(
                "alert_percent {} is compared against connections/limit, a fraction; the alert fires only when connections exceed {}x the limit",
                alert_percent, alert_percent
            );
        }
        Ok(ScaleConfig {
            alert_percent,
            max_size_unit,
            min_size_unit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleTarget {
    pub service_name: String,
    pub namespace: String,
    pub lb_id: String,
}

impl ScaleTarget {
    pub fn new(service_name: &str, namespace: &str, lb_id: &str) -> Result<Self> {
        let lb_id = lb_id.trim();
        if lb_id.is_empty() {
            return Err(ScaleError::Configuration(
                "a load balancer urn is required (--lb-urn or LB_URN)".to_string(),
            ));
        }
        Ok(ScaleTarget {
            service_name: service_name.to_string(),
            namespace: namespace.to_string(),
            lb_id: lb_id.to_string(),
        })
    }
}

/// Process-wide secrets, read once at startup and handed to the clients.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub kubeconfig: Option<Kubeconfig>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("kubeconfig", &self.kubeconfig.is_some())
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_values(
            std::env::var("API_KEY").ok(),
            std::env::var("K8S_CONFIG_BASE64").ok(),
        )
    }

    pub fn from_values(api_key: Option<String>, kubeconfig_base64: Option<String>) -> Result<Self> {
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ScaleError::Configuration("API_KEY is not set".to_string()))?;

        let kubeconfig = match kubeconfig_base64.filter(|s| !s.trim().is_empty()) {
            Some(encoded) => Some(decode_kubeconfig(&encoded)?),
            None => None,
        };

        Ok(Credentials { api_key, kubeconfig })
    }
}

pub fn decode_kubeconfig(encoded: &str) -> Result<Kubeconfig> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ScaleError::Configuration(format!("K8S_CONFIG_BASE64 is not valid base64: {e}")))?;
    let yaml = String::from_utf8(bytes)
        .map_err(|e| ScaleError::Configuration(format!("K8S_CONFIG_BASE64 is not UTF-8: {e}")))?;
    Kubeconfig::from_yaml(&yaml)
        .map_err(|e| ScaleError::Configuration(format!("K8S_CONFIG_BASE64 is not a kubeconfig: {e}")))
}

/// Builds the kube client configuration, preferring the decoded bundle and
/// falling back to in-cluster / local inference.
pub async fn kube_config(kubeconfig: Option<Kubeconfig>, request_timeout: Duration) -> Result<kube::Config> {
    let mut config = match kubeconfig {
        Some(kubeconfig) => kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ScaleError::Configuration(format!("failed to load kubeconfig: {e}")))?,
        None => kube::Config::infer()
            .await
            .map_err(|e| ScaleError::Configuration(format!("failed to infer kube config: {e}")))?,
    };
    config.connect_timeout = Some(request_timeout);
    config.read_timeout = Some(request_timeout);
    Ok(config)
}
