use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use lb_autoscale::config::{self, Args, Credentials};
use lb_autoscale::controller::ScaleController;
use lb_autoscale::kubernetes::models::UpdateOutcome;
use lb_autoscale::kubernetes::updater::{CapacityUpdater, KubeServiceStore};
use lb_autoscale::monitoring::{MonitoringClient, MonitoringConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger with custom timestamp format
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            writeln!(buf, "[{}] [{}] [{}:{}] {}",
                timestamp,
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();

    let args = Args::parse();

    // Validate before any network call is made
    let scale_config = args.scale_config()?;
    let target = args.scale_target()?;
    info!(
        "Current configuration: alert_percent - {}, max_size_unit - {}, min_size_unit - {}, service - {}/{}, lb - {}",
        scale_config.alert_percent,
        scale_config.max_size_unit,
        scale_config.min_size_unit,
        target.namespace,
        target.service_name,
        target.lb_id
    );

    let credentials = Credentials::from_env().context("Failed to load credentials")?;

    let monitoring = MonitoringClient::new(MonitoringConfig {
        api_url: args.api_url.clone(),
        api_key: credentials.api_key,
        request_timeout: args.request_timeout(),
    })?;

    let kube_config = config::kube_config(credentials.kubeconfig, args.request_timeout()).await?;
    let client = kube::Client::try_from(kube_config).context("Failed to build kubernetes client")?;

    let controller = ScaleController::new(
        Arc::new(monitoring),
        CapacityUpdater::new(Arc::new(KubeServiceStore::new(client))),
        args.run_timeout(),
    );

    match controller.run(&scale_config, &target).await {
        Ok(outcome) => {
            match &outcome.update {
                UpdateOutcome::Rejected { .. } => {
                    warn!("Decision '{}' was not applied: {}", outcome.decision, outcome.update)
                }
                _ => info!("Done: {}", outcome.update),
            }
            Ok(())
        }
        Err(e) => Err(e).context(format!(
            "scaling {}/{} for load balancer {}",
            target.namespace, target.service_name, target.lb_id
        )),
    }
}
