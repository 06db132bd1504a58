use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use log::{info, warn};
use serde_json::json;

use super::models::{AnnotationState, SIZE_UNIT_ANNOTATION, UpdateOutcome};
use crate::error::{Result, ScaleError, Upstream};

/// Read-one / patch-one access to namespaced Services.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn get(&self, name: &str, namespace: &str) -> Result<Service>;

    /// Sets a single annotation and returns the object as stored by the API server.
    async fn patch_annotation(&self, name: &str, namespace: &str, key: &str, value: &str) -> Result<Service>;
}

pub struct KubeServiceStore {
    client: Client,
}

impl KubeServiceStore {
    pub fn new(client: Client) -> Self {
        KubeServiceStore { client }
    }
}

#[async_trait]
impl ServiceStore for KubeServiceStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Service> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        services.get(name).await.map_err(|e| match e {
            kube::Error::Api(resp) if resp.code == 404 => {
                ScaleError::ResourceNotFound(format!("service {namespace}/{name}"))
            }
            kube::Error::Api(resp) => ScaleError::ClusterRead {
                name: name.to_string(),
                namespace: namespace.to_string(),
                status: resp.code,
                message: resp.message,
            },
            other => cluster_transport(name, namespace, other),
        })
    }

    async fn patch_annotation(&self, name: &str, namespace: &str, key: &str, value: &str) -> Result<Service> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        services
            .patch(
                name,
                &PatchParams::default(),
                &Patch::Merge(json!({
                    "metadata": {
                        "annotations": {
                            key: value
                        }
                    }
                })),
            )
            .await
            .map_err(|e| match e {
                kube::Error::Api(resp) => ScaleError::UpdateRejected {
                    name: name.to_string(),
                    namespace: namespace.to_string(),
                    status: resp.code,
                    message: resp.message,
                },
                other => cluster_transport(name, namespace, other),
            })
    }
}

fn cluster_transport(name: &str, namespace: &str, err: kube::Error) -> ScaleError {
    ScaleError::Transport {
        upstream: Upstream::Cluster,
        target: format!("service {namespace}/{name}"),
        message: err.to_string(),
    }
}

/// Keeps the size-unit annotation of one Service at a desired value.
///
/// This is a plain read-modify-write: the patch carries no resourceVersion, so
/// two controllers racing on the same Service end up last-write-wins.
pub struct CapacityUpdater {
    store: Arc<dyn ServiceStore>,
}

impl CapacityUpdater {
    pub fn new(store: Arc<dyn ServiceStore>) -> Self {
        CapacityUpdater { store }
    }

    pub async fn read_state(&self, service_name: &str, namespace: &str) -> Result<AnnotationState> {
        let service = self.store.get(service_name, namespace).await?;
        let value = service
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(SIZE_UNIT_ANNOTATION))
            .cloned()
            .ok_or_else(|| {
                ScaleError::ResourceNotFound(format!(
                    "annotation {SIZE_UNIT_ANNOTATION} on service {namespace}/{service_name}"
                ))
            })?;

        Ok(AnnotationState {
            key: SIZE_UNIT_ANNOTATION,
            value,
        })
    }

    /// Writes the annotation only when it differs from `desired_size`. A patch
    /// refused by the API server is reported as `UpdateOutcome::Rejected`.
    pub async fn set_capacity_unit(
        &self,
        service_name: &str,
        namespace: &str,
        desired_size: u32,
    ) -> Result<UpdateOutcome> {
        let state = self.read_state(service_name, namespace).await?;
        if state.matches(desired_size) {
            info!(target: "capacity_updater", "Current size unit of {}/{} already equals {}, nothing to do", namespace, service_name, state.value);
            return Ok(UpdateOutcome::Unchanged { value: state.value });
        }

        let desired = desired_size.to_string();
        info!(target: "capacity_updater", "Changing size unit of {}/{} from {} to {}", namespace, service_name, state.value, desired);

        match self
            .store
            .patch_annotation(service_name, namespace, SIZE_UNIT_ANNOTATION, &desired)
            .await
        {
            Ok(updated) => {
                let value = updated
                    .annotations()
                    .get(SIZE_UNIT_ANNOTATION)
                    .cloned()
                    .unwrap_or(desired);
                let name = updated.name_any();
                info!(target: "capacity_updater", "Service {} updated, size unit is now {}", name, value);
                Ok(UpdateOutcome::Updated { name, value })
            }
            Err(e) if !e.is_fatal() => {
                warn!(target: "capacity_updater", "Failed to change size unit: {}", e);
                Ok(UpdateOutcome::Rejected { reason: e.to_string() })
            }
            Err(e) => Err(e),
        }
    }
}
