//! In-memory stand-ins for the monitoring API and the cluster, with call counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::error::{Result, ScaleError};
use crate::kubernetes::models::SIZE_UNIT_ANNOTATION;
use crate::kubernetes::updater::ServiceStore;
use crate::monitoring::{Metric, MetricSample, MetricsSource};

#[derive(Clone)]
pub enum MockResponse {
    Value(f64),
    Unauthorized,
    Malformed,
    Unreachable,
    /// Answers after the given delay.
    Slow(Duration, f64),
}

pub struct MockMetrics {
    responses: HashMap<Metric, MockResponse>,
    calls: Mutex<Vec<(Metric, String, f64)>>,
}

impl MockMetrics {
    pub fn new(limit: MockResponse, connections: MockResponse) -> Self {
        MockMetrics {
            responses: HashMap::from([
                (Metric::ConnectionsLimit, limit),
                (Metric::ConnectionsCurrent, connections),
            ]),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn values(limit: f64, connections: f64) -> Self {
        Self::new(MockResponse::Value(limit), MockResponse::Value(connections))
    }

    pub fn calls(&self) -> Vec<(Metric, String, f64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSource for MockMetrics {
    async fn fetch(&self, metric: Metric, lb_id: &str, timestamp: f64) -> Result<MetricSample> {
        self.calls
            .lock()
            .unwrap()
            .push((metric, lb_id.to_string(), timestamp));

        let value = match self.responses.get(&metric).cloned() {
            Some(MockResponse::Value(value)) => value,
            Some(MockResponse::Slow(delay, value)) => {
                tokio::time::sleep(delay).await;
                value
            }
            Some(MockResponse::Unauthorized) => {
                return Err(ScaleError::Authentication {
                    metric,
                    lb_id: lb_id.to_string(),
                    body: r#"{"id":"Unauthorized","message":"Unable to authenticate you"}"#.to_string(),
                });
            }
            Some(MockResponse::Unreachable) => {
                return Err(ScaleError::Transport {
                    upstream: crate::error::Upstream::Monitoring,
                    target: lb_id.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            Some(MockResponse::Malformed) | None => {
                return Err(ScaleError::MalformedResponse {
                    metric,
                    lb_id: lb_id.to_string(),
                    reason: "no value at data.result[0].values[0][1]".to_string(),
                });
            }
        };

        Ok(MetricSample {
            metric,
            lb_id: lb_id.to_string(),
            timestamp,
            value,
        })
    }
}

pub struct MockServiceStore {
    service: Mutex<Option<Service>>,
    reject_status: Option<u16>,
    reads: AtomicUsize,
    patches: AtomicUsize,
}

impl MockServiceStore {
    fn from_service(service: Option<Service>) -> Self {
        MockServiceStore {
            service: Mutex::new(service),
            reject_status: None,
            reads: AtomicUsize::new(0),
            patches: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::from_service(None)
    }

    pub fn with_size_unit(name: &str, namespace: &str, size_unit: &str) -> Self {
        let annotations = BTreeMap::from([
            (SIZE_UNIT_ANNOTATION.to_string(), size_unit.to_string()),
            (
                "service.beta.kubernetes.io/do-loadbalancer-name".to_string(),
                "ingress-lb".to_string(),
            ),
        ]);
        Self::from_service(Some(service(name, namespace, Some(annotations))))
    }

    pub fn without_annotation(name: &str, namespace: &str) -> Self {
        Self::from_service(Some(service(name, namespace, None)))
    }

    pub fn rejecting(mut self, status: u16) -> Self {
        self.reject_status = Some(status);
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn patches(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    pub fn size_unit(&self) -> Option<String> {
        self.service
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|s| s.metadata.annotations.as_ref())
            .and_then(|a| a.get(SIZE_UNIT_ANNOTATION).cloned())
    }
}

fn service(name: &str, namespace: &str, annotations: Option<BTreeMap<String, String>>) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[async_trait]
impl ServiceStore for MockServiceStore {
    async fn get(&self, name: &str, namespace: &str) -> Result<Service> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.service
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ScaleError::ResourceNotFound(format!("service {namespace}/{name}")))
    }

    async fn patch_annotation(&self, name: &str, namespace: &str, key: &str, value: &str) -> Result<Service> {
        self.patches.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.reject_status {
            return Err(ScaleError::UpdateRejected {
                name: name.to_string(),
                namespace: namespace.to_string(),
                status,
                message: "Operation cannot be fulfilled on services: the object has been modified".to_string(),
            });
        }

        let mut guard = self.service.lock().unwrap();
        let service = guard
            .as_mut()
            .ok_or_else(|| ScaleError::ResourceNotFound(format!("service {namespace}/{name}")))?;
        service
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        Ok(service.clone())
    }
}

/// Answers `connections` HTTP requests with the same canned response and hands
/// back the raw request heads it received.
pub async fn serve_http(status_line: &'static str, body: &'static str, connections: usize) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut requests = Vec::new();
        for _ in 0..connections {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };

            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            requests.push(String::from_utf8_lossy(&head).into_owned());

            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
        requests
    });

    (format!("http://{addr}"), server)
}
