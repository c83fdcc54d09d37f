//! Upstream service definitions and the async request contract
//!
//! A [`ClusterManager`] resolves cluster names and hands out an
//! [`AsyncClient`] per cluster. Requests complete through a one-shot
//! callback; the returned [`AsyncRequest`] lets the caller cancel.

use crate::headers::HeaderMap;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Upstream service cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamCluster {
    /// Cluster name
    pub name: String,

    /// Upstream instances
    pub instances: Vec<UpstreamInstance>,

    /// Connection establishment timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl UpstreamCluster {
    /// Create a new upstream cluster
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instances: Vec::new(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Add an instance to the cluster
    pub fn add_instance(&mut self, instance: UpstreamInstance) {
        self.instances.push(instance);
    }

    /// Get all healthy instances
    pub fn healthy_instances(&self) -> Vec<&UpstreamInstance> {
        self.instances.iter().filter(|i| i.is_healthy()).collect()
    }

    /// Get total instance count
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Get healthy instance count
    pub fn healthy_count(&self) -> usize {
        self.instances.iter().filter(|i| i.is_healthy()).count()
    }
}

/// Upstream service instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamInstance {
    /// Instance ID
    pub id: String,

    /// Instance address
    pub address: String,

    /// Instance port
    pub port: u16,

    /// Is instance healthy
    #[serde(skip, default = "default_healthy")]
    healthy: bool,
}

fn default_healthy() -> bool {
    true
}

impl UpstreamInstance {
    /// Create a new upstream instance
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
            healthy: true,
        }
    }

    /// Get base URL
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Check if instance is healthy
    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Mark instance as healthy
    pub fn mark_healthy(&mut self) {
        self.healthy = true;
    }

    /// Mark instance as unhealthy
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }
}

/// Headers plus optional body, used for both outbound requests and their responses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpMessage {
    /// Header block, including pseudo-headers
    pub headers: HeaderMap,
    /// Body bytes, absent when the message carried none
    pub body: Option<Bytes>,
}

impl HttpMessage {
    /// Create a message from headers and an optional body
    pub fn new(headers: HeaderMap, body: Option<Bytes>) -> Self {
        Self { headers, body }
    }
}

/// Why an async request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    /// No connection could be established
    #[error("connection failure")]
    ConnectionFailure,
    /// The request was reset before a full response arrived
    #[error("reset")]
    Reset,
    /// The request timed out
    #[error("timeout")]
    Timeout,
}

impl FailureReason {
    /// Short lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ConnectionFailure => "connection_failure",
            FailureReason::Reset => "reset",
            FailureReason::Timeout => "timeout",
        }
    }
}

/// One-shot completion for an async request
pub type AsyncCallback = Box<dyn FnOnce(Result<HttpMessage, FailureReason>)>;

/// Handle to an in-flight async request
pub trait AsyncRequest: fmt::Debug {
    /// Cancel the request; its callback will not be invoked afterwards
    fn cancel(&mut self);
}

/// Issues requests against a single cluster
pub trait AsyncClient {
    /// Send `request`, invoking `on_complete` once when it finishes.
    ///
    /// An immediate failure is returned as `Err` and `on_complete` is dropped
    /// without being called. `on_complete` is never invoked from within `send`.
    fn send(
        &self,
        request: HttpMessage,
        timeout: Option<Duration>,
        on_complete: AsyncCallback,
    ) -> Result<Box<dyn AsyncRequest>, FailureReason>;
}

/// Resolves cluster names to clusters and their clients
pub trait ClusterManager {
    /// Look up a cluster by name
    fn get(&self, cluster: &str) -> Option<&UpstreamCluster>;

    /// Client for issuing requests to `cluster`
    fn http_async_client_for_cluster(&self, cluster: &str) -> Option<&dyn AsyncClient>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_cluster() {
        let mut cluster = UpstreamCluster::new("test-service");

        let instance1 = UpstreamInstance::new("inst-1", "localhost", 8080);
        let mut instance2 = UpstreamInstance::new("inst-2", "localhost", 8081);
        instance2.mark_unhealthy();

        cluster.add_instance(instance1);
        cluster.add_instance(instance2);

        assert_eq!(cluster.instance_count(), 2);
        assert_eq!(cluster.healthy_count(), 1);
        assert_eq!(cluster.healthy_instances()[0].id, "inst-1");
    }

    #[test]
    fn test_upstream_instance() {
        let mut instance = UpstreamInstance::new("inst-1", "127.0.0.1", 8080);

        assert!(instance.is_healthy());
        assert_eq!(instance.base_url(), "http://127.0.0.1:8080");

        instance.mark_unhealthy();
        assert!(!instance.is_healthy());
        instance.mark_healthy();
        assert!(instance.is_healthy());
    }

    #[test]
    fn test_failure_reason_names() {
        assert_eq!(FailureReason::Timeout.as_str(), "timeout");
        assert_eq!(FailureReason::ConnectionFailure.to_string(), "connection failure");
    }
}
