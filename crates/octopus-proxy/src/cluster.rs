//! Static cluster manager
//!
//! Built once per worker from configuration. Cluster definitions are
//! read-only after construction; each cluster owns its own HTTP client so
//! per-cluster connect timeouts apply.

use crate::client::{build_request, HttpClient};
use octopus_config::UpstreamConfig;
use octopus_core::{
    AsyncCallback, AsyncClient, AsyncRequest, ClusterManager, FailureReason, HttpMessage,
    UpstreamCluster, UpstreamInstance,
};
use std::cell::Cell;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{trace, warn};

/// Async client bound to one cluster, balancing round-robin over healthy instances
///
/// Requests run on the calling worker's `LocalSet`; see [`HttpClient::dispatch`].
///
/// # Panics
///
/// [`AsyncClient::send`] panics if called inside a tokio runtime but outside a
/// `LocalSet`. Outside any runtime it fails with
/// [`FailureReason::ConnectionFailure`].
#[derive(Debug)]
pub struct ClusterClient {
    cluster: UpstreamCluster,
    http: HttpClient,
    next: Cell<usize>,
}

impl ClusterClient {
    /// Create a client for `cluster`
    pub fn new(cluster: UpstreamCluster) -> Self {
        let http = HttpClient::with_connect_timeout(cluster.connect_timeout);
        Self {
            cluster,
            http,
            next: Cell::new(0),
        }
    }

    /// Cluster this client sends to
    pub fn cluster(&self) -> &UpstreamCluster {
        &self.cluster
    }

    fn select_instance(&self) -> Option<&UpstreamInstance> {
        let healthy = self.cluster.healthy_instances();
        if healthy.is_empty() {
            return None;
        }
        let index = self.next.get();
        self.next.set(index.wrapping_add(1));
        Some(healthy[index % healthy.len()])
    }
}

impl AsyncClient for ClusterClient {
    fn send(
        &self,
        request: HttpMessage,
        timeout: Option<Duration>,
        on_complete: AsyncCallback,
    ) -> Result<Box<dyn AsyncRequest>, FailureReason> {
        let Some(instance) = self.select_instance() else {
            warn!(cluster = %self.cluster.name, "No healthy upstream instances");
            return Err(FailureReason::ConnectionFailure);
        };

        let request = build_request(request, instance).map_err(|e| {
            warn!(cluster = %self.cluster.name, error = %e, "Invalid upstream request");
            FailureReason::Reset
        })?;

        trace!(
            cluster = %self.cluster.name,
            instance = %instance.id,
            uri = %request.uri(),
            "Dispatching upstream request"
        );

        self.http.dispatch(request, timeout, on_complete)
    }
}

/// Cluster manager over a fixed set of clusters
#[derive(Debug, Default)]
pub struct StaticClusterManager {
    clusters: HashMap<String, ClusterClient>,
}

impl StaticClusterManager {
    /// Create an empty cluster manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cluster manager from configured upstreams
    pub fn from_config(upstreams: &[UpstreamConfig]) -> Self {
        let mut manager = Self::new();
        for upstream in upstreams {
            manager.add_cluster(upstream.to_cluster());
        }
        manager
    }

    /// Register a cluster, replacing any cluster with the same name
    pub fn add_cluster(&mut self, cluster: UpstreamCluster) {
        self.clusters
            .insert(cluster.name.clone(), ClusterClient::new(cluster));
    }

    /// Number of registered clusters
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Whether no clusters are registered
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

impl ClusterManager for StaticClusterManager {
    fn get(&self, cluster: &str) -> Option<&UpstreamCluster> {
        self.clusters.get(cluster).map(ClusterClient::cluster)
    }

    fn http_async_client_for_cluster(&self, cluster: &str) -> Option<&dyn AsyncClient> {
        self.clusters
            .get(cluster)
            .map(|client| client as &dyn AsyncClient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octopus_config::InstanceConfig;
    use octopus_core::headers::{AUTHORITY, METHOD, PATH};
    use octopus_core::HeaderMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::task::LocalSet;

    fn cluster(ports: &[u16]) -> UpstreamCluster {
        let mut cluster = UpstreamCluster::new("auth");
        for (i, port) in ports.iter().enumerate() {
            cluster.add_instance(UpstreamInstance::new(format!("auth-{i}"), "127.0.0.1", *port));
        }
        cluster
    }

    fn get(path: &str) -> HttpMessage {
        let headers: HeaderMap = [(METHOD, "GET"), (PATH, path), (AUTHORITY, "auth.internal")]
            .into_iter()
            .collect();
        HttpMessage::new(headers, None)
    }

    #[test]
    fn test_round_robin_skips_unhealthy() {
        let mut cluster = cluster(&[9001, 9002, 9003]);
        cluster.instances[1].mark_unhealthy();
        let client = ClusterClient::new(cluster);

        let picked: Vec<_> = (0..4)
            .map(|_| client.select_instance().unwrap().port)
            .collect();
        assert_eq!(picked, vec![9001, 9003, 9001, 9003]);
    }

    #[test]
    fn test_no_healthy_instances_fails_immediately() {
        let client = ClusterClient::new(cluster(&[]));
        let result = client.send(get("/"), None, Box::new(|_| panic!("must not complete")));
        assert_eq!(result.unwrap_err(), FailureReason::ConnectionFailure);
    }

    #[test]
    fn test_send_without_runtime_fails() {
        let client = ClusterClient::new(cluster(&[9001]));
        let result = client.send(get("/"), None, Box::new(|_| panic!("must not complete")));
        assert_eq!(result.unwrap_err(), FailureReason::ConnectionFailure);
    }

    #[test]
    fn test_from_config() {
        let manager = StaticClusterManager::from_config(&[UpstreamConfig {
            name: "billing".to_string(),
            instances: vec![InstanceConfig {
                id: "billing-1".to_string(),
                host: "127.0.0.1".to_string(),
                port: 7000,
            }],
            connect_timeout: Duration::from_millis(300),
        }]);

        assert_eq!(manager.len(), 1);
        let cluster = manager.get("billing").unwrap();
        assert_eq!(cluster.connect_timeout, Duration::from_millis(300));
        assert!(manager.http_async_client_for_cluster("billing").is_some());
        assert!(manager.get("missing").is_none());
        assert!(manager.http_async_client_for_cluster("missing").is_none());
    }

    #[tokio::test]
    async fn test_send_through_manager() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let _ = seen_tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
                .await
                .unwrap();
        });

        let mut manager = StaticClusterManager::new();
        manager.add_cluster(cluster(&[port]));

        LocalSet::new()
            .run_until(async move {
                let (tx, rx) = oneshot::channel();
                let client = manager.http_async_client_for_cluster("auth").unwrap();
                let _request = client
                    .send(
                        get("/verify"),
                        Some(Duration::from_secs(5)),
                        Box::new(move |outcome| {
                            let _ = tx.send(outcome);
                        }),
                    )
                    .unwrap();

                let message = rx.await.unwrap().unwrap();
                assert_eq!(message.headers.status(), Some("200"));

                let seen = seen_rx.await.unwrap().to_ascii_lowercase();
                assert!(seen.starts_with("get /verify http/1.1"));
                assert!(seen.contains("host: auth.internal"));
            })
            .await;
    }
}
