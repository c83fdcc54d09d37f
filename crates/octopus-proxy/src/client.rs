//! HTTP client for script-initiated requests to upstream services
//!
//! Requests run as tasks on the current worker's `LocalSet`; completion is
//! delivered through the caller's one-shot callback on that same thread.

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use octopus_core::headers::STATUS;
use octopus_core::{
    AsyncCallback, AsyncRequest, Error, FailureReason, HeaderMap, HttpMessage, Result,
    UpstreamInstance,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Body type alias
pub type Body = Full<Bytes>;

/// HTTP client for upstream requests
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client<HttpConnector, Body>,
    connect_timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new() -> Self {
        Self::with_connect_timeout(Duration::from_secs(5))
    }

    /// Create a new HTTP client with a custom connect timeout
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            connect_timeout,
        }
    }

    /// Get the configured connect timeout
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Start `request` on the current `LocalSet`.
    ///
    /// `on_complete` runs exactly once unless the returned request is cancelled
    /// first. Without a tokio runtime the request fails immediately with
    /// [`FailureReason::ConnectionFailure`] and `on_complete` is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called inside a tokio runtime but outside a `LocalSet`.
    pub fn dispatch(
        &self,
        request: Request<Body>,
        timeout: Option<Duration>,
        on_complete: AsyncCallback,
    ) -> std::result::Result<Box<dyn AsyncRequest>, FailureReason> {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!(uri = %request.uri(), "No tokio runtime on this thread, failing upstream request");
            return Err(FailureReason::ConnectionFailure);
        }

        let client = self.client.clone();
        let task = tokio::task::spawn_local(async move {
            let outcome = match timeout {
                Some(limit) => tokio::time::timeout(limit, execute(&client, request))
                    .await
                    .unwrap_or(Err(FailureReason::Timeout)),
                None => execute(&client, request).await,
            };
            trace!(success = outcome.is_ok(), "Upstream request finished");
            on_complete(outcome);
        });

        Ok(Box::new(InflightRequest { task }))
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Request task started by [`HttpClient::dispatch`]
#[derive(Debug)]
struct InflightRequest {
    task: JoinHandle<()>,
}

impl AsyncRequest for InflightRequest {
    fn cancel(&mut self) {
        self.task.abort();
    }
}

async fn execute(
    client: &Client<HttpConnector, Body>,
    request: Request<Body>,
) -> std::result::Result<HttpMessage, FailureReason> {
    let response = client.request(request).await.map_err(|e| {
        debug!(error = %e, "Upstream request failed");
        if e.is_connect() {
            FailureReason::ConnectionFailure
        } else {
            FailureReason::Reset
        }
    })?;

    into_message(response).await
}

async fn into_message(
    response: Response<Incoming>,
) -> std::result::Result<HttpMessage, FailureReason> {
    let (parts, body) = response.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| {
            debug!(error = %e, "Upstream response body failed");
            FailureReason::Reset
        })?
        .to_bytes();

    let mut headers = HeaderMap::new();
    headers.add(STATUS, parts.status.as_str());
    for (name, value) in parts.headers.iter() {
        headers.add(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
    }

    Ok(HttpMessage::new(headers, (!body.is_empty()).then_some(body)))
}

/// Build the wire request for `message` against `instance`.
///
/// `:method` and `:path` become the request line, `:authority` becomes `Host`,
/// and remaining pseudo-headers are dropped.
pub fn build_request(message: HttpMessage, instance: &UpstreamInstance) -> Result<Request<Body>> {
    let headers = &message.headers;
    let method = headers
        .method()
        .ok_or_else(|| Error::InvalidRequest("missing :method".to_string()))?;
    let path = headers
        .path()
        .ok_or_else(|| Error::InvalidRequest("missing :path".to_string()))?;

    let mut builder = Request::builder()
        .method(method)
        .uri(format!("{}{}", instance.base_url(), path));

    if let Some(authority) = headers.authority() {
        builder = builder.header(http::header::HOST, authority);
    }
    for (name, value) in headers.iter().filter(|(name, _)| !name.starts_with(':')) {
        builder = builder.header(name, value);
    }

    Ok(builder.body(Full::new(message.body.clone().unwrap_or_default()))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use octopus_core::headers::{AUTHORITY, METHOD, PATH};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::task::LocalSet;

    fn get(path: &str) -> HttpMessage {
        let headers: HeaderMap = [(METHOD, "GET"), (PATH, path), (AUTHORITY, "auth.internal")]
            .into_iter()
            .collect();
        HttpMessage::new(headers, None)
    }

    fn request_to(port: u16) -> Request<Body> {
        build_request(get("/check"), &UpstreamInstance::new("up-1", "127.0.0.1", port)).unwrap()
    }

    fn completion() -> (
        AsyncCallback,
        oneshot::Receiver<std::result::Result<HttpMessage, FailureReason>>,
    ) {
        let (tx, rx) = oneshot::channel();
        let callback: AsyncCallback = Box::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        (callback, rx)
    }

    #[test]
    fn test_http_client_with_connect_timeout() {
        let client = HttpClient::with_connect_timeout(Duration::from_secs(2));
        assert_eq!(client.connect_timeout(), Duration::from_secs(2));
        assert_eq!(HttpClient::default().connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_dispatch_without_runtime_fails() {
        let callback: AsyncCallback = Box::new(|_| panic!("must not complete"));
        let result = HttpClient::new().dispatch(request_to(8080), None, callback);
        assert_eq!(result.err(), Some(FailureReason::ConnectionFailure));
    }

    #[test]
    fn test_build_request() {
        let mut message = get("/check?user=1");
        message.headers.add("x-trace", "abc");
        message.body = Some(Bytes::from_static(b"payload"));

        let request =
            build_request(message, &UpstreamInstance::new("up-1", "10.0.0.1", 8080)).unwrap();

        assert_eq!(request.method(), http::Method::GET);
        assert_eq!(request.uri(), "http://10.0.0.1:8080/check?user=1");
        assert_eq!(request.headers()["host"], "auth.internal");
        assert_eq!(request.headers()["x-trace"], "abc");
        assert!(request.headers().get(":authority").is_none());
    }

    #[test]
    fn test_build_request_requires_method() {
        let headers: HeaderMap = [(PATH, "/")].into_iter().collect();
        let result = build_request(
            HttpMessage::new(headers, None),
            &UpstreamInstance::new("up-1", "10.0.0.1", 8080),
        );
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_dispatch_delivers_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 201 Created\r\ncontent-length: 5\r\nx-upstream: yes\r\n\r\nhello")
                .await
                .unwrap();
        });

        LocalSet::new()
            .run_until(async move {
                let (callback, rx) = completion();
                let _request = HttpClient::new()
                    .dispatch(request_to(port), None, callback)
                    .unwrap();

                let message = rx.await.unwrap().unwrap();
                assert_eq!(message.headers.status(), Some("201"));
                assert_eq!(message.headers.get("x-upstream"), Some("yes"));
                assert_eq!(message.body, Some(Bytes::from_static(b"hello")));
            })
            .await;
    }

    #[tokio::test]
    async fn test_dispatch_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        LocalSet::new()
            .run_until(async move {
                let (callback, rx) = completion();
                let _request = HttpClient::new()
                    .dispatch(request_to(port), Some(Duration::from_millis(50)), callback)
                    .unwrap();

                assert_eq!(rx.await.unwrap(), Err(FailureReason::Timeout));
            })
            .await;
    }

    #[tokio::test]
    async fn test_dispatch_connection_failure() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        LocalSet::new()
            .run_until(async move {
                let (callback, rx) = completion();
                let _request = HttpClient::new()
                    .dispatch(request_to(port), None, callback)
                    .unwrap();

                assert_eq!(rx.await.unwrap(), Err(FailureReason::ConnectionFailure));
            })
            .await;
    }

    #[tokio::test]
    async fn test_cancel_drops_callback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        LocalSet::new()
            .run_until(async move {
                let (callback, rx) = completion();
                let mut request = HttpClient::new()
                    .dispatch(request_to(port), None, callback)
                    .unwrap();
                request.cancel();

                assert!(rx.await.is_err());
            })
            .await;
    }
}
