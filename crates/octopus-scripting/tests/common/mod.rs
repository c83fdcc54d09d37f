//! Mock pipeline and upstream for script filter tests

#![allow(dead_code)]

use octopus_core::{
    AsyncCallback, AsyncClient, AsyncRequest, Buffer, BufferRef, ClusterManager, FailureReason,
    FilterDataStatus, HeaderMap, HeaderMapRef, HttpMessage, StreamDecoderFilter,
    StreamDecoderFilterCallbacks, StreamEncoderFilter, StreamEncoderFilterCallbacks,
    UpstreamCluster, UpstreamInstance,
};
use octopus_scripting::{CompiledScript, Filter, FilterConfig, WorkerContext};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Install a test subscriber honoring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Local response captured by a mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: String,
    pub body: Option<String>,
}

fn append(buffer: &RefCell<Option<BufferRef>>, data: &mut Buffer) {
    buffer
        .borrow_mut()
        .get_or_insert_with(|| Buffer::new().into_shared())
        .borrow_mut()
        .move_from(data);
}

/// Request path host
#[derive(Debug, Default)]
pub struct MockDecoderCallbacks {
    pub buffer: RefCell<Option<BufferRef>>,
    pub continued: Cell<usize>,
    pub replies: RefCell<Vec<Reply>>,
    pending_headers: RefCell<Option<(String, bool)>>,
}

impl MockDecoderCallbacks {
    pub fn buffered(&self) -> Option<String> {
        self.buffer
            .borrow()
            .as_ref()
            .map(|buffer| String::from_utf8_lossy(buffer.borrow().as_slice()).into_owned())
    }
}

impl StreamDecoderFilterCallbacks for MockDecoderCallbacks {
    fn add_decoded_data(&self, data: &mut Buffer) {
        append(&self.buffer, data);
    }

    fn decoding_buffer(&self) -> Option<BufferRef> {
        self.buffer.borrow().clone()
    }

    fn continue_decoding(&self) {
        self.continued.set(self.continued.get() + 1);
    }

    fn encode_headers(&self, headers: HeaderMap, end_stream: bool) {
        let status = headers.status().unwrap_or_default().to_string();
        if end_stream {
            self.replies.borrow_mut().push(Reply { status, body: None });
        } else {
            *self.pending_headers.borrow_mut() = Some((status, end_stream));
        }
    }

    fn encode_data(&self, data: Buffer, end_stream: bool) {
        assert!(end_stream, "local reply body must end the stream");
        let (status, _) = self
            .pending_headers
            .borrow_mut()
            .take()
            .expect("local reply body without headers");
        self.replies.borrow_mut().push(Reply {
            status,
            body: Some(String::from_utf8_lossy(data.as_slice()).into_owned()),
        });
    }
}

/// Response path host
#[derive(Debug, Default)]
pub struct MockEncoderCallbacks {
    pub buffer: RefCell<Option<BufferRef>>,
    pub continued: Cell<usize>,
    pub replies: RefCell<Vec<Reply>>,
}

impl StreamEncoderFilterCallbacks for MockEncoderCallbacks {
    fn add_encoded_data(&self, data: &mut Buffer) {
        append(&self.buffer, data);
    }

    fn encoding_buffer(&self) -> Option<BufferRef> {
        self.buffer.borrow().clone()
    }

    fn continue_encoding(&self) {
        self.continued.set(self.continued.get() + 1);
    }

    fn send_local_reply(&self, headers: HeaderMap, body: Option<Buffer>) {
        self.replies.borrow_mut().push(Reply {
            status: headers.status().unwrap_or_default().to_string(),
            body: body.map(|body| String::from_utf8_lossy(body.as_slice()).into_owned()),
        });
    }
}

#[derive(Debug)]
struct MockRequest {
    cancelled: Rc<Cell<bool>>,
}

impl AsyncRequest for MockRequest {
    fn cancel(&mut self) {
        self.cancelled.set(true);
    }
}

/// Call recorded by [`MockAsyncClient`]
pub struct SentCall {
    pub message: HttpMessage,
    pub timeout: Option<Duration>,
    pub cancelled: Rc<Cell<bool>>,
    callback: Option<AsyncCallback>,
}

/// Client that records requests and completes them on demand
#[derive(Default)]
pub struct MockAsyncClient {
    pub calls: RefCell<Vec<SentCall>>,
    pub fail_immediately: Cell<Option<FailureReason>>,
}

impl MockAsyncClient {
    pub fn sent(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn is_cancelled(&self, index: usize) -> bool {
        self.calls.borrow()[index].cancelled.get()
    }

    /// Invoke the completion of call `index`, even if it was cancelled
    pub fn complete(&self, index: usize, outcome: Result<HttpMessage, FailureReason>) {
        let callback = self.calls.borrow_mut()[index]
            .callback
            .take()
            .expect("call already completed");
        callback(outcome);
    }
}

impl AsyncClient for MockAsyncClient {
    fn send(
        &self,
        request: HttpMessage,
        timeout: Option<Duration>,
        on_complete: AsyncCallback,
    ) -> Result<Box<dyn AsyncRequest>, FailureReason> {
        if let Some(reason) = self.fail_immediately.get() {
            return Err(reason);
        }
        let cancelled = Rc::new(Cell::new(false));
        self.calls.borrow_mut().push(SentCall {
            message: request,
            timeout,
            cancelled: Rc::clone(&cancelled),
            callback: Some(on_complete),
        });
        Ok(Box::new(MockRequest { cancelled }))
    }
}

/// Cluster manager with one mock client per cluster
#[derive(Default)]
pub struct MockClusterManager {
    clusters: HashMap<String, (UpstreamCluster, MockAsyncClient)>,
}

impl MockClusterManager {
    pub fn with_cluster(mut self, name: &str) -> Self {
        let mut cluster = UpstreamCluster::new(name);
        cluster.add_instance(UpstreamInstance::new("1", "127.0.0.1", 8080));
        self.clusters
            .insert(name.to_string(), (cluster, MockAsyncClient::default()));
        self
    }

    pub fn client(&self, name: &str) -> &MockAsyncClient {
        &self.clusters[name].1
    }
}

impl ClusterManager for MockClusterManager {
    fn get(&self, cluster: &str) -> Option<&UpstreamCluster> {
        self.clusters.get(cluster).map(|(cluster, _)| cluster)
    }

    fn http_async_client_for_cluster(&self, cluster: &str) -> Option<&dyn AsyncClient> {
        self.clusters
            .get(cluster)
            .map(|(_, client)| client as &dyn AsyncClient)
    }
}

/// One stream through a script filter, buffering the way a pipeline does
pub struct Harness {
    pub manager: Rc<MockClusterManager>,
    pub decoder: Rc<MockDecoderCallbacks>,
    pub encoder: Rc<MockEncoderCallbacks>,
    pub filter: Filter,
}

impl Harness {
    pub fn new(script: CompiledScript) -> Self {
        Self::with_config(FilterConfig::new("test", script))
    }

    pub fn with_config(config: FilterConfig) -> Self {
        init_tracing();
        let manager = Rc::new(MockClusterManager::default().with_cluster("auth"));
        let worker = WorkerContext::new(Arc::new(config), manager.clone());

        let decoder = Rc::new(MockDecoderCallbacks::default());
        let encoder = Rc::new(MockEncoderCallbacks::default());
        let mut filter = worker.create_filter();
        filter.set_decoder_filter_callbacks(decoder.clone());
        filter.set_encoder_filter_callbacks(encoder.clone());

        Self {
            manager,
            decoder,
            encoder,
            filter,
        }
    }

    pub fn auth(&self) -> &MockAsyncClient {
        self.manager.client("auth")
    }

    pub fn decode_data(&mut self, data: &str, end_stream: bool) -> FilterDataStatus {
        let mut buffer = Buffer::from(data);
        let status = self.filter.decode_data(&mut buffer, end_stream);
        if status == FilterDataStatus::StopIterationAndBuffer {
            append(&self.decoder.buffer, &mut buffer);
        }
        status
    }

    pub fn encode_data(&mut self, data: &str, end_stream: bool) -> FilterDataStatus {
        let mut buffer = Buffer::from(data);
        let status = self.filter.encode_data(&mut buffer, end_stream);
        if status == FilterDataStatus::StopIterationAndBuffer {
            append(&self.encoder.buffer, &mut buffer);
        }
        status
    }
}

pub fn request_headers() -> HeaderMapRef {
    HeaderMap::from_iter([
        (":method", "POST"),
        (":path", "/orders"),
        (":authority", "shop"),
    ])
    .into_shared()
}

pub fn response_headers(status: &str) -> HeaderMapRef {
    HeaderMap::from_iter([(":status", status)]).into_shared()
}

pub fn trailers() -> HeaderMapRef {
    HeaderMap::from_iter([("grpc-status", "0")]).into_shared()
}

pub fn upstream_response(status: &str, body: Option<&str>) -> HttpMessage {
    HttpMessage::new(
        HeaderMap::from_iter([(":status", status)]),
        body.map(|body| body.to_string().into()),
    )
}
