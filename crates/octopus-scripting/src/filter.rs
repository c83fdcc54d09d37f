//! Script filter, its shared configuration and per-worker context
//!
//! A [`FilterConfig`] is compiled once and shared across workers. Each worker
//! owns a [`WorkerContext`] pairing that config with the worker's cluster
//! manager, and creates one [`Filter`] per stream. The filter starts a
//! [`StreamHandle`] for a direction when its headers arrive, if the script
//! defines an entry point for it, and forwards later events to that handle.

use crate::callbacks::{DecoderCallbacks, Direction, EncoderCallbacks, FilterCallbacks};
use crate::error::Result;
use crate::rhai_engine::RhaiRuntime;
use crate::runtime::{CompiledScript, EntryPoint, ScriptRuntime};
use crate::stream::StreamHandle;
use octopus_config::ScriptFilterConfig;
use octopus_core::{
    Buffer, ClusterManager, FilterDataStatus, FilterHeadersStatus, FilterTrailersStatus,
    HeaderMapRef, StreamDecoderFilter, StreamDecoderFilterCallbacks, StreamEncoderFilter,
    StreamEncoderFilterCallbacks, StreamFilterBase,
};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Compiled script shared by every worker
#[derive(Debug, Clone)]
pub struct FilterConfig {
    name: String,
    script: CompiledScript,
}

impl FilterConfig {
    /// Wrap an already compiled script
    pub fn new(name: impl Into<String>, script: CompiledScript) -> Self {
        Self {
            name: name.into(),
            script,
        }
    }

    /// Load and compile the configured Rhai script
    pub async fn load(config: &ScriptFilterConfig) -> Result<Self> {
        let runtime = RhaiRuntime::with_limits(&config.limits);
        Self::load_with(config, &runtime).await
    }

    /// Load and compile the configured script with `runtime`
    pub async fn load_with(
        config: &ScriptFilterConfig,
        runtime: &dyn ScriptRuntime,
    ) -> Result<Self> {
        let name = config.source.name();
        info!(script = %name, language = ?runtime.language(), "Loading script filter");

        let script = runtime.load(config).await?;
        Ok(Self::new(name, script))
    }

    /// Script name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry point for the request path, if the script defines one
    pub fn request_entry_point(&self) -> Option<&Arc<dyn EntryPoint>> {
        self.script.request.as_ref()
    }

    /// Entry point for the response path, if the script defines one
    pub fn response_entry_point(&self) -> Option<&Arc<dyn EntryPoint>> {
        self.script.response.as_ref()
    }
}

/// Per-worker state shared by the filters that worker creates
pub struct WorkerContext {
    config: Arc<FilterConfig>,
    cluster_manager: Rc<dyn ClusterManager>,
}

impl WorkerContext {
    /// Set up a worker
    pub fn new(config: Arc<FilterConfig>, cluster_manager: Rc<dyn ClusterManager>) -> Rc<Self> {
        debug!(script = config.name(), "Worker context initialized");
        Rc::new(Self {
            config,
            cluster_manager,
        })
    }

    /// Shared filter configuration
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Create the filter for a new stream
    pub fn create_filter(self: &Rc<Self>) -> Filter {
        Filter {
            worker: Rc::clone(self),
            destroyed: Rc::new(Cell::new(false)),
            decoder_callbacks: None,
            encoder_callbacks: None,
            request_stream: None,
            response_stream: None,
        }
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        debug!(script = self.config.name(), "Worker context shut down");
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Script filter for one stream
pub struct Filter {
    worker: Rc<WorkerContext>,
    destroyed: Rc<Cell<bool>>,
    decoder_callbacks: Option<Rc<DecoderCallbacks>>,
    encoder_callbacks: Option<Rc<EncoderCallbacks>>,
    request_stream: Option<Rc<RefCell<StreamHandle>>>,
    response_stream: Option<Rc<RefCell<StreamHandle>>>,
}

impl Filter {
    fn start(
        &self,
        direction: Direction,
        entry: Option<&Arc<dyn EntryPoint>>,
        callbacks: Option<Rc<dyn FilterCallbacks>>,
        headers: &HeaderMapRef,
        end_stream: bool,
    ) -> (Option<Rc<RefCell<StreamHandle>>>, FilterHeadersStatus) {
        let Some(entry) = entry else {
            return (None, FilterHeadersStatus::Continue);
        };
        let Some(callbacks) = callbacks else {
            error!(%direction, "Filter callbacks not installed, skipping script");
            return (None, FilterHeadersStatus::Continue);
        };

        let stream = StreamHandle::new(
            direction,
            headers,
            end_stream,
            callbacks,
            Rc::clone(&self.worker.cluster_manager),
            Rc::clone(&self.destroyed),
        );
        let status = stream.borrow_mut().start(entry);
        (Some(stream), status)
    }
}

impl StreamFilterBase for Filter {
    fn on_destroy(&mut self) {
        debug!(script = self.worker.config.name(), "Destroying script filter");
        self.destroyed.set(true);
        for stream in [self.request_stream.take(), self.response_stream.take()]
            .into_iter()
            .flatten()
        {
            stream.borrow_mut().on_reset();
        }
    }
}

impl StreamDecoderFilter for Filter {
    fn decode_headers(&mut self, headers: &HeaderMapRef, end_stream: bool) -> FilterHeadersStatus {
        let callbacks = self
            .decoder_callbacks
            .clone()
            .map(|callbacks| callbacks as Rc<dyn FilterCallbacks>);
        let (stream, status) = self.start(
            Direction::Request,
            self.worker.config.request_entry_point(),
            callbacks,
            headers,
            end_stream,
        );
        self.request_stream = stream;
        status
    }

    fn decode_data(&mut self, data: &mut Buffer, end_stream: bool) -> FilterDataStatus {
        match &self.request_stream {
            Some(stream) => stream.borrow_mut().on_data(data, end_stream),
            None => FilterDataStatus::Continue,
        }
    }

    fn decode_trailers(&mut self, trailers: &HeaderMapRef) -> FilterTrailersStatus {
        match &self.request_stream {
            Some(stream) => stream.borrow_mut().on_trailers(trailers),
            None => FilterTrailersStatus::Continue,
        }
    }

    fn set_decoder_filter_callbacks(&mut self, callbacks: Rc<dyn StreamDecoderFilterCallbacks>) {
        self.decoder_callbacks = Some(Rc::new(DecoderCallbacks::new(callbacks)));
    }
}

impl StreamEncoderFilter for Filter {
    fn encode_headers(&mut self, headers: &HeaderMapRef, end_stream: bool) -> FilterHeadersStatus {
        let callbacks = self
            .encoder_callbacks
            .clone()
            .map(|callbacks| callbacks as Rc<dyn FilterCallbacks>);
        let (stream, status) = self.start(
            Direction::Response,
            self.worker.config.response_entry_point(),
            callbacks,
            headers,
            end_stream,
        );
        self.response_stream = stream;
        status
    }

    fn encode_data(&mut self, data: &mut Buffer, end_stream: bool) -> FilterDataStatus {
        match &self.response_stream {
            Some(stream) => stream.borrow_mut().on_data(data, end_stream),
            None => FilterDataStatus::Continue,
        }
    }

    fn encode_trailers(&mut self, trailers: &HeaderMapRef) -> FilterTrailersStatus {
        match &self.response_stream {
            Some(stream) => stream.borrow_mut().on_trailers(trailers),
            None => FilterTrailersStatus::Continue,
        }
    }

    fn set_encoder_filter_callbacks(&mut self, callbacks: Rc<dyn StreamEncoderFilterCallbacks>) {
        self.encoder_callbacks = Some(Rc::new(EncoderCallbacks::new(callbacks)));
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("script", &self.worker.config.name())
            .field("destroyed", &self.destroyed.get())
            .field("request_stream", &self.request_stream)
            .field("response_stream", &self.response_stream)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ScriptHandle;
    use crate::native::NativeScript;

    async fn noop(_handle: ScriptHandle) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_config_entry_points() {
        let script = NativeScript::new().on_request(noop).build();
        let config = FilterConfig::new("native", script);

        assert_eq!(config.name(), "native");
        assert!(config.request_entry_point().is_some());
        assert!(config.response_entry_point().is_none());
    }

    #[tokio::test]
    async fn test_load_compile_error() {
        let config = ScriptFilterConfig::new(octopus_config::ScriptSource::inline(
            "fn on_request(stream) { let x = ; }",
        ));
        assert!(FilterConfig::load(&config).await.is_err());
    }
}
