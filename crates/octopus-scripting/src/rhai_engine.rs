//! Rhai script runtime
//!
//! Rhai cannot suspend a running script, so every execution context runs its
//! entry function on a dedicated thread. The script thread and the stream's
//! driver future exchange strictly alternating messages: the script sends one
//! [`Call`] and blocks until the driver replies, and the driver blocks while
//! the script computes. Only one side runs at any time, so a Rhai script sees
//! the same cooperative execution as a native one and may wait on the stream
//! wherever it likes.
//!
//! Stream data never crosses to the script thread by reference. The driver
//! keeps wrappers in tables and the script refers to them by index. Dropping
//! the driver closes the channel; the script's next call then terminates it.
//!
//! ```rhai
//! fn on_request(stream) {
//!     let headers = stream.headers();
//!     let reply = stream.http_call("auth", #{
//!         ":method": "POST",
//!         ":path": "/check",
//!         ":authority": "auth",
//!     }, (), 500);
//!     if reply.headers[":status"] != "200" {
//!         stream.respond(#{ ":status": "403" }, "denied");
//!     }
//!     headers.add("x-checked", "true");
//! }
//! ```

use crate::error::{Result, ScriptError};
use crate::handle::{BodyChunks, LogLevel, ScriptHandle};
use crate::http_call::{HttpCallRequest, HttpCallResponse, LocalReply};
use crate::runtime::{CompiledScript, EntryPoint, ScriptFuture, ScriptRuntime};
use crate::wrappers::{BodyHandle, HeadersHandle};
use async_trait::async_trait;
use bytes::Bytes;
use octopus_config::{ScriptFilterConfig, ScriptLanguage, ScriptLimits};
use octopus_core::{FailureReason, HeaderMap};
use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult, Map, Position, Scope, AST};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

type RhaiResult<T> = std::result::Result<T, Box<EvalAltResult>>;

/// Rhai runtime sharing one configured engine between all scripts it loads
///
/// Every script execution holds one of `max_script_threads` permits for as
/// long as its thread runs. An execution that cannot get a permit fails as a
/// script error.
#[derive(Debug, Clone)]
pub struct RhaiRuntime {
    engine: Arc<Engine>,
    threads: Arc<Semaphore>,
    max_threads: usize,
    stack_size: usize,
}

impl RhaiRuntime {
    /// Create a runtime with default limits
    pub fn new() -> Self {
        Self::with_limits(&ScriptLimits::default())
    }

    /// Create a runtime with custom limits
    pub fn with_limits(limits: &ScriptLimits) -> Self {
        let mut engine = Engine::new();

        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
        engine.set_max_operations(limits.max_operations);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(10_000);

        engine.on_print(|text| debug!(target: "octopus::script", "{text}"));
        Self::register_api(&mut engine);

        Self {
            engine: Arc::new(engine),
            threads: Arc::new(Semaphore::new(limits.max_script_threads)),
            max_threads: limits.max_script_threads,
            stack_size: limits.script_stack_size,
        }
    }

    /// Script executions currently holding a thread
    pub fn active_threads(&self) -> usize {
        self.max_threads - self.threads.available_permits()
    }

    /// Register the stream API
    fn register_api(engine: &mut Engine) {
        engine
            .register_type_with_name::<RhaiStream>("Stream")
            .register_fn("headers", RhaiStream::headers)
            .register_fn("body", RhaiStream::body)
            .register_fn("body_chunks", RhaiStream::body_chunks)
            .register_fn("trailers", RhaiStream::trailers)
            .register_fn("log", RhaiStream::log)
            .register_fn("http_call", RhaiStream::http_call)
            .register_fn("respond", RhaiStream::respond);

        engine
            .register_type_with_name::<RhaiHeaders>("Headers")
            .register_fn("get", RhaiHeaders::get)
            .register_fn("get_all", RhaiHeaders::get_all)
            .register_fn("add", RhaiHeaders::add)
            .register_fn("replace", RhaiHeaders::replace)
            .register_fn("remove", RhaiHeaders::remove)
            .register_fn("to_map", RhaiHeaders::to_map);

        engine
            .register_type_with_name::<RhaiBody>("Body")
            .register_fn("length", RhaiBody::length)
            .register_fn("get_bytes", RhaiBody::get_bytes)
            .register_fn("to_string", RhaiBody::text)
            .register_fn("set_bytes", RhaiBody::set_blob)
            .register_fn("set_bytes", RhaiBody::set_text);

        engine
            .register_type_with_name::<RhaiBodyChunks>("BodyChunks")
            .register_iterator::<RhaiBodyChunks>();
    }

    /// Compile `code` and resolve its entry functions.
    ///
    /// A missing entry function leaves that direction without an entry point.
    pub fn compile(
        &self,
        name: &str,
        code: &str,
        request_function: &str,
        response_function: &str,
    ) -> Result<CompiledScript> {
        let ast = Arc::new(self.engine.compile(code)?);

        Ok(CompiledScript {
            request: self.entry_point(name, &ast, request_function)?,
            response: self.entry_point(name, &ast, response_function)?,
        })
    }

    fn entry_point(
        &self,
        name: &str,
        ast: &Arc<AST>,
        function: &str,
    ) -> Result<Option<Arc<dyn EntryPoint>>> {
        let arities: Vec<usize> = ast
            .iter_functions()
            .filter(|f| f.name == function)
            .map(|f| f.params.len())
            .collect();
        if arities.is_empty() {
            debug!(script = name, function, "Entry function not defined");
            return Ok(None);
        }
        if !arities.contains(&1) {
            return Err(ScriptError::config(format!(
                "entry function '{function}' in script '{name}' must take exactly one parameter"
            )));
        }

        Ok(Some(Arc::new(RhaiEntryPoint {
            engine: Arc::clone(&self.engine),
            ast: Arc::clone(ast),
            function: function.to_string(),
            threads: Arc::clone(&self.threads),
            max_threads: self.max_threads,
            stack_size: self.stack_size,
        })))
    }
}

impl Default for RhaiRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptRuntime for RhaiRuntime {
    fn language(&self) -> ScriptLanguage {
        ScriptLanguage::Rhai
    }

    async fn load(&self, config: &ScriptFilterConfig) -> Result<CompiledScript> {
        let name = config.source.name();
        let code = config.source.load_code().await?;
        let script = self.compile(
            &name,
            &code,
            &config.request_function,
            &config.response_function,
        )?;

        debug!(
            script = %name,
            request = script.request.is_some(),
            response = script.response.is_some(),
            "Rhai script compiled"
        );
        Ok(script)
    }
}

/// Compiled Rhai entry function
struct RhaiEntryPoint {
    engine: Arc<Engine>,
    ast: Arc<AST>,
    function: String,
    threads: Arc<Semaphore>,
    max_threads: usize,
    stack_size: usize,
}

impl EntryPoint for RhaiEntryPoint {
    fn invoke(&self, handle: ScriptHandle) -> ScriptFuture {
        let engine = Arc::clone(&self.engine);
        let ast = Arc::clone(&self.ast);
        let function = self.function.clone();
        let threads = Arc::clone(&self.threads);
        let max_threads = self.max_threads;
        let stack_size = self.stack_size;

        Box::pin(async move {
            let permit = threads.try_acquire_owned().map_err(|_| {
                ScriptError::runtime(format!(
                    "script thread limit of {max_threads} reached, not running '{function}'"
                ))
            })?;

            let (calls_tx, calls) = mpsc::channel();
            let (replies, replies_rx) = mpsc::channel();
            let link = Arc::new(ScriptLink {
                calls: Mutex::new(calls_tx),
                replies: Mutex::new(replies_rx),
                deferred: Mutex::new(None),
            });

            thread::Builder::new()
                .name(format!("rhai-{function}"))
                .stack_size(stack_size)
                .spawn(move || run_script(&engine, &ast, &function, link, permit))?;

            Bridge::new(handle).serve(calls, replies).await
        })
    }
}

impl fmt::Debug for RhaiEntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiEntryPoint")
            .field("function", &self.function)
            .finish_non_exhaustive()
    }
}

/// Script thread body
fn run_script(
    engine: &Engine,
    ast: &AST,
    function: &str,
    link: Arc<ScriptLink>,
    permit: OwnedSemaphorePermit,
) {
    let stream = RhaiStream {
        link: Arc::clone(&link),
    };
    let outcome = engine.call_fn::<Dynamic>(&mut Scope::new(), ast, function, (stream,));
    let outcome = match (outcome, link.take_deferred()) {
        (Err(err), _) | (Ok(_), Some(err)) => Err(ScriptError::from(err)),
        (Ok(_), None) => Ok(()),
    };

    // the slot is free by the time the driver sees `Finished`
    drop(permit);
    if !link.send(ToDriver::Finished(outcome)) {
        trace!(function, "Script finished after its stream was released");
    }
}

/// Operation on a headers table entry
#[derive(Debug)]
enum HeaderOp {
    Get(String),
    GetAll(String),
    Add(String, String),
    Replace(String, String),
    Remove(String),
    Entries,
}

/// Operation on a body table entry
#[derive(Debug)]
enum BodyOp {
    Length,
    GetBytes(usize, usize),
    Bytes,
    SetBytes(Vec<u8>),
}

/// Request from the script thread
#[derive(Debug)]
enum Call {
    Headers,
    Body,
    BodyChunks,
    NextChunk(usize),
    Trailers,
    Log(i64, String),
    HttpCall(HttpCallRequest),
    Respond(LocalReply),
    Header(usize, HeaderOp),
    Buffer(usize, BodyOp),
}

/// Driver's answer to a [`Call`]
#[derive(Debug)]
enum Reply {
    Unit,
    Headers(usize),
    MaybeHeaders(Option<usize>),
    MaybeBody(Option<usize>),
    Chunks(usize),
    Value(Option<String>),
    Values(Vec<String>),
    Entries(Vec<(String, String)>),
    Length(usize),
    Bytes(Bytes),
    HttpCall(std::result::Result<HttpCallResponse, FailureReason>),
}

#[derive(Debug)]
enum ToDriver {
    Call(Call),
    Finished(Result<()>),
}

/// Script thread's end of the channel pair
#[derive(Debug)]
struct ScriptLink {
    calls: Mutex<Sender<ToDriver>>,
    replies: Mutex<Receiver<Result<Reply>>>,
    /// Error raised while iterating body chunks, reported at the next call
    deferred: Mutex<Option<Box<EvalAltResult>>>,
}

impl ScriptLink {
    fn send(&self, message: ToDriver) -> bool {
        self.calls
            .lock()
            .map(|calls| calls.send(message).is_ok())
            .unwrap_or(false)
    }

    fn call(&self, call: Call) -> RhaiResult<Reply> {
        if let Some(err) = self.take_deferred() {
            return Err(err);
        }
        if !self.send(ToDriver::Call(call)) {
            return Err(terminated());
        }

        let replies = self.replies.lock().map_err(|_| terminated())?;
        match replies.recv() {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => Err(err.to_string().into()),
            Err(_) => Err(terminated()),
        }
    }

    fn defer(&self, err: Box<EvalAltResult>) {
        if let Ok(mut deferred) = self.deferred.lock() {
            deferred.get_or_insert(err);
        }
    }

    fn take_deferred(&self) -> Option<Box<EvalAltResult>> {
        self.deferred.lock().ok().and_then(|mut deferred| deferred.take())
    }
}

/// Uncatchable error that stops the script
fn terminated() -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorTerminated(Dynamic::UNIT, Position::NONE))
}

fn unexpected(reply: Reply) -> Box<EvalAltResult> {
    format!("unexpected reply from stream: {reply:?}").into()
}

/// Driver side: runs calls against the stream inside the execution context
#[derive(Debug)]
struct Bridge {
    handle: ScriptHandle,
    headers: Vec<HeadersHandle>,
    bodies: Vec<BodyHandle>,
    chunks: Vec<BodyChunks>,
}

impl Bridge {
    fn new(handle: ScriptHandle) -> Self {
        Self {
            handle,
            headers: Vec::new(),
            bodies: Vec::new(),
            chunks: Vec::new(),
        }
    }

    async fn serve(
        mut self,
        calls: Receiver<ToDriver>,
        replies: Sender<Result<Reply>>,
    ) -> Result<()> {
        loop {
            let call = match calls.recv() {
                Ok(ToDriver::Call(call)) => call,
                Ok(ToDriver::Finished(outcome)) => return outcome,
                Err(_) => return Err(ScriptError::runtime("script thread exited unexpectedly")),
            };

            let responding = matches!(call, Call::Respond(_));
            let reply = self.dispatch(call).await;
            // a local response ends the script; its thread terminates on the closed channel
            if responding && reply.is_ok() {
                return Ok(());
            }
            if replies.send(reply).is_err() {
                return Err(ScriptError::runtime("script thread exited unexpectedly"));
            }
        }
    }

    async fn dispatch(&mut self, call: Call) -> Result<Reply> {
        match call {
            Call::Headers => {
                let headers = self.handle.headers();
                Ok(Reply::Headers(push(&mut self.headers, headers)))
            }
            Call::Body => {
                let body = self.handle.body().await?;
                Ok(Reply::MaybeBody(body.map(|body| push(&mut self.bodies, body))))
            }
            Call::BodyChunks => {
                let chunks = self.handle.body_chunks()?;
                Ok(Reply::Chunks(push(&mut self.chunks, chunks)))
            }
            Call::NextChunk(id) => {
                let chunk = entry_mut(&mut self.chunks, id, "body chunks")?
                    .next()
                    .await?;
                Ok(Reply::MaybeBody(chunk.map(|chunk| push(&mut self.bodies, chunk))))
            }
            Call::Trailers => {
                let trailers = self.handle.trailers().await?;
                Ok(Reply::MaybeHeaders(
                    trailers.map(|trailers| push(&mut self.headers, trailers)),
                ))
            }
            Call::Log(level, message) => {
                self.handle.log(LogLevel::try_from(level)?, &message);
                Ok(Reply::Unit)
            }
            Call::HttpCall(request) => Ok(Reply::HttpCall(self.handle.http_call(request).await?)),
            Call::Respond(reply) => {
                self.handle.respond(reply)?;
                Ok(Reply::Unit)
            }
            Call::Header(id, op) => {
                let headers = entry_mut(&mut self.headers, id, "headers")?;
                match op {
                    HeaderOp::Get(name) => headers.get(&name).map(Reply::Value),
                    HeaderOp::GetAll(name) => headers.get_all(&name).map(Reply::Values),
                    HeaderOp::Add(name, value) => headers.add(&name, &value).map(|_| Reply::Unit),
                    HeaderOp::Replace(name, value) => {
                        headers.replace(&name, &value).map(|_| Reply::Unit)
                    }
                    HeaderOp::Remove(name) => headers.remove(&name).map(|_| Reply::Unit),
                    HeaderOp::Entries => headers.entries().map(Reply::Entries),
                }
            }
            Call::Buffer(id, op) => {
                let body = entry_mut(&mut self.bodies, id, "body")?;
                match op {
                    BodyOp::Length => body.length().map(Reply::Length),
                    BodyOp::GetBytes(start, len) => body.get_bytes(start, len).map(Reply::Bytes),
                    BodyOp::Bytes => body.bytes().map(Reply::Bytes),
                    BodyOp::SetBytes(data) => body.set_bytes(&data).map(|_| Reply::Unit),
                }
            }
        }
    }
}

fn push<T>(table: &mut Vec<T>, value: T) -> usize {
    table.push(value);
    table.len() - 1
}

fn entry_mut<'a, T>(table: &'a mut [T], id: usize, object: &'static str) -> Result<&'a mut T> {
    table.get_mut(id).ok_or_else(|| ScriptError::expired(object))
}

/// Convert a script map into headers. Array values add one header per element.
fn header_map(map: Map) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in map {
        let values = if value.is_array() {
            value.into_array().unwrap_or_default()
        } else {
            vec![value]
        };
        for value in values {
            headers.add(name.as_str(), value.to_string());
        }
    }
    headers
}

/// `()` is no body; blobs are taken as is; anything else as its string form
fn body_bytes(body: Dynamic) -> Option<Bytes> {
    if body.is_unit() {
        None
    } else if body.is_blob() {
        body.into_blob().ok().map(Bytes::from)
    } else {
        Some(Bytes::from(body.to_string()))
    }
}

fn text(bytes: &[u8]) -> Dynamic {
    String::from_utf8_lossy(bytes).into_owned().into()
}

fn index(value: i64, what: &str) -> RhaiResult<usize> {
    usize::try_from(value).map_err(|_| format!("{what} must be >= 0, got {value}").into())
}

/// Stream object passed to entry functions
#[derive(Debug, Clone)]
struct RhaiStream {
    link: Arc<ScriptLink>,
}

impl RhaiStream {
    fn headers(&mut self) -> RhaiResult<RhaiHeaders> {
        match self.link.call(Call::Headers)? {
            Reply::Headers(id) => Ok(RhaiHeaders::new(&self.link, id)),
            reply => Err(unexpected(reply)),
        }
    }

    fn body(&mut self) -> RhaiResult<Dynamic> {
        match self.link.call(Call::Body)? {
            Reply::MaybeBody(Some(id)) => Ok(Dynamic::from(RhaiBody::new(&self.link, id))),
            Reply::MaybeBody(None) => Ok(Dynamic::UNIT),
            reply => Err(unexpected(reply)),
        }
    }

    fn body_chunks(&mut self) -> RhaiResult<RhaiBodyChunks> {
        match self.link.call(Call::BodyChunks)? {
            Reply::Chunks(id) => Ok(RhaiBodyChunks {
                link: Arc::clone(&self.link),
                id,
            }),
            reply => Err(unexpected(reply)),
        }
    }

    fn trailers(&mut self) -> RhaiResult<Dynamic> {
        match self.link.call(Call::Trailers)? {
            Reply::MaybeHeaders(Some(id)) => Ok(Dynamic::from(RhaiHeaders::new(&self.link, id))),
            Reply::MaybeHeaders(None) => Ok(Dynamic::UNIT),
            reply => Err(unexpected(reply)),
        }
    }

    fn log(&mut self, level: i64, message: &str) -> RhaiResult<()> {
        self.link
            .call(Call::Log(level, message.to_string()))
            .map(|_| ())
    }

    fn http_call(
        &mut self,
        cluster: &str,
        headers: Map,
        body: Dynamic,
        timeout_ms: i64,
    ) -> RhaiResult<Map> {
        let request = HttpCallRequest::new(cluster, header_map(headers), body_bytes(body), timeout_ms)
            .map_err(|err| -> Box<EvalAltResult> { err.to_string().into() })?;

        let mut result = Map::new();
        match self.link.call(Call::HttpCall(request))? {
            Reply::HttpCall(Ok(response)) => {
                let mut headers = Map::new();
                for (name, value) in response.headers.iter() {
                    headers.entry(name.into()).or_insert_with(|| value.into());
                }
                result.insert("headers".into(), headers.into());
                result.insert(
                    "body".into(),
                    response.body.as_deref().map_or(Dynamic::UNIT, text),
                );
            }
            Reply::HttpCall(Err(reason)) => {
                result.insert("error".into(), reason.as_str().into());
            }
            reply => return Err(unexpected(reply)),
        }
        Ok(result)
    }

    fn respond(&mut self, headers: Map, body: Dynamic) -> RhaiResult<()> {
        let reply = LocalReply::new(header_map(headers), body_bytes(body))
            .map_err(|err| -> Box<EvalAltResult> { err.to_string().into() })?;
        self.link.call(Call::Respond(reply))?;
        Err(terminated())
    }
}

/// Headers or trailers handle
#[derive(Debug, Clone)]
struct RhaiHeaders {
    link: Arc<ScriptLink>,
    id: usize,
}

impl RhaiHeaders {
    fn new(link: &Arc<ScriptLink>, id: usize) -> Self {
        Self {
            link: Arc::clone(link),
            id,
        }
    }

    fn call(&self, op: HeaderOp) -> RhaiResult<Reply> {
        self.link.call(Call::Header(self.id, op))
    }

    fn get(&mut self, name: &str) -> RhaiResult<Dynamic> {
        match self.call(HeaderOp::Get(name.to_string()))? {
            Reply::Value(value) => Ok(value.map_or(Dynamic::UNIT, Dynamic::from)),
            reply => Err(unexpected(reply)),
        }
    }

    fn get_all(&mut self, name: &str) -> RhaiResult<Array> {
        match self.call(HeaderOp::GetAll(name.to_string()))? {
            Reply::Values(values) => Ok(values.into_iter().map(Dynamic::from).collect()),
            reply => Err(unexpected(reply)),
        }
    }

    fn add(&mut self, name: &str, value: &str) -> RhaiResult<()> {
        self.call(HeaderOp::Add(name.to_string(), value.to_string()))
            .map(|_| ())
    }

    fn replace(&mut self, name: &str, value: &str) -> RhaiResult<()> {
        self.call(HeaderOp::Replace(name.to_string(), value.to_string()))
            .map(|_| ())
    }

    fn remove(&mut self, name: &str) -> RhaiResult<()> {
        self.call(HeaderOp::Remove(name.to_string())).map(|_| ())
    }

    /// First value per name
    fn to_map(&mut self) -> RhaiResult<Map> {
        match self.call(HeaderOp::Entries)? {
            Reply::Entries(entries) => {
                let mut map = Map::new();
                for (name, value) in entries {
                    map.entry(name.into()).or_insert_with(|| value.into());
                }
                Ok(map)
            }
            reply => Err(unexpected(reply)),
        }
    }
}

/// Body or body chunk handle
#[derive(Debug, Clone)]
struct RhaiBody {
    link: Arc<ScriptLink>,
    id: usize,
}

impl RhaiBody {
    fn new(link: &Arc<ScriptLink>, id: usize) -> Self {
        Self {
            link: Arc::clone(link),
            id,
        }
    }

    fn call(&self, op: BodyOp) -> RhaiResult<Reply> {
        self.link.call(Call::Buffer(self.id, op))
    }

    fn length(&mut self) -> RhaiResult<i64> {
        match self.call(BodyOp::Length)? {
            Reply::Length(len) => Ok(i64::try_from(len).unwrap_or(i64::MAX)),
            reply => Err(unexpected(reply)),
        }
    }

    fn get_bytes(&mut self, start: i64, len: i64) -> RhaiResult<Blob> {
        let op = BodyOp::GetBytes(index(start, "start")?, index(len, "length")?);
        match self.call(op)? {
            Reply::Bytes(bytes) => Ok(bytes.to_vec()),
            reply => Err(unexpected(reply)),
        }
    }

    fn text(&mut self) -> RhaiResult<String> {
        match self.call(BodyOp::Bytes)? {
            Reply::Bytes(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            reply => Err(unexpected(reply)),
        }
    }

    fn set_blob(&mut self, data: Blob) -> RhaiResult<()> {
        self.call(BodyOp::SetBytes(data)).map(|_| ())
    }

    fn set_text(&mut self, data: &str) -> RhaiResult<()> {
        self.call(BodyOp::SetBytes(data.as_bytes().to_vec()))
            .map(|_| ())
    }
}

/// Iterable over body chunks
#[derive(Debug, Clone)]
struct RhaiBodyChunks {
    link: Arc<ScriptLink>,
    id: usize,
}

impl IntoIterator for RhaiBodyChunks {
    type Item = RhaiBody;
    type IntoIter = ChunkIter;

    fn into_iter(self) -> ChunkIter {
        ChunkIter {
            chunks: self,
            done: false,
        }
    }
}

#[derive(Debug)]
struct ChunkIter {
    chunks: RhaiBodyChunks,
    done: bool,
}

impl Iterator for ChunkIter {
    type Item = RhaiBody;

    fn next(&mut self) -> Option<RhaiBody> {
        if self.done {
            return None;
        }
        let link = &self.chunks.link;
        let outcome = match link.call(Call::NextChunk(self.chunks.id)) {
            Ok(Reply::MaybeBody(Some(id))) => Some(RhaiBody::new(link, id)),
            Ok(Reply::MaybeBody(None)) => None,
            Ok(reply) => {
                link.defer(unexpected(reply));
                None
            }
            Err(err) => {
                // iterators cannot fail; the error surfaces at the next call
                link.defer(err);
                None
            }
        };
        self.done = outcome.is_none();
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_finds_entry_points() {
        let runtime = RhaiRuntime::new();
        let script = runtime
            .compile(
                "test",
                "fn on_request(stream) { stream.log(2, \"hi\"); }",
                "on_request",
                "on_response",
            )
            .unwrap();

        assert!(script.request.is_some());
        assert!(script.response.is_none());
    }

    #[test]
    fn test_compile_error() {
        let runtime = RhaiRuntime::new();
        let err = runtime
            .compile("test", "fn on_request(stream) {", "on_request", "on_response")
            .unwrap_err();
        assert!(matches!(err, ScriptError::CompilationError { .. }));
    }

    #[test]
    fn test_entry_point_arity() {
        let runtime = RhaiRuntime::new();
        let err = runtime
            .compile("test", "fn on_request() { }", "on_request", "on_response")
            .unwrap_err();
        assert!(matches!(err, ScriptError::ConfigError { .. }));
    }

    #[test]
    fn test_header_map_conversion() {
        let mut map = Map::new();
        map.insert(":status".into(), Dynamic::from(200_i64));
        map.insert(
            "set-cookie".into(),
            Dynamic::from(vec![Dynamic::from("a=1"), Dynamic::from("b=2")]),
        );

        let headers = header_map(map);
        assert_eq!(headers.status(), Some("200"));
        assert_eq!(headers.get_all("set-cookie").count(), 2);
    }

    #[test]
    fn test_body_bytes_conversion() {
        assert_eq!(body_bytes(Dynamic::UNIT), None);
        assert_eq!(
            body_bytes(Dynamic::from("ok")).as_deref(),
            Some(&b"ok"[..])
        );
        assert_eq!(
            body_bytes(Dynamic::from_blob(vec![1, 2])).as_deref(),
            Some(&[1_u8, 2][..])
        );
    }

    #[tokio::test]
    async fn test_load_inline() {
        let config = ScriptFilterConfig::new(octopus_config::ScriptSource::inline(
            "fn on_response(stream) { }",
        ));
        let script = RhaiRuntime::new().load(&config).await.unwrap();
        assert!(script.request.is_none());
        assert!(script.response.is_some());
    }
}
