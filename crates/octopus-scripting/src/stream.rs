//! Per-direction stream handle
//!
//! A [`StreamHandle`] owns the script's execution context for one direction
//! of one stream and steps it in response to pipeline events and async call
//! completions. The execution context is a `!Send` future polled with a no-op
//! waker: it only makes progress when the handle polls it, and it only
//! returns `Pending` at a [`Suspend`] point that recorded why it is waiting.
//!
//! State the script can observe lives in [`StreamShared`], which the script
//! side reaches through [`ScriptHandle`](crate::ScriptHandle) and wrappers.
//! No `RefCell` borrow of that state is held while the script runs or while
//! host callbacks are invoked.

use crate::callbacks::{Direction, FilterCallbacks};
use crate::error::{Result, ScriptError};
use crate::handle::ScriptHandle;
use crate::http_call::LocalReply;
use crate::runtime::{EntryPoint, ScriptFuture};
use octopus_core::{
    AsyncCallback, AsyncRequest, Buffer, BufferRef, ClusterManager, FailureReason,
    FilterDataStatus, FilterHeadersStatus, FilterTrailersStatus, HeaderMapRef, HttpMessage,
};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, error, trace, warn};

/// Execution state of a stream handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    /// Script is executing, finished, or was never started
    Running,
    /// Suspended until the next body chunk or end of stream
    WaitForBodyChunk,
    /// Suspended until the whole body is buffered
    WaitForBody,
    /// Suspended until trailers arrive or the stream ends without them
    WaitForTrailers,
    /// Suspended on an outstanding http call
    HttpCall,
    /// A local response was sent; the script never runs again
    Responded,
}

impl State {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            State::Running => "running",
            State::WaitForBodyChunk => "wait_for_body_chunk",
            State::WaitForBody => "wait_for_body",
            State::WaitForTrailers => "wait_for_trailers",
            State::HttpCall => "http_call",
            State::Responded => "responded",
        }
    }

    /// Whether headers must be held while in this state
    fn holds_headers(self) -> bool {
        matches!(self, State::WaitForBody | State::HttpCall | State::Responded)
    }
}

/// Input a suspended script is resumed with
pub(crate) enum Resumed {
    /// Next body chunk, valid only for the current data event
    Chunk(Rc<RefCell<Buffer>>),
    /// Stream ended without the awaited item
    EndOfStream,
    /// Whole body is buffered by the host
    Body,
    /// Trailers arrived and are stored on the stream
    Trailers,
    /// Outstanding http call finished
    HttpCall(std::result::Result<HttpMessage, FailureReason>),
}

impl Resumed {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Resumed::Chunk(_) => "body chunk",
            Resumed::EndOfStream => "end of stream",
            Resumed::Body => "body",
            Resumed::Trailers => "trailers",
            Resumed::HttpCall(_) => "http call result",
        }
    }
}

/// Outstanding http call and the token its completion must match
pub(crate) struct PendingAsyncCall {
    pub(crate) token: u64,
    pub(crate) request: Box<dyn AsyncRequest>,
}

/// Mutable per-stream state
pub(crate) struct StreamInner {
    pub(crate) headers: HeaderMapRef,
    pub(crate) trailers: Option<HeaderMapRef>,
    pub(crate) end_stream: bool,
    pub(crate) saw_body: bool,
    pub(crate) buffered_body: bool,
    pub(crate) headers_continued: bool,
    pub(crate) resumed: Option<Resumed>,
    pub(crate) pending_call: Option<PendingAsyncCall>,
    next_call_token: u64,
}

/// State shared between a stream handle and the script it runs
pub(crate) struct StreamShared {
    direction: Direction,
    state: Cell<State>,
    live: Cell<bool>,
    pub(crate) inner: RefCell<StreamInner>,
    callbacks: Rc<dyn FilterCallbacks>,
    cluster_manager: Rc<dyn ClusterManager>,
    destroyed: Rc<Cell<bool>>,
    driver: Weak<RefCell<StreamHandle>>,
}

impl StreamShared {
    pub(crate) fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn state(&self) -> State {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: State) {
        trace!(
            direction = %self.direction,
            from = self.state.get().as_str(),
            to = state.as_str(),
            "Stream state change"
        );
        self.state.set(state);
    }

    /// Whether script code may touch stream data right now
    pub(crate) fn is_live(&self) -> bool {
        self.live.get() && !self.destroyed.get()
    }

    /// Fails once this direction has sent a local response
    pub(crate) fn ensure_active(&self, operation: &str) -> Result<()> {
        if self.state() == State::Responded {
            return Err(ScriptError::runtime(format!(
                "cannot use {operation} after respond()"
            )));
        }
        Ok(())
    }

    pub(crate) fn headers_continued(&self) -> bool {
        self.inner.borrow().headers_continued
    }

    pub(crate) fn callbacks(&self) -> &dyn FilterCallbacks {
        self.callbacks.as_ref()
    }

    pub(crate) fn cluster_manager(&self) -> &dyn ClusterManager {
        self.cluster_manager.as_ref()
    }

    pub(crate) fn buffered_body(&self) -> Option<BufferRef> {
        self.callbacks.buffered_body()
    }

    pub(crate) fn suspend(self: &Rc<Self>, reason: State) -> Suspend {
        Suspend {
            shared: Rc::clone(self),
            reason,
            waiting: false,
        }
    }

    fn take_resumed(&self) -> Option<Resumed> {
        self.inner.borrow_mut().resumed.take()
    }

    pub(crate) fn next_call_token(&self) -> u64 {
        let mut inner = self.inner.borrow_mut();
        inner.next_call_token += 1;
        inner.next_call_token
    }

    /// Drop the outstanding call, cancelling it with the client
    pub(crate) fn cancel_pending_call(&self) {
        let pending = self.inner.borrow_mut().pending_call.take();
        if let Some(mut call) = pending {
            debug!(
                direction = %self.direction,
                token = call.token,
                "Cancelling outstanding http call"
            );
            call.request.cancel();
        }
    }

    /// Completion routed back to this stream's handle for the call tagged `token`.
    ///
    /// The callback holds no strong reference to the handle. A completion that
    /// arrives after the filter was destroyed, after the handle was dropped, or
    /// for a call that is no longer outstanding is discarded.
    pub(crate) fn completion_callback(&self, token: u64) -> AsyncCallback {
        let driver = self.driver.clone();
        let destroyed = Rc::clone(&self.destroyed);
        let callbacks = Rc::clone(&self.callbacks);
        let direction = self.direction;

        Box::new(move |outcome| {
            if destroyed.get() {
                debug!(%direction, token, "Dropping http call completion for destroyed stream");
                return;
            }
            let Some(cell) = driver.upgrade() else {
                debug!(%direction, token, "Dropping http call completion for released stream");
                return;
            };
            let Ok(mut handle) = cell.try_borrow_mut() else {
                error!(%direction, token, "Http call completed while the stream was busy");
                return;
            };
            let continue_iteration = handle.on_http_call_complete(token, outcome);
            drop(handle);
            if continue_iteration {
                callbacks.continue_iteration();
            }
        })
    }
}

impl fmt::Debug for StreamShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamShared")
            .field("direction", &self.direction)
            .field("state", &self.state.get())
            .field("live", &self.live.get())
            .finish_non_exhaustive()
    }
}

/// Suspension point: completes once the stream resumes it with a typed input
#[derive(Debug)]
pub(crate) struct Suspend {
    shared: Rc<StreamShared>,
    reason: State,
    waiting: bool,
}

impl Future for Suspend {
    type Output = Result<Resumed>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.waiting {
            return match self.shared.state() {
                State::Running => {
                    self.shared.set_state(self.reason);
                    self.waiting = true;
                    Poll::Pending
                }
                State::Responded => Poll::Ready(Err(ScriptError::runtime(format!(
                    "cannot wait in state {} after respond()",
                    self.reason.as_str()
                )))),
                current => Poll::Ready(Err(ScriptError::runtime(format!(
                    "cannot wait in state {} while already waiting in state {}",
                    self.reason.as_str(),
                    current.as_str()
                )))),
            };
        }

        match self.shared.take_resumed() {
            Some(value) => {
                self.waiting = false;
                Poll::Ready(Ok(value))
            }
            None => Poll::Pending,
        }
    }
}

impl Drop for Suspend {
    fn drop(&mut self) {
        // an abandoned wait must not leave the stream holding events for it
        if self.waiting && self.shared.state() == self.reason {
            self.shared.set_state(State::Running);
        }
    }
}

/// Drives one direction's script against pipeline events
pub(crate) struct StreamHandle {
    shared: Rc<StreamShared>,
    coroutine: Option<ScriptFuture>,
}

impl StreamHandle {
    pub(crate) fn new(
        direction: Direction,
        headers: &HeaderMapRef,
        end_stream: bool,
        callbacks: Rc<dyn FilterCallbacks>,
        cluster_manager: Rc<dyn ClusterManager>,
        destroyed: Rc<Cell<bool>>,
    ) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|driver| {
            let shared = StreamShared {
                direction,
                state: Cell::new(State::Running),
                live: Cell::new(false),
                inner: RefCell::new(StreamInner {
                    headers: Rc::clone(headers),
                    trailers: None,
                    end_stream,
                    saw_body: false,
                    buffered_body: false,
                    headers_continued: false,
                    resumed: None,
                    pending_call: None,
                    next_call_token: 0,
                }),
                callbacks,
                cluster_manager,
                destroyed,
                driver: driver.clone(),
            };
            RefCell::new(Self {
                shared: Rc::new(shared),
                coroutine: None,
            })
        })
    }

    /// Run the entry point against the stream's headers
    pub(crate) fn start(&mut self, entry: &Arc<dyn EntryPoint>) -> FilterHeadersStatus {
        debug_assert!(self.coroutine.is_none(), "stream handle started twice");
        debug!(direction = %self.shared.direction, "Starting script");

        let handle = ScriptHandle::new(Rc::clone(&self.shared));
        self.coroutine = Some(entry.invoke(handle));
        self.run();

        if self.shared.state().holds_headers() {
            FilterHeadersStatus::StopIteration
        } else {
            self.shared.inner.borrow_mut().headers_continued = true;
            FilterHeadersStatus::Continue
        }
    }

    pub(crate) fn on_data(&mut self, data: &mut Buffer, end_stream: bool) -> FilterDataStatus {
        {
            let mut inner = self.shared.inner.borrow_mut();
            debug_assert!(!inner.end_stream, "data after end of stream");
            inner.end_stream = end_stream;
            inner.saw_body = true;
        }

        match self.shared.state() {
            State::WaitForBodyChunk => {
                trace!(direction = %self.shared.direction, len = data.len(), "Resuming for body chunk");
                let chunk = Rc::new(RefCell::new(std::mem::take(data)));
                self.resume(Resumed::Chunk(Rc::clone(&chunk)));
                // any wrapper the script kept now points at a dropped cell
                *data = std::mem::take(&mut *chunk.borrow_mut());
            }
            State::WaitForBody if end_stream => {
                debug!(direction = %self.shared.direction, "Resuming body due to end stream");
                self.shared.callbacks.add_data(data);
                self.resume(Resumed::Body);
            }
            State::WaitForTrailers if end_stream => {
                debug!(direction = %self.shared.direction, "Resuming nil trailers due to end stream");
                self.resume(Resumed::EndOfStream);
            }
            State::Responded => {
                debug!(direction = %self.shared.direction, len = data.len(), "Dropping body data after local response");
                return FilterDataStatus::StopIterationNoBuffer;
            }
            _ => {}
        }

        match self.shared.state() {
            State::HttpCall | State::WaitForBody => {
                trace!(direction = %self.shared.direction, "Buffering body");
                self.shared.inner.borrow_mut().buffered_body = true;
                FilterDataStatus::StopIterationAndBuffer
            }
            State::Responded => FilterDataStatus::StopIterationNoBuffer,
            _ => {
                self.shared.inner.borrow_mut().headers_continued = true;
                FilterDataStatus::Continue
            }
        }
    }

    pub(crate) fn on_trailers(&mut self, trailers: &HeaderMapRef) -> FilterTrailersStatus {
        {
            let mut inner = self.shared.inner.borrow_mut();
            inner.end_stream = true;
            inner.trailers = Some(Rc::clone(trailers));
        }

        match self.shared.state() {
            State::WaitForBodyChunk => {
                debug!(direction = %self.shared.direction, "Resuming body chunks due to trailers");
                self.resume(Resumed::EndOfStream);
            }
            State::WaitForBody => {
                debug!(direction = %self.shared.direction, "Resuming body due to trailers");
                self.resume(Resumed::Body);
            }
            State::Responded => {
                debug!(direction = %self.shared.direction, "Ignoring trailers after local response");
                return FilterTrailersStatus::StopIteration;
            }
            _ => {}
        }

        // the script may have moved on to waiting for the trailers themselves
        if self.shared.state() == State::WaitForTrailers {
            debug!(direction = %self.shared.direction, "Resuming with trailers");
            self.resume(Resumed::Trailers);
        }

        match self.shared.state() {
            State::HttpCall | State::Responded => FilterTrailersStatus::StopIteration,
            _ => {
                self.shared.inner.borrow_mut().headers_continued = true;
                FilterTrailersStatus::Continue
            }
        }
    }

    /// Deliver the outcome of the call tagged `token`.
    ///
    /// Returns whether the host should continue iteration on this path.
    pub(crate) fn on_http_call_complete(
        &mut self,
        token: u64,
        outcome: std::result::Result<HttpMessage, FailureReason>,
    ) -> bool {
        let matched = {
            let mut inner = self.shared.inner.borrow_mut();
            let matched = inner
                .pending_call
                .as_ref()
                .is_some_and(|call| call.token == token);
            if matched {
                inner.pending_call = None;
            }
            matched
        };
        if !matched {
            debug!(direction = %self.shared.direction, token, "Dropping stale http call completion");
            return false;
        }
        if self.shared.state() != State::HttpCall {
            debug!(direction = %self.shared.direction, token, "Http call completed after the script stopped waiting");
            return false;
        }

        debug!(
            direction = %self.shared.direction,
            token,
            success = outcome.is_ok(),
            "Resuming script after http call"
        );
        self.resume(Resumed::HttpCall(outcome));

        if self.shared.state().holds_headers() {
            false
        } else {
            self.shared.inner.borrow_mut().headers_continued = true;
            true
        }
    }

    /// Stream is going away: drop the script and cancel any outstanding call
    pub(crate) fn on_reset(&mut self) {
        if self.coroutine.is_some() {
            debug!(
                direction = %self.shared.direction,
                state = self.shared.state().as_str(),
                "Resetting suspended script"
            );
        }
        self.finish();
    }

    fn resume(&mut self, value: Resumed) {
        self.shared.set_state(State::Running);
        self.shared.inner.borrow_mut().resumed = Some(value);
        self.run();
    }

    fn run(&mut self) {
        if let Err(err) = self.drive() {
            self.script_error(err);
        }
    }

    fn drive(&mut self) -> Result<()> {
        let Some(coroutine) = self.coroutine.as_mut() else {
            return Ok(());
        };

        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        self.shared.live.set(true);
        let poll = coroutine.as_mut().poll(&mut cx);
        self.shared.live.set(false);
        self.shared.inner.borrow_mut().resumed = None;

        match poll {
            Poll::Ready(result) => {
                trace!(direction = %self.shared.direction, ok = result.is_ok(), "Script finished");
                self.finish();
                result
            }
            Poll::Pending => match self.shared.state() {
                State::Running => {
                    self.finish();
                    Err(ScriptError::runtime(
                        "script awaited a future that is not driven by the stream",
                    ))
                }
                State::Responded => {
                    trace!(direction = %self.shared.direction, "Script stopped after local response");
                    self.finish();
                    Ok(())
                }
                state => {
                    trace!(direction = %self.shared.direction, state = state.as_str(), "Script suspended");
                    Ok(())
                }
            },
        }
    }

    fn finish(&mut self) {
        self.coroutine = None;
        self.shared.cancel_pending_call();
    }

    fn script_error(&mut self, err: ScriptError) {
        error!(direction = %self.shared.direction, error = %err, "Script error");
        self.finish();
        if self.shared.state() == State::Responded {
            return;
        }

        self.shared.set_state(State::Responded);
        if self.shared.headers_continued() {
            // headers already left this filter; a second header block is not possible
            warn!(
                direction = %self.shared.direction,
                "Script failed after headers were continued, stopping iteration without a local response"
            );
            return;
        }
        let (headers, body) = LocalReply::script_error().into_parts();
        self.shared.callbacks.respond(headers, body);
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("shared", &self.shared)
            .field("suspended", &self.coroutine.is_some())
            .finish()
    }
}
