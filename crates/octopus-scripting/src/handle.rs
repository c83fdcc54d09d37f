//! API a script uses to interact with its stream
//!
//! Calls that wait on the stream (`body`, `BodyChunks::next`, `trailers`,
//! `http_call`) are async and must be awaited directly by the entry point's
//! future. Awaiting anything else that pends is a script error.

use crate::callbacks::Direction;
use crate::error::{Result, ScriptError};
use crate::http_call::{HttpCallRequest, HttpCallResponse, LocalReply};
use crate::stream::{PendingAsyncCall, Resumed, State, StreamShared};
use crate::wrappers::{BodyHandle, HeadersHandle};
use octopus_core::FailureReason;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, error, info, trace, warn};

/// Severity of a script log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Level 0
    Trace,
    /// Level 1
    Debug,
    /// Level 2
    Info,
    /// Level 3
    Warn,
    /// Level 4
    Error,
    /// Level 5
    Critical,
}

impl TryFrom<i64> for LogLevel {
    type Error = ScriptError;

    fn try_from(level: i64) -> Result<Self> {
        match level {
            0 => Ok(LogLevel::Trace),
            1 => Ok(LogLevel::Debug),
            2 => Ok(LogLevel::Info),
            3 => Ok(LogLevel::Warn),
            4 => Ok(LogLevel::Error),
            5 => Ok(LogLevel::Critical),
            _ => Err(ScriptError::invalid_argument(format!(
                "log level must be between 0 and 5, got {level}"
            ))),
        }
    }
}

/// Handle given to a script's entry point
#[derive(Clone)]
pub struct ScriptHandle {
    shared: Rc<StreamShared>,
}

impl ScriptHandle {
    pub(crate) fn new(shared: Rc<StreamShared>) -> Self {
        Self { shared }
    }

    /// Direction this script runs on
    pub fn direction(&self) -> Direction {
        self.shared.direction()
    }

    /// Whether this direction already sent a local response
    pub fn responded(&self) -> bool {
        self.shared.state() == State::Responded
    }

    /// Headers of this direction
    pub fn headers(&self) -> HeadersHandle {
        let headers = Rc::clone(&self.shared.inner.borrow().headers);
        HeadersHandle::headers(&self.shared, &headers)
    }

    /// Whole body, waiting for end of stream if necessary.
    ///
    /// Returns `None` when the stream carries no body.
    pub async fn body(&self) -> Result<Option<BodyHandle>> {
        self.shared.ensure_active("body()")?;
        {
            let mut inner = self.shared.inner.borrow_mut();
            if inner.end_stream {
                if inner.saw_body && !inner.buffered_body {
                    return Err(ScriptError::runtime(
                        "cannot call body() after body has been streamed",
                    ));
                }
                drop(inner);
                return Ok(self.buffered_body());
            }
            if inner.saw_body && !inner.buffered_body {
                return Err(ScriptError::runtime(
                    "cannot call body() after body streaming has started",
                ));
            }
            inner.buffered_body = true;
        }

        debug!(direction = %self.shared.direction(), "Waiting for full body");
        match self.shared.suspend(State::WaitForBody).await? {
            Resumed::Body => Ok(self.buffered_body()),
            other => Err(unexpected_resume(&other)),
        }
    }

    fn buffered_body(&self) -> Option<BodyHandle> {
        self.shared
            .buffered_body()
            .filter(|buffer| !buffer.borrow().is_empty())
            .map(|buffer| BodyHandle::body(&self.shared, &buffer))
    }

    /// Stream the body chunk by chunk without buffering it
    pub fn body_chunks(&self) -> Result<BodyChunks> {
        self.shared.ensure_active("body_chunks()")?;
        if self.shared.inner.borrow().saw_body {
            return Err(ScriptError::runtime(
                "cannot call body_chunks() after body processing has begun",
            ));
        }
        Ok(BodyChunks {
            shared: Rc::clone(&self.shared),
        })
    }

    /// Trailers, waiting for them unless the stream already ended
    pub async fn trailers(&self) -> Result<Option<HeadersHandle>> {
        self.shared.ensure_active("trailers()")?;
        if let Some(trailers) = self.trailers_now() {
            return Ok(trailers);
        }

        debug!(direction = %self.shared.direction(), "Waiting for trailers");
        match self.shared.suspend(State::WaitForTrailers).await? {
            Resumed::Trailers => Ok(self.trailers_now().flatten()),
            Resumed::EndOfStream => Ok(None),
            other => Err(unexpected_resume(&other)),
        }
    }

    /// `Some` once the answer is known without waiting
    fn trailers_now(&self) -> Option<Option<HeadersHandle>> {
        let inner = self.shared.inner.borrow();
        match &inner.trailers {
            Some(trailers) => Some(Some(HeadersHandle::trailers(&self.shared, trailers))),
            None if inner.end_stream => Some(None),
            None => None,
        }
    }

    /// Emit a log message at `level`
    pub fn log(&self, level: LogLevel, message: &str) {
        let direction = self.shared.direction();
        match level {
            LogLevel::Trace => trace!(target: "octopus::script", %direction, "{message}"),
            LogLevel::Debug => debug!(target: "octopus::script", %direction, "{message}"),
            LogLevel::Info => info!(target: "octopus::script", %direction, "{message}"),
            LogLevel::Warn => warn!(target: "octopus::script", %direction, "{message}"),
            LogLevel::Error => error!(target: "octopus::script", %direction, "{message}"),
            LogLevel::Critical => {
                error!(target: "octopus::script", %direction, critical = true, "{message}")
            }
        }
    }

    /// Send `request` to its cluster and wait for the outcome.
    ///
    /// Upstream failures are returned as the inner `Err`; an unknown cluster, a
    /// call made while another is outstanding or a call after `respond()` is a
    /// script error.
    pub async fn http_call(
        &self,
        request: HttpCallRequest,
    ) -> Result<std::result::Result<HttpCallResponse, FailureReason>> {
        let shared = &self.shared;
        shared.ensure_active("http_call()")?;
        if shared.inner.borrow().pending_call.is_some() {
            return Err(ScriptError::runtime(
                "cannot start an http call while another is outstanding",
            ));
        }

        let (cluster, message, timeout) = request.into_parts();
        let cluster_manager = shared.cluster_manager();
        let client = cluster_manager
            .get(&cluster)
            .and_then(|_| cluster_manager.http_async_client_for_cluster(&cluster))
            .ok_or_else(|| {
                ScriptError::invalid_argument(format!(
                    "http call cluster '{cluster}' invalid. Must be configured"
                ))
            })?;

        let token = shared.next_call_token();
        debug!(direction = %shared.direction(), %cluster, token, "Starting http call");

        let request = match client.send(message, timeout, shared.completion_callback(token)) {
            Ok(request) => request,
            Err(reason) => {
                debug!(direction = %shared.direction(), %cluster, %reason, "Http call failed immediately");
                return Ok(Err(reason));
            }
        };
        shared.inner.borrow_mut().pending_call = Some(PendingAsyncCall { token, request });

        match shared.suspend(State::HttpCall).await {
            Ok(Resumed::HttpCall(outcome)) => Ok(outcome.map(HttpCallResponse::from)),
            Ok(other) => Err(unexpected_resume(&other)),
            Err(err) => {
                shared.cancel_pending_call();
                Err(err)
            }
        }
    }

    /// Send a local response and stop this direction's iteration.
    ///
    /// A second call is ignored. Responding after the headers were continued is
    /// a script error. Once a response is sent, every call that writes to the
    /// stream or waits on it fails.
    pub fn respond(&self, reply: LocalReply) -> Result<()> {
        let shared = &self.shared;
        if shared.state() == State::Responded {
            debug!(direction = %shared.direction(), "Ignoring repeated respond()");
            return Ok(());
        }
        if shared.headers_continued() {
            return Err(ScriptError::runtime(
                "respond() cannot be called once headers have been continued",
            ));
        }

        debug!(direction = %shared.direction(), status = reply.status(), "Sending local response");
        shared.set_state(State::Responded);
        let (headers, body) = reply.into_parts();
        shared.callbacks().respond(headers, body);
        Ok(())
    }
}

impl fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("direction", &self.shared.direction())
            .field("state", &self.shared.state())
            .finish()
    }
}

/// Chunk-by-chunk view of a body
#[derive(Debug)]
pub struct BodyChunks {
    shared: Rc<StreamShared>,
}

impl BodyChunks {
    /// Next chunk, or `None` once the stream ended.
    ///
    /// A chunk handle is only valid until the script next waits.
    pub async fn next(&mut self) -> Result<Option<BodyHandle>> {
        self.shared.ensure_active("body_chunks()")?;
        if self.shared.inner.borrow().end_stream {
            debug!(direction = %self.shared.direction(), "Body complete, no more chunks");
            return Ok(None);
        }

        match self.shared.suspend(State::WaitForBodyChunk).await? {
            Resumed::Chunk(cell) => Ok(Some(BodyHandle::chunk(&self.shared, &cell))),
            Resumed::EndOfStream => Ok(None),
            other => Err(unexpected_resume(&other)),
        }
    }
}

fn unexpected_resume(resumed: &Resumed) -> ScriptError {
    ScriptError::runtime(format!("script resumed unexpectedly with {}", resumed.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_range() {
        assert_eq!(LogLevel::try_from(0_i64).unwrap(), LogLevel::Trace);
        assert_eq!(LogLevel::try_from(5_i64).unwrap(), LogLevel::Critical);
        assert!(LogLevel::try_from(6_i64).is_err());
        assert!(LogLevel::try_from(-1_i64).is_err());
    }
}
