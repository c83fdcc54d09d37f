//! Direction-agnostic view of the host callbacks
//!
//! A stream handle only needs four host operations. The request path maps
//! them onto the decoder callbacks and the response path onto the encoder
//! callbacks, so the handle itself never knows which direction it serves.

use octopus_core::{
    Buffer, BufferRef, HeaderMap, StreamDecoderFilterCallbacks, StreamEncoderFilterCallbacks,
};
use std::fmt;
use std::rc::Rc;

/// Which side of the stream a script runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Request path
    Request,
    /// Response path
    Response,
}

impl Direction {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host operations a stream handle performs, independent of direction
pub(crate) trait FilterCallbacks {
    /// Append `data` to the host's buffered body
    fn add_data(&self, data: &mut Buffer);

    /// Body the host has buffered so far
    fn buffered_body(&self) -> Option<BufferRef>;

    /// Resume the host's iteration on this path
    fn continue_iteration(&self);

    /// Emit a locally generated response
    fn respond(&self, headers: HeaderMap, body: Option<Buffer>);
}

/// Request path adapter over the decoder callbacks
pub(crate) struct DecoderCallbacks {
    callbacks: Rc<dyn StreamDecoderFilterCallbacks>,
}

impl DecoderCallbacks {
    pub(crate) fn new(callbacks: Rc<dyn StreamDecoderFilterCallbacks>) -> Self {
        Self { callbacks }
    }
}

impl FilterCallbacks for DecoderCallbacks {
    fn add_data(&self, data: &mut Buffer) {
        self.callbacks.add_decoded_data(data);
    }

    fn buffered_body(&self) -> Option<BufferRef> {
        self.callbacks.decoding_buffer()
    }

    fn continue_iteration(&self) {
        self.callbacks.continue_decoding();
    }

    fn respond(&self, headers: HeaderMap, body: Option<Buffer>) {
        // the host acts on both only after the current filter call returns
        self.callbacks.encode_headers(headers, body.is_none());
        if let Some(body) = body {
            self.callbacks.encode_data(body, true);
        }
    }
}

/// Response path adapter over the encoder callbacks
pub(crate) struct EncoderCallbacks {
    callbacks: Rc<dyn StreamEncoderFilterCallbacks>,
}

impl EncoderCallbacks {
    pub(crate) fn new(callbacks: Rc<dyn StreamEncoderFilterCallbacks>) -> Self {
        Self { callbacks }
    }
}

impl FilterCallbacks for EncoderCallbacks {
    fn add_data(&self, data: &mut Buffer) {
        self.callbacks.add_encoded_data(data);
    }

    fn buffered_body(&self) -> Option<BufferRef> {
        self.callbacks.encoding_buffer()
    }

    fn continue_iteration(&self) {
        self.callbacks.continue_encoding();
    }

    fn respond(&self, headers: HeaderMap, body: Option<Buffer>) {
        self.callbacks.send_local_reply(headers, body);
    }
}
