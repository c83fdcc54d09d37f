//! Stream filter contract between the host pipeline and a filter
//!
//! The host drives each stream's request path through a
//! [`StreamDecoderFilter`] and its response path through a
//! [`StreamEncoderFilter`]. Every event returns a directive telling the
//! pipeline whether to pass the event on or hold it.
//!
//! Callbacks handed to a filter must never call back into that same filter
//! synchronously: buffering, continuing and local replies are acted on after
//! the current filter call has returned.

use crate::buffer::{Buffer, BufferRef};
use crate::headers::{HeaderMap, HeaderMapRef};
use std::rc::Rc;

/// Directive returned for a header block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterHeadersStatus {
    /// Pass the headers to the next filter
    Continue,
    /// Hold the headers until the filter continues iteration
    StopIteration,
}

/// Directive returned for a body chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDataStatus {
    /// Pass the chunk (and anything held) to the next filter
    Continue,
    /// Hold the chunk and append it to the buffered body
    StopIterationAndBuffer,
    /// Hold the chunk without buffering it
    StopIterationNoBuffer,
}

/// Directive returned for a trailer block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTrailersStatus {
    /// Pass the trailers to the next filter
    Continue,
    /// Hold the trailers until the filter continues iteration
    StopIteration,
}

/// Host operations available to a filter on the request path
pub trait StreamDecoderFilterCallbacks {
    /// Append `data` to the buffered request body, draining `data`
    fn add_decoded_data(&self, data: &mut Buffer);

    /// Request body buffered so far, if any
    fn decoding_buffer(&self) -> Option<BufferRef>;

    /// Resume request iteration after the filter stopped it
    fn continue_decoding(&self);

    /// Send response headers downstream directly from the request path
    fn encode_headers(&self, headers: HeaderMap, end_stream: bool);

    /// Send response body data downstream directly from the request path
    fn encode_data(&self, data: Buffer, end_stream: bool);
}

/// Host operations available to a filter on the response path
pub trait StreamEncoderFilterCallbacks {
    /// Append `data` to the buffered response body, draining `data`
    fn add_encoded_data(&self, data: &mut Buffer);

    /// Response body buffered so far, if any
    fn encoding_buffer(&self) -> Option<BufferRef>;

    /// Resume response iteration after the filter stopped it
    fn continue_encoding(&self);

    /// Replace the upstream response with a locally generated one
    fn send_local_reply(&self, headers: HeaderMap, body: Option<Buffer>);
}

/// Lifecycle shared by both filter directions
pub trait StreamFilterBase {
    /// Stream is being torn down; no further events will be delivered
    fn on_destroy(&mut self);
}

/// Filter on the request path
pub trait StreamDecoderFilter: StreamFilterBase {
    /// Request headers arrived
    fn decode_headers(&mut self, headers: &HeaderMapRef, end_stream: bool) -> FilterHeadersStatus;

    /// Request body chunk arrived
    fn decode_data(&mut self, data: &mut Buffer, end_stream: bool) -> FilterDataStatus;

    /// Request trailers arrived
    fn decode_trailers(&mut self, trailers: &HeaderMapRef) -> FilterTrailersStatus;

    /// Install the request path callbacks; called before any event
    fn set_decoder_filter_callbacks(&mut self, callbacks: Rc<dyn StreamDecoderFilterCallbacks>);
}

/// Filter on the response path
pub trait StreamEncoderFilter: StreamFilterBase {
    /// Response headers arrived
    fn encode_headers(&mut self, headers: &HeaderMapRef, end_stream: bool) -> FilterHeadersStatus;

    /// Response body chunk arrived
    fn encode_data(&mut self, data: &mut Buffer, end_stream: bool) -> FilterDataStatus;

    /// Response trailers arrived
    fn encode_trailers(&mut self, trailers: &HeaderMapRef) -> FilterTrailersStatus;

    /// Install the response path callbacks; called before any event
    fn set_encoder_filter_callbacks(&mut self, callbacks: Rc<dyn StreamEncoderFilterCallbacks>);
}

/// Filter participating in both directions of a stream
pub trait StreamFilter: StreamDecoderFilter + StreamEncoderFilter {}

impl<T: StreamDecoderFilter + StreamEncoderFilter> StreamFilter for T {}
