//! # Octopus Core
//!
//! Core types and traits shared by the Octopus stream filter crates:
//! - Ordered header maps and body buffers
//! - The filter contract between a host pipeline and its filters
//! - Upstream clusters and the async request contract
//! - Error types

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod buffer;
pub mod error;
pub mod filter;
pub mod headers;
pub mod upstream;

pub use buffer::{Buffer, BufferRef};
pub use error::{Error, Result};
pub use filter::{
    FilterDataStatus, FilterHeadersStatus, FilterTrailersStatus, StreamDecoderFilter,
    StreamDecoderFilterCallbacks, StreamEncoderFilter, StreamEncoderFilterCallbacks,
    StreamFilter, StreamFilterBase,
};
pub use headers::{HeaderMap, HeaderMapRef};
pub use upstream::{
    AsyncCallback, AsyncClient, AsyncRequest, ClusterManager, FailureReason, HttpMessage,
    UpstreamCluster, UpstreamInstance,
};

pub use bytes::Bytes;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::buffer::{Buffer, BufferRef};
    pub use crate::error::{Error, Result};
    pub use crate::filter::*;
    pub use crate::headers::{HeaderMap, HeaderMapRef};
    pub use crate::upstream::*;
}
