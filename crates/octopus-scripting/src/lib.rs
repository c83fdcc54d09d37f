//! # Octopus Scripting
//!
//! Per-stream scripting filter with suspendable scripts.
//!
//! A script runs once per stream direction, starting when that direction's
//! headers arrive. It may wait for the body, for body chunks, for trailers or
//! for an outbound HTTP call to another cluster, and it may answer the stream
//! locally. While it waits, the filter holds or buffers pipeline events as
//! required and resumes the script when the awaited event arrives.
//!
//! ## Runtimes
//!
//! - **Rhai** - scripts loaded from configuration ([`RhaiRuntime`])
//! - **Native** - Rust async closures ([`NativeScript`])
//!
//! ## Usage
//!
//! ```ignore
//! let config = Arc::new(FilterConfig::load(&script_config).await?);
//! let worker = WorkerContext::new(config, Rc::new(cluster_manager));
//!
//! let mut filter = worker.create_filter();
//! filter.set_decoder_filter_callbacks(decoder_callbacks);
//! filter.set_encoder_filter_callbacks(encoder_callbacks);
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod callbacks;
pub mod error;
pub mod filter;
pub mod handle;
pub mod http_call;
pub mod native;
pub mod rhai_engine;
pub mod runtime;
mod stream;
pub mod wrappers;

pub use callbacks::Direction;
pub use error::{Result, ScriptError};
pub use filter::{Filter, FilterConfig, WorkerContext};
pub use handle::{BodyChunks, LogLevel, ScriptHandle};
pub use http_call::{HttpCallRequest, HttpCallResponse, LocalReply};
pub use native::NativeScript;
pub use rhai_engine::RhaiRuntime;
pub use runtime::{CompiledScript, EntryPoint, ScriptFuture, ScriptRuntime};
pub use wrappers::{BodyHandle, HeadersHandle};

/// Prelude with commonly used types
pub mod prelude {
    pub use crate::callbacks::Direction;
    pub use crate::error::{Result, ScriptError};
    pub use crate::filter::{Filter, FilterConfig, WorkerContext};
    pub use crate::handle::{BodyChunks, LogLevel, ScriptHandle};
    pub use crate::http_call::{HttpCallRequest, HttpCallResponse, LocalReply};
    pub use crate::native::NativeScript;
    pub use crate::runtime::{CompiledScript, EntryPoint, ScriptRuntime};
}
