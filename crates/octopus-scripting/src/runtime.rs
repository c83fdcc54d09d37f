//! Script runtime abstraction
//!
//! A runtime turns configured script source into a [`CompiledScript`]: up to
//! two entry points, one per direction. Entry points are immutable and shared
//! across workers; invoking one creates a fresh execution context for a single
//! stream direction.

use crate::error::Result;
use crate::handle::ScriptHandle;
use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use octopus_config::{ScriptFilterConfig, ScriptLanguage};
use std::fmt;
use std::sync::Arc;

/// Execution context of one script invocation
pub type ScriptFuture = LocalBoxFuture<'static, Result<()>>;

/// Compiled function run for one direction of a stream
pub trait EntryPoint: Send + Sync + fmt::Debug {
    /// Create the execution context for a new stream direction
    fn invoke(&self, handle: ScriptHandle) -> ScriptFuture;
}

/// Entry points a script defines
#[derive(Debug, Clone, Default)]
pub struct CompiledScript {
    /// Entry point for the request path
    pub request: Option<Arc<dyn EntryPoint>>,
    /// Entry point for the response path
    pub response: Option<Arc<dyn EntryPoint>>,
}

/// Script runtime trait
#[async_trait]
pub trait ScriptRuntime: Send + Sync + fmt::Debug {
    /// Language this runtime executes
    fn language(&self) -> ScriptLanguage;

    /// Load and compile the configured script.
    ///
    /// Compilation failures are returned here and never reach a stream.
    async fn load(&self, config: &ScriptFilterConfig) -> Result<CompiledScript>;
}
