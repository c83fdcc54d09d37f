//! Scripts written as Rust async closures
//!
//! ```ignore
//! let script = NativeScript::new()
//!     .on_request(|handle: ScriptHandle| async move {
//!         let body = handle.body().await?;
//!         handle.headers().add("x-body-len", &body.map_or(0, |b| b.length().unwrap_or(0)).to_string())?;
//!         Ok(())
//!     })
//!     .build();
//! ```

use crate::error::Result;
use crate::handle::ScriptHandle;
use crate::runtime::{CompiledScript, EntryPoint, ScriptFuture};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Entry point backed by a Rust closure
pub struct NativeEntryPoint<F> {
    name: &'static str,
    f: F,
}

impl<F, Fut> EntryPoint for NativeEntryPoint<F>
where
    F: Fn(ScriptHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + 'static,
{
    fn invoke(&self, handle: ScriptHandle) -> ScriptFuture {
        Box::pin((self.f)(handle))
    }
}

impl<F> fmt::Debug for NativeEntryPoint<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeEntryPoint")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Builder for a [`CompiledScript`] made of Rust closures
#[derive(Debug, Default)]
pub struct NativeScript {
    script: CompiledScript,
}

impl NativeScript {
    /// Script with no entry points
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` for every request
    pub fn on_request<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ScriptHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.script.request = Some(Arc::new(NativeEntryPoint {
            name: "on_request",
            f,
        }));
        self
    }

    /// Run `f` for every response
    pub fn on_response<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ScriptHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + 'static,
    {
        self.script.response = Some(Arc::new(NativeEntryPoint {
            name: "on_response",
            f,
        }));
        self
    }

    /// Finish building
    pub fn build(self) -> CompiledScript {
        self.script
    }
}
