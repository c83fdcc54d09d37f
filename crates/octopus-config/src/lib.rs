//! # Octopus Configuration
//!
//! Script filter configuration and the upstream clusters its scripts may call.
//!
//! Files are YAML, TOML or JSON, picked by extension. `${VAR}` and
//! `${VAR:-default}` references are expanded before parsing, and
//! [`load_config`] validates the result.
//!
//! ```yaml
//! script:
//!   path: filters/auth.rhai
//!   request_function: on_request
//! clusters:
//!   - name: auth
//!     connect_timeout: 2s
//!     instances:
//!       - { id: auth-1, host: "${AUTH_HOST:-127.0.0.1}", port: 9000 }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod loader;
pub mod types;
pub mod validator;

pub use loader::{load_config, load_from_file, load_from_str};
pub use types::{
    Config, InstanceConfig, ScriptFilterConfig, ScriptLanguage, ScriptLimits, ScriptSource,
    UpstreamConfig,
};
pub use validator::validate_config;

use octopus_core::{Error, Result};
use std::path::Path;

/// Serialization format of a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` / `.yml`
    Yaml,
    /// `.toml`
    Toml,
    /// `.json`
    Json,
}

impl ConfigFormat {
    /// Format for a file extension, case-insensitive
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Format of the file at `path`
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        Self::from_extension(ext).ok_or_else(|| {
            Error::Config(format!(
                "Cannot tell config format of '{}' (expected .yaml, .toml or .json)",
                path.display()
            ))
        })
    }
}
