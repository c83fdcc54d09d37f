//! Configuration types

use octopus_core::{Error, Result, UpstreamCluster, UpstreamInstance};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration: one script filter plus the clusters its scripts may call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Script filter configuration
    pub script: ScriptFilterConfig,

    /// Upstream clusters reachable from scripts
    #[serde(default)]
    pub clusters: Vec<UpstreamConfig>,
}

/// Script filter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptFilterConfig {
    /// Script language
    #[serde(default)]
    pub language: ScriptLanguage,

    /// Where the script code comes from
    #[serde(flatten)]
    pub source: ScriptSource,

    /// Entry function run for each request
    #[serde(default = "default_request_function")]
    pub request_function: String,

    /// Entry function run for each response
    #[serde(default = "default_response_function")]
    pub response_function: String,

    /// Engine resource limits
    #[serde(default)]
    pub limits: ScriptLimits,
}

impl ScriptFilterConfig {
    /// Configuration for `source` with default entry functions and limits
    pub fn new(source: ScriptSource) -> Self {
        Self {
            language: ScriptLanguage::default(),
            source,
            request_function: default_request_function(),
            response_function: default_response_function(),
            limits: ScriptLimits::default(),
        }
    }
}

fn default_request_function() -> String {
    "on_request".to_string()
}

fn default_response_function() -> String {
    "on_response".to_string()
}

/// Supported script languages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    /// Rhai scripting language
    #[default]
    Rhai,
}

impl ScriptLanguage {
    /// Get file extension for this language
    pub fn extension(&self) -> &str {
        match self {
            Self::Rhai => "rhai",
        }
    }

    /// Detect language from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "rhai" => Some(Self::Rhai),
            _ => None,
        }
    }
}

/// Script source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScriptSource {
    /// Inline script code
    Inline {
        /// Script code
        code: String,
        /// Optional name for debugging
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// File-based script
    File {
        /// Path to script file
        path: PathBuf,
    },
}

impl ScriptSource {
    /// Create inline script source
    pub fn inline<S: Into<String>>(code: S) -> Self {
        Self::Inline {
            code: code.into(),
            name: None,
        }
    }

    /// Create inline script with name
    pub fn inline_named<S: Into<String>, N: Into<String>>(code: S, name: N) -> Self {
        Self::Inline {
            code: code.into(),
            name: Some(name.into()),
        }
    }

    /// Create file-based script source
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self::File { path: path.into() }
    }

    /// Script code, read from disk for file sources
    pub async fn load_code(&self) -> Result<String> {
        match self {
            Self::Inline { code, .. } => Ok(code.clone()),
            Self::File { path } => tokio::fs::read_to_string(path).await.map_err(|e| {
                Error::Config(format!(
                    "Failed to read script file {}: {e}",
                    path.display()
                ))
            }),
        }
    }

    /// Name used in logs
    pub fn name(&self) -> String {
        match self {
            Self::Inline { name, .. } => name.clone().unwrap_or_else(|| "inline".to_string()),
            Self::File { path } => path.display().to_string(),
        }
    }
}

/// Engine resource limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptLimits {
    /// Maximum operations per entry function call
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,

    /// Maximum string size in bytes
    #[serde(default = "default_max_string_size")]
    pub max_string_size: usize,

    /// Maximum expression nesting depth
    #[serde(default = "default_max_expr_depth")]
    pub max_expr_depth: usize,

    /// Maximum expression nesting depth inside functions
    #[serde(default = "default_max_function_expr_depth")]
    pub max_function_expr_depth: usize,

    /// Maximum scripts executing at once; each runs on its own thread
    #[serde(default = "default_max_script_threads")]
    pub max_script_threads: usize,

    /// Stack size in bytes of each script thread
    #[serde(default = "default_script_stack_size")]
    pub script_stack_size: usize,
}

fn default_max_operations() -> u64 {
    10_000
}

fn default_max_string_size() -> usize {
    1024 * 1024
}

fn default_max_expr_depth() -> usize {
    25
}

fn default_max_function_expr_depth() -> usize {
    10
}

fn default_max_script_threads() -> usize {
    1024
}

fn default_script_stack_size() -> usize {
    512 * 1024
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: default_max_operations(),
            max_string_size: default_max_string_size(),
            max_expr_depth: default_max_expr_depth(),
            max_function_expr_depth: default_max_function_expr_depth(),
            max_script_threads: default_max_script_threads(),
            script_stack_size: default_script_stack_size(),
        }
    }
}

/// Upstream cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    /// Cluster name
    pub name: String,

    /// Cluster instances
    pub instances: Vec<InstanceConfig>,

    /// Connection establishment timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

impl UpstreamConfig {
    /// Build the runtime cluster definition
    pub fn to_cluster(&self) -> UpstreamCluster {
        let mut cluster = UpstreamCluster::new(&self.name);
        cluster.connect_timeout = self.connect_timeout;
        for instance in &self.instances {
            cluster.add_instance(UpstreamInstance::new(
                &instance.id,
                &instance.host,
                instance.port,
            ));
        }
        cluster
    }
}

/// Upstream instance configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Instance ID
    pub id: String,

    /// Host address
    pub host: String,

    /// Port
    pub port: u16,
}
