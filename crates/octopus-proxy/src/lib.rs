//! # Octopus Upstream Proxy
//!
//! Upstream plumbing used by script filters:
//! - Static cluster manager built from configuration
//! - Round-robin selection over healthy instances
//! - Async HTTP client with per-request timeouts and cancellation

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod client;
pub mod cluster;

pub use client::HttpClient;
pub use cluster::{ClusterClient, StaticClusterManager};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::HttpClient;
    pub use crate::cluster::{ClusterClient, StaticClusterManager};
}
