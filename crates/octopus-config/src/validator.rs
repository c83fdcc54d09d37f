//! Configuration validation

use crate::{Config, ScriptFilterConfig, ScriptSource};
use octopus_core::{Error, Result};
use std::collections::HashSet;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_script(&config.script)?;
    validate_clusters(config)?;
    Ok(())
}

fn validate_script(script: &ScriptFilterConfig) -> Result<()> {
    if let ScriptSource::Inline { code, .. } = &script.source {
        if code.trim().is_empty() {
            return Err(Error::Config("inline script code cannot be empty".to_string()));
        }
    }

    for (field, name) in [
        ("request_function", &script.request_function),
        ("response_function", &script.response_function),
    ] {
        if !is_identifier(name) {
            return Err(Error::Config(format!(
                "{field} '{name}' is not a valid function name"
            )));
        }
    }

    let limits = &script.limits;
    if limits.max_operations == 0 {
        return Err(Error::Config("max_operations must be > 0".to_string()));
    }
    if limits.max_string_size == 0 {
        return Err(Error::Config("max_string_size must be > 0".to_string()));
    }
    if limits.max_expr_depth == 0 || limits.max_function_expr_depth == 0 {
        return Err(Error::Config("expression depth limits must be > 0".to_string()));
    }
    if limits.max_script_threads == 0 {
        return Err(Error::Config("max_script_threads must be > 0".to_string()));
    }
    if limits.script_stack_size < 64 * 1024 {
        return Err(Error::Config(
            "script_stack_size must be at least 64 KiB".to_string(),
        ));
    }

    Ok(())
}

fn validate_clusters(config: &Config) -> Result<()> {
    let mut names = HashSet::new();

    for cluster in &config.clusters {
        if cluster.name.is_empty() {
            return Err(Error::Config("cluster name cannot be empty".to_string()));
        }

        if !names.insert(cluster.name.as_str()) {
            return Err(Error::Config(format!(
                "duplicate cluster name: {}",
                cluster.name
            )));
        }

        if cluster.instances.is_empty() {
            tracing::warn!(
                cluster = %cluster.name,
                "Cluster has no instances"
            );
        }

        for instance in &cluster.instances {
            if instance.host.is_empty() {
                return Err(Error::Config(format!(
                    "instance '{}' in cluster '{}' has an empty host",
                    instance.id, cluster.name
                )));
            }
            if instance.port == 0 {
                return Err(Error::Config(format!(
                    "instance '{}' in cluster '{}' has port 0",
                    instance.id, cluster.name
                )));
            }
        }
    }

    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InstanceConfig, UpstreamConfig};
    use std::time::Duration;

    fn config() -> Config {
        Config {
            script: ScriptFilterConfig::new(ScriptSource::inline("fn on_request(h) {}")),
            clusters: vec![UpstreamConfig {
                name: "auth".to_string(),
                instances: vec![InstanceConfig {
                    id: "auth-1".to_string(),
                    host: "127.0.0.1".to_string(),
                    port: 9000,
                }],
                connect_timeout: Duration::from_secs(1),
            }],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&config()).is_ok());
    }

    #[test]
    fn test_duplicate_cluster_names() {
        let mut config = config();
        config.clusters.push(config.clusters[0].clone());

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate cluster name"));
    }

    #[test]
    fn test_invalid_function_name() {
        let mut config = config();
        config.script.request_function = "on-request".to_string();
        assert!(validate_config(&config).is_err());

        config.script.request_function = "_on_request2".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = config();
        config.clusters[0].instances[0].port = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = config();
        config.script.limits.max_operations = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_script_thread_limits_rejected() {
        let mut no_threads = config();
        no_threads.script.limits.max_script_threads = 0;
        assert!(validate_config(&no_threads).is_err());

        let mut tiny_stack = config();
        tiny_stack.script.limits.script_stack_size = 4096;
        assert!(validate_config(&tiny_stack).is_err());
    }
}
