//! Server configuration parsing.
//!
//! ```kdl
//! results-root "/ci"
//! listen "0.0.0.0:8000"
//! executor "docker-cli"
//! build-timeout 3600
//! public-url "http://ci.example.com"
//! status-context "continuous-integration/drydock"
//! env {
//!     CI "true"
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which container backend runs builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Spawn the `docker` command-line client.
    #[default]
    DockerCli,
    /// Talk to the Docker Engine API directly.
    DockerApi,
}

impl FromStr for ExecutorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "docker-cli" => Ok(Self::DockerCli),
            "docker-api" => Ok(Self::DockerApi),
            other => Err(ConfigError::InvalidValue {
                field: "executor".to_string(),
                message: format!("unknown executor: {}", other),
            }),
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DockerCli => f.write_str("docker-cli"),
            Self::DockerApi => f.write_str("docker-api"),
        }
    }
}

/// Server-wide configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemConfig {
    /// Directory holding persisted job records.
    pub results_root: PathBuf,
    /// Address the HTTP server binds to.
    pub listen: SocketAddr,
    pub executor: ExecutorKind,
    /// Upper bound on a single build; `None` runs builds to completion.
    pub build_timeout: Option<Duration>,
    /// Base URL used for links in commit statuses.
    pub public_url: String,
    /// Context name reported with commit statuses.
    pub status_context: String,
    /// Extra environment variables for every build.
    pub env: HashMap<String, String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            results_root: PathBuf::from("/ci"),
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            executor: ExecutorKind::default(),
            build_timeout: None,
            public_url: "http://localhost:8000".to_string(),
            status_context: "continuous-integration/drydock".to_string(),
            env: HashMap::new(),
        }
    }
}

impl SystemConfig {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        parse_system_config(&content)
    }
}

/// Parse server configuration from KDL text. Absent keys keep their defaults.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "results-root" => {
                config.results_root = PathBuf::from(required_string(node)?);
            }
            "listen" => {
                let value = required_string(node)?;
                config.listen = value.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "listen".to_string(),
                    message: format!("not a socket address: {}", value),
                })?;
            }
            "executor" => {
                config.executor = required_string(node)?.parse()?;
            }
            "build-timeout" => {
                let secs = get_first_integer_arg(node).ok_or_else(|| invalid(node, "expected an integer"))?;
                if secs <= 0 {
                    return Err(invalid(node, "must be positive"));
                }
                let secs = u64::try_from(secs).map_err(|_| invalid(node, "out of range"))?;
                config.build_timeout = Some(Duration::from_secs(secs));
            }
            "public-url" => {
                config.public_url = required_string(node)?.trim_end_matches('/').to_string();
            }
            "status-context" => {
                config.status_context = required_string(node)?;
            }
            "env" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        let key = child.name().value().to_string();
                        if let Some(val) = get_first_string_arg(child) {
                            config.env.insert(key, val);
                        }
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn invalid(node: &KdlNode, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: node.name().value().to_string(),
        message: message.to_string(),
    }
}

fn required_string(node: &KdlNode) -> ConfigResult<String> {
    get_first_string_arg(node).ok_or_else(|| invalid(node, "expected a string"))
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            results-root "/var/lib/drydock"
            listen "127.0.0.1:9000"
            executor "docker-api"
            build-timeout 600
            public-url "http://ci.example.com/"
            status-context "ci/drydock"
            env {
                CI "true"
                LANG "C.UTF-8"
            }
        "#;

        let config = parse_system_config(kdl).unwrap();
        assert_eq!(config.results_root, PathBuf::from("/var/lib/drydock"));
        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.executor, ExecutorKind::DockerApi);
        assert_eq!(config.build_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.public_url, "http://ci.example.com");
        assert_eq!(config.status_context, "ci/drydock");
        assert_eq!(config.env.get("CI"), Some(&"true".to_string()));
        assert_eq!(config.env.len(), 2);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_system_config("").unwrap();
        assert_eq!(config, SystemConfig::default());
        assert_eq!(config.build_timeout, None);
        assert_eq!(config.executor, ExecutorKind::DockerCli);
    }

    #[test]
    fn test_unknown_executor() {
        let result = parse_system_config(r#"executor "podman""#);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_non_positive_timeout() {
        let result = parse_system_config("build-timeout 0");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_bad_listen_address() {
        let result = parse_system_config(r#"listen "nowhere""#);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_executor_kind_round_trips_through_display() {
        for kind in [ExecutorKind::DockerCli, ExecutorKind::DockerApi] {
            assert_eq!(kind.to_string().parse::<ExecutorKind>().unwrap(), kind);
        }
    }
}
