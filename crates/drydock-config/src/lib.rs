//! Configuration parsing for Drydock CI.
//!
//! This crate handles parsing of:
//! - The repository CI file (`.ci-config`, YAML)
//! - Server configuration (`drydock.kdl`, KDL)

pub mod ci;
pub mod error;
pub mod system;

pub use ci::{CI_CONFIG_FILE, CiConfig, parse_ci_config};
pub use error::{ConfigError, ConfigResult};
pub use system::{ExecutorKind, SystemConfig, parse_system_config};
