//! Executor trait and container job types.
//!
//! Executors run one build's script inside a container image and expose its
//! output as a stream of lines.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::{ResourceId, Result};

/// Specification for a container to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Identifier of the build this container executes.
    pub id: ResourceId,
    /// Container image to run.
    pub image: String,
    /// Command to execute.
    pub command: Vec<String>,
    /// Environment variables set inside the container.
    pub env: HashMap<String, String>,
    /// Host directories to bind-mount.
    pub volumes: Vec<VolumeMount>,
}

/// A bind mount of a host directory into the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Directory on the host.
    pub host_path: PathBuf,
    /// Path to mount in the container.
    pub mount_path: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

impl VolumeMount {
    /// The `host:container:mode` form understood by Docker.
    pub fn bind_spec(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.mount_path,
            mode
        )
    }
}

/// Handle to a running or completed container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: ResourceId,
    /// Executor-specific identifier (container ID or name).
    pub executor_id: String,
    /// Name of the executor running this container.
    pub executor_name: String,
}

/// How a container ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerExit {
    pub exit_code: i32,
    pub finished_at: DateTime<Utc>,
}

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

impl LogLine {
    pub fn stdout(content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: LogStream::Stdout,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Trait for container executors.
///
/// Callers drive a container as `spawn`, then drain `logs` to the end, then
/// `wait` for the exit code. The log stream ends when the container exits.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Start a container. Fails when the runtime is unavailable or the
    /// image cannot be started.
    async fn spawn(&self, spec: ContainerSpec) -> Result<ContainerHandle>;

    /// Stream the container's output, one item per line, in emission order.
    async fn logs(&self, handle: &ContainerHandle) -> Result<BoxStream<'static, LogLine>>;

    /// Wait for the container to exit and release its resources.
    async fn wait(&self, handle: &ContainerHandle) -> Result<ContainerExit>;

    /// Stop a running container.
    async fn cancel(&self, handle: &ContainerHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_spec() {
        let mount = VolumeMount {
            host_path: PathBuf::from("/tmp/drydock-1"),
            mount_path: "/citmp".to_string(),
            read_only: false,
        };
        assert_eq!(mount.bind_spec(), "/tmp/drydock-1:/citmp:rw");

        let ro = VolumeMount {
            read_only: true,
            ..mount
        };
        assert_eq!(ro.bind_spec(), "/tmp/drydock-1:/citmp:ro");
    }
}
