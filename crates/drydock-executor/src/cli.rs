//! Executor that shells out to the `docker` command-line client.

use async_trait::async_trait;
use chrono::Utc;
use drydock_core::executor::*;
use drydock_core::{Error, ResourceId, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::wrappers::SplitStream;
use tracing::{info, warn};

use crate::lines::decode_line;

/// Runs each container as a `docker run` child process.
///
/// The client inherits the host environment plus the spec's variables, and
/// forwards those variables into the container by name.
pub struct DockerCliExecutor {
    program: OsString,
    children: Mutex<HashMap<ResourceId, Child>>,
}

impl DockerCliExecutor {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    /// Use a different client binary, e.g. a full path or `podman`.
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Arguments passed to the client for a spec.
    fn run_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-t".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            spec.id.container_name(),
        ];
        for volume in &spec.volumes {
            args.push("-v".to_string());
            args.push(volume.bind_spec());
        }
        let mut names: Vec<&String> = spec.env.keys().collect();
        names.sort();
        for name in names {
            args.push("-e".to_string());
            args.push(name.clone());
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }

    fn lines_of<R>(reader: R, stream: LogStream) -> BoxStream<'static, LogLine>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        SplitStream::new(BufReader::new(reader).split(b'\n'))
            .filter_map(move |chunk| async move {
                match chunk {
                    Ok(bytes) => Some(LogLine {
                        timestamp: Utc::now(),
                        stream,
                        content: decode_line(&bytes),
                    }),
                    Err(e) => {
                        warn!(error = %e, "Output read error");
                        None
                    }
                }
            })
            .boxed()
    }
}

impl Default for DockerCliExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for DockerCliExecutor {
    fn name(&self) -> &'static str {
        "docker-cli"
    }

    async fn spawn(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
        let args = Self::run_args(&spec);
        info!(image = %spec.image, cmd = %args.join(" "), "Running container");

        let child = Command::new(&self.program)
            .args(&args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ExecutionFailed(format!(
                    "failed to launch {}: {}",
                    self.program.to_string_lossy(),
                    e
                ))
            })?;

        self.children.lock().insert(spec.id, child);

        Ok(ContainerHandle {
            id: spec.id,
            executor_id: spec.id.container_name(),
            executor_name: self.name().to_string(),
        })
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<BoxStream<'static, LogLine>> {
        let (stdout, stderr) = {
            let mut children = self.children.lock();
            let child = children
                .get_mut(&handle.id)
                .ok_or_else(|| Error::NotFound(format!("container {}", handle.executor_id)))?;
            (child.stdout.take(), child.stderr.take())
        };

        let stdout = stdout
            .ok_or_else(|| Error::Internal("container output already taken".to_string()))?;
        let mut merged = Self::lines_of(stdout, LogStream::Stdout);
        if let Some(stderr) = stderr {
            merged = futures::stream::select(merged, Self::lines_of(stderr, LogStream::Stderr)).boxed();
        }
        Ok(merged)
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ContainerExit> {
        let mut child = self
            .children
            .lock()
            .remove(&handle.id)
            .ok_or_else(|| Error::NotFound(format!("container {}", handle.executor_id)))?;

        let status = child.wait().await?;
        // Killed by a signal: no exit code.
        let exit_code = status.code().unwrap_or(-1);

        Ok(ContainerExit {
            exit_code,
            finished_at: Utc::now(),
        })
    }

    async fn cancel(&self, handle: &ContainerHandle) -> Result<()> {
        let output = Command::new(&self.program)
            .args(["kill", handle.executor_id.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            warn!(
                container = %handle.executor_id,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "docker kill failed"
            );
        }

        // Dropping the child reaps it; `kill_on_drop` covers a client that
        // ignored the kill above.
        let child = self.children.lock().remove(&handle.id);
        if let Some(mut child) = child {
            child.start_kill()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn make_spec() -> ContainerSpec {
        ContainerSpec {
            id: ResourceId::new(),
            image: "base:1.0".to_string(),
            command: vec!["bash".to_string(), "/citmp/script.sh".to_string()],
            env: HashMap::from([
                ("BASH_ENV".to_string(), "~/.bashrc".to_string()),
                ("CI".to_string(), "true".to_string()),
            ]),
            volumes: vec![VolumeMount {
                host_path: PathBuf::from("/tmp/drydock-x"),
                mount_path: "/citmp".to_string(),
                read_only: false,
            }],
        }
    }

    #[test]
    fn test_run_args() {
        let spec = make_spec();
        let args = DockerCliExecutor::run_args(&spec);
        let name = spec.id.container_name();

        assert_eq!(
            args,
            vec![
                "run",
                "-t",
                "--rm",
                "--name",
                name.as_str(),
                "-v",
                "/tmp/drydock-x:/citmp:rw",
                "-e",
                "BASH_ENV",
                "-e",
                "CI",
                "base:1.0",
                "bash",
                "/citmp/script.sh",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_client_is_a_launch_failure() {
        let executor = DockerCliExecutor::with_program("/nonexistent/drydock-docker");
        let result = executor.spawn(make_spec()).await;
        assert!(matches!(result, Err(Error::ExecutionFailed(_))));
    }

    /// Uses `sh` in place of the docker client: the arguments become a
    /// script path that does not exist, so only the process plumbing is
    /// exercised.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_output_and_exit_code() {
        let executor = DockerCliExecutor::with_program("sh");
        let spec = ContainerSpec {
            command: vec![],
            volumes: vec![],
            env: HashMap::new(),
            ..make_spec()
        };
        // `sh run -t ...` fails to open a script named "run".
        let handle = executor.spawn(spec).await.unwrap();
        let lines: Vec<LogLine> = executor.logs(&handle).await.unwrap().collect().await;
        let exit = executor.wait(&handle).await.unwrap();

        assert_ne!(exit.exit_code, 0);
        assert!(lines.iter().any(|l| l.stream == LogStream::Stderr));
    }
}
