//! Docker Engine API executor implementation.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use chrono::Utc;
use drydock_core::executor::*;
use drydock_core::{Error, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::lines::LineSplitter;

/// Executor talking to the local Docker daemon over its API.
pub struct DockerApiExecutor {
    docker: Docker,
}

impl DockerApiExecutor {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn pull(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    // A local-only image cannot be pulled but may still run.
                    warn!(image = %image, error = %e, "Pull warning");
                }
            }
        }
    }

    /// Remove a container whose build is over, logging a failure instead
    /// of returning it. Returns whether the container is gone.
    async fn discard(&self, container_name: &str) -> bool {
        match self.remove(container_name).await {
            Ok(()) => true,
            Err(e) => {
                warn!(container = %container_name, error = %e, "Container cleanup failed");
                false
            }
        }
    }

    async fn remove(&self, container_name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(container_name, Some(options))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to remove container: {}", e)))
    }
}

struct LogState {
    inner: BoxStream<'static, std::result::Result<LogOutput, bollard::errors::Error>>,
    stdout: LineSplitter,
    stderr: LineSplitter,
    ready: VecDeque<LogLine>,
    done: bool,
}

impl LogState {
    fn queue(&mut self, stream: LogStream, lines: impl IntoIterator<Item = String>) {
        self.ready.extend(lines.into_iter().map(|content| LogLine {
            timestamp: Utc::now(),
            stream,
            content,
        }));
    }

    fn accept(&mut self, output: LogOutput) {
        match output {
            LogOutput::StdErr { message } => {
                let lines = self.stderr.push(&message);
                self.queue(LogStream::Stderr, lines);
            }
            LogOutput::StdOut { message }
            | LogOutput::Console { message }
            | LogOutput::StdIn { message } => {
                let lines = self.stdout.push(&message);
                self.queue(LogStream::Stdout, lines);
            }
        }
    }

    fn flush(&mut self) {
        let stdout = self.stdout.finish();
        self.queue(LogStream::Stdout, stdout);
        let stderr = self.stderr.finish();
        self.queue(LogStream::Stderr, stderr);
        self.done = true;
    }
}

#[async_trait]
impl Executor for DockerApiExecutor {
    fn name(&self) -> &'static str {
        "docker-api"
    }

    async fn spawn(&self, spec: ContainerSpec) -> Result<ContainerHandle> {
        let container_name = spec.id.container_name();

        self.pull(&spec.image).await;

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let binds: Option<Vec<String>> = if spec.volumes.is_empty() {
            None
        } else {
            Some(spec.volumes.iter().map(VolumeMount::bind_spec).collect())
        };

        let host_config = HostConfig {
            binds,
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(env),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        info!(container = %container_name, image = %spec.image, "Creating container");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to create container: {}", e)))?;

        info!(container = %container_name, "Starting container");
        if let Err(e) = self
            .docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
        {
            self.discard(&container_name).await;
            return Err(Error::ExecutionFailed(format!(
                "Failed to start container: {}",
                e
            )));
        }

        Ok(ContainerHandle {
            id: spec.id,
            executor_id: container.id,
            executor_name: self.name().to_string(),
        })
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<BoxStream<'static, LogLine>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let state = LogState {
            inner: self
                .docker
                .logs(&handle.id.container_name(), Some(options))
                .boxed(),
            stdout: LineSplitter::default(),
            stderr: LineSplitter::default(),
            ready: VecDeque::new(),
            done: false,
        };

        let lines = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(line) = state.ready.pop_front() {
                    return Some((line, state));
                }
                if state.done {
                    return None;
                }
                match state.inner.next().await {
                    Some(Ok(output)) => state.accept(output),
                    Some(Err(e)) => warn!(error = %e, "Log stream error"),
                    None => state.flush(),
                }
            }
        });

        Ok(lines.boxed())
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<ContainerExit> {
        let container_name = handle.id.container_name();

        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(&container_name, Some(options));

        let exit_code = match stream.next().await {
            Some(Ok(response)) => response.status_code,
            // Non-zero exits arrive as errors carrying the code.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => {
                self.discard(&container_name).await;
                return Err(Error::ExecutionFailed(format!(
                    "Failed to wait for container: {}",
                    e
                )));
            }
            None => {
                return Err(Error::ExecutionFailed(
                    "container wait ended without a status".to_string(),
                ));
            }
        };

        self.discard(&container_name).await;

        Ok(ContainerExit {
            exit_code: i32::try_from(exit_code).unwrap_or(-1),
            finished_at: Utc::now(),
        })
    }

    async fn cancel(&self, handle: &ContainerHandle) -> Result<()> {
        let container_name = handle.id.container_name();

        self.docker
            .stop_container(&container_name, None)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to stop container: {}", e)))?;

        self.remove(&container_name).await
    }
}
