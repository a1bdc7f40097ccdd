//! Container execution backends for Drydock CI.
//!
//! Provides executor implementations for running builds:
//! - `docker run` through the command-line client (default)
//! - The Docker Engine API

pub mod cli;
pub mod docker;
mod lines;

pub use cli::DockerCliExecutor;
pub use docker::DockerApiExecutor;
pub use drydock_core::executor::{
    ContainerExit, ContainerHandle, ContainerSpec, Executor, LogLine, LogStream, VolumeMount,
};
