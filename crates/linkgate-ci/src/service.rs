//! Ephemeral documentation server, run in a container.
//!
//! The launched container is represented by an owned [`ServiceHandle`] that
//! the pipeline threads through its steps; no step looks a container up by a
//! well-known global name.

use async_trait::async_trait;
use linkgate_core::ServerConfig;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{CiError, Result};
use crate::runner::CommandRunner;
use crate::stage::StepCommand;

/// Everything needed to start one server container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSpec {
    pub runtime: String,
    /// Unique per job.
    pub name: String,
    pub image: String,
    pub host_dir: PathBuf,
    pub container_dir: String,
    pub host_port: u16,
    pub container_port: u16,
    pub command: Vec<String>,
    pub launch_timeout_secs: u64,
}

impl ServerSpec {
    /// Build the spec for one job; `job_tag` makes the container name unique.
    pub fn from_config(config: &ServerConfig, job_tag: &str) -> Self {
        Self {
            runtime: config.runtime.clone(),
            name: format!("{}-{}", config.name_prefix, job_tag),
            image: config.image.clone(),
            host_dir: absolutize(&config.host_dir),
            container_dir: config.container_dir.clone(),
            host_port: config.host_port,
            container_port: config.container_port,
            command: config.command.clone(),
            launch_timeout_secs: config.launch_timeout_secs,
        }
    }
}

/// Bind mounts need absolute host paths.
fn absolutize(path: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Owned handle to a running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    /// Runtime executable that owns the container.
    pub runtime: String,
    pub name: String,
    /// Runtime-assigned id (first line of `docker run -d` output).
    pub container_id: String,
    pub host_port: u16,
}

impl ServiceHandle {
    /// Address the readiness probe connects to.
    pub fn probe_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.host_port))
    }

    /// Target handed to the verifier.
    pub fn verifier_target(&self) -> String {
        format!("localhost:{}", self.host_port)
    }
}

/// Container runtime seam.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start the server detached. Failure here is fatal to the job.
    async fn launch(&self, spec: &ServerSpec) -> Result<ServiceHandle>;

    /// Dump the container's logs (best-effort).
    async fn logs(&self, handle: &ServiceHandle) -> Result<String>;

    /// Stop and remove the container.
    async fn stop(&self, handle: &ServiceHandle) -> Result<()>;
}

/// [`ContainerRuntime`] backed by the docker (or docker-compatible) CLI.
#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    /// Host port the runtime assigned to the container port.
    async fn published_port(&self, spec: &ServerSpec) -> Result<u16> {
        let command = StepCommand::docker_port(&spec.runtime, &spec.name, spec.container_port);
        let output = CommandRunner::execute(&command)
            .await
            .map_err(|e| CiError::Launch(e.to_string()))?;
        if !output.passed() {
            return Err(CiError::Launch(format!(
                "{} exited with code {}: {}",
                command.display(),
                output.exit_code,
                output.stderr.trim()
            )));
        }
        parse_published_port(&output.stdout).ok_or_else(|| {
            CiError::Launch(format!(
                "no host port published for {}: {:?}",
                spec.name,
                output.stdout.trim()
            ))
        })
    }
}

/// First port in `docker port` output (`0.0.0.0:49153`, `[::]:49153`).
fn parse_published_port(stdout: &str) -> Option<u16> {
    stdout
        .lines()
        .filter_map(|line| line.trim().rsplit_once(':'))
        .find_map(|(_, port)| port.parse().ok())
        .filter(|port| *port != 0)
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn launch(&self, spec: &ServerSpec) -> Result<ServiceHandle> {
        let command = StepCommand::docker_run(spec);
        info!(container = %spec.name, command = %command.display(), "launching server");

        let output = CommandRunner::execute(&command)
            .await
            .map_err(|e| CiError::Launch(e.to_string()))?;
        if !output.passed() {
            return Err(CiError::Launch(format!(
                "{} exited with code {}: {}",
                command.display(),
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let container_id = output.stdout.lines().next().unwrap_or_default().trim().to_string();
        let mut handle = ServiceHandle {
            runtime: spec.runtime.clone(),
            name: spec.name.clone(),
            container_id,
            host_port: spec.host_port,
        };

        if spec.host_port == 0 {
            match self.published_port(spec).await {
                Ok(port) => handle.host_port = port,
                Err(e) => {
                    // The container is up but unusable; nothing else will stop it.
                    let _ = self.stop(&handle).await;
                    return Err(e);
                }
            }
        }

        info!(container = %handle.name, host_port = handle.host_port, "server launched");
        Ok(handle)
    }

    async fn logs(&self, handle: &ServiceHandle) -> Result<String> {
        let output =
            CommandRunner::execute(&StepCommand::docker_logs(&handle.runtime, &handle.name)).await?;
        if !output.passed() {
            warn!(container = %handle.name, exit_code = output.exit_code, "log retrieval failed");
        }
        Ok(output.combined())
    }

    async fn stop(&self, handle: &ServiceHandle) -> Result<()> {
        let output =
            CommandRunner::execute(&StepCommand::docker_rm(&handle.runtime, &handle.name)).await?;
        if !output.passed() {
            warn!(
                container = %handle.name,
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "container teardown failed"
            );
        }
        Ok(())
    }
}
