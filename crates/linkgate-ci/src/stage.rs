//! Command lines for the external collaborators a job drives.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::service::ServerSpec;

/// Timeout for short housekeeping commands (logs, rm, tar).
pub const HOUSEKEEPING_TIMEOUT_SECS: u64 = 60;

/// One external command invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepCommand {
    /// Human-readable name used in logs and errors.
    pub name: String,

    /// Executable.
    pub program: String,

    pub args: Vec<String>,

    /// Timeout in seconds (0 = no timeout).
    pub timeout_secs: u64,
}

impl StepCommand {
    pub fn new(name: &str, program: &str, args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args,
            timeout_secs,
        }
    }

    /// `docker run -d --rm --name N -v host:ctr -p H:C image cmd...`
    ///
    /// A host port of 0 publishes `-p C` so the runtime picks a free port.
    pub fn docker_run(spec: &ServerSpec) -> Self {
        let publish = if spec.host_port == 0 {
            spec.container_port.to_string()
        } else {
            format!("{}:{}", spec.host_port, spec.container_port)
        };
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "-v".to_string(),
            format!("{}:{}", spec.host_dir.display(), spec.container_dir),
            "-p".to_string(),
            publish,
            spec.image.clone(),
        ];
        args.extend(spec.command.iter().cloned());
        Self::new("server_launch", &spec.runtime, args, spec.launch_timeout_secs)
    }

    /// `docker logs N`
    pub fn docker_logs(runtime: &str, name: &str) -> Self {
        Self::new(
            "server_logs",
            runtime,
            vec!["logs".to_string(), name.to_string()],
            HOUSEKEEPING_TIMEOUT_SECS,
        )
    }

    /// `docker port N C/tcp`
    pub fn docker_port(runtime: &str, name: &str, container_port: u16) -> Self {
        Self::new(
            "server_port",
            runtime,
            vec![
                "port".to_string(),
                name.to_string(),
                format!("{container_port}/tcp"),
            ],
            HOUSEKEEPING_TIMEOUT_SECS,
        )
    }

    /// `docker rm -f N`
    pub fn docker_rm(runtime: &str, name: &str) -> Self {
        Self::new(
            "server_teardown",
            runtime,
            vec!["rm".to_string(), "-f".to_string(), name.to_string()],
            HOUSEKEEPING_TIMEOUT_SECS,
        )
    }

    /// `<binary> <target> <args...>`
    pub fn verifier(binary: &Path, target: &str, args: &[String], timeout_secs: u64) -> Self {
        let mut full_args = vec![target.to_string()];
        full_args.extend(args.iter().cloned());
        Self::new(
            "verifier",
            &binary.to_string_lossy(),
            full_args,
            timeout_secs,
        )
    }

    /// `tar -xzf <archive> -C <dest>`
    pub fn extract_tar(archive: &Path, dest: &Path) -> Self {
        Self::new(
            "verifier_extract",
            "tar",
            vec![
                "-xzf".to_string(),
                archive.to_string_lossy().into_owned(),
                "-C".to_string(),
                dest.to_string_lossy().into_owned(),
            ],
            HOUSEKEEPING_TIMEOUT_SECS,
        )
    }

    /// Shell-style rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
