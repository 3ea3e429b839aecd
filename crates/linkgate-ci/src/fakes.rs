//! In-process fakes for the container runtime and verifier (testing only)
//!
//! `FakeRuntime` binds a real local port per launch and answers HTTP on it,
//! so the readiness probe runs unmodified against it. Like docker, it binds
//! the spec's host port, or any free port when that is 0. `FakeVerifierSource` records
//! every target it is asked to check and exits with a configured code.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::error::{CiError, Result};
use crate::runner::CommandOutput;
use crate::service::{ContainerRuntime, ServerSpec, ServiceHandle};
use crate::verifier::{Verifier, VerifierSource};

// ---------------------------------------------------------------------------
// FakeRuntime
// ---------------------------------------------------------------------------

/// Container runtime that "serves" by answering HTTP on a localhost port.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    /// Fail every launch.
    pub fail_launch: bool,
    /// Hand out a port nothing listens on, so readiness never succeeds.
    pub never_ready: bool,
    /// Fail log retrieval.
    pub fail_logs: bool,
    /// Time a launch takes.
    pub launch_delay: Duration,
    launched: Mutex<Vec<ServerSpec>>,
    stopped: Mutex<Vec<String>>,
    servers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_launch: true,
            ..Self::default()
        }
    }

    pub fn with_launch_delay(delay: Duration) -> Self {
        Self {
            launch_delay: delay,
            ..Self::default()
        }
    }

    pub fn never_ready() -> Self {
        Self {
            never_ready: true,
            ..Self::default()
        }
    }

    pub fn without_logs() -> Self {
        Self {
            fail_logs: true,
            ..Self::default()
        }
    }

    /// Specs of every completed launch.
    pub fn launched(&self) -> Vec<ServerSpec> {
        self.launched.lock().unwrap().clone()
    }

    /// Names of every stopped container.
    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    /// Containers launched and not yet stopped.
    pub fn running(&self) -> usize {
        self.servers.lock().unwrap().len()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn launch(&self, spec: &ServerSpec) -> Result<ServiceHandle> {
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        if self.fail_launch {
            return Err(CiError::Launch(format!(
                "Unable to find image '{}' locally",
                spec.image
            )));
        }

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, spec.host_port))
            .await
            .map_err(|e| {
                CiError::Launch(format!(
                    "Bind for 0.0.0.0:{} failed: port is already allocated ({e})",
                    spec.host_port
                ))
            })?;
        let host_port = listener.local_addr()?.port();
        if self.never_ready {
            drop(listener);
        } else {
            self.servers
                .lock()
                .unwrap()
                .insert(spec.name.clone(), tokio::spawn(serve_ok(listener)));
        }

        self.launched.lock().unwrap().push(spec.clone());
        Ok(ServiceHandle {
            runtime: spec.runtime.clone(),
            name: spec.name.clone(),
            container_id: format!("fake-{}", spec.name),
            host_port,
        })
    }

    async fn logs(&self, handle: &ServiceHandle) -> Result<String> {
        if self.fail_logs {
            return Err(CiError::Launch(format!("no such container: {}", handle.name)));
        }
        Ok(format!(
            "[INFO] (mdbook::cmd::serve): Serving on: http://0.0.0.0:{}\n",
            handle.host_port
        ))
    }

    async fn stop(&self, handle: &ServiceHandle) -> Result<()> {
        let server = self.servers.lock().unwrap().remove(&handle.name);
        if let Some(server) = server {
            server.abort();
            // The listener is released once the aborted task is gone.
            let _ = server.await;
        }
        self.stopped.lock().unwrap().push(handle.name.clone());
        Ok(())
    }
}

/// Answer every request with `200 OK`.
async fn serve_ok(listener: TcpListener) {
    while let Ok((mut stream, _)) = listener.accept().await {
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                .await;
            let _ = stream.shutdown().await;
        });
    }
}

// ---------------------------------------------------------------------------
// FakeVerifierSource
// ---------------------------------------------------------------------------

/// Verifier source whose verifier exits with a fixed code.
#[derive(Debug, Default)]
pub struct FakeVerifierSource {
    pub exit_code: i32,
    /// Fail preparation as if the release download failed.
    pub fail_download: bool,
    /// Time each verification takes.
    pub verify_delay: Duration,
    targets: Arc<Mutex<Vec<String>>>,
}

impl FakeVerifierSource {
    pub fn exiting(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Self::default()
        }
    }

    /// Verifier that passes after `delay`.
    pub fn slow(delay: Duration) -> Self {
        Self {
            verify_delay: delay,
            ..Self::default()
        }
    }

    pub fn unreachable_release() -> Self {
        Self {
            fail_download: true,
            ..Self::default()
        }
    }

    /// Every target the verifier was run against, in order.
    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl VerifierSource for FakeVerifierSource {
    async fn prepare(&self) -> Result<Arc<dyn Verifier>> {
        if self.fail_download {
            return Err(CiError::VerifierDownload(
                "error sending request for url (https://github.com/...)".to_string(),
            ));
        }
        Ok(Arc::new(FakeVerifier {
            exit_code: self.exit_code,
            delay: self.verify_delay,
            targets: Arc::clone(&self.targets),
        }))
    }
}

struct FakeVerifier {
    exit_code: i32,
    delay: Duration,
    targets: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Verifier for FakeVerifier {
    async fn verify(&self, target: &str) -> Result<CommandOutput> {
        self.targets.lock().unwrap().push(target.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let stdout = if self.exit_code == 0 {
            format!("Crawling {target}: 12 pages, 0 errors\n")
        } else {
            format!("Crawling {target}: 12 pages, 2 errors\nhttp://{target}/missing.html\n")
        };
        Ok(CommandOutput {
            name: "verifier".to_string(),
            exit_code: self.exit_code,
            stdout,
            stderr: String::new(),
            duration_ms: self.delay.as_millis() as u64,
        })
    }
}
