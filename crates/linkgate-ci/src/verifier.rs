//! The external link checker: pinned-release installation and invocation.
//!
//! The verifier's exit code is authoritative. Zero means no broken links;
//! any other code fails the job. The code itself is not interpreted.

use async_trait::async_trait;
use linkgate_core::VerifierConfig;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{CiError, Result};
use crate::runner::{CommandOutput, CommandRunner};
use crate::stage::StepCommand;

/// Runs the link checker against a served site.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Crawl `target` (`host:port`). Spawn errors and timeouts are `Err`;
    /// a completed run, pass or fail, is `Ok`.
    async fn verify(&self, target: &str) -> Result<CommandOutput>;
}

/// Produces a ready-to-run [`Verifier`] (e.g. by downloading it).
#[async_trait]
pub trait VerifierSource: Send + Sync {
    async fn prepare(&self) -> Result<Arc<dyn Verifier>>;
}

/// The linkcheck binary at a known path.
#[derive(Debug, Clone)]
pub struct LinkcheckVerifier {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl LinkcheckVerifier {
    pub fn new(binary: PathBuf, config: &VerifierConfig) -> Self {
        Self {
            binary,
            args: config.args.clone(),
            timeout_secs: config.timeout_secs,
        }
    }
}

#[async_trait]
impl Verifier for LinkcheckVerifier {
    async fn verify(&self, target: &str) -> Result<CommandOutput> {
        let command = StepCommand::verifier(&self.binary, target, &self.args, self.timeout_secs);
        info!(command = %command.display(), "running verifier");
        CommandRunner::execute(&command).await
    }
}

/// An already-installed binary needs no preparation.
#[async_trait]
impl VerifierSource for LinkcheckVerifier {
    async fn prepare(&self) -> Result<Arc<dyn Verifier>> {
        Ok(Arc::new(self.clone()))
    }
}

/// Downloads and unpacks the pinned verifier release.
#[derive(Debug, Clone)]
pub struct VerifierInstaller {
    config: VerifierConfig,
}

impl VerifierInstaller {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Release URL with `{version}` and `{platform}` substituted.
    pub fn release_url(&self) -> String {
        self.config
            .url_template
            .replace("{version}", &self.config.version)
            .replace("{platform}", &self.config.platform)
    }

    /// Directory the archive for this version is unpacked into.
    pub fn version_dir(&self) -> PathBuf {
        self.config.install_dir.join(&self.config.version)
    }

    /// Expected location of the binary once installed.
    pub fn binary_path(&self) -> PathBuf {
        self.version_dir().join(&self.config.binary_path)
    }

    /// Install the verifier, reusing an existing install of the same version.
    pub async fn install(&self) -> Result<PathBuf> {
        let binary = self.binary_path();
        if binary.is_file() {
            debug!(path = %binary.display(), "verifier already installed");
            return Ok(binary);
        }

        let url = self.release_url();
        info!(%url, "downloading verifier");
        let archive = self.download(&url).await?;
        self.install_archive(&archive).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("linkgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let response = client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Check and unpack a downloaded `.tar.gz` release archive.
    pub async fn install_archive(&self, archive: &[u8]) -> Result<PathBuf> {
        if let Some(expected) = &self.config.sha256 {
            verify_digest(archive, expected)?;
        }

        let version_dir = self.version_dir();
        tokio::fs::create_dir_all(&version_dir).await?;

        let archive_path = version_dir.join("release.tar.gz");
        tokio::fs::write(&archive_path, archive).await?;

        let extract = StepCommand::extract_tar(&archive_path, &version_dir);
        let output = CommandRunner::execute(&extract)
            .await
            .map_err(|e| CiError::VerifierExtract(e.to_string()))?;
        // The archive is scratch data either way.
        let _ = tokio::fs::remove_file(&archive_path).await;
        if !output.passed() {
            return Err(CiError::VerifierExtract(format!(
                "tar exited with code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let binary = self.binary_path();
        if !binary.is_file() {
            return Err(CiError::VerifierExtract(format!(
                "{} not found in release archive",
                self.config.binary_path.display()
            )));
        }
        info!(path = %binary.display(), "verifier installed");
        Ok(binary)
    }
}

#[async_trait]
impl VerifierSource for VerifierInstaller {
    async fn prepare(&self) -> Result<Arc<dyn Verifier>> {
        let binary = self.install().await?;
        Ok(Arc::new(LinkcheckVerifier::new(binary, &self.config)))
    }
}

/// Compare the SHA-256 of `bytes` against a hex digest (case-insensitive).
pub fn verify_digest(bytes: &[u8], expected: &str) -> Result<()> {
    let actual = hex::encode(Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(CiError::VerifierIntegrity {
            expected: expected.trim().to_lowercase(),
            actual,
        })
    }
}
