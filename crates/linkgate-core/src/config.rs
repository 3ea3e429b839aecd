//! Job configuration.
//!
//! Loaded from an optional TOML file, then overridden by `LINKGATE_*`
//! environment variables. Every field has a default so an empty file (or no
//! file at all) yields the stock link-check job.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::error::{LinkgateError, Result};
use crate::trigger::{PathFilter, TriggerRules};

/// Top-level job configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobConfig {
    /// Workflow identity, the first half of every concurrency key.
    pub workflow: String,
    pub triggers: TriggerRules,
    pub server: ServerConfig,
    pub readiness: ReadinessConfig,
    pub verifier: VerifierConfig,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workflow: "linkcheck".to_string(),
            triggers: TriggerRules::default(),
            server: ServerConfig::default(),
            readiness: ReadinessConfig::default(),
            verifier: VerifierConfig::default(),
        }
    }
}

/// The containerized documentation server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Container runtime executable.
    pub runtime: String,
    pub image: String,
    /// Host directory mounted into the container.
    pub host_dir: PathBuf,
    pub container_dir: String,
    /// Published host port. 0 lets the runtime pick a free port per job, so
    /// jobs on different keys never contend; a fixed port serializes them.
    pub host_port: u16,
    pub container_port: u16,
    /// Arguments after the image reference.
    pub command: Vec<String>,
    /// Container names are `{name_prefix}-{job}`.
    pub name_prefix: String,
    pub launch_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "peaceiris/mdbook:latest".to_string(),
            host_dir: PathBuf::from("book"),
            container_dir: "/book".to_string(),
            host_port: 0,
            container_port: 3000,
            command: vec![
                "serve".to_string(),
                "--hostname".to_string(),
                "0.0.0.0".to_string(),
            ],
            name_prefix: "book".to_string(),
            launch_timeout_secs: 300,
        }
    }
}

/// How long and how often to probe the server before verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Unconditional delay before the first probe (0 = none).
    pub settle_delay_secs: u64,
    /// Path requested on the server; any non-5xx HTTP response means ready.
    pub path: String,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: 0,
            path: "/".to_string(),
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
            timeout_secs: 60,
        }
    }
}

/// The pinned external link checker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifierConfig {
    pub version: String,
    /// Release URL; `{version}` and `{platform}` are substituted.
    pub url_template: String,
    pub platform: String,
    /// Expected SHA-256 of the release archive (hex). Unchecked when absent.
    pub sha256: Option<String>,
    pub install_dir: PathBuf,
    /// Binary location relative to the extracted archive root.
    pub binary_path: PathBuf,
    /// Arguments after the target; `-d` keeps the crawl on the target domain.
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            version: "3.0.0".to_string(),
            url_template: "https://github.com/filiph/linkcheck/releases/download/{version}/linkcheck-{version}-{platform}.tar.gz".to_string(),
            platform: "linux-x64".to_string(),
            sha256: None,
            install_dir: PathBuf::from(".linkgate/tools"),
            binary_path: PathBuf::from("linkcheck/linkcheck"),
            args: vec!["-d".to_string()],
            timeout_secs: 1_800,
        }
    }
}

impl JobConfig {
    /// Load from `path` (if any), apply environment overrides, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                debug!(path = %path.display(), "loading job config");
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LinkgateError::Config(e.to_string()))
    }

    /// Apply `LINKGATE_*` overrides using `lookup` (injected for tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LINKGATE_WORKFLOW") {
            self.workflow = v;
        }
        if let Some(v) = lookup("LINKGATE_IMAGE") {
            self.server.image = v;
        }
        if let Some(v) = lookup("LINKGATE_HOST_DIR") {
            self.server.host_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LINKGATE_CONTAINER_RUNTIME") {
            self.server.runtime = v;
        }
        if let Some(v) = lookup("LINKGATE_HOST_PORT") {
            self.server.host_port = parse_env("LINKGATE_HOST_PORT", &v)?;
        }
        if let Some(v) = lookup("LINKGATE_READY_TIMEOUT_SECS") {
            self.readiness.timeout_secs = parse_env("LINKGATE_READY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("LINKGATE_VERIFIER_VERSION") {
            self.verifier.version = v;
        }
        if let Some(v) = lookup("LINKGATE_VERIFIER_SHA256") {
            self.verifier.sha256 = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workflow.trim().is_empty() {
            return Err(LinkgateError::Config("workflow must not be empty".to_string()));
        }
        if self.server.image.trim().is_empty() {
            return Err(LinkgateError::Config("server.image must not be empty".to_string()));
        }
        if self.server.runtime.trim().is_empty() {
            return Err(LinkgateError::Config(
                "server.runtime must not be empty".to_string(),
            ));
        }
        if self.server.container_port == 0 {
            return Err(LinkgateError::Config(
                "server.container_port must not be 0".to_string(),
            ));
        }
        if !self.readiness.path.starts_with('/') {
            return Err(LinkgateError::Config(format!(
                "readiness.path must start with '/': {}",
                self.readiness.path
            )));
        }
        if self.readiness.initial_backoff_ms == 0
            || self.readiness.max_backoff_ms < self.readiness.initial_backoff_ms
        {
            return Err(LinkgateError::Config(
                "readiness backoff must be positive and max >= initial".to_string(),
            ));
        }
        if self.verifier.url_template.trim().is_empty() {
            return Err(LinkgateError::Config(
                "verifier.url_template must not be empty".to_string(),
            ));
        }
        for pattern in &self.triggers.pull_request_paths {
            PathFilter::parse(pattern)?;
        }
        if let Some(digest) = &self.verifier.sha256 {
            let well_formed = digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit());
            if !well_formed {
                return Err(LinkgateError::Config(format!(
                    "verifier.sha256 is not a hex SHA-256 digest: {digest}"
                )));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| LinkgateError::Config(format!("{key} has an invalid value: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = JobConfig::default();
        config.validate().expect("default config valid");
        assert_eq!(config.workflow, "linkcheck");
        assert_eq!(config.server.host_port, 0, "host port is assigned per job");
        assert_eq!(config.server.container_port, 3000);
        assert_eq!(config.readiness.path, "/");
        assert_eq!(config.verifier.args, vec!["-d".to_string()]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = JobConfig::from_toml_str(
            r#"
            workflow = "docs"

            [server]
            host_port = 8080

            [triggers]
            push_branches = ["main"]
            "#,
        )
        .expect("parse");
        assert_eq!(config.workflow, "docs");
        assert_eq!(config.server.host_port, 8080);
        assert_eq!(config.server.image, "peaceiris/mdbook:latest");
        assert_eq!(config.triggers.push_branches, vec!["main".to_string()]);
        assert!(config.triggers.merge_group);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LINKGATE_HOST_PORT", "4000"),
            ("LINKGATE_IMAGE", "ghcr.io/acme/mdbook:0.4"),
            ("LINKGATE_VERIFIER_VERSION", "3.1.0"),
        ]);
        let mut config = JobConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .expect("apply env");
        assert_eq!(config.server.host_port, 4000);
        assert_eq!(config.server.image, "ghcr.io/acme/mdbook:0.4");
        assert_eq!(config.verifier.version, "3.1.0");
    }

    #[test]
    fn test_env_override_rejects_bad_port() {
        let mut config = JobConfig::default();
        let err = config
            .apply_env(|k| (k == "LINKGATE_HOST_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("LINKGATE_HOST_PORT"));
    }

    #[test]
    fn test_validate_rejects_zero_container_port() {
        let mut config = JobConfig::default();
        config.server.container_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsupported_path_filter() {
        let mut config = JobConfig::default();
        config.triggers.pull_request_paths = vec!["book/**/*.md".to_string()];
        assert!(config.validate().is_ok());

        config.triggers.pull_request_paths = vec!["book/[ab]/*.md".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("book/[ab]/*.md"));
    }

    #[test]
    fn test_validate_rejects_relative_readiness_path() {
        let mut config = JobConfig::default();
        config.readiness.path = "index.html".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_malformed_digest() {
        let mut config = JobConfig::default();
        config.verifier.sha256 = Some("not-a-digest".to_string());
        assert!(config.validate().is_err());

        config.verifier.sha256 = Some("a".repeat(64));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linkgate.toml");
        std::fs::write(&path, "[readiness]\ntimeout_secs = 5\n").unwrap();

        let config = JobConfig::load(Some(&path)).expect("load");
        assert_eq!(config.readiness.timeout_secs, 5);
    }

    #[test]
    fn test_toml_output_reparses() {
        let config = JobConfig::default();
        let rendered = config.to_toml_string().expect("render");
        let reparsed = JobConfig::from_toml_str(&rendered).expect("reparse");
        assert_eq!(config, reparsed);
    }
}
