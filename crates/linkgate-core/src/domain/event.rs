//! Repository trigger events and the concurrency key derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::{LinkgateError, Result};

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// A repository event that may start a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Push to a branch (`git_ref` is e.g. `refs/heads/unstable`).
    Push { git_ref: String },

    /// Pull request with the set of paths it changes.
    PullRequest {
        git_ref: String,
        #[serde(default)]
        changed_paths: Vec<String>,
    },

    /// Merge queue event. Never filtered by path.
    MergeGroup { git_ref: String },
}

impl TriggerEvent {
    /// Push to a branch by name.
    pub fn push(branch: &str) -> Self {
        TriggerEvent::Push {
            git_ref: format!("{BRANCH_REF_PREFIX}{branch}"),
        }
    }

    /// Pull request `number` touching `paths`.
    pub fn pull_request<I, S>(number: u64, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TriggerEvent::PullRequest {
            git_ref: format!("refs/pull/{number}/merge"),
            changed_paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Merge group event for the given queue ref.
    pub fn merge_group(git_ref: &str) -> Self {
        TriggerEvent::MergeGroup {
            git_ref: git_ref.to_string(),
        }
    }

    /// Parse one JSON-encoded event.
    pub fn from_json(raw: &str) -> Result<Self> {
        let event: TriggerEvent = serde_json::from_str(raw)?;
        event.validate()?;
        Ok(event)
    }

    /// Reject events that cannot be keyed.
    pub fn validate(&self) -> Result<()> {
        if self.git_ref().trim().is_empty() {
            return Err(LinkgateError::InvalidEvent(format!(
                "{} event has an empty git_ref",
                self.kind()
            )));
        }
        Ok(())
    }

    pub fn git_ref(&self) -> &str {
        match self {
            TriggerEvent::Push { git_ref }
            | TriggerEvent::PullRequest { git_ref, .. }
            | TriggerEvent::MergeGroup { git_ref } => git_ref,
        }
    }

    /// Branch name for push events (`refs/heads/` stripped).
    pub fn branch(&self) -> Option<&str> {
        match self {
            TriggerEvent::Push { git_ref } => {
                Some(git_ref.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(git_ref))
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TriggerEvent::Push { .. } => "push",
            TriggerEvent::PullRequest { .. } => "pull_request",
            TriggerEvent::MergeGroup { .. } => "merge_group",
        }
    }
}

/// Identity used to deduplicate overlapping runs: `{workflow}-{git_ref}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConcurrencyKey(pub String);

impl ConcurrencyKey {
    pub fn for_event(workflow: &str, event: &TriggerEvent) -> Self {
        ConcurrencyKey(format!("{}-{}", workflow, event.git_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConcurrencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
