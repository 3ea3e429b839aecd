//! Trigger gate: decides whether an event starts the job.
//!
//! The gate is a pure predicate over [`TriggerEvent`]:
//! - push runs only for a designated branch
//! - pull_request runs only when a changed path falls under a path filter
//! - merge_group runs unconditionally (unless disabled)

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::error::{LinkgateError, Result};
use crate::domain::event::TriggerEvent;

/// Trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TriggerRules {
    /// Branch names whose pushes start the job.
    pub push_branches: Vec<String>,

    /// Path filters for pull requests (`book/**` style).
    pub pull_request_paths: Vec<String>,

    /// Whether merge-group events start the job.
    pub merge_group: bool,
}

impl Default for TriggerRules {
    fn default() -> Self {
        Self {
            push_branches: vec!["unstable".to_string()],
            pull_request_paths: vec!["book/**".to_string()],
            merge_group: true,
        }
    }
}

/// A single compiled path filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathFilter {
    /// `**`: every path.
    Any,
    /// `dir/**` or `dir/`: everything beneath `dir/`.
    Prefix(String),
    /// A literal path: that file, or anything beneath it as a directory.
    Exact(String),
    /// Any other pattern using `*`, `?` or `**`.
    Glob(GlobPattern),
}

impl PathFilter {
    /// Compile one filter pattern.
    ///
    /// `*` and `?` never cross a `/`; `**` does, and `**/` also matches no
    /// directory at all. Bracket and brace syntax is rejected rather than
    /// taken literally.
    pub fn parse(pattern: &str) -> Result<Self> {
        let pattern = normalize(pattern);
        if pattern.is_empty() || pattern == "**" {
            return Ok(PathFilter::Any);
        }
        if let Some(dir) = pattern.strip_suffix("/**") {
            if !has_wildcard(dir) {
                return Ok(PathFilter::Prefix(format!("{dir}/")));
            }
        }
        if has_wildcard(pattern) {
            return GlobPattern::compile(pattern).map(PathFilter::Glob);
        }
        if pattern.ends_with('/') {
            return Ok(PathFilter::Prefix(pattern.to_string()));
        }
        Ok(PathFilter::Exact(pattern.to_string()))
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = normalize(path);
        match self {
            PathFilter::Any => true,
            PathFilter::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathFilter::Exact(exact) => {
                path == exact
                    || path
                        .strip_prefix(exact.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            PathFilter::Glob(glob) => glob.regex.is_match(path),
        }
    }
}

/// A wildcard pattern compiled to an anchored regex.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    fn compile(pattern: &str) -> Result<Self> {
        let mut re = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                }
                '*' => re.push_str("[^/]*"),
                '?' => re.push_str("[^/]"),
                '[' | ']' | '{' | '}' => {
                    return Err(LinkgateError::Config(format!(
                        "path filter '{pattern}' uses unsupported glob syntax '{c}'"
                    )))
                }
                c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        re.push('$');

        let regex = Regex::new(&re)
            .map_err(|e| LinkgateError::Config(format!("path filter '{pattern}': {e}")))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for GlobPattern {}

fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', ']', '{', '}'])
}

fn normalize(path: &str) -> &str {
    let path = path.trim();
    let path = path.strip_prefix("./").unwrap_or(path);
    path.trim_start_matches('/')
}

/// Gate decision with a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateDecision {
    pub run: bool,
    pub reason: String,
}

/// Trigger gate evaluation rules.
#[derive(Debug, Clone)]
pub struct TriggerGate {
    rules: TriggerRules,
    path_filters: Vec<PathFilter>,
}

impl TriggerGate {
    pub fn new(rules: TriggerRules) -> Self {
        // Invalid patterns are rejected by `JobConfig::validate`; one that
        // slips through here matches nothing.
        let path_filters = rules
            .pull_request_paths
            .iter()
            .filter_map(|p| match PathFilter::parse(p) {
                Ok(filter) => Some(filter),
                Err(e) => {
                    warn!(pattern = %p, error = %e, "ignoring path filter");
                    None
                }
            })
            .collect();
        Self {
            rules,
            path_filters,
        }
    }

    pub fn rules(&self) -> &TriggerRules {
        &self.rules
    }

    /// Whether `event` starts the job.
    pub fn should_run(&self, event: &TriggerEvent) -> bool {
        self.decide(event).run
    }

    /// Evaluate `event` and explain the decision.
    pub fn decide(&self, event: &TriggerEvent) -> GateDecision {
        match event {
            TriggerEvent::Push { .. } => {
                let branch = event.branch().unwrap_or_default();
                if self.rules.push_branches.iter().any(|b| b == branch) {
                    GateDecision {
                        run: true,
                        reason: format!("push to designated branch '{branch}'"),
                    }
                } else {
                    GateDecision {
                        run: false,
                        reason: format!("push to '{branch}' is not a designated branch"),
                    }
                }
            }
            TriggerEvent::PullRequest { changed_paths, .. } => {
                let hit = changed_paths
                    .iter()
                    .find(|path| self.path_filters.iter().any(|f| f.matches(path)));
                match hit {
                    Some(path) => GateDecision {
                        run: true,
                        reason: format!("pull request touches '{path}'"),
                    },
                    None => GateDecision {
                        run: false,
                        reason: format!(
                            "pull request changes {} path(s), none under {:?}",
                            changed_paths.len(),
                            self.rules.pull_request_paths
                        ),
                    },
                }
            }
            TriggerEvent::MergeGroup { .. } => {
                if self.rules.merge_group {
                    GateDecision {
                        run: true,
                        reason: "merge group event".to_string(),
                    }
                } else {
                    GateDecision {
                        run: false,
                        reason: "merge group trigger disabled".to_string(),
                    }
                }
            }
        }
    }
}

impl Default for TriggerGate {
    fn default() -> Self {
        Self::new(TriggerRules::default())
    }
}
