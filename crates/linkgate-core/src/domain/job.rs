//! Job lifecycle: steps, states, and terminal outcomes.
//!
//! ```text
//! Pending -> Skipped | Cancelled
//! Pending -> Running(LaunchServer) -> Running(WaitReady) -> Running(EmitLogs)
//!         -> Running(RunVerifier) -> Succeeded
//! Running(_) -> Failed | Cancelled
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::{LinkgateError, Result};

/// Exit code reported for a cancelled job (SIGINT convention).
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// One step of the running job, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    LaunchServer,
    WaitReady,
    EmitLogs,
    RunVerifier,
}

impl JobStep {
    pub const ALL: [JobStep; 4] = [
        JobStep::LaunchServer,
        JobStep::WaitReady,
        JobStep::EmitLogs,
        JobStep::RunVerifier,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobStep::LaunchServer => "launch_server",
            JobStep::WaitReady => "wait_ready",
            JobStep::EmitLogs => "emit_logs",
            JobStep::RunVerifier => "run_verifier",
        }
    }

    /// The step that follows this one, if any.
    pub fn next(&self) -> Option<JobStep> {
        match self {
            JobStep::LaunchServer => Some(JobStep::WaitReady),
            JobStep::WaitReady => Some(JobStep::EmitLogs),
            JobStep::EmitLogs => Some(JobStep::RunVerifier),
            JobStep::RunVerifier => None,
        }
    }
}

impl fmt::Display for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Job state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Skipped,
    Running(JobStep),
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Skipped | JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(self, next: JobState) -> Result<JobState> {
        let allowed = match (self, next) {
            (JobState::Pending, JobState::Skipped) => true,
            // Superseded before the first step started.
            (JobState::Pending, JobState::Cancelled) => true,
            (JobState::Pending, JobState::Running(JobStep::LaunchServer)) => true,
            (JobState::Running(current), JobState::Running(step)) => current.next() == Some(step),
            (JobState::Running(JobStep::RunVerifier), JobState::Succeeded) => true,
            (JobState::Running(_), JobState::Failed | JobState::Cancelled) => true,
            _ => false,
        };

        if allowed {
            Ok(next)
        } else {
            Err(LinkgateError::InvalidTransition {
                current: self.to_string(),
                requested: next.to_string(),
            })
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => f.write_str("pending"),
            JobState::Skipped => f.write_str("skipped"),
            JobState::Running(step) => write!(f, "running({step})"),
            JobState::Succeeded => f.write_str("succeeded"),
            JobState::Failed => f.write_str("failed"),
            JobState::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The trigger gate declined the event; nothing was launched.
    Skipped { reason: String },

    Succeeded,

    /// `exit_code` is set only when the verifier itself exited non-zero.
    Failed {
        step: JobStep,
        reason: String,
        exit_code: Option<i32>,
    },

    /// Superseded by a newer event for the same concurrency key.
    Cancelled { step: Option<JobStep> },
}

impl JobOutcome {
    /// Whether the surrounding pipeline should treat this as a pass.
    pub fn passed(&self) -> bool {
        matches!(self, JobOutcome::Succeeded | JobOutcome::Skipped { .. })
    }

    pub fn state(&self) -> JobState {
        match self {
            JobOutcome::Skipped { .. } => JobState::Skipped,
            JobOutcome::Succeeded => JobState::Succeeded,
            JobOutcome::Failed { .. } => JobState::Failed,
            JobOutcome::Cancelled { .. } => JobState::Cancelled,
        }
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            JobOutcome::Skipped { .. } | JobOutcome::Succeeded => 0,
            // A verifier killed by a signal reports -1; that maps to 1.
            JobOutcome::Failed {
                exit_code: Some(code),
                ..
            } if *code > 0 => *code,
            JobOutcome::Failed { .. } => 1,
            JobOutcome::Cancelled { .. } => CANCELLED_EXIT_CODE,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
            JobOutcome::Succeeded => f.write_str("succeeded"),
            JobOutcome::Failed { step, reason, .. } => write!(f, "failed at {step}: {reason}"),
            JobOutcome::Cancelled { step: Some(step) } => write!(f, "cancelled during {step}"),
            JobOutcome::Cancelled { step: None } => f.write_str("cancelled"),
        }
    }
}
