//! Job pipeline: gate, launch, wait for readiness, dump logs, verify.
//!
//! Each step produces a [`StepRecord`]. The job's [`JobState`] is advanced
//! through the lifecycle transitions defined in `linkgate_core`, and the
//! cancellation token is checked at every step boundary and raced against
//! every long-running step.

use chrono::{DateTime, Utc};
use linkgate_core::{
    ConcurrencyKey, JobConfig, JobOutcome, JobState, JobStep, TriggerEvent, TriggerGate,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::{CiError, Result};
use crate::readiness::ReadinessProbe;
use crate::service::{ContainerRuntime, ServerSpec, ServiceHandle};
use crate::verifier::VerifierSource;

/// Target for re-emitted container log lines.
pub const SERVER_LOG_TARGET: &str = "linkgate::server";

/// One job to run.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: Uuid,
    pub key: ConcurrencyKey,
    pub event: TriggerEvent,
    pub config: Arc<JobConfig>,
}

impl JobRequest {
    pub fn new(event: TriggerEvent, config: Arc<JobConfig>) -> Self {
        let key = ConcurrencyKey::for_event(&config.workflow, &event);
        Self {
            job_id: Uuid::new_v4(),
            key,
            event,
            config,
        }
    }

    /// First eight hex digits of the job id, used in container names.
    pub fn short_id(&self) -> String {
        self.job_id.simple().to_string()[..8].to_string()
    }
}

/// Record of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: JobStep,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub ok: bool,
    pub detail: String,
}

/// Result of a complete job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: Uuid,
    pub key: ConcurrencyKey,
    pub event: String,
    pub outcome: JobOutcome,
    pub steps: Vec<StepRecord>,
    /// Container logs captured during the emit-logs step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_logs: Option<String>,
    pub duration_ms: u64,
}

impl JobReport {
    pub fn passed(&self) -> bool {
        self.outcome.passed()
    }

    pub fn step(&self, step: JobStep) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step == step)
    }

    /// Whether `step` was started at all.
    pub fn ran(&self, step: JobStep) -> bool {
        self.step(step).is_some()
    }
}

/// Tracks state and step records while a job runs.
struct JobTracker {
    job_id: Uuid,
    state: JobState,
    steps: Vec<StepRecord>,
    current: Option<(JobStep, DateTime<Utc>, Instant)>,
    server_logs: Option<String>,
}

impl JobTracker {
    fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            state: JobState::Pending,
            steps: Vec::new(),
            current: None,
            server_logs: None,
        }
    }

    fn advance(&mut self, next: JobState) {
        match self.state.transition(next) {
            Ok(state) => self.state = state,
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "job lifecycle violated");
                self.state = next;
            }
        }
    }

    /// Start `step`, unless cancellation was requested in the meantime.
    fn enter(&mut self, step: JobStep, cancel: &CancelToken) -> std::result::Result<(), JobOutcome> {
        if cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        self.advance(JobState::Running(step));
        self.current = Some((step, Utc::now(), Instant::now()));
        info!(job_id = %self.job_id, step = %step, "step started");
        Ok(())
    }

    fn record(&mut self, ok: bool, detail: String) -> Option<JobStep> {
        let (step, started_at, started) = self.current.take()?;
        self.steps.push(StepRecord {
            step,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            ok,
            detail,
        });
        Some(step)
    }

    fn complete(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        if let Some(step) = self.record(true, detail.clone()) {
            info!(job_id = %self.job_id, step = %step, %detail, "step finished");
        }
    }

    /// Record a best-effort step that did not work out but does not fail the job.
    fn complete_degraded(&mut self, detail: impl Into<String>) {
        let detail = detail.into();
        if let Some(step) = self.record(false, detail.clone()) {
            warn!(job_id = %self.job_id, step = %step, %detail, "step degraded");
        }
    }

    fn fail(&mut self, err: CiError) -> JobOutcome {
        if matches!(err, CiError::Cancelled) {
            return self.cancelled();
        }
        self.fail_with(err.to_string(), None)
    }

    fn fail_with(&mut self, reason: String, exit_code: Option<i32>) -> JobOutcome {
        let step = self
            .record(false, reason.clone())
            .unwrap_or(JobStep::LaunchServer);
        self.advance(JobState::Failed);
        warn!(job_id = %self.job_id, step = %step, %reason, "job failed");
        JobOutcome::Failed {
            step,
            reason,
            exit_code,
        }
    }

    fn cancelled(&mut self) -> JobOutcome {
        let step = self.record(false, "cancelled".to_string());
        self.advance(JobState::Cancelled);
        info!(job_id = %self.job_id, step = ?step, "job cancelled");
        JobOutcome::Cancelled { step }
    }

    fn succeed(&mut self) -> JobOutcome {
        self.advance(JobState::Succeeded);
        JobOutcome::Succeeded
    }
}

/// Race `fut` against cancellation.
async fn guarded<T, F>(cancel: &CancelToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CiError::Cancelled),
        result = fut => result,
    }
}

/// Link-check job orchestrator.
#[derive(Clone)]
pub struct JobPipeline {
    runtime: Arc<dyn ContainerRuntime>,
    verifier_source: Arc<dyn VerifierSource>,
}

impl JobPipeline {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, verifier_source: Arc<dyn VerifierSource>) -> Self {
        Self {
            runtime,
            verifier_source,
        }
    }

    /// Run one job to a terminal outcome.
    ///
    /// Never returns an error: every failure is folded into
    /// [`JobOutcome::Failed`], with the failing step recorded.
    #[instrument(skip_all, fields(job_id = %request.job_id, key = %request.key))]
    pub async fn run(&self, request: &JobRequest, cancel: &CancelToken) -> JobReport {
        let start = Instant::now();
        let mut tracker = JobTracker::new(request.job_id);

        let gate = TriggerGate::new(request.config.triggers.clone());
        let decision = gate.decide(&request.event);

        let outcome = if !decision.run {
            info!(reason = %decision.reason, "trigger gate declined event");
            tracker.advance(JobState::Skipped);
            JobOutcome::Skipped {
                reason: decision.reason,
            }
        } else if cancel.is_cancelled() {
            tracker.cancelled()
        } else {
            info!(event = request.event.kind(), reason = %decision.reason, "starting job");
            self.run_steps(request, cancel, &mut tracker).await
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(outcome = %outcome, duration_ms, "job finished");

        JobReport {
            job_id: request.job_id,
            key: request.key.clone(),
            event: request.event.kind().to_string(),
            outcome,
            steps: tracker.steps,
            server_logs: tracker.server_logs,
            duration_ms,
        }
    }

    async fn run_steps(
        &self,
        request: &JobRequest,
        cancel: &CancelToken,
        tracker: &mut JobTracker,
    ) -> JobOutcome {
        if let Err(outcome) = tracker.enter(JobStep::LaunchServer, cancel) {
            return outcome;
        }
        let spec = ServerSpec::from_config(&request.config.server, &request.short_id());
        let handle = match guarded(cancel, self.runtime.launch(&spec)).await {
            Ok(handle) => handle,
            Err(CiError::Cancelled) => {
                // The container may have started before the launch was abandoned.
                self.teardown(&ServiceHandle {
                    runtime: spec.runtime.clone(),
                    name: spec.name.clone(),
                    container_id: String::new(),
                    host_port: spec.host_port,
                })
                .await;
                return tracker.cancelled();
            }
            Err(e) => return tracker.fail(e),
        };
        tracker.complete(format!(
            "container {} serving on port {}",
            handle.name, handle.host_port
        ));

        let outcome = self.run_with_server(request, cancel, tracker, &handle).await;
        self.teardown(&handle).await;
        outcome
    }

    async fn run_with_server(
        &self,
        request: &JobRequest,
        cancel: &CancelToken,
        tracker: &mut JobTracker,
        handle: &ServiceHandle,
    ) -> JobOutcome {
        if let Err(outcome) = tracker.enter(JobStep::WaitReady, cancel) {
            return outcome;
        }
        let probe = ReadinessProbe::new(request.config.readiness.clone());
        match probe.wait_ready(handle.probe_addr(), cancel).await {
            Ok(waited) => tracker.complete(format!("ready after {}ms", waited.as_millis())),
            Err(e) => return tracker.fail(e),
        }

        if let Err(outcome) = tracker.enter(JobStep::EmitLogs, cancel) {
            return outcome;
        }
        match guarded(cancel, self.runtime.logs(handle)).await {
            Ok(logs) => {
                for line in logs.lines() {
                    info!(target: SERVER_LOG_TARGET, container = %handle.name, "{line}");
                }
                tracker.complete(format!("{} log line(s)", logs.lines().count()));
                tracker.server_logs = Some(logs);
            }
            Err(CiError::Cancelled) => return tracker.cancelled(),
            Err(e) => tracker.complete_degraded(format!("log retrieval failed: {e}")),
        }

        if let Err(outcome) = tracker.enter(JobStep::RunVerifier, cancel) {
            return outcome;
        }
        let verifier = match guarded(cancel, self.verifier_source.prepare()).await {
            Ok(verifier) => verifier,
            Err(e) => return tracker.fail(e),
        };
        let target = handle.verifier_target();
        let output = match guarded(cancel, verifier.verify(&target)).await {
            Ok(output) => output,
            Err(e) => return tracker.fail(e),
        };

        for line in output.stdout.lines() {
            info!(target: "linkgate::verifier", "{line}");
        }
        if output.passed() {
            tracker.complete(format!("no broken links found at {target}"));
            tracker.succeed()
        } else {
            if !output.stderr.trim().is_empty() {
                warn!(target: "linkgate::verifier", stderr = %output.stderr.trim(), "verifier stderr");
            }
            tracker.fail_with(
                format!(
                    "verifier exited with code {} against {target}: broken links reported",
                    output.exit_code
                ),
                Some(output.exit_code),
            )
        }
    }

    /// Best-effort container teardown; errors never change the outcome.
    async fn teardown(&self, handle: &ServiceHandle) {
        if let Err(e) = self.runtime.stop(handle).await {
            warn!(container = %handle.name, error = %e, "teardown failed");
        }
    }
}
