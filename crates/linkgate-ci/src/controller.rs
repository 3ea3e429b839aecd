//! Concurrency controller: single flight per key, cancel on supersede.
//!
//! A newer event for a key cancels the job currently running for that key
//! (preemption, not queuing). The new job waits for the superseded job to
//! finish tearing down before it starts. With a fixed host port, every job
//! also waits for the previously submitted job on any key, since only one
//! container can publish that port at a time.
//!
//! Finished jobs are forgotten once their report has been collected through
//! [`ConcurrencyController::wait`] or [`ConcurrencyController::drain`].

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use linkgate_core::{ConcurrencyKey, JobConfig, TriggerEvent, TriggerGate};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cancel::CancelSource;
use crate::pipeline::{JobPipeline, JobReport, JobRequest};

type JobFuture = Shared<BoxFuture<'static, std::result::Result<JobReport, String>>>;

/// Result of submitting an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The trigger gate declined the event; no job was started and nothing
    /// was cancelled.
    Skipped { reason: String },

    Started {
        job_id: Uuid,
        key: ConcurrencyKey,
        /// The in-flight job this one cancelled, if any.
        superseded: Option<Uuid>,
    },
}

impl Submission {
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Submission::Started { job_id, .. } => Some(*job_id),
            Submission::Skipped { .. } => None,
        }
    }
}

/// A finished job and whether a newer job replaced it.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub report: JobReport,
    /// Superseded results are not authoritative.
    pub superseded: bool,
}

struct JobEntry {
    cancel: CancelSource,
    done: JobFuture,
}

#[derive(Default)]
struct ControllerState {
    /// Latest job per key, removed when that job finishes.
    active: HashMap<ConcurrencyKey, Uuid>,
    jobs: HashMap<Uuid, JobEntry>,
    /// Submission order, for `drain`.
    order: Vec<Uuid>,
    superseded: HashSet<Uuid>,
    /// Last job submitted while the host port is fixed.
    port_tail: Option<JobFuture>,
}

impl ControllerState {
    fn forget(&mut self, job_id: &Uuid) {
        self.jobs.remove(job_id);
        self.order.retain(|id| id != job_id);
        self.superseded.remove(job_id);
    }
}

/// Schedules jobs with single-flight-per-key semantics.
pub struct ConcurrencyController {
    pipeline: Arc<JobPipeline>,
    config: Arc<JobConfig>,
    gate: TriggerGate,
    state: Arc<Mutex<ControllerState>>,
}

impl ConcurrencyController {
    pub fn new(pipeline: JobPipeline, config: JobConfig) -> Self {
        let gate = TriggerGate::new(config.triggers.clone());
        Self {
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
            gate,
            state: Arc::new(Mutex::new(ControllerState::default())),
        }
    }

    /// Gate `event` and, if it runs, start a job for it, cancelling the
    /// in-flight job with the same concurrency key.
    pub async fn submit(&self, event: TriggerEvent) -> Submission {
        let decision = self.gate.decide(&event);
        if !decision.run {
            info!(event = event.kind(), reason = %decision.reason, "event skipped");
            return Submission::Skipped {
                reason: decision.reason,
            };
        }

        let request = JobRequest::new(event, Arc::clone(&self.config));
        let job_id = request.job_id;
        let key = request.key.clone();

        let mut state = self.state.lock().await;

        let superseded = state.active.get(&key).copied();
        let prior_done = superseded.and_then(|prior| {
            let entry = state.jobs.get(&prior)?;
            entry.cancel.cancel();
            Some(entry.done.clone())
        });
        if let Some(prior) = superseded {
            state.superseded.insert(prior);
            info!(%key, %prior, new_job = %job_id, "superseding in-flight job");
        }
        let fixed_port = self.config.server.host_port != 0;
        let port_holder = if fixed_port {
            state.port_tail.clone()
        } else {
            None
        };
        let predecessors: Vec<JobFuture> = prior_done.into_iter().chain(port_holder).collect();

        let cancel = CancelSource::new();
        let token = cancel.token();
        let pipeline = Arc::clone(&self.pipeline);
        let shared_state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            // Only their teardown matters, not their outcome.
            join_all(predecessors).await;
            let report = pipeline.run(&request, &token).await;

            let mut state = shared_state.lock().await;
            if state.active.get(&request.key) == Some(&request.job_id) {
                state.active.remove(&request.key);
            }
            report
        });
        let done = task
            .map(|joined| joined.map_err(|e| e.to_string()))
            .boxed()
            .shared();

        if fixed_port {
            state.port_tail = Some(done.clone());
        }
        state.active.insert(key.clone(), job_id);
        state.jobs.insert(job_id, JobEntry { cancel, done });
        state.order.push(job_id);

        Submission::Started {
            job_id,
            key,
            superseded,
        }
    }

    /// Wait for a submitted job to finish and forget it.
    pub async fn wait(&self, job_id: Uuid) -> Option<JobReport> {
        let done = {
            let state = self.state.lock().await;
            state.jobs.get(&job_id)?.done.clone()
        };
        let result = done.await;
        self.state.lock().await.forget(&job_id);
        match result {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(%job_id, error = %e, "job task failed");
                None
            }
        }
    }

    /// Cancel every live job. Returns how many were signalled.
    pub async fn cancel_all(&self) -> usize {
        let state = self.state.lock().await;
        let mut cancelled = 0;
        for job_id in state.active.values() {
            if let Some(entry) = state.jobs.get(job_id) {
                entry.cancel.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            warn!(jobs = cancelled, "cancelling all in-flight jobs");
        }
        cancelled
    }

    /// Number of keys with a live job.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn is_superseded(&self, job_id: Uuid) -> bool {
        self.state.lock().await.superseded.contains(&job_id)
    }

    /// Wait for every job submitted so far, in submission order, and forget
    /// them.
    pub async fn drain(&self) -> Vec<JobRecord> {
        let pending: Vec<(Uuid, JobFuture)> = {
            let state = self.state.lock().await;
            state
                .order
                .iter()
                .filter_map(|id| state.jobs.get(id).map(|e| (*id, e.done.clone())))
                .collect()
        };

        let results = join_all(pending.into_iter().map(|(id, done)| async move {
            (id, done.await)
        }))
        .await;

        let mut state = self.state.lock().await;
        results
            .into_iter()
            .filter_map(|(id, result)| {
                let superseded = state.superseded.contains(&id);
                state.forget(&id);
                match result {
                    Ok(report) => Some(JobRecord { report, superseded }),
                    Err(e) => {
                        warn!(job_id = %id, error = %e, "job task failed");
                        None
                    }
                }
            })
            .collect()
    }
}
