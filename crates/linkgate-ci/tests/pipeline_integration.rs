//! Integration tests for the job pipeline with fake runtime and verifier.

use linkgate_ci::fakes::{FakeRuntime, FakeVerifierSource};
use linkgate_ci::{CancelSource, CancelToken, JobPipeline, JobRequest};
use linkgate_core::{JobConfig, JobOutcome, JobStep, ReadinessConfig, TriggerEvent};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> Arc<JobConfig> {
    Arc::new(JobConfig {
        readiness: ReadinessConfig {
            settle_delay_secs: 0,
            initial_backoff_ms: 20,
            max_backoff_ms: 100,
            timeout_secs: 1,
            ..ReadinessConfig::default()
        },
        ..JobConfig::default()
    })
}

fn pipeline(runtime: &Arc<FakeRuntime>, verifier: &Arc<FakeVerifierSource>) -> JobPipeline {
    JobPipeline::new(runtime.clone(), verifier.clone())
}

/// Test: push to the designated branch runs every step and succeeds
#[tokio::test]
async fn test_push_to_designated_branch_succeeds() {
    let runtime = Arc::new(FakeRuntime::new());
    let verifier = Arc::new(FakeVerifierSource::exiting(0));

    let request = JobRequest::new(TriggerEvent::push("unstable"), test_config());
    let report = pipeline(&runtime, &verifier)
        .run(&request, &CancelToken::never())
        .await;

    assert_eq!(report.outcome, JobOutcome::Succeeded);
    assert_eq!(report.outcome.exit_code(), 0);
    let steps: Vec<JobStep> = report.steps.iter().map(|s| s.step).collect();
    assert_eq!(steps, JobStep::ALL.to_vec(), "steps should run in order");
    assert!(report.steps.iter().all(|s| s.ok));

    // Verifier ran against localhost:<published port>.
    let launched = runtime.launched();
    assert_eq!(launched.len(), 1);
    let targets = verifier.targets();
    assert_eq!(targets.len(), 1);
    assert!(targets[0].starts_with("localhost:"), "target was {}", targets[0]);

    // Logs were captured and the container was torn down.
    assert!(report
        .server_logs
        .as_deref()
        .is_some_and(|logs| logs.contains("Serving on")));
    assert_eq!(runtime.stopped(), vec![launched[0].name.clone()]);
    assert_eq!(runtime.running(), 0);
}

/// Test: container name is unique per job and derived from the prefix
#[tokio::test]
async fn test_container_name_is_per_job() {
    let runtime = Arc::new(FakeRuntime::new());
    let verifier = Arc::new(FakeVerifierSource::exiting(0));
    let pipeline = pipeline(&runtime, &verifier);

    for _ in 0..2 {
        let request = JobRequest::new(TriggerEvent::push("unstable"), test_config());
        pipeline.run(&request, &CancelToken::never()).await;
    }

    let names: Vec<String> = runtime.launched().into_iter().map(|s| s.name).collect();
    assert_eq!(names.len(), 2);
    assert_ne!(names[0], names[1]);
    assert!(names.iter().all(|n| n.starts_with("book-")));
}

/// Test: concurrent jobs each get their own host port by default
#[tokio::test]
async fn test_concurrent_jobs_get_distinct_ports() {
    let runtime = Arc::new(FakeRuntime::new());
    let verifier = Arc::new(FakeVerifierSource::slow(Duration::from_millis(200)));
    let pipeline = pipeline(&runtime, &verifier);

    let push = JobRequest::new(TriggerEvent::push("unstable"), test_config());
    let pr = JobRequest::new(
        TriggerEvent::pull_request(12, ["book/src/SUMMARY.md"]),
        test_config(),
    );
    let push_cancel = CancelToken::never();
    let pr_cancel = CancelToken::never();
    let (a, b) = tokio::join!(
        pipeline.run(&push, &push_cancel),
        pipeline.run(&pr, &pr_cancel),
    );
    assert_eq!(a.outcome, JobOutcome::Succeeded);
    assert_eq!(b.outcome, JobOutcome::Succeeded);

    let targets = verifier.targets();
    assert_eq!(targets.len(), 2);
    assert_ne!(targets[0], targets[1]);
    assert!(runtime.launched().iter().all(|spec| spec.host_port == 0));
}

/// Test: any non-zero verifier exit fails the job, carrying the code through
#[tokio::test]
async fn test_verifier_nonzero_exit_fails_job() {
    for code in [1, 2, 255] {
        let runtime = Arc::new(FakeRuntime::new());
        let verifier = Arc::new(FakeVerifierSource::exiting(code));

        let request = JobRequest::new(TriggerEvent::push("unstable"), test_config());
        let report = pipeline(&runtime, &verifier)
            .run(&request, &CancelToken::never())
            .await;

        match &report.outcome {
            JobOutcome::Failed {
                step, exit_code, ..
            } => {
                assert_eq!(*step, JobStep::RunVerifier);
                assert_eq!(*exit_code, Some(code));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!report.passed());
        assert_eq!(report.outcome.exit_code(), code);
        assert_eq!(runtime.running(), 0, "container must be torn down on failure");
    }
}

/// Test: launch failure is fatal and verification is never attempted
#[tokio::test]
async fn test_launch_failure_skips_verification() {
    let runtime = Arc::new(FakeRuntime::failing());
    let verifier = Arc::new(FakeVerifierSource::exiting(0));

    let request = JobRequest::new(TriggerEvent::push("unstable"), test_config());
    let report = pipeline(&runtime, &verifier)
        .run(&request, &CancelToken::never())
        .await;

    assert!(matches!(
        report.outcome,
        JobOutcome::Failed {
            step: JobStep::LaunchServer,
            exit_code: None,
            ..
        }
    ));
    assert!(!report.ran(JobStep::RunVerifier));
    assert!(verifier.targets().is_empty());
    assert!(runtime.stopped().is_empty());
}

/// Test: pull request outside the docs prefix never launches a container
#[tokio::test]
async fn test_pull_request_outside_prefix_is_skipped() {
    let runtime = Arc::new(FakeRuntime::new());
    let verifier = Arc::new(FakeVerifierSource::exiting(0));

    let event = TriggerEvent::pull_request(12, ["beacon_node/src/lib.rs", "Cargo.lock"]);
    let request = JobRequest::new(event, test_config());
    let report = pipeline(&runtime, &verifier)
        .run(&request, &CancelToken::never())
        .await;

    assert!(matches!(report.outcome, JobOutcome::Skipped { .. }));
    assert!(report.passed());
    assert!(report.steps.is_empty());
    assert!(runtime.launched().is_empty());
}

/// Test: merge group runs regardless of paths
#[tokio::test]
async fn test_merge_group_runs() {
    let runtime = Arc::new(FakeRuntime::new());
    let verifier = Arc::new(FakeVerifierSource::exiting(0));

    let event = TriggerEvent::merge_group("refs/heads/gh-readonly-queue/unstable/pr-5");
    let report = pipeline(&runtime, &verifier)
        .run(&JobRequest::new(event, test_config()), &CancelToken::never())
        .await;

    assert_eq!(report.outcome, JobOutcome::Succeeded);
    assert_eq!(runtime.launched().len(), 1);
}

/// Test: a server that never accepts connections fails at the readiness step
#[tokio::test]
async fn test_unready_server_fails_before_verification() {
    let runtime = Arc::new(FakeRuntime::never_ready());
    let verifier = Arc::new(FakeVerifierSource::exiting(0));

    let request = JobRequest::new(TriggerEvent::push("unstable"), test_config());
    let report = pipeline(&runtime, &verifier)
        .run(&request, &CancelToken::never())
        .await;

    match &report.outcome {
        JobOutcome::Failed { step, reason, .. } => {
            assert_eq!(*step, JobStep::WaitReady);
            assert!(reason.contains("not ready"), "reason: {reason}");
        }
        other => panic!("expected readiness failure, got {other:?}"),
    }
    assert!(verifier.targets().is_empty());
    assert_eq!(runtime.stopped().len(), 1);
}

/// Test: verifier download failure fails the job before verification runs
#[tokio::test]
async fn test_verifier_download_failure() {
    let runtime = Arc::new(FakeRuntime::new());
    let verifier = Arc::new(FakeVerifierSource::unreachable_release());

    let request = JobRequest::new(TriggerEvent::push("unstable"), test_config());
    let report = pipeline(&runtime, &verifier)
        .run(&request, &CancelToken::never())
        .await;

    match &report.outcome {
        JobOutcome::Failed {
            step,
            reason,
            exit_code,
        } => {
            assert_eq!(*step, JobStep::RunVerifier);
            assert!(reason.contains("download"), "reason: {reason}");
            assert_eq!(*exit_code, None);
        }
        other => panic!("expected download failure, got {other:?}"),
    }
    assert!(verifier.targets().is_empty());
}

/// Test: failed log retrieval is recorded but does not fail the job
#[tokio::test]
async fn test_log_failure_is_best_effort() {
    let runtime = Arc::new(FakeRuntime::without_logs());
    let verifier = Arc::new(FakeVerifierSource::exiting(0));

    let request = JobRequest::new(TriggerEvent::push("unstable"), test_config());
    let report = pipeline(&runtime, &verifier)
        .run(&request, &CancelToken::never())
        .await;

    assert_eq!(report.outcome, JobOutcome::Succeeded);
    let logs_step = report.step(JobStep::EmitLogs).expect("emit_logs step");
    assert!(!logs_step.ok);
    assert!(report.server_logs.is_none());
}

/// Test: cancellation during the verifier stops the job and tears down
#[tokio::test]
async fn test_cancel_during_verification() {
    let runtime = Arc::new(FakeRuntime::new());
    let verifier = Arc::new(FakeVerifierSource::slow(Duration::from_secs(30)));
    let pipeline = pipeline(&runtime, &verifier);

    let source = CancelSource::new();
    let token = source.token();
    let request = JobRequest::new(TriggerEvent::push("unstable"), test_config());
    let job = tokio::spawn(async move { pipeline.run(&request, &token).await });

    // Wait until the verifier has started.
    for _ in 0..100 {
        if !verifier.targets().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    source.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), job)
        .await
        .expect("cancel should end the job promptly")
        .expect("join");
    assert_eq!(
        report.outcome,
        JobOutcome::Cancelled {
            step: Some(JobStep::RunVerifier)
        }
    );
    assert_eq!(runtime.running(), 0);
}

/// Test: a token cancelled before the job starts yields no launch
#[tokio::test]
async fn test_cancelled_before_start() {
    let runtime = Arc::new(FakeRuntime::new());
    let verifier = Arc::new(FakeVerifierSource::exiting(0));
    let source = CancelSource::new();
    source.cancel();

    let request = JobRequest::new(TriggerEvent::push("unstable"), test_config());
    let report = pipeline(&runtime, &verifier)
        .run(&request, &source.token())
        .await;

    assert_eq!(report.outcome, JobOutcome::Cancelled { step: None });
    assert!(runtime.launched().is_empty());
}
