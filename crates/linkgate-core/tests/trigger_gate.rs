//! Trigger gate and concurrency key behaviour over JSON-encoded events.

use linkgate_core::{ConcurrencyKey, JobConfig, TriggerEvent, TriggerGate};

fn gate() -> TriggerGate {
    TriggerGate::new(JobConfig::default().triggers)
}

#[test]
fn test_push_only_runs_for_designated_branch() {
    let gate = gate();
    for (raw, expected) in [
        (r#"{"event":"push","git_ref":"refs/heads/unstable"}"#, true),
        (r#"{"event":"push","git_ref":"refs/heads/stable"}"#, false),
        (r#"{"event":"push","git_ref":"refs/heads/unstable-backport"}"#, false),
        (r#"{"event":"push","git_ref":"refs/tags/v5.0.0"}"#, false),
    ] {
        let event = TriggerEvent::from_json(raw).unwrap();
        assert_eq!(gate.should_run(&event), expected, "event: {raw}");
    }
}

#[test]
fn test_pull_request_requires_docs_path() {
    let gate = gate();

    let docs = TriggerEvent::from_json(
        r#"{"event":"pull_request","git_ref":"refs/pull/3/merge","changed_paths":["Cargo.toml","book/src/SUMMARY.md"]}"#,
    )
    .unwrap();
    assert!(gate.should_run(&docs));

    let code = TriggerEvent::from_json(
        r#"{"event":"pull_request","git_ref":"refs/pull/4/merge","changed_paths":["bookkeeping/notes.md","src/book.rs"]}"#,
    )
    .unwrap();
    let decision = gate.decide(&code);
    assert!(!decision.run);
    assert!(decision.reason.contains("none under"));

    let empty =
        TriggerEvent::from_json(r#"{"event":"pull_request","git_ref":"refs/pull/5/merge"}"#)
            .unwrap();
    assert!(!gate.should_run(&empty));
}

#[test]
fn test_merge_group_always_runs() {
    let gate = gate();
    let event = TriggerEvent::from_json(
        r#"{"event":"merge_group","git_ref":"refs/heads/gh-readonly-queue/unstable/pr-9-abc"}"#,
    )
    .unwrap();
    assert!(gate.should_run(&event));
}

#[test]
fn test_keys_shared_only_within_a_ref() {
    let workflow = JobConfig::default().workflow;
    let a = ConcurrencyKey::for_event(&workflow, &TriggerEvent::push("unstable"));
    let b = ConcurrencyKey::for_event(&workflow, &TriggerEvent::push("unstable"));
    let pr = ConcurrencyKey::for_event(&workflow, &TriggerEvent::pull_request(1, ["book/x.md"]));

    assert_eq!(a, b);
    assert_ne!(a, pr);
    assert_eq!(pr.as_str(), "linkcheck-refs/pull/1/merge");
}

#[test]
fn test_invalid_events_are_rejected() {
    assert!(TriggerEvent::from_json(r#"{"event":"push","git_ref":""}"#).is_err());
    assert!(TriggerEvent::from_json(r#"{"event":"release","git_ref":"refs/tags/v1"}"#).is_err());
    assert!(TriggerEvent::from_json("not json").is_err());
}
