//! linkgate core library
//!
//! Domain model for the documentation link-check job:
//! - [`TriggerGate`] decides whether a repository event starts a job
//! - [`ConcurrencyKey`] identifies runs that supersede each other
//! - [`JobState`] / [`JobOutcome`] describe the job lifecycle
//! - [`JobConfig`] carries server, readiness and verifier settings

pub mod config;
pub mod domain;
pub mod telemetry;
pub mod trigger;

pub use config::{JobConfig, ReadinessConfig, ServerConfig, VerifierConfig};
pub use domain::{
    ConcurrencyKey, JobOutcome, JobState, JobStep, LinkgateError, Result, TriggerEvent,
    CANCELLED_EXIT_CODE,
};
pub use telemetry::init_tracing;
pub use trigger::{GateDecision, PathFilter, TriggerGate, TriggerRules};
