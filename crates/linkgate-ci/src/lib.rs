//! linkgate CI - job execution for the documentation link check
//!
//! Provides the job runner that:
//! - Launches the documentation server in a container
//! - Waits for it with a readiness probe instead of a fixed delay
//! - Runs the pinned link checker against it and maps the exit code to pass/fail
//! - Enforces single flight per concurrency key with cancel-on-supersede

pub mod cancel;
pub mod controller;
pub mod error;
pub mod fakes;
pub mod pipeline;
pub mod readiness;
pub mod runner;
pub mod service;
pub mod stage;
pub mod verifier;

// Re-export key types
pub use cancel::{CancelSource, CancelToken};
pub use controller::{ConcurrencyController, JobRecord, Submission};
pub use error::{CiError, Result};
pub use pipeline::{JobPipeline, JobReport, JobRequest, StepRecord};
pub use readiness::ReadinessProbe;
pub use runner::{CommandOutput, CommandRunner};
pub use service::{ContainerRuntime, DockerCli, ServerSpec, ServiceHandle};
pub use stage::StepCommand;
pub use verifier::{LinkcheckVerifier, Verifier, VerifierInstaller, VerifierSource};
