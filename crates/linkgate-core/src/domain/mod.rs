//! Domain types for linkgate jobs.

pub mod error;
pub mod event;
pub mod job;

pub use error::{LinkgateError, Result};
pub use event::{ConcurrencyKey, TriggerEvent};
pub use job::{JobOutcome, JobState, JobStep, CANCELLED_EXIT_CODE};
