//! Log output for the linkgate binary.
//!
//! Everything goes to stderr: stdout carries the job report, which CI
//! wrappers parse or archive, and must not interleave with log lines.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// HTTP client internals log every readiness poll at debug level.
const QUIET_DEPENDENCIES: &str = "hyper=warn,hyper_util=warn,reqwest=warn";

/// Default filter directive for `level` when `RUST_LOG` is unset.
fn default_directive(level: Level) -> String {
    format!("{},{QUIET_DEPENDENCIES}", level.as_str().to_lowercase())
}

/// Install the global subscriber. `json` switches to one JSON object per
/// line. A second call is a no-op.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let output = fmt::layer().with_writer(std::io::stderr);
    let output = if json {
        output.json().boxed()
    } else {
        output.boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .ok();
}
