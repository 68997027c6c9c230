//! Tracing initialisation for scriptstep binaries.
//!
//! Script output is logged by [`TracingLogSink`](crate::sink::TracingLogSink)
//! under the `build` target, step lifecycle events under the crate target.
//! Targets are printed so the two can be told apart in the agent log.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::new(format!("{level},build={level}"))
}

/// Initialise the global tracing subscriber.
///
/// `json` switches to newline-delimited JSON for agents that ship logs to
/// an aggregator. Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_target(true);

    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_includes_build_target() {
        let filter = default_filter(Level::DEBUG).to_string().to_lowercase();
        assert!(filter.contains("build=debug"));
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
