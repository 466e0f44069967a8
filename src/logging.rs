use tracing::Level;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Install the global subscriber. `RUST_LOG` overrides `level`.
///
/// Library code only emits events; binaries decide where they go.
pub fn init_logging(level: Level, json_output: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hash_exec={},warn", level)));

    if json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_timer(SystemTime)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    }
}

/// Structured event for a completed index build
#[macro_export]
macro_rules! log_build {
    ($op:expr, $rows:expr, $workers:expr, $entries:expr, $duration:expr) => {
        tracing::info!(
            operation = $op,
            rows = $rows,
            workers = $workers,
            entries = $entries,
            duration_us = $duration.as_micros() as u64,
            "Index build completed"
        )
    };
}

#[macro_export]
macro_rules! log_probe {
    ($partitions:expr, $matches:expr, $duration:expr) => {
        tracing::info!(
            partitions = $partitions,
            matches = $matches,
            duration_us = $duration.as_micros() as u64,
            "Join probe completed"
        )
    };
}
