//! Unified logging integration
//!
//! Installs a `tracing-subscriber` formatter filtered by `RUST_LOG`
//! (default `info`). With the `ftlog` feature the ftlog backend is used
//! instead. Initialisation is idempotent.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize the process-wide logger with the `info` default filter
pub fn init_logging() {
    init_logging_with("info");
}

/// Initialize the process-wide logger, using `default_filter` when
/// `RUST_LOG` is unset
pub fn init_logging_with(default_filter: &str) {
    INIT.call_once(|| {
        #[cfg(feature = "ftlog")]
        {
            let _ = default_filter;
            init_ftlog();
        }

        #[cfg(not(feature = "ftlog"))]
        {
            init_tracing(default_filter);
        }
    });
}

#[cfg(feature = "ftlog")]
fn init_ftlog() {
    let built = ftlog::builder()
        .max_log_level(ftlog::LevelFilter::Debug)
        .bounded(100_000, false)
        .utc()
        .build();

    match built.map(|logger| logger.init()) {
        Ok(Ok(())) => tracing::info!("📝 Initialized ftlog logging"),
        Ok(Err(e)) => eprintln!("ftlog already installed: {e}"),
        Err(e) => eprintln!("ftlog build failed: {e}"),
    }
}

#[cfg(not(feature = "ftlog"))]
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    // A test harness or host application may already own the global subscriber.
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        tracing::info!("📝 Initialized tracing logging");
    }
}

/// Log a phase latency, switching to milliseconds above 1ms
#[macro_export]
macro_rules! log_latency {
    ($operation:expr, $duration_micros:expr) => {
        if $duration_micros < 1000 {
            tracing::debug!("⚡ {} completed in {}μs", $operation, $duration_micros);
        } else {
            tracing::debug!(
                "⚡ {} completed in {:.3}ms",
                $operation,
                $duration_micros as f64 / 1000.0
            );
        }
    };
}

/// Log a pending reconnect with its delay
#[macro_export]
macro_rules! log_reconnect {
    ($attempt:expr, $delay:expr, $cause:expr) => {
        tracing::warn!(
            "🔄 Reconnecting in {}ms (attempt {}): {}",
            $delay.as_millis(),
            $attempt,
            $cause
        );
    };
}

/// Log the end of a streaming session
#[macro_export]
macro_rules! log_session_end {
    ($session_id:expr, $reason:expr, $frames:expr) => {
        tracing::info!(
            "🔌 Session {} ended after {} frames: {}",
            $session_id,
            $frames,
            $reason
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_logging_init_is_idempotent() {
        init_logging();
        init_logging();
        init_logging_with("debug");
    }

    #[test]
    fn test_log_macros() {
        init_logging();

        log_latency!("ws_connect", 500u64);
        log_latency!("ws_connect", 2_500u64);
        log_reconnect!(3, Duration::from_secs(4), "connection reset");
        log_session_end!("SES-1-abc", "normal closure", 42u64);
    }
}
