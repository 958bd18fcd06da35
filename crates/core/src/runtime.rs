//! monoio runtime for streaming workloads
//!
//! Streaming sessions are `!Send` local tasks, so a supervisor lives on the
//! thread whose runtime spawned it. The timer driver is always enabled:
//! backoff sleeps, idle watchers and write timeouts depend on it.

use monoio::{FusionDriver, RuntimeBuilder};
use thiserror::Error;
use tracing::info;

/// Runtime construction errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Failed to build runtime: {0}")]
    Build(#[from] std::io::Error),

    #[error("Failed to spawn runtime thread: {0}")]
    Thread(String),
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Name of the thread created by [`StreamRuntime::spawn_thread`]
    pub thread_name: String,
    /// io_uring submission queue size (ignored by the epoll fallback)
    pub entries: Option<u32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            thread_name: "sriquant-stream".to_string(),
            entries: None,
        }
    }
}

/// Single-threaded monoio runtime with io_uring and epoll fallback
pub struct StreamRuntime {
    config: RuntimeConfig,
}

impl StreamRuntime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run a future to completion on the current thread
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, RuntimeError>
    where
        F: std::future::Future,
    {
        let mut builder = RuntimeBuilder::<FusionDriver>::new();
        if let Some(entries) = self.config.entries {
            builder = builder.with_entries(entries);
        }
        let mut runtime = builder.enable_timer().build()?;
        Ok(runtime.block_on(future))
    }

    /// Run `f` on a dedicated named thread with its own runtime
    pub fn spawn_thread<F, Fut>(
        self,
        f: F,
    ) -> Result<std::thread::JoinHandle<Result<Fut::Output, RuntimeError>>, RuntimeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future,
        Fut::Output: Send + 'static,
    {
        let name = self.config.thread_name.clone();
        info!("🚀 Starting runtime thread {}", name);

        std::thread::Builder::new()
            .name(name)
            .spawn(move || self.block_on(f()))
            .map_err(|e| RuntimeError::Thread(e.to_string()))
    }
}

impl Default for StreamRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let runtime = StreamRuntime::new();
        assert_eq!(runtime.config().thread_name, "sriquant-stream");
        assert_eq!(runtime.config().entries, None);
    }

    #[test]
    fn test_block_on_with_timer() {
        let runtime = StreamRuntime::new();
        let value = runtime
            .block_on(async {
                monoio::time::sleep(Duration::from_millis(1)).await;
                7
            })
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_spawn_thread() {
        let runtime = StreamRuntime::with_config(RuntimeConfig {
            thread_name: "stream-test".to_string(),
            entries: Some(256),
        });

        let handle = runtime
            .spawn_thread(|| async { std::thread::current().name().map(str::to_string) })
            .unwrap();
        let name = handle.join().unwrap().unwrap();
        assert_eq!(name.as_deref(), Some("stream-test"));
    }
}
