//! # SriQuant.ai Core
//!
//! Runtime and primitives shared by the streaming crates.
//!
//! ## Contents
//!
//! 1. **Single-threaded async with monoio** - one runtime per streaming thread
//! 2. **Close-once signals** - stop, done and cancellation scopes
//! 3. **Timestamps and latency timers** - session bookkeeping
//! 4. **Unified logging** - tracing (or ftlog) initialisation
//! 5. **Session identifiers** - nanoid-based ids for log correlation

pub mod id_gen;
pub mod logging;
pub mod runtime;
pub mod signal;
pub mod timing;

pub use id_gen::SessionId;
pub use logging::{init_logging, init_logging_with};
pub use runtime::{RuntimeConfig, RuntimeError, StreamRuntime};
pub use signal::Signal;
pub use timing::{PerfTimer, Timestamp, millis, nanos};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::id_gen::SessionId;
    pub use crate::logging::init_logging;
    pub use crate::runtime::StreamRuntime;
    pub use crate::signal::Signal;
    pub use crate::timing::{PerfTimer, Timestamp, millis, nanos};

    pub use monoio;
}
