//! # SriQuant.ai Streaming Connections
//!
//! Long-lived market data streams that survive network trouble.
//!
//! ## Architecture
//!
//! - **Supervisor** - runs one session at a time, reconnecting with capped
//!   exponential backoff until stopped or cancelled
//! - **Session** - one live connection: reader, sole writer, idle watcher,
//!   shutdown watcher and optional pinger as monoio tasks
//! - **Dispatcher** - decodes every frame inline and hands typed events to
//!   the caller
//! - **Transport** - pluggable connector; a monoio-native WebSocket client
//!   with rustls TLS and HTTP CONNECT proxies is built in
//!
//! ```no_run
//! use sriquant_core::{Signal, StreamRuntime};
//! use sriquant_stream::binance::{BinanceStreamConfig, market_stream, trade_stream};
//!
//! StreamRuntime::new().block_on(async {
//!     let config = BinanceStreamConfig::mainnet().with_stream(trade_stream("BTCUSDT"));
//!     let handle = market_stream(
//!         &config,
//!         Signal::new(),
//!         |event, _raw| println!("{event:?}"),
//!         |err| eprintln!("{err}"),
//!     )?;
//!     handle.done().await;
//!     Ok::<_, sriquant_stream::StreamError>(())
//! })??;
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

pub mod backoff;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod health;
pub mod keepalive;
pub mod session;
pub mod supervisor;
pub mod tls;
pub mod transport;
pub mod websocket;

#[cfg(feature = "binance")]
pub mod binance;

// Re-export main types
pub use backoff::BackoffPolicy;
pub use config::{BackoffConfig, KeepaliveConfig, StreamConfig};
pub use dispatch::{Decoder, EventDispatcher, Handlers, RawDecoder};
pub use errors::{Result, StreamError};
pub use health::{HealthTracker, StreamHealth, SupervisorState};
pub use keepalive::{AppKeepalive, Classified, JsonKeepalive, LiteralKeepalive};
pub use session::{Session, SessionContext, SessionSummary, TerminalReason};
pub use supervisor::{StreamHandle, Supervisor};
pub use transport::{
    CloseFrame, Connection, Connector, FrameReader, FrameWriter, Message, NoSubscription,
    SendFrames, Subscription,
};
pub use websocket::{WsConnection, WsConnector};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::StreamConfig;
    pub use crate::dispatch::Decoder;
    pub use crate::errors::{Result, StreamError};
    pub use crate::keepalive::{AppKeepalive, JsonKeepalive};
    pub use crate::supervisor::{StreamHandle, Supervisor};
    pub use crate::transport::{Connection, Connector, Message, Subscription};
    pub use crate::websocket::WsConnector;
    pub use sriquant_core::prelude::*;
}
