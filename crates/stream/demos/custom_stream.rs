//! Generic supervised stream against any WebSocket endpoint
//!
//! Configured from `SRIQUANT_WS_*` variables (see `StreamConfig::from_env`).
//! `SUBSCRIBE_MESSAGE` is sent after every connect; JSON payloads are
//! decoded to `serde_json::Value` and `{"ping":n}` heartbeats are answered
//! with `{"pong":n}`. Stops after `DEMO_SECONDS` (default 60) seconds by
//! cancelling its scope.

use sriquant_stream::prelude::*;
use sriquant_stream::SendFrames;
use std::time::Duration;
use tracing::{info, warn};

fn decode_json(raw: &[u8]) -> std::result::Result<serde_json::Value, serde_json::Error> {
    serde_json::from_slice(raw)
}

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let config = StreamConfig::from_env()?;
    let seconds = std::env::var("DEMO_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(60);
    let subscribe = std::env::var("SUBSCRIBE_MESSAGE")
        .map(|text| vec![Message::text(text)])
        .unwrap_or_default();

    StreamRuntime::new().block_on(run(config, SendFrames(subscribe), Duration::from_secs(seconds)))??;
    Ok(())
}

async fn run(config: StreamConfig, subscription: SendFrames, duration: Duration) -> anyhow::Result<()> {
    let connector = WsConnector::from_config(&config)?;
    info!("🚀 Streaming from {} for {}s", connector.url(), duration.as_secs());

    let cancel = Signal::new();
    let handle = Supervisor::new(config, connector, subscription, decode_json)
        .with_app_keepalive(JsonKeepalive::default())
        .start(
            cancel.clone(),
            |value, raw| info!("📨 {} bytes: {}", raw.len(), value),
            |err| warn!("⚠️ {}", err),
        )?;

    // Cancelling the scope stops the supervisor just like handle.stop()
    monoio::select! {
        _ = handle.done() => warn!("Stream gave up"),
        _ = monoio::time::sleep(duration) => {
            cancel.fire();
            handle.done().await;
        }
    }

    let health = handle.health();
    info!(
        "✅ {} frames over {} sessions, {} reconnects",
        health.frames_received, health.sessions_started, health.reconnect_count
    );
    Ok(())
}
