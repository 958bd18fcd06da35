//! Binance market data streams
//!
//! Reference integration of the supervisor: a WebSocket connector to the
//! Binance `/ws` endpoint, a `SUBSCRIBE` request re-sent on every reconnect,
//! and a decoder producing [`MarketEvent`]s with exact decimal prices.
//!
//! Binance pings every 20 seconds and answers protocol pings, so no
//! application keepalive is needed.

pub mod decode;
pub mod types;

pub use decode::BinanceDecoder;
pub use types::*;

use crate::config::StreamConfig;
use crate::errors::{Result, StreamError};
use crate::supervisor::{StreamHandle, Supervisor};
use crate::transport::{Connection, Message, Subscription};
use crate::websocket::WsConnector;
use async_trait::async_trait;
use sriquant_core::Signal;
use std::cell::Cell;
use tracing::info;

pub const MAINNET_WS_URL: &str = "wss://stream.binance.com:9443";
pub const TESTNET_WS_URL: &str = "wss://stream.testnet.binance.vision";

/// `<symbol>@trade`
pub fn trade_stream(symbol: &str) -> String {
    format!("{}@trade", symbol.to_lowercase())
}

/// `<symbol>@ticker`
pub fn ticker_stream(symbol: &str) -> String {
    format!("{}@ticker", symbol.to_lowercase())
}

/// Diff stream, or a partial book of `levels` (5, 10 or 20) when given
pub fn depth_stream(symbol: &str, levels: Option<u32>) -> String {
    match levels {
        Some(levels) => format!("{}@depth{}@100ms", symbol.to_lowercase(), levels),
        None => format!("{}@depth@100ms", symbol.to_lowercase()),
    }
}

/// `<symbol>@kline_<interval>`, e.g. interval `1m`
pub fn kline_stream(symbol: &str, interval: &str) -> String {
    format!("{}@kline_{}", symbol.to_lowercase(), interval)
}

/// Endpoint selection, stream names and supervisor settings
#[derive(Debug, Clone, PartialEq)]
pub struct BinanceStreamConfig {
    pub base_url: String,
    pub testnet: bool,
    pub streams: Vec<String>,
    /// Retry and keepalive settings; the URL is derived from `base_url`
    pub settings: StreamConfig,
}

impl Default for BinanceStreamConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl BinanceStreamConfig {
    pub fn mainnet() -> Self {
        Self {
            base_url: MAINNET_WS_URL.to_string(),
            testnet: false,
            streams: Vec::new(),
            settings: StreamConfig::default(),
        }
    }

    pub fn testnet() -> Self {
        Self {
            base_url: TESTNET_WS_URL.to_string(),
            testnet: true,
            ..Self::mainnet()
        }
    }

    /// Mainnet unless `BINANCE_TESTNET` is `true`/`1`. Supervisor settings
    /// come from the `SRIQUANT_WS_*` variables when `SRIQUANT_WS_URL` is set.
    pub fn from_env() -> Result<Self> {
        let testnet = std::env::var("BINANCE_TESTNET")
            .map(|value| matches!(value.trim(), "true" | "1"))
            .unwrap_or(false);
        let mut config = if testnet {
            Self::testnet()
        } else {
            Self::mainnet()
        };
        if std::env::var(format!("{}URL", crate::config::ENV_PREFIX)).is_ok() {
            config.settings = StreamConfig::from_env()?;
        }
        Ok(config)
    }

    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.streams.push(stream.into());
        self
    }

    pub fn with_streams<I, T>(mut self, streams: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.streams.extend(streams.into_iter().map(Into::into));
        self
    }

    pub fn with_settings(mut self, settings: StreamConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Multi-stream endpoint the subscription is sent to
    pub fn endpoint(&self) -> String {
        format!("{}/ws", self.base_url.trim_end_matches('/'))
    }

    /// Supervisor configuration pointed at [`Self::endpoint`]
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.endpoint(),
            ..self.settings.clone()
        }
    }
}

/// `SUBSCRIBE` request for a fixed set of streams. Each send uses a fresh
/// request id so acknowledgements can be told apart across reconnects.
#[derive(Debug)]
pub struct BinanceSubscription {
    streams: Vec<String>,
    next_id: Cell<u64>,
}

impl BinanceSubscription {
    pub fn new(streams: Vec<String>) -> Self {
        Self {
            streams,
            next_id: Cell::new(1),
        }
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    /// The request the next subscribe call will send
    pub fn request(&self) -> serde_json::Value {
        serde_json::json!({
            "method": "SUBSCRIBE",
            "params": self.streams,
            "id": self.next_id.get(),
        })
    }
}

#[async_trait(?Send)]
impl<C: Connection> Subscription<C> for BinanceSubscription {
    async fn subscribe(&self, conn: &mut C) -> Result<()> {
        if self.streams.is_empty() {
            return Ok(());
        }

        let request = self.request();
        self.next_id.set(self.next_id.get() + 1);
        conn.send(Message::text(request.to_string())).await?;

        info!("📊 Subscribed to {} Binance streams", self.streams.len());
        Ok(())
    }
}

/// Start a supervised Binance market data stream on the current runtime
pub fn market_stream<H, R>(
    config: &BinanceStreamConfig,
    cancel: Signal,
    on_event: H,
    on_error: R,
) -> Result<StreamHandle>
where
    H: Fn(MarketEvent, &[u8]) + 'static,
    R: Fn(StreamError) + 'static,
{
    if config.streams.is_empty() {
        return Err(StreamError::ConfigurationError(
            "no Binance streams configured".to_string(),
        ));
    }

    let settings = config.stream_config();
    let connector = WsConnector::from_config(&settings)?;
    let subscription = BinanceSubscription::new(config.streams.clone());

    info!(
        "🔗 Binance {} stream: {} ({} streams)",
        if config.testnet { "testnet" } else { "mainnet" },
        settings.url,
        config.streams.len()
    );
    Supervisor::new(settings, connector, subscription, BinanceDecoder)
        .start(cancel, on_event, on_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{Dial, MockConnector};
    use crate::transport::Connector;

    #[test]
    fn test_stream_names() {
        assert_eq!(trade_stream("BTCUSDT"), "btcusdt@trade");
        assert_eq!(ticker_stream("ETHUSDT"), "ethusdt@ticker");
        assert_eq!(depth_stream("BTCUSDT", Some(5)), "btcusdt@depth5@100ms");
        assert_eq!(depth_stream("BTCUSDT", None), "btcusdt@depth@100ms");
        assert_eq!(kline_stream("BNBBTC", "1m"), "bnbbtc@kline_1m");
    }

    #[test]
    fn test_endpoints() {
        assert_eq!(
            BinanceStreamConfig::mainnet().endpoint(),
            "wss://stream.binance.com:9443/ws"
        );

        let testnet = BinanceStreamConfig::testnet().with_stream(trade_stream("BTCUSDT"));
        assert!(testnet.testnet);
        assert_eq!(testnet.stream_config().url, "wss://stream.testnet.binance.vision/ws");
        assert_eq!(testnet.streams, vec!["btcusdt@trade"]);
    }

    #[test]
    fn test_market_stream_requires_streams() {
        let result = market_stream(&BinanceStreamConfig::mainnet(), Signal::new(), |_, _| {}, |_| {});
        assert!(matches!(result, Err(StreamError::ConfigurationError(_))));
    }

    #[monoio::test(timer_enabled = true)]
    async fn test_subscribe_sends_fresh_ids() {
        let connector = MockConnector::new([Dial::Accept, Dial::Accept]);
        let peers = connector.peers();
        let subscription =
            BinanceSubscription::new(vec![trade_stream("BTCUSDT"), ticker_stream("BTCUSDT")]);

        for expected_id in 1..=2u64 {
            let mut conn = connector.connect().await.unwrap();
            subscription.subscribe(&mut conn).await.unwrap();

            let peer = peers.recv_async().await.unwrap();
            let Some(Message::Text(sent)) = peer.next_sent().await else {
                panic!("expected a text subscription request");
            };
            let request: serde_json::Value = serde_json::from_str(&sent).unwrap();
            assert_eq!(request["method"], "SUBSCRIBE");
            assert_eq!(request["params"][1], "btcusdt@ticker");
            assert_eq!(request["id"], expected_id);
        }
    }
}
