//! Binance payload decoding
//!
//! Handles both raw payloads (`/ws` endpoint) and the combined-stream
//! wrapper `{"stream": "...", "data": {...}}` (`/stream` endpoint).

use super::types::{
    BinanceError, DepthDiff, DepthSnapshot, KlineEnvelope, MarketEvent, TickerUpdate, TradeUpdate,
};
use crate::dispatch::Decoder;
use crate::errors::{Result, StreamError};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

/// Decoder for Binance market data streams
#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceDecoder;

impl Decoder for BinanceDecoder {
    type Event = MarketEvent;
    type Error = StreamError;

    fn decode(&self, raw: &[u8]) -> Result<MarketEvent> {
        let json: Value = serde_json::from_slice(raw)?;

        match json.get("stream").and_then(Value::as_str) {
            Some(stream) => {
                let data = json.get("data").ok_or_else(|| {
                    StreamError::Decode(format!("combined payload for {stream} has no data"))
                })?;
                decode_payload(Some(stream), data)
            }
            None => decode_payload(None, &json),
        }
    }
}

fn decode_payload(stream: Option<&str>, data: &Value) -> Result<MarketEvent> {
    if let Some(event_type) = data.get("e").and_then(Value::as_str) {
        return match event_type {
            "trade" => Ok(MarketEvent::Trade(TradeUpdate::deserialize(data)?)),
            "24hrTicker" => Ok(MarketEvent::Ticker(TickerUpdate::deserialize(data)?)),
            "depthUpdate" => Ok(MarketEvent::Depth(DepthDiff::deserialize(data)?.into())),
            "kline" => Ok(MarketEvent::Kline(KlineEnvelope::deserialize(data)?.kline)),
            other => Err(StreamError::Decode(format!("unsupported event type {other}"))),
        };
    }

    if data.get("lastUpdateId").is_some() {
        let symbol = stream
            .and_then(|name| name.split('@').next())
            .map(str::to_uppercase)
            .unwrap_or_default();
        return Ok(MarketEvent::Depth(
            DepthSnapshot::deserialize(data)?.into_update(symbol),
        ));
    }

    if data.get("code").is_some() {
        let err = BinanceError::deserialize(data)?;
        return Err(StreamError::ProtocolError(format!(
            "Binance error {}: {}",
            err.code, err.msg
        )));
    }

    let id = data.get("id").and_then(Value::as_u64);
    if let (Some(Value::Null), Some(id)) = (data.get("result"), id) {
        info!("✅ Subscription confirmed for ID: {}", id);
        return Ok(MarketEvent::SubscriptionAck { id });
    }

    Err(StreamError::Decode("unrecognized Binance payload".to_string()))
}
