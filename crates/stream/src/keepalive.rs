//! Application-level keepalive conventions
//!
//! Some venues run their heartbeat inside data frames instead of (or on top
//! of) WebSocket ping/pong control frames. An [`AppKeepalive`] recognises
//! those envelopes so the session can answer them without forwarding them to
//! the event handler, and produces the pings the session sends on its own
//! interval.

use crate::transport::Message;
use serde_json::{Map, Value};
use sriquant_core::millis;

/// What an inbound data payload turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// Heartbeat request; the reply must be written back
    Ping(Message),
    /// Heartbeat answer
    Pong,
    /// Application data for the dispatcher
    Data,
}

/// Venue-specific heartbeat envelope
pub trait AppKeepalive: 'static {
    fn classify(&self, payload: &[u8]) -> Classified;

    /// Heartbeat the session sends every `ping_interval`
    fn ping(&self) -> Message;
}

/// Payloads larger than this are never heartbeats
const MAX_HEARTBEAT_LEN: usize = 128;

/// `{"ping": <n>}` answered with `{"pong": <n>}`, keys configurable
#[derive(Debug, Clone)]
pub struct JsonKeepalive {
    ping_key: String,
    pong_key: String,
}

impl JsonKeepalive {
    pub fn new(ping_key: impl Into<String>, pong_key: impl Into<String>) -> Self {
        Self {
            ping_key: ping_key.into(),
            pong_key: pong_key.into(),
        }
    }

    fn envelope(key: &str, value: Value) -> Message {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        Message::Text(Value::Object(map).to_string())
    }
}

impl Default for JsonKeepalive {
    fn default() -> Self {
        Self::new("ping", "pong")
    }
}

impl AppKeepalive for JsonKeepalive {
    fn classify(&self, payload: &[u8]) -> Classified {
        if payload.len() > MAX_HEARTBEAT_LEN || payload.first() != Some(&b'{') {
            return Classified::Data;
        }
        let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(payload) else {
            return Classified::Data;
        };
        if map.len() != 1 {
            return Classified::Data;
        }

        if let Some(value) = map.get(&self.ping_key) {
            Classified::Ping(Self::envelope(&self.pong_key, value.clone()))
        } else if map.contains_key(&self.pong_key) {
            Classified::Pong
        } else {
            Classified::Data
        }
    }

    fn ping(&self) -> Message {
        Self::envelope(&self.ping_key, Value::from(millis()))
    }
}

/// Bare text heartbeats such as `"ping"` / `"pong"`
#[derive(Debug, Clone)]
pub struct LiteralKeepalive {
    ping: String,
    pong: String,
}

impl LiteralKeepalive {
    pub fn new(ping: impl Into<String>, pong: impl Into<String>) -> Self {
        Self {
            ping: ping.into(),
            pong: pong.into(),
        }
    }
}

impl Default for LiteralKeepalive {
    fn default() -> Self {
        Self::new("ping", "pong")
    }
}

impl AppKeepalive for LiteralKeepalive {
    fn classify(&self, payload: &[u8]) -> Classified {
        if payload == self.ping.as_bytes() {
            Classified::Ping(Message::Text(self.pong.clone()))
        } else if payload == self.pong.as_bytes() {
            Classified::Pong
        } else {
            Classified::Data
        }
    }

    fn ping(&self) -> Message {
        Message::Text(self.ping.clone())
    }
}
