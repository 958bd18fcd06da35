//! Binance market data types
//!
//! Field names follow the exchange's single-letter wire keys; prices and
//! quantities are exact decimals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// `<symbol>@trade` payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: u64,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "T")]
    pub trade_time: u64,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl TradeUpdate {
    /// A resting buyer means the seller crossed the spread
    pub fn side(&self) -> TradeSide {
        if self.buyer_is_maker {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        }
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// `<symbol>@ticker` payload (rolling 24h statistics)
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last_price: Decimal,
    #[serde(rename = "p")]
    pub price_change: Decimal,
    #[serde(rename = "P")]
    pub price_change_percent: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
    #[serde(rename = "E")]
    pub event_time: u64,
}

/// One `[price, quantity]` book level
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderBookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book change, from either a diff stream or a partial snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct DepthUpdate {
    pub symbol: String,
    /// Zero for snapshots, which carry no event time
    pub event_time: u64,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

impl DepthUpdate {
    pub fn best_bid(&self) -> Option<&OrderBookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderBookLevel> {
        self.asks.first()
    }
}

/// `<symbol>@depth` diff payload
#[derive(Debug, Deserialize)]
pub(crate) struct DepthDiff {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<OrderBookLevel>,
    #[serde(rename = "a")]
    pub asks: Vec<OrderBookLevel>,
}

impl From<DepthDiff> for DepthUpdate {
    fn from(diff: DepthDiff) -> Self {
        Self {
            symbol: diff.symbol,
            event_time: diff.event_time,
            first_update_id: diff.first_update_id,
            final_update_id: diff.final_update_id,
            bids: diff.bids,
            asks: diff.asks,
        }
    }
}

/// `<symbol>@depth<levels>` partial book payload
#[derive(Debug, Deserialize)]
pub(crate) struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
}

impl DepthSnapshot {
    /// Snapshots do not name their symbol; it comes from the stream name
    pub(crate) fn into_update(self, symbol: String) -> DepthUpdate {
        DepthUpdate {
            symbol,
            event_time: 0,
            first_update_id: self.last_update_id,
            final_update_id: self.last_update_id,
            bids: self.bids,
            asks: self.asks,
        }
    }
}

/// `<symbol>@kline_<interval>` candle
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KlineUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "t")]
    pub open_time: u64,
    #[serde(rename = "T")]
    pub close_time: u64,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KlineEnvelope {
    #[serde(rename = "k")]
    pub kline: KlineUpdate,
}

/// Error object returned for a rejected request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BinanceError {
    pub code: i64,
    pub msg: String,
    pub id: Option<u64>,
}

/// Decoded market data event
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Trade(TradeUpdate),
    Ticker(TickerUpdate),
    Depth(DepthUpdate),
    Kline(KlineUpdate),
    /// Reply to a `SUBSCRIBE` request
    SubscriptionAck { id: u64 },
}

impl MarketEvent {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Trade(trade) => Some(&trade.symbol),
            Self::Ticker(ticker) => Some(&ticker.symbol),
            Self::Depth(depth) => Some(&depth.symbol),
            Self::Kline(kline) => Some(&kline.symbol),
            Self::SubscriptionAck { .. } => None,
        }
    }

    pub fn is_market_data(&self) -> bool {
        !matches!(self, Self::SubscriptionAck { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[test]
    fn test_trade_side_and_notional() {
        let trade: TradeUpdate = serde_json::from_str(
            r#"{"e":"trade","E":1,"s":"BTCUSDT","t":12345,"p":"50000.10","q":"0.002","T":1699999999999,"m":true,"M":true}"#,
        )
        .unwrap();

        assert_eq!(trade.side(), TradeSide::Sell);
        assert_eq!(trade.price, dec("50000.10"));
        assert_eq!(trade.notional(), dec("100.00020"));
    }

    #[test]
    fn test_book_level_from_pair() {
        let level: OrderBookLevel = serde_json::from_str(r#"["0.0024","10"]"#).unwrap();
        assert_eq!(level.price, dec("0.0024"));
        assert_eq!(level.quantity, dec("10"));
    }

    #[test]
    fn test_snapshot_takes_symbol() {
        let snapshot: DepthSnapshot = serde_json::from_str(
            r#"{"lastUpdateId":160,"bids":[["0.0024","10"]],"asks":[["0.0026","100"]]}"#,
        )
        .unwrap();
        let depth = snapshot.into_update("BNBBTC".to_string());

        assert_eq!(depth.symbol, "BNBBTC");
        assert_eq!(depth.final_update_id, 160);
        assert_eq!(depth.best_bid().map(|l| l.price), Some(dec("0.0024")));
        assert_eq!(depth.best_ask().map(|l| l.quantity), Some(dec("100")));
    }

    #[test]
    fn test_event_symbol() {
        assert_eq!(MarketEvent::SubscriptionAck { id: 1 }.symbol(), None);
        assert!(!MarketEvent::SubscriptionAck { id: 1 }.is_market_data());
    }
}
