//! Supervised Binance market data stream
//!
//! Streams trades, tickers and a partial book for BTCUSDT and ETHUSDT,
//! reconnecting on failure, for `DEMO_SECONDS` (default 30) seconds.
//! Set `BINANCE_TESTNET=true` to use the testnet endpoint.

use sriquant_core::prelude::*;
use sriquant_stream::StreamError;
use sriquant_stream::binance::{
    BinanceStreamConfig, MarketEvent, TradeSide, depth_stream, market_stream, ticker_stream,
    trade_stream,
};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let seconds = std::env::var("DEMO_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(30);

    let config = BinanceStreamConfig::from_env()?.with_streams([
        trade_stream("BTCUSDT"),
        ticker_stream("BTCUSDT"),
        ticker_stream("ETHUSDT"),
        depth_stream("BTCUSDT", Some(5)),
    ]);

    StreamRuntime::new().block_on(run(config, Duration::from_secs(seconds)))??;
    Ok(())
}

async fn run(config: BinanceStreamConfig, duration: Duration) -> anyhow::Result<()> {
    info!("🚀 Streaming {} Binance streams for {}s", config.streams.len(), duration.as_secs());

    let count = Rc::new(Cell::new(0u64));
    let counter = count.clone();
    let handle = market_stream(
        &config,
        Signal::new(),
        move |event, _raw| {
            counter.set(counter.get() + 1);
            log_event(&event);
        },
        |err| match err {
            StreamError::ReconnectPending { .. } => info!("{}", err),
            other => warn!("⚠️ Stream error: {}", other),
        },
    )?;

    monoio::select! {
        _ = handle.done() => warn!("Stream stopped on its own"),
        _ = monoio::time::sleep(duration) => handle.shutdown().await,
    }

    let health = handle.health();
    info!(
        "✅ Received {} events over {} sessions ({} reconnects, {} errors)",
        count.get(),
        health.sessions_started,
        health.reconnect_count,
        health.errors_reported
    );
    Ok(())
}

fn log_event(event: &MarketEvent) {
    match event {
        MarketEvent::Trade(trade) => {
            let side = match trade.side() {
                TradeSide::Buy => "🟢 BUY",
                TradeSide::Sell => "🔴 SELL",
            };
            info!(
                "{} {} {} @ ${} | ID: {}",
                side, trade.symbol, trade.quantity, trade.price, trade.trade_id
            );
        }
        MarketEvent::Ticker(ticker) => {
            let trend = if ticker.price_change.is_sign_negative() { "📉" } else { "📈" };
            info!(
                "{} TICKER: {} = ${} (24h: {}%)",
                trend, ticker.symbol, ticker.last_price, ticker.price_change_percent
            );
        }
        MarketEvent::Depth(depth) => {
            if let (Some(bid), Some(ask)) = (depth.best_bid(), depth.best_ask()) {
                info!(
                    "📊 DEPTH: {} - Bid: ${} | Ask: ${} | Spread: ${}",
                    depth.symbol,
                    bid.price,
                    ask.price,
                    ask.price - bid.price
                );
            }
        }
        MarketEvent::Kline(kline) => {
            info!(
                "🕯️ KLINE: {} {} O:{} H:{} L:{} C:{}",
                kline.symbol, kline.interval, kline.open, kline.high, kline.low, kline.close
            );
        }
        MarketEvent::SubscriptionAck { id } => info!("Subscription {} acknowledged", id),
    }
}
