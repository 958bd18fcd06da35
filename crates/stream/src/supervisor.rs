//! Connection supervisor with automatic reconnection
//!
//! Runs sessions back to back until stopped:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Reconnecting -> Connecting -> ...
//!              \______________________/                 |
//!                         stop / cancel / max attempts -> Stopped
//! ```
//!
//! Between attempts the supervisor waits on whichever comes first: the
//! backoff delay, a stop request or cancellation. Only one session is ever
//! alive, and none is started once a stop has been requested.

use crate::backoff::BackoffPolicy;
use crate::config::StreamConfig;
use crate::dispatch::{Decoder, EventDispatcher, Handlers};
use crate::errors::{Result, StreamError};
use crate::health::{HealthTracker, StreamHealth, SupervisorState};
use crate::keepalive::AppKeepalive;
use crate::session::{Session, SessionContext};
use crate::transport::{Connector, Subscription};
use sriquant_core::Signal;
use std::rc::Rc;
use tracing::{error, info};

/// Reconnecting stream over one connector, subscription and decoder
pub struct Supervisor<C, S, D>
where
    C: Connector,
    S: Subscription<C::Conn>,
    D: Decoder,
{
    config: StreamConfig,
    connector: C,
    subscription: S,
    decoder: Rc<D>,
    app_keepalive: Option<Rc<dyn AppKeepalive>>,
}

impl<C, S, D> Supervisor<C, S, D>
where
    C: Connector,
    S: Subscription<C::Conn>,
    D: Decoder,
{
    pub fn new(config: StreamConfig, connector: C, subscription: S, decoder: D) -> Self {
        Self {
            config,
            connector,
            subscription,
            decoder: Rc::new(decoder),
            app_keepalive: None,
        }
    }

    /// Answer and emit application-level heartbeats with `keepalive`
    pub fn with_app_keepalive(mut self, keepalive: impl AppKeepalive) -> Self {
        self.app_keepalive = Some(Rc::new(keepalive));
        self
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Validate the configuration and spawn the supervisor loop on the
    /// current monoio runtime.
    ///
    /// `on_event` runs inline on the read loop for every decoded frame.
    /// `on_error` receives every reported failure, including reconnect
    /// notices. Firing `cancel` ends the stream just like
    /// [`StreamHandle::stop`].
    pub fn start<H, R>(self, cancel: Signal, on_event: H, on_error: R) -> Result<StreamHandle>
    where
        H: Fn(D::Event, &[u8]) + 'static,
        R: Fn(StreamError) + 'static,
    {
        self.config.validate()?;
        let backoff = BackoffPolicy::new(self.config.backoff.clone())?;

        let health = HealthTracker::new();
        let stop = Signal::new();
        let done = Signal::new();

        let counter = health.clone();
        let handlers =
            Handlers::new(on_event, on_error).with_error_hook(move |_| counter.error_reported());
        let dispatcher = EventDispatcher::new(Rc::clone(&self.decoder), handlers);

        let mut ctx = SessionContext::new(self.config.keepalive.clone(), dispatcher)
            .with_signals(stop.clone(), cancel)
            .with_health(health.clone());
        if let Some(keepalive) = &self.app_keepalive {
            ctx = ctx.with_app_keepalive(Rc::clone(keepalive));
        }

        info!("🚀 Starting stream supervisor for {}", self.config.url);
        monoio::spawn(self.run(ctx, backoff, done.clone()));

        Ok(StreamHandle { stop, done, health })
    }

    async fn run(self, ctx: SessionContext<D>, mut backoff: BackoffPolicy, done: Signal) {
        let health = ctx.health.clone();
        let handlers = ctx.dispatcher.handlers().clone();
        let max_attempts = self.config.max_attempts;
        let mut failures = 0u32;

        loop {
            if ctx.stop.is_fired() || ctx.cancel.is_fired() {
                break;
            }

            health.set_state(SupervisorState::Connecting);
            // Open watches stop and cancel itself
            let opened = Session::open(&self.connector, &self.subscription, &ctx).await;

            // Cause of the coming retry, and whether the caller hears about it
            let (cause, notify) = match opened {
                Ok(None) => break,
                Ok(Some(session)) => {
                    backoff.reset();
                    failures = 0;
                    health.session_started();

                    let summary = session.finished().await;
                    if summary.reason.is_shutdown() {
                        break;
                    }
                    match summary.reason.error() {
                        Some(err) => (err.to_string(), true),
                        None => {
                            info!("Session {} ended normally, reconnecting", summary.id);
                            (summary.reason.to_string(), false)
                        }
                    }
                }
                Err(err) => {
                    failures += 1;
                    if max_attempts > 0 && failures >= max_attempts {
                        error!(
                            "❌ Giving up on {} after {} failed attempts: {}",
                            self.config.url, failures, err
                        );
                        handlers.error(StreamError::MaxAttemptsExceeded {
                            attempts: failures,
                            last_error: err.to_string(),
                        });
                        break;
                    }
                    (err.to_string(), true)
                }
            };

            // A stop racing a session failure must not announce a retry
            if ctx.stop.is_fired() || ctx.cancel.is_fired() {
                break;
            }

            let delay = backoff.next_delay();
            let attempt = backoff.attempt();
            health.reconnect_scheduled();
            sriquant_core::log_reconnect!(attempt, delay, cause);
            if notify {
                handlers.error(StreamError::ReconnectPending {
                    attempt,
                    delay,
                    cause,
                });
            }

            let resume = monoio::select! {
                _ = ctx.stop.wait() => false,
                _ = ctx.cancel.wait() => false,
                _ = monoio::time::sleep(delay) => true,
            };
            if !resume {
                break;
            }
        }

        health.set_state(SupervisorState::Stopped);
        info!("🛑 Stream supervisor for {} stopped", self.config.url);
        done.fire();
    }
}

/// Control handle of a running supervisor. Cheap to clone and safe to use
/// from other threads.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    stop: Signal,
    done: Signal,
    health: HealthTracker,
}

impl StreamHandle {
    /// Request shutdown. Safe to call any number of times; returns `true`
    /// only for the first call.
    pub fn stop(&self) -> bool {
        self.stop.fire()
    }

    /// Wait until the supervisor has fully stopped
    pub async fn done(&self) {
        self.done.wait().await
    }

    /// Stop and wait for the supervisor to finish
    pub async fn shutdown(&self) {
        self.stop();
        self.done().await
    }

    pub fn is_stopped(&self) -> bool {
        self.done.is_fired()
    }

    /// Signal that fires once the supervisor has stopped
    pub fn done_signal(&self) -> Signal {
        self.done.clone()
    }

    pub fn health(&self) -> StreamHealth {
        self.health.snapshot()
    }
}
