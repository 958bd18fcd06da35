//! Exponential reconnect backoff
//!
//! The delay before the Nth consecutive retry is
//! `min(initial * 2^(N-1), max)`. The supervisor resets the policy once a
//! session is fully established (dial and subscribe both succeeded), not
//! merely after the dial, so a venue that accepts the socket but rejects the
//! subscription keeps backing off.

use crate::config::BackoffConfig;
use crate::errors::Result;
use rand::Rng;
use std::time::Duration;

/// Doubling delay with an upper bound and optional jitter
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    current: Duration,
    attempt: u32,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            current: config.initial_delay,
            config,
            attempt: 0,
        })
    }

    /// Delay to wait before the next attempt; advances the policy
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.attempt = self.attempt.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.config.max_delay);
        self.jittered(base)
    }

    /// Back to the initial delay
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered delay the next call will be based on
    pub fn current(&self) -> Duration {
        self.current
    }

    fn jittered(&self, base: Duration) -> Duration {
        let jitter = self.config.jitter;
        if jitter == 0.0 {
            return base;
        }

        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::try_from_secs_f64(base.as_secs_f64() * factor)
            .unwrap_or(self.config.max_delay)
            .clamp(self.config.initial_delay, self.config.max_delay)
    }
}
