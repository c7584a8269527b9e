// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff with jitter for reconnect attempts.
//!
//! The calculator is pure state: it hands out delays and leaves scheduling to
//! the caller. Growth starts from zero after a [`reset`](ExponentialBackoff::reset),
//! so the first retry after an intentional close is immediate:
//!
//! ```text
//! reset:   0, initial, initial*f, initial*f^2, ... max, max
//! failure: base ± jitter*base, clamped to [0, max]
//! ```

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::BackoffConfig;

/// Reconnect delay calculator.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    /// Delay before jitter for the next attempt.
    current_base: Duration,
    attempts: u32,
    /// Next delay is exactly the ceiling (backend throttling).
    pinned_to_max: bool,
    /// Next delay is zero, once.
    inhibited: bool,
    rng: StdRng,
}

impl ExponentialBackoff {
    /// Create a calculator with a randomly seeded jitter source.
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_rng(config, StdRng::from_rng(&mut rand::rng()))
    }

    /// Create a calculator with a deterministic jitter source.
    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: BackoffConfig, rng: StdRng) -> Self {
        ExponentialBackoff {
            config,
            current_base: Duration::ZERO,
            attempts: 0,
            pinned_to_max: false,
            inhibited: false,
            rng,
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Base delay the next computation starts from (before jitter).
    pub fn current_base(&self) -> Duration {
        self.current_base
    }

    /// Compute the delay for the next attempt and advance the growth.
    pub fn next_delay(&mut self) -> Duration {
        if self.inhibited {
            self.inhibited = false;
            return Duration::ZERO;
        }

        let delay = if self.pinned_to_max {
            self.pinned_to_max = false;
            self.config.max_delay()
        } else {
            self.jittered(self.current_base)
        };

        self.attempts = self.attempts.saturating_add(1);
        self.current_base = self.grown_base();
        delay
    }

    /// Start over: attempt count zero, next delay zero.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_base = Duration::ZERO;
        self.pinned_to_max = false;
        self.inhibited = false;
    }

    /// Make the next delay the ceiling, without jitter.
    ///
    /// Throttling wins over a pending [`inhibit`](Self::inhibit).
    pub fn reset_to_max(&mut self) {
        self.current_base = self.config.max_delay();
        self.pinned_to_max = true;
        self.inhibited = false;
    }

    /// Make the next delay zero once, then resume normal growth.
    pub fn inhibit(&mut self) {
        self.inhibited = true;
    }

    fn jittered(&mut self, base: Duration) -> Duration {
        let max = self.config.max_delay();
        let jitter = self.config.jitter;
        if base.is_zero() || jitter <= 0.0 {
            return base.min(max);
        }

        let offset = self.rng.random_range(-jitter..=jitter);
        let secs = base.as_secs_f64() * (1.0 + offset);
        Duration::try_from_secs_f64(secs.max(0.0))
            .unwrap_or(max)
            .min(max)
    }

    fn grown_base(&self) -> Duration {
        let max = self.config.max_delay();
        let grown = Duration::try_from_secs_f64(self.current_base.as_secs_f64() * self.config.factor)
            .unwrap_or(max);
        grown.max(self.config.initial_delay()).min(max)
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
