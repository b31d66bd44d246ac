//! Reconnect backoff

use rand::Rng;
use shared::error::{require_nonzero, ConfigError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Fraction of each delay randomised either way, 0.0 to 1.0.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 1.5,
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            jitter: 0.0,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("backoff_initial", self.initial)?;
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.max_delay < self.initial {
            return Err(ConfigError::invalid(
                "backoff_max_delay",
                "must not be shorter than the initial delay",
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "backoff_max_attempts",
                "must be greater than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::invalid("backoff_jitter", "must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.config.max_attempts
    }

    /// Delay before the next attempt, or `None` once the attempt budget is
    /// spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let base = self.config.initial.as_secs_f64()
            * self.config.multiplier.powi(self.attempts as i32);
        let capped = base.min(self.config.max_delay.as_secs_f64());
        self.attempts += 1;

        let delay = if self.config.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.config.jitter..=self.config.jitter);
            (capped * (1.0 + spread)).min(self.config.max_delay.as_secs_f64())
        } else {
            capped
        };

        Some(Duration::from_secs_f64(delay.max(0.0)))
    }

    /// Called after any successful round trip.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
