// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// How many times the writer attempts to persist one entry, and how long it
/// waits between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Attempts, no delay between them.
    Immediate(u64),
    /// Attempts, fixed delay in milliseconds.
    LinearBackoff(u64, u64),
    /// Delay doubles after every failure, starting at `base_ms`, capped at `max_ms`.
    ExponentialBackoff {
        attempts: u64,
        base_ms: u64,
        max_ms: u64,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff {
            attempts: 3,
            base_ms: 100,
            max_ms: 5_000,
        }
    }
}

impl RetryStrategy {
    /// Total attempts, including the first one. Never less than one.
    pub fn attempts(&self) -> u64 {
        let attempts = match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                *attempts
            }
            RetryStrategy::ExponentialBackoff { attempts, .. } => *attempts,
        };
        attempts.max(1)
    }

    /// Delay after the `failures`th consecutive failure (1-based).
    pub fn delay(&self, failures: u64) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => Duration::from_millis(*delay_ms),
            RetryStrategy::ExponentialBackoff {
                base_ms, max_ms, ..
            } => {
                let exponent = failures.saturating_sub(1).min(63) as u32;
                let delay_ms = base_ms.saturating_mul(1u64 << exponent).min(*max_ms);
                Duration::from_millis(delay_ms)
            }
        }
    }
}
