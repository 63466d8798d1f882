// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Submission timestamps: the clock, the on-disk encoding and the stamping
//! policy applied by the handle before an entry is queued.

use crate::entry::Entry;
use crate::errors::ConfigError;
use chrono::{DateTime, TimeZone, Utc};
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Source of submission instants.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock that never goes backwards, so entries queued later never carry
/// an earlier timestamp than entries queued before them.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_ms: AtomicI64,
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        let previous = self.last_ms.fetch_max(now_ms, Ordering::AcqRel);
        if previous > now_ms {
            Utc.timestamp_millis_opt(previous).single().unwrap_or(now)
        } else {
            now
        }
    }
}

/// Encoding of the injected `Timestamp` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// Milliseconds since the Unix epoch, lowercase base 36.
    #[default]
    Base36,
    /// Milliseconds since the Unix epoch, decimal.
    Decimal,
}

impl TimestampFormat {
    pub fn encode(self, at: DateTime<Utc>) -> String {
        let ms = at.timestamp_millis();
        match self {
            TimestampFormat::Base36 => to_base36(ms),
            TimestampFormat::Decimal => ms.to_string(),
        }
    }
}

impl FromStr for TimestampFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "base36" => Ok(TimestampFormat::Base36),
            "decimal" => Ok(TimestampFormat::Decimal),
            other => Err(ConfigError::Invalid(format!(
                "Invalid timestamp format '{other}'. Must be one of: base36, decimal"
            ))),
        }
    }
}

/// What to do with a `Timestamp` field the caller already set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    /// Always overwrite with the submission time.
    #[default]
    Stamp,
    /// Keep a caller provided value verbatim, stamp only when absent.
    PreserveExisting,
}

impl FromStr for TimestampPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stamp" => Ok(TimestampPolicy::Stamp),
            "preserve" | "preserve_existing" => Ok(TimestampPolicy::PreserveExisting),
            other => Err(ConfigError::Invalid(format!(
                "Invalid timestamp policy '{other}'. Must be one of: stamp, preserve"
            ))),
        }
    }
}

/// Formats `value` in lowercase base 36, with a leading `-` when negative.
pub fn to_base36(value: i64) -> String {
    let mut n = value.unsigned_abs();
    if n == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::with_capacity(13);
    while n > 0 {
        digits.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    if value < 0 {
        digits.push(b'-');
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

#[derive(Debug, Clone)]
pub(crate) struct Stamper {
    format: TimestampFormat,
    policy: TimestampPolicy,
    clock: Arc<dyn Clock>,
}

impl Stamper {
    pub(crate) fn new(format: TimestampFormat, policy: TimestampPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            format,
            policy,
            clock,
        }
    }

    pub(crate) fn stamp(&self, entry: &mut Entry) {
        entry.stamp(self.clock.now(), self.format, self.policy);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(-36), "-10");
        assert_eq!(to_base36(1_704_164_645_000), "lqvrmnpk");
    }

    #[test]
    fn test_encode_formats() {
        let at = Utc.timestamp_millis_opt(1_704_164_645_000).unwrap();
        assert_eq!(TimestampFormat::Base36.encode(at), "lqvrmnpk");
        assert_eq!(TimestampFormat::Decimal.encode(at), "1704164645000");
    }

    #[test]
    fn test_parse_options() {
        assert_eq!(
            "Base36".parse::<TimestampFormat>().unwrap(),
            TimestampFormat::Base36
        );
        assert_eq!(
            " decimal ".parse::<TimestampFormat>().unwrap(),
            TimestampFormat::Decimal
        );
        assert!("hex".parse::<TimestampFormat>().is_err());
        assert_eq!(
            "preserve".parse::<TimestampPolicy>().unwrap(),
            TimestampPolicy::PreserveExisting
        );
        assert!("sometimes".parse::<TimestampPolicy>().is_err());
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::default();
        let mut previous = clock.now();
        for _ in 0..1_000 {
            let next = clock.now();
            assert!(next >= previous);
            previous = next;
        }
    }

    proptest! {
        #[test]
        fn base36_parses_back(ms in any::<i64>()) {
            let encoded = to_base36(ms);
            prop_assert_eq!(i64::from_str_radix(&encoded, 36).unwrap(), ms);
        }

        #[test]
        fn base36_sorts_like_millis(a in 0i64..4_102_444_800_000, b in 0i64..4_102_444_800_000) {
            let (ea, eb) = (to_base36(a), to_base36(b));
            if ea.len() == eb.len() {
                prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
            }
        }
    }
}
