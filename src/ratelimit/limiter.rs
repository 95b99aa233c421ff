//! Core rate limiter implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use crate::clock::{to_iso, Clock};
use crate::config::RateLimitingConfig;

/// Outcome of a single [`RateLimiter::consume`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    /// Whether a token was taken
    pub allowed: bool,
    /// Configured tokens per minute
    pub limit: u32,
    /// Whole tokens left after this call
    pub remaining: u32,
    /// Seconds to wait before retrying; zero when allowed
    pub retry_after_seconds: u64,
    /// When rejected, the retry instant; when allowed, the instant the
    /// bucket is full again
    pub reset_at_iso: String,
    /// Requests accepted in the bucket's current minute window
    pub consumed_this_minute: u64,
}

impl RateLimitDecision {
    /// `x-ratelimit-*` headers, plus `retry-after` on rejection.
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        headers.insert("x-ratelimit-limit".to_string(), self.limit.to_string());
        headers.insert("x-ratelimit-remaining".to_string(), self.remaining.to_string());
        headers.insert("x-ratelimit-reset".to_string(), self.reset_at_iso.clone());
        if !self.allowed {
            headers.insert("retry-after".to_string(), self.retry_after_seconds.to_string());
        }
        headers
    }
}

/// One calendar minute of recorded usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsagePoint {
    pub minute_iso: String,
    pub count: u64,
}

/// Dashboard view of a bucket. Not used for enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub key: String,
    pub limit: u32,
    pub remaining: u32,
    pub consumed_total: u64,
    pub consumed_this_minute: u64,
    pub minute_window_started_at_iso: String,
    pub last_request_at_iso: Option<String>,
    pub history: Vec<UsagePoint>,
}

/// Per-key continuous token bucket limiter.
///
/// Buckets are created on first use and live for the lifetime of the
/// limiter. Each call holds the key's map entry for its whole read-modify-write,
/// so concurrent calls for the same key are serialized.
pub struct RateLimiter {
    config: RateLimitingConfig,
    clock: Arc<dyn Clock>,
    buckets: DashMap<String, TokenBucket>,
}

impl RateLimiter {
    /// Create a limiter. Out-of-range settings are raised to their minimums.
    pub fn new(config: RateLimitingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: config.clamped(),
            clock,
            buckets: DashMap::new(),
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> RateLimitingConfig {
        self.config
    }

    /// Take one token for `key` at the clock's current time.
    pub fn consume(&self, key: &str) -> RateLimitDecision {
        self.consume_at(key, self.clock.now_ms())
    }

    /// Take one token for `key` at `now_ms`.
    pub fn consume_at(&self, key: &str, now_ms: i64) -> RateLimitDecision {
        let limit = self.config.limit_per_minute;
        let mut bucket = self.bucket(key, now_ms);
        bucket.advance(limit, now_ms);

        if !bucket.try_take(now_ms, self.config.max_tracked_minutes) {
            let retry_after_seconds = retry_after_seconds(limit);
            debug!(
                key = %key,
                limit = limit,
                retry_after_seconds = retry_after_seconds,
                "Rate limit exceeded"
            );
            return RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                retry_after_seconds,
                reset_at_iso: to_iso(now_ms + retry_after_seconds as i64 * 1_000),
                consumed_this_minute: bucket.consumed_this_minute(),
            };
        }

        trace!(key = %key, remaining = bucket.remaining(), "Token consumed");

        RateLimitDecision {
            allowed: true,
            limit,
            remaining: bucket.remaining(),
            retry_after_seconds: 0,
            reset_at_iso: to_iso(now_ms + bucket.ms_until_full(limit)),
            consumed_this_minute: bucket.consumed_this_minute(),
        }
    }

    /// Usage summary for `key` at the clock's current time.
    pub fn inspect(&self, key: &str) -> UsageSummary {
        self.inspect_at(key, self.clock.now_ms())
    }

    /// Usage summary for `key` at `now_ms`.
    ///
    /// Applies the same refill and window rollover as [`consume_at`](Self::consume_at)
    /// without taking a token.
    pub fn inspect_at(&self, key: &str, now_ms: i64) -> UsageSummary {
        let limit = self.config.limit_per_minute;
        let mut bucket = self.bucket(key, now_ms);
        bucket.advance(limit, now_ms);

        UsageSummary {
            key: key.to_string(),
            limit,
            remaining: bucket.remaining(),
            consumed_total: bucket.consumed_total(),
            consumed_this_minute: bucket.consumed_this_minute(),
            minute_window_started_at_iso: to_iso(bucket.minute_window_started_at_ms()),
            last_request_at_iso: bucket.last_request_at_ms().map(to_iso),
            history: bucket
                .history()
                .map(|(minute, count)| UsagePoint {
                    minute_iso: to_iso(minute),
                    count,
                })
                .collect(),
        }
    }

    /// Drop one key's bucket, or every bucket when `key` is `None`.
    pub fn reset(&self, key: Option<&str>) {
        match key {
            Some(key) => {
                self.buckets.remove(key);
            }
            None => self.buckets.clear(),
        }
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket(
        &self,
        key: &str,
        now_ms: i64,
    ) -> dashmap::mapref::one::RefMut<'_, String, TokenBucket> {
        self.buckets.entry(key.to_string()).or_insert_with(|| {
            debug!(
                key = %key,
                limit = self.config.limit_per_minute,
                "Creating new token bucket"
            );
            TokenBucket::new(self.config.limit_per_minute, now_ms)
        })
    }
}

/// Nominal time to regenerate one token, at least one second.
fn retry_after_seconds(limit: u32) -> u64 {
    let limit = u64::from(limit.max(1));
    ((60 + limit - 1) / limit).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MINUTE_MS};

    const T0: i64 = 1_714_566_600_000;

    fn limiter(limit_per_minute: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let config = RateLimitingConfig {
            limit_per_minute,
            ..RateLimitingConfig::default()
        };
        (RateLimiter::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_rate_limiter_creation() {
        let (limiter, _) = limiter(10);
        assert_eq!(limiter.bucket_count(), 0);
        assert_eq!(limiter.config().limit_per_minute, 10);
    }

    #[test]
    fn test_third_call_rejected_at_limit_two() {
        let (limiter, clock) = limiter(2);

        let first = limiter.consume("alice");
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);

        clock.advance(200);
        let second = limiter.consume("alice");
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        clock.advance(200);
        let third = limiter.consume("alice");
        assert!(!third.allowed);
        assert!(third.retry_after_seconds >= 1);
        assert_eq!(third.retry_after_seconds, 30);
        assert_eq!(third.reset_at_iso, to_iso(T0 + 400 + 30_000));

        let usage = limiter.inspect("alice");
        assert_eq!(usage.consumed_this_minute, 2);
        assert_eq!(usage.consumed_total, 2);
    }

    #[test]
    fn test_continuous_refill_restores_tokens() {
        let (limiter, clock) = limiter(5);
        for _ in 0..5 {
            assert!(limiter.consume("bob").allowed);
        }
        assert!(!limiter.consume("bob").allowed);

        clock.advance(MINUTE_MS);
        let decision = limiter.consume("bob");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn test_keys_have_separate_buckets() {
        let (limiter, _) = limiter(1);
        assert!(limiter.consume("a").allowed);
        assert!(!limiter.consume("a").allowed);
        assert!(limiter.consume("b").allowed);
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_consume_at_explicit_time() {
        let (limiter, _) = limiter(1);
        assert!(limiter.consume_at("k", T0).allowed);
        assert!(!limiter.consume_at("k", T0 + 30_000).allowed);
        assert!(limiter.consume_at("k", T0 + 60_000).allowed);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_seconds(1), 60);
        assert_eq!(retry_after_seconds(7), 9);
        assert_eq!(retry_after_seconds(120), 1);
        assert_eq!(retry_after_seconds(1_000), 1);
    }

    #[test]
    fn test_inspect_reports_sorted_history() {
        let (limiter, clock) = limiter(100);
        limiter.consume("carol");
        clock.advance(MINUTE_MS);
        limiter.consume("carol");
        limiter.consume("carol");

        let usage = limiter.inspect("carol");
        assert_eq!(
            usage.history,
            vec![
                UsagePoint {
                    minute_iso: to_iso(T0),
                    count: 1
                },
                UsagePoint {
                    minute_iso: to_iso(T0 + MINUTE_MS),
                    count: 2
                },
            ]
        );
        assert_eq!(usage.consumed_this_minute, 2);
        assert_eq!(usage.last_request_at_iso, Some(to_iso(T0 + MINUTE_MS)));
    }

    #[test]
    fn test_inspect_rolls_window_without_consuming() {
        let (limiter, clock) = limiter(10);
        limiter.consume("dave");
        clock.advance(MINUTE_MS);

        let usage = limiter.inspect("dave");
        assert_eq!(usage.consumed_this_minute, 0);
        assert_eq!(usage.consumed_total, 1);
        assert_eq!(usage.remaining, 10);
    }

    #[test]
    fn test_decision_headers() {
        let (limiter, _) = limiter(1);
        let allowed = limiter.consume("eve").headers();
        assert_eq!(allowed["x-ratelimit-limit"], "1");
        assert_eq!(allowed["x-ratelimit-remaining"], "0");
        assert!(!allowed.contains_key("retry-after"));

        let rejected = limiter.consume("eve").headers();
        assert_eq!(rejected["retry-after"], "60");
    }

    #[test]
    fn test_reset() {
        let (limiter, _) = limiter(1);
        limiter.consume("a");
        limiter.consume("b");

        limiter.reset(Some("a"));
        assert_eq!(limiter.bucket_count(), 1);
        assert!(limiter.consume("a").allowed);

        limiter.reset(None);
        assert_eq!(limiter.bucket_count(), 0);
    }
}
