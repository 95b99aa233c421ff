//! Continuous token bucket with per-minute usage history.

use std::collections::BTreeMap;

use crate::clock::{floor_to_minute, MINUTE_MS};

/// Token bucket state for a single key.
///
/// Three notions of "minute" live in here:
/// - `tokens` refills continuously at `limit / 60_000` tokens per millisecond,
/// - `consumed_this_minute` belongs to a rolling window anchored at the
///   bucket's own creation or last rollover,
/// - `history_by_minute` is keyed by UTC calendar minute.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    updated_at_ms: i64,
    consumed_total: u64,
    consumed_this_minute: u64,
    minute_window_started_at_ms: i64,
    last_request_at_ms: Option<i64>,
    history_by_minute: BTreeMap<i64, u64>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(limit: u32, now_ms: i64) -> Self {
        Self {
            tokens: f64::from(limit),
            updated_at_ms: now_ms,
            consumed_total: 0,
            consumed_this_minute: 0,
            minute_window_started_at_ms: now_ms,
            last_request_at_ms: None,
            history_by_minute: BTreeMap::new(),
        }
    }

    /// Refill tokens for the elapsed time and roll the minute window.
    pub fn advance(&mut self, limit: u32, now_ms: i64) {
        let limit = f64::from(limit);
        let elapsed = (now_ms - self.updated_at_ms).max(0) as f64;
        self.tokens = (self.tokens + elapsed * limit / MINUTE_MS as f64).min(limit);
        self.updated_at_ms = self.updated_at_ms.max(now_ms);

        if now_ms - self.minute_window_started_at_ms >= MINUTE_MS {
            self.consumed_this_minute = 0;
            self.minute_window_started_at_ms = now_ms;
        }
    }

    /// Take one token if available. The caller must [`advance`](Self::advance) first.
    ///
    /// Successful takes are recorded against the calendar minute of `now_ms`
    /// and the history is pruned oldest-first down to `max_tracked_minutes`.
    pub fn try_take(&mut self, now_ms: i64, max_tracked_minutes: usize) -> bool {
        if self.tokens < 1.0 {
            return false;
        }

        self.tokens -= 1.0;
        self.consumed_total += 1;
        self.consumed_this_minute += 1;
        self.last_request_at_ms = Some(now_ms);
        *self
            .history_by_minute
            .entry(floor_to_minute(now_ms))
            .or_insert(0) += 1;

        while self.history_by_minute.len() > max_tracked_minutes {
            self.history_by_minute.pop_first();
        }

        true
    }

    /// Whole tokens currently available.
    pub fn remaining(&self) -> u32 {
        self.tokens.max(0.0).floor() as u32
    }

    /// Milliseconds until the bucket is full again.
    pub fn ms_until_full(&self, limit: u32) -> i64 {
        let missing = (f64::from(limit) - self.tokens).max(0.0);
        (missing * MINUTE_MS as f64 / f64::from(limit)).ceil() as i64
    }

    pub fn consumed_total(&self) -> u64 {
        self.consumed_total
    }

    pub fn consumed_this_minute(&self) -> u64 {
        self.consumed_this_minute
    }

    pub fn minute_window_started_at_ms(&self) -> i64 {
        self.minute_window_started_at_ms
    }

    pub fn last_request_at_ms(&self) -> Option<i64> {
        self.last_request_at_ms
    }

    /// Request counts keyed by calendar minute (epoch millis), oldest first.
    pub fn history(&self) -> impl Iterator<Item = (i64, u64)> + '_ {
        self.history_by_minute.iter().map(|(m, c)| (*m, *c))
    }
}
