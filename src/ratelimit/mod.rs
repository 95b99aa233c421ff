//! Per-key token bucket rate limiting and usage tracking.

mod bucket;
mod limiter;

pub use bucket::TokenBucket;
pub use limiter::{RateLimitDecision, RateLimiter, UsagePoint, UsageSummary};
