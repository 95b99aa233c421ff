//! Per-key circuit breaking for downstream operations.
//!
//! ```text
//! closed --(failure_threshold failures)--> open
//! open --(cooldown elapsed, checked lazily on access)--> half_open
//! half_open --(success_threshold successes)--> closed
//! half_open --(any failure)--> open
//! ```

mod breaker;
mod state;

pub use breaker::{BreakerError, CircuitBreaker, CircuitOpenError};
pub use state::{CircuitSnapshot, CircuitStatus};
