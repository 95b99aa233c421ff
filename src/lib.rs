//! Portico - In-process API Gateway
//!
//! This crate implements an in-process API front door: requests are routed
//! to registered handlers through an onion-style middleware pipeline, with a
//! per-key token bucket rate limiter and a per-key circuit breaker guarding
//! downstream work.

pub mod app;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod ops;
pub mod ratelimit;
pub mod router;
