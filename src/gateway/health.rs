//! Built-in health route.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use super::error::ApiError;
use super::route::Handler;
use super::types::{HandlerOutput, RequestContext};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthReport<'a> {
    status: &'static str,
    booted_at_iso: &'a str,
    route_count: usize,
}

/// Reports boot time and the live route count.
pub(crate) struct HealthHandler {
    booted_at_iso: String,
    route_count: Arc<AtomicUsize>,
}

impl HealthHandler {
    pub(crate) fn new(booted_at_iso: String, route_count: Arc<AtomicUsize>) -> Self {
        Self {
            booted_at_iso,
            route_count,
        }
    }
}

#[async_trait]
impl Handler for HealthHandler {
    async fn call(&self, _ctx: RequestContext) -> Result<HandlerOutput, ApiError> {
        HandlerOutput::from_serializable(&HealthReport {
            status: "ok",
            booted_at_iso: &self.booted_at_iso,
            route_count: self.route_count.load(Ordering::Relaxed),
        })
    }
}
