use std::time::Duration;

use tracing::{debug, warn};

use super::{DispatchContext, DispatchOutcome, Middleware};

/// Emits one event per handler execution with id, type, outcome and latency.
pub struct TracingMiddleware;

impl Middleware for TracingMiddleware {
    fn after(&self, ctx: &DispatchContext, outcome: &DispatchOutcome, latency: Duration) {
        let latency_us = latency.as_micros() as u64;
        match outcome {
            DispatchOutcome::Failed(error) => warn!(
                dispatch_id = %ctx.id,
                kind = %ctx.kind,
                message_type = ctx.message_type,
                handler_name = ctx.handler_name.unwrap_or("<none>"),
                outcome = outcome.as_str(),
                error = %error,
                latency_us,
                "dispatch"
            ),
            _ => debug!(
                dispatch_id = %ctx.id,
                kind = %ctx.kind,
                message_type = ctx.message_type,
                handler_name = ctx.handler_name.unwrap_or("<none>"),
                outcome = outcome.as_str(),
                latency_us,
                "dispatch"
            ),
        }
    }
}
