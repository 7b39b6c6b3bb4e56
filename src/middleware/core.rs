use std::time::Duration;

use crate::ids::DispatchId;
use crate::request::DispatchKind;

/// What is being executed.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext {
    /// Id assigned when the message was enqueued
    pub id: DispatchId,
    /// Command, query or event
    pub kind: DispatchKind,
    /// `std::any::type_name` of the message
    pub message_type: &'static str,
    /// Handler about to run, `None` when nothing is bound
    pub handler_name: Option<&'static str>,
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler returned normally
    Completed,
    /// The handler returned an error or panicked
    Failed(String),
    /// No handler was bound for the request type
    NoHandler,
}

impl DispatchOutcome {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed => "completed",
            DispatchOutcome::Failed(_) => "failed",
            DispatchOutcome::NoHandler => "no_handler",
        }
    }
}

/// Observer of handler executions.
///
/// Both hooks run synchronously on the consumer thread, so they add to the
/// channel's per-message latency. For events they run once per handler.
/// A panicking hook is logged and skipped.
pub trait Middleware: Send + Sync {
    /// Called just before the handler runs.
    fn before(&self, _ctx: &DispatchContext) {}
    /// Called after the handler returned, failed or was not found.
    fn after(&self, _ctx: &DispatchContext, _outcome: &DispatchOutcome, _latency: Duration) {}
}
