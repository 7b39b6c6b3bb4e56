use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use super::{DispatchContext, DispatchOutcome, Middleware};

#[derive(Default)]
struct Counters {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    unhandled: AtomicUsize,
    total_latency_ns: AtomicU64,
}

/// Point-in-time counters for one message type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageStats {
    /// Executions that reached `before`
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
    /// Requests with no bound handler
    pub unhandled: usize,
    /// Mean latency over finished executions, 0 if none finished
    pub average_latency_ns: u64,
}

/// Per-message-type execution counters.
///
/// Counters are keyed by `type_name` and updated with relaxed atomics, so a
/// snapshot taken while consumers are running is eventually consistent.
#[derive(Default)]
pub struct MetricsMiddleware {
    by_type: DashMap<&'static str, Counters>,
}

impl MetricsMiddleware {
    /// An empty set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for one message type, `None` if it was never seen.
    pub fn stats(&self, message_type: &str) -> Option<MessageStats> {
        self.by_type.get(message_type).map(|c| Self::read(&c))
    }

    /// Counters for every message type seen so far.
    pub fn snapshot(&self) -> Vec<(&'static str, MessageStats)> {
        let mut all: Vec<_> = self
            .by_type
            .iter()
            .map(|entry| (*entry.key(), Self::read(entry.value())))
            .collect();
        all.sort_by_key(|(name, _)| *name);
        all
    }

    /// Total executions that finished, across all types.
    pub fn finished_count(&self) -> usize {
        self.by_type
            .iter()
            .map(|c| {
                c.completed.load(Ordering::Relaxed)
                    + c.failed.load(Ordering::Relaxed)
                    + c.unhandled.load(Ordering::Relaxed)
            })
            .sum()
    }

    fn read(c: &Counters) -> MessageStats {
        let finished = c.completed.load(Ordering::Relaxed)
            + c.failed.load(Ordering::Relaxed)
            + c.unhandled.load(Ordering::Relaxed);
        let total = c.total_latency_ns.load(Ordering::Relaxed);
        MessageStats {
            started: c.started.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            unhandled: c.unhandled.load(Ordering::Relaxed),
            average_latency_ns: if finished == 0 {
                0
            } else {
                total / finished as u64
            },
        }
    }
}

impl Middleware for MetricsMiddleware {
    fn before(&self, ctx: &DispatchContext) {
        self.by_type
            .entry(ctx.message_type)
            .or_default()
            .started
            .fetch_add(1, Ordering::Relaxed);
    }

    fn after(&self, ctx: &DispatchContext, outcome: &DispatchOutcome, latency: Duration) {
        let counters = self.by_type.entry(ctx.message_type).or_default();
        let counter = match outcome {
            DispatchOutcome::Completed => &counters.completed,
            DispatchOutcome::Failed(_) => &counters.failed,
            DispatchOutcome::NoHandler => &counters.unhandled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        counters.total_latency_ns.fetch_add(
            u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }
}
