use std::any::{type_name, Any, TypeId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::channel::{ChannelReceiver, SlotData};
use crate::error::MediatorError;
use crate::ids::DispatchId;
use crate::middleware::{DispatchContext, DispatchOutcome, Middleware};
use crate::registry::{ErasedPayload, HandlerLookup};
use crate::request::{DispatchKind, RequestKind};
use crate::result_cell::ResultCell;

/// Identity of a request written into a slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestHeader {
    pub(crate) id: DispatchId,
    pub(crate) kind: RequestKind,
    pub(crate) type_id: TypeId,
    pub(crate) request_type: &'static str,
}

/// Identity of an event written into a slot.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EventHeader {
    pub(crate) id: DispatchId,
    pub(crate) type_id: TypeId,
    pub(crate) event_type: &'static str,
}

/// Type-erased writer side of a [`ResultCell`].
pub(crate) trait Completion: Send {
    fn resolve(self: Box<Self>, outcome: Result<ErasedPayload, MediatorError>);
}

impl<T: Send + 'static> Completion for ResultCell<T> {
    fn resolve(self: Box<Self>, outcome: Result<ErasedPayload, MediatorError>) {
        let outcome = outcome.and_then(|value| {
            value.downcast::<T>().map(|v| *v).map_err(|_| {
                MediatorError::Internal(format!(
                    "handler response is not a '{}'",
                    type_name::<T>()
                ))
            })
        });
        let _ = self.complete(outcome);
    }
}

/// Request channel slot: the request and the cell its result goes to.
#[derive(Default)]
pub(crate) struct RequestSlot {
    pub(crate) header: Option<RequestHeader>,
    pub(crate) payload: Option<ErasedPayload>,
    pub(crate) completion: Option<Box<dyn Completion>>,
}

impl SlotData for RequestSlot {
    fn clear(&mut self) {
        self.header = None;
        self.payload = None;
        self.completion = None;
    }

    fn is_empty(&self) -> bool {
        self.header.is_none() && self.payload.is_none() && self.completion.is_none()
    }
}

/// Event channel slot.
#[derive(Default)]
pub(crate) struct EventSlot {
    pub(crate) header: Option<EventHeader>,
    pub(crate) payload: Option<ErasedPayload>,
}

impl SlotData for EventSlot {
    fn clear(&mut self) {
        self.header = None;
        self.payload = None;
    }

    fn is_empty(&self) -> bool {
        self.header.is_none() && self.payload.is_none()
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) requests_published: AtomicU64,
    pub(crate) requests_completed: AtomicU64,
    pub(crate) requests_failed: AtomicU64,
    pub(crate) events_published: AtomicU64,
    pub(crate) events_processed: AtomicU64,
    pub(crate) event_handler_failures: AtomicU64,
}

/// State shared by the facade and both consumer threads. Read-only apart
/// from the counters.
pub(crate) struct Shared {
    pub(crate) registry: Arc<dyn HandlerLookup>,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) counters: Counters,
}

impl Shared {
    fn before(&self, ctx: &DispatchContext) {
        for mw in &self.middleware {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| mw.before(ctx))) {
                middleware_panicked(ctx, "before", &*panic);
            }
        }
    }

    fn after(&self, ctx: &DispatchContext, outcome: &DispatchOutcome, latency: Duration) {
        for mw in &self.middleware {
            let called = catch_unwind(AssertUnwindSafe(|| mw.after(ctx, outcome, latency)));
            if let Err(panic) = called {
                middleware_panicked(ctx, "after", &*panic);
            }
        }
    }
}

fn middleware_panicked(ctx: &DispatchContext, hook: &'static str, panic: &(dyn Any + Send)) {
    error!(
        dispatch_id = %ctx.id,
        message_type = ctx.message_type,
        hook,
        panic_message = %panic_message(panic),
        "Middleware panicked"
    );
}

/// Owns a slot's completion until it is resolved. If the consumer unwinds
/// first, the cell fails with [`MediatorError::Internal`].
struct CompletionGuard {
    completion: Option<Box<dyn Completion>>,
    sequence: u64,
}

impl CompletionGuard {
    fn is_empty(&self) -> bool {
        self.completion.is_none()
    }

    /// `false` if there was no cell to resolve.
    fn resolve(mut self, outcome: Result<ErasedPayload, MediatorError>) -> bool {
        match self.completion.take() {
            Some(completion) => {
                completion.resolve(outcome);
                true
            }
            None => false,
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.resolve(Err(MediatorError::Internal(format!(
                "request slot {} was abandoned by the consumer",
                self.sequence
            ))));
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Request consumer thread body. Returns once the channel is closed and drained.
pub(crate) fn run_requests(mut receiver: ChannelReceiver<RequestSlot>, shared: Arc<Shared>) {
    debug!("Request consumer start");
    while let Some(mut slot) = receiver.drain() {
        let sequence = slot.sequence();
        let executed = catch_unwind(AssertUnwindSafe(|| {
            execute_request(&shared, sequence, &mut slot);
        }));
        if let Err(panic) = executed {
            shared.counters.requests_failed.fetch_add(1, Ordering::Relaxed);
            error!(
                sequence,
                panic_message = %panic_message(&*panic),
                "Request execution panicked"
            );
        }
    }
    debug!(
        consumed = receiver.channel().consumed_count(),
        "Request consumer exit"
    );
}

fn execute_request(shared: &Shared, sequence: u64, slot: &mut RequestSlot) {
    let completion = CompletionGuard {
        completion: slot.completion.take(),
        sequence,
    };
    let (Some(header), Some(payload)) = (slot.header, slot.payload.take()) else {
        // Claimed while the channel was closing
        if completion.is_empty() {
            debug!(sequence, "Skipping empty request slot");
            return;
        }
        error!(sequence, "Request slot published without a payload");
        shared.counters.requests_failed.fetch_add(1, Ordering::Relaxed);
        completion.resolve(Err(MediatorError::Internal(format!(
            "request slot {sequence} was published without a payload"
        ))));
        return;
    };

    let entry = shared
        .registry
        .lookup_request_handler(header.kind, header.type_id);
    let ctx = DispatchContext {
        id: header.id,
        kind: header.kind.into(),
        message_type: header.request_type,
        handler_name: entry.map(|e| e.handler_name()),
    };
    shared.before(&ctx);
    let started = Instant::now();

    let outcome = match entry {
        None => {
            warn!(
                dispatch_id = %header.id,
                kind = %header.kind,
                request_type = header.request_type,
                "No handler found for request"
            );
            Err(MediatorError::NoHandlerFound {
                kind: header.kind,
                request_type: header.request_type,
            })
        }
        Some(entry) => {
            debug!(
                dispatch_id = %header.id,
                request_type = header.request_type,
                handler_name = entry.handler_name(),
                sequence,
                "Handler execution start"
            );
            match catch_unwind(AssertUnwindSafe(|| entry.invoke(payload))) {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(err)) => {
                    error!(
                        dispatch_id = %header.id,
                        request_type = header.request_type,
                        handler_name = entry.handler_name(),
                        error = %err,
                        "Handler failed"
                    );
                    Err(MediatorError::handler_failed(header.request_type, err))
                }
                Err(panic) => {
                    let message = panic_message(&*panic);
                    error!(
                        dispatch_id = %header.id,
                        request_type = header.request_type,
                        handler_name = entry.handler_name(),
                        panic_message = %message,
                        "Handler panicked"
                    );
                    Err(MediatorError::handler_failed(
                        header.request_type,
                        anyhow::anyhow!("handler panicked: {message}"),
                    ))
                }
            }
        }
    };

    let latency = started.elapsed();
    let observed = match &outcome {
        Ok(_) => {
            shared
                .counters
                .requests_completed
                .fetch_add(1, Ordering::Relaxed);
            DispatchOutcome::Completed
        }
        Err(MediatorError::NoHandlerFound { .. }) => {
            shared.counters.requests_failed.fetch_add(1, Ordering::Relaxed);
            DispatchOutcome::NoHandler
        }
        Err(err) => {
            shared.counters.requests_failed.fetch_add(1, Ordering::Relaxed);
            DispatchOutcome::Failed(err.to_string())
        }
    };
    debug!(
        dispatch_id = %header.id,
        request_type = header.request_type,
        outcome = observed.as_str(),
        latency_us = latency.as_micros() as u64,
        "Handler execution complete"
    );
    shared.after(&ctx, &observed, latency);

    if !completion.resolve(outcome) {
        warn!(
            dispatch_id = %header.id,
            request_type = header.request_type,
            "Request slot had no result cell; result discarded"
        );
    }
}

/// Event consumer thread body. Returns once the channel is closed and drained.
pub(crate) fn run_events(mut receiver: ChannelReceiver<EventSlot>, shared: Arc<Shared>) {
    debug!("Event consumer start");
    while let Some(mut slot) = receiver.drain() {
        let sequence = slot.sequence();
        let processed = catch_unwind(AssertUnwindSafe(|| {
            execute_event(&shared, sequence, &mut slot)
        }))
        .unwrap_or_else(|panic| {
            error!(
                sequence,
                panic_message = %panic_message(&*panic),
                "Event execution panicked"
            );
            true
        });
        if processed {
            shared
                .counters
                .events_processed
                .fetch_add(1, Ordering::Relaxed);
        }
    }
    debug!(
        consumed = receiver.channel().consumed_count(),
        "Event consumer exit"
    );
}

/// `false` for an empty slot, which does not count as a processed event.
fn execute_event(shared: &Shared, sequence: u64, slot: &mut EventSlot) -> bool {
    let (Some(header), Some(payload)) = (slot.header, slot.payload.take()) else {
        debug!(sequence, "Skipping empty event slot");
        return false;
    };

    let handlers = shared.registry.lookup_event_handlers(header.type_id);
    if handlers.is_empty() {
        trace!(
            dispatch_id = %header.id,
            event_type = header.event_type,
            "No subscribers for event"
        );
        return true;
    }

    for handler in handlers {
        let ctx = DispatchContext {
            id: header.id,
            kind: DispatchKind::Event,
            message_type: header.event_type,
            handler_name: Some(handler.handler_name()),
        };
        shared.before(&ctx);
        let started = Instant::now();

        let failure = match catch_unwind(AssertUnwindSafe(|| handler.invoke(&*payload))) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(panic) => Some(format!("handler panicked: {}", panic_message(&*panic))),
        };

        let outcome = match failure {
            None => DispatchOutcome::Completed,
            Some(message) => {
                shared
                    .counters
                    .event_handler_failures
                    .fetch_add(1, Ordering::Relaxed);
                error!(
                    dispatch_id = %header.id,
                    event_type = header.event_type,
                    handler_name = handler.handler_name(),
                    error = %message,
                    "Event handler failed"
                );
                DispatchOutcome::Failed(message)
            }
        };
        shared.after(&ctx, &outcome, started.elapsed());
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerRegistry;

    #[derive(crate::Command)]
    #[response(u32)]
    struct Ping;

    #[derive(crate::Event)]
    struct Pong;

    struct PanickingHooks;

    impl Middleware for PanickingHooks {
        fn before(&self, _ctx: &DispatchContext) {
            panic!("before hook bug");
        }

        fn after(&self, _ctx: &DispatchContext, _outcome: &DispatchOutcome, _latency: Duration) {
            panic!("after hook bug");
        }
    }

    fn shared(middleware: Vec<Arc<dyn Middleware>>) -> Shared {
        let registry = HandlerRegistry::builder()
            .command_fn(|_: Ping| Ok(1))
            .event_fn(|_: &Pong| Ok(()))
            .build()
            .unwrap();
        Shared {
            registry: Arc::new(registry),
            middleware,
            counters: Counters::default(),
        }
    }

    fn ping_slot(cell: &ResultCell<u32>) -> RequestSlot {
        RequestSlot {
            header: Some(RequestHeader {
                id: DispatchId::new(),
                kind: RequestKind::Command,
                type_id: TypeId::of::<Ping>(),
                request_type: "Ping",
            }),
            payload: Some(Box::new(Ping)),
            completion: Some(Box::new(cell.clone())),
        }
    }

    #[test]
    fn test_slot_without_payload_fails_its_cell() {
        let shared = shared(Vec::new());
        let cell: ResultCell<u32> = ResultCell::new();
        let mut slot = RequestSlot {
            completion: Some(Box::new(cell.clone())),
            ..RequestSlot::default()
        };

        execute_request(&shared, 3, &mut slot);

        assert!(matches!(
            cell.try_get().unwrap(),
            Err(MediatorError::Internal(msg)) if msg.contains("slot 3")
        ));
        assert_eq!(shared.counters.requests_failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_fully_empty_request_slot_is_skipped() {
        let shared = shared(Vec::new());
        let mut slot = RequestSlot::default();
        execute_request(&shared, 0, &mut slot);
        assert_eq!(shared.counters.requests_failed.load(Ordering::Relaxed), 0);
        assert_eq!(shared.counters.requests_completed.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_empty_event_slot_is_a_noop() {
        let shared = shared(vec![Arc::new(PanickingHooks)]);
        let mut slot = EventSlot::default();
        assert!(!execute_event(&shared, 0, &mut slot));
        assert_eq!(
            shared.counters.event_handler_failures.load(Ordering::Relaxed),
            0
        );
    }

    #[test]
    fn test_panicking_middleware_does_not_lose_the_result() {
        let shared = shared(vec![Arc::new(PanickingHooks)]);
        for _ in 0..2 {
            let cell: ResultCell<u32> = ResultCell::new();
            execute_request(&shared, 0, &mut ping_slot(&cell));
            assert_eq!(cell.try_get().unwrap().unwrap(), 1);
        }
        assert_eq!(shared.counters.requests_completed.load(Ordering::Relaxed), 2);

        let mut slot = EventSlot {
            header: Some(EventHeader {
                id: DispatchId::new(),
                type_id: TypeId::of::<Pong>(),
                event_type: "Pong",
            }),
            payload: Some(Box::new(Pong)),
        };
        assert!(execute_event(&shared, 0, &mut slot));
        assert_eq!(
            shared.counters.event_handler_failures.load(Ordering::Relaxed),
            0
        );
    }

    #[test]
    fn test_abandoned_completion_fails_its_cell() {
        let cell: ResultCell<u32> = ResultCell::new();
        let guard = CompletionGuard {
            completion: Some(Box::new(cell.clone())),
            sequence: 12,
        };
        let unwound = catch_unwind(AssertUnwindSafe(move || {
            let _guard = guard;
            panic!("consumer bug");
        }));
        assert!(unwound.is_err());
        assert!(matches!(
            cell.try_get().unwrap(),
            Err(MediatorError::Internal(msg)) if msg.contains("slot 12")
        ));
    }

    #[test]
    fn test_request_slot_clear_drops_everything() {
        let cell: ResultCell<u32> = ResultCell::new();
        let mut slot = RequestSlot {
            header: Some(RequestHeader {
                id: DispatchId::new(),
                kind: RequestKind::Command,
                type_id: TypeId::of::<u32>(),
                request_type: "u32",
            }),
            payload: Some(Box::new(7u32)),
            completion: Some(Box::new(cell.clone())),
        };
        assert!(!slot.is_empty());
        slot.clear();
        assert!(slot.is_empty());
        // the slot no longer holds a reference to the cell
        assert!(!cell.is_complete());
    }

    #[test]
    fn test_completion_downcasts_response() {
        let cell: ResultCell<u32> = ResultCell::new();
        let completion: Box<dyn Completion> = Box::new(cell.clone());
        completion.resolve(Ok(Box::new(42u32) as ErasedPayload));
        assert_eq!(cell.try_get().unwrap().unwrap(), 42);
    }

    #[test]
    fn test_completion_type_mismatch_is_internal_error() {
        let cell: ResultCell<u32> = ResultCell::new();
        let completion: Box<dyn Completion> = Box::new(cell.clone());
        completion.resolve(Ok(Box::new("not a number") as ErasedPayload));
        assert!(matches!(
            cell.try_get().unwrap(),
            Err(MediatorError::Internal(msg)) if msg.contains("u32")
        ));
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let panic = catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(&*panic), "boom 1");
        let panic = catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*panic), "static");
    }
}
