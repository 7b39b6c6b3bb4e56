use std::any::{type_name, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::consumer::{
    run_events, run_requests, Counters, EventHeader, EventSlot, RequestHeader, RequestSlot,
    Shared,
};
use crate::channel::{ordered_channel, ChannelReceiver, OrderedChannel, SlotData};
use crate::config::MediatorConfig;
use crate::error::MediatorError;
use crate::ids::DispatchId;
use crate::middleware::Middleware;
use crate::registry::HandlerLookup;
use crate::request::{Event, Request};
use crate::result_cell::ResultCell;

/// Counters exposed by [`Mediator::metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediatorMetrics {
    /// Requests enqueued on the request channel
    pub requests_published: u64,
    /// Requests whose handler returned a value
    pub requests_completed: u64,
    /// Requests that failed (no handler, handler error or panic)
    pub requests_failed: u64,
    /// Requests claimed but not yet consumed
    pub requests_pending: usize,
    /// Events enqueued on the event channel
    pub events_published: u64,
    /// Events the consumer has finished with
    pub events_processed: u64,
    /// Individual event handler invocations that failed
    pub event_handler_failures: u64,
    /// Events claimed but not yet consumed
    pub events_pending: usize,
}

/// Configures and starts a [`Mediator`].
pub struct MediatorBuilder {
    registry: Arc<dyn HandlerLookup>,
    config: MediatorConfig,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MediatorBuilder {
    /// Replace the default configuration.
    #[must_use]
    pub fn config(mut self, config: MediatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a middleware. Middleware run in the order they were added.
    #[must_use]
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Allocate both channels and start both consumer threads.
    ///
    /// # Errors
    ///
    /// [`MediatorError::InvalidConfig`] for a rejected configuration, or
    /// [`MediatorError::Spawn`] if a consumer thread cannot be started.
    pub fn build(self) -> Result<Mediator, MediatorError> {
        self.config.validate()?;
        let (requests, request_rx) = ordered_channel::<RequestSlot>(self.config.request_capacity)?;
        let (events, event_rx) = ordered_channel::<EventSlot>(self.config.event_capacity)?;

        let shared = Arc::new(Shared {
            registry: self.registry,
            middleware: self.middleware,
            counters: Counters::default(),
        });

        let request_consumer = spawn_consumer(
            &self.config,
            "requests",
            request_rx,
            Arc::clone(&shared),
            run_requests,
        );
        let request_consumer = match request_consumer {
            Ok(handle) => handle,
            Err(err) => {
                requests.close();
                events.close();
                return Err(err);
            }
        };
        let event_consumer = spawn_consumer(
            &self.config,
            "events",
            event_rx,
            Arc::clone(&shared),
            run_events,
        );
        let event_consumer = match event_consumer {
            Ok(handle) => handle,
            Err(err) => {
                requests.close();
                events.close();
                let _ = request_consumer.join();
                return Err(err);
            }
        };

        info!(
            request_capacity = self.config.request_capacity,
            event_capacity = self.config.event_capacity,
            dispatch_timeout_ms = self.config.dispatch_timeout_ms,
            middleware = shared.middleware.len(),
            "Mediator started"
        );

        Ok(Mediator {
            requests,
            events,
            shared,
            config: self.config,
            consumers: Mutex::new(vec![request_consumer, event_consumer]),
            shut_down: AtomicBool::new(false),
        })
    }
}

fn spawn_consumer<T, F>(
    config: &MediatorConfig,
    role: &str,
    receiver: ChannelReceiver<T>,
    shared: Arc<Shared>,
    body: F,
) -> Result<JoinHandle<()>, MediatorError>
where
    T: SlotData,
    F: FnOnce(ChannelReceiver<T>, Arc<Shared>) + Send + 'static,
{
    let name = format!("{}-{}", config.thread_name_prefix, role);
    let mut builder = thread::Builder::new().name(name.clone());
    if config.stack_size > 0 {
        builder = builder.stack_size(config.stack_size);
    }
    builder.spawn(move || body(receiver, shared)).map_err(|e| {
        error!(
            thread_name = %name,
            stack_size = config.stack_size,
            error = %e,
            "Failed to spawn consumer thread - CRITICAL"
        );
        MediatorError::Spawn(format!("{name}: {e}"))
    })
}

/// In-process mediator.
///
/// Requests (commands and queries) go through one ordered channel and are
/// answered by exactly one handler each; events go through a second ordered
/// channel and reach every subscribed handler. Each channel has one consumer
/// thread, so handlers of the same channel never run concurrently.
///
/// Handlers must not call [`dispatch_blocking`](Self::dispatch_blocking) on
/// the mediator that runs them: the request consumer would wait on itself
/// until the timeout.
pub struct Mediator {
    requests: Arc<OrderedChannel<RequestSlot>>,
    events: Arc<OrderedChannel<EventSlot>>,
    shared: Arc<Shared>,
    config: MediatorConfig,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl Mediator {
    /// Start configuring a mediator over `registry`.
    pub fn builder(registry: impl HandlerLookup) -> MediatorBuilder {
        MediatorBuilder {
            registry: Arc::new(registry),
            config: MediatorConfig::default(),
            middleware: Vec::new(),
        }
    }

    /// Start a mediator with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`MediatorBuilder::build`].
    pub fn new(registry: impl HandlerLookup) -> Result<Self, MediatorError> {
        Self::builder(registry).build()
    }

    /// Start a mediator with `config`.
    ///
    /// # Errors
    ///
    /// See [`MediatorBuilder::build`].
    pub fn with_config(
        registry: impl HandlerLookup,
        config: MediatorConfig,
    ) -> Result<Self, MediatorError> {
        Self::builder(registry).config(config).build()
    }

    /// Enqueue a command or query and return the cell its result will land in.
    ///
    /// Blocks only while the request channel is full. After shutdown the
    /// returned cell is already failed with [`MediatorError::ShutDown`].
    pub fn dispatch_async<R: Request>(&self, request: R) -> ResultCell<R::Response> {
        let request_type = type_name::<R>();
        if self.is_shut_down() {
            return ResultCell::failed(request_type, MediatorError::ShutDown);
        }

        let mut handle = match self.requests.claim() {
            Ok(handle) => handle,
            Err(err) => return ResultCell::failed(request_type, err.into()),
        };

        let cell = ResultCell::labelled(request_type);
        let completion = cell.clone();
        let header = RequestHeader {
            id: DispatchId::new(),
            kind: R::KIND,
            type_id: TypeId::of::<R>(),
            request_type,
        };
        handle.write(move |slot| {
            slot.header = Some(header);
            slot.payload = Some(Box::new(request));
            slot.completion = Some(Box::new(completion));
        });
        let sequence = handle.sequence();
        handle.publish();
        self.shared
            .counters
            .requests_published
            .fetch_add(1, Ordering::Relaxed);

        debug!(
            dispatch_id = %header.id,
            kind = %header.kind,
            request_type,
            sequence,
            "Request enqueued"
        );
        cell
    }

    /// Dispatch and wait up to the configured timeout for the result.
    ///
    /// # Errors
    ///
    /// [`MediatorError::NoHandlerFound`], [`MediatorError::HandlerFailed`],
    /// [`MediatorError::Timeout`] or [`MediatorError::ShutDown`]. On timeout
    /// the handler still runs to completion; its result is discarded.
    pub fn dispatch_blocking<R: Request>(&self, request: R) -> Result<R::Response, MediatorError> {
        self.dispatch_timeout(request, self.config.dispatch_timeout())
    }

    /// Like [`dispatch_blocking`](Self::dispatch_blocking) with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`dispatch_blocking`](Self::dispatch_blocking).
    pub fn dispatch_timeout<R: Request>(
        &self,
        request: R,
        timeout: Duration,
    ) -> Result<R::Response, MediatorError> {
        if self.is_shut_down() {
            return Err(MediatorError::ShutDown);
        }
        self.dispatch_async(request).take_timeout(timeout)
    }

    /// Enqueue an event for every handler subscribed to its type.
    ///
    /// Never fails: handler errors are logged on the event consumer thread,
    /// and after shutdown the event is dropped with a warning.
    pub fn publish_event<E: Event>(&self, event: E) {
        let event_type = type_name::<E>();
        if self.is_shut_down() {
            warn!(event_type, "Mediator shut down - event dropped");
            return;
        }

        let mut handle = match self.events.claim() {
            Ok(handle) => handle,
            Err(err) => {
                warn!(event_type, error = %err, "Event dropped");
                return;
            }
        };
        let header = EventHeader {
            id: DispatchId::new(),
            type_id: TypeId::of::<E>(),
            event_type,
        };
        handle.write(move |slot| {
            slot.header = Some(header);
            slot.payload = Some(Box::new(event));
        });
        let sequence = handle.sequence();
        handle.publish();
        self.shared
            .counters
            .events_published
            .fetch_add(1, Ordering::Relaxed);

        debug!(dispatch_id = %header.id, event_type, sequence, "Event enqueued");
    }

    /// Current counters and channel depths.
    #[must_use]
    pub fn metrics(&self) -> MediatorMetrics {
        let c = &self.shared.counters;
        MediatorMetrics {
            requests_published: c.requests_published.load(Ordering::Relaxed),
            requests_completed: c.requests_completed.load(Ordering::Relaxed),
            requests_failed: c.requests_failed.load(Ordering::Relaxed),
            requests_pending: self.requests.len(),
            events_published: c.events_published.load(Ordering::Relaxed),
            events_processed: c.events_processed.load(Ordering::Relaxed),
            event_handler_failures: c.event_handler_failures.load(Ordering::Relaxed),
            events_pending: self.events.len(),
        }
    }

    /// The configuration this mediator was started with.
    #[must_use]
    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    /// `true` once [`shutdown`](Self::shutdown) has started.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop accepting work, drain what was already enqueued and join both
    /// consumer threads. Later calls return immediately.
    ///
    /// A dispatch racing with shutdown is either drained and answered or
    /// refused with [`MediatorError::ShutDown`]; its cell never stays pending.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            requests_pending = self.requests.len(),
            events_pending = self.events.len(),
            "Mediator shutting down"
        );
        self.requests.close();
        self.events.close();

        let consumers = std::mem::take(&mut *self.consumers.lock());
        let current = thread::current().id();
        for consumer in consumers {
            // Called from a handler: the consumer exits on its own after the drain
            if consumer.thread().id() == current {
                continue;
            }
            let name = consumer.thread().name().unwrap_or("consumer").to_string();
            if consumer.join().is_err() {
                error!(thread_name = %name, "Consumer thread panicked");
            }
        }

        let metrics = self.metrics();
        info!(
            requests_completed = metrics.requests_completed,
            requests_failed = metrics.requests_failed,
            events_processed = metrics.events_processed,
            "Mediator stopped"
        );
    }
}

impl Drop for Mediator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("config", &self.config)
            .field("shut_down", &self.is_shut_down())
            .field("metrics", &self.metrics())
            .finish()
    }
}
