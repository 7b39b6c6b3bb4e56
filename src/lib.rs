//! # BRRTMediator
//!
//! **BRRTMediator** is an in-process mediator for Rust: typed commands and
//! queries are routed to exactly one handler each, typed events to every
//! subscribed handler, through two fixed-capacity ordered channels drained by
//! dedicated consumer threads.
//!
//! ## Overview
//!
//! Callers never run handlers themselves. A dispatch claims a slot on the
//! request channel, writes the request and a fresh [`ResultCell`] into it and
//! publishes it. The request consumer thread drains slots strictly in claim
//! order, executes the bound handler and completes the cell. Events follow the
//! same path on their own channel without a cell: publishing is
//! fire-and-forget.
//!
//! ## Architecture
//!
//! - **[`channel`]** - Multi-producer, single-consumer ordered channel over a preallocated slot arena
//! - **[`result_cell`]** - Single-assignment result with blocking wait, continuations and `Future`
//! - **[`registry`]** - Explicit startup-time binding of message types to handlers
//! - **[`mediator`]** - The facade: `dispatch_blocking`, `dispatch_async`, `publish_event`
//! - **[`middleware`]** - Observers around every handler execution (tracing, metrics)
//! - **[`config`]** - Channel capacities, timeouts and thread settings from env or file
//! - **[`logging`]** - Structured logging setup with `tracing-subscriber`
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Caller
//!     participant Mediator
//!     participant Channel as Request Channel
//!     participant Consumer as Consumer Thread
//!     participant Registry
//!
//!     Caller->>Mediator: dispatch_blocking(cmd)
//!     Mediator->>Channel: claim + write + publish
//!     Mediator-->>Caller: ResultCell (waiting)
//!     Consumer->>Channel: drain (claim order)
//!     Consumer->>Registry: lookup_command_handler(TypeId)
//!     Consumer->>Consumer: handler.handle(cmd)
//!     Consumer-->>Caller: fulfill(ResultCell)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! use brrtmediator::{Command, Event, HandlerRegistry, Mediator, Query};
//!
//! #[derive(Command)]
//! #[response(u64)]
//! struct CreateOrder {
//!     quantity: u64,
//! }
//!
//! #[derive(Query)]
//! #[response(String)]
//! struct Greeting;
//!
//! #[derive(Event)]
//! struct OrderCreated;
//!
//! let seen = Arc::new(AtomicBool::new(false));
//! let flag = Arc::clone(&seen);
//!
//! let registry = HandlerRegistry::builder()
//!     .command_fn(|cmd: CreateOrder| Ok(cmd.quantity * 10))
//!     .query_fn(|_: Greeting| Ok("hello".to_string()))
//!     .event_fn(move |_: &OrderCreated| {
//!         flag.store(true, Ordering::SeqCst);
//!         Ok(())
//!     })
//!     .build()
//!     .expect("no duplicate handlers");
//!
//! let mediator = Mediator::new(registry).expect("consumers started");
//! assert_eq!(mediator.dispatch_blocking(CreateOrder { quantity: 3 }).unwrap(), 30);
//! assert_eq!(mediator.dispatch_blocking(Greeting).unwrap(), "hello");
//! mediator.publish_event(OrderCreated);
//! mediator.shutdown();
//! assert!(seen.load(Ordering::SeqCst));
//! ```
//!
//! ## Guarantees
//!
//! - Requests are processed one at a time, in claim order; so are events
//! - A request with no handler fails with [`MediatorError::NoHandlerFound`]
//! - An event with no handler is a no-op
//! - A failing or panicking event handler is logged and the next handler runs
//! - `dispatch_blocking` timeouts stop the wait, not the handler
//!
//! ## Runtime Considerations
//!
//! Consumer threads are plain OS threads. Producers may be OS threads or `may`
//! coroutines: backpressure on a full channel uses `may`'s semaphore, which
//! parks a coroutine without blocking its worker thread.

// Lets the derive macros refer to `::brrtmediator` from inside this crate
extern crate self as brrtmediator;

pub mod channel;
pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod mediator;
pub mod middleware;
pub mod registry;
pub mod request;
pub mod result_cell;

pub use brrtmediator_macros::{Command, Event, Query};
pub use config::MediatorConfig;
pub use error::MediatorError;
pub use ids::DispatchId;
pub use mediator::{Mediator, MediatorBuilder, MediatorMetrics};
pub use registry::{HandlerLookup, HandlerRegistry, RegistryBuilder};
pub use request::{
    Command, CommandHandler, DispatchKind, Event, EventHandler, Query, QueryHandler, Request,
    RequestKind,
};
pub use result_cell::ResultCell;
