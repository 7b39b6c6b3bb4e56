//! Message contracts: what can be dispatched and what can handle it.
//!
//! A [`Request`] is either a command or a query (the [`RequestKind`] tag) and
//! is answered by exactly one handler. An [`Event`] is answered by zero or more
//! handlers. Identity for handler resolution is the concrete Rust type.
//!
//! The derives in `brrtmediator_macros` implement these traits:
//!
//! ```rust
//! use brrtmediator::{Command, Event, Query};
//!
//! #[derive(Command)]
//! #[response(u64)]
//! struct CreateOrder {
//!     sku: String,
//! }
//!
//! #[derive(Query)]
//! #[response(Option<String>)]
//! struct FindSku {
//!     order_id: u64,
//! }
//!
//! #[derive(Event)]
//! struct OrderCreated {
//!     order_id: u64,
//! }
//! ```

use std::fmt;

/// Tag of the request union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Mutating request
    Command,
    /// Read-only request
    Query,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Command => f.write_str("command"),
            RequestKind::Query => f.write_str("query"),
        }
    }
}

/// A message answered by exactly one handler.
pub trait Request: Send + 'static {
    /// Value produced by the handler
    type Response: Send + 'static;
    /// Which handler table resolves this request
    const KIND: RequestKind;
}

/// Mutating request. Implement together with `Request` where `KIND` is
/// [`RequestKind::Command`], or use `#[derive(Command)]`.
pub trait Command: Request {}

/// Read-only request. Implement together with `Request` where `KIND` is
/// [`RequestKind::Query`], or use `#[derive(Query)]`.
pub trait Query: Request {}

/// Fire-and-forget notification.
pub trait Event: Send + 'static {}

/// Handles one command type.
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    /// Execute the command on the request consumer thread.
    fn handle(&self, command: C) -> anyhow::Result<C::Response>;
}

/// Handles one query type.
pub trait QueryHandler<Q: Query>: Send + Sync + 'static {
    /// Execute the query on the request consumer thread.
    fn handle(&self, query: Q) -> anyhow::Result<Q::Response>;
}

/// Handles one event type. Several may be registered for the same event.
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    /// React to the event on the event consumer thread.
    ///
    /// An error is logged and does not stop the remaining handlers.
    fn handle(&self, event: &E) -> anyhow::Result<()>;
}

/// Kind of message flowing through a consumer, for logs and middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchKind {
    /// A command
    Command,
    /// A query
    Query,
    /// An event
    Event,
}

impl From<RequestKind> for DispatchKind {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Command => DispatchKind::Command,
            RequestKind::Query => DispatchKind::Query,
        }
    }
}

impl fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchKind::Command => f.write_str("command"),
            DispatchKind::Query => f.write_str("query"),
            DispatchKind::Event => f.write_str("event"),
        }
    }
}
