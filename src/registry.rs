//! # Handler Registry
//!
//! Explicit startup-time binding of message types to handlers. Resolution is a
//! direct `TypeId` lookup; nothing is discovered at runtime and nothing is
//! mutated once the mediator starts.
//!
//! ```rust
//! use brrtmediator::{Command, HandlerRegistry};
//!
//! #[derive(Command)]
//! #[response(u32)]
//! struct Double(u32);
//!
//! let registry = HandlerRegistry::builder()
//!     .command_fn(|cmd: Double| Ok(cmd.0 * 2))
//!     .build()
//!     .expect("no duplicate bindings");
//! assert!(registry.has_command_handler::<Double>());
//! ```
//!
//! Build-time policy:
//! - a second binding for the same command or query type fails `build()` with
//!   [`MediatorError::DuplicateHandler`]
//! - every event binding is kept, in registration order

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use smallvec::SmallVec;
use tracing::{debug, info};

use crate::error::MediatorError;
use crate::request::{
    Command, CommandHandler, Event, EventHandler, Query, QueryHandler, Request, RequestKind,
};

/// Type-erased request or response travelling through a slot.
pub type ErasedPayload = Box<dyn Any + Send>;

type InvokeRequest = dyn Fn(ErasedPayload) -> anyhow::Result<ErasedPayload> + Send + Sync;
type InvokeEvent = dyn Fn(&(dyn Any + Send)) -> anyhow::Result<()> + Send + Sync;

/// Most events have only a handful of subscribers (JSF: no heap in dispatch)
pub const INLINE_EVENT_HANDLERS: usize = 4;

/// Handler list for one event type, in registration order.
pub type EventHandlerVec = SmallVec<[EventHandlerEntry; INLINE_EVENT_HANDLERS]>;

/// The single handler bound to a command or query type.
pub struct RequestHandlerEntry {
    handler_name: &'static str,
    invoke: Box<InvokeRequest>,
}

impl RequestHandlerEntry {
    /// Wrap a typed handler function.
    pub fn new<R, F>(handler_name: &'static str, handler: F) -> Self
    where
        R: Request,
        F: Fn(R) -> anyhow::Result<R::Response> + Send + Sync + 'static,
    {
        Self {
            handler_name,
            invoke: Box::new(move |payload: ErasedPayload| {
                let request = payload
                    .downcast::<R>()
                    .map_err(|_| anyhow::anyhow!("payload is not a '{}'", type_name::<R>()))?;
                let response = handler(*request)?;
                Ok(Box::new(response) as ErasedPayload)
            }),
        }
    }

    /// Name of the handler type, for logs.
    #[must_use]
    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    /// Run the handler on a payload of the bound request type.
    ///
    /// # Errors
    ///
    /// The handler's error, or a type mismatch if the payload is not the bound type.
    pub fn invoke(&self, payload: ErasedPayload) -> anyhow::Result<ErasedPayload> {
        (self.invoke)(payload)
    }
}

impl fmt::Debug for RequestHandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandlerEntry")
            .field("handler_name", &self.handler_name)
            .finish()
    }
}

/// One of the handlers bound to an event type.
pub struct EventHandlerEntry {
    handler_name: &'static str,
    invoke: Box<InvokeEvent>,
}

impl EventHandlerEntry {
    /// Wrap a typed handler function.
    pub fn new<E, F>(handler_name: &'static str, handler: F) -> Self
    where
        E: Event,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            handler_name,
            invoke: Box::new(move |payload: &(dyn Any + Send)| {
                let event = payload
                    .downcast_ref::<E>()
                    .ok_or_else(|| anyhow::anyhow!("payload is not a '{}'", type_name::<E>()))?;
                handler(event)
            }),
        }
    }

    /// Name of the handler type, for logs.
    #[must_use]
    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    /// Run the handler on an event of the bound type.
    ///
    /// # Errors
    ///
    /// The handler's error, or a type mismatch if the payload is not the bound type.
    pub fn invoke(&self, payload: &(dyn Any + Send)) -> anyhow::Result<()> {
        (self.invoke)(payload)
    }
}

impl fmt::Debug for EventHandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlerEntry")
            .field("handler_name", &self.handler_name)
            .finish()
    }
}

/// Read-only handler resolution used by the consumer threads.
///
/// Must be complete before the mediator starts; the consumers never mutate it.
pub trait HandlerLookup: Send + Sync + 'static {
    /// The handler for a command type, if bound.
    fn lookup_command_handler(&self, type_id: TypeId) -> Option<&RequestHandlerEntry>;

    /// The handler for a query type, if bound.
    fn lookup_query_handler(&self, type_id: TypeId) -> Option<&RequestHandlerEntry>;

    /// Every handler for an event type, in registration order. Empty if none.
    fn lookup_event_handlers(&self, type_id: TypeId) -> &[EventHandlerEntry];

    /// Resolve through the table selected by `kind`.
    fn lookup_request_handler(
        &self,
        kind: RequestKind,
        type_id: TypeId,
    ) -> Option<&RequestHandlerEntry> {
        match kind {
            RequestKind::Command => self.lookup_command_handler(type_id),
            RequestKind::Query => self.lookup_query_handler(type_id),
        }
    }
}

/// Immutable handler tables built by [`RegistryBuilder`].
#[derive(Default)]
pub struct HandlerRegistry {
    commands: HashMap<TypeId, RequestHandlerEntry>,
    queries: HashMap<TypeId, RequestHandlerEntry>,
    events: HashMap<TypeId, EventHandlerVec>,
}

impl HandlerRegistry {
    /// Start collecting bindings.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// `true` if `C` has a handler.
    #[must_use]
    pub fn has_command_handler<C: Command>(&self) -> bool {
        self.commands.contains_key(&TypeId::of::<C>())
    }

    /// `true` if `Q` has a handler.
    #[must_use]
    pub fn has_query_handler<Q: Query>(&self) -> bool {
        self.queries.contains_key(&TypeId::of::<Q>())
    }

    /// Number of handlers bound to `E`.
    #[must_use]
    pub fn event_handler_count<E: Event>(&self) -> usize {
        self.events.get(&TypeId::of::<E>()).map_or(0, |h| h.len())
    }

    /// Number of bound command types.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Number of bound query types.
    #[must_use]
    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    /// Number of event types with at least one handler.
    #[must_use]
    pub fn event_type_count(&self) -> usize {
        self.events.len()
    }
}

impl HandlerLookup for HandlerRegistry {
    fn lookup_command_handler(&self, type_id: TypeId) -> Option<&RequestHandlerEntry> {
        self.commands.get(&type_id)
    }

    fn lookup_query_handler(&self, type_id: TypeId) -> Option<&RequestHandlerEntry> {
        self.queries.get(&type_id)
    }

    fn lookup_event_handlers(&self, type_id: TypeId) -> &[EventHandlerEntry] {
        self.events
            .get(&type_id)
            .map(|handlers| handlers.as_slice())
            .unwrap_or(&[])
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("commands", &self.commands.len())
            .field("queries", &self.queries.len())
            .field("event_types", &self.events.len())
            .finish()
    }
}

/// Collects bindings; duplicates are reported by [`build`](Self::build).
#[derive(Default)]
pub struct RegistryBuilder {
    registry: HandlerRegistry,
    duplicates: Vec<(RequestKind, &'static str)>,
}

impl RegistryBuilder {
    /// Bind a [`CommandHandler`] implementation.
    #[must_use]
    pub fn command<C, H>(self, handler: H) -> Self
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let entry = RequestHandlerEntry::new::<C, _>(type_name::<H>(), move |command| {
            handler.handle(command)
        });
        self.bind_request::<C>(entry)
    }

    /// Bind a closure as the handler for command `C`.
    #[must_use]
    pub fn command_fn<C, F>(self, handler: F) -> Self
    where
        C: Command,
        F: Fn(C) -> anyhow::Result<C::Response> + Send + Sync + 'static,
    {
        let entry = RequestHandlerEntry::new::<C, _>(type_name::<F>(), handler);
        self.bind_request::<C>(entry)
    }

    /// Bind a [`QueryHandler`] implementation.
    #[must_use]
    pub fn query<Q, H>(self, handler: H) -> Self
    where
        Q: Query,
        H: QueryHandler<Q>,
    {
        let entry =
            RequestHandlerEntry::new::<Q, _>(type_name::<H>(), move |query| handler.handle(query));
        self.bind_request::<Q>(entry)
    }

    /// Bind a closure as the handler for query `Q`.
    #[must_use]
    pub fn query_fn<Q, F>(self, handler: F) -> Self
    where
        Q: Query,
        F: Fn(Q) -> anyhow::Result<Q::Response> + Send + Sync + 'static,
    {
        let entry = RequestHandlerEntry::new::<Q, _>(type_name::<F>(), handler);
        self.bind_request::<Q>(entry)
    }

    /// Add an [`EventHandler`] implementation for `E`.
    #[must_use]
    pub fn event<E, H>(self, handler: H) -> Self
    where
        E: Event,
        H: EventHandler<E>,
    {
        let entry = EventHandlerEntry::new::<E, _>(type_name::<H>(), move |event| {
            handler.handle(event)
        });
        self.bind_event::<E>(entry)
    }

    /// Add a closure as a handler for `E`.
    #[must_use]
    pub fn event_fn<E, F>(self, handler: F) -> Self
    where
        E: Event,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let entry = EventHandlerEntry::new::<E, _>(type_name::<F>(), handler);
        self.bind_event::<E>(entry)
    }

    fn bind_request<R: Request>(mut self, entry: RequestHandlerEntry) -> Self {
        let table = match R::KIND {
            RequestKind::Command => &mut self.registry.commands,
            RequestKind::Query => &mut self.registry.queries,
        };
        let type_id = TypeId::of::<R>();
        if table.contains_key(&type_id) {
            debug!(
                kind = %R::KIND,
                request_type = type_name::<R>(),
                handler_name = entry.handler_name(),
                "Duplicate request handler binding"
            );
            self.duplicates.push((R::KIND, type_name::<R>()));
        } else {
            table.insert(type_id, entry);
        }
        self
    }

    fn bind_event<E: Event>(mut self, entry: EventHandlerEntry) -> Self {
        self.registry
            .events
            .entry(TypeId::of::<E>())
            .or_default()
            .push(entry);
        self
    }

    /// Finish registration.
    ///
    /// # Errors
    ///
    /// [`MediatorError::DuplicateHandler`] for the first command or query type
    /// that was bound twice.
    pub fn build(self) -> Result<HandlerRegistry, MediatorError> {
        if let Some(&(kind, request_type)) = self.duplicates.first() {
            return Err(MediatorError::DuplicateHandler { kind, request_type });
        }
        info!(
            commands = self.registry.commands.len(),
            queries = self.registry.queries.len(),
            event_types = self.registry.events.len(),
            "Handler registry built"
        );
        Ok(self.registry)
    }
}
