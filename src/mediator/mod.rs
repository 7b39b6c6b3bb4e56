//! # Mediator Module
//!
//! The facade that ties the ordered channels, the handler registry and the
//! result cells together.
//!
//! ## Architecture
//!
//! ```mermaid
//! flowchart LR
//!     C1[caller] -- dispatch_async --> RQ[(request channel)]
//!     C2[caller] -- publish_event --> EQ[(event channel)]
//!     RQ --> RT[requests consumer thread]
//!     EQ --> ET[events consumer thread]
//!     RT -- lookup --> REG[HandlerRegistry]
//!     ET -- lookup --> REG
//!     RT -- fulfill / fail --> RC[ResultCell]
//!     RC -- take_timeout / await --> C1
//! ```
//!
//! ## Request Flow
//!
//! 1. The caller claims a request slot (blocking only while the channel is full)
//! 2. The request and a fresh [`ResultCell`](crate::ResultCell) are written and published
//! 3. The request consumer drains slots in claim order and resolves one handler
//! 4. The handler runs on the consumer thread; its value or error completes the cell
//! 5. The slot is cleared and its capacity released
//!
//! Unmatched requests fail with [`MediatorError::NoHandlerFound`](crate::MediatorError::NoHandlerFound).
//! Unmatched events are dropped silently. Event handler failures are logged and
//! never reach the publisher.
//!
//! ## Example
//!
//! ```rust
//! use brrtmediator::{Command, HandlerRegistry, Mediator};
//!
//! #[derive(Command)]
//! #[response(u32)]
//! struct Increment(u32);
//!
//! let registry = HandlerRegistry::builder()
//!     .command_fn(|cmd: Increment| Ok(cmd.0 + 1))
//!     .build()
//!     .unwrap();
//! let mediator = Mediator::new(registry).unwrap();
//! assert_eq!(mediator.dispatch_blocking(Increment(5)).unwrap(), 6);
//! ```

mod consumer;
mod core;

pub use core::{Mediator, MediatorBuilder, MediatorMetrics};
