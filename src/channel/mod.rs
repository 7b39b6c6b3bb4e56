//! # Ordered Channel Module
//!
//! A fixed-capacity, multi-producer / single-consumer channel over a
//! preallocated arena of reusable slots.
//!
//! ## Protocol
//!
//! ```mermaid
//! sequenceDiagram
//!     participant P as Producer (any thread or coroutine)
//!     participant C as OrderedChannel
//!     participant R as ChannelReceiver (one thread)
//!
//!     P->>C: claim()  (waits on `free` when full)
//!     C-->>P: SlotHandle { sequence }
//!     P->>C: write(|slot| ...)
//!     P->>C: publish()  (marks slot, posts `available`)
//!     R->>C: drain()  (waits on `available`)
//!     C-->>R: DrainedSlot { sequence }  (strictly in sequence order)
//!     R->>C: drop(DrainedSlot)  (clear slot, posts `free`)
//! ```
//!
//! Sequences are handed out by a single `fetch_add`; the slot index is
//! `sequence & (capacity - 1)`, so capacity must be a power of two. The
//! consumer yields sequence `n` only once slot `n` carries the published
//! marker for `n`, which is what keeps drain order equal to claim order even
//! when producers publish out of order.
//!
//! Both waits use `may` semaphores, so producers can be OS threads or `may`
//! coroutines without blocking a coroutine worker.

mod ring;
mod slot;

use std::fmt;

pub use ring::{ordered_channel, ChannelReceiver, DrainedSlot, OrderedChannel, SlotHandle};
pub use slot::SlotData;

/// Default number of slots per channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Errors returned by [`OrderedChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// Capacity was zero or not a power of two
    InvalidCapacity(usize),
    /// Every slot is claimed and not yet released (`try_claim` only)
    Full,
    /// The channel no longer accepts claims
    Closed,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::InvalidCapacity(capacity) => write!(
                f,
                "channel capacity must be a non-zero power of two, got {capacity}"
            ),
            ChannelError::Full => write!(f, "channel is at capacity"),
            ChannelError::Closed => write!(f, "channel is closed"),
        }
    }
}

impl std::error::Error for ChannelError {}
