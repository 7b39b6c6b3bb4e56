use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use may::sync::Semphore;
use parking_lot::MutexGuard;
use tracing::{debug, trace};

use super::slot::{Slot, SlotData};
use super::ChannelError;

/// Spins before the consumer starts yielding its thread while a claimed slot
/// is still being written.
const SPIN_LIMIT: u32 = 64;

/// Producer side of an ordered channel. Shared by all producers via `Arc`.
pub struct OrderedChannel<T: SlotData> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    /// Next sequence handed out by `claim`
    claim_cursor: AtomicU64,
    /// Next sequence the consumer will drain; everything below is released
    consume_cursor: AtomicU64,
    /// Permits for unclaimed slots
    free: Semphore,
    /// One token per publish (plus one on close)
    available: Semphore,
    closed: AtomicBool,
    published: AtomicU64,
}

/// Create a channel with `capacity` preallocated slots.
///
/// Returns the shared producer side and the single consumer handle.
///
/// # Errors
///
/// [`ChannelError::InvalidCapacity`] unless `capacity` is a non-zero power of two.
pub fn ordered_channel<T: SlotData>(
    capacity: usize,
) -> Result<(Arc<OrderedChannel<T>>, ChannelReceiver<T>), ChannelError> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(ChannelError::InvalidCapacity(capacity));
    }

    let slots: Box<[Slot<T>]> = (0..capacity).map(|_| Slot::new()).collect();
    let channel = Arc::new(OrderedChannel {
        slots,
        mask: (capacity - 1) as u64,
        claim_cursor: AtomicU64::new(0),
        consume_cursor: AtomicU64::new(0),
        free: Semphore::new(capacity),
        available: Semphore::new(0),
        closed: AtomicBool::new(false),
        published: AtomicU64::new(0),
    });
    let receiver = ChannelReceiver {
        channel: Arc::clone(&channel),
    };
    Ok((channel, receiver))
}

impl<T: SlotData> OrderedChannel<T> {
    #[inline]
    fn slot(&self, sequence: u64) -> &Slot<T> {
        // mask < slots.len(), so the index is always in bounds
        &self.slots[(sequence & self.mask) as usize]
    }

    /// Claim the next slot, waiting while the channel is at capacity.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] once [`close`](Self::close) has been called.
    pub fn claim(&self) -> Result<SlotHandle<'_, T>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.free.wait();
        if self.is_closed() {
            self.free.post();
            return Err(ChannelError::Closed);
        }
        self.reserve()
    }

    /// Claim the next slot without waiting.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Full`] when every slot is in use, [`ChannelError::Closed`]
    /// after close.
    pub fn try_claim(&self) -> Result<SlotHandle<'_, T>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if !self.free.try_wait() {
            return Err(ChannelError::Full);
        }
        self.reserve()
    }

    /// Take the next sequence. `claim_cursor` and `closed` are both accessed
    /// `SeqCst`, so a sequence taken before the close is always drained and a
    /// sequence taken after it sees the close here.
    fn reserve(&self) -> Result<SlotHandle<'_, T>, ChannelError> {
        let sequence = self.claim_cursor.fetch_add(1, Ordering::SeqCst);
        let handle = SlotHandle {
            channel: self,
            sequence,
            published: false,
        };
        if self.is_closed() {
            // The consumer may already have stopped. Publish the slot empty so
            // one that is still draining skips over it.
            debug!(sequence, "Channel closed during claim");
            handle.publish();
            return Err(ChannelError::Closed);
        }
        trace!(sequence, "slot claimed");
        Ok(handle)
    }

    /// Stop accepting claims. Slots claimed before the close are still drained.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(
                claimed = self.claim_cursor.load(Ordering::Acquire),
                consumed = self.consume_cursor.load(Ordering::Acquire),
                "Channel closed"
            );
            // Wake the consumer so it can observe the close
            self.available.post();
        }
    }

    /// `true` after [`close`](Self::close).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of slots in the arena.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots claimed and not yet released by the consumer.
    #[must_use]
    pub fn len(&self) -> usize {
        let claimed = self.claim_cursor.load(Ordering::Acquire);
        let consumed = self.consume_cursor.load(Ordering::Acquire);
        claimed.saturating_sub(consumed) as usize
    }

    /// `true` when no slot is claimed or pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slots published since creation.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Total slots consumed and released since creation.
    #[must_use]
    pub fn consumed_count(&self) -> u64 {
        self.consume_cursor.load(Ordering::Acquire)
    }
}

/// Exclusive write access to a claimed slot.
///
/// Dropping the handle without calling [`publish`](Self::publish) publishes the
/// slot as written so far; a claimed sequence can never stall the consumer.
pub struct SlotHandle<'a, T: SlotData> {
    channel: &'a OrderedChannel<T>,
    sequence: u64,
    published: bool,
}

impl<T: SlotData> SlotHandle<'_, T> {
    /// Position of this slot in the channel's total order.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Populate the slot.
    pub fn write<F>(&mut self, populate: F)
    where
        F: FnOnce(&mut T),
    {
        let mut value = self.channel.slot(self.sequence).value.lock();
        populate(&mut value);
    }

    /// Make the slot visible to the consumer.
    pub fn publish(mut self) {
        self.mark_published();
    }

    fn mark_published(&mut self) {
        if self.published {
            return;
        }
        self.published = true;
        self.channel.slot(self.sequence).mark_published(self.sequence);
        self.channel.published.fetch_add(1, Ordering::Relaxed);
        self.channel.available.post();
    }
}

impl<T: SlotData> Drop for SlotHandle<'_, T> {
    fn drop(&mut self) {
        if !self.published {
            debug!(
                sequence = self.sequence,
                "Slot handle dropped before publish - publishing as written"
            );
            self.mark_published();
        }
    }
}

/// The single consumer of an [`OrderedChannel`]. Not `Clone`.
pub struct ChannelReceiver<T: SlotData> {
    channel: Arc<OrderedChannel<T>>,
}

impl<T: SlotData> ChannelReceiver<T> {
    /// Wait for the next published slot, in claim order.
    ///
    /// Returns `None` once the channel is closed and every slot claimed before
    /// the close has been drained.
    pub fn drain(&mut self) -> Option<DrainedSlot<'_, T>> {
        let channel: &OrderedChannel<T> = &self.channel;
        let sequence = channel.consume_cursor.load(Ordering::Acquire);
        let slot = channel.slot(sequence);

        channel.available.wait();
        let mut spins = 0u32;
        loop {
            if slot.is_published(sequence) {
                return Some(DrainedSlot {
                    channel,
                    sequence,
                    value: slot.value.lock(),
                });
            }
            if channel.is_closed() && channel.claim_cursor.load(Ordering::SeqCst) == sequence {
                return None;
            }
            // Claimed by a producer that has not published yet
            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// The producer side this receiver drains.
    #[must_use]
    pub fn channel(&self) -> &Arc<OrderedChannel<T>> {
        &self.channel
    }
}

/// A slot being consumed. Clears the slot and releases its capacity on drop.
pub struct DrainedSlot<'a, T: SlotData> {
    channel: &'a OrderedChannel<T>,
    sequence: u64,
    value: MutexGuard<'a, T>,
}

impl<T: SlotData> DrainedSlot<'_, T> {
    /// Position of this slot in the channel's total order.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl<T: SlotData> Deref for DrainedSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: SlotData> DerefMut for DrainedSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: SlotData> Drop for DrainedSlot<'_, T> {
    fn drop(&mut self) {
        self.value.clear();
        self.channel
            .consume_cursor
            .store(self.sequence + 1, Ordering::Release);
        self.channel.free.post();
    }
}
