use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Contents of a reusable channel slot.
///
/// Slots are created once with `Default` and recycled forever. `clear` runs
/// after every consumption and must drop everything a later claimant could
/// otherwise observe.
pub trait SlotData: Default + Send + 'static {
    /// Reset to the empty state.
    fn clear(&mut self);

    /// `true` when nothing has been written since the last clear.
    fn is_empty(&self) -> bool;
}

/// One arena entry.
///
/// The mutex is never contended under the claim/publish protocol: a slot is
/// owned by its claimant until published and by the consumer until released.
pub(crate) struct Slot<T> {
    /// `sequence + 1` of the last publish into this slot, `0` if never published
    published: AtomicU64,
    pub(crate) value: Mutex<T>,
}

impl<T: SlotData> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            published: AtomicU64::new(0),
            value: Mutex::new(T::default()),
        }
    }

    pub(crate) fn mark_published(&self, sequence: u64) {
        self.published.store(sequence + 1, Ordering::Release);
    }

    pub(crate) fn is_published(&self, sequence: u64) -> bool {
        self.published.load(Ordering::Acquire) == sequence + 1
    }
}
