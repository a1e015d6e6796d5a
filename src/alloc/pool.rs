//! Fixed-capacity pool of persistent values.

use super::{reserve_slots, sealed, IndexStack, Links, SlotBox, SlotRef, Slots};
use crate::core::Result;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A slot borrowed from a [`Pool`]
pub type PoolRef<'a, T> = SlotRef<'a, Pool<T>>;

/// A slot owned through an `Arc<Pool>`
pub type PoolBox<T> = SlotBox<Pool<T>>;

/// Lock-free pool of `capacity` values.
///
/// Every value is constructed once by [`Pool::init`] and lives as long as the
/// pool; `pop` and `push` only move ownership of a slot between the free list
/// and the caller. A value therefore keeps whatever state the previous owner
/// left in it.
pub struct Pool<T> {
    slots: Box<[UnsafeCell<T>]>,
    links: Links,
    free: IndexStack,
    available: AtomicUsize,
}

// Safety: a slot is reachable either from the free list or from exactly one
// guard, so values are only ever accessed by one thread at a time.
unsafe impl<T: Send> Send for Pool<T> {}
unsafe impl<T: Send> Sync for Pool<T> {}

impl<T: Default> Pool<T> {
    /// Reserves `capacity` slots and links them into the free list.
    ///
    /// # Errors
    ///
    /// - `QuantumError::InvalidConfig` - capacity is 0 or exceeds the index space
    /// - `QuantumError::OutOfMemory` - backing storage could not be reserved
    pub fn init(capacity: usize) -> Result<Self> {
        Self::init_with(capacity, |_| T::default())
    }
}

impl<T> Pool<T> {
    /// Like [`init`](Pool::init), building the value of slot `i` with `make(i)`.
    pub fn init_with(capacity: usize, make: impl FnMut(usize) -> T) -> Result<Self> {
        let mut slots = reserve_slots(capacity)?;
        slots.extend((0..capacity).map(make).map(UnsafeCell::new));
        Ok(Self::from_slots(slots.into_boxed_slice(), Links::chained(capacity)?))
    }

    fn from_slots(slots: Box<[UnsafeCell<T>]>, links: Links) -> Self {
        let capacity = slots.len();
        Self {
            slots,
            links,
            free: IndexStack::full(),
            available: AtomicUsize::new(capacity),
        }
    }

    /// Takes a slot from the free list, or `None` if the pool is exhausted.
    pub fn pop(&self) -> Option<PoolRef<'_, T>> {
        self.take_index().map(|index| SlotRef::new(self, index))
    }

    /// Like [`pop`](Self::pop), but the returned handle keeps the pool alive
    /// and can outlive the borrow.
    pub fn pop_arc(self: &Arc<Self>) -> Option<PoolBox<T>> {
        self.take_index()
            .map(|index| SlotBox::new(Arc::clone(self), index))
    }

    /// Returns a slot to the free list.
    ///
    /// Equivalent to dropping the guard; the slot must come from this pool.
    pub fn push(&self, slot: PoolRef<'_, T>) {
        debug_assert!(
            std::ptr::eq(slot.pool(), self),
            "slot {} pushed to a pool that does not own it",
            slot.index()
        );
        drop(slot);
    }

    /// Whether `ptr` points at a slot of this pool's backing storage.
    pub fn belongs(&self, ptr: *const T) -> bool {
        let range = self.slots.as_ptr_range();
        let start = range.start as usize;
        let end = range.end as usize;
        let addr = ptr as usize;
        if addr < start || addr >= end {
            return false;
        }
        let size = std::mem::size_of::<T>();
        size == 0 || (addr - start) % size == 0
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of free slots (approximate under concurrent use)
    pub fn available(&self) -> usize {
        self.available.load(Ordering::Relaxed)
    }

    fn take_index(&self) -> Option<usize> {
        let index = self.free.pop(&self.links)?;
        self.available.fetch_sub(1, Ordering::Relaxed);
        Some(index)
    }
}

impl<T> sealed::Sealed for Pool<T> {}

impl<T> Slots for Pool<T> {
    type Item = T;

    fn slot_ptr(&self, index: usize) -> *mut T {
        self.slots[index].get()
    }

    unsafe fn release(&self, index: usize) {
        self.available.fetch_add(1, Ordering::Relaxed);
        self.free.push(&self.links, index);
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}
