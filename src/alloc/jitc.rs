//! Just-in-time-construction pool.

use super::{reserve_slots, sealed, IndexStack, Links, SlotBox, SlotRef, Slots};
use crate::core::Result;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A slot borrowed from a [`JitcPool`]
pub type JitcRef<'a, T> = SlotRef<'a, JitcPool<T>>;

/// A slot owned through an `Arc<JitcPool>`
pub type JitcBox<T> = SlotBox<JitcPool<T>>;

/// Lock-free pool that constructs values on allocation and drops them on
/// release.
///
/// A free slot holds no value, only its free-list link; a live slot holds a
/// value and is never read as a link.
///
/// When the pool is dropped, slots that are not on the free list are
/// outstanding (their guard was leaked with `mem::forget`) and their values
/// are dropped then.
pub struct JitcPool<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    links: Links,
    free: IndexStack,
    available: AtomicUsize,
}

// Safety: see `Pool`; a live slot is owned by exactly one guard.
unsafe impl<T: Send> Send for JitcPool<T> {}
unsafe impl<T: Send> Sync for JitcPool<T> {}

impl<T> JitcPool<T> {
    /// Reserves raw storage for `capacity` values.
    ///
    /// # Errors
    ///
    /// - `QuantumError::InvalidConfig` - capacity is 0 or exceeds the index space
    /// - `QuantumError::OutOfMemory` - backing storage could not be reserved
    pub fn init(capacity: usize) -> Result<Self> {
        let mut slots = reserve_slots(capacity)?;
        slots.extend((0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())));
        Ok(Self {
            slots: slots.into_boxed_slice(),
            links: Links::chained(capacity)?,
            free: IndexStack::full(),
            available: AtomicUsize::new(capacity),
        })
    }

    /// Constructs `value` in a free slot.
    ///
    /// Returns the value back when the pool is exhausted.
    pub fn alloc(&self, value: T) -> std::result::Result<JitcRef<'_, T>, T> {
        match self.construct(value) {
            Ok(index) => Ok(SlotRef::new(self, index)),
            Err(value) => Err(value),
        }
    }

    /// Like [`alloc`](Self::alloc), returning a handle that keeps the pool alive.
    pub fn alloc_arc(self: &Arc<Self>, value: T) -> std::result::Result<JitcBox<T>, T> {
        match self.construct(value) {
            Ok(index) => Ok(SlotBox::new(Arc::clone(self), index)),
            Err(value) => Err(value),
        }
    }

    /// Drops the value held by `slot` and returns the slot to the free list.
    pub fn push(&self, slot: JitcRef<'_, T>) {
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
        let addr = ptr as usize;
        if addr < start || addr >= range.end as usize {
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

    fn construct(&self, value: T) -> std::result::Result<usize, T> {
        let Some(index) = self.free.pop(&self.links) else {
            return Err(value);
        };
        self.available.fetch_sub(1, Ordering::Relaxed);
        // Safety: the index was just detached from the free list; we own it.
        unsafe { (*self.slots[index].get()).write(value) };
        Ok(index)
    }
}

impl<T: Default> JitcPool<T> {
    /// Constructs a default value in a free slot, or `None` if exhausted.
    pub fn pop(&self) -> Option<JitcRef<'_, T>> {
        self.alloc(T::default()).ok()
    }
}

impl<T> sealed::Sealed for JitcPool<T> {}

impl<T> Slots for JitcPool<T> {
    type Item = T;

    fn slot_ptr(&self, index: usize) -> *mut T {
        self.slots[index].get().cast::<T>()
    }

    unsafe fn release(&self, index: usize) {
        std::ptr::drop_in_place(self.slot_ptr(index));
        self.available.fetch_add(1, Ordering::Relaxed);
        self.free.push(&self.links, index);
    }
}

impl<T> Drop for JitcPool<T> {
    fn drop(&mut self) {
        if !std::mem::needs_drop::<T>() {
            return;
        }
        let mut reachable = vec![false; self.slots.len()];
        self.free.mark_reachable(&self.links, &mut reachable);

        let mut leaked = 0usize;
        for (index, free) in reachable.iter().enumerate() {
            if !free {
                // Safety: not on the free list, so the slot holds a live value
                // whose guard was forgotten.
                unsafe { std::ptr::drop_in_place(self.slot_ptr(index)) };
                leaked += 1;
            }
        }
        if leaked > 0 {
            log::warn!("JitcPool dropped with {} outstanding slots; values destructed", leaked);
        }
    }
}

impl<T> fmt::Debug for JitcPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitcPool")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}
