//! Lock-free, fixed-capacity allocators.
//!
//! All allocators in this module reserve their storage once, at `init`, and
//! never touch the heap afterwards. Free slots are tracked by a lock-free
//! free list; popping from an empty pool is a normal `None`, never a fault.
//!
//! - [`Pool`]: values are constructed once at `init` and keep their state
//!   across pop/push cycles.
//! - [`JitcPool`]: "just-in-time construction" - values are constructed on
//!   allocation and dropped when the slot is returned.
//!
//! Slots are handed out as guards. [`SlotRef`] borrows the pool,
//! [`SlotBox`] keeps the pool alive through an `Arc` and can be moved to
//! other threads freely. Dropping a guard returns its slot.
//!
//! # Ordering
//!
//! The free list is a stack: a slot returned last is handed out first.
//! Callers must not rely on any particular order.
//!
//! # Example
//!
//! ```rust
//! use quantum_jobs::alloc::Pool;
//!
//! let pool: Pool<u64> = Pool::init(2).unwrap();
//! let mut a = pool.pop().unwrap();
//! *a = 7;
//! let _b = pool.pop().unwrap();
//! assert!(pool.pop().is_none());
//!
//! pool.push(a);
//! assert_eq!(pool.available(), 1);
//! ```

mod free_list;
mod jitc;
mod pool;

pub(crate) use free_list::{reserve_slots, IndexStack, Links};
pub use jitc::{JitcBox, JitcPool, JitcRef};
pub use pool::{Pool, PoolBox, PoolRef};

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

mod sealed {
    pub trait Sealed {}
}

/// Slot storage shared by the pool flavours.
///
/// Sealed: implemented only by [`Pool`] and [`JitcPool`].
pub trait Slots: sealed::Sealed {
    /// The value type stored in each slot
    type Item;

    #[doc(hidden)]
    fn slot_ptr(&self, index: usize) -> *mut Self::Item;

    /// # Safety
    ///
    /// `index` must be a live slot owned by the caller; it must not be used
    /// after this call.
    #[doc(hidden)]
    unsafe fn release(&self, index: usize);
}

/// A slot borrowed from a pool. Returns the slot when dropped.
pub struct SlotRef<'a, P: Slots> {
    pool: &'a P,
    index: usize,
    _marker: PhantomData<*mut P::Item>,
}

impl<'a, P: Slots> SlotRef<'a, P> {
    pub(crate) fn new(pool: &'a P, index: usize) -> Self {
        Self {
            pool,
            index,
            _marker: PhantomData,
        }
    }

    /// Index of the slot inside its pool
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn pool(&self) -> &'a P {
        self.pool
    }
}

impl<P: Slots> Deref for SlotRef<'_, P> {
    type Target = P::Item;

    fn deref(&self) -> &P::Item {
        // Safety: the guard owns the slot exclusively until dropped.
        unsafe { &*self.pool.slot_ptr(self.index) }
    }
}

impl<P: Slots> DerefMut for SlotRef<'_, P> {
    fn deref_mut(&mut self) -> &mut P::Item {
        // Safety: the guard owns the slot exclusively until dropped.
        unsafe { &mut *self.pool.slot_ptr(self.index) }
    }
}

impl<P: Slots> Drop for SlotRef<'_, P> {
    fn drop(&mut self) {
        // Safety: the slot was handed to this guard and is released once.
        unsafe { self.pool.release(self.index) }
    }
}

impl<P: Slots> fmt::Debug for SlotRef<'_, P>
where
    P::Item: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRef")
            .field("index", &self.index)
            .field("value", &**self)
            .finish()
    }
}

// Safety: the guard is the unique owner of its slot.
unsafe impl<P: Slots + Sync> Send for SlotRef<'_, P> where P::Item: Send {}
unsafe impl<P: Slots + Sync> Sync for SlotRef<'_, P> where P::Item: Sync {}

/// A slot owned through an `Arc` to its pool. Returns the slot when dropped.
pub struct SlotBox<P: Slots> {
    pool: Arc<P>,
    index: usize,
    _marker: PhantomData<*mut P::Item>,
}

impl<P: Slots> SlotBox<P> {
    pub(crate) fn new(pool: Arc<P>, index: usize) -> Self {
        Self {
            pool,
            index,
            _marker: PhantomData,
        }
    }

    /// Index of the slot inside its pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// The pool this slot belongs to
    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }
}

impl<P: Slots> Deref for SlotBox<P> {
    type Target = P::Item;

    fn deref(&self) -> &P::Item {
        // Safety: the box owns the slot exclusively until dropped.
        unsafe { &*self.pool.slot_ptr(self.index) }
    }
}

impl<P: Slots> DerefMut for SlotBox<P> {
    fn deref_mut(&mut self) -> &mut P::Item {
        // Safety: the box owns the slot exclusively until dropped.
        unsafe { &mut *self.pool.slot_ptr(self.index) }
    }
}

impl<P: Slots> Drop for SlotBox<P> {
    fn drop(&mut self) {
        // Safety: the slot was handed to this box and is released once.
        unsafe { self.pool.release(self.index) }
    }
}

impl<P: Slots> fmt::Debug for SlotBox<P>
where
    P::Item: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotBox")
            .field("index", &self.index)
            .field("value", &**self)
            .finish()
    }
}

// Safety: the box is the unique owner of its slot.
unsafe impl<P: Slots + Send + Sync> Send for SlotBox<P> where P::Item: Send {}
unsafe impl<P: Slots + Send + Sync> Sync for SlotBox<P> where P::Item: Sync {}
