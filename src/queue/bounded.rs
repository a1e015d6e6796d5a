//! Bounded lock-free LIFO queue.

use crate::alloc::{reserve_slots, IndexStack, Links};
use crate::core::Result;
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A bounded, lock-free LIFO queue.
///
/// Built on the same free-list primitive as the pools: one index stack holds
/// empty slots, another holds filled slots, and both thread the same link
/// table. `push` moves an index from the empty stack to the filled stack,
/// `pop` moves it back. Neither operation blocks or allocates.
///
/// The most recently pushed value is popped first.
///
/// # Example
///
/// ```rust
/// use quantum_jobs::queue::BoundedStack;
///
/// let stack = BoundedStack::with_capacity(4).unwrap();
/// stack.push(44).unwrap();
/// stack.push(45).unwrap();
/// assert_eq!(stack.pop(), Some(45));
/// assert_eq!(stack.pop(), Some(44));
/// assert_eq!(stack.pop(), None);
/// ```
pub struct BoundedStack<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    links: Links,
    empty: IndexStack,
    filled: IndexStack,
    len: CachePadded<AtomicUsize>,
}

// Safety: a slot index is owned by exactly one of: the empty stack, the filled
// stack, or the single thread that detached it.
unsafe impl<T: Send> Send for BoundedStack<T> {}
unsafe impl<T: Send> Sync for BoundedStack<T> {}

impl<T> BoundedStack<T> {
    /// Creates a stack holding at most `capacity` values.
    ///
    /// # Errors
    ///
    /// - `QuantumError::InvalidConfig` - capacity is 0 or exceeds the index space
    /// - `QuantumError::OutOfMemory` - backing storage could not be reserved
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut slots = reserve_slots(capacity)?;
        slots.extend((0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())));
        Ok(Self {
            slots: slots.into_boxed_slice(),
            links: Links::chained(capacity)?,
            empty: IndexStack::full(),
            filled: IndexStack::empty(),
            len: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    /// Pushes `value`, returning it back if the stack is full.
    pub fn push(&self, value: T) -> std::result::Result<(), T> {
        let Some(index) = self.empty.pop(&self.links) else {
            return Err(value);
        };
        // Safety: the index was detached from the empty stack; we own the slot.
        unsafe { (*self.slots[index].get()).write(value) };
        // Counted before publication so `len` never undercounts a poppable value.
        self.len.fetch_add(1, Ordering::SeqCst);
        self.filled.push(&self.links, index);
        Ok(())
    }

    /// Pops the most recently pushed value, or `None` if empty.
    pub fn pop(&self) -> Option<T> {
        let index = self.filled.pop(&self.links)?;
        // Safety: the index was detached from the filled stack; the slot holds
        // a value written before it was published.
        let value = unsafe { (*self.slots[index].get()).assume_init_read() };
        self.len.fetch_sub(1, Ordering::SeqCst);
        self.empty.push(&self.links, index);
        Some(value)
    }

    /// Number of values in the stack (approximate under concurrent use)
    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    /// Whether the stack holds no value
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of values
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Drop for BoundedStack<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> fmt::Debug for BoundedStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedStack")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
