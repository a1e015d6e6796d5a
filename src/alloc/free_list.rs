//! Lock-free index free list.
//!
//! The free list is a Treiber stack of slot indices. Links live in a separate
//! [`Links`] table so that several stacks can thread the same indices (an
//! index sits in at most one stack at a time). The head packs a generation tag
//! next to the index; every successful CAS bumps the tag, so a head that was
//! popped and pushed back between our load and our CAS no longer compares
//! equal.

use crate::core::{QuantumError, Result};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Marks the end of a list.
pub(crate) const NIL: u32 = u32::MAX;

/// Largest capacity addressable by a 32-bit index with `NIL` reserved.
pub(crate) const MAX_CAPACITY: usize = (u32::MAX - 1) as usize;

#[inline]
fn pack(tag: u32, index: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

#[inline]
fn index_of(head: u64) -> u32 {
    head as u32
}

#[inline]
fn tag_of(head: u64) -> u32 {
    (head >> 32) as u32
}

/// Validates a requested capacity and reserves a vector for it.
///
/// Capacity problems are configuration errors; a failed reservation is
/// reported as [`QuantumError::OutOfMemory`].
pub(crate) fn reserve_slots<T>(capacity: usize) -> Result<Vec<T>> {
    if capacity == 0 {
        return Err(QuantumError::invalid_config(
            "capacity",
            "capacity must be greater than 0",
        ));
    }
    if capacity > MAX_CAPACITY {
        return Err(QuantumError::invalid_config(
            "capacity",
            format!("capacity must not exceed {}", MAX_CAPACITY),
        ));
    }
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(capacity)
        .map_err(|_| QuantumError::out_of_memory(capacity))?;
    Ok(slots)
}

/// Per-index `next` links shared by the stacks threading the same slots.
pub(crate) struct Links {
    next: Box<[AtomicU32]>,
}

impl Links {
    /// Allocates `capacity` links, each initially pointing to its successor.
    pub(crate) fn chained(capacity: usize) -> Result<Self> {
        let mut next = reserve_slots(capacity)?;
        for index in 1..capacity {
            next.push(AtomicU32::new(index as u32));
        }
        next.push(AtomicU32::new(NIL));
        Ok(Self {
            next: next.into_boxed_slice(),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.next.len()
    }
}

/// A Treiber stack of indices into a [`Links`] table.
pub(crate) struct IndexStack {
    head: CachePadded<AtomicU64>,
}

impl IndexStack {
    /// A stack holding no index.
    pub(crate) fn empty() -> Self {
        Self {
            head: CachePadded::new(AtomicU64::new(pack(0, NIL))),
        }
    }

    /// A stack holding every index of a freshly [`Links::chained`] table.
    pub(crate) fn full() -> Self {
        Self {
            head: CachePadded::new(AtomicU64::new(pack(0, 0))),
        }
    }

    /// Detaches the top index, or returns `None` when the stack is empty.
    ///
    /// Never blocks. The `Acquire` on success pairs with the `Release` of the
    /// push that published the index, so the caller observes every write made
    /// to the slot before it was pushed.
    pub(crate) fn pop(&self, links: &Links) -> Option<usize> {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let index = index_of(current);
            if index == NIL {
                return None;
            }
            // May be stale if another thread won the race; the tag makes our CAS fail then.
            let next = links.next[index as usize].load(Ordering::Relaxed);
            let new = pack(tag_of(current).wrapping_add(1), next);
            match self.head.compare_exchange_weak(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(index as usize),
                Err(actual) => current = actual,
            }
        }
    }

    /// Prepends `index` to the stack.
    ///
    /// The caller must own `index` exclusively (it was popped from a stack
    /// sharing `links`, or never handed out).
    pub(crate) fn push(&self, links: &Links, index: usize) {
        debug_assert!(index < links.capacity(), "index {} out of range", index);
        let mut current = self.head.load(Ordering::Relaxed);
        loop {
            links.next[index].store(index_of(current), Ordering::Relaxed);
            let new = pack(tag_of(current).wrapping_add(1), index as u32);
            match self.head.compare_exchange_weak(
                current,
                new,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Marks every index reachable from the head in `reachable`.
    ///
    /// Only meaningful while no other thread touches the stack, which the
    /// `&mut self` receiver guarantees. The walk is capped at the table size
    /// so a corrupted chain cannot loop forever.
    pub(crate) fn mark_reachable(&mut self, links: &Links, reachable: &mut [bool]) {
        let mut index = index_of(*self.head.get_mut());
        let mut steps = 0;
        while index != NIL && steps < links.capacity() {
            reachable[index as usize] = true;
            index = links.next[index as usize].load(Ordering::Relaxed);
            steps += 1;
        }
    }
}
