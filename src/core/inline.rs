//! Fixed-size storage for a type-erased `FnOnce`

use crate::core::job::Work;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ptr;

/// Bytes of closure state [`InlineWork`] stores without allocating
pub const INLINE_CAPACITY: usize = 64;

const WORDS: usize = INLINE_CAPACITY / mem::size_of::<usize>();

type Storage = [MaybeUninit<usize>; WORDS];

struct Thunk {
    call: unsafe fn(*mut u8),
    drop: unsafe fn(*mut u8),
}

/// A [`Work`] body holding at most one `FnOnce` at a time.
///
/// Closures of up to [`INLINE_CAPACITY`] bytes, aligned no stricter than
/// `usize`, are stored in place; larger ones are boxed. A persistent job
/// reloaded through [`Job::with_work`](crate::core::Job::with_work) with
/// small closures never touches the heap.
///
/// Each loaded closure runs at most once; running an empty body does
/// nothing.
///
/// ```rust
/// use quantum_jobs::core::{InlineWork, Work};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&hits);
///
/// let mut work = InlineWork::new();
/// work.set(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
/// work.on_run();
/// work.on_run();
/// assert_eq!(hits.load(Ordering::SeqCst), 1);
/// assert!(work.is_empty());
/// ```
pub struct InlineWork {
    storage: Storage,
    thunk: Option<Thunk>,
}

// Safety: `set` only accepts `Send` closures.
unsafe impl Send for InlineWork {}

impl InlineWork {
    /// An empty body
    pub const fn new() -> Self {
        Self {
            storage: [MaybeUninit::uninit(); WORDS],
            thunk: None,
        }
    }

    /// Loads `f`, dropping any closure that was loaded but never run.
    pub fn set<F>(&mut self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.clear();
        // Safety: the storage is empty and the stored type fits.
        unsafe {
            if fits::<F>() {
                self.write(f);
            } else {
                self.write(Box::new(f));
            }
        }
    }

    /// Whether a closure is waiting to run
    pub fn is_empty(&self) -> bool {
        self.thunk.is_none()
    }

    /// Drops the loaded closure without running it.
    pub fn clear(&mut self) {
        if let Some(thunk) = self.thunk.take() {
            // Safety: the thunk matches the value in storage, which is now
            // considered empty.
            unsafe { (thunk.drop)(self.storage.as_mut_ptr().cast()) }
        }
    }

    /// # Safety
    ///
    /// The storage must be empty and `F` must satisfy [`fits`].
    unsafe fn write<F: FnOnce()>(&mut self, f: F) {
        debug_assert!(fits::<F>());
        ptr::write(self.storage.as_mut_ptr().cast::<F>(), f);
        self.thunk = Some(Thunk {
            call: call::<F>,
            drop: drop_value::<F>,
        });
    }
}

fn fits<F>() -> bool {
    mem::size_of::<F>() <= mem::size_of::<Storage>()
        && mem::align_of::<F>() <= mem::align_of::<Storage>()
}

unsafe fn call<F: FnOnce()>(ptr: *mut u8) {
    let f = ptr::read(ptr.cast::<F>());
    f()
}

unsafe fn drop_value<F>(ptr: *mut u8) {
    ptr::drop_in_place(ptr.cast::<F>())
}

impl Work for InlineWork {
    fn on_run(&mut self) {
        if let Some(thunk) = self.thunk.take() {
            // Safety: the value is moved out before running, so a panic
            // cannot drop it twice.
            unsafe { (thunk.call)(self.storage.as_mut_ptr().cast()) }
        }
    }
}

impl Default for InlineWork {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InlineWork {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for InlineWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineWork")
            .field("loaded", &!self.is_empty())
            .finish()
    }
}
