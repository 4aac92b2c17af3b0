//! # Published Cells
//!
//! A slot whose value is written on rare administrative paths (swapon,
//! swapoff, backend registration) and read on every data operation. Readers
//! do a single `Acquire` load and borrow the value; they never take a lock
//! or touch a reference count.
//!
//! ```text
//!   install / replace / retire          get()
//!            │                            │
//!            ▼                            ▼
//!   ┌──────────────────┐   Acquire  ┌──────────┐
//!   │ current: AtomicPtr│──────────▶│   &T     │  lives as long as &self
//!   └────────┬─────────┘            └──────────┘
//!            │ swapped out
//!            ▼
//!   ┌──────────────────┐
//!   │ retired: Mutex<Vec>│  freed by purge(&mut self) or drop
//!   └──────────────────┘
//! ```
//!
//! A value that leaves the cell is retired rather than freed, because a
//! reader may still hold a borrow of it. Retired values are reclaimed only
//! through `&mut self`, which proves no borrow is left.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, Ordering};

use spin::Mutex;

/// Lock-free readable slot holding at most one `T`
pub struct Published<T> {
    current: AtomicPtr<T>,
    retired: Mutex<Vec<NonNull<T>>>,
    _owns: PhantomData<Box<T>>,
}

// SAFETY: the cell owns its values like a `Box<T>` and hands out only
// shared borrows, so it is as thread-safe as `T` is `Send + Sync`.
unsafe impl<T: Send + Sync> Send for Published<T> {}
// SAFETY: see above.
unsafe impl<T: Send + Sync> Sync for Published<T> {}

impl<T> Published<T> {
    /// Create an empty cell
    pub const fn new() -> Self {
        Self {
            current: AtomicPtr::new(ptr::null_mut()),
            retired: Mutex::new(Vec::new()),
            _owns: PhantomData,
        }
    }

    /// Current value
    #[inline]
    pub fn get(&self) -> Option<&T> {
        let ptr = self.current.load(Ordering::Acquire);
        // SAFETY: non-null pointers in `current` come from `Box::into_raw`
        // and are freed only through `&mut self`, so they outlive `&self`.
        unsafe { ptr.as_ref() }
    }

    /// Is a value installed?
    #[inline]
    pub fn is_set(&self) -> bool {
        !self.current.load(Ordering::Acquire).is_null()
    }

    /// Install `value` if the cell is empty, handing it back otherwise
    pub fn try_install(&self, value: T) -> Result<&T, T> {
        let new = Box::into_raw(Box::new(value));
        match self.current.compare_exchange(
            ptr::null_mut(),
            new,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            // SAFETY: `new` was just published and is freed only through
            // `&mut self`.
            Ok(_) => Ok(unsafe { &*new }),
            // SAFETY: the exchange failed, so `new` was never shared.
            Err(_) => Err(*unsafe { Box::from_raw(new) }),
        }
    }

    /// Install `value`, retiring and returning the value it replaces
    pub fn replace(&self, value: T) -> Option<&T> {
        let new = Box::into_raw(Box::new(value));
        let old = self.current.swap(new, Ordering::AcqRel);
        self.retire_ptr(old)
    }

    /// Empty the cell, retiring and returning the value it held
    pub fn retire(&self) -> Option<&T> {
        let old = self.current.swap(ptr::null_mut(), Ordering::AcqRel);
        self.retire_ptr(old)
    }

    fn retire_ptr(&self, old: *mut T) -> Option<&T> {
        let old = NonNull::new(old)?;
        self.retired.lock().push(old);
        // SAFETY: retired values are freed only through `&mut self`.
        Some(unsafe { old.as_ref() })
    }

    /// Number of retired values not yet reclaimed
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    /// Free every retired value
    pub fn purge(&mut self) {
        for old in self.retired.get_mut().drain(..) {
            // SAFETY: exclusive access means no borrow of `old` is alive,
            // and it came from `Box::into_raw`.
            drop(unsafe { Box::from_raw(old.as_ptr()) });
        }
    }
}

impl<T> Default for Published<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Published<T> {
    fn drop(&mut self) {
        self.purge();
        let current = *self.current.get_mut();
        if !current.is_null() {
            // SAFETY: exclusive access, and `current` came from `Box::into_raw`.
            drop(unsafe { Box::from_raw(current) });
        }
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for Published<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Published")
            .field("current", &self.get())
            .field("retired", &self.retired_count())
            .finish()
    }
}
