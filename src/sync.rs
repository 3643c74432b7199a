//! Synchronization primitives, swappable for loom's model-checked versions.
//!
//! The lock-free modules (`queue`, `graph`, `allocator`) pull their atomics
//! from here so that the `loom` feature can model check them. The scheduler's
//! own state machinery uses `std` directly; it is validated by integration
//! tests, not by loom.

#[cfg(not(feature = "loom"))]
pub(crate) use core::sync::atomic::{fence, AtomicIsize, AtomicPtr, AtomicU32, Ordering};

#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{fence, AtomicIsize, AtomicPtr, AtomicU32, Ordering};

use core::cell::UnsafeCell;

/// An `UnsafeCell` that is `Sync` for `Send` contents.
///
/// Used for state that is mutated by exactly one thread at a time, where the
/// exclusivity is guaranteed by scheduling (barriers and the scheduler state
/// machine) rather than by a lock. Every access site documents which phase
/// makes it exclusive.
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

unsafe impl<T: Send> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    pub(crate) fn get(&self) -> *mut T {
        self.0.get()
    }
}
