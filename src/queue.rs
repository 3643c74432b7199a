//! Fixed-capacity lock-free work-stealing deque.
//!
//! Based on the Chase-Lev deque as corrected for weak memory models in
//! "Correct and Efficient Work-Stealing for Weak Memory Models" by Lê, Pop,
//! Cohen and Zappa Nardelli. The owning worker pushes and pops at the bottom
//! (LIFO), thieves steal from the top (FIFO). No operation ever blocks or
//! waits on another worker.
//!
//! The buffer does not grow: capacity is the compile-time
//! [`QUEUE_CAPACITY`](crate::config::QUEUE_CAPACITY) knob, sized so the queue
//! never fills under normal use.

use core::ptr::{self, NonNull};

use crossbeam_utils::CachePadded;

use crate::config::QUEUE_CAPACITY;
use crate::job::Job;
use crate::sync::{fence, AtomicIsize, AtomicPtr, Ordering};

const CAPACITY: isize = QUEUE_CAPACITY as isize;

/// Bounded work-stealing deque of job pointers.
///
/// Exactly one worker owns the queue for [`push`](Self::push) and
/// [`pop`](Self::pop); any worker may [`steal`](Self::steal). The returned
/// pointers stay valid until the allocators are reset at the end of the run.
///
/// Invariant: at any observed instant, `0 <= bottom - top <= capacity`. `top`
/// never decreases; `bottom` is adjusted only by the owner.
pub struct JobQueue {
    ring_buffer: [AtomicPtr<Job>; QUEUE_CAPACITY],
    top: CachePadded<AtomicIsize>,
    bottom: CachePadded<AtomicIsize>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            ring_buffer: core::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            top: CachePadded::new(AtomicIsize::new(0)),
            bottom: CachePadded::new(AtomicIsize::new(0)),
        }
    }

    /// Owner-only. Publishes a job at the bottom; returns `false` when the
    /// queue is full. A full queue is a sizing bug at this scale, so callers
    /// assert the result.
    pub fn push(&self, job: NonNull<Job>) -> bool {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);
        if bottom - top == CAPACITY {
            return false;
        }
        self.ring_buffer[bottom as usize % QUEUE_CAPACITY].store(job.as_ptr(), Ordering::Relaxed);
        // Publish the slot before the new bottom becomes visible to thieves.
        fence(Ordering::Release);
        self.bottom.store(bottom + 1, Ordering::Relaxed);
        true
    }

    /// Owner-only. Takes the most recently pushed job, racing thieves for the
    /// last element.
    pub fn pop(&self) -> Option<NonNull<Job>> {
        let bottom = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(bottom, Ordering::Relaxed);
        // Order the `bottom` store before the `top` load: either this load
        // sees a steal in flight, or the thief sees the decremented `bottom`.
        fence(Ordering::SeqCst);
        let top = self.top.load(Ordering::Relaxed);
        if bottom < top {
            // Empty; restore bottom.
            self.bottom.store(bottom + 1, Ordering::Relaxed);
            return None;
        }
        let job = self.ring_buffer[bottom as usize % QUEUE_CAPACITY].load(Ordering::Relaxed);
        if bottom > top {
            return NonNull::new(job);
        }
        // Last element: win it against thieves by advancing `top`. Whether or
        // not the race is won, `bottom` normalizes to one past the slot.
        let won = self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.bottom.store(bottom + 1, Ordering::Relaxed);
        if won {
            NonNull::new(job)
        } else {
            None
        }
    }

    /// Steals the oldest job from the top. Any worker may call this; failure
    /// means the queue looked empty or another thief won the race.
    pub fn steal(&self) -> Option<NonNull<Job>> {
        let top = self.top.load(Ordering::Acquire);
        // Order the `top` load before the `bottom` load, mirroring `pop`.
        fence(Ordering::SeqCst);
        let bottom = self.bottom.load(Ordering::Acquire);
        if top >= bottom {
            return None;
        }
        let job = self.ring_buffer[top as usize % QUEUE_CAPACITY].load(Ordering::Relaxed);
        if self
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        NonNull::new(job)
    }

    /// Bulk reset of both indices. Only valid between runs, when no thief can
    /// be active (the scheduler's exit barrier guarantees this).
    pub fn reset(&self) {
        self.bottom.store(0, Ordering::SeqCst);
        self.top.store(0, Ordering::SeqCst);
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
