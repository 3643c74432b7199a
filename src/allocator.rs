//! Linear job allocators.
//!
//! All job storage is pre-allocated in fixed-size chunks. A single shared
//! [`JobChunkAllocator`] hands chunks to per-worker [`JobAllocator`]s with one
//! atomic fetch-add; each worker then carves its chunk into job slots with a
//! plain cursor bump. Amortized, the hot path pays one atomic operation per
//! `ALLOCATION_CHUNK_SIZE` jobs.
//!
//! Nothing is freed individually: between runs the whole arrangement is reset
//! and every slot becomes reusable. Job payloads are `Copy`, so no destructors
//! are owed on reset.

use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};

use crate::config::ALLOCATION_CHUNK_SIZE;
use crate::job::Job;
use crate::sync::{AtomicU32, Ordering};

/// A fixed-size block of job slots, handed out to one worker at a time.
pub(crate) struct JobChunk {
    slots: [UnsafeCell<Job>; ALLOCATION_CHUNK_SIZE],
}

// SAFETY: a chunk is only ever written through by the single worker it was
// handed to; jobs become visible to other workers only after a queue push,
// whose release fence publishes the slot contents.
unsafe impl Send for JobChunk {}
unsafe impl Sync for JobChunk {}

impl JobChunk {
    fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| UnsafeCell::new(Job::empty())),
        }
    }

    fn slot(&self, index: u32) -> NonNull<Job> {
        // SAFETY: `UnsafeCell::get` never returns null.
        unsafe { NonNull::new_unchecked(self.slots[index as usize].get()) }
    }
}

/// Lock-free linear allocator of job chunks, shared by all workers.
pub(crate) struct JobChunkAllocator {
    chunks: Box<[JobChunk]>,
    next_index: AtomicU32,
}

impl JobChunkAllocator {
    pub(crate) fn new(chunk_amount: u32) -> Self {
        Self {
            chunks: (0..chunk_amount).map(|_| JobChunk::new()).collect(),
            next_index: AtomicU32::new(0),
        }
    }

    /// Hands out the next unused chunk, or `None` when every chunk is taken.
    /// Running out is a sizing bug; the caller asserts.
    pub(crate) fn allocate(&self) -> Option<&JobChunk> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        debug_assert!(index < u32::MAX);
        self.chunks.get(index as usize)
    }

    /// Makes every chunk available again. Only valid between runs, when no
    /// worker holds a chunk or a job pointer into one.
    pub(crate) fn reset(&self) {
        self.next_index.store(0, Ordering::SeqCst);
    }
}

/// Linear allocator of jobs. Each worker owns one; never share between
/// threads. When it runs out of slots it fetches a fresh chunk from the shared
/// chunk allocator.
pub(crate) struct JobAllocator {
    chunk: *const JobChunk,
    next_index: u32,
}

// SAFETY: the chunk pointer targets storage inside the scheduler-owned chunk
// allocator, which outlives every worker allocator; the allocator itself is
// used by one thread at a time.
unsafe impl Send for JobAllocator {}

impl JobAllocator {
    pub(crate) fn new() -> Self {
        Self {
            chunk: ptr::null(),
            next_index: 0,
        }
    }

    /// Returns a slot for one job, fetching a new chunk on the boundary.
    /// `None` means the chunk allocator is exhausted.
    pub(crate) fn allocate(&mut self, chunk_allocator: &JobChunkAllocator) -> Option<NonNull<Job>> {
        if self.chunk.is_null() {
            self.chunk = chunk_allocator.allocate()?;
            self.next_index = 0;
        }
        // SAFETY: `chunk` points into `chunk_allocator`'s storage, which is
        // live for as long as any worker allocator.
        let job = unsafe { (*self.chunk).slot(self.next_index) };
        self.next_index += 1;
        if self.next_index as usize == ALLOCATION_CHUNK_SIZE {
            self.chunk = ptr::null();
        }
        Some(job)
    }

    /// Forgets the current chunk. The storage itself is reclaimed by
    /// [`JobChunkAllocator::reset`].
    pub(crate) fn reset(&mut self) {
        self.chunk = ptr::null();
    }
}
