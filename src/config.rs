//! Compile-time configuration knobs.
//!
//! These are constants rather than runtime options: the scheduler is sized for
//! its workload once, at build time, and the hot paths rely on the values
//! being known to the optimizer.

/// Maximum number of jobs queued in one [`JobQueue`](crate::queue::JobQueue)
/// at any given moment. Power-of-two values perform slightly better because of
/// the ring-buffer index arithmetic.
#[cfg(not(feature = "loom"))]
pub const QUEUE_CAPACITY: usize = 4096;

/// Tiny queue capacity under loom so the model checker's state space stays
/// tractable.
#[cfg(feature = "loom")]
pub const QUEUE_CAPACITY: usize = 4;

/// Number of jobs in one inter-thread allocation. In other words, how many
/// jobs can be allocated thread-locally between each chunk handoff from the
/// shared chunk allocator.
pub const ALLOCATION_CHUNK_SIZE: usize = 2048;

/// Minimum required size of a job's inline parameter buffer. The actual size
/// is computed in [`crate::job`] so that the total size of a job is a multiple
/// of [`CACHELINE_SIZE`].
pub const MIN_PARAM_BUFFER_SIZE: usize = 32;

/// Used by the queue and in determining the size of a job, to prevent false
/// sharing. Adjust for the target platform if needed; must stay in sync with
/// the `#[repr(align)]` literal on [`Job`](crate::job::Job).
pub const CACHELINE_SIZE: usize = 64;
