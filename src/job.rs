//! The job record: one invocable unit of work.
//!
//! A [`Job`] is a single cache line: an inline parameter blob, a plain
//! function pointer, and an optional back-pointer to the graph node the job
//! belongs to. Function pointers are used instead of trait objects or boxed
//! closures to keep dispatch at the cost of one indirect call and parameter
//! passing allocation-free.

use core::marker::PhantomData;
use core::mem;
use core::ptr;

use crate::allocator::{JobAllocator, JobChunkAllocator};
use crate::config::{CACHELINE_SIZE, MIN_PARAM_BUFFER_SIZE};
use crate::graph::JobGraphNode;
use crate::queue::JobQueue;
use crate::spawner::JobSpawner;
use crate::stats::WorkerInfo;

/// Signature of every job function.
///
/// The parameter blob is type-erased; the function reads it back with
/// [`JobParams::read`] using the type it was spawned with.
pub type JobFunction = fn(JobParams<'_>, &mut JobSpawner<'_>, &mut WorkerInfo);

pub(crate) const JOB_CORE_SIZE: usize =
    mem::size_of::<Option<JobFunction>>() + mem::size_of::<*const JobGraphNode>();
const MIN_JOB_SIZE: usize = MIN_PARAM_BUFFER_SIZE + JOB_CORE_SIZE;
pub(crate) const JOB_SIZE: usize = MIN_JOB_SIZE.div_ceil(CACHELINE_SIZE) * CACHELINE_SIZE;

/// Size of the inline parameter buffer: whatever is left of the job's cache
/// line(s) after the function pointer and the node back-pointer.
pub const PARAM_BUFFER_SIZE: usize = JOB_SIZE - JOB_CORE_SIZE;

/// A unit of work: function pointer, inline parameter blob, owning node.
///
/// Jobs are allocated from a worker's allocator and reclaimed only by the bulk
/// allocator reset between runs; they are invoked exactly once per run.
#[repr(C, align(64))]
pub struct Job {
    param_buffer: [u8; PARAM_BUFFER_SIZE],
    function: Option<JobFunction>,
    node: *const JobGraphNode,
}

// `param_buffer` has to be the first member so that any parameter data is
// aligned to the job itself.
const _: () = assert!(mem::offset_of!(Job, param_buffer) == 0);
const _: () = assert!(mem::size_of::<Job>() == JOB_SIZE);
const _: () = assert!(mem::align_of::<Job>() == CACHELINE_SIZE);

impl Job {
    pub(crate) fn empty() -> Self {
        Self {
            param_buffer: [0; PARAM_BUFFER_SIZE],
            function: None,
            node: ptr::null(),
        }
    }

    pub(crate) fn set_function(&mut self, function: JobFunction) {
        self.function = Some(function);
    }

    pub(crate) fn set_node(&mut self, node: *const JobGraphNode) {
        self.node = node;
    }

    #[cfg(test)]
    pub(crate) fn node(&self) -> *const JobGraphNode {
        self.node
    }

    /// Copies a parameter value into the inline buffer.
    ///
    /// `P: Copy` is the trivial-copy requirement: the bytes are duplicated
    /// with a raw copy and no destructor will ever run for them. Data that
    /// does not fit the buffer needs to be allocated elsewhere and pointed to
    /// from `P`.
    pub(crate) fn write_params<P: Copy + 'static>(&mut self, params: &P) {
        const {
            assert!(
                mem::size_of::<P>() <= PARAM_BUFFER_SIZE,
                "params have to fit into the job's inline parameter buffer"
            )
        };
        // SAFETY: the size is checked above and the regions cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(
                (params as *const P).cast::<u8>(),
                self.param_buffer.as_mut_ptr(),
                mem::size_of::<P>(),
            );
        }
    }

    /// Invokes the job's function, then notifies the owning node (if any) that
    /// one of its jobs has completed.
    ///
    /// # Safety
    ///
    /// The job must have been fully initialized (function set, params
    /// written), and any node it points to must stay alive for the duration of
    /// the call. Each job may be run at most once per scheduler run.
    pub(crate) unsafe fn run(
        &self,
        allocator: &mut JobAllocator,
        chunk_allocator: &JobChunkAllocator,
        queue: &JobQueue,
        worker_info: &mut WorkerInfo,
    ) {
        let function = self.function.expect("job has no function");
        let mut spawner = JobSpawner::new(allocator, chunk_allocator, queue, self.node);
        function(JobParams::new(self.param_buffer.as_ptr()), &mut spawner, worker_info);
        // SAFETY: the caller guarantees the node outlives the run.
        if let Some(node) = unsafe { self.node.as_ref() } {
            node.job_completed(queue);
        }
    }
}

/// Borrowed view of a job's type-erased parameter blob.
#[derive(Clone, Copy)]
pub struct JobParams<'a> {
    buffer: *const u8,
    _job: PhantomData<&'a Job>,
}

impl<'a> JobParams<'a> {
    pub(crate) fn new(buffer: *const u8) -> Self {
        Self {
            buffer,
            _job: PhantomData,
        }
    }

    /// Reads the parameter value back out of the blob.
    ///
    /// # Safety
    ///
    /// `P` must be the same type the job was spawned with.
    pub unsafe fn read<P: Copy + 'static>(&self) -> P {
        const {
            assert!(
                mem::size_of::<P>() <= PARAM_BUFFER_SIZE,
                "params have to fit into the job's inline parameter buffer"
            )
        };
        // SAFETY: the blob holds a valid `P`, per the caller's contract.
        unsafe { ptr::read_unaligned(self.buffer.cast::<P>()) }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn job_is_exactly_cache_lines() {
        assert_eq!(mem::size_of::<Job>() % CACHELINE_SIZE, 0);
        assert!(PARAM_BUFFER_SIZE >= MIN_PARAM_BUFFER_SIZE);
    }

    #[test]
    fn params_round_trip() {
        #[derive(Clone, Copy, PartialEq, Debug)]
        struct Params {
            first: u32,
            amount: u32,
            scale: f32,
        }

        let written = Params {
            first: 7,
            amount: 1024,
            scale: 0.5,
        };
        let mut job = Job::empty();
        job.write_params(&written);
        let read = unsafe { JobParams::new(job.param_buffer.as_ptr()).read::<Params>() };
        assert_eq!(read, written);
    }

    #[test]
    fn empty_job_has_no_node() {
        let job = Job::empty();
        assert!(job.node().is_null());
    }
}
