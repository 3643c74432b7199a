//! The capability handed to job functions for spawning new jobs.
//!
//! Spawning goes through the worker that is executing the current job: its
//! allocator provides the storage and its deque receives the new job, so the
//! depth-first expansion of recursively spawned work stays local until a
//! thief takes some of it.

use core::mem;
use core::ptr::NonNull;

use crate::allocator::{JobAllocator, JobChunkAllocator};
use crate::graph::JobGraphNode;
use crate::job::{JobFunction, PARAM_BUFFER_SIZE};
use crate::queue::JobQueue;

/// Passed to job functions to allow spawning new jobs with correct
/// bookkeeping: the right allocator, the right queue, and the dependency
/// counters of the node the current job belongs to.
///
/// The node handle is that of the currently executing root lineage: a sub-job
/// of a sub-job still carries the original node, so arbitrarily deep spawn
/// chains gate that node's successors correctly.
pub struct JobSpawner<'a> {
    allocator: &'a mut JobAllocator,
    chunk_allocator: &'a JobChunkAllocator,
    queue: &'a JobQueue,
    node: *const JobGraphNode,
}

impl<'a> JobSpawner<'a> {
    pub(crate) fn new(
        allocator: &'a mut JobAllocator,
        chunk_allocator: &'a JobChunkAllocator,
        queue: &'a JobQueue,
        node: *const JobGraphNode,
    ) -> Self {
        Self {
            allocator,
            chunk_allocator,
            queue,
            node,
        }
    }

    /// Spawns a new job onto the current worker's queue.
    ///
    /// With `is_sub_job == true` the job counts towards the current node: it
    /// will be completed before any node depending on this one starts.
    /// Otherwise the job is free: it is not part of the dependency graph, but
    /// it still completes before the scheduler run returns.
    ///
    /// `P: Copy` is the trivial-copy requirement for the parameter blob; a
    /// value too large for the inline buffer fails to compile.
    pub fn spawn<P: Copy + 'static>(&mut self, function: JobFunction, params: P, is_sub_job: bool) {
        const {
            assert!(
                mem::size_of::<P>() <= PARAM_BUFFER_SIZE,
                "params have to fit into the job's inline parameter buffer"
            )
        };
        let mut job = self
            .allocator
            .allocate(self.chunk_allocator)
            .expect("job chunk allocator exhausted; raise the allocation chunk amount");
        // SAFETY: the slot was just handed out exclusively to this worker and
        // nothing else can observe it until the push below.
        let job = unsafe { job.as_mut() };
        job.set_function(function);
        job.write_params(&params);
        if is_sub_job {
            // SAFETY: a non-null node outlives the run (owned by the graph).
            let node = unsafe { self.node.as_ref() }
                .expect("sub-job spawned from a job that belongs to no graph node");
            job.set_node(self.node);
            // Account for the sub-job before publishing it; a stolen-and-run
            // sub-job must not see the node complete underneath it.
            node.job_added();
        } else {
            job.set_node(core::ptr::null());
        }
        let pushed = self.queue.push(NonNull::from(&*job));
        assert!(pushed, "job queue overflow; raise the queue capacity");
    }
}
