//! The dependency graph: nodes owning a root job plus completion bookkeeping.
//!
//! A [`JobGraph`] is built once, single-threaded, and then dispatched any
//! number of times: every node restores its counters when it completes, so a
//! run leaves the graph exactly as it found it. The graph is not meant to be
//! modified while it is being run; dynamic dispatch can instead be achieved by
//! having a job function spawn sub-jobs into its own node based on external
//! state.
//!
//! Acyclicity is enforced by the API shape: all predecessors of a node are
//! declared when the node is created, and a new node has no successors yet, so
//! a cycle cannot be expressed.

use core::ptr::NonNull;

use crate::job::{Job, JobFunction, PARAM_BUFFER_SIZE};
use crate::queue::JobQueue;
use crate::sync::{AtomicU32, Ordering};

/// Opaque handle to a node, stable for the lifetime of its graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(u32);

/// Node in a [`JobGraph`]. Contains a single root job that is pushed for
/// execution once every predecessor node has completed. The root job can spawn
/// sub-jobs which must complete before the node itself counts as completed.
pub struct JobGraphNode {
    root_job: Job,
    initial_predecessor_amount: u32,
    predecessor_amount: AtomicU32,
    unfinished_amount: AtomicU32,
    successors: Vec<NonNull<JobGraphNode>>,
}

// SAFETY: nodes are shared across worker threads during a run, but the only
// mutation that happens then goes through the atomic counters; the root job
// and successor list are frozen once construction ends.
unsafe impl Send for JobGraphNode {}
unsafe impl Sync for JobGraphNode {}

impl JobGraphNode {
    fn new(function: JobFunction) -> Self {
        let mut root_job = Job::empty();
        root_job.set_function(function);
        Self {
            root_job,
            initial_predecessor_amount: 0,
            predecessor_amount: AtomicU32::new(0),
            // The root job itself counts as one unit of unfinished work.
            unfinished_amount: AtomicU32::new(1),
            successors: Vec::new(),
        }
    }

    pub(crate) fn root_job(&self) -> &Job {
        &self.root_job
    }

    /// Accounts for a newly spawned sub-job. Must be called before the sub-job
    /// is pushed anywhere a thief could take it from; otherwise a racing
    /// completion could observe the node as finished and fire its successors
    /// early.
    pub(crate) fn job_added(&self) {
        self.unfinished_amount.fetch_add(1, Ordering::Relaxed);
    }

    /// Called after a job belonging to this node has returned. The thread that
    /// observes the last outstanding job unblocks the successors, pushing each
    /// newly runnable root onto its own queue, then restores the counters so
    /// the graph can be run again.
    pub(crate) fn job_completed(&self, queue: &JobQueue) {
        let old_unfinished = self.unfinished_amount.fetch_sub(1, Ordering::SeqCst);
        assert!(old_unfinished > 0, "graph node completion counter underflow");
        if old_unfinished > 1 {
            return;
        }
        for successor in &self.successors {
            // SAFETY: successor nodes are owned by the same graph and outlive
            // the run.
            let successor = unsafe { successor.as_ref() };
            let old_predecessors = successor.predecessor_amount.fetch_sub(1, Ordering::Relaxed);
            assert!(old_predecessors > 0, "graph node predecessor counter underflow");
            if old_predecessors == 1 {
                let pushed = queue.push(NonNull::from(&successor.root_job));
                assert!(pushed, "job queue overflow while unblocking a successor node");
            }
        }
        self.unfinished_amount.store(1, Ordering::Relaxed);
        self.predecessor_amount
            .store(self.initial_predecessor_amount, Ordering::Relaxed);
    }

    fn is_ancestor_of(&self, descendant: NonNull<JobGraphNode>) -> bool {
        for successor in &self.successors {
            if *successor == descendant {
                return true;
            }
        }
        for successor in &self.successors {
            // SAFETY: successors belong to the same graph.
            if unsafe { successor.as_ref() }.is_ancestor_of(descendant) {
                return true;
            }
        }
        false
    }
}

/// Dependency graph of jobs.
///
/// Owns its nodes; nodes are addressed through [`NodeId`] handles. Construct
/// the graph, hand it to [`Scheduler::set_graph`](crate::Scheduler::set_graph)
/// and run it as often as needed.
pub struct JobGraph {
    nodes: Vec<NonNull<JobGraphNode>>,
    root_nodes: Vec<NonNull<JobGraphNode>>,
}

// SAFETY: the node pointers target heap allocations owned by this graph; the
// graph is immutable while shared (construction requires `&mut self`), and
// run-time node mutation is atomic (see `JobGraphNode`).
unsafe impl Send for JobGraph {}
unsafe impl Sync for JobGraph {}

impl JobGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root_nodes: Vec::new(),
        }
    }

    /// Creates a node whose root job runs `function` with `params`, after all
    /// `predecessors` have completed. An empty predecessor set makes this a
    /// root node, started as soon as the scheduler runs the graph.
    ///
    /// Declaring every predecessor at creation time is what keeps the graph
    /// acyclic. A predecessor that is already an ancestor of another declared
    /// predecessor adds no ordering information, and the redundant edge is
    /// elided. Predecessors are expected to be distinct; duplicates are not
    /// collapsed.
    pub fn add_node<P: Copy + 'static>(
        &mut self,
        function: JobFunction,
        params: P,
        predecessors: &[NodeId],
    ) -> NodeId {
        const {
            assert!(
                core::mem::size_of::<P>() <= PARAM_BUFFER_SIZE,
                "params have to fit into the job's inline parameter buffer"
            )
        };
        let mut node = Box::new(JobGraphNode::new(function));
        node.root_job.write_params(&params);
        // Heap-pin the node, then aim its root job's back-pointer at it.
        let node = NonNull::from(Box::leak(node));
        unsafe {
            (*node.as_ptr()).root_job.set_node(node.as_ptr());
        }

        for &id in predecessors {
            let predecessor = self.node_ptr(id);
            let redundant = predecessors.iter().any(|&other| {
                other != id
                    && unsafe { predecessor.as_ref() }.is_ancestor_of(self.node_ptr(other))
            });
            if !redundant {
                // SAFETY: both nodes are alive and distinct (the new node has
                // no id yet, so it cannot appear among the predecessors), and
                // `&mut self` means no other reference observes them.
                unsafe { link(predecessor, node) };
            }
        }
        if predecessors.is_empty() {
            self.root_nodes.push(node);
        }

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Root job of the `index`-th root node, or `None` past the root count.
    /// The scheduler walks root nodes through this.
    pub fn root_job(&self, index: usize) -> Option<&Job> {
        self.root_nodes
            .get(index)
            // SAFETY: the node is owned by this graph and lives as long as it.
            .map(|node| unsafe { node.as_ref() }.root_job())
    }

    pub fn node_amount(&self) -> usize {
        self.nodes.len()
    }

    pub fn root_amount(&self) -> usize {
        self.root_nodes.len()
    }

    /// Number of direct predecessors the node was left with after redundant
    /// edges were elided.
    pub fn initial_predecessor_amount(&self, id: NodeId) -> u32 {
        // SAFETY: owned by this graph.
        unsafe { self.node_ptr(id).as_ref() }.initial_predecessor_amount
    }

    fn node_ptr(&self, id: NodeId) -> NonNull<JobGraphNode> {
        self.nodes[id.0 as usize]
    }
}

impl Default for JobGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JobGraph {
    fn drop(&mut self) {
        for &node in &self.nodes {
            // SAFETY: every node was leaked from a `Box` in `add_node` and is
            // dropped exactly once here.
            unsafe { drop(Box::from_raw(node.as_ptr())) };
        }
    }
}

/// Records `successor` as depending on `predecessor`.
///
/// # Safety
///
/// Both pointers must be live nodes of the same graph, distinct from each
/// other, with no other references to them active.
unsafe fn link(predecessor: NonNull<JobGraphNode>, successor: NonNull<JobGraphNode>) {
    unsafe {
        (*predecessor.as_ptr()).successors.push(successor);
        let successor = &mut *successor.as_ptr();
        successor.initial_predecessor_amount += 1;
        successor
            .predecessor_amount
            .store(successor.initial_predecessor_amount, Ordering::Relaxed);
    }
}
