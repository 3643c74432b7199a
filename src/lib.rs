//! # jobgraph - Work-Stealing Scheduler for Job Graphs
//!
//! A lock-free work-stealing scheduler that executes a directed acyclic graph
//! of jobs across a fixed pool of worker threads. It is built for workloads
//! (such as game-engine frame pipelines) where the same or a similar graph is
//! dispatched repeatedly and stable, low-variance latency matters more than
//! unbounded capacity.
//!
//! ## Architecture
//!
//! - **Jobs**: cache-line-sized records carrying a function pointer and an
//!   inline parameter blob; allocated from per-worker linear allocators and
//!   reclaimed in bulk between runs
//! - **Queues**: one bounded Chase-Lev deque per worker; the owner works LIFO
//!   at the bottom while thieves steal FIFO from the top
//! - **Graph**: nodes embed a root job plus dependency counters; a node's
//!   successors unblock only once its root and every spawned sub-job have
//!   returned, and counters restore themselves so graphs are reusable
//! - **Scheduler**: worker threads drain their own queue, steal from random
//!   victims, and agree on quiescence with a two-counter protocol
//!
//! ## Example
//!
//! ```no_run
//! use jobgraph::{JobGraph, JobParams, JobSpawner, Scheduler, WorkerInfo};
//! use std::sync::Arc;
//!
//! fn hello(_params: JobParams<'_>, _spawner: &mut JobSpawner<'_>, _info: &mut WorkerInfo) {
//!     println!("hello from a job");
//! }
//!
//! let mut graph = JobGraph::new();
//! let first = graph.add_node(hello, (), &[]);
//! graph.add_node(hello, (), &[first]); // runs after `first` completes
//!
//! let mut scheduler = Scheduler::new(4, 8);
//! scheduler.set_graph(Arc::new(graph));
//! scheduler.run();
//! ```

pub mod config;
pub mod graph;
pub mod job;
pub mod queue;
pub mod scheduler;
pub mod spawner;
pub mod stats;

mod allocator;
mod sync;

pub use graph::{JobGraph, NodeId};
pub use job::{Job, JobFunction, JobParams};
pub use queue::JobQueue;
pub use scheduler::Scheduler;
pub use spawner::JobSpawner;
pub use stats::{Timer, UserJobLogger, WorkerInfo, WorkerStatistics};
