//! The multi-worker scheduler: thread lifecycle, run loop, quiescence.
//!
//! A fixed set of OS threads is created at construction and reused across
//! runs. The calling thread participates as worker 0; auxiliary threads park
//! on a tri-state flag between runs. Within a run, each worker drains its own
//! deque LIFO, steals FIFO from randomly chosen victims, and takes part in a
//! two-counter agreement protocol to detect that no work is left anywhere.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use rand::distributions::{Distribution, Uniform};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, error, trace};

use crate::allocator::{JobAllocator, JobChunkAllocator};
use crate::graph::JobGraph;
use crate::queue::JobQueue;
use crate::stats::{Timer, WorkerStatistics};
use crate::sync::SyncUnsafeCell;

const STATE_WAIT: u32 = 0;
const STATE_WORK: u32 = 1;
const STATE_QUIT: u32 = 2;

/// Atomic value with futex-style wait/notify, built on a mutex and condition
/// variable. Waiters re-check the value under the mutex and notifiers take the
/// mutex before signalling, so a wakeup between check and sleep cannot be
/// lost.
struct WaitCell {
    value: AtomicU32,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl WaitCell {
    fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    fn load(&self, order: Ordering) -> u32 {
        self.value.load(order)
    }

    fn store(&self, value: u32, order: Ordering) {
        self.value.store(value, order);
    }

    fn fetch_add(&self, value: u32, order: Ordering) -> u32 {
        self.value.fetch_add(value, order)
    }

    fn fetch_sub(&self, value: u32, order: Ordering) -> u32 {
        self.value.fetch_sub(value, order)
    }

    /// Blocks while the stored value equals `expected`.
    fn wait_while_eq(&self, expected: u32) {
        let mut guard = self.lock.lock().expect("scheduler wait lock poisoned");
        while self.value.load(Ordering::SeqCst) == expected {
            guard = self
                .condvar
                .wait(guard)
                .expect("scheduler wait lock poisoned");
        }
    }

    fn notify_all(&self) {
        let _guard = self.lock.lock().expect("scheduler wait lock poisoned");
        self.condvar.notify_all();
    }
}

/// Everything owned by one worker.
///
/// The queue is the shared face (thieves hit it concurrently); the context is
/// exclusive to the owning thread for the duration of a run.
struct Worker {
    queue: JobQueue,
    ctx: SyncUnsafeCell<WorkerCtx>,
}

struct WorkerCtx {
    allocator: JobAllocator,
    rng: SmallRng,
    steal_targets: Uniform<u32>,
    statistics: WorkerStatistics,
}

impl Worker {
    fn new(index: u32, worker_amount: u32) -> Self {
        Self {
            queue: JobQueue::new(),
            ctx: SyncUnsafeCell::new(WorkerCtx {
                allocator: JobAllocator::new(),
                rng: SmallRng::seed_from_u64(0xbabe + u64::from(index)),
                // Offset by the worker's own index so that, reduced modulo the
                // worker amount, the target is never the worker itself (except
                // in the degenerate single-worker case).
                steal_targets: Uniform::from(
                    1 + index..=worker_amount.saturating_sub(1).max(1) + index,
                ),
                statistics: WorkerStatistics::new(index),
            }),
        }
    }
}

struct Shared {
    worker_amount: u32,
    workers: Vec<Worker>,
    chunk_allocator: JobChunkAllocator,
    /// Written between runs only; published to workers by the Wait -> Work
    /// state transition followed by the entry barrier.
    graph: SyncUnsafeCell<Option<Arc<JobGraph>>>,
    /// Rendezvous at the beginning and end of a single run.
    sync_point: Barrier,
    state: WaitCell,
    /// Number of workers currently in the stealing phase. When all workers are
    /// stealing there is no more work to do; `worker_amount + 1` is the
    /// sentinel meaning everyone agreed the run is over.
    stealer_amount: WaitCell,
    /// Number of workers not yet convinced the run is over. The second half of
    /// the agreement protocol: a full `stealer_amount` is only a hint, since a
    /// worker can leave stealing and immediately produce new work.
    active_amount: AtomicU32,
}

/// Executes a [`JobGraph`] across a fixed pool of worker threads using
/// lock-free work stealing.
///
/// Construction spawns the auxiliary threads; [`run`](Self::run) blocks until
/// the current graph has completed, with the calling thread working as worker
/// 0. Dropping the scheduler wakes and joins the threads.
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Creates a scheduler with `desired_worker_amount` workers (clamped to at
    /// least 1) and `desired_allocation_chunk_amount` job chunks (clamped to
    /// at least the worker amount).
    pub fn new(desired_worker_amount: u32, desired_allocation_chunk_amount: u32) -> Self {
        let worker_amount = desired_worker_amount.max(1);
        let chunk_amount = desired_allocation_chunk_amount.max(worker_amount);
        let shared = Arc::new(Shared {
            worker_amount,
            workers: (0..worker_amount)
                .map(|index| Worker::new(index, worker_amount))
                .collect(),
            chunk_allocator: JobChunkAllocator::new(chunk_amount),
            graph: SyncUnsafeCell::new(None),
            sync_point: Barrier::new(worker_amount as usize),
            state: WaitCell::new(STATE_WAIT),
            stealer_amount: WaitCell::new(0),
            active_amount: AtomicU32::new(0),
        });
        let threads = (1..worker_amount)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("jobgraph-worker-{index}"))
                    .spawn(move || thread_loop(&shared, index))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        debug!(worker_amount, chunk_amount, "scheduler started");
        Self { shared, threads }
    }

    /// Sets the graph to be run. Can be changed between calls to
    /// [`run`](Self::run); the graph must not be mutated while set.
    pub fn set_graph(&mut self, graph: Arc<JobGraph>) {
        // SAFETY: workers read the graph slot only during a run; `&mut self`
        // means no run is in progress and the auxiliary threads are parked.
        unsafe {
            *self.shared.graph.get() = Some(graph);
        }
    }

    /// Runs the currently set graph, blocking until every job (root, sub and
    /// free) has completed. The calling thread participates as worker 0.
    pub fn run(&mut self) {
        let shared = &*self.shared;
        // SAFETY: no run is in progress, so nothing else touches the slot.
        assert!(
            unsafe { (*shared.graph.get()).is_some() },
            "no job graph set"
        );
        trace!("run starting");
        shared.state.store(STATE_WORK, Ordering::SeqCst);
        shared.state.notify_all();
        shared.stealer_amount.store(0, Ordering::SeqCst);
        shared
            .active_amount
            .store(shared.worker_amount, Ordering::SeqCst);

        run_worker(shared, 0);

        shared.chunk_allocator.reset();
        trace!("run finished");
    }

    /// Number of workers, including the calling thread.
    pub fn worker_amount(&self) -> u32 {
        self.shared.worker_amount
    }

    /// Statistics of one worker. Counters accumulate across runs until
    /// [`reset_statistics`](Self::reset_statistics) is called.
    pub fn statistics(&self, worker_index: u32) -> &WorkerStatistics {
        let worker = &self.shared.workers[worker_index as usize];
        // SAFETY: contexts are written only by their owning threads during a
        // run; `run` takes `&mut self`, so while this borrow is alive no run
        // can start and the auxiliary threads are parked.
        unsafe { &(*worker.ctx.get()).statistics }
    }

    /// Writes the per-worker statistics reports to `out`.
    pub fn write_statistics<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        for index in 0..self.shared.worker_amount {
            self.statistics(index).write(out)?;
        }
        Ok(())
    }

    /// Zeroes all workers' statistics.
    pub fn reset_statistics(&mut self) {
        for worker in &self.shared.workers {
            // SAFETY: `&mut self` guarantees no run is in progress.
            unsafe {
                (*worker.ctx.get()).statistics.reset();
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.state.store(STATE_QUIT, Ordering::SeqCst);
        self.shared.state.notify_all();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
        debug!("scheduler stopped");
    }
}

fn thread_loop(shared: &Shared, index: u32) {
    loop {
        shared.state.wait_while_eq(STATE_WAIT);
        if shared.state.load(Ordering::SeqCst) == STATE_QUIT {
            break;
        }
        run_worker(shared, index);
    }
}

fn run_worker(shared: &Shared, index: u32) {
    shared.sync_point.wait();
    let worker = &shared.workers[index as usize];
    // SAFETY: the context is exclusive to this worker's thread for the whole
    // run; other threads only touch the queue.
    let ctx = unsafe { &mut *worker.ctx.get() };
    // SAFETY: the slot was written before the state flipped to Work, and the
    // entry barrier has passed; nobody writes it until the run is over.
    let graph = unsafe { (*shared.graph.get()).clone() }.expect("no job graph set");
    let timer = Timer::start();

    // Start by running the root jobs of all root nodes, striped across the
    // workers. Roots are invoked directly rather than queued; the parallelism
    // at root level comes from the striping, and any sub-jobs they spawn land
    // in this worker's queue.
    let mut root_index = index as usize;
    while let Some(root_job) = graph.root_job(root_index) {
        // SAFETY: the graph (and with it every root job) outlives the run.
        unsafe {
            root_job.run(
                &mut ctx.allocator,
                &shared.chunk_allocator,
                &worker.queue,
                &mut ctx.statistics.info,
            );
        }
        ctx.statistics.add_own_job();
        root_index += shared.worker_amount as usize;
    }
    ctx.statistics.add_work_timing(&timer);

    // Run jobs as long as there is work to do anywhere.
    work_loop(shared, worker, ctx);

    if index == 0 {
        // Safe to flip the state in between the two barriers: no auxiliary
        // worker can observe it and park before the rendezvous below.
        shared.state.store(STATE_WAIT, Ordering::SeqCst);
    }
    ctx.statistics.add_total_timing(&timer);
    shared.sync_point.wait();
    // The exit barrier guarantees no thief is active any more, so the bulk
    // resets cannot race anything.
    worker.queue.reset();
    ctx.allocator.reset();
}

fn work_loop(shared: &Shared, worker: &Worker, ctx: &mut WorkerCtx) {
    let worker_amount = shared.worker_amount;
    loop {
        // Drain the worker's own queue, LIFO for cache locality.
        {
            let timer = Timer::start();
            while let Some(job) = worker.queue.pop() {
                // SAFETY: queued jobs stay valid until the allocators reset at
                // the end of the run, and each is popped or stolen only once.
                unsafe {
                    job.as_ref().run(
                        &mut ctx.allocator,
                        &shared.chunk_allocator,
                        &worker.queue,
                        &mut ctx.statistics.info,
                    );
                }
                ctx.statistics.add_own_job();
            }
            ctx.statistics.add_work_timing(&timer);
        }

        // Out of local work; start stealing from other workers.
        shared.stealer_amount.fetch_add(1, Ordering::Relaxed);
        loop {
            let target_index = ctx.steal_targets.sample(&mut ctx.rng) % worker_amount;
            if let Some(job) = shared.workers[target_index as usize].queue.steal() {
                // Successfully stole a job; first let potentially parked
                // workers know that there may soon be more work to steal.
                if shared.stealer_amount.fetch_sub(1, Ordering::Relaxed) == worker_amount {
                    shared.stealer_amount.notify_all();
                }
                let timer = Timer::start();
                // SAFETY: as for popped jobs above.
                unsafe {
                    job.as_ref().run(
                        &mut ctx.allocator,
                        &shared.chunk_allocator,
                        &worker.queue,
                        &mut ctx.statistics.info,
                    );
                }
                ctx.statistics.add_stolen_job();
                ctx.statistics.add_work_timing(&timer);
                // Go back to working on the own queue.
                break;
            }
            ctx.statistics.add_failed_steal_attempt();

            // If everyone is stealing, there is probably no work left.
            if shared.stealer_amount.load(Ordering::Relaxed) >= worker_amount {
                // The last worker to get here settles it for everyone.
                if shared.active_amount.fetch_sub(1, Ordering::SeqCst) == 1 {
                    shared
                        .stealer_amount
                        .store(worker_amount + 1, Ordering::SeqCst);
                    shared.stealer_amount.notify_all();
                }

                // Park until stealer_amount changes: either to the sentinel
                // (all done) or to a smaller value (someone stole a job and
                // may be about to produce more work).
                shared.stealer_amount.wait_while_eq(worker_amount);
                if shared.stealer_amount.load(Ordering::SeqCst) > worker_amount {
                    return;
                }

                ctx.statistics.add_false_wait();
                shared.active_amount.fetch_add(1, Ordering::SeqCst);
            }

            // Yield between attempts to reduce contention on victim queues;
            // honest work is prioritized over stealing.
            thread::yield_now();
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::job::JobParams;
    use crate::spawner::JobSpawner;
    use crate::stats::WorkerInfo;

    fn noop(_: JobParams<'_>, _: &mut JobSpawner<'_>, _: &mut WorkerInfo) {}

    #[test]
    fn worker_amount_is_clamped() {
        let scheduler = Scheduler::new(0, 0);
        assert_eq!(scheduler.worker_amount(), 1);
    }

    #[test]
    fn runs_a_single_node_graph() {
        #[derive(Clone, Copy)]
        struct Params {
            flag: *mut bool,
        }

        fn set_flag(params: JobParams<'_>, _: &mut JobSpawner<'_>, _: &mut WorkerInfo) {
            let params = unsafe { params.read::<Params>() };
            unsafe { *params.flag = true };
        }

        let mut flag = false;
        let mut graph = JobGraph::new();
        graph.add_node(set_flag, Params { flag: &mut flag }, &[]);

        let mut scheduler = Scheduler::new(2, 4);
        scheduler.set_graph(Arc::new(graph));
        scheduler.run();
        assert!(flag);
    }

    #[test]
    fn empty_graph_run_returns_immediately() {
        let mut scheduler = Scheduler::new(2, 4);
        scheduler.set_graph(Arc::new(JobGraph::new()));
        scheduler.run();
        let executed: u32 = (0..scheduler.worker_amount())
            .map(|index| scheduler.statistics(index).executed_job_amount())
            .sum();
        assert_eq!(executed, 0);
    }

    #[test]
    #[should_panic(expected = "no job graph set")]
    fn running_without_a_graph_is_a_programmer_error() {
        let mut scheduler = Scheduler::new(1, 1);
        scheduler.run();
    }

    #[test]
    fn graph_can_be_swapped_between_runs() {
        let mut scheduler = Scheduler::new(2, 4);

        let mut first = JobGraph::new();
        first.add_node(noop, (), &[]);
        scheduler.set_graph(Arc::new(first));
        scheduler.run();

        let mut second = JobGraph::new();
        second.add_node(noop, (), &[]);
        second.add_node(noop, (), &[]);
        scheduler.set_graph(Arc::new(second));
        scheduler.run();

        let executed: u32 = (0..scheduler.worker_amount())
            .map(|index| scheduler.statistics(index).executed_job_amount())
            .sum();
        assert_eq!(executed, 3);
    }
}
