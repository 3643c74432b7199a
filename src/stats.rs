//! Per-worker statistics and timing.
//!
//! Every worker tracks how its jobs arrived (own queue or stolen), how often
//! stealing failed, how often it parked for a quiescence that turned out to be
//! false, and where its time went. Workers write their own counters during a
//! run; reads happen only between runs.

use std::io;
use std::time::{Duration, Instant};

/// Simple monotonic stopwatch.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Passed to job functions to provide logging and debugging information.
/// See also [`UserJobLogger`].
pub struct WorkerInfo {
    worker_index: u32,
    user_job_amount: u32,
    user_job_duration: Duration,
}

impl WorkerInfo {
    pub(crate) fn new(worker_index: u32) -> Self {
        Self {
            worker_index,
            user_job_amount: 0,
            user_job_duration: Duration::ZERO,
        }
    }

    /// Index of the worker executing the current job.
    pub fn worker_index(&self) -> u32 {
        self.worker_index
    }
}

/// Guard for logging a user job inside a job function. A user job is a job
/// doing actual user-space work, as opposed to e.g. just spawning new jobs;
/// other statistics are tracked automatically, but only the job function
/// knows when it is doing real work.
///
/// Construct it right before the work and let it drop at scope end.
pub struct UserJobLogger<'a> {
    worker_info: &'a mut WorkerInfo,
    timer: Timer,
}

impl<'a> UserJobLogger<'a> {
    pub fn new(worker_info: &'a mut WorkerInfo) -> Self {
        Self {
            worker_info,
            timer: Timer::start(),
        }
    }
}

impl Drop for UserJobLogger<'_> {
    fn drop(&mut self) {
        self.worker_info.user_job_amount += 1;
        self.worker_info.user_job_duration += self.timer.elapsed();
    }
}

/// Counters for a single worker, written to a stream by
/// [`Scheduler::write_statistics`](crate::Scheduler::write_statistics).
pub struct WorkerStatistics {
    pub(crate) info: WorkerInfo,
    own_job_amount: u32,
    stolen_job_amount: u32,
    failed_steal_amount: u64,
    false_wait_amount: u64,
    total_duration: Duration,
    work_duration: Duration,
}

impl WorkerStatistics {
    pub(crate) fn new(worker_index: u32) -> Self {
        Self {
            info: WorkerInfo::new(worker_index),
            own_job_amount: 0,
            stolen_job_amount: 0,
            failed_steal_amount: 0,
            false_wait_amount: 0,
            total_duration: Duration::ZERO,
            work_duration: Duration::ZERO,
        }
    }

    pub(crate) fn add_own_job(&mut self) {
        self.own_job_amount += 1;
    }

    pub(crate) fn add_stolen_job(&mut self) {
        self.stolen_job_amount += 1;
    }

    pub(crate) fn add_failed_steal_attempt(&mut self) {
        self.failed_steal_amount += 1;
    }

    pub(crate) fn add_false_wait(&mut self) {
        self.false_wait_amount += 1;
    }

    pub(crate) fn add_total_timing(&mut self, timer: &Timer) {
        self.total_duration += timer.elapsed();
    }

    pub(crate) fn add_work_timing(&mut self, timer: &Timer) {
        self.work_duration += timer.elapsed();
    }

    /// Jobs executed out of the worker's own queue (including directly invoked
    /// root jobs).
    pub fn own_job_amount(&self) -> u32 {
        self.own_job_amount
    }

    /// Jobs stolen from other workers and executed here.
    pub fn stolen_job_amount(&self) -> u32 {
        self.stolen_job_amount
    }

    /// Every job executed on this worker arrived either from its own queue or
    /// from a steal.
    pub fn executed_job_amount(&self) -> u32 {
        self.own_job_amount + self.stolen_job_amount
    }

    pub fn failed_steal_amount(&self) -> u64 {
        self.failed_steal_amount
    }

    pub fn false_wait_amount(&self) -> u64 {
        self.false_wait_amount
    }

    pub fn user_job_amount(&self) -> u32 {
        self.info.user_job_amount
    }

    /// Writes a human-readable report for this worker.
    pub fn write<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        let total_job_amount = self.executed_job_amount();
        let admin_job_amount = total_job_amount - self.info.user_job_amount;
        writeln!(out, "Worker {}", self.info.worker_index)?;
        writeln!(out, "\tExecuted {total_job_amount} jobs")?;
        writeln!(
            out,
            "\t\t* {} own, {} stolen",
            self.own_job_amount, self.stolen_job_amount
        )?;
        writeln!(
            out,
            "\t\t* {} user jobs, {} admin jobs",
            self.info.user_job_amount, admin_job_amount
        )?;
        writeln!(out, "\tFailed to steal {} times", self.failed_steal_amount)?;
        writeln!(
            out,
            "\tFalsely waited {} times (due to incorrectly seeing all workers being done)",
            self.false_wait_amount
        )?;
        writeln!(
            out,
            "\tSpent {:.3} ms in total,",
            self.total_duration.as_secs_f64() * 1e3
        )?;
        writeln!(
            out,
            "\tof which {:.3} ms working,",
            self.work_duration.as_secs_f64() * 1e3
        )?;
        writeln!(
            out,
            "\tof which {:.3} ms on user jobs",
            self.info.user_job_duration.as_secs_f64() * 1e3
        )?;
        Ok(())
    }

    /// Zeroes every counter, including the user-job figures.
    pub fn reset(&mut self) {
        self.own_job_amount = 0;
        self.stolen_job_amount = 0;
        self.failed_steal_amount = 0;
        self.false_wait_amount = 0;
        self.total_duration = Duration::ZERO;
        self.work_duration = Duration::ZERO;
        self.info.user_job_amount = 0;
        self.info.user_job_duration = Duration::ZERO;
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn user_job_logger_accumulates() {
        let mut info = WorkerInfo::new(0);
        {
            let _logger = UserJobLogger::new(&mut info);
        }
        {
            let _logger = UserJobLogger::new(&mut info);
        }
        assert_eq!(info.user_job_amount, 2);
    }

    #[test]
    fn report_contains_the_counters() {
        let mut statistics = WorkerStatistics::new(3);
        statistics.add_own_job();
        statistics.add_own_job();
        statistics.add_stolen_job();
        statistics.add_failed_steal_attempt();

        let mut out = Vec::new();
        statistics.write(&mut out).unwrap();
        let report = String::from_utf8(out).unwrap();
        assert!(report.contains("Worker 3"));
        assert!(report.contains("Executed 3 jobs"));
        assert!(report.contains("2 own, 1 stolen"));
        assert!(report.contains("Failed to steal 1 times"));
    }

    #[test]
    fn reset_zeroes_everything() {
        let mut statistics = WorkerStatistics::new(0);
        statistics.add_own_job();
        statistics.add_stolen_job();
        statistics.add_false_wait();
        statistics.reset();

        assert_eq!(statistics.executed_job_amount(), 0);
        assert_eq!(statistics.failed_steal_amount(), 0);
        assert_eq!(statistics.false_wait_amount(), 0);
        assert_eq!(statistics.user_job_amount(), 0);
    }
}
