//! Demonstration harness: parallel generate + reduce against a single-thread
//! baseline, followed by the per-worker statistics report.

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use jobgraph::{JobGraph, JobParams, JobSpawner, Scheduler, Timer, UserJobLogger, WorkerInfo};

/// Deliberately expensive pseudorandom hash, so the generated work dwarfs the
/// scheduling overhead.
fn slow_hash(mut x: u32) -> u32 {
    for _ in 0..32 {
        x = x.wrapping_add(831_461);
        x = x.wrapping_mul(125_897);
        x ^= x << 16;
    }
    x
}

#[derive(Clone, Copy)]
struct GenerateParams {
    results: *mut u64,
    first: u32,
    amount: u32,
}

/// Fills `results[first..first + amount]` with hashed values, splitting the
/// range into recursive sub-jobs down to a leaf size of 1024.
fn parallel_generate(params: JobParams<'_>, spawner: &mut JobSpawner<'_>, info: &mut WorkerInfo) {
    let params = unsafe { params.read::<GenerateParams>() };

    if params.amount <= 1024 {
        let _logger = UserJobLogger::new(info);
        for i in params.first..params.first + params.amount {
            // SAFETY: every leaf writes a disjoint range of the results
            // buffer, which outlives the run.
            unsafe { *params.results.add(i as usize) = u64::from(slow_hash(i)) };
        }
        return;
    }
    let left_amount = params.amount / 2;
    spawner.spawn(
        parallel_generate,
        GenerateParams {
            amount: left_amount,
            ..params
        },
        true,
    );
    spawner.spawn(
        parallel_generate,
        GenerateParams {
            first: params.first + left_amount,
            amount: params.amount - left_amount,
            ..params
        },
        true,
    );
}

#[derive(Clone, Copy)]
struct SumParams {
    numbers: *const u64,
    results: *mut u64,
    first_batch: u32,
    batch_amount: u32,
    batch_size: u32,
}

/// Sums `batch_amount` batches of `batch_size` numbers into one result slot
/// per batch, splitting into recursive sub-jobs down to single batches.
fn parallel_sum(params: JobParams<'_>, spawner: &mut JobSpawner<'_>, info: &mut WorkerInfo) {
    let params = unsafe { params.read::<SumParams>() };

    if params.batch_amount == 1 {
        let _logger = UserJobLogger::new(info);
        let first = params.first_batch as usize * params.batch_size as usize;
        // SAFETY: the input range is fully initialized by the predecessor node
        // and each batch writes its own result slot.
        let sum: u64 = unsafe {
            std::slice::from_raw_parts(params.numbers.add(first), params.batch_size as usize)
                .iter()
                .sum()
        };
        unsafe { *params.results.add(params.first_batch as usize) = sum };
        return;
    }
    let left_amount = params.batch_amount / 2;
    spawner.spawn(
        parallel_sum,
        SumParams {
            batch_amount: left_amount,
            ..params
        },
        true,
    );
    spawner.spawn(
        parallel_sum,
        SumParams {
            first_batch: params.first_batch + left_amount,
            batch_amount: params.batch_amount - left_amount,
            ..params
        },
        true,
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let worker_amount = thread::available_parallelism().map_or(4, |n| n.get()) as u32;
    let mut scheduler = Scheduler::new(worker_amount, 32);
    println!(
        "Running scheduler with {} worker threads (including main thread).\n",
        scheduler.worker_amount()
    );

    let batch_amount: u32 = 1024;
    let batch_size: u32 = 1024;
    let number_amount = batch_amount * batch_size;
    let mut numbers = vec![0u64; number_amount as usize];
    let mut batch_results = vec![0u64; batch_amount as usize];

    println!("***Scheduler benchmark***");
    println!(
        "Generating {number_amount} pseudorandom numbers using a quite expensive hash function,\n\
         and calculating their sum.\n"
    );

    // Single-thread benchmark.
    let benchmark_timer = Timer::start();
    for (i, number) in numbers.iter_mut().enumerate() {
        *number = u64::from(slow_hash(i as u32));
    }
    let benchmark_result: u64 = numbers.iter().sum();
    let benchmark_duration = benchmark_timer.elapsed();
    println!(
        "Single-thread benchmark: {:.3} ms",
        benchmark_duration.as_secs_f64() * 1e3
    );

    // Scheduler job graph setup: generate -> batch sums -> final sum.
    let mut scheduler_result = 0u64;
    let mut graph = JobGraph::new();
    let generate_node = graph.add_node(
        parallel_generate,
        GenerateParams {
            results: numbers.as_mut_ptr(),
            first: 0,
            amount: number_amount,
        },
        &[],
    );
    let batch_sum_node = graph.add_node(
        parallel_sum,
        SumParams {
            numbers: numbers.as_ptr(),
            results: batch_results.as_mut_ptr(),
            first_batch: 0,
            batch_amount,
            batch_size,
        },
        &[generate_node],
    );
    graph.add_node(
        parallel_sum,
        SumParams {
            numbers: batch_results.as_ptr(),
            results: &mut scheduler_result,
            first_batch: 0,
            batch_amount: 1,
            batch_size: batch_amount,
        },
        &[batch_sum_node],
    );
    scheduler.set_graph(Arc::new(graph));

    // Run the scheduler.
    let scheduler_timer = Timer::start();
    scheduler.run();
    let scheduler_duration = scheduler_timer.elapsed();
    println!(
        "Scheduler run: {:.3} ms",
        scheduler_duration.as_secs_f64() * 1e3
    );
    println!(
        "Ratio (benchmark time / scheduler time): {:.3}\n",
        benchmark_duration.as_secs_f64() / scheduler_duration.as_secs_f64()
    );

    println!("Benchmark calculation result: {benchmark_result}");
    println!("Scheduler calculation result: {scheduler_result}");
    if scheduler_result == benchmark_result {
        println!("Correct result!\n");
    } else {
        println!("Incorrect result!\n");
    }

    println!("\t***Details***");
    scheduler.write_statistics(&mut std::io::stdout().lock())?;

    Ok(())
}
