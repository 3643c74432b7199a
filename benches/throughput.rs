//! Generate + reduce throughput benchmark using criterion.
//!
//! Runs the demo pipeline (parallel hash generation feeding a two-stage sum
//! reduction) at several sizes, against a single-thread baseline.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use jobgraph::{JobGraph, JobParams, JobSpawner, Scheduler, UserJobLogger, WorkerInfo};

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

fn parallel_generate(params: JobParams<'_>, spawner: &mut JobSpawner<'_>, info: &mut WorkerInfo) {
    let params = unsafe { params.read::<GenerateParams>() };

    if params.amount <= 1024 {
        let _logger = UserJobLogger::new(info);
        for i in params.first..params.first + params.amount {
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

fn parallel_sum(params: JobParams<'_>, spawner: &mut JobSpawner<'_>, info: &mut WorkerInfo) {
    let params = unsafe { params.read::<SumParams>() };

    if params.batch_amount == 1 {
        let _logger = UserJobLogger::new(info);
        let first = params.first_batch as usize * params.batch_size as usize;
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

fn bench_generate_reduce(c: &mut Criterion) {
    let worker_amount = num_cpus::get() as u32;
    let mut scheduler = Scheduler::new(worker_amount, 64);

    let mut group = c.benchmark_group("generate_reduce");
    group.sample_size(10);

    for &batch_amount in &[64u32, 256, 1024] {
        let batch_size = 1024u32;
        let number_amount = batch_amount * batch_size;
        group.throughput(Throughput::Elements(u64::from(number_amount)));

        group.bench_function(BenchmarkId::new("single_thread", number_amount), |b| {
            let mut numbers = vec![0u64; number_amount as usize];
            b.iter(|| {
                for (i, number) in numbers.iter_mut().enumerate() {
                    *number = u64::from(slow_hash(i as u32));
                }
                black_box(numbers.iter().sum::<u64>())
            });
        });

        let mut numbers = vec![0u64; number_amount as usize];
        let mut batch_results = vec![0u64; batch_amount as usize];
        let mut final_sum = Box::new(0u64);
        let final_sum_slot: *mut u64 = &mut *final_sum;

        let mut graph = JobGraph::new();
        let generate = graph.add_node(
            parallel_generate,
            GenerateParams {
                results: numbers.as_mut_ptr(),
                first: 0,
                amount: number_amount,
            },
            &[],
        );
        let batch_sum = graph.add_node(
            parallel_sum,
            SumParams {
                numbers: numbers.as_ptr(),
                results: batch_results.as_mut_ptr(),
                first_batch: 0,
                batch_amount,
                batch_size,
            },
            &[generate],
        );
        graph.add_node(
            parallel_sum,
            SumParams {
                numbers: batch_results.as_ptr(),
                results: final_sum_slot,
                first_batch: 0,
                batch_amount: 1,
                batch_size: batch_amount,
            },
            &[batch_sum],
        );
        scheduler.set_graph(Arc::new(graph));

        group.bench_function(BenchmarkId::new("scheduler", number_amount), |b| {
            b.iter(|| {
                scheduler.run();
                // SAFETY: the run is over, nothing writes the slot any more.
                black_box(unsafe { *final_sum_slot })
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_generate_reduce);
criterion_main!(benches);
