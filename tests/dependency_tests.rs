//! Dependency-ordering tests: successors must observe every predecessor's
//! output, and redundant predecessor edges collapse at construction.

#![cfg(not(feature = "loom"))]

use std::ptr;
use std::sync::Arc;

use jobgraph::{JobGraph, JobParams, JobSpawner, Scheduler, WorkerInfo};

#[derive(Clone, Copy)]
struct StageParams {
    output: *mut u64,
    inputs: [*const u64; 2],
    input_amount: u32,
    observed: *mut u64,
}

/// Records the sum of its inputs as seen at entry, then marks its own output.
fn stage(params: JobParams<'_>, _spawner: &mut JobSpawner<'_>, _info: &mut WorkerInfo) {
    let params = unsafe { params.read::<StageParams>() };
    let mut seen = 0u64;
    for input in &params.inputs[..params.input_amount as usize] {
        seen += unsafe { **input };
    }
    unsafe {
        *params.observed = seen;
        *params.output += 1;
    }
}

fn no_inputs(output: *mut u64, observed: *mut u64) -> StageParams {
    StageParams {
        output,
        inputs: [ptr::null(), ptr::null()],
        input_amount: 0,
        observed,
    }
}

#[test]
fn diamond_orders_every_edge() {
    // A feeds B and C, which both feed D.
    let mut outputs = [0u64; 4];
    let mut observed = [0u64; 4];
    let [a_out, b_out, c_out, d_out] = {
        let base = outputs.as_mut_ptr();
        [base, unsafe { base.add(1) }, unsafe { base.add(2) }, unsafe { base.add(3) }]
    };

    let mut graph = JobGraph::new();
    let a = graph.add_node(stage, no_inputs(a_out, &mut observed[0]), &[]);
    let b = graph.add_node(
        stage,
        StageParams {
            output: b_out,
            inputs: [a_out, ptr::null()],
            input_amount: 1,
            observed: &mut observed[1],
        },
        &[a],
    );
    let c = graph.add_node(
        stage,
        StageParams {
            output: c_out,
            inputs: [a_out, ptr::null()],
            input_amount: 1,
            observed: &mut observed[2],
        },
        &[a],
    );
    graph.add_node(
        stage,
        StageParams {
            output: d_out,
            inputs: [b_out, c_out],
            input_amount: 2,
            observed: &mut observed[3],
        },
        &[b, c],
    );

    let mut scheduler = Scheduler::new(4, 8);
    scheduler.set_graph(Arc::new(graph));
    scheduler.run();

    assert_eq!(outputs, [1, 1, 1, 1], "every node runs exactly once");
    assert_eq!(observed[1], 1, "B observed A's completed output at entry");
    assert_eq!(observed[2], 1, "C observed A's completed output at entry");
    assert_eq!(observed[3], 2, "D observed both B and C already complete");
}

#[test]
fn redundant_predecessor_is_elided_but_order_holds() {
    // C declares both A and B even though A -> B already orders them; the
    // direct A -> C edge must be dropped while C still runs once, last.
    let mut outputs = [0u64; 3];
    let mut observed = [0u64; 3];
    let [a_out, b_out, c_out] = {
        let base = outputs.as_mut_ptr();
        [base, unsafe { base.add(1) }, unsafe { base.add(2) }]
    };

    let mut graph = JobGraph::new();
    let a = graph.add_node(stage, no_inputs(a_out, &mut observed[0]), &[]);
    let b = graph.add_node(
        stage,
        StageParams {
            output: b_out,
            inputs: [a_out, ptr::null()],
            input_amount: 1,
            observed: &mut observed[1],
        },
        &[a],
    );
    let c = graph.add_node(
        stage,
        StageParams {
            output: c_out,
            inputs: [a_out, b_out],
            input_amount: 2,
            observed: &mut observed[2],
        },
        &[a, b],
    );

    assert_eq!(graph.initial_predecessor_amount(c), 1);

    let mut scheduler = Scheduler::new(4, 8);
    scheduler.set_graph(Arc::new(graph));
    scheduler.run();

    assert_eq!(outputs, [1, 1, 1], "every node runs exactly once");
    assert_eq!(observed[2], 2, "C observed both A and B already complete");
}
