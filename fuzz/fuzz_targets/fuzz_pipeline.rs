#![no_main]

use libfuzzer_sys::fuzz_target;
use tessel_implement::{CompileOptions, ImplementerRegistry, compile_graph};
use tessel_ir::{DataType, FlowGraph, ops};
use tessel_opt::PassContext;

// Each byte appends one operator to a chain over small 2-D inputs.
fuzz_target!(|data: &[u8]| {
    let mut g = FlowGraph::new();
    let a = ops::input(&mut g, "a", DataType::Float32, &[4, 4]);
    let b = ops::input(&mut g, "b", DataType::Float32, &[4]);
    let mut live = vec![a, b];
    for &byte in data.iter().take(32) {
        let x = live[usize::from(byte >> 4) % live.len()];
        let y = live[usize::from(byte) % live.len()];
        let next = match byte % 9 {
            0 => ops::relu(&mut g, x),
            1 => ops::neg(&mut g, x),
            2 => ops::exp(&mut g, x),
            3 => ops::abs(&mut g, x),
            4 => ops::add(&mut g, x, y),
            5 => ops::mul(&mut g, x, y),
            6 => ops::maximum(&mut g, x, y),
            7 => ops::matmul(&mut g, x, y),
            _ => ops::reduce_sum(&mut g, x, 0),
        };
        if let Ok(t) = next {
            live.push(t);
        }
    }
    if let Some(&out) = live.last() {
        g.mark_output(out);
    }
    // Graph, implementation and lowering must never panic.
    let registry = ImplementerRegistry::with_builtins();
    let _ = compile_graph(g, &registry, &mut PassContext::new(), &CompileOptions::default());
});
