use std::time::Duration;

use factor_asm::{decode, op, Chunk};
use factor_vm::prelude::*;

/// PUSH 3 / STORE 0 / start: LOAD 0 / JZ end / LOAD 0 / PRINT / LOAD 0 /
/// PUSH 1 / SUB / STORE 0 / JMP start / end: — every IP runs repeatedly,
/// so a threshold of 1 pushes the whole loop through the JIT.
fn countdown() -> Vec<Chunk> {
    vec![
        op::push(3),
        op::store(0),
        op::load(0),
        op::jz(7),
        op::load(0),
        op::print(),
        op::load(0),
        op::push(1),
        op::sub(),
        op::store(0),
        op::jmp(-9),
    ]
}

fn run_with_threshold(chunks: &[Chunk], threshold: u64) -> (String, Vm) {
    let program = decode(chunks).unwrap();
    let mut vm = Vm::new();
    vm.set_jit_threshold(threshold);
    let out = vm.run(&program).unwrap();
    (out, vm)
}

#[test]
fn compiled_execution_matches_interpretation() {
    let chunks = countdown();
    let (interpreted, vm_cold) = run_with_threshold(&chunks, u64::MAX);
    let (compiled, vm_hot) = run_with_threshold(&chunks, 1);

    assert_eq!(interpreted, "321");
    assert_eq!(compiled, interpreted);
    assert_eq!(vm_cold.stack(), vm_hot.stack());
    assert_eq!(vm_cold.ip(), vm_hot.ip());
    assert_eq!(vm_cold.memory().dump(), vm_hot.memory().dump());
    assert!(
        vm_hot.jit_stats().blocks_compiled > 0,
        "the hot run actually compiled"
    );
    assert_eq!(vm_cold.jit_stats().blocks_compiled, 0);
}

#[test]
fn faults_surface_identically_through_compiled_blocks() {
    // The loop body runs twice; the second pass goes through compiled
    // blocks and ends in a division by zero at the same IP.
    let chunks = vec![
        op::push(2),
        op::store(0),
        op::load(0), // loop start (index 2)
        op::push(1),
        op::sub(),
        op::store(0),
        op::load(0),
        op::jnz(-6),
        op::push(1),
        op::push(0),
        op::div(),
    ];
    let program = decode(&chunks).unwrap();

    let mut cold = Vm::new();
    let cold_err = cold.run(&program).unwrap_err();

    let mut hot = Vm::new();
    hot.set_jit_threshold(1);
    let hot_err = hot.run(&program).unwrap_err();

    assert_eq!(cold_err, VmError::DivisionByZero { ip: 10 });
    assert_eq!(hot_err, cold_err);
    assert_eq!(cold.stack(), hot.stack());
}

#[test]
fn fallback_blocks_still_yield_output() {
    // PRINT has no direct lowering; a threshold of 1 forces the loop's
    // PRINT through the fallback path.
    let (out, vm) = run_with_threshold(&countdown(), 1);
    assert_eq!(out, "321");
    assert!(vm.jit_stats().blocks_compiled > 0);
}

#[test]
fn zero_ttl_discards_blocks_between_visits() {
    let chunks = countdown();
    let program = decode(&chunks).unwrap();
    let mut vm = Vm::new();
    vm.set_jit_threshold(1);
    vm.set_jit_ttl(Duration::ZERO);
    assert_eq!(vm.run(&program).unwrap(), "321");
    let stats = vm.jit_stats();
    assert!(
        stats.blocks_compiled >= 2,
        "expired registrations recompile: {stats:?}"
    );
}

#[test]
fn jit_counters_are_per_instruction_pointer() {
    let chunks = vec![op::push(1), op::push(1), op::add(), op::print()];
    let (out, vm) = run_with_threshold(&chunks, 1);
    assert_eq!(out, "2");
    // A straight-line program visits each IP once: blocks compile on
    // the first (threshold-reaching) visit but never execute. The two
    // identical PUSH chunks share one structural cache entry.
    let stats = vm.jit_stats();
    assert_eq!(stats.blocks_compiled, 3);
    assert_eq!(stats.cache_hits, 1);
}
