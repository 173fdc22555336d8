use factor_asm::{decode, op, Chunk};
use factor_vm::prelude::*;

fn run(chunks: &[Chunk]) -> String {
    let program = decode(chunks).expect("program decodes");
    Vm::new().run(&program).expect("program runs")
}

fn run_err(chunks: &[Chunk]) -> VmError {
    let program = decode(chunks).expect("program decodes");
    Vm::new().run(&program).expect_err("program faults")
}

/// PUSH 3 / STORE 0 / start: LOAD 0 / JZ end / LOAD 0 / PRINT / LOAD 0 /
/// PUSH 1 / SUB / STORE 0 / JMP start / end:
fn countdown() -> Vec<Chunk> {
    vec![
        op::push(3),
        op::store(0),
        op::load(0), // start (index 2)
        op::jz(7),   // -> end (index 11)
        op::load(0),
        op::print(),
        op::load(0),
        op::push(1),
        op::sub(),
        op::store(0),
        op::jmp(-9), // -> start
    ]
}

#[test]
fn countdown_loop_prints_321() {
    assert_eq!(run(&countdown()), "321");
}

#[test]
fn call_and_ret() {
    // PUSH 5 / RET (subroutine) // PUSH 2 / CALL -4 / ADD / PRINT
    let chunks = vec![
        op::push(5),
        op::ret(),
        op::push(2),
        op::call(-4),
        op::add(),
        op::print(),
    ];
    assert_eq!(run(&chunks), "7");
}

#[test]
fn jmp_skips_forward() {
    assert_eq!(
        run(&[op::push(1), op::jmp(1), op::push(99), op::print()]),
        "1"
    );
}

#[test]
fn jz_falls_through_on_nonzero() {
    assert_eq!(
        run(&[op::push(1), op::jz(1), op::push(5), op::print()]),
        "5"
    );
}

#[test]
fn jnz_takes_the_branch_on_nonzero() {
    // The branch jumps over a PRINT that would underflow.
    assert_eq!(
        run(&[op::push(1), op::jnz(1), op::print(), op::push(5), op::print()]),
        "5"
    );
}

#[test]
fn ret_on_empty_call_stack_is_a_no_op() {
    assert_eq!(run(&[op::ret(), op::push(1), op::print()]), "1");
}

#[test]
fn halt_stops_the_program() {
    let chunks = vec![op::push(1), op::halt(), op::print()];
    let program = decode(&chunks).unwrap();
    let mut vm = Vm::new();
    assert_eq!(vm.run(&program).unwrap(), "");
    assert_eq!(vm.stack(), &[1], "HALT leaves state in place");
}

#[test]
fn backward_jump_past_the_start_segfaults() {
    let err = run_err(&[op::jmp(-5)]);
    assert_eq!(err, VmError::SegmentationFault { ip: -4 });
}

#[test]
fn forward_jump_past_the_end_segfaults() {
    let err = run_err(&[op::jmp(5)]);
    assert_eq!(err, VmError::SegmentationFault { ip: 6 });
}

#[test]
fn jump_to_exactly_the_end_halts() {
    assert_eq!(run(&[op::jmp(2), op::print(), op::nop()]), "");
}

#[test]
fn call_tracking_builds_a_backtrace() {
    // CALL 1 jumps over nothing; the frame stays open at the end.
    let chunks = vec![op::call(1), op::nop(), op::nop()];
    let program = decode(&chunks).unwrap();
    let mut vm = Vm::new();
    vm.enable_call_tracking();
    vm.run(&program).unwrap();
    let frames = vm.call_frames().unwrap().backtrace();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].call_site, 0);
    assert_eq!(frames[0].return_ip, 1);
    assert_eq!(vm.backtrace(), "#0 call@0 -> 1");
}

#[test]
fn ret_unwinds_the_tracked_frame() {
    let chunks = vec![
        op::push(5),
        op::ret(),
        op::push(2),
        op::call(-4),
        op::add(),
        op::print(),
    ];
    let program = decode(&chunks).unwrap();
    let mut vm = Vm::new();
    vm.enable_call_tracking();
    vm.run(&program).unwrap();
    assert!(vm.call_frames().unwrap().is_empty());
    assert!(vm.call_stack().is_empty());
}

#[test]
fn output_opcode_logs_and_yields() {
    // INPUT / OUTPUT with a queued value.
    let chunks = vec![op::input(), op::output()];
    let program = decode(&chunks).unwrap();
    let mut vm = Vm::new();
    vm.push_input(42);
    assert_eq!(vm.run(&program).unwrap(), "42");
    assert_eq!(vm.output_log(), &[42]);
}

#[test]
fn input_on_an_empty_queue_pushes_zero() {
    assert_eq!(run(&[op::input(), op::print()]), "0");
}

#[test]
fn system_stubs() {
    assert_eq!(run(&[op::syscall(), op::print()]), "0");
    assert_eq!(run(&[op::int(), op::print()]), "0");
    assert_eq!(run(&[op::net_recv(), op::print()]), "0");
    assert_eq!(run(&[op::net_send(), op::thread_start(), op::thread_join()]), "");
    assert_eq!(run(&[op::brk()]), "BRK");
    assert_eq!(run(&[op::debug()]), "DEBUG");
    assert_eq!(run(&[op::push(9), op::trace(), op::print()]), "99");
    assert_eq!(run(&[op::trace()]), "0", "TRACE on an empty stack");
}

#[test]
fn atomic_toggles_a_flag() {
    let program = decode(&[op::atomic()]).unwrap();
    let mut vm = Vm::new();
    vm.run(&program).unwrap();
    assert!(vm.atomic_mode());
    vm.run(&program).unwrap();
    assert!(!vm.atomic_mode());
}

#[test]
fn universal_number_opcodes_have_no_core_handler() {
    // Index 27 (UN_INNER) is reserved for the algebra collaborator.
    let chunk = bare_chunk(27);
    let program = decode(&[chunk]).unwrap();
    let err = Vm::new().run(&program).unwrap_err();
    assert_eq!(err, VmError::InvalidOpcode { ip: 0 });
}

/// A bare opcode chunk for an arbitrary prime index, checksum attached.
fn bare_chunk(index: usize) -> Chunk {
    let prime = factor_primes::nth_prime(index);
    let checksum = factor_primes::nth_prime(index * 4);
    Chunk::from(prime).pow(4) * Chunk::from(checksum).pow(6)
}
