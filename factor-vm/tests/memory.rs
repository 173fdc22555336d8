use factor_asm::{decode, op, Chunk};
use factor_vm::memory::PAGE_SIZE;
use factor_vm::prelude::*;

fn run(chunks: &[Chunk]) -> String {
    let program = decode(chunks).expect("program decodes");
    Vm::new().run(&program).expect("program runs")
}

/// Small layout keeping MMIO addresses (and their operand primes) low.
fn small_layout() -> MemoryLayout {
    MemoryLayout {
        code_size: 32,
        data_size: 16,
        heap_size: (PAGE_SIZE * 2) as i64,
        stack_size: 16,
    }
}

#[test]
fn store_then_load_round_trips() {
    assert_eq!(
        run(&[op::push(7), op::store(3), op::load(3), op::print()]),
        "7"
    );
}

#[test]
fn load_of_an_untouched_cell_is_zero() {
    assert_eq!(run(&[op::load(9), op::print()]), "0");
}

#[test]
fn store_is_overwritten_by_a_later_store() {
    let out = run(&[
        op::push(1),
        op::store(0),
        op::push(2),
        op::store(0),
        op::load(0),
        op::print(),
    ]);
    assert_eq!(out, "2");
}

#[test]
fn code_segment_loads_but_rejects_stores() {
    let chunks = vec![op::load(-32), op::print()];
    let program = decode(&chunks).unwrap();
    let mut vm = Vm::with_layout(small_layout());
    vm.memory_mut().load_code(&chunks).unwrap();
    let out = vm.run(&program).unwrap();
    let expected = chunks[0].iter_u64_digits().next().unwrap() as i64;
    assert_eq!(out, expected.to_string());

    let program = decode(&[op::push(1), op::store(-32)]).unwrap();
    let mut vm = Vm::with_layout(small_layout());
    vm.memory_mut().load_code(&[op::nop()]).unwrap();
    let err = vm.run(&program).unwrap_err();
    assert_eq!(
        err,
        VmError::MemoryAccess {
            ip: 1,
            fault: MemoryFault::CodeWrite
        }
    );
}

#[test]
fn out_of_range_address_faults() {
    let layout = small_layout();
    let beyond = layout.mmio_out() + 1;
    let program = decode(&[op::load(beyond)]).unwrap();
    let err = Vm::with_layout(layout).run(&program).unwrap_err();
    assert_eq!(
        err,
        VmError::MemoryAccess {
            ip: 0,
            fault: MemoryFault::OutOfRange
        }
    );
}

#[test]
fn mmio_input_reads_the_queue_without_raising() {
    let layout = small_layout();
    let program = decode(&[op::load(layout.mmio_in()), op::print()]).unwrap();

    let mut vm = Vm::with_layout(layout);
    vm.push_input(11);
    assert_eq!(vm.run(&program).unwrap(), "11");

    // Empty queue reads zero, it does not raise.
    let mut vm = Vm::with_layout(layout);
    assert_eq!(vm.run(&program).unwrap(), "0");
}

#[test]
fn mmio_output_appends_to_the_log() {
    let layout = small_layout();
    let program = decode(&[op::push(9), op::store(layout.mmio_out())]).unwrap();
    let mut vm = Vm::with_layout(layout);
    vm.run(&program).unwrap();
    assert_eq!(vm.output_log(), &[9]);
}

#[test]
fn mmio_input_rejects_stores() {
    let layout = small_layout();
    let program = decode(&[op::push(1), op::store(layout.mmio_in())]).unwrap();
    let err = Vm::with_layout(layout).run(&program).unwrap_err();
    assert_eq!(
        err,
        VmError::MemoryAccess {
            ip: 1,
            fault: MemoryFault::MmioStore
        }
    );
}

#[test]
fn alloc_pushes_the_heap_address() {
    let program = decode(&[op::alloc(10), op::print()]).unwrap();
    let mut vm = Vm::new();
    let heap_start = vm.memory().layout().heap_start();
    assert_eq!(vm.run(&program).unwrap(), heap_start.to_string());
    assert_eq!(vm.memory().allocation_count(), 1);
}

#[test]
fn free_releases_an_allocation() {
    let layout = small_layout();
    let heap_start = layout.heap_start();
    let chunks = vec![op::alloc(8), op::drop(), op::free(heap_start)];
    let program = decode(&chunks).unwrap();
    let mut vm = Vm::with_layout(layout);
    vm.run(&program).unwrap();
    assert_eq!(vm.memory().allocation_count(), 0);
}

#[test]
fn allocation_failure_triggers_collection() {
    // Two heap pages. Fill one, drop the reference, then ask for both:
    // the retry after the sweep succeeds.
    let chunks = vec![
        op::alloc(PAGE_SIZE as i64),
        op::drop(),
        op::alloc((PAGE_SIZE * 2) as i64),
        op::print(),
    ];
    let program = decode(&chunks).unwrap();
    let mut vm = Vm::with_layout(small_layout());
    let heap_start = vm.memory().layout().heap_start();
    assert_eq!(vm.run(&program).unwrap(), heap_start.to_string());
    assert_eq!(vm.memory().allocation_count(), 1);
}

#[test]
fn reachable_allocations_survive_the_oom_sweep() {
    // The first allocation's address stays on the stack, so the second,
    // impossible request fails even after collection.
    let chunks = vec![
        op::alloc((PAGE_SIZE * 2) as i64),
        op::alloc((PAGE_SIZE * 2) as i64),
    ];
    let program = decode(&chunks).unwrap();
    let err = Vm::with_layout(small_layout()).run(&program).unwrap_err();
    assert_eq!(
        err,
        VmError::MemoryAccess {
            ip: 1,
            fault: MemoryFault::OutOfMemory
        }
    );
}

#[test]
fn heap_cells_store_and_load() {
    let heap = MemoryLayout::default().heap_start();
    let out = run(&[
        op::alloc(4),
        op::drop(),
        op::push(77),
        op::store(heap),
        op::load(heap),
        op::print(),
    ]);
    assert_eq!(out, "77");
}
