//! Integration tests for the five-stage pipeline engine.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use mips_simulator::config::SystemConfig;
use mips_simulator::core::pipeline;
use mips_simulator::isa::asm;
use mips_simulator::mem::MemoryHierarchy;
use mips_simulator::process::{MemWeights, Pcb, State};

/// Builds a memory hierarchy and a process with `words` loaded at `base`.
fn create_process(words: &[u32], base: u32) -> (Arc<MemoryHierarchy>, Arc<Pcb>) {
    let config = SystemConfig::default();
    let mem = Arc::new(MemoryHierarchy::new(&config));
    let pcb = Arc::new(Pcb::new(1, "pipeline-test", MemWeights::default()));
    mem.register_process(Arc::clone(&pcb));
    for (i, word) in words.iter().enumerate() {
        mem.load_word(base + (i as u32) * 4, *word, &pcb).unwrap();
    }
    *pcb.pc.lock().unwrap() = base;
    pcb.instructions.store(words.len() as u32, Ordering::Relaxed);
    (mem, pcb)
}

/// Runs dispatches until the process finishes, standing in for the I/O
/// manager when a PRINT blocks it.
fn run_to_completion(mem: &MemoryHierarchy, pcb: &Pcb, enforce_quantum: bool) -> u32 {
    let mut dispatches = 0;
    loop {
        dispatches += 1;
        assert!(dispatches < 100, "process failed to finish");
        pipeline::run(pcb, mem, 0, enforce_quantum);
        match pcb.state.load() {
            State::Finished => return dispatches,
            State::Blocked => pcb.state.store(State::Ready),
            _ => {}
        }
    }
}

fn reg(pcb: &Pcb, name: &str) -> i32 {
    pcb.regs.lock().unwrap().read(name) as i32
}

/// Back-to-back ALU producers feeding a consumer exercise EX/MEM
/// forwarding: the ADD reads t0 and t1 before their write-backs commit.
#[test]
fn test_forwarding_add_chain() {
    let program = [
        asm::addi("t0", "zero", 7),
        asm::addi("t1", "zero", 3),
        asm::add("t2", "t0", "t1"),
        asm::end(),
    ];
    let (mem, pcb) = create_process(&program, 0);
    run_to_completion(&mem, &pcb, false);

    assert_eq!(reg(&pcb, "t0"), 7);
    assert_eq!(reg(&pcb, "t1"), 3);
    assert_eq!(reg(&pcb, "t2"), 10);
}

/// A load followed immediately by a consumer of the loaded register: decode
/// must hold the consumer until the load clears the hazard marker.
#[test]
fn test_load_use_stall() {
    let program = [
        asm::lw("t0", "zero", 0),
        asm::add("t1", "t0", "zero"),
        asm::end(),
    ];
    // Program at 0x100 so data word 0 stays free.
    let (mem, pcb) = create_process(&program, 0x100);
    mem.load_word(0, 42, &pcb).unwrap();
    run_to_completion(&mem, &pcb, false);

    assert_eq!(reg(&pcb, "t0"), 42);
    assert_eq!(reg(&pcb, "t1"), 42);
}

/// A taken branch must drop the speculatively fetched instruction behind it
/// via epoch mismatch.
#[test]
fn test_branch_flush_drops_speculation() {
    let program = [
        asm::addi("t0", "zero", 1), // 0x00
        asm::beq("t0", "t0", 1),    // 0x04  taken, to 0x0c
        asm::addi("t0", "zero", 99), // 0x08  must be flushed
        asm::addi("t1", "zero", 5), // 0x0c
        asm::end(),                 // 0x10
    ];
    let (mem, pcb) = create_process(&program, 0);
    run_to_completion(&mem, &pcb, false);

    assert_eq!(reg(&pcb, "t0"), 1, "flushed instruction must not commit");
    assert_eq!(reg(&pcb, "t1"), 5);
}

/// BNE falls through when operands are equal.
#[test]
fn test_branch_not_taken_falls_through() {
    let program = [
        asm::addi("t0", "zero", 1),
        asm::bne("t0", "t0", 1),
        asm::addi("t1", "zero", 2),
        asm::addi("t2", "zero", 3),
        asm::end(),
    ];
    let (mem, pcb) = create_process(&program, 0);
    run_to_completion(&mem, &pcb, false);

    assert_eq!(reg(&pcb, "t1"), 2);
    assert_eq!(reg(&pcb, "t2"), 3);
}

/// An absolute jump skips the instruction after it.
#[test]
fn test_jump_absolute() {
    let program = [
        asm::addi("t0", "zero", 4), // 0x00
        asm::j(0x0c),               // 0x04
        asm::addi("t0", "zero", 9), // 0x08  skipped
        asm::addi("t1", "t0", 1),   // 0x0c
        asm::end(),                 // 0x10
    ];
    let (mem, pcb) = create_process(&program, 0);
    run_to_completion(&mem, &pcb, false);

    assert_eq!(reg(&pcb, "t0"), 4);
    assert_eq!(reg(&pcb, "t1"), 5);
}

/// A backward branch loop: sums 1..=5.
#[test]
fn test_backward_loop_sums() {
    let program = [
        asm::li("t0", 0),           // 0x00 acc
        asm::li("t1", 1),           // 0x04 i
        asm::li("t2", 5),           // 0x08 limit
        asm::add("t0", "t0", "t1"), // 0x0c
        asm::addi("t1", "t1", 1),   // 0x10
        asm::bgt("t1", "t2", 1),    // 0x14 exit when i > limit
        asm::j(0x0c),               // 0x18
        asm::end(),                 // 0x1c
    ];
    let (mem, pcb) = create_process(&program, 0);
    run_to_completion(&mem, &pcb, false);

    assert_eq!(reg(&pcb, "t0"), 15);
    assert_eq!(reg(&pcb, "t1"), 6);
}

/// Store then load through the same address round-trips through the memory
/// stage in order.
#[test]
fn test_store_load_round_trip() {
    let program = [
        asm::li("t0", 77),
        asm::sw("t0", "zero", 0x40),
        asm::lw("t1", "zero", 0x40),
        asm::end(),
    ];
    let (mem, pcb) = create_process(&program, 0x200);
    run_to_completion(&mem, &pcb, false);

    assert_eq!(reg(&pcb, "t1"), 77);
    assert_eq!(mem.read(0x40, &pcb).unwrap(), 77);
}

/// LA writes the effective address, not the memory contents.
#[test]
fn test_load_address() {
    let program = [
        asm::li("t0", 0x20),
        asm::la("t1", "t0", 0x10),
        asm::end(),
    ];
    let (mem, pcb) = create_process(&program, 0);
    run_to_completion(&mem, &pcb, false);

    assert_eq!(reg(&pcb, "t1"), 0x30);
}

/// Quantum preemption: a 10-instruction program under quantum 4 needs three
/// dispatches and completes every instruction exactly once.
#[test]
fn test_quantum_preemption_single_process() {
    let mut program = Vec::new();
    for _ in 0..10 {
        program.push(asm::addi("t0", "t0", 1));
    }
    program.push(asm::end());

    let (mem, pcb) = create_process(&program, 0);
    pcb.quantum.store(4, Ordering::Relaxed);

    pipeline::run(&pcb, &mem, 0, true);
    assert_eq!(pcb.state.load(), State::Ready, "preempted, not finished");
    let after_first = pcb.counters.instructions_completed.load(Ordering::Relaxed);
    assert!(after_first <= 4, "first burst completed {}", after_first);

    let dispatches = 1 + run_to_completion(&mem, &pcb, true);
    assert!(dispatches >= 3, "ran in {} dispatches", dispatches);

    assert_eq!(reg(&pcb, "t0"), 10);
    // 10 ADDIs plus the END token retire exactly once each.
    assert_eq!(
        pcb.counters.instructions_completed.load(Ordering::Relaxed),
        11
    );
    assert_eq!(pcb.burst.load(Ordering::Relaxed), 10);
}

/// PRINT emits one I/O request and blocks the process; the work already in
/// flight still completes and the program resumes cleanly.
#[test]
fn test_print_blocks_process() {
    let mut program = vec![asm::li("t0", 33), asm::print_reg("t0")];
    // Distance between the PRINT and the END keeps the END out of the
    // pipeline when the PRINT executes.
    for _ in 0..30 {
        program.push(asm::addi("t1", "t1", 1));
    }
    program.push(asm::end());

    let (mem, pcb) = create_process(&program, 0);
    let result = pipeline::run(&pcb, &mem, 0, false);

    assert_eq!(pcb.state.load(), State::Blocked);
    assert_eq!(result.io_requests.len(), 1);
    assert_eq!(result.io_requests[0].message, "33");
    assert_eq!(pcb.snapshot_output(), vec!["33".to_string()]);

    pcb.state.store(State::Ready);
    run_to_completion(&mem, &pcb, false);
    assert_eq!(reg(&pcb, "t1"), 30);
}

/// The memory-word PRINT path reads the address named by the immediate.
#[test]
fn test_print_memory_word() {
    let program = [asm::print_addr(0x40), asm::end()];
    let (mem, pcb) = create_process(&program, 0x100);
    mem.write(0x40, 1234, &pcb).unwrap();

    run_to_completion(&mem, &pcb, false);
    assert_eq!(pcb.snapshot_output(), vec!["1234".to_string()]);
}

/// A fetch landing in a freshly allocated frame halts cleanly on the END
/// sentinel fill.
#[test]
fn test_uninitialized_fetch_halts() {
    let program = [asm::addi("t0", "zero", 1)];
    // No END in the program: the next word is sentinel-filled.
    let (mem, pcb) = create_process(&program, 0);
    run_to_completion(&mem, &pcb, false);

    assert_eq!(pcb.state.load(), State::Finished);
    assert_eq!(reg(&pcb, "t0"), 1);
}

/// Unknown opcodes flow through every stage as no-ops.
#[test]
fn test_unknown_opcode_is_noop() {
    let program = [
        asm::addi("t0", "zero", 6),
        0x2c << 26, // unrecognized opcode
        asm::addi("t1", "t0", 1),
        asm::end(),
    ];
    let (mem, pcb) = create_process(&program, 0);
    run_to_completion(&mem, &pcb, false);

    assert_eq!(reg(&pcb, "t0"), 6);
    assert_eq!(reg(&pcb, "t1"), 7);
}

/// Exhausting frames and swap kills the process with an error marker
/// instead of wedging the pipeline.
#[test]
fn test_out_of_swap_terminates_process() {
    let mut config = SystemConfig::default();
    config.main_memory.total = 512;
    config.main_memory.page_size = 256;
    config.secondary_memory.total = 0;

    let mem = Arc::new(MemoryHierarchy::new(&config));
    let pcb = Arc::new(Pcb::new(1, "oom", MemWeights::default()));
    mem.register_process(Arc::clone(&pcb));

    let program = [
        asm::lw("t0", "zero", 0x100), // second frame
        asm::lw("t1", "zero", 0x200), // needs eviction, no swap left
        asm::end(),
    ];
    for (i, word) in program.iter().enumerate() {
        mem.load_word((i as u32) * 4, *word, &pcb).unwrap();
    }

    let mut dispatches = 0;
    while pcb.state.load() != State::Finished {
        dispatches += 1;
        assert!(dispatches < 100, "faulting process failed to terminate");
        pipeline::run(&pcb, &mem, 0, false);
        if pcb.state.load() == State::Blocked {
            pcb.state.store(State::Ready);
        }
    }

    let fault = pcb.fault_message().expect("fault must be recorded");
    assert!(fault.contains("swap"), "unexpected fault: {}", fault);
}
