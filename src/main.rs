//! MIPS-like Multi-Core System Simulator CLI.
//!
//! Loads a TOML configuration (or defaults), assembles a small demo
//! workload, runs it to completion under the configured scheduler, and
//! writes the per-process metrics files and the memory-usage CSV.

use clap::Parser;
use std::path::Path;
use std::process;

use mips_simulator::config::SystemConfig;
use mips_simulator::isa::asm;
use mips_simulator::metrics;
use mips_simulator::sim::Simulator;

/// Command-line arguments for the simulator.
#[derive(Parser, Debug)]
#[command(author, version, about = "MIPS-like multi-core system simulator")]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Output directory for metrics files and the memory-usage CSV.
    #[arg(short, long, default_value = "output")]
    out: String,
}

/// Sums the integers 1..=5 in a branch loop, stores the result, prints it.
///
/// Exercises forwarding (the add chain), a taken backward jump, a store and
/// a register PRINT.
fn sum_loop_program() -> Vec<u32> {
    vec![
        asm::li("t0", 0),          // 0x00  acc = 0
        asm::li("t1", 1),          // 0x04  i = 1
        asm::li("t2", 5),          // 0x08  limit = 5
        asm::add("t0", "t0", "t1"), // 0x0c  acc += i
        asm::addi("t1", "t1", 1),  // 0x10  i += 1
        asm::bgt("t1", "t2", 1),   // 0x14  if i > limit skip the jump
        asm::j(0x0c),              // 0x18  loop
        asm::sw("t0", "zero", 0x100), // 0x1c  store acc
        asm::print_reg("t0"),      // 0x20  print acc (blocks on I/O)
        asm::end(),                // 0x24
    ]
}

/// Stores a value, loads it back (load-use), doubles it and prints.
fn store_load_program() -> Vec<u32> {
    vec![
        asm::li("t0", 7),
        asm::sw("t0", "zero", 0x80),
        asm::lw("t1", "zero", 0x80),
        asm::add("t2", "t1", "t1"),
        asm::print_reg("t2"),
        asm::end(),
    ]
}

/// A plain arithmetic chain, long enough to be preempted under small quanta.
fn counter_program() -> Vec<u32> {
    let mut words = Vec::new();
    for _ in 0..12 {
        words.push(asm::addi("t0", "t0", 1));
    }
    words.push(asm::print_reg("t0"));
    words.push(asm::end());
    words
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => match SystemConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error: {}", err);
                process::exit(1);
            }
        },
        None => SystemConfig::default(),
    };

    println!("Global Configuration");
    println!("--------------------");
    println!("Main memory:");
    println!("  Total:            {} bytes", config.main_memory.total);
    println!("  Page size:        {} bytes", config.main_memory.page_size);
    println!("  Policy:           {:?}", config.main_memory.policy_kind());
    println!("  Weight:           {} cycles", config.main_memory.weight);
    println!("Secondary memory:");
    println!("  Total:            {} bytes", config.secondary_memory.total);
    println!("  Block size:       {} bytes", config.secondary_memory.block_size);
    println!("  Weight:           {} cycles", config.secondary_memory.weight);
    println!("Cache:");
    println!("  Lines:            {}", config.cache.size);
    println!("  Line size:        {} bytes", config.cache.line_size);
    println!("  Policy:           {:?}", config.cache.policy_kind());
    println!("  Weight:           {} cycles", config.cache.weight);
    println!("CPU:");
    println!("  Cores:            {}", config.cpu.cores);
    println!("Scheduling:");
    println!("  Policy:           {}", config.scheduling.algorithm_kind().name());
    println!("--------------------");

    let mut sim = Simulator::new(config);

    let programs: [(&str, Vec<u32>, u32); 3] = [
        ("sum-loop", sum_loop_program(), 0x0000),
        ("store-load", store_load_program(), 0x0400),
        ("counter", counter_program(), 0x0800),
    ];

    for (name, words, base) in programs {
        if let Err(err) = sim.load_program(name, &words, base) {
            eprintln!("error loading '{}': {}", name, err);
            process::exit(1);
        }
    }

    let outcome = sim.run();

    for pcb in &outcome.finished {
        print!("{}", metrics::process_report(pcb));
    }

    let out_dir = Path::new(&args.out);
    if let Err(err) = metrics::write_process_reports(&outcome.finished, out_dir) {
        eprintln!("error writing metrics files: {}", err);
        process::exit(1);
    }
    if let Err(err) = metrics::write_memory_csv(&outcome.samples, &out_dir.join("memory_usage.csv"))
    {
        eprintln!("error writing memory CSV: {}", err);
        process::exit(1);
    }

    sim.release_finished();
    println!("Reports written to {}", out_dir.display());
}
