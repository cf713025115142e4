//! MIPS-like Multi-Core System Simulator Library.
//!
//! This crate implements a cycle-level simulator of a multi-core CPU running a
//! MIPS-like instruction set underneath an operating-system scheduler. Each
//! core executes a five-stage in-order pipeline with data forwarding and
//! load-use stalls; memory accesses go through a shared, process-tagged L1
//! cache over a paged main memory backed by swap.
//!
//! # Architecture
//!
//! * **Core**: 5-stage in-order pipeline (Fetch, Decode, Execute, Memory,
//!   Writeback) with one OS thread per stage and epoch-tagged branch flush.
//! * **Memory**: per-process page tables, FIFO/LRU frame replacement, swap
//!   slots, and a fully-associative write-back write-allocate L1.
//! * **Scheduling**: ready/blocked/finished queues multiplexed over N worker
//!   cores with FCFS, Round-Robin, SJF, Priority and Lottery policies.
//!
//! # Modules
//!
//! * `common`: shared error types.
//! * `config`: configuration loading and parsing.
//! * `core`: CPU core workers and the pipeline engine.
//! * `isa`: instruction set definitions, encoders and the register bank.
//! * `mem`: memory hierarchy (cache, paging, swap).
//! * `metrics`: per-process reports and the memory-usage CSV.
//! * `process`: process control blocks and the I/O manager.
//! * `sched`: scheduler queues and selection policies.
//! * `sim`: simulation harness tying everything together.

/// Shared error types used throughout the simulator.
pub mod common;

/// Configuration system for memory, cache, CPU and scheduling settings.
///
/// Loads and parses TOML configuration files to customize simulator behavior
/// for different simulation scenarios.
pub mod config;

/// CPU core workers and the five-stage pipeline engine.
pub mod core;

/// Instruction Set Architecture definitions, word encoders and the
/// name-addressed register bank.
pub mod isa;

/// Memory hierarchy: L1 cache, paged main memory, swap, replacement policies.
pub mod mem;

/// Per-process metrics reports and the simulator-wide memory-usage CSV.
pub mod metrics;

/// Process control blocks, process table and the I/O manager.
pub mod process;

/// Scheduler queues, main loop and selection policies.
pub mod sched;

/// Simulation harness: program loading and the run-to-completion driver.
pub mod sim;
