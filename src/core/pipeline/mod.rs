//! The five-stage instruction pipeline.
//!
//! Fetch, decode, execute, memory-access and write-back run as concurrent
//! threads linked by single-token latches. Forwarding and load-use hazards
//! are handled by the hazard unit; control-flow changes are handled by epoch
//! tagging and a front flush.

/// Per-stage instruction operations and the shared stage context.
pub mod control;

/// The per-dispatch engine: stage threads, drain discipline, watchdog.
pub mod engine;

/// Forwarding tables, load-use marker and branch epoch.
pub mod hazards;

/// Single-token inter-stage latches (IF/ID, ID/EX, EX/MEM, MEM/WB).
pub mod latch;

/// Pipeline tokens and the decoded-instruction record.
pub mod token;

pub use engine::{run, BurstResult};
pub use hazards::HazardUnit;
pub use latch::{StageLatch, StageLatches};
pub use token::{DecodedInstruction, PipelineToken};
