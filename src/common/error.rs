//! Error types for the memory hierarchy.
//!
//! Both variants are fatal to the process that triggered them: the pipeline
//! catches the error at the stage-thread boundary, records it on the PCB and
//! drains, and the scheduler reclaims the process as Finished.

use thiserror::Error;

/// Failure raised by a memory-hierarchy operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// A page eviction needed a swap slot but the free pool was exhausted.
    #[error("out of swap space evicting page {page} of pid {pid}")]
    OutOfSwap { pid: u32, page: u32 },

    /// A translated physical address fell outside physical memory.
    #[error("segmentation violation at physical address {addr:#010x}")]
    SegFault { addr: u32 },
}
