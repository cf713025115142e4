//! Process control blocks and the global process table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::MemoryError;
use crate::isa::regs::RegisterBank;

/// I/O requests and the manager thread that drains them.
pub mod io;

/// Sentinel for a timestamp that has not been recorded yet.
pub const TIMESTAMP_UNSET: u64 = u64::MAX;

/// Process lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Ready = 0,
    Running = 1,
    Blocked = 2,
    Finished = 3,
}

/// Atomic cell holding a [`State`], for cross-thread visibility without a
/// lock.
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(state: State) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> State {
        match self.0.load(Ordering::Acquire) {
            0 => State::Ready,
            1 => State::Running,
            2 => State::Blocked,
            _ => State::Finished,
        }
    }

    pub fn store(&self, state: State) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Cycle cost charged per access at each level of the memory hierarchy.
#[derive(Debug, Clone, Copy)]
pub struct MemWeights {
    pub cache: u64,
    pub primary: u64,
    pub secondary: u64,
}

impl Default for MemWeights {
    fn default() -> Self {
        Self {
            cache: 1,
            primary: 5,
            secondary: 10,
        }
    }
}

/// One entry of a per-process page table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageTableEntry {
    /// Physical frame number backing this page.
    pub frame: usize,
    /// Whether the page is resident.
    pub valid: bool,
    /// Whether the resident copy has been modified.
    pub dirty: bool,
}

/// Instrumentation counters accumulated over a process's lifetime.
///
/// All fields are atomics: stage threads, the memory hierarchy and the I/O
/// manager update them concurrently.
#[derive(Debug, Default)]
pub struct Counters {
    pub pipeline_cycles: AtomicU64,
    pub stage_invocations: AtomicU64,
    pub instructions_completed: AtomicU64,
    pub stall_events: AtomicU64,
    pub io_cycles: AtomicU64,

    pub mem_accesses_total: AtomicU64,
    pub mem_reads: AtomicU64,
    pub mem_writes: AtomicU64,
    pub memory_cycles: AtomicU64,

    pub cache_accesses: AtomicU64,
    pub cache_read_hits: AtomicU64,
    pub cache_read_misses: AtomicU64,
    pub cache_write_hits: AtomicU64,
    pub cache_write_misses: AtomicU64,

    pub primary_accesses: AtomicU64,
    pub secondary_accesses: AtomicU64,
}

/// Process Control Block.
///
/// Created at program-load time, registered in the global [`ProcessTable`],
/// shared by reference between the scheduler, the core workers, the pipeline
/// stages and the memory hierarchy. Freed (page table entries, frames and
/// swap slots) once it reaches Finished and its metrics were reported.
#[derive(Debug)]
pub struct Pcb {
    pub pid: u32,
    pub name: String,
    pub weights: MemWeights,

    /// Instructions the process may issue per dispatch (quantum policies).
    pub quantum: AtomicU32,
    /// Numerically smaller means more urgent.
    pub priority: AtomicU32,
    /// Lottery tickets.
    pub tickets: AtomicU32,
    /// Static instruction count of the loaded program.
    pub instructions: AtomicU32,

    /// Scheduler-clock timestamps.
    pub arrival: AtomicU64,
    pub start: AtomicU64,
    pub finish: AtomicU64,
    /// Total instructions issued across all dispatches.
    pub burst: AtomicU64,

    pub state: AtomicState,
    pub pc: Mutex<u32>,
    pub regs: Mutex<RegisterBank>,
    pub page_table: Mutex<HashMap<u32, PageTableEntry>>,
    pub cores_used: Mutex<Vec<usize>>,
    pub fault: Mutex<Option<MemoryError>>,
    pub program_output: Mutex<Vec<String>>,

    pub counters: Counters,
}

impl Pcb {
    pub fn new(pid: u32, name: &str, weights: MemWeights) -> Self {
        Self {
            pid,
            name: name.to_string(),
            weights,
            quantum: AtomicU32::new(0),
            priority: AtomicU32::new(0),
            tickets: AtomicU32::new(1),
            instructions: AtomicU32::new(0),
            arrival: AtomicU64::new(0),
            start: AtomicU64::new(TIMESTAMP_UNSET),
            finish: AtomicU64::new(0),
            burst: AtomicU64::new(0),
            state: AtomicState::new(State::Ready),
            pc: Mutex::new(0),
            regs: Mutex::new(RegisterBank::new()),
            page_table: Mutex::new(HashMap::new()),
            cores_used: Mutex::new(Vec::new()),
            fault: Mutex::new(None),
            program_output: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    /// Appends a line of program output (PRINT results).
    pub fn append_output(&self, line: String) {
        self.program_output.lock().unwrap().push(line);
    }

    /// Snapshot of the program output so far.
    pub fn snapshot_output(&self) -> Vec<String> {
        self.program_output.lock().unwrap().clone()
    }

    /// Records a fatal memory error; the first one wins.
    pub fn record_fault(&self, err: MemoryError) {
        let mut fault = self.fault.lock().unwrap();
        if fault.is_none() {
            *fault = Some(err);
        }
    }

    pub fn fault_message(&self) -> Option<String> {
        self.fault.lock().unwrap().as_ref().map(|e| e.to_string())
    }

    /// Records that a dispatch ran on the given core.
    pub fn record_core(&self, core_id: usize) {
        self.cores_used.lock().unwrap().push(core_id);
    }

    /// Total execution time: issued cycles plus weighted memory cycles plus
    /// I/O cycles.
    pub fn total_time(&self) -> u64 {
        self.burst.load(Ordering::Relaxed)
            + self.counters.memory_cycles.load(Ordering::Relaxed)
            + self.counters.io_cycles.load(Ordering::Relaxed)
    }

    /// Count of currently valid page table entries.
    pub fn resident_pages(&self) -> usize {
        self.page_table
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.valid)
            .count()
    }
}

/// Global process registry keyed by pid.
///
/// Owned by the simulator; its lifetime ends when the simulator shuts down.
#[derive(Debug, Default)]
pub struct ProcessTable {
    procs: Mutex<HashMap<u32, Arc<Pcb>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pcb: Arc<Pcb>) {
        self.procs.lock().unwrap().insert(pcb.pid, pcb);
    }

    pub fn get(&self, pid: u32) -> Option<Arc<Pcb>> {
        self.procs.lock().unwrap().get(&pid).cloned()
    }

    pub fn remove(&self, pid: u32) -> Option<Arc<Pcb>> {
        self.procs.lock().unwrap().remove(&pid)
    }

    pub fn all(&self) -> Vec<Arc<Pcb>> {
        let mut list: Vec<_> = self.procs.lock().unwrap().values().cloned().collect();
        list.sort_by_key(|p| p.pid);
        list
    }

    pub fn len(&self) -> usize {
        self.procs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_state_round_trip() {
        let s = AtomicState::new(State::Ready);
        assert_eq!(s.load(), State::Ready);
        s.store(State::Blocked);
        assert_eq!(s.load(), State::Blocked);
        s.store(State::Finished);
        assert_eq!(s.load(), State::Finished);
    }

    #[test]
    fn first_fault_wins() {
        let pcb = Pcb::new(1, "p1", MemWeights::default());
        pcb.record_fault(MemoryError::SegFault { addr: 0x100 });
        pcb.record_fault(MemoryError::OutOfSwap { pid: 1, page: 0 });
        assert!(pcb.fault_message().unwrap().contains("segmentation"));
    }

    #[test]
    fn table_registration() {
        let table = ProcessTable::new();
        let pcb = Arc::new(Pcb::new(3, "p3", MemWeights::default()));
        table.register(pcb);
        assert_eq!(table.len(), 1);
        assert!(table.get(3).is_some());
        assert!(table.remove(3).is_some());
        assert!(table.get(3).is_none());
    }
}
