//! The hazard unit: forwarding tables, load-use marker and branch epoch.
//!
//! One instance lives per dispatch. The EX/MEM table carries ALU results not
//! yet written back, the MEM/WB table load results not yet written back; both
//! are keyed by register name. An entry exists exactly while its producer is
//! in flight, and write-back removes its own entries. Read-only registers
//! never enter the tables.
//!
//! The load-use marker holds the destination of an LW between decode and
//! memory-access. Decode blocks on it with a bounded wait: if the producing
//! load was flushed the stall self-clears after the timeout and the consumer
//! proceeds with a possibly stale value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use log::trace;

use crate::isa::regs;
use crate::process::Pcb;

use super::token::DecodedInstruction;

/// Upper bound on a decode-stage load-use stall.
pub const LOAD_HAZARD_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Default)]
struct ForwardTables {
    ex_mem: HashMap<&'static str, i32>,
    mem_wb: HashMap<&'static str, i32>,
}

/// Per-core hazard state shared by all five stage threads.
pub struct HazardUnit {
    tables: Mutex<ForwardTables>,
    load_marker: Mutex<Option<&'static str>>,
    load_cv: Condvar,
    epoch: AtomicU64,
    branch_taken: AtomicBool,
}

impl Default for HazardUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl HazardUnit {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(ForwardTables::default()),
            load_marker: Mutex::new(None),
            load_cv: Condvar::new(),
            epoch: AtomicU64::new(0),
            branch_taken: AtomicBool::new(false),
        }
    }

    /// Current branch epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Advances the epoch on a taken branch/jump; in-flight tokens carrying
    /// the old epoch become stale.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set_branch_taken(&self) {
        self.branch_taken.store(true, Ordering::Release);
    }

    /// Consumes the branch-taken flag; fetch uses it to abort a speculative
    /// fetch and retry from the new PC.
    pub fn take_branch_taken(&self) -> bool {
        self.branch_taken.swap(false, Ordering::AcqRel)
    }

    /// Reads a source register, preferring the EX/MEM table, then MEM/WB,
    /// then the register bank. Read-only registers bypass forwarding.
    pub fn read_with_forward(&self, name: &str, proc: &Pcb) -> i32 {
        let bank_value = proc.regs.lock().unwrap().read(name) as i32;
        if regs::is_read_only(name) {
            return bank_value;
        }

        let tables = self.tables.lock().unwrap();
        if let Some(&value) = tables.ex_mem.get(name) {
            trace!("fwd reg={} <- ALU value={}", name, value);
            return value;
        }
        if let Some(&value) = tables.mem_wb.get(name) {
            trace!("fwd reg={} <- LOAD value={}", name, value);
            return value;
        }
        bank_value
    }

    /// Publishes an ALU result produced at execute.
    pub fn publish_alu(&self, name: &'static str, value: i32) {
        if regs::is_read_only(name) {
            return;
        }
        self.tables.lock().unwrap().ex_mem.insert(name, value);
    }

    /// Publishes a load result produced at memory-access.
    pub fn publish_load(&self, name: &'static str, value: i32) {
        if regs::is_read_only(name) {
            return;
        }
        self.tables.lock().unwrap().mem_wb.insert(name, value);
    }

    /// Removes the retiring instruction's own entries at write-back.
    pub fn retire(&self, data: &DecodedInstruction) {
        let Some(name) = data.write_reg else {
            return;
        };
        let mut tables = self.tables.lock().unwrap();
        if data.alu_result.is_some() {
            tables.ex_mem.remove(name);
        }
        if data.load_result.is_some() {
            tables.mem_wb.remove(name);
        }
    }

    /// Arms the load-use marker for an LW's destination register.
    pub fn mark_load(&self, name: &'static str) {
        let mut marker = self.load_marker.lock().unwrap();
        *marker = Some(name);
    }

    /// Clears the marker. With a name, clears only if that register is the
    /// one marked; with `None`, clears unconditionally (flush paths).
    pub fn clear_load(&self, name: Option<&str>) {
        let mut marker = self.load_marker.lock().unwrap();
        if let (Some(expected), Some(current)) = (name, *marker) {
            if current != expected {
                return;
            }
        }
        *marker = None;
        self.load_cv.notify_all();
    }

    /// Whether the instruction in decode sources the marked register.
    pub fn load_conflicts(&self, data: &DecodedInstruction) -> bool {
        let marker = self.load_marker.lock().unwrap();
        match *marker {
            Some(name) => data.source_reg == Some(name) || data.target_reg == Some(name),
            None => false,
        }
    }

    /// Blocks until the marker no longer conflicts with `data`, or the
    /// timeout elapses. On timeout the marker self-clears and the caller
    /// proceeds with a possibly stale read; returns `false` in that case.
    pub fn wait_load_clear(&self, data: &DecodedInstruction, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut marker = self.load_marker.lock().unwrap();
        loop {
            let conflict = match *marker {
                Some(name) => data.source_reg == Some(name) || data.target_reg == Some(name),
                None => false,
            };
            if !conflict {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                *marker = None;
                self.load_cv.notify_all();
                return false;
            }
            let (guard, _) = self.load_cv.wait_timeout(marker, deadline - now).unwrap();
            marker = guard;
        }
    }
}
