//! Selection policies and scheduling-parameter assignment.
//!
//! Five policies are supported. FCFS and Round-Robin take the head of the
//! ready queue (Round-Robin relies on the pipeline enforcing the quantum);
//! SJF picks the smallest static instruction count, Priority the smallest
//! priority value, and Lottery draws proportionally to ticket counts.
//!
//! Parameter assignment uses fixed seeds so runs are reproducible: each
//! process draws its quantum from [5, 30] (seed 42+i) and its priority from
//! [0, 5] (seed 616+i); lottery tickets scale the instruction count into
//! [1, 20].

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::info;

use crate::process::Pcb;

const QUANTUM_MIN: u64 = 5;
const QUANTUM_MAX: u64 = 30;
const QUANTUM_SEED: u64 = 42;

const PRIORITY_MIN: u64 = 0;
const PRIORITY_MAX: u64 = 5;
const PRIORITY_SEED: u64 = 616;

const MIN_TICKETS: u32 = 1;
const MAX_TICKETS: u32 = 20;

/// Scheduling policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RoundRobin,
    Sjf,
    Lottery,
    Priority,
    Fcfs,
}

impl Algorithm {
    /// Maps a configuration integer to a policy. Unknown codes fall back to
    /// FCFS.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Algorithm::RoundRobin,
            1 => Algorithm::Sjf,
            2 => Algorithm::Lottery,
            3 => Algorithm::Priority,
            _ => Algorithm::Fcfs,
        }
    }

    /// Whether the pipeline enforces the per-process quantum under this
    /// policy.
    pub fn uses_quantum(self) -> bool {
        matches!(self, Algorithm::RoundRobin | Algorithm::Lottery)
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "Round-Robin",
            Algorithm::Sjf => "Shortest Job First",
            Algorithm::Lottery => "Lottery",
            Algorithm::Priority => "Priority",
            Algorithm::Fcfs => "First-Come First-Served",
        }
    }
}

/// Small deterministic PRNG (xorshift64*).
///
/// Deliberately not a crate dependency: the simulator pins seeds for
/// reproducible runs, and a replayable generator is all the lottery needs.
#[derive(Debug, Clone)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Uniform draw from the inclusive range [lo, hi].
    pub fn range(&mut self, lo: u64, hi: u64) -> u64 {
        debug_assert!(lo <= hi);
        lo + self.next_u64() % (hi - lo + 1)
    }
}

/// Assigns quanta, priorities and tickets according to the policy in use.
pub fn assign_parameters(algorithm: Algorithm, procs: &[Arc<Pcb>]) {
    match algorithm {
        Algorithm::RoundRobin | Algorithm::Sjf => set_quanta(procs),
        Algorithm::Lottery => {
            set_quanta(procs);
            set_tickets(procs);
        }
        Algorithm::Priority => set_priorities(procs),
        Algorithm::Fcfs => {}
    }
}

fn set_quanta(procs: &[Arc<Pcb>]) {
    for (i, pcb) in procs.iter().enumerate() {
        let mut rng = XorShift64::new(QUANTUM_SEED + i as u64);
        let quantum = rng.range(QUANTUM_MIN, QUANTUM_MAX) as u32;
        pcb.quantum.store(quantum, Ordering::Relaxed);
    }
}

fn set_priorities(procs: &[Arc<Pcb>]) {
    for (i, pcb) in procs.iter().enumerate() {
        let mut rng = XorShift64::new(PRIORITY_SEED + i as u64);
        let priority = rng.range(PRIORITY_MIN, PRIORITY_MAX) as u32;
        pcb.priority.store(priority, Ordering::Relaxed);
    }
}

fn set_tickets(procs: &[Arc<Pcb>]) {
    let max_instr = procs
        .iter()
        .map(|p| p.instructions.load(Ordering::Relaxed))
        .max()
        .unwrap_or(0);

    for pcb in procs {
        let tickets = if max_instr == 0 {
            MIN_TICKETS
        } else {
            let instr = pcb.instructions.load(Ordering::Relaxed) as f64;
            let scaled = (instr / max_instr as f64 * MAX_TICKETS as f64).round() as u32;
            scaled.clamp(MIN_TICKETS, MAX_TICKETS)
        };
        pcb.tickets.store(tickets, Ordering::Relaxed);
        info!(
            "tickets for {} -> {} (instructions={})",
            pcb.name,
            tickets,
            pcb.instructions.load(Ordering::Relaxed)
        );
    }
}

/// Removes and returns the next process to run, or `None` if the queue is
/// empty.
pub fn select(
    algorithm: Algorithm,
    ready: &mut VecDeque<Arc<Pcb>>,
    rng: &mut XorShift64,
) -> Option<Arc<Pcb>> {
    if ready.is_empty() {
        return None;
    }

    match algorithm {
        Algorithm::Fcfs | Algorithm::RoundRobin => ready.pop_front(),

        Algorithm::Sjf => {
            let mut best = 0;
            for (i, pcb) in ready.iter().enumerate() {
                if pcb.instructions.load(Ordering::Relaxed)
                    < ready[best].instructions.load(Ordering::Relaxed)
                {
                    best = i;
                }
            }
            ready.remove(best)
        }

        Algorithm::Priority => {
            let mut best = 0;
            for (i, pcb) in ready.iter().enumerate() {
                if pcb.priority.load(Ordering::Relaxed)
                    < ready[best].priority.load(Ordering::Relaxed)
                {
                    best = i;
                }
            }
            ready.remove(best)
        }

        Algorithm::Lottery => {
            let total: u64 = ready
                .iter()
                .map(|p| p.tickets.load(Ordering::Relaxed).max(1) as u64)
                .sum();
            let mut pick = rng.range(1, total);
            let mut winner = None;
            for (i, pcb) in ready.iter().enumerate() {
                let tickets = pcb.tickets.load(Ordering::Relaxed).max(1) as u64;
                if pick <= tickets {
                    winner = Some(i);
                    break;
                }
                pick -= tickets;
            }
            match winner {
                Some(i) => ready.remove(i),
                None => ready.pop_front(),
            }
        }
    }
}
