//! The process scheduler and its queues.
//!
//! The scheduler owns three queues (Ready, Blocked, Finished), each behind
//! its own mutex, and never holds two at once. The main loop drains
//! unblocked processes back into Ready, reclaims idle cores, and dispatches
//! one ready process per pass onto an idle core via the configured policy.
//! Preemption is cooperative: the scheduler sets no flag; the pipeline
//! yields on its own when the quantum runs out, I/O blocks the process, or
//! the program ends.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{info, warn};

use crate::core::{CoreDone, CpuCore};
use crate::mem::{MemoryHierarchy, MemoryUsage};
use crate::process::io::IoManager;
use crate::process::{Pcb, State, TIMESTAMP_UNSET};

/// Selection policies, parameter assignment and the lottery PRNG.
pub mod policy;

pub use policy::Algorithm;

/// Sleep when both Ready and Blocked are momentarily empty but cores are
/// still busy.
const IDLE_SLEEP: Duration = Duration::from_millis(20);

/// Sleep between polls while work is pending on the cores.
const POLL_SLEEP: Duration = Duration::from_millis(2);

const LOTTERY_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// One sampled row of the memory-usage log, taken per reclaimed dispatch.
#[derive(Debug, Clone, Copy)]
pub struct UsageSample {
    pub event: u64,
    pub usage: MemoryUsage,
}

/// The scheduler: queues, clock, and the dispatch loop.
pub struct Scheduler {
    algorithm: Algorithm,
    ready: Mutex<VecDeque<Arc<Pcb>>>,
    blocked: Mutex<Vec<Arc<Pcb>>>,
    finished: Mutex<Vec<Arc<Pcb>>>,
    rng: Mutex<policy::XorShift64>,
    clock: AtomicU64,
    events: AtomicU64,
    samples: Mutex<Vec<UsageSample>>,
    total: usize,
}

impl Scheduler {
    /// Builds a scheduler over the loaded processes, assigning their
    /// scheduling parameters per the policy.
    pub fn new(algorithm: Algorithm, procs: &[Arc<Pcb>]) -> Self {
        policy::assign_parameters(algorithm, procs);
        Self {
            algorithm,
            ready: Mutex::new(procs.iter().cloned().collect()),
            blocked: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
            rng: Mutex::new(policy::XorShift64::new(LOTTERY_SEED)),
            clock: AtomicU64::new(0),
            events: AtomicU64::new(0),
            samples: Mutex::new(Vec::new()),
            total: procs.len(),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Runs every process to completion over the given cores.
    pub fn run(&self, cores: &[CpuCore], mem: &MemoryHierarchy, io: &IoManager) {
        info!(
            "scheduler start: {} process(es), {} core(s), policy {}",
            self.total,
            cores.len(),
            self.algorithm.name()
        );

        loop {
            let mut worked = self.move_unblocked();

            for core in cores {
                if let Some(done) = core.take_done() {
                    self.reclaim(done, mem, io);
                    worked = true;
                }
            }

            if self.finished_count() >= self.total {
                break;
            }

            if let Some(core) = cores.iter().find(|c| c.is_idle()) {
                if let Some(pcb) = self.select_next() {
                    pcb.state.store(State::Running);
                    let now = self.clock.load(Ordering::Relaxed);
                    let _ = pcb.start.compare_exchange(
                        TIMESTAMP_UNSET,
                        now,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                    info!(
                        "dispatch pid={} ({}) to core {} quantum={} priority={}",
                        pcb.pid,
                        pcb.name,
                        core.id(),
                        pcb.quantum.load(Ordering::Relaxed),
                        pcb.priority.load(Ordering::Relaxed),
                    );
                    core.submit(pcb);
                    worked = true;
                }
            }

            if !worked {
                let quiet = self.ready_is_empty() && self.blocked_is_empty();
                if quiet && cores.iter().all(|c| c.is_idle()) {
                    // Nothing queued, nothing running, nothing to reclaim:
                    // there is no work left to wait for.
                    warn!(
                        "scheduler idle with {}/{} processes finished, exiting",
                        self.finished_count(),
                        self.total
                    );
                    break;
                }
                std::thread::sleep(if quiet { IDLE_SLEEP } else { POLL_SLEEP });
            }
        }

        info!("all processes finished");
    }

    /// Moves every Blocked-queue process whose state returned to Ready back
    /// onto the ready queue. Returns true if anything moved.
    fn move_unblocked(&self) -> bool {
        let moved: Vec<Arc<Pcb>> = {
            let mut blocked = self.blocked.lock().unwrap();
            let mut moved = Vec::new();
            blocked.retain(|pcb| {
                if pcb.state.load() == State::Ready {
                    moved.push(Arc::clone(pcb));
                    false
                } else {
                    true
                }
            });
            moved
        };

        let any = !moved.is_empty();
        for pcb in moved {
            info!("pid={} unblocked, back to ready queue", pcb.pid);
            self.ready.lock().unwrap().push_back(pcb);
        }
        any
    }

    /// Applies the state transition of a reclaimed dispatch.
    fn reclaim(&self, done: CoreDone, mem: &MemoryHierarchy, io: &IoManager) {
        let CoreDone { pcb, result } = done;

        let now = self
            .clock
            .fetch_add(result.issued as u64, Ordering::Relaxed)
            + result.issued as u64;
        let event = self.events.fetch_add(1, Ordering::Relaxed) + 1;
        self.samples.lock().unwrap().push(UsageSample {
            event,
            usage: mem.usage(),
        });

        match pcb.state.load() {
            State::Blocked => {
                info!("pid={} blocked on I/O, handing to the I/O manager", pcb.pid);
                self.blocked.lock().unwrap().push(Arc::clone(&pcb));
                io.submit(pcb, result.io_requests);
            }
            State::Finished => {
                pcb.finish.store(now, Ordering::Relaxed);
                if let Some(fault) = pcb.fault_message() {
                    warn!("pid={} finished with error: {}", pcb.pid, fault);
                } else {
                    info!("pid={} finished", pcb.pid);
                }
                self.finished.lock().unwrap().push(pcb);
            }
            _ => {
                info!("pid={} quantum expired, back to ready queue", pcb.pid);
                pcb.state.store(State::Ready);
                self.ready.lock().unwrap().push_back(pcb);
            }
        }
    }

    fn select_next(&self) -> Option<Arc<Pcb>> {
        let mut ready = self.ready.lock().unwrap();
        let mut rng = self.rng.lock().unwrap();
        policy::select(self.algorithm, &mut ready, &mut rng)
    }

    fn finished_count(&self) -> usize {
        self.finished.lock().unwrap().len()
    }

    fn ready_is_empty(&self) -> bool {
        self.ready.lock().unwrap().is_empty()
    }

    fn blocked_is_empty(&self) -> bool {
        self.blocked.lock().unwrap().is_empty()
    }

    /// Finished processes, in completion order.
    pub fn finished(&self) -> Vec<Arc<Pcb>> {
        self.finished.lock().unwrap().clone()
    }

    /// The memory-usage rows sampled during the run.
    pub fn samples(&self) -> Vec<UsageSample> {
        self.samples.lock().unwrap().clone()
    }
}
