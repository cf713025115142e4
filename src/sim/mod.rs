//! Simulation harness.
//!
//! [`Simulator`] owns the configuration, the memory hierarchy, the process
//! table and the loaded programs, and drives one run to completion: build
//! the scheduler, start the cores and the I/O manager, run the dispatch
//! loop, then tear everything down.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::info;

use crate::common::MemoryError;
use crate::config::SystemConfig;
use crate::core::CpuCore;
use crate::mem::MemoryHierarchy;
use crate::process::io::IoManager;
use crate::process::{MemWeights, Pcb, ProcessTable};
use crate::sched::{Scheduler, UsageSample};

/// Everything a finished run leaves behind for reporting.
pub struct SimOutcome {
    /// Finished processes, in completion order.
    pub finished: Vec<Arc<Pcb>>,
    /// Memory-usage rows sampled per reclaimed dispatch.
    pub samples: Vec<UsageSample>,
}

/// The simulator: composition root for one workload.
pub struct Simulator {
    config: SystemConfig,
    mem: Arc<MemoryHierarchy>,
    table: ProcessTable,
    procs: Vec<Arc<Pcb>>,
    next_pid: u32,
}

impl Simulator {
    pub fn new(config: SystemConfig) -> Self {
        let mem = Arc::new(MemoryHierarchy::new(&config));
        Self {
            config,
            mem,
            table: ProcessTable::new(),
            procs: Vec::new(),
            next_pid: 1,
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryHierarchy> {
        &self.mem
    }

    pub fn process_table(&self) -> &ProcessTable {
        &self.table
    }

    /// Creates a process and writes its program words into its address
    /// space, one instruction per word starting at `base`. The entry point
    /// is `base`.
    pub fn load_program(
        &mut self,
        name: &str,
        words: &[u32],
        base: u32,
    ) -> Result<Arc<Pcb>, MemoryError> {
        let weights = MemWeights {
            cache: self.config.cache.weight,
            primary: self.config.main_memory.weight,
            secondary: self.config.secondary_memory.weight,
        };

        let pid = self.next_pid;
        self.next_pid += 1;

        let pcb = Arc::new(Pcb::new(pid, name, weights));
        self.mem.register_process(Arc::clone(&pcb));
        self.table.register(Arc::clone(&pcb));

        for (i, word) in words.iter().enumerate() {
            self.mem
                .load_word(base + (i as u32) * 4, *word, &pcb)?;
        }

        *pcb.pc.lock().unwrap() = base;
        pcb.instructions.store(words.len() as u32, Ordering::Relaxed);

        info!(
            "loaded '{}' as pid={} ({} words at {:#x})",
            name,
            pid,
            words.len(),
            base
        );

        self.procs.push(Arc::clone(&pcb));
        Ok(pcb)
    }

    /// Writes a single data word into a process's address space before
    /// execution.
    pub fn preload_word(&self, pcb: &Pcb, addr: u32, value: u32) -> Result<(), MemoryError> {
        self.mem.load_word(addr, value, pcb)
    }

    /// Runs every loaded process to completion.
    pub fn run(&mut self) -> SimOutcome {
        let algorithm = self.config.scheduling.algorithm_kind();
        let scheduler = Scheduler::new(algorithm, &self.procs);
        let io = IoManager::start();

        let num_cores = self.config.cpu.cores.max(1);
        let mut cores: Vec<CpuCore> = (0..num_cores)
            .map(|i| CpuCore::start(i, Arc::clone(&self.mem), algorithm.uses_quantum()))
            .collect();

        scheduler.run(&cores, &self.mem, &io);

        for core in &mut cores {
            core.stop();
        }
        io.shutdown();

        SimOutcome {
            finished: scheduler.finished(),
            samples: scheduler.samples(),
        }
    }

    /// Frees the memory-hierarchy resources of every loaded process. Called
    /// after metrics have been reported; calling it again is a no-op.
    pub fn release_finished(&self) {
        for pcb in &self.procs {
            self.mem.free_process(pcb);
        }
    }
}
