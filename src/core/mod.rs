//! Simulated CPU cores.
//!
//! A [`CpuCore`] is a worker thread with a single-slot mailbox. The
//! scheduler submits one process at a time; the worker runs it through the
//! pipeline engine until it yields, then parks the outcome for the scheduler
//! to reclaim.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::info;

use crate::mem::MemoryHierarchy;
use crate::process::Pcb;

/// The five-stage pipeline.
pub mod pipeline;

pub use pipeline::engine::BurstResult;

/// A finished dispatch waiting to be reclaimed by the scheduler.
pub struct CoreDone {
    pub pcb: Arc<Pcb>,
    pub result: BurstResult,
}

struct Mailbox {
    current: Option<Arc<Pcb>>,
    done: Option<CoreDone>,
    stop: bool,
}

struct CoreShared {
    id: usize,
    mailbox: Mutex<Mailbox>,
    cv: Condvar,
    mem: Arc<MemoryHierarchy>,
    enforce_quantum: bool,
}

/// One simulated execution unit.
pub struct CpuCore {
    shared: Arc<CoreShared>,
    handle: Option<JoinHandle<()>>,
}

impl CpuCore {
    /// Starts the core's worker thread.
    pub fn start(id: usize, mem: Arc<MemoryHierarchy>, enforce_quantum: bool) -> Self {
        let shared = Arc::new(CoreShared {
            id,
            mailbox: Mutex::new(Mailbox {
                current: None,
                done: None,
                stop: false,
            }),
            cv: Condvar::new(),
            mem,
            enforce_quantum,
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::spawn(move || worker_loop(worker));

        Self {
            shared,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Installs a process into the mailbox, waiting until the core is fully
    /// idle (no work in progress, no unclaimed outcome).
    pub fn submit(&self, pcb: Arc<Pcb>) {
        let mut mailbox = self.shared.mailbox.lock().unwrap();
        while !mailbox.stop && (mailbox.current.is_some() || mailbox.done.is_some()) {
            mailbox = self.shared.cv.wait(mailbox).unwrap();
        }
        if mailbox.stop {
            return;
        }
        mailbox.current = Some(pcb);
        self.shared.cv.notify_all();
    }

    /// True when the core has neither work in progress nor an outcome
    /// waiting to be reclaimed.
    pub fn is_idle(&self) -> bool {
        let mailbox = self.shared.mailbox.lock().unwrap();
        mailbox.current.is_none() && mailbox.done.is_none()
    }

    /// Claims the outcome of the last dispatch, if one is parked.
    pub fn take_done(&self) -> Option<CoreDone> {
        let mut mailbox = self.shared.mailbox.lock().unwrap();
        let done = mailbox.done.take();
        if done.is_some() {
            self.shared.cv.notify_all();
        }
        done
    }

    /// Stops the worker, waking it even with no work queued, and joins it.
    pub fn stop(&mut self) {
        {
            let mut mailbox = self.shared.mailbox.lock().unwrap();
            mailbox.stop = true;
            self.shared.cv.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpuCore {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<CoreShared>) {
    loop {
        let pcb = {
            let mut mailbox = shared.mailbox.lock().unwrap();
            loop {
                if let Some(pcb) = mailbox.current.clone() {
                    break pcb;
                }
                if mailbox.stop {
                    return;
                }
                mailbox = shared.cv.wait(mailbox).unwrap();
            }
        };

        info!("core {} running pid={}", shared.id, pcb.pid);
        let result = pipeline::engine::run(&pcb, &shared.mem, shared.id, shared.enforce_quantum);

        let mut mailbox = shared.mailbox.lock().unwrap();
        mailbox.current = None;
        mailbox.done = Some(CoreDone { pcb, result });
        shared.cv.notify_all();
    }
}
