//! I/O requests and the manager thread that drains them.
//!
//! A PRINT instruction produces an [`IoRequest`] and blocks its process. The
//! core worker hands the blocked PCB and its pending requests to the
//! [`IoManager`], whose thread drains the queue and moves the PCB back to
//! Ready. The scheduler picks it up from the blocked queue on its next pass.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::info;

use crate::process::{Pcb, State};

/// One pending I/O operation.
#[derive(Debug, Clone)]
pub struct IoRequest {
    pub message: String,
    pub pid: u32,
}

struct IoQueue {
    pending: VecDeque<(Arc<Pcb>, Vec<IoRequest>)>,
    stop: bool,
}

struct IoShared {
    queue: Mutex<IoQueue>,
    cv: Condvar,
}

/// Background thread that services blocked processes' I/O.
pub struct IoManager {
    shared: Arc<IoShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IoManager {
    /// Starts the manager thread.
    pub fn start() -> Self {
        let shared = Arc::new(IoShared {
            queue: Mutex::new(IoQueue {
                pending: VecDeque::new(),
                stop: false,
            }),
            cv: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::spawn(move || loop {
            let entry = {
                let mut queue = worker.queue.lock().unwrap();
                loop {
                    if let Some(entry) = queue.pending.pop_front() {
                        break Some(entry);
                    }
                    if queue.stop {
                        break None;
                    }
                    queue = worker.cv.wait(queue).unwrap();
                }
            };

            let Some((pcb, requests)) = entry else {
                break;
            };

            for request in &requests {
                info!("io pid={} -> {}", request.pid, request.message);
                pcb.counters.io_cycles.fetch_add(1, Ordering::Relaxed);
            }

            // The process waited for its I/O; it becomes eligible again and
            // the scheduler will move it out of the blocked queue.
            pcb.state.store(State::Ready);
            info!("io pid={} unblocked after {} request(s)", pcb.pid, requests.len());
        });

        Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queues a blocked process's pending requests for servicing.
    pub fn submit(&self, pcb: Arc<Pcb>, requests: Vec<IoRequest>) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.pending.push_back((pcb, requests));
        self.shared.cv.notify_one();
    }

    /// Stops the manager thread after the queue drains.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.stop = true;
            self.shared.cv.notify_all();
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MemWeights;

    #[test]
    fn drains_and_unblocks() {
        let manager = IoManager::start();
        let pcb = Arc::new(Pcb::new(9, "io-proc", MemWeights::default()));
        pcb.state.store(State::Blocked);
        pcb.append_output("42".to_string());

        manager.submit(
            Arc::clone(&pcb),
            vec![IoRequest {
                message: "42".to_string(),
                pid: 9,
            }],
        );

        // The worker sets the state back to Ready once the request drains.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while pcb.state.load() != State::Ready {
            assert!(std::time::Instant::now() < deadline, "io manager stalled");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(pcb.counters.io_cycles.load(Ordering::Relaxed), 1);
        manager.shutdown();
    }
}
