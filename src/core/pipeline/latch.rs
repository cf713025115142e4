//! Single-token stage registers.
//!
//! Each inter-stage slot (IF/ID, ID/EX, EX/MEM, MEM/WB) is a bounded buffer
//! of capacity one, serialized by its own mutex and condition variable.
//! `stop` transitions a latch permanently into a drain state: a push finding
//! the slot occupied gives up instead of blocking, and a pop finding it empty
//! returns `None` so a waiting stage thread can exit. A stopped latch still
//! hands over a token already in the slot; stopping never discards work by
//! itself.

use std::sync::{Condvar, Mutex};

use super::token::PipelineToken;

struct Slot {
    token: Option<PipelineToken>,
    stopped: bool,
}

/// One-token buffer between two pipeline stages.
pub struct StageLatch {
    slot: Mutex<Slot>,
    cv: Condvar,
}

impl Default for StageLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StageLatch {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                token: None,
                stopped: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Stores a token, blocking while the slot is full. In the drain state a
    /// full slot refuses the token instead of blocking. Returns whether the
    /// token was delivered.
    pub fn push(&self, token: PipelineToken) -> bool {
        let mut slot = self.slot.lock().unwrap();
        loop {
            if slot.token.is_none() {
                slot.token = Some(token);
                self.cv.notify_all();
                return true;
            }
            if slot.stopped {
                return false;
            }
            slot = self.cv.wait(slot).unwrap();
        }
    }

    /// Takes the stored token, blocking while the slot is empty. Returns
    /// `None` once the latch is stopped and empty.
    pub fn pop(&self) -> Option<PipelineToken> {
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(token) = slot.token.take() {
                self.cv.notify_all();
                return Some(token);
            }
            if slot.stopped {
                return None;
            }
            slot = self.cv.wait(slot).unwrap();
        }
    }

    /// Discards any held instruction token and wakes waiters. A drain token
    /// survives a flush: it is the teardown signal, and its producer will
    /// not send another.
    pub fn flush(&self) {
        let mut slot = self.slot.lock().unwrap();
        if slot.token.as_ref().is_some_and(|t| !t.terminate) {
            slot.token = None;
        }
        self.cv.notify_all();
    }

    /// Enters the drain state and wakes waiters. The held token, if any,
    /// stays in place for the consumer.
    pub fn stop(&self) {
        let mut slot = self.slot.lock().unwrap();
        slot.stopped = true;
        self.cv.notify_all();
    }

    pub fn has_token(&self) -> bool {
        self.slot.lock().unwrap().token.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.slot.lock().unwrap().stopped
    }

    /// PC of the token currently held, if it carries one. Used by the
    /// watchdog to rewind after a forced reset.
    pub fn peek_pc(&self) -> Option<u32> {
        let slot = self.slot.lock().unwrap();
        slot.token
            .as_ref()
            .filter(|t| t.valid)
            .and_then(|t| t.data.as_ref())
            .map(|d| d.pc)
    }
}

/// The four inter-stage slots of one core's pipeline.
#[derive(Default)]
pub struct StageLatches {
    pub if_id: StageLatch,
    pub id_ex: StageLatch,
    pub ex_mem: StageLatch,
    pub mem_wb: StageLatch,
}

impl StageLatches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flushes the front of the pipeline (IF/ID and ID/EX) after a taken
    /// branch or jump.
    pub fn flush_front(&self) {
        self.if_id.flush();
        self.id_ex.flush();
    }

    pub fn flush_all(&self) {
        self.if_id.flush();
        self.id_ex.flush();
        self.ex_mem.flush();
        self.mem_wb.flush();
    }

    pub fn stop_all(&self) {
        self.if_id.stop();
        self.id_ex.stop();
        self.ex_mem.stop();
        self.mem_wb.stop();
    }

    /// True if any slot currently holds a token.
    pub fn any_token(&self) -> bool {
        self.if_id.has_token()
            || self.id_ex.has_token()
            || self.ex_mem.has_token()
            || self.mem_wb.has_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trip() {
        let latch = StageLatch::new();
        latch.push(PipelineToken::fetched(0x10, 0, 0xdead));
        let token = latch.pop().unwrap();
        assert!(token.valid);
        assert_eq!(token.data.unwrap().pc, 0x10);
    }

    #[test]
    fn pop_after_stop_returns_none_when_empty() {
        let latch = StageLatch::new();
        latch.stop();
        assert!(latch.pop().is_none());
    }

    #[test]
    fn stop_keeps_in_flight_token() {
        let latch = StageLatch::new();
        latch.push(PipelineToken::drain(true));
        latch.stop();
        let token = latch.pop().unwrap();
        assert!(token.terminate);
        assert!(token.program_ended);
        assert!(latch.pop().is_none());
    }

    #[test]
    fn flush_discards_token() {
        let latch = StageLatch::new();
        latch.push(PipelineToken::fetched(0, 0, 1));
        latch.flush();
        assert!(!latch.has_token());
    }

    #[test]
    fn flush_preserves_drain_token() {
        let latch = StageLatch::new();
        latch.push(PipelineToken::drain(false));
        latch.flush();
        let token = latch.pop().unwrap();
        assert!(token.terminate);
    }

    #[test]
    fn push_unblocks_blocked_popper() {
        let latch = std::sync::Arc::new(StageLatch::new());
        let consumer = {
            let latch = std::sync::Arc::clone(&latch);
            std::thread::spawn(move || latch.pop())
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        latch.push(PipelineToken::drain(false));
        let token = consumer.join().unwrap().unwrap();
        assert!(token.terminate);
    }
}
