//! The per-dispatch pipeline engine.
//!
//! One call to [`run`] executes a process on a core until it yields: the
//! program ends, the quantum expires, an I/O request blocks it, or a memory
//! error kills it. Five stage threads run concurrently, linked by the
//! single-token latches; a watchdog thread guards liveness.
//!
//! Teardown is cooperative. Whoever decides to stop (fetch on quantum or
//! program end, a stage on error via the end flags, the watchdog on
//! livelock) arranges for a drain token to enter IF/ID; every stage forwards
//! it after leaving its loop, and write-back alone commits the
//! `program_ended` flag it carries.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};

use crate::isa::{Op, END_SENTINEL};
use crate::mem::MemoryHierarchy;
use crate::process::io::IoRequest;
use crate::process::{Pcb, State};

use super::control::{self, StageContext};
use super::hazards::{HazardUnit, LOAD_HAZARD_TIMEOUT};
use super::latch::StageLatches;
use super::token::PipelineToken;

/// Watchdog poll interval.
const WATCHDOG_POLL: Duration = Duration::from_millis(5);

/// Polls without progress before a stuck (non-idle) pipeline is reset.
const STUCK_ROUNDS_LIMIT: u32 = 3;

/// What one dispatch produced.
#[derive(Debug, Default)]
pub struct BurstResult {
    /// Instructions issued by fetch during this dispatch.
    pub issued: u32,
    /// I/O requests emitted; handed to the I/O manager if the process
    /// blocked.
    pub io_requests: Vec<IoRequest>,
}

/// Runs `proc` on the pipeline until it yields, and applies the resulting
/// state transition to the PCB.
pub fn run(
    proc: &Pcb,
    mem: &MemoryHierarchy,
    core_id: usize,
    enforce_quantum: bool,
) -> BurstResult {
    let latches = StageLatches::new();
    let hazards = HazardUnit::new();
    let io_requests = Mutex::new(Vec::new());
    let end_program = AtomicBool::new(false);
    let end_execution = AtomicBool::new(false);
    let progress = AtomicU64::new(0);
    let issued = AtomicU32::new(0);
    let stop_watchdog = AtomicBool::new(false);

    proc.record_core(core_id);

    let cx = StageContext {
        proc,
        mem,
        hazards: &hazards,
        latches: &latches,
        io_requests: &io_requests,
        end_program: &end_program,
        end_execution: &end_execution,
    };
    let cx = &cx;

    std::thread::scope(|s| {
        s.spawn(|| watchdog_loop(cx, &progress, &stop_watchdog));

        let fetch = s.spawn(|| fetch_loop(cx, &issued, &progress, enforce_quantum));
        let decode = s.spawn(|| decode_loop(cx, &progress));
        let execute = s.spawn(|| execute_loop(cx, &progress));
        let memory = s.spawn(|| memory_loop(cx, &progress));
        let writeback = s.spawn(|| writeback_loop(cx, &progress));

        let _ = fetch.join();
        let _ = decode.join();
        let _ = execute.join();
        let _ = memory.join();
        let _ = writeback.join();

        stop_watchdog.store(true, Ordering::Release);
    });

    let issued = issued.load(Ordering::Relaxed);
    proc.burst.fetch_add(issued as u64, Ordering::Relaxed);

    if end_program.load(Ordering::Acquire) || proc.fault_message().is_some() {
        proc.state.store(State::Finished);
    } else if proc.state.load() != State::Blocked {
        proc.state.store(State::Ready);
    }

    BurstResult {
        issued,
        io_requests: io_requests.into_inner().unwrap(),
    }
}

fn mark(progress: &AtomicU64) {
    progress.fetch_add(1, Ordering::Relaxed);
}

fn fetch_loop(cx: &StageContext, issued: &AtomicU32, progress: &AtomicU64, enforce_quantum: bool) {
    let mut drain_sent = false;
    loop {
        if cx.end_execution.load(Ordering::Acquire) {
            break;
        }
        if cx.end_program.load(Ordering::Acquire) {
            cx.latches.if_id.push(PipelineToken::drain(true));
            mark(progress);
            drain_sent = true;
            break;
        }

        let (word, epoch, pc) = match control::fetch_instruction(cx) {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!("pid={} fetch fault: {}", cx.proc.pid, err);
                cx.proc.record_fault(err);
                cx.end_program.store(true, Ordering::Release);
                cx.end_execution.store(true, Ordering::Release);
                break;
            }
        };

        // A branch resolved since this PC was sampled; refetch from the new
        // target instead of issuing a known-stale token.
        if cx.hazards.take_branch_taken() {
            continue;
        }

        if word == END_SENTINEL {
            // Let execute see the END and raise the program-ended flag, then
            // drain behind it.
            cx.latches.if_id.push(PipelineToken::fetched(pc, epoch, word));
            mark(progress);
            cx.latches.if_id.push(PipelineToken::drain(false));
            mark(progress);
            drain_sent = true;
            break;
        }

        if !cx.latches.if_id.push(PipelineToken::fetched(pc, epoch, word)) {
            // The latch is draining (watchdog recovery) and refused the
            // token. The instruction never entered the pipeline, so rewind
            // the PC and let the next dispatch refetch it.
            *cx.proc.pc.lock().unwrap() = pc;
            break;
        }
        mark(progress);

        let count = issued.fetch_add(1, Ordering::Relaxed) + 1;
        cx.proc
            .counters
            .pipeline_cycles
            .fetch_add(1, Ordering::Relaxed);

        if enforce_quantum && count >= cx.proc.quantum.load(Ordering::Relaxed) {
            debug!("pid={} quantum expired after {} issued", cx.proc.pid, count);
            cx.end_execution.store(true, Ordering::Release);
            break;
        }
    }

    if !drain_sent {
        let program_ended = cx.end_program.load(Ordering::Acquire);
        cx.latches.if_id.push(PipelineToken::drain(program_ended));
        mark(progress);
    }
}

fn decode_loop(cx: &StageContext, progress: &AtomicU64) {
    while let Some(mut token) = cx.latches.if_id.pop() {
        mark(progress);
        if token.terminate {
            cx.latches.id_ex.push(token);
            mark(progress);
            break;
        }
        if !token.valid {
            continue;
        }
        let Some(data) = token.data.as_mut() else {
            continue;
        };

        if data.epoch != cx.hazards.epoch() {
            // Stale token from before a flush. Any load hazard it might have
            // satisfied will never arrive; clear so decode cannot wedge.
            cx.hazards.clear_load(None);
            continue;
        }

        cx.proc
            .counters
            .stage_invocations
            .fetch_add(1, Ordering::Relaxed);
        control::decode(token.instruction, data);

        if data.epoch != cx.hazards.epoch() {
            continue;
        }

        if cx.hazards.load_conflicts(data) {
            cx.proc.counters.stall_events.fetch_add(1, Ordering::Relaxed);
            if !cx.hazards.wait_load_clear(data, LOAD_HAZARD_TIMEOUT) {
                warn!(
                    "pid={} load-use stall timed out at pc={:#x}",
                    cx.proc.pid, data.pc
                );
            }
        }

        if data.op == Op::Lw {
            if let Some(name) = data.target_reg {
                cx.hazards.mark_load(name);
            }
        }

        token.instruction = 0;
        cx.latches.id_ex.push(token);
        mark(progress);
    }
}

fn execute_loop(cx: &StageContext, progress: &AtomicU64) {
    while let Some(mut token) = cx.latches.id_ex.pop() {
        mark(progress);
        if token.terminate {
            cx.latches.ex_mem.push(token);
            mark(progress);
            break;
        }
        if !token.valid {
            continue;
        }
        let Some(data) = token.data.as_mut() else {
            continue;
        };

        if data.epoch != cx.hazards.epoch() {
            cx.hazards.clear_load(None);
            continue;
        }

        cx.proc
            .counters
            .stage_invocations
            .fetch_add(1, Ordering::Relaxed);

        if let Err(err) = control::execute(data, cx) {
            stage_fault(cx, "execute", err);
            continue;
        }

        cx.latches.ex_mem.push(token);
        mark(progress);
    }
}

fn memory_loop(cx: &StageContext, progress: &AtomicU64) {
    while let Some(mut token) = cx.latches.ex_mem.pop() {
        mark(progress);
        if token.terminate {
            cx.latches.mem_wb.push(token);
            mark(progress);
            break;
        }
        if !token.valid {
            continue;
        }
        let Some(data) = token.data.as_mut() else {
            continue;
        };

        cx.proc
            .counters
            .stage_invocations
            .fetch_add(1, Ordering::Relaxed);

        if let Err(err) = control::memory_access(data, cx) {
            stage_fault(cx, "memory", err);
            continue;
        }

        cx.latches.mem_wb.push(token);
        mark(progress);
    }
}

fn writeback_loop(cx: &StageContext, progress: &AtomicU64) {
    while let Some(token) = cx.latches.mem_wb.pop() {
        mark(progress);
        if token.terminate {
            if token.program_ended {
                cx.end_program.store(true, Ordering::Release);
            }
            break;
        }
        if !token.valid {
            continue;
        }
        let Some(data) = token.data.as_ref() else {
            continue;
        };

        cx.proc
            .counters
            .stage_invocations
            .fetch_add(1, Ordering::Relaxed);
        control::write_back(data, cx);
        cx.proc
            .counters
            .instructions_completed
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// A memory error inside a stage terminates the process: record it, raise
/// both end flags, and keep draining so the pipeline unwinds cleanly.
fn stage_fault(cx: &StageContext, stage: &str, err: crate::common::MemoryError) {
    warn!("pid={} {} fault: {}", cx.proc.pid, stage, err);
    cx.proc.record_fault(err);
    cx.hazards.clear_load(None);
    cx.end_program.store(true, Ordering::Release);
    cx.end_execution.store(true, Ordering::Release);
}

/// Liveness net: watches a progress counter bumped by every stage action.
///
/// An idle pipeline with no progress is drained (the process retries later);
/// a stuck pipeline with a token in flight is reset to that token's PC and
/// drained.
fn watchdog_loop(cx: &StageContext, progress: &AtomicU64, stop: &AtomicBool) {
    let mut last = progress.load(Ordering::Relaxed);
    let mut stuck_rounds: u32 = 0;

    while !stop.load(Ordering::Acquire) {
        std::thread::sleep(WATCHDOG_POLL);
        let now = progress.load(Ordering::Relaxed);

        if now != last {
            stuck_rounds = 0;
            last = now;
            continue;
        }
        stuck_rounds += 1;

        let ended =
            cx.end_execution.load(Ordering::Acquire) || cx.end_program.load(Ordering::Acquire);
        let idle = !cx.latches.any_token();

        if idle && !ended {
            warn!("pid={} watchdog: idle pipeline, draining", cx.proc.pid);
            cx.end_execution.store(true, Ordering::Release);
            cx.latches.if_id.push(PipelineToken::drain(false));
            mark(progress);
            cx.latches.stop_all();
        } else if !idle && stuck_rounds >= STUCK_ROUNDS_LIMIT && !ended {
            warn!("pid={} watchdog: stuck pipeline, resetting", cx.proc.pid);
            cx.hazards.clear_load(None);
            if let Some(pc) = cx.latches.if_id.peek_pc() {
                *cx.proc.pc.lock().unwrap() = pc;
            }
            cx.end_execution.store(true, Ordering::Release);
            cx.latches.flush_all();
            cx.latches
                .if_id
                .push(PipelineToken::drain(cx.end_program.load(Ordering::Acquire)));
            mark(progress);
            cx.latches.stop_all();
        }

        last = now;
    }
}
