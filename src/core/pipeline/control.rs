//! Per-stage instruction operations.
//!
//! These functions hold the ISA semantics: what fetch, decode, execute,
//! memory-access and write-back do to one [`DecodedInstruction`]. The engine
//! owns the threads and the drain discipline; everything here is called from
//! a stage thread with the shared [`StageContext`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::debug;

use crate::common::MemoryError;
use crate::isa::{self, regs, Op, END_SENTINEL};
use crate::mem::MemoryHierarchy;
use crate::process::io::IoRequest;
use crate::process::{Pcb, State};

use super::hazards::HazardUnit;
use super::latch::StageLatches;
use super::token::DecodedInstruction;

/// Shared state visible to every stage of one dispatch.
pub struct StageContext<'a> {
    pub proc: &'a Pcb,
    pub mem: &'a MemoryHierarchy,
    pub hazards: &'a HazardUnit,
    pub latches: &'a StageLatches,
    pub io_requests: &'a Mutex<Vec<IoRequest>>,
    pub end_program: &'a AtomicBool,
    pub end_execution: &'a AtomicBool,
}

/// Fetches the instruction at the current PC and advances it.
///
/// The PC lock spans the epoch capture, the memory read and the increment so
/// a concurrently taken branch cannot interleave. The PC does not advance
/// past the END sentinel.
pub fn fetch_instruction(cx: &StageContext) -> Result<(u32, u64, u32), MemoryError> {
    cx.proc
        .counters
        .stage_invocations
        .fetch_add(1, Ordering::Relaxed);

    let mut pc_guard = cx.proc.pc.lock().unwrap();
    let epoch = cx.hazards.epoch();
    let pc = *pc_guard;
    let word = cx.mem.read(pc, cx.proc)?;
    if word != END_SENTINEL {
        *pc_guard = pc.wrapping_add(4);
    }
    Ok((word, epoch, pc))
}

/// Decodes a raw word into the instruction record.
///
/// Register fields resolve to names; the write intent is recorded here so
/// forwarding lookups know the destination before execute runs.
pub fn decode(word: u32, data: &mut DecodedInstruction) {
    data.op = Op::classify(word);
    data.raw = word;

    match data.op {
        op if op.is_rtype() => {
            data.source_reg = regs::name_of(isa::rs_field(word));
            data.target_reg = regs::name_of(isa::rt_field(word));
            data.dest_reg = regs::name_of(isa::rd_field(word));
        }
        Op::Addi
        | Op::Addiu
        | Op::Slti
        | Op::Lui
        | Op::Li
        | Op::Lw
        | Op::Sw
        | Op::La
        | Op::Beq
        | Op::Bne
        | Op::Blt
        | Op::Bgt => {
            data.source_reg = regs::name_of(isa::rs_field(word));
            data.target_reg = regs::name_of(isa::rt_field(word));
            data.immediate = isa::sign_extend16(isa::imm16(word));
        }
        Op::J => {
            data.jump_target = isa::target26(word);
        }
        Op::Print => {
            // A nonzero rt makes it a register print; otherwise a nonzero
            // immediate names the memory word to print. Never both.
            if isa::rt_field(word) != 0 {
                data.target_reg = regs::name_of(isa::rt_field(word));
            } else if isa::imm16(word) != 0 {
                data.print_addr = Some(isa::imm16(word) as u32);
            }
        }
        Op::End | Op::Unknown => {}
        _ => {}
    }

    if data.op.is_rtype() {
        data.write_reg = data.dest_reg;
    } else if data.op.is_immediate() || matches!(data.op, Op::Lw | Op::La) {
        data.write_reg = data.target_reg;
    }
}

/// Executes one instruction: ALU work, branch resolution, address
/// generation, and the register path of PRINT.
pub fn execute(data: &mut DecodedInstruction, cx: &StageContext) -> Result<(), MemoryError> {
    match data.op {
        Op::End => {
            cx.end_program.store(true, Ordering::Release);
        }

        Op::Lw => {
            if let Some(target) = data.target_reg {
                data.effective_address = Some(effective_address(data, cx));
                data.pending_load = true;
                data.write_reg = Some(target);
            }
        }

        Op::Sw => {
            if let Some(target) = data.target_reg {
                data.effective_address = Some(effective_address(data, cx));
                data.store_value = cx.hazards.read_with_forward(target, cx.proc);
                data.pending_store = true;
            }
        }

        Op::La => {
            if let Some(target) = data.target_reg {
                let addr = effective_address(data, cx);
                data.effective_address = Some(addr);
                data.alu_result = Some(addr as i32);
                data.write_reg = Some(target);
                cx.hazards.publish_alu(target, addr as i32);
            }
        }

        Op::Addi | Op::Addiu => {
            if let Some(target) = data.target_reg {
                let rs = read_source(data, cx);
                let result = rs.wrapping_add(data.immediate);
                finish_alu(data, cx, target, result);
            }
        }

        Op::Slti => {
            if let Some(target) = data.target_reg {
                let rs = read_source(data, cx);
                finish_alu(data, cx, target, (rs < data.immediate) as i32);
            }
        }

        Op::Lui => {
            if let Some(target) = data.target_reg {
                let value = ((data.immediate as u16 as u32) << 16) as i32;
                finish_alu(data, cx, target, value);
            }
        }

        Op::Li => {
            if let Some(target) = data.target_reg {
                finish_alu(data, cx, target, data.immediate);
            }
        }

        op if op.is_rtype() => {
            let (Some(rs), Some(rt), Some(rd)) = (data.source_reg, data.target_reg, data.dest_reg)
            else {
                return Ok(());
            };
            let a = cx.hazards.read_with_forward(rs, cx.proc);
            let b = cx.hazards.read_with_forward(rt, cx.proc);
            let result = match op {
                Op::Add => a.wrapping_add(b),
                Op::Sub => a.wrapping_sub(b),
                Op::Mult => a.wrapping_mul(b),
                Op::Div => {
                    if b == 0 {
                        0
                    } else {
                        a.wrapping_div(b)
                    }
                }
                _ => 0,
            };
            finish_alu(data, cx, rd, result);
        }

        op if op.is_control_flow() => {
            execute_branch(data, cx);
        }

        Op::Print => {
            if let Some(name) = data.target_reg {
                let value = cx.hazards.read_with_forward(name, cx.proc);
                emit_io(cx, value);
            }
        }

        Op::Unknown => {}
        _ => {}
    }
    Ok(())
}

/// Memory-access stage: completes loads and stores, and the memory-word
/// path of PRINT.
pub fn memory_access(data: &mut DecodedInstruction, cx: &StageContext) -> Result<(), MemoryError> {
    if data.pending_load {
        if let (Some(addr), Some(name)) = (data.effective_address, data.write_reg) {
            let value = cx.mem.read(addr, cx.proc)? as i32;
            data.load_result = Some(value);
            data.pending_load = false;
            cx.hazards.publish_load(name, value);
            cx.hazards.clear_load(Some(name));
        }
    }

    if data.pending_store {
        if let Some(addr) = data.effective_address {
            cx.mem.write(addr, data.store_value as u32, cx.proc)?;
            data.pending_store = false;
        }
    }

    if data.op == Op::Print && data.target_reg.is_none() {
        if let Some(addr) = data.print_addr {
            let value = cx.mem.read(addr, cx.proc)? as i32;
            emit_io(cx, value);
        }
    }

    Ok(())
}

/// Write-back stage: commits the register write and retires the forwarding
/// entries this instruction published.
pub fn write_back(data: &DecodedInstruction, cx: &StageContext) {
    let Some(name) = data.write_reg else {
        return;
    };
    let Some(value) = data.load_result.or(data.alu_result) else {
        return;
    };
    cx.proc.regs.lock().unwrap().write(name, value as u32);
    cx.hazards.retire(data);
}

fn read_source(data: &DecodedInstruction, cx: &StageContext) -> i32 {
    match data.source_reg {
        Some(name) => cx.hazards.read_with_forward(name, cx.proc),
        None => 0,
    }
}

fn effective_address(data: &DecodedInstruction, cx: &StageContext) -> u32 {
    let base = read_source(data, cx);
    (base as u32).wrapping_add(data.immediate as u32)
}

fn finish_alu(data: &mut DecodedInstruction, cx: &StageContext, target: &'static str, value: i32) {
    data.write_reg = Some(target);
    data.alu_result = Some(value);
    cx.hazards.publish_alu(target, value);
}

fn execute_branch(data: &DecodedInstruction, cx: &StageContext) {
    let taken = match data.op {
        Op::J => true,
        _ => {
            let a = read_source(data, cx);
            let b = match data.target_reg {
                Some(name) => cx.hazards.read_with_forward(name, cx.proc),
                None => 0,
            };
            match data.op {
                Op::Beq => a == b,
                Op::Bne => a != b,
                Op::Blt => a < b,
                Op::Bgt => a > b,
                _ => false,
            }
        }
    };

    if !taken {
        return;
    }

    // The PC rewrite, the epoch bump and the front flush happen under the PC
    // lock so fetch cannot slip a stale-PC token in with the new epoch.
    let mut pc_guard = cx.proc.pc.lock().unwrap();
    let epoch = cx.hazards.bump_epoch();
    let target = if data.op == Op::J {
        data.jump_target
    } else {
        data.pc
            .wrapping_add(4)
            .wrapping_add((data.immediate << 2) as u32)
    };
    *pc_guard = target;
    cx.hazards.set_branch_taken();
    cx.latches.flush_front();
    cx.hazards.clear_load(None);
    debug!(
        "pid={} taken {:?} at pc={:#x} -> {:#x} epoch={}",
        cx.proc.pid, data.op, data.pc, target, epoch
    );
}

fn emit_io(cx: &StageContext, value: i32) {
    let message = value.to_string();
    cx.proc.append_output(message.clone());
    cx.io_requests.lock().unwrap().push(IoRequest {
        message,
        pid: cx.proc.pid,
    });

    // I/O blocks the process: drain after the in-flight work completes.
    cx.proc.state.store(State::Blocked);
    cx.end_execution.store(true, Ordering::Release);
}
