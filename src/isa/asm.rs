//! Instruction word encoders.
//!
//! Small helpers for hand-assembling programs in demos and tests. Registers
//! are given by name and resolved through [`regs::index_of`]; unknown names
//! encode as register zero.

use super::{funct, opcodes, regs};

fn reg(name: &str) -> u32 {
    regs::index_of(name).unwrap_or(0)
}

fn rtype(f: u32, rd: &str, rs: &str, rt: &str) -> u32 {
    (opcodes::OP_RTYPE << 26) | (reg(rs) << 21) | (reg(rt) << 16) | (reg(rd) << 11) | f
}

fn itype(op: u32, rt: &str, rs: &str, imm: i16) -> u32 {
    (op << 26) | (reg(rs) << 21) | (reg(rt) << 16) | (imm as u16 as u32)
}

pub fn add(rd: &str, rs: &str, rt: &str) -> u32 {
    rtype(funct::ADD, rd, rs, rt)
}

pub fn sub(rd: &str, rs: &str, rt: &str) -> u32 {
    rtype(funct::SUB, rd, rs, rt)
}

pub fn mult(rd: &str, rs: &str, rt: &str) -> u32 {
    rtype(funct::MULT, rd, rs, rt)
}

pub fn div(rd: &str, rs: &str, rt: &str) -> u32 {
    rtype(funct::DIV, rd, rs, rt)
}

pub fn addi(rt: &str, rs: &str, imm: i16) -> u32 {
    itype(opcodes::OP_ADDI, rt, rs, imm)
}

pub fn slti(rt: &str, rs: &str, imm: i16) -> u32 {
    itype(opcodes::OP_SLTI, rt, rs, imm)
}

pub fn li(rt: &str, imm: i16) -> u32 {
    itype(opcodes::OP_LI, rt, "zero", imm)
}

pub fn lw(rt: &str, base: &str, offset: i16) -> u32 {
    itype(opcodes::OP_LW, rt, base, offset)
}

pub fn sw(rt: &str, base: &str, offset: i16) -> u32 {
    itype(opcodes::OP_SW, rt, base, offset)
}

pub fn la(rt: &str, base: &str, offset: i16) -> u32 {
    itype(opcodes::OP_LA, rt, base, offset)
}

/// Branch offset is in instruction words relative to the delay-less next PC.
pub fn beq(rs: &str, rt: &str, offset: i16) -> u32 {
    itype(opcodes::OP_BEQ, rt, rs, offset)
}

pub fn bne(rs: &str, rt: &str, offset: i16) -> u32 {
    itype(opcodes::OP_BNE, rt, rs, offset)
}

pub fn blt(rs: &str, rt: &str, offset: i16) -> u32 {
    itype(opcodes::OP_BLT, rt, rs, offset)
}

pub fn bgt(rs: &str, rt: &str, offset: i16) -> u32 {
    itype(opcodes::OP_BGT, rt, rs, offset)
}

/// Jump to an absolute byte address (26-bit field).
pub fn j(target: u32) -> u32 {
    (opcodes::OP_J << 26) | (target & 0x03ff_ffff)
}

/// PRINT the value of a register.
pub fn print_reg(rt: &str) -> u32 {
    (opcodes::OP_PRINT << 26) | (reg(rt) << 16)
}

/// PRINT the memory word at an absolute address.
pub fn print_addr(addr: u16) -> u32 {
    (opcodes::OP_PRINT << 26) | addr as u32
}

pub fn end() -> u32 {
    opcodes::OP_END << 26
}
