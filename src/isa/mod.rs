//! Instruction Set Architecture definitions.
//!
//! The simulated ISA is a MIPS-like 32-bit set: the opcode lives in bits
//! 31-26, R-type operations use the `funct` field in bits 5-0, and I-type
//! instructions carry a 16-bit immediate that is sign-extended before use.
//! Unknown opcodes decode to [`Op::Unknown`] and flow through the pipeline as
//! no-ops.

/// Instruction word encoders for building test and demo programs.
pub mod asm;

/// Register bank addressed by textual MIPS register names.
pub mod regs;

/// Opcode values (instruction bits 31-26).
pub mod opcodes {
    pub const OP_RTYPE: u32 = 0x00;
    pub const OP_J: u32 = 0x02;
    pub const OP_BEQ: u32 = 0x04;
    pub const OP_BNE: u32 = 0x05;
    pub const OP_BGT: u32 = 0x07;
    pub const OP_ADDI: u32 = 0x08;
    pub const OP_BLT: u32 = 0x09;
    pub const OP_SLTI: u32 = 0x0a;
    pub const OP_LA: u32 = 0x0d;
    pub const OP_LI: u32 = 0x0f;
    pub const OP_PRINT: u32 = 0x10;
    pub const OP_LW: u32 = 0x23;
    pub const OP_SW: u32 = 0x2b;
    pub const OP_END: u32 = 0x3f;
}

/// R-type `funct` values (instruction bits 5-0).
pub mod funct {
    pub const ADD: u32 = 0x20;
    pub const SUB: u32 = 0x22;
    pub const MULT: u32 = 0x18;
    pub const DIV: u32 = 0x1a;
}

/// The END instruction word (opcode 0x3f, all other bits zero).
///
/// Doubles as the fill value for freshly allocated frames so that a fetch
/// from uninitialized memory halts the program cleanly.
pub const END_SENTINEL: u32 = 0xfc00_0000;

/// Decoded operator mnemonic.
///
/// `Addiu` and `Lui` remain executable but have no encoding of their own:
/// opcode 0x09 decodes as BLT and 0x0f as LI (the original assembler's
/// definitions win over the alternative readings of those opcodes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Op {
    Add,
    Sub,
    Mult,
    Div,
    Addi,
    Addiu,
    Slti,
    Lui,
    Li,
    Lw,
    Sw,
    La,
    Beq,
    Bne,
    Blt,
    Bgt,
    J,
    Print,
    End,
    #[default]
    Unknown,
}

impl Op {
    /// Classifies a raw instruction word into its mnemonic.
    pub fn classify(word: u32) -> Op {
        match opcode(word) {
            opcodes::OP_RTYPE => match word & 0x3f {
                funct::ADD => Op::Add,
                funct::SUB => Op::Sub,
                funct::MULT => Op::Mult,
                funct::DIV => Op::Div,
                _ => Op::Unknown,
            },
            opcodes::OP_J => Op::J,
            opcodes::OP_BEQ => Op::Beq,
            opcodes::OP_BNE => Op::Bne,
            opcodes::OP_BGT => Op::Bgt,
            opcodes::OP_ADDI => Op::Addi,
            opcodes::OP_BLT => Op::Blt,
            opcodes::OP_SLTI => Op::Slti,
            opcodes::OP_LA => Op::La,
            opcodes::OP_LI => Op::Li,
            opcodes::OP_PRINT => Op::Print,
            opcodes::OP_LW => Op::Lw,
            opcodes::OP_SW => Op::Sw,
            opcodes::OP_END => Op::End,
            _ => Op::Unknown,
        }
    }

    /// True for three-register arithmetic (writes rd).
    pub fn is_rtype(self) -> bool {
        matches!(self, Op::Add | Op::Sub | Op::Mult | Op::Div)
    }

    /// True for immediate arithmetic (writes rt).
    pub fn is_immediate(self) -> bool {
        matches!(self, Op::Addi | Op::Addiu | Op::Slti | Op::Lui | Op::Li)
    }

    /// True for conditional branches and jumps.
    pub fn is_control_flow(self) -> bool {
        matches!(self, Op::Beq | Op::Bne | Op::Blt | Op::Bgt | Op::J)
    }
}

/// Extracts the opcode field (bits 31-26).
pub fn opcode(word: u32) -> u32 {
    (word >> 26) & 0x3f
}

/// Extracts the rs field (bits 25-21).
pub fn rs_field(word: u32) -> u32 {
    (word >> 21) & 0x1f
}

/// Extracts the rt field (bits 20-16).
pub fn rt_field(word: u32) -> u32 {
    (word >> 16) & 0x1f
}

/// Extracts the rd field (bits 15-11).
pub fn rd_field(word: u32) -> u32 {
    (word >> 11) & 0x1f
}

/// Extracts the 16-bit immediate field.
pub fn imm16(word: u32) -> u16 {
    (word & 0xffff) as u16
}

/// Extracts the 26-bit jump target field.
pub fn target26(word: u32) -> u32 {
    word & 0x03ff_ffff
}

/// Sign-extends a 16-bit immediate to 32 bits.
pub fn sign_extend16(imm: u16) -> i32 {
    imm as i16 as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_rtype_by_funct() {
        assert_eq!(Op::classify(funct::ADD), Op::Add);
        assert_eq!(Op::classify(funct::SUB), Op::Sub);
        assert_eq!(Op::classify(funct::MULT), Op::Mult);
        assert_eq!(Op::classify(funct::DIV), Op::Div);
        assert_eq!(Op::classify(0x3f), Op::Unknown);
    }

    #[test]
    fn classify_end_sentinel() {
        assert_eq!(Op::classify(END_SENTINEL), Op::End);
    }

    #[test]
    fn unknown_opcode_is_noop_mnemonic() {
        assert_eq!(Op::classify(0x2c << 26), Op::Unknown);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend16(0x0007), 7);
        assert_eq!(sign_extend16(0xffff), -1);
        assert_eq!(sign_extend16(0x8000), -32768);
    }
}
