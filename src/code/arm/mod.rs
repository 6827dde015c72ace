//! 32-bit ARM (A32) encoders
//!
//! Trampolines load their two addresses from a literal pool placed right after the code, so the
//! encoder collects instructions first and resolves the pc-relative loads once the pool's
//! position is known.

/// Core registers
#[allow(clippy::missing_docs_in_private_items, missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    Ip = 12,
    Sp = 13,
    Lr = 14,
    Pc = 15,
}

impl Reg {
    /// Register for argument slot `index` (r0-r3)
    pub fn argument(index: usize) -> Self {
        match index {
            0 => Self::R0,
            1 => Self::R1,
            2 => Self::R2,
            3 => Self::R3,
            _ => unreachable!("AAPCS has four argument registers"),
        }
    }

    /// Bit for this register in a register list
    pub const fn bit(self) -> u16 {
        1 << self as u8
    }
}

/// Either a finished instruction or a load from the literal pool
enum Item {
    /// Encoded instruction
    Word(u32),
    /// `ldr rd, [pc, #literal]`
    Load(Reg, usize),
}

/// Instruction stream with a trailing literal pool
#[derive(Default)]
pub struct Assembler {
    /// Instructions in order
    items: Vec<Item>,
    /// Literal pool words
    literals: Vec<u32>,
}

impl Assembler {
    /// Creates an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a word to the literal pool and returns its index
    pub fn literal(&mut self, value: u32) -> usize {
        self.literals.push(value);
        self.literals.len() - 1
    }

    /// `ldr rd, [pc, #literal]`
    pub fn ldr_literal(&mut self, rd: Reg, literal: usize) {
        self.items.push(Item::Load(rd, literal));
    }

    /// `push {regs}` (`stmdb sp!, {regs}`)
    pub fn push(&mut self, regs: u16) {
        self.word(0xe92d_0000 | regs as u32);
    }

    /// `pop {regs}` (`ldmia sp!, {regs}`)
    pub fn pop(&mut self, regs: u16) {
        self.word(0xe8bd_0000 | regs as u32);
    }

    /// `blx rm`
    pub fn blx(&mut self, rm: Reg) {
        self.word(0xe12f_ff30 | rm as u32);
    }

    /// `bx rm`
    pub fn bx(&mut self, rm: Reg) {
        self.word(0xe12f_ff10 | rm as u32);
    }

    /// `mov rd, rm`
    pub fn mov(&mut self, rd: Reg, rm: Reg) {
        self.word(0xe1a0_0000 | (rd as u32) << 12 | rm as u32);
    }

    /// `add sp, sp, #imm`
    pub fn add_sp(&mut self, imm: u8) {
        self.word(0xe28d_d000 | imm as u32);
    }

    /// Appends an encoded instruction
    fn word(&mut self, word: u32) {
        self.items.push(Item::Word(word));
    }

    /// Resolves literal loads and returns the little-endian bytes
    pub fn finish(self) -> Vec<u8> {
        let pool = self.items.len() * 4;
        let mut code = Vec::with_capacity(pool + self.literals.len() * 4);
        for (index, item) in self.items.iter().enumerate() {
            let word = match *item {
                Item::Word(word) => word,
                Item::Load(rd, literal) => {
                    // pc reads two instructions ahead
                    let offset = pool + literal * 4 - (index * 4 + 8);
                    debug_assert!(offset < 0x1000);
                    0xe59f_0000 | (rd as u32) << 12 | offset as u32
                }
            };
            code.extend_from_slice(&word.to_le_bytes());
        }
        for literal in &self.literals {
            code.extend_from_slice(&literal.to_le_bytes());
        }
        code
    }
}

/// Splits code back into little-endian words
#[cfg(test)]
pub(crate) fn words(code: &[u8]) -> Vec<u32> {
    code.chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}
