//! x86-64 encoders for the handful of instructions trampolines are built from

/// General purpose registers
#[allow(clippy::missing_docs_in_private_items, missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    /// Low three bits of the register number
    const fn low(self) -> u8 {
        self as u8 & 7
    }

    /// Returns whether the register needs a REX extension bit
    const fn extended(self) -> bool {
        self as u8 >= 8
    }
}

/// SSE register used for floating point arguments
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Xmm(pub u8);

/// `mov reg, imm64`
pub fn mov_imm64(code: &mut Vec<u8>, reg: Gpr, imm: u64) {
    code.push(0x48 | reg.extended() as u8);
    code.push(0xb8 + reg.low());
    code.extend_from_slice(&imm.to_le_bytes());
}

/// `push reg`
pub fn push(code: &mut Vec<u8>, reg: Gpr) {
    if reg.extended() {
        code.push(0x41);
    }
    code.push(0x50 + reg.low());
}

/// `pop reg`
pub fn pop(code: &mut Vec<u8>, reg: Gpr) {
    if reg.extended() {
        code.push(0x41);
    }
    code.push(0x58 + reg.low());
}

/// `call reg`
pub fn call(code: &mut Vec<u8>, reg: Gpr) {
    if reg.extended() {
        code.push(0x41);
    }
    code.extend_from_slice(&[0xff, 0xd0 | reg.low()]);
}

/// `jmp reg`
pub fn jmp(code: &mut Vec<u8>, reg: Gpr) {
    if reg.extended() {
        code.push(0x41);
    }
    code.extend_from_slice(&[0xff, 0xe0 | reg.low()]);
}

/// `sub rsp, imm8`
pub fn sub_rsp(code: &mut Vec<u8>, imm: i8) {
    code.extend_from_slice(&[0x48, 0x83, 0xec, imm as u8]);
}

/// `add rsp, imm8`
pub fn add_rsp(code: &mut Vec<u8>, imm: i8) {
    code.extend_from_slice(&[0x48, 0x83, 0xc4, imm as u8]);
}

/// `mov [rsp + disp8], reg`
pub fn store_rsp(code: &mut Vec<u8>, disp: i8, reg: Gpr) {
    // REX.W, plus REX.R for r8-r15
    code.push(0x48 | (reg.extended() as u8) << 2);
    code.extend_from_slice(&[0x89, 0x44 | reg.low() << 3, 0x24, disp as u8]);
}

/// `movq [rsp + disp8], xmm`
pub fn store_rsp_xmm(code: &mut Vec<u8>, disp: i8, reg: Xmm) {
    debug_assert!(reg.0 < 8);
    code.extend_from_slice(&[0x66, 0x0f, 0xd6, 0x44 | (reg.0 & 7) << 3, 0x24, disp as u8]);
}

/// `ret`
pub fn ret(code: &mut Vec<u8>) {
    code.push(0xc3);
}
