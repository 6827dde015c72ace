//! 32-bit x86 encoders

/// `push imm32`
pub fn push_imm32(code: &mut Vec<u8>, imm: u32) {
    code.push(0x68);
    code.extend_from_slice(&imm.to_le_bytes());
}

/// `mov eax, imm32`
pub fn mov_eax_imm32(code: &mut Vec<u8>, imm: u32) {
    code.push(0xb8);
    code.extend_from_slice(&imm.to_le_bytes());
}

/// `call eax`
pub fn call_eax(code: &mut Vec<u8>) {
    code.extend_from_slice(&[0xff, 0xd0]);
}

/// `sub esp, imm8`
pub fn sub_esp(code: &mut Vec<u8>, imm: i8) {
    code.extend_from_slice(&[0x83, 0xec, imm as u8]);
}

/// `add esp, imm8`
pub fn add_esp(code: &mut Vec<u8>, imm: i8) {
    code.extend_from_slice(&[0x83, 0xc4, imm as u8]);
}

/// `ret`, or `ret imm16` when the callee pops `pop` bytes of arguments
pub fn ret(code: &mut Vec<u8>, pop: u16) {
    if pop == 0 {
        code.push(0xc3);
    } else {
        code.push(0xc2);
        code.extend_from_slice(&pop.to_le_bytes());
    }
}
