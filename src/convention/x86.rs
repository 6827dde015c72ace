//! # 32-bit x86
//!
//! cdecl and stdcall pass everything on the stack, so the self-pointer is pushed and the
//! caller's return address becomes the last placeholder of a displaced dispatch routine, which
//! then finds the real arguments where the caller left them.
//!
//! The two OS variants differ only in the stack alignment they keep at the call: System V
//! (Linux, BSD, macOS) wants 16 bytes, Windows only 4, so Windows gets by with a single
//! placeholder.

use crate::classify::{Abi, ArgumentClassification, Shape};
use crate::code::x86;
use crate::signature::Displacement;

use super::Template;

/// Generator for the 32-bit System V ABI
pub struct X86SystemV;
unsafe impl Template for X86SystemV {
    const ABI: Abi = Abi::X86;
    const DISPLACEMENT: Displacement = Displacement::Three;

    fn generate(classification: &ArgumentClassification, this: usize, dispatch: usize) -> Vec<u8> {
        generate(classification, this, dispatch, Self::DISPLACEMENT)
    }
}

/// Generator for 32-bit Windows
pub struct X86Windows;
unsafe impl Template for X86Windows {
    const ABI: Abi = Abi::X86;
    const DISPLACEMENT: Displacement = Displacement::One;

    fn generate(classification: &ArgumentClassification, this: usize, dispatch: usize) -> Vec<u8> {
        generate(classification, this, dispatch, Self::DISPLACEMENT)
    }
}

/// Shared x86 template; `displacement` sets how much padding precedes the self-pointer
fn generate(
    classification: &ArgumentClassification,
    this: usize,
    dispatch: usize,
    displacement: Displacement,
) -> Vec<u8> {
    debug_assert_eq!(classification.shape(), Shape::Spill);

    let placeholders = displacement.placeholders() as i8;
    let mut code = Vec::with_capacity(24);
    if placeholders > 1 {
        x86::sub_esp(&mut code, (placeholders - 1) * 4);
    }
    x86::push_imm32(&mut code, this as u32);
    x86::mov_eax_imm32(&mut code, dispatch as u32);
    x86::call_eax(&mut code);
    x86::add_esp(&mut code, placeholders * 4);

    // dispatch routines are cdecl, so stdcall cleanup happens here
    let pop = if classification.callee_cleanup() {
        classification.stack_footprint as u16
    } else {
        0
    };
    x86::ret(&mut code, pop);
    code
}
