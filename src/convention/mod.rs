//! # Convention
//!
//! One trampoline template per supported (architecture, ABI) pair.
//!
//! A template turns an [`ArgumentClassification`] plus two addresses, the self-pointer and the
//! selected dispatch routine, into machine code. Templates share two shapes:
//!
//! - **direct**: a general purpose argument register is still free. The self-pointer is loaded
//!   into it and the trampoline tail-jumps to the [`DispatchVariant::Trailing`] routine, which
//!   declares the self-pointer right after the real arguments.
//! - **spill**: every argument register is taken. The register arguments are moved onto the
//!   stack so they sit in front of the caller's stack arguments, and the trampoline calls a
//!   [`DispatchVariant::Displaced`] routine whose placeholders line its parameters up with the
//!   stack the trampoline just built.
//!
//! [`Native`] names the template for the target being built; building for a target without one
//! is a compile error.

use log::{trace, warn};

use crate::classify::{classify_signature, Abi, ArgumentClassification, Shape};
use crate::signature::{DispatchVariant, Displacement, Signature};

pub mod arm;
pub mod sysv64;
pub mod win64;
pub mod x86;

/// Generates trampolines for one calling convention
///
/// # Safety
///
/// The generated code must accept calls in the convention described by `ABI`, deliver the
/// arguments and self-pointer exactly where the dispatch routine chosen by [`Template::variant`]
/// expects them, and return to the caller with the stack and callee-saved registers restored.
pub unsafe trait Template {
    /// Rules used to classify signatures for this template
    const ABI: Abi;
    /// Placeholder count of the routine called by the spill shape
    const DISPLACEMENT: Displacement;

    /// Selects the dispatch routine the generated code calls
    fn variant(classification: &ArgumentClassification) -> DispatchVariant {
        match classification.shape() {
            Shape::Direct { .. } => DispatchVariant::Trailing,
            Shape::Spill => DispatchVariant::Displaced(Self::DISPLACEMENT),
        }
    }

    /// Generates the trampoline bytes
    ///
    /// - `this`: the self-pointer handed to the dispatch routine
    /// - `dispatch`: address of the routine selected by [`Template::variant`]
    fn generate(classification: &ArgumentClassification, this: usize, dispatch: usize) -> Vec<u8>;
}

/// A generated but not yet committed trampoline
#[derive(Clone, Debug)]
pub struct Trampoline {
    /// Classification the trampoline was generated from
    pub classification: ArgumentClassification,
    /// Dispatch routine the trampoline calls
    pub variant: DispatchVariant,
    /// Machine code
    pub code: Vec<u8>,
}

/// Classifies `S` under `T`, selects its dispatch routine and generates code bound to `this`
pub fn instantiate<T: Template, S: Signature>(this: usize) -> Trampoline {
    let classification = classify_signature::<S>(T::ABI);
    let variant = T::variant(&classification);
    trace!(
        "classified {} arguments for {:?}: {:?} via {:?}",
        classification.arguments.len(),
        T::ABI,
        classification.shape(),
        variant
    );
    if classification.shape() == Shape::Spill && classification.float_overflow() {
        warn!(
            "{} floating point arguments overflow the {:?} register file in a spilled trampoline; stack order is not adjusted for them",
            classification.arguments.iter().filter(|a| a.is_float()).count()
                - classification.float_registers,
            T::ABI
        );
    }
    let code = T::generate(&classification, this, S::dispatch(variant));
    Trampoline {
        classification,
        variant,
        code,
    }
}

#[cfg(all(target_arch = "x86_64", not(windows)))]
/// Template for the target being built
pub type Native = sysv64::SystemV64;
#[cfg(all(target_arch = "x86_64", windows))]
/// Template for the target being built
pub type Native = win64::Windows64;
#[cfg(all(target_arch = "x86", not(windows)))]
/// Template for the target being built
pub type Native = x86::X86SystemV;
#[cfg(all(target_arch = "x86", windows))]
/// Template for the target being built
pub type Native = x86::X86Windows;
#[cfg(all(target_arch = "arm", not(windows), armv7))]
/// Template for the target being built
pub type Native = arm::ArmV7;
#[cfg(all(target_arch = "arm", not(windows), not(armv7)))]
/// Template for the target being built
pub type Native = arm::ArmV6;

#[cfg(target_arch = "aarch64")]
compile_error!("libthunk has no trampoline template for 64-bit ARM yet");
#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    all(target_arch = "arm", not(windows))
)))]
compile_error!("libthunk has no trampoline template for this target");

/// Decodes x86 code, asserting every byte belongs to a valid instruction
#[cfg(test)]
pub(crate) fn decode(bitness: u32, code: &[u8]) -> Vec<iced_x86::Instruction> {
    use iced_x86::{Decoder, DecoderOptions};

    let instructions: Vec<_> = Decoder::with_ip(bitness, code, 0, DecoderOptions::NONE)
        .into_iter()
        .collect();
    assert!(instructions.iter().all(|i| !i.is_invalid()));
    assert_eq!(instructions.iter().map(|i| i.len()).sum::<usize>(), code.len());
    instructions
}
