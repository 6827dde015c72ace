//! # 32-bit ARM
//!
//! AAPCS passes the first four words in r0-r3 and the rest on the stack, with the return address
//! in lr rather than on the stack. The spill shape pushes r0-r3 right below the caller's stack
//! arguments; since 64-bit values use even register pairs and 8-byte aligned stack slots, the
//! pushed block reads exactly like the argument list would if it had been passed on the stack.
//! ip and lr are pushed below it, becoming the fourth and fifth placeholders.
//!
//! ARMv6 and ARMv7 differ only in how the dispatch routine is called: v7 uses `blx ip`, v6 sets
//! up lr by hand before `bx ip`.

use crate::classify::{Abi, ArgumentClassification, Shape};
use crate::code::arm::{Assembler, Reg};
use crate::signature::Displacement;

use super::Template;

/// Argument classification rules for the target's float ABI
const ABI: Abi = Abi::Arm {
    hard_float: cfg!(target_abi = "eabihf"),
};

/// Generator for ARMv6 cores
pub struct ArmV6;
unsafe impl Template for ArmV6 {
    const ABI: Abi = ABI;
    const DISPLACEMENT: Displacement = Displacement::Five;

    fn generate(classification: &ArgumentClassification, this: usize, dispatch: usize) -> Vec<u8> {
        generate(classification, this, dispatch, |asm| {
            asm.mov(Reg::Lr, Reg::Pc);
            asm.bx(Reg::Ip);
        })
    }
}

/// Generator for ARMv7 cores
pub struct ArmV7;
unsafe impl Template for ArmV7 {
    const ABI: Abi = ABI;
    const DISPLACEMENT: Displacement = Displacement::Five;

    fn generate(classification: &ArgumentClassification, this: usize, dispatch: usize) -> Vec<u8> {
        generate(classification, this, dispatch, |asm| asm.blx(Reg::Ip))
    }
}

/// Shared ARM template; `call` emits a call through ip that returns to the next instruction
fn generate(
    classification: &ArgumentClassification,
    this: usize,
    dispatch: usize,
    call: impl FnOnce(&mut Assembler),
) -> Vec<u8> {
    let mut asm = Assembler::new();
    let this = asm.literal(this as u32);
    let dispatch = asm.literal(dispatch as u32);

    match classification.shape() {
        Shape::Direct { register } => {
            // loading pc interworks, so a Thumb dispatch routine is fine
            asm.ldr_literal(Reg::argument(register), this);
            asm.ldr_literal(Reg::Pc, dispatch);
        }
        Shape::Spill => {
            let arguments = Reg::R0.bit() | Reg::R1.bit() | Reg::R2.bit() | Reg::R3.bit();
            let saved = Reg::Ip.bit() | Reg::Lr.bit();

            asm.push(arguments);
            asm.push(saved);
            asm.ldr_literal(Reg::R0, this);
            asm.ldr_literal(Reg::Ip, dispatch);
            call(&mut asm);

            // r0/r1 and the VFP registers hold the return value
            asm.pop(saved);
            asm.add_sp(16);
            asm.bx(Reg::Lr);
        }
    }
    asm.finish()
}

#[cfg(test)]
mod tests {
    use crate::classify::{classify, Abi};
    use crate::code::arm::words;
    use crate::convention::Template;
    use crate::signature::{ArgClass, ArgType, Convention};

    use super::{ArmV6, ArmV7};

    /// Self-pointer used by the tests
    const THIS: usize = 0x1234_5678;
    /// Dispatch address used by the tests
    const DISPATCH: usize = 0x0abc_def1;

    /// `count` word-sized integers
    fn integers(count: usize) -> Vec<ArgType> {
        vec![
            ArgType {
                class: ArgClass::Integer,
                size: 4,
            };
            count
        ]
    }

    #[test]
    /// Direct shape loads the self-pointer and jumps through the literal pool
    fn test_direct() {
        let c = classify(&integers(2), Convention::C, Abi::Arm { hard_float: true });
        let expected = [0xe59f_2000, 0xe59f_f000, THIS as u32, DISPATCH as u32];
        assert_eq!(words(&ArmV7::generate(&c, THIS, DISPATCH)), expected);
        assert_eq!(words(&ArmV6::generate(&c, THIS, DISPATCH)), expected);
    }

    #[test]
    /// ARMv7 spill shape
    fn test_spill_v7() {
        let c = classify(&integers(4), Convention::C, Abi::Arm { hard_float: true });
        assert_eq!(
            words(&ArmV7::generate(&c, THIS, DISPATCH)),
            [
                0xe92d_000f, // push {r0-r3}
                0xe92d_5000, // push {ip, lr}
                0xe59f_0010, // ldr r0, [pc, #16]
                0xe59f_c010, // ldr ip, [pc, #16]
                0xe12f_ff3c, // blx ip
                0xe8bd_5000, // pop {ip, lr}
                0xe28d_d010, // add sp, sp, #16
                0xe12f_ff1e, // bx lr
                THIS as u32,
                DISPATCH as u32,
            ]
        );
    }

    #[test]
    /// ARMv6 spill shape sets lr by hand, pushing the literal pool one word further
    fn test_spill_v6() {
        let c = classify(&integers(5), Convention::C, Abi::Arm { hard_float: false });
        assert_eq!(
            words(&ArmV6::generate(&c, THIS, DISPATCH)),
            [
                0xe92d_000f, // push {r0-r3}
                0xe92d_5000, // push {ip, lr}
                0xe59f_0014, // ldr r0, [pc, #20]
                0xe59f_c014, // ldr ip, [pc, #20]
                0xe1a0_e00f, // mov lr, pc
                0xe12f_ff1c, // bx ip
                0xe8bd_5000, // pop {ip, lr}
                0xe28d_d010, // add sp, sp, #16
                0xe12f_ff1e, // bx lr
                THIS as u32,
                DISPATCH as u32,
            ]
        );
    }
}
