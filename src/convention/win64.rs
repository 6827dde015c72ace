//! # Windows x64
//!
//! Argument slots are positional: slot `k` travels in rcx/rdx/r8/r9 or xmm`k` depending on its
//! class, the rest are on the stack after 32 bytes of shadow space the caller reserved for us.
//! Every call we make has to reserve its own shadow space in turn.

use crate::classify::{Abi, ArgumentClassification, Shape};
use crate::code::x64::{self, Gpr, Xmm};
use crate::signature::Displacement;

use super::Template;

/// Integer argument registers by position
const REGISTERS: [Gpr; 4] = [Gpr::Rcx, Gpr::Rdx, Gpr::R8, Gpr::R9];

/// Size of the shadow space
const SHADOW: i8 = 32;

/// Generator for the Microsoft x64 ABI
pub struct Windows64;
unsafe impl Template for Windows64 {
    const ABI: Abi = Abi::Windows64;
    const DISPLACEMENT: Displacement = Displacement::Five;

    fn generate(classification: &ArgumentClassification, this: usize, dispatch: usize) -> Vec<u8> {
        let mut code = Vec::with_capacity(64);
        match classification.shape() {
            Shape::Direct { register } => {
                // the caller's shadow space and alignment carry over to the tail-jump
                x64::mov_imm64(&mut code, REGISTERS[register], this as u64);
                x64::mov_imm64(&mut code, Gpr::R11, dispatch as u64);
                x64::jmp(&mut code, Gpr::R11);
            }
            Shape::Spill => {
                // Home the register slots into the caller's shadow space so all arguments form
                // one array at [rsp + 8].
                for (slot, arg) in classification.arguments.iter().take(REGISTERS.len()).enumerate() {
                    let disp = 8 + 8 * slot as i8;
                    if arg.is_float() {
                        x64::store_rsp_xmm(&mut code, disp, Xmm(slot as u8));
                    } else {
                        x64::store_rsp(&mut code, disp, REGISTERS[slot]);
                    }
                }

                // Shadow space plus one slot keeps rsp 16-byte aligned at the call. The callee
                // sees: this, three register placeholders, the padding slot, our return address
                // as the fifth placeholder, then the homed arguments.
                x64::sub_rsp(&mut code, SHADOW + 8);
                x64::mov_imm64(&mut code, Gpr::Rcx, this as u64);
                x64::mov_imm64(&mut code, Gpr::R11, dispatch as u64);
                x64::call(&mut code, Gpr::R11);
                x64::add_rsp(&mut code, SHADOW + 8);
                x64::ret(&mut code);
            }
        }
        code
    }
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use iced_x86::{Mnemonic, Register};

    use crate::classify::classify_signature;
    use crate::convention::{decode, Template};

    use super::Windows64;

    /// Self-pointer used by the tests
    const THIS: usize = 0x1122_3344_5566_7788;
    /// Dispatch address used by the tests
    const DISPATCH: usize = 0x0102_0304_0506_0708;

    #[test]
    /// The self-pointer takes the register at the first free position
    fn test_direct() {
        let c = classify_signature::<extern "C" fn(f64, i32, *mut u8) -> i32>(Windows64::ABI);
        let instructions = decode(64, &Windows64::generate(&c, THIS, DISPATCH));

        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[0].op0_register(), Register::R9);
        assert_eq!(instructions[0].immediate64(), THIS as u64);
        assert_eq!(instructions[2].mnemonic(), Mnemonic::Jmp);
    }

    #[test]
    /// Register slots are homed by class before the call
    fn test_spill() {
        let c = classify_signature::<extern "C" fn(i32, f64, *const u8, f32, u64) -> u64>(
            Windows64::ABI,
        );
        let instructions = decode(64, &Windows64::generate(&c, THIS, DISPATCH));

        let homes: Vec<_> = instructions[..4]
            .iter()
            .map(|i| {
                assert_eq!(i.memory_base(), Register::RSP);
                (i.mnemonic(), i.op1_register(), i.memory_displacement64())
            })
            .collect();
        assert_eq!(
            homes,
            [
                (Mnemonic::Mov, Register::RCX, 8),
                (Mnemonic::Movq, Register::XMM1, 16),
                (Mnemonic::Mov, Register::R8, 24),
                (Mnemonic::Movq, Register::XMM3, 32),
            ]
        );

        let rest: Vec<_> = instructions[4..]
            .iter()
            .map(|i| (i.mnemonic(), i.op0_register()))
            .collect();
        assert_eq!(
            rest,
            [
                (Mnemonic::Sub, Register::RSP),
                (Mnemonic::Mov, Register::RCX),
                (Mnemonic::Mov, Register::R11),
                (Mnemonic::Call, Register::R11),
                (Mnemonic::Add, Register::RSP),
                (Mnemonic::Ret, Register::None),
            ]
        );
        assert_eq!(instructions[4].immediate(1), 40);
        assert_eq!(instructions[5].immediate64(), THIS as u64);
        assert_eq!(instructions[6].immediate64(), DISPATCH as u64);
    }
}
