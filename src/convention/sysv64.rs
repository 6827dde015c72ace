//! # System V x86-64
//!
//! Integer arguments travel in rdi, rsi, rdx, rcx, r8, r9; floats in xmm0-xmm7. At entry rsp is
//! 8 modulo 16 with the return address on top and stack arguments right above it.

use crate::classify::{Abi, ArgumentClassification, Shape};
use crate::code::x64::{self, Gpr};
use crate::signature::Displacement;

use super::Template;

/// Integer argument registers in assignment order
const REGISTERS: [Gpr; 6] = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx, Gpr::R8, Gpr::R9];

/// Generator for the System V AMD64 ABI
pub struct SystemV64;
unsafe impl Template for SystemV64 {
    const ABI: Abi = Abi::SystemV64;
    const DISPLACEMENT: Displacement = Displacement::Seven;

    fn generate(classification: &ArgumentClassification, this: usize, dispatch: usize) -> Vec<u8> {
        let mut code = Vec::with_capacity(48);
        match classification.shape() {
            Shape::Direct { register } => {
                // self-pointer in the next free register, then tail-jump
                x64::mov_imm64(&mut code, REGISTERS[register], this as u64);
                x64::mov_imm64(&mut code, Gpr::R11, dispatch as u64);
                x64::jmp(&mut code, Gpr::R11);
            }
            Shape::Spill => {
                // Lift the return address off, push the six register arguments in reverse so
                // they read left to right in front of the caller's stack arguments, then push
                // the return address twice: once as a placeholder we restore from and once to
                // realign the stack to 16 bytes.
                x64::pop(&mut code, Gpr::Rax);
                for reg in REGISTERS.iter().rev() {
                    x64::push(&mut code, *reg);
                }
                x64::push(&mut code, Gpr::Rax);
                x64::push(&mut code, Gpr::Rax);

                // rdi plus five placeholders in registers, two more on the stack
                x64::mov_imm64(&mut code, Gpr::Rdi, this as u64);
                x64::mov_imm64(&mut code, Gpr::R11, dispatch as u64);
                x64::call(&mut code, Gpr::R11);

                // return value is in rax/rdx/xmm0, leave those alone
                x64::pop(&mut code, Gpr::Rdi);
                x64::add_rsp(&mut code, (REGISTERS.len() as i8 + 1) * 8);
                x64::push(&mut code, Gpr::Rdi);
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

    use super::SystemV64;

    /// Self-pointer used by the tests
    const THIS: usize = 0x1122_3344_5566_7788;
    /// Dispatch address used by the tests
    const DISPATCH: usize = 0x0102_0304_0506_0708;

    #[test]
    /// Five integer arguments leave r9 for the self-pointer
    fn test_direct() {
        let c = classify_signature::<extern "C" fn(i32, u64, *const u8, u8, f64, i16) -> i32>(
            SystemV64::ABI,
        );
        let code = SystemV64::generate(&c, THIS, DISPATCH);
        let instructions = decode(64, &code);

        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[0].mnemonic(), Mnemonic::Mov);
        assert_eq!(instructions[0].op0_register(), Register::R9);
        assert_eq!(instructions[0].immediate64(), THIS as u64);
        assert_eq!(instructions[1].op0_register(), Register::R11);
        assert_eq!(instructions[1].immediate64(), DISPATCH as u64);
        assert_eq!(instructions[2].mnemonic(), Mnemonic::Jmp);
        assert_eq!(instructions[2].op0_register(), Register::R11);
    }

    #[test]
    /// No arguments puts the self-pointer in rdi
    fn test_direct_empty() {
        let c = classify_signature::<extern "C" fn()>(SystemV64::ABI);
        let instructions = decode(64, &SystemV64::generate(&c, THIS, DISPATCH));
        assert_eq!(instructions[0].op0_register(), Register::RDI);
    }

    #[test]
    /// Six integer arguments spill into the displaced layout and undo it afterwards
    fn test_spill() {
        let c = classify_signature::<extern "C" fn(u64, u64, u64, u64, u64, u64) -> u64>(
            SystemV64::ABI,
        );
        let code = SystemV64::generate(&c, THIS, DISPATCH);
        let instructions = decode(64, &code);

        let summary: Vec<_> = instructions
            .iter()
            .map(|i| (i.mnemonic(), i.op0_register()))
            .collect();
        assert_eq!(
            summary,
            [
                (Mnemonic::Pop, Register::RAX),
                (Mnemonic::Push, Register::R9),
                (Mnemonic::Push, Register::R8),
                (Mnemonic::Push, Register::RCX),
                (Mnemonic::Push, Register::RDX),
                (Mnemonic::Push, Register::RSI),
                (Mnemonic::Push, Register::RDI),
                (Mnemonic::Push, Register::RAX),
                (Mnemonic::Push, Register::RAX),
                (Mnemonic::Mov, Register::RDI),
                (Mnemonic::Mov, Register::R11),
                (Mnemonic::Call, Register::R11),
                (Mnemonic::Pop, Register::RDI),
                (Mnemonic::Add, Register::RSP),
                (Mnemonic::Push, Register::RDI),
                (Mnemonic::Ret, Register::None),
            ]
        );
        assert_eq!(instructions[9].immediate64(), THIS as u64);
        assert_eq!(instructions[10].immediate64(), DISPATCH as u64);
        // one popped slot plus seven discarded ones mirror the eight pushes
        assert_eq!(instructions[13].immediate(1), 56);
    }
}
