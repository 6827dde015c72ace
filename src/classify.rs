//! # Classify
//!
//! Maps a signature's arguments onto a calling convention's registers and stack slots.
//!
//! Classification is a pure function of the argument list, the convention and the [`Abi`]; it
//! never fails. Trampoline templates consume the result to decide between the "direct" shape
//! (a general purpose register is still free for the self-pointer) and the "spill" shape.

use crate::signature::{ArgType, Convention, Signature};

/// Register and stack rules of a supported (architecture, OS) pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Abi {
    /// x86-64 System V: rdi, rsi, rdx, rcx, r8, r9 and xmm0-xmm7
    SystemV64,
    /// x86-64 Windows: four positional slots (rcx/xmm0 .. r9/xmm3) plus 32 bytes of shadow space
    Windows64,
    /// 32-bit x86 cdecl/stdcall: everything on the stack
    X86,
    /// 32-bit ARM AAPCS: r0-r3, with s0-s15 for floats when `hard_float` is set
    Arm {
        /// Floating point arguments travel in VFP registers (`eabihf`)
        hard_float: bool,
    },
}

impl Abi {
    /// Machine word size in bytes
    pub const fn word_size(self) -> usize {
        match self {
            Self::SystemV64 | Self::Windows64 => 8,
            Self::X86 | Self::Arm { .. } => 4,
        }
    }

    /// Number of general purpose registers used for arguments
    pub const fn register_budget(self) -> usize {
        match self {
            Self::SystemV64 => 6,
            Self::Windows64 | Self::Arm { .. } => 4,
            Self::X86 => 0,
        }
    }

    /// Number of floating point argument registers, counted in the convention's allocation unit
    pub const fn float_budget(self) -> usize {
        match self {
            Self::SystemV64 => 8,
            Self::Windows64 => 4,
            Self::Arm { hard_float: true } => 16,
            Self::X86 | Self::Arm { hard_float: false } => 0,
        }
    }
}

/// Trampoline shape selected by a classification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// `register` is free and receives the self-pointer
    Direct {
        /// Index into the convention's argument registers
        register: usize,
    },
    /// Every argument register is taken; arguments are moved onto the stack
    Spill,
}

/// How a signature's arguments are passed under an [`Abi`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgumentClassification {
    /// Rules the arguments were classified against
    pub abi: Abi,
    /// Convention of the classified signature
    pub convention: Convention,
    /// Arguments in declaration order
    pub arguments: Vec<ArgType>,
    /// Arguments routed to general purpose registers
    pub integer_registers: usize,
    /// Arguments routed to floating point registers
    pub float_registers: usize,
    /// Index of the first general purpose argument register left free (the budget when exhausted)
    pub next_register: usize,
    /// General purpose argument registers available under `abi`
    pub register_budget: usize,
    /// Arguments passed on the stack
    pub stack_resident: usize,
    /// Stack slot size of each argument, at least one word even if passed in a register
    pub stack_slots: Vec<usize>,
    /// Sum of `stack_slots`
    pub stack_footprint: usize,
}

impl ArgumentClassification {
    /// Selects the trampoline shape
    pub fn shape(&self) -> Shape {
        if self.next_register < self.register_budget {
            Shape::Direct {
                register: self.next_register,
            }
        } else {
            Shape::Spill
        }
    }

    /// Returns whether the trampoline has to pop the caller's arguments
    pub fn callee_cleanup(&self) -> bool {
        self.convention == Convention::Stdcall && self.abi == Abi::X86
    }

    /// Returns whether some floating point arguments overflowed their register file
    ///
    /// Windows x64 slots are positional, so a float past the fourth slot is an ordinary stack
    /// argument there and never counts.
    pub fn float_overflow(&self) -> bool {
        if self.abi == Abi::Windows64 {
            return false;
        }
        let floats = self.arguments.iter().filter(|a| a.is_float()).count();
        floats > self.float_registers && self.abi.float_budget() > 0
    }
}

/// Classifies a signature type
pub fn classify_signature<S: Signature>(abi: Abi) -> ArgumentClassification {
    classify(S::ARGUMENTS, S::CONVENTION, abi)
}

/// Classifies an argument list
pub fn classify(arguments: &[ArgType], convention: Convention, abi: Abi) -> ArgumentClassification {
    let word = abi.word_size();
    let stack_slots: Vec<_> = arguments.iter().map(|a| stack_slot(a.size, word)).collect();
    let stack_footprint = stack_slots.iter().sum();

    let registers = match abi {
        Abi::SystemV64 => assign_system_v(arguments, abi),
        Abi::Windows64 => assign_windows(arguments, abi),
        Abi::X86 => Registers::default(),
        Abi::Arm { hard_float } => assign_arm(arguments, hard_float),
    };

    ArgumentClassification {
        abi,
        convention,
        arguments: arguments.to_vec(),
        integer_registers: registers.integer,
        float_registers: registers.float,
        next_register: registers.next,
        register_budget: abi.register_budget(),
        stack_resident: arguments.len() - registers.integer - registers.float,
        stack_slots,
        stack_footprint,
    }
}

/// Running register assignment
#[derive(Default)]
struct Registers {
    /// Arguments placed in general purpose registers
    integer: usize,
    /// Arguments placed in floating point registers
    float: usize,
    /// Next general purpose register
    next: usize,
}

/// Rounds `size` up to whole words, with a minimum of one word
fn stack_slot(size: usize, word: usize) -> usize {
    (size.max(word) + word - 1) / word * word
}

/// Integer and float classes fill their own register files independently
fn assign_system_v(arguments: &[ArgType], abi: Abi) -> Registers {
    let mut registers = Registers::default();
    let mut next_float = 0;
    for arg in arguments {
        if arg.is_float() {
            if next_float < abi.float_budget() {
                next_float += 1;
                registers.float += 1;
            }
        } else if arg.is_word_integer(abi.word_size()) && registers.next < abi.register_budget() {
            registers.next += 1;
            registers.integer += 1;
        }
    }
    registers
}

/// Each argument owns the slot at its position, whatever its class
fn assign_windows(arguments: &[ArgType], abi: Abi) -> Registers {
    let mut registers = Registers::default();
    for arg in arguments.iter().take(abi.register_budget()) {
        if arg.is_float() {
            registers.float += 1;
        } else if arg.is_word_integer(abi.word_size()) {
            registers.integer += 1;
        }
    }
    registers.next = arguments.len().min(abi.register_budget());
    registers
}

/// AAPCS core register allocation, with VFP allocation for hard-float floats
fn assign_arm(arguments: &[ArgType], hard_float: bool) -> Registers {
    const CORE: usize = 4;
    const VFP: usize = 16;

    let mut registers = Registers::default();
    let mut next_float = 0;
    for arg in arguments {
        let words = (arg.size + 3) / 4;
        if arg.is_float() && hard_float {
            // doubles take an even pair of single-precision registers
            let start = if words == 2 { (next_float + 1) & !1 } else { next_float };
            if start + words <= VFP {
                next_float = start + words;
                registers.float += 1;
            } else {
                next_float = VFP;
            }
            continue;
        }

        // 64-bit values take an even register pair
        let start = if words == 2 {
            (registers.next + 1) & !1
        } else {
            registers.next
        };
        if start + words <= CORE {
            registers.next = start + words;
            registers.integer += 1;
        } else {
            // once anything spills no later argument uses a core register
            registers.next = CORE;
        }
    }
    registers
}
