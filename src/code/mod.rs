//! # Code
//!
//! Instruction encoders for each supported architecture. Encoders are plain byte producers and
//! work on any host, so every trampoline template can be generated and inspected anywhere.

pub mod arm;
pub mod x64;
pub mod x86;
