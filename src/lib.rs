#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod alloc;
pub mod classify;
pub mod code;
pub mod convention;
pub mod signature;
pub mod thunk;

pub use crate::alloc::{AllocationError, BlockState, ExecutableAllocator, ExecutableBlock};
pub use crate::classify::{Abi, ArgumentClassification, Shape};
pub use crate::signature::{Argument, Convention, IntoClosure, ReturnValue, Signature};
pub use crate::thunk::Thunk;
