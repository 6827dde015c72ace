//! # Thunk
//!
//! A [`Thunk`] owns a closure together with the trampoline that makes it callable as a plain
//! function pointer. The closure is boxed first so its address, the self-pointer patched into the
//! trampoline, never moves for the lifetime of the handle.

use std::fmt;

use log::debug;

use crate::alloc::{self, AllocationError, ExecutableAllocator, ExecutableBlock};
use crate::classify::ArgumentClassification;
use crate::convention::{self, Native};
use crate::signature::{IntoClosure, Signature};

/// Heap cell the self-pointer refers to
pub(crate) struct Slot<'a, S: Signature> {
    /// Closure invoked by the dispatch routines
    pub(crate) closure: Box<S::Closure<'a>>,
}

/// A closure callable through a function pointer of type `S`
///
/// The pointer returned by [`Thunk::as_fn_ptr`] is valid until the thunk is dropped or released.
/// A panic escaping the closure aborts the process.
pub struct Thunk<'a, S: Signature> {
    /// Trampoline code; declared first so it is released before the closure
    block: ExecutableBlock,
    /// Closure behind the self-pointer
    slot: Box<Slot<'a, S>>,
    /// How `S` was mapped onto the native convention
    classification: ArgumentClassification,
}

impl<'a, S: Signature> Thunk<'a, S> {
    /// Creates a thunk in the global allocator
    pub fn new<F: IntoClosure<'a, S>>(closure: F) -> Result<Self, AllocationError> {
        Self::new_in(closure, alloc::global())
    }

    /// Creates a thunk in `allocator`
    pub fn new_in<F: IntoClosure<'a, S>>(
        closure: F,
        allocator: &ExecutableAllocator,
    ) -> Result<Self, AllocationError> {
        Self::from_boxed_in(closure.into_closure(), allocator)
    }

    /// Creates a thunk for an already boxed closure in the global allocator
    pub fn from_boxed(closure: Box<S::Closure<'a>>) -> Result<Self, AllocationError> {
        Self::from_boxed_in(closure, alloc::global())
    }

    /// Creates a thunk for an already boxed closure in `allocator`
    pub fn from_boxed_in(
        closure: Box<S::Closure<'a>>,
        allocator: &ExecutableAllocator,
    ) -> Result<Self, AllocationError> {
        let slot = Box::new(Slot { closure });
        let this = &*slot as *const Slot<'a, S> as usize;

        let trampoline = convention::instantiate::<Native, S>(this);
        let block = allocator.commit(&trampoline.code)?;
        debug!(
            "created thunk for {} at {:p}, self {:#x}, via {:?}",
            std::any::type_name::<S>(),
            block.as_ptr(),
            this,
            trampoline.variant
        );

        Ok(Self {
            block,
            slot,
            classification: trampoline.classification,
        })
    }

    /// Returns the trampoline as a function pointer
    ///
    /// # Safety
    ///
    /// The pointer must not be called after the thunk has been dropped or released, and must not
    /// be called while the closure is being called on another thread unless the closure tolerates
    /// that.
    pub unsafe fn as_fn_ptr(&self) -> S {
        S::from_code(self.block.as_ptr())
    }

    /// Start of the trampoline code
    pub fn as_ptr(&self) -> *const u8 {
        self.block.as_ptr()
    }

    /// How the signature was mapped onto the native convention
    pub fn classification(&self) -> &ArgumentClassification {
        &self.classification
    }

    /// Releases the trampoline, then drops the closure
    ///
    /// Dropping a thunk does the same but can only log a failure.
    pub fn release(self) -> Result<(), AllocationError> {
        let Self { block, slot, .. } = self;
        let result = block.release();
        drop(slot);
        result
    }
}

impl<S: Signature> fmt::Debug for Thunk<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thunk")
            .field("signature", &std::any::type_name::<S>())
            .field("code", &self.block)
            .field("this", &(&*self.slot as *const Slot<'_, S>))
            .field("shape", &self.classification.shape())
            .finish()
    }
}
