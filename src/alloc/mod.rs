//! # Executable memory
//!
//! Every trampoline lives in its own block of whole pages. A block is written while read-write,
//! then flipped to read-execute before anyone can call into it, so no page is ever writable and
//! executable at once.
//!
//! Blocks are handed out by an [`ExecutableAllocator`], which counts how many of its blocks are
//! alive and can refuse to commit past a limit. [`global`] is the allocator used by
//! [`Thunk::new`](crate::Thunk::new).

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use log::{debug, warn};
use region::{Allocation, Protection};
use thiserror::Error;

/// Errors when committing or releasing executable memory
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The allocator already has as many live blocks as its limit allows
    #[error("executable block limit of {0} reached")]
    Exhausted(usize),
    /// The OS refused to map pages
    #[error("error reserving executable pages")]
    Reserve(#[source] region::Error),
    /// The OS refused to change page protection
    #[error("error setting executable page protection")]
    Protect(#[source] region::Error),
}

/// Lifecycle of an [`ExecutableBlock`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    /// Mapped read-write, payload not yet executable
    Writable,
    /// Mapped read-execute and callable
    Executable,
    /// Pages returned to the OS
    Released,
}

/// Source of executable blocks
pub struct ExecutableAllocator {
    /// Maximum number of live blocks
    limit: Option<usize>,
    /// Number of live blocks, shared with their tickets
    outstanding: Arc<AtomicUsize>,
}

impl ExecutableAllocator {
    /// Creates an allocator without a block limit
    pub fn new() -> Self {
        Self {
            limit: None,
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Creates an allocator that refuses to hold more than `limit` live blocks
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Returns the block limit, if any
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Returns the number of blocks committed by this allocator that have not been released
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Copies `code` into fresh pages and makes them executable
    ///
    /// On failure everything reserved so far is released again.
    pub fn commit(&self, code: &[u8]) -> Result<ExecutableBlock, AllocationError> {
        let ticket = self.ticket()?;
        let allocation =
            region::alloc(code.len().max(1), Protection::READ_WRITE).map_err(AllocationError::Reserve)?;

        let mut block = ExecutableBlock {
            allocation: Some(allocation),
            len: code.len(),
            state: BlockState::Writable,
            _ticket: ticket,
        };
        let base = block.as_ptr() as *mut u8;
        let reserved = block.reserved();

        // SAFETY: the allocation is at least `code.len()` bytes and currently writable
        unsafe {
            ptr::copy_nonoverlapping(code.as_ptr(), base, code.len());
            flush_instruction_cache(base, code.len());
            region::protect(base as *const u8, reserved, Protection::READ_EXECUTE)
                .map_err(AllocationError::Protect)?;
        }
        block.state = BlockState::Executable;

        debug!(
            "committed {} bytes of code at {:p} ({} reserved, {} outstanding)",
            code.len(),
            base,
            reserved,
            self.outstanding()
        );
        Ok(block)
    }

    /// Counts a new block against the limit
    fn ticket(&self) -> Result<Ticket, AllocationError> {
        let limit = self.limit;
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| match limit {
                Some(limit) if count >= limit => None,
                _ => Some(count + 1),
            })
            .map_err(|_| AllocationError::Exhausted(limit.unwrap_or(usize::MAX)))?;
        Ok(Ticket(self.outstanding.clone()))
    }
}

impl Default for ExecutableAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutableAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableAllocator")
            .field("limit", &self.limit)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// One live block counted by an allocator; uncounts it when dropped
struct Ticket(Arc<AtomicUsize>);

impl Drop for Ticket {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pages holding one piece of generated code
pub struct ExecutableBlock {
    /// Backing pages; `None` once released
    allocation: Option<Allocation>,
    /// Length of the payload
    len: usize,
    /// Current lifecycle state
    state: BlockState,
    /// Keeps the block counted by its allocator
    _ticket: Ticket,
}

// The block owns its pages; nothing in it is tied to the creating thread.
unsafe impl Send for ExecutableBlock {}
unsafe impl Sync for ExecutableBlock {}

impl ExecutableBlock {
    /// Start of the code, or null once released
    pub fn as_ptr(&self) -> *const u8 {
        self.allocation
            .as_ref()
            .map_or(ptr::null(), |allocation| allocation.as_ptr::<u8>())
    }

    /// Length of the code
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the block holds no code
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current lifecycle state
    pub fn state(&self) -> BlockState {
        self.state
    }

    /// Bytes actually mapped, a whole number of pages
    fn reserved(&self) -> usize {
        self.allocation.as_ref().map_or(0, Allocation::len)
    }

    /// Makes the pages writable again and returns them to the OS
    ///
    /// The pages are unmapped even if the protection change fails.
    pub fn release(mut self) -> Result<(), AllocationError> {
        self.teardown()
    }

    /// Shared by [`ExecutableBlock::release`] and `Drop`
    fn teardown(&mut self) -> Result<(), AllocationError> {
        let allocation = match self.allocation.take() {
            Some(allocation) => allocation,
            None => return Ok(()),
        };
        let executable = self.state == BlockState::Executable;
        self.state = BlockState::Released;

        debug!(
            "releasing {} bytes of code at {:p}",
            self.len,
            allocation.as_ptr::<u8>()
        );
        if executable {
            // SAFETY: the range is exactly the allocation, which is still mapped
            unsafe {
                region::protect(allocation.as_ptr::<u8>(), allocation.len(), Protection::READ_WRITE)
                    .map_err(AllocationError::Protect)?;
            }
        }
        Ok(())
    }
}

impl Drop for ExecutableBlock {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("failed to release executable block: {}", e);
        }
    }
}

impl fmt::Debug for ExecutableBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableBlock")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len)
            .field("state", &self.state)
            .finish()
    }
}

/// Makes freshly written code visible to instruction fetch
///
/// # Safety
///
/// `ptr..ptr + len` must be mapped.
#[cfg(windows)]
unsafe fn flush_instruction_cache(ptr: *const u8, len: usize) {
    use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    if FlushInstructionCache(GetCurrentProcess(), ptr.cast(), len) == 0 {
        warn!("FlushInstructionCache failed for {:p}", ptr);
    }
}

/// Makes freshly written code visible to instruction fetch
///
/// # Safety
///
/// `ptr..ptr + len` must be mapped.
#[cfg(all(target_arch = "arm", not(windows)))]
unsafe fn flush_instruction_cache(ptr: *const u8, len: usize) {
    extern "C" {
        fn __clear_cache(start: *mut std::ffi::c_char, end: *mut std::ffi::c_char);
    }
    let start = ptr as *mut std::ffi::c_char;
    __clear_cache(start, start.add(len));
}

/// x86 keeps instruction fetch coherent with stores
///
/// # Safety
///
/// Always safe; `unsafe` only to match the other targets.
#[cfg(not(any(windows, target_arch = "arm")))]
unsafe fn flush_instruction_cache(_ptr: *const u8, _len: usize) {}

lazy_static! {
    static ref POOL: ExecutableAllocator = ExecutableAllocator::new();
}

/// The process-wide allocator without a block limit
pub fn global() -> &'static ExecutableAllocator {
    &POOL
}

#[cfg(test)]
mod tests {
    use region::Protection;

    use super::{global, AllocationError, BlockState, ExecutableAllocator};

    /// `ret` on x86, `bx lr` on ARM
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    const RET: &[u8] = &[0xc3];
    /// `ret` on x86, `bx lr` on ARM
    #[cfg(target_arch = "arm")]
    const RET: &[u8] = &[0x1e, 0xff, 0x2f, 0xe1];

    #[test]
    /// Committed code is read-execute and holds the payload
    fn test_commit() {
        let _ = env_logger::builder().is_test(true).try_init();
        let allocator = ExecutableAllocator::new();
        let block = allocator.commit(RET).unwrap();

        assert_eq!(block.state(), BlockState::Executable);
        assert_eq!(block.len(), RET.len());
        let code = unsafe { std::slice::from_raw_parts(block.as_ptr(), block.len()) };
        assert_eq!(code, RET);

        let region = region::query(block.as_ptr()).unwrap();
        assert_eq!(region.protection(), Protection::READ_EXECUTE);

        let f: extern "C" fn() = unsafe { std::mem::transmute(block.as_ptr()) };
        f();
    }

    #[test]
    /// Releasing and dropping both return the block to the allocator
    fn test_outstanding() {
        let allocator = ExecutableAllocator::new();
        let blocks: Vec<_> = (0..4).map(|_| allocator.commit(RET).unwrap()).collect();
        assert_eq!(allocator.outstanding(), 4);

        let mut blocks = blocks.into_iter();
        blocks.next().unwrap().release().unwrap();
        assert_eq!(allocator.outstanding(), 3);

        drop(blocks);
        assert_eq!(allocator.outstanding(), 0);
    }

    #[test]
    /// The limit is enforced and frees up again after a release
    fn test_limit() {
        let none = ExecutableAllocator::with_limit(0);
        assert!(matches!(none.commit(RET), Err(AllocationError::Exhausted(0))));
        assert_eq!(none.outstanding(), 0);

        let one = ExecutableAllocator::with_limit(1);
        let block = one.commit(RET).unwrap();
        assert!(matches!(one.commit(RET), Err(AllocationError::Exhausted(1))));
        block.release().unwrap();
        assert!(one.commit(RET).is_ok());
    }

    #[test]
    /// The global allocator is shared and unlimited
    fn test_global() {
        assert!(std::ptr::eq(global(), global()));
        assert_eq!(global().limit(), None);
        let block = global().commit(RET).unwrap();
        assert!(!block.as_ptr().is_null());
    }
}
