//! # Stack Arena
//!
//! Task stacks are carved out of one fixed region, from its top downwards,
//! in creation order. Regions are 8-byte aligned (AAPCS) and never handed
//! back, so two tasks can never share stack memory.

use crate::error::{KernelError, Result};

const STACK_ALIGN: usize = 8;

/// A stack region handed to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    /// Exclusive upper end; the first push lands just below it.
    pub top: *mut u32,
    /// Size in bytes after rounding up to the stack alignment.
    pub size: usize,
}

/// Downward-growing bump allocator over a static memory region.
pub struct StackArena {
    base: *mut u8,
    next_top: *mut u8,
}

// Safety: the arena only hands out disjoint sub-regions of memory it was
// given exclusive use of, and lives inside the critical-section-guarded
// kernel context.
unsafe impl Send for StackArena {}

impl StackArena {
    /// An arena with no memory; every carve fails.
    pub const fn empty() -> Self {
        Self {
            base: core::ptr::null_mut(),
            next_top: core::ptr::null_mut(),
        }
    }

    /// Manage `len` bytes starting at `base`.
    ///
    /// # Safety
    /// The region must be valid for writes for as long as any task created
    /// from it can run, and must not be used by anything else.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        let end = base as usize + len;
        let aligned_end = end & !(STACK_ALIGN - 1);
        Self {
            base,
            next_top: base.wrapping_add(aligned_end - base as usize),
        }
    }

    /// Bytes still available for new stacks.
    pub fn remaining(&self) -> usize {
        (self.next_top as usize).saturating_sub(self.base as usize)
    }

    /// Take the next `size` bytes (rounded up to 8) below the previous
    /// region.
    pub fn carve(&mut self, size: usize) -> Result<StackRegion> {
        if size == 0 {
            return Err(KernelError::Parameter);
        }
        let size = size
            .checked_add(STACK_ALIGN - 1)
            .ok_or(KernelError::ResourceExhausted)?
            & !(STACK_ALIGN - 1);
        if size > self.remaining() {
            return Err(KernelError::ResourceExhausted);
        }

        let top = self.next_top as *mut u32;
        self.next_top = self.next_top.wrapping_sub(size);
        Ok(StackRegion { top, size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carves_downward_without_overlap() {
        let mut pool = [0u64; 64]; // 512 bytes
        let base = pool.as_mut_ptr() as *mut u8;
        let mut arena = unsafe { StackArena::new(base, 512) };
        assert_eq!(arena.remaining(), 512);

        let a = arena.carve(128).unwrap();
        let b = arena.carve(100).unwrap();

        assert_eq!(a.top as usize, base as usize + 512);
        assert_eq!(b.size, 104);
        // b sits entirely below a
        assert_eq!(b.top as usize, a.top as usize - a.size);
        assert_eq!(arena.remaining(), 512 - 128 - 104);
        assert_eq!(b.top as usize % 8, 0);
    }

    #[test]
    fn test_exhaustion() {
        let mut pool = [0u64; 32]; // 256 bytes
        let mut arena = unsafe { StackArena::new(pool.as_mut_ptr() as *mut u8, 256) };

        assert!(arena.carve(200).is_ok());
        assert_eq!(arena.carve(64), Err(KernelError::ResourceExhausted));
        // A smaller request still fits
        assert!(arena.carve(56).is_ok());
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn test_zero_size_and_empty_arena() {
        let mut arena = StackArena::empty();
        assert_eq!(arena.carve(0), Err(KernelError::Parameter));
        assert_eq!(arena.carve(8), Err(KernelError::ResourceExhausted));
    }

    #[test]
    fn test_unaligned_end_is_trimmed() {
        let mut pool = [0u64; 16];
        let base = pool.as_mut_ptr() as *mut u8;
        let arena = unsafe { StackArena::new(base, 100) };
        assert_eq!(arena.remaining(), 96);
    }
}
