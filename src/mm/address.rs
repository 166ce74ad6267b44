//! Virtual Address Type
//!
//! Type-safe wrapper for kernel virtual addresses handed out by the VM
//! collaborator and the slab arena.
//!
//! # Security Properties
//! - Addresses are plain integers until explicitly turned into pointers
//! - Dereferencing always requires an `unsafe` block at the call site

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: usize = 4096;
/// Page size mask
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
/// Bits to shift for page number
pub const PAGE_SHIFT: usize = 12;

/// Round a byte count up to whole pages.
#[inline]
pub const fn round_up_pages(size: usize) -> usize {
    (size + PAGE_MASK) & !PAGE_MASK
}

/// Round a byte count up to whole pages, or `None` on overflow.
#[inline]
pub const fn checked_round_up_pages(size: usize) -> Option<usize> {
    match size.checked_add(PAGE_MASK) {
        Some(end) => Some(end & !PAGE_MASK),
        None => None,
    }
}

/// A kernel virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    /// Create a new virtual address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Address of a pointer.
    #[inline]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Add an offset to this address.
    #[inline]
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }

    /// Byte distance from `base` up to this address.
    ///
    /// # Panics
    /// Panics in debug mode if `base` is above `self`.
    #[inline]
    pub const fn offset_from(self, base: VirtAddr) -> usize {
        debug_assert!(self.0 >= base.0);
        self.0 - base.0
    }

    /// Convert to a raw pointer.
    ///
    /// Producing the pointer is safe; dereferencing it requires the
    /// address to be committed.
    #[inline]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Convert to a mutable raw pointer.
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#018x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_alignment() {
        assert!(!VirtAddr::new(0x4008_1234).is_aligned());
        assert!(VirtAddr::new(0x4008_1000).is_aligned());
    }

    #[test]
    fn test_page_rounding() {
        assert_eq!(round_up_pages(0), 0);
        assert_eq!(round_up_pages(1), PAGE_SIZE);
        assert_eq!(round_up_pages(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(checked_round_up_pages(PAGE_SIZE + 1), Some(2 * PAGE_SIZE));
        assert_eq!(checked_round_up_pages(usize::MAX - 15), None);
    }

    #[test]
    fn test_offset_from() {
        let base = VirtAddr::new(0x1000);
        assert_eq!(base.add(0x40).offset_from(base), 0x40);
    }
}
