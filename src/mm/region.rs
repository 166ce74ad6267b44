//! Region-Backed Virtual Memory
//!
//! A [`VmSpace`] over a fixed, page-aligned memory region supplied at boot.
//!
//! # Design
//! - The first pages of the region hold the commit bitmap; the rest is
//!   handed out by a bump reservation pointer
//! - Each bit in the bitmap represents one 4KB page
//! - Bit = 0: page is decommitted
//! - Bit = 1: page is committed
//!
//! # Security Properties
//! - Newly committed pages are zero-filled
//! - Decommitted pages are scrubbed with volatile writes
//! - The allocator is protected by a spinlock

use core::ops::Range;

use spin::Mutex;

use super::address::{VirtAddr, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE};
use super::vm::{VmError, VmSpace};
use crate::security::zeroize::zeroize_raw;

/// One page of backing memory.
#[derive(Clone, Copy)]
#[repr(C, align(4096))]
pub struct Page(pub [u8; PAGE_SIZE]);

impl Page {
    /// A zero-filled page.
    pub const ZERO: Self = Self([0; PAGE_SIZE]);
}

/// Pages whose commit state fits in one bitmap page.
const PAGES_PER_BITMAP_PAGE: usize = PAGE_SIZE * 8;

/// Region state.
struct RegionInner {
    /// Commit bitmap, one bit per usable page.
    bitmap: &'static mut [u64],
    /// Pages handed out by `reserve`.
    reserved: usize,
    /// Pages currently committed.
    committed: usize,
}

impl RegionInner {
    #[inline]
    fn is_set(&self, page: usize) -> bool {
        (self.bitmap[page / 64] >> (page % 64)) & 1 == 1
    }

    #[inline]
    fn set(&mut self, page: usize, committed: bool) {
        if committed {
            self.bitmap[page / 64] |= 1 << (page % 64);
        } else {
            self.bitmap[page / 64] &= !(1 << (page % 64));
        }
    }
}

/// Virtual memory backed by a static region.
pub struct RegionVm {
    /// First usable (non-bitmap) page.
    base: VirtAddr,
    /// Number of usable pages.
    pages: usize,
    inner: Mutex<RegionInner>,
}

impl RegionVm {
    /// Take ownership of `memory` as backing for reservations.
    ///
    /// Fails if the region is too small to hold its own bitmap plus at least
    /// one usable page.
    pub fn new(memory: &'static mut [Page]) -> Result<Self, VmError> {
        let total = memory.len();
        let bitmap_pages = total.div_ceil(PAGES_PER_BITMAP_PAGE);
        if total <= bitmap_pages {
            return Err(VmError::NoMemory);
        }

        let (meta, usable) = memory.split_at_mut(bitmap_pages);
        let words = usable.len().div_ceil(64);
        // SAFETY:
        // - `meta` is page-aligned and at least `words * 8` bytes long
        // - Ownership of the slice moves into the bitmap for 'static
        let bitmap = unsafe { core::slice::from_raw_parts_mut(meta.as_mut_ptr().cast::<u64>(), words) };
        bitmap.fill(0);

        Ok(Self {
            base: VirtAddr::from_ptr(usable.as_mut_ptr()),
            pages: usable.len(),
            inner: Mutex::new(RegionInner {
                bitmap,
                reserved: 0,
                committed: 0,
            }),
        })
    }

    /// Number of usable pages in the region.
    pub fn capacity_pages(&self) -> usize {
        self.pages
    }

    /// Number of pages handed out by `reserve`.
    pub fn reserved_pages(&self) -> usize {
        self.inner.lock().reserved
    }

    /// Number of pages currently committed.
    pub fn committed_pages(&self) -> usize {
        self.inner.lock().committed
    }

    /// Translate a byte range into page indices within the reserved area.
    fn page_range(&self, base: VirtAddr, size: usize, reserved: usize) -> Result<Range<usize>, VmError> {
        if !base.is_aligned() || size & PAGE_MASK != 0 {
            return Err(VmError::Misaligned);
        }
        if base < self.base {
            return Err(VmError::InvalidRange);
        }
        let first = base.offset_from(self.base) >> PAGE_SHIFT;
        let last = first
            .checked_add(size >> PAGE_SHIFT)
            .ok_or(VmError::InvalidRange)?;
        if last > reserved {
            return Err(VmError::InvalidRange);
        }
        Ok(first..last)
    }

    #[inline]
    fn page_addr(&self, page: usize) -> VirtAddr {
        self.base.add(page << PAGE_SHIFT)
    }
}

impl VmSpace for RegionVm {
    fn reserve(&self, name: &str, size: usize) -> Result<VirtAddr, VmError> {
        if size == 0 {
            return Err(VmError::InvalidRange);
        }
        let pages = size.div_ceil(PAGE_SIZE);

        let mut inner = self.inner.lock();
        if self.pages - inner.reserved < pages {
            return Err(VmError::NoMemory);
        }
        let base = self.page_addr(inner.reserved);
        inner.reserved += pages;
        drop(inner);

        log::debug!(target: "vm", "reserved {} pages for {} at {}", pages, name, base);
        Ok(base)
    }

    fn commit(&self, base: VirtAddr, size: usize) -> Result<(), VmError> {
        let mut inner = self.inner.lock();
        let range = self.page_range(base, size, inner.reserved)?;

        for page in range {
            if inner.is_set(page) {
                continue;
            }
            // SAFETY: The page lies inside the region and was not committed,
            // so nothing references it.
            unsafe {
                core::ptr::write_bytes(self.page_addr(page).as_mut_ptr::<u8>(), 0, PAGE_SIZE);
            }
            inner.set(page, true);
            inner.committed += 1;
        }
        Ok(())
    }

    fn decommit(&self, base: VirtAddr, size: usize) -> Result<(), VmError> {
        let mut inner = self.inner.lock();
        let range = self.page_range(base, size, inner.reserved)?;

        for page in range {
            if !inner.is_set(page) {
                continue;
            }
            // SAFETY: The caller is giving the page back; it holds no live
            // objects.
            unsafe {
                zeroize_raw(self.page_addr(page).as_mut_ptr::<u8>(), PAGE_SIZE);
            }
            inner.set(page, false);
            inner.committed -= 1;
        }
        Ok(())
    }

    fn is_committed(&self, addr: VirtAddr) -> bool {
        if addr < self.base {
            return false;
        }
        let page = addr.offset_from(self.base) >> PAGE_SHIFT;
        if page >= self.pages {
            return false;
        }
        self.inner.lock().is_set(page)
    }
}
