//! Secure Memory Zeroization
//!
//! Clears memory in a way the compiler cannot elide. Used to scrub arena
//! pages on decommit so dispatcher pointers and tokens of dead handles do
//! not survive in recycled physical memory.

use core::ptr;
use core::sync::atomic::{compiler_fence, Ordering};

/// Trait for memory that can be securely zeroed.
pub trait Zeroize {
    /// Overwrite this value with zeros.
    ///
    /// This operation is guaranteed to not be optimized away.
    fn zeroize(&mut self);
}

impl Zeroize for [u8] {
    fn zeroize(&mut self) {
        // SAFETY: We have a valid mutable reference to the slice
        unsafe {
            volatile_set_memory(self.as_mut_ptr(), 0, self.len());
        }
        compiler_fence(Ordering::SeqCst);
    }
}

/// Scrub a raw range that is not covered by any live reference.
///
/// # Safety
/// `[base, base + len)` must be committed, writable, and not referenced by
/// any live object.
pub unsafe fn zeroize_raw(base: *mut u8, len: usize) {
    // SAFETY: Caller guarantees exclusive access to the range
    let bytes = unsafe { core::slice::from_raw_parts_mut(base, len) };
    bytes.zeroize();
}

/// Volatile memset that cannot be optimized away.
///
/// # Safety
/// - `dst` must be valid for writes of `count` bytes
#[inline]
unsafe fn volatile_set_memory(dst: *mut u8, val: u8, count: usize) {
    for i in 0..count {
        // SAFETY: Caller guarantees dst is valid for count bytes
        unsafe {
            ptr::write_volatile(dst.add(i), val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroize_slice() {
        let mut data = [0x42u8; 16];
        data.as_mut_slice().zeroize();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_zeroize_raw_range() {
        let mut data = [0xA5u8; 64];
        // SAFETY: the range covers the middle of a local array
        unsafe { zeroize_raw(data.as_mut_ptr().add(16), 32) };
        assert!(data[..16].iter().all(|&b| b == 0xA5));
        assert!(data[16..48].iter().all(|&b| b == 0));
        assert!(data[48..].iter().all(|&b| b == 0xA5));
    }
}
