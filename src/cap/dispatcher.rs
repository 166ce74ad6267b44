//! Dispatcher Interface
//!
//! Dispatchers are the reference-counted kernel objects handles point at.
//! Concrete object types live elsewhere in the kernel; this module defines
//! the contract the handle table relies on.
//!
//! # Two Counts
//! - The `Arc` strong count keeps the object alive
//! - The handle count tracks user-visible handles only; its transition to
//!   zero fires [`Dispatcher::on_zero_handles`] exactly once per transition

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::handle::Handle;

/// Kernel object id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Koid(u64);

impl Koid {
    /// Id of no object. Also marks a handle with no owning process.
    pub const INVALID: Self = Self(0);

    /// Allocate a fresh, never reused id.
    pub fn generate() -> Self {
        static NEXT_KOID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_KOID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create from a raw value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this names an object.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// State every dispatcher embeds.
#[derive(Debug)]
pub struct DispatcherBase {
    koid: Koid,
    handle_count: AtomicU32,
}

impl DispatcherBase {
    /// Create the base for a new object with a fresh koid.
    pub fn new() -> Self {
        Self {
            koid: Koid::generate(),
            handle_count: AtomicU32::new(0),
        }
    }

    /// The object's id.
    #[inline]
    pub fn koid(&self) -> Koid {
        self.koid
    }

    /// Number of live handles to this object.
    #[inline]
    pub fn current_handle_count(&self) -> u32 {
        self.handle_count.load(Ordering::Acquire)
    }

    pub(crate) fn increment_handle_count(&self) {
        self.handle_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one handle; returns `true` for the caller that took the count
    /// to zero.
    ///
    /// # Panics
    /// Panics if the count is already zero.
    pub(crate) fn decrement_handle_count(&self) -> bool {
        let previous = self.handle_count.fetch_sub(1, Ordering::AcqRel);
        assert_ne!(previous, 0, "handle count underflow on koid {}", self.koid.as_u64());
        previous == 1
    }
}

impl Default for DispatcherBase {
    fn default() -> Self {
        Self::new()
    }
}

/// A kernel object reachable through handles.
pub trait Dispatcher: Send + Sync {
    /// Embedded bookkeeping.
    fn base(&self) -> &DispatcherBase;

    /// The object's id.
    fn koid(&self) -> Koid {
        self.base().koid()
    }

    /// Whether waits can be pending against handles to this object.
    fn is_waitable(&self) -> bool {
        false
    }

    /// Cancel waits registered through `handle`, which is about to close.
    fn cancel(&self, _handle: &Handle) {}

    /// The last handle to this object was closed.
    ///
    /// Runs with no handle-table lock held; may drop other handles.
    fn on_zero_handles(&self) {}

    /// Record the process that now holds a handle to this object.
    fn set_owner(&self, _owner: Koid) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::vec::Vec;

    #[test]
    fn test_koids_are_unique() {
        let a = Koid::generate();
        let b = Koid::generate();
        assert_ne!(a, b);
        assert!(a.is_valid() && b.is_valid());
        assert!(!Koid::INVALID.is_valid());
    }

    #[test]
    fn test_exactly_one_zero_transition() {
        let base = DispatcherBase::new();
        for _ in 0..64 {
            base.increment_handle_count();
        }
        let zeros = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        for _ in 0..8 {
                            if base.decrement_handle_count() {
                                zeros.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }
        });

        assert_eq!(zeros.load(Ordering::SeqCst), 1);
        assert_eq!(base.current_handle_count(), 0);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_underflow_is_fatal() {
        DispatcherBase::new().decrement_handle_count();
    }
}
