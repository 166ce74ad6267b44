//! Virtual Memory Collaborator
//!
//! The narrow slice of the VM subsystem the slab arena depends on: reserve a
//! range of address space, then commit and decommit page-granular pieces of
//! it on demand.

use super::address::VirtAddr;

/// Error type for reservation and commit operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No address space or backing pages left.
    NoMemory,
    /// The range is outside any reservation.
    InvalidRange,
    /// The address or size is not page-aligned.
    Misaligned,
}

impl core::fmt::Display for VmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoMemory => write!(f, "out of memory"),
            Self::InvalidRange => write!(f, "range not reserved"),
            Self::Misaligned => write!(f, "address not page-aligned"),
        }
    }
}

/// Address-space operations required by [`super::SlabArena`].
///
/// Implementations must be callable from any thread. Committed pages read as
/// zero the first time they are committed.
pub trait VmSpace: Send + Sync {
    /// Reserve `size` bytes of address space without committing any of it.
    fn reserve(&self, name: &str, size: usize) -> Result<VirtAddr, VmError>;

    /// Back `[base, base + size)` with physical pages.
    fn commit(&self, base: VirtAddr, size: usize) -> Result<(), VmError>;

    /// Release the physical pages backing `[base, base + size)`.
    fn decommit(&self, base: VirtAddr, size: usize) -> Result<(), VmError>;

    /// Whether `addr` currently lies on a committed page.
    fn is_committed(&self, addr: VirtAddr) -> bool;
}
