//! Memory management for the handle subsystem
//!
//! Provides:
//! - Virtual address types
//! - The VM collaborator interface (reserve / commit / decommit)
//! - A region-backed VM implementation for boot and tests
//! - The slab arena allocator
//!
//! # Security Principles
//! - Arena metadata lives in arena-owned pages, never the general heap
//! - A guard page separates arena metadata from object storage
//! - Pages returned to the VM are scrubbed

pub mod address;
pub mod arena;
pub mod region;
pub mod vm;

pub use address::{VirtAddr, PAGE_SIZE};
pub use arena::{ArenaError, ArenaStats, SlabArena, Slot};
pub use region::{Page, RegionVm};
pub use vm::{VmError, VmSpace};
