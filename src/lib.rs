//! PantherOS Handle Subsystem
//!
//! Turns references to kernel objects into opaque, generation-tagged 32-bit
//! handle values that can be handed to user mode, and provides the slab arena
//! the handle table is carved from.
//!
//! # Layers
//! - `mm`: address types, the VM collaborator trait, a region-backed VM and
//!   the [`mm::SlabArena`] fixed-size object pool
//! - `cap`: rights, dispatchers, handles, the kernel-wide
//!   [`cap::HandleTableArena`] and the per-process handle set
//! - `syscall`: handle system calls and user-visible status codes
//!
//! # Security Properties
//! - Handle values carry a generation that changes on every slot reuse
//! - Token validation uses a branchless select
//! - Handle metadata never touches the general heap

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod cap;
pub mod config;
pub mod klog;
pub mod mm;
pub mod security;
pub mod syscall;

#[cfg(test)]
mod testutil;

pub use cap::{
    Dispatcher, Handle, HandleError, HandleOwner, HandleTableArena, Koid, ProcessHandles, Rights,
};
pub use mm::{SlabArena, VmSpace};
