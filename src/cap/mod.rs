//! Handle-Based Capability System
//!
//! User mode refers to kernel objects only through 32-bit handle values.
//! Each value names a [`Handle`] in the kernel-wide [`HandleTableArena`],
//! which in turn references a [`Dispatcher`] with a set of [`Rights`].
//!
//! # Design
//! - Handles live in a slab arena, never on the general heap
//! - Values are generation-tagged so a closed value cannot reach the slot's
//!   next occupant
//! - Each process keeps its handles in a [`ProcessHandles`] set
//!
//! # Security Properties
//! - Values cannot be forged: validation requires an exact token match
//! - Rights can only be reduced, never increased
//! - Running out of handles is an ordinary error, never a kernel fault

pub mod dispatcher;
pub mod handle;
pub mod process;
pub mod rights;
pub mod table;
pub mod token;

use core::fmt;

use crate::mm::ArenaError;

pub use dispatcher::{Dispatcher, DispatcherBase, Koid};
pub use handle::{Handle, HandleOwner};
pub use process::ProcessHandles;
pub use rights::Rights;
pub use table::HandleTableArena;
pub use token::{TokenLayout, RETIRED_BIT};

/// Handle operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    /// The handle table is full.
    NoResources,
    /// The value does not name a live handle of the caller.
    BadHandle,
    /// The handle lacks a required right.
    AccessDenied,
    /// Malformed rights or configuration.
    InvalidArgs,
    /// The table's arena could not be set up.
    Arena(ArenaError),
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResources => write!(f, "out of handles"),
            Self::BadHandle => write!(f, "bad handle"),
            Self::AccessDenied => write!(f, "access denied"),
            Self::InvalidArgs => write!(f, "invalid arguments"),
            Self::Arena(err) => write!(f, "handle arena: {}", err),
        }
    }
}
