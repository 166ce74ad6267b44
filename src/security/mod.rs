//! Security Primitives Module
//!
//! Memory scrubbing for pages that leave the handle subsystem.
//!
//! # Security Properties
//! - Decommitted arena pages are cleared with volatile writes before they
//!   return to the page pool, so stale handle records never leak

pub mod zeroize;

pub use zeroize::Zeroize;
