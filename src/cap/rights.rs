//! Handle Rights
//!
//! Rights are a bitmask that controls what operations a handle permits.
//! When duplicating a handle, rights can only be reduced, never increased.

use bitflags::bitflags;

bitflags! {
    /// Rights carried by a handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u32 {
        /// Handle may be duplicated.
        const DUPLICATE      = 1 << 0;
        /// Handle may be transferred to another process.
        const TRANSFER       = 1 << 1;
        /// Object data may be read.
        const READ           = 1 << 2;
        /// Object data may be written.
        const WRITE          = 1 << 3;
        /// Object may be mapped executable.
        const EXECUTE        = 1 << 4;
        /// Object may be mapped.
        const MAP            = 1 << 5;
        /// Object properties may be read.
        const GET_PROPERTY   = 1 << 6;
        /// Object properties may be written.
        const SET_PROPERTY   = 1 << 7;
        /// Child objects may be enumerated.
        const ENUMERATE      = 1 << 8;
        /// Object may be destroyed.
        const DESTROY        = 1 << 9;
        /// Object policy may be set.
        const SET_POLICY     = 1 << 10;
        /// Object policy may be read.
        const GET_POLICY     = 1 << 11;
        /// Object signals may be asserted.
        const SIGNAL         = 1 << 12;
        /// Peer signals may be asserted.
        const SIGNAL_PEER    = 1 << 13;
        /// Handle may be waited on.
        const WAIT           = 1 << 14;
        /// Object may be inspected.
        const INSPECT        = 1 << 15;
        /// Job may be managed.
        const MANAGE_JOB     = 1 << 16;
        /// Process may be managed.
        const MANAGE_PROCESS = 1 << 17;
        /// Thread may be managed.
        const MANAGE_THREAD  = 1 << 18;
        /// Scheduling profiles may be applied.
        const APPLY_PROFILE  = 1 << 19;
    }
}

impl Rights {
    /// Rights every transferable object usually carries.
    pub const BASIC: Self = Self::TRANSFER
        .union(Self::DUPLICATE)
        .union(Self::WAIT)
        .union(Self::INSPECT);

    /// Read and write.
    pub const IO: Self = Self::READ.union(Self::WRITE);

    /// Property access.
    pub const PROPERTY: Self = Self::GET_PROPERTY.union(Self::SET_PROPERTY);

    /// Policy access.
    pub const POLICY: Self = Self::GET_POLICY.union(Self::SET_POLICY);

    /// Sentinel asking a duplicate to keep the source's rights.
    ///
    /// Never stored in a handle.
    pub const SAME_RIGHTS: Self = Self::from_bits_retain(1 << 31);

    /// Resolve a requested right set against the rights of a source handle.
    ///
    /// Returns `None` if the request would widen `source`.
    #[inline]
    pub fn resolve_against(self, source: Rights) -> Option<Rights> {
        if self.contains(Self::SAME_RIGHTS) {
            return Some(source);
        }
        if source.contains(self) {
            Some(self)
        } else {
            None
        }
    }
}
