//! Boot-time configuration for the handle subsystem.
//!
//! The token bit split is derived from the table capacity, so the capacity
//! chosen here is part of the user-visible ABI for a given build.

/// Default number of handle slots in the kernel-wide table (256K).
pub const MAX_HANDLE_COUNT: usize = 256 * 1024;

/// Number of most-significant token bits that are always zero.
pub const TOKEN_RESERVED_BITS: u32 = 2;

/// Smallest generation field accepted for a table layout.
pub const MIN_GENERATION_BITS: u32 = 8;

/// Pages committed each time an arena pool grows.
pub const DEFAULT_COMMIT_PAGES: usize = 16;

/// Uncommitted-but-mapped slack a pool tolerates before shrinking.
pub const DEFAULT_DECOMMIT_PAGES: usize = 64;

/// Commit/decommit increments for a slab arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArenaTuning {
    /// Pages committed per growth step.
    pub commit_pages: usize,
    /// Pages of slack above the bump pointer that trigger a shrink.
    pub decommit_pages: usize,
}

impl ArenaTuning {
    /// Kernel defaults.
    pub const DEFAULT: Self = Self {
        commit_pages: DEFAULT_COMMIT_PAGES,
        decommit_pages: DEFAULT_DECOMMIT_PAGES,
    };

    /// The shrink threshold must exceed the growth step or a pool sitting on
    /// a page boundary would commit and decommit on every operation.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.commit_pages > 0 && self.decommit_pages > self.commit_pages
    }
}

impl Default for ArenaTuning {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Configuration for the kernel-wide handle table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleTableConfig {
    /// Number of handle slots. Must be a power of two.
    pub capacity: usize,
    /// Outstanding handle count above which a warning is logged.
    pub high_water_mark: usize,
    /// Arena growth/shrink increments.
    pub tuning: ArenaTuning,
}

impl HandleTableConfig {
    /// Configuration for `capacity` slots with the high-water mark at 7/8.
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            high_water_mark: capacity - capacity / 8,
            tuning: ArenaTuning::DEFAULT,
        }
    }

    /// Replace the arena tuning.
    pub const fn tuning(mut self, tuning: ArenaTuning) -> Self {
        self.tuning = tuning;
        self
    }
}

impl Default for HandleTableConfig {
    fn default() -> Self {
        Self::with_capacity(MAX_HANDLE_COUNT)
    }
}
