//! Handle Token Layout
//!
//! A handle value handed to user mode is a 32-bit token:
//!
//! ```text
//!  31    30 29                     n n-1                 0
//! ┌────────┬────────────────────────┬─────────────────────┐
//! │reserved│ generation             │ slot index          │
//! └────────┴────────────────────────┴─────────────────────┘
//! ```
//!
//! `n = log2(capacity)`. For the default 256K table that is 18 index bits
//! and 12 generation bits. Issued tokens always have the reserved bits
//! clear and a non-zero generation, so 0 is never a valid handle value.
//!
//! The slot keeps its last token after the handle is torn down, with
//! [`RETIRED_BIT`] set. The next occupant derives its generation from that
//! stale value.

use crate::config::{MIN_GENERATION_BITS, TOKEN_RESERVED_BITS};

/// Marks a slot token whose handle has been torn down.
///
/// Lives in the reserved bits, so no user-supplied value that passes the
/// reserved-bit check can match a retired slot.
pub const RETIRED_BIT: u32 = 1 << 31;

/// Bit split of a token for a given table capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenLayout {
    index_bits: u32,
    generation_bits: u32,
}

impl TokenLayout {
    /// Layout for a table of `capacity` slots.
    ///
    /// Returns `None` unless `capacity` is a power of two that leaves at
    /// least [`MIN_GENERATION_BITS`] for the generation.
    pub const fn for_capacity(capacity: usize) -> Option<Self> {
        if !capacity.is_power_of_two() {
            return None;
        }
        let index_bits = capacity.trailing_zeros();
        if index_bits + TOKEN_RESERVED_BITS + MIN_GENERATION_BITS > u32::BITS {
            return None;
        }
        Some(Self {
            index_bits,
            generation_bits: u32::BITS - TOKEN_RESERVED_BITS - index_bits,
        })
    }

    /// Width of the index field.
    #[inline]
    pub const fn index_bits(self) -> u32 {
        self.index_bits
    }

    /// Width of the generation field.
    #[inline]
    pub const fn generation_bits(self) -> u32 {
        self.generation_bits
    }

    #[inline]
    pub const fn index_mask(self) -> u32 {
        (1u32 << self.index_bits) - 1
    }

    #[inline]
    pub const fn generation_mask(self) -> u32 {
        self.max_generation() << self.index_bits
    }

    #[inline]
    pub const fn reserved_mask(self) -> u32 {
        !(self.index_mask() | self.generation_mask())
    }

    #[inline]
    pub const fn max_generation(self) -> u32 {
        (1u32 << self.generation_bits) - 1
    }

    /// Slot index encoded in `token`.
    #[inline]
    pub const fn index(self, token: u32) -> usize {
        (token & self.index_mask()) as usize
    }

    /// Generation encoded in `token`.
    #[inline]
    pub const fn generation(self, token: u32) -> u32 {
        (token & self.generation_mask()) >> self.index_bits
    }

    /// Build a token from its fields.
    #[inline]
    pub const fn compose(self, index: usize, generation: u32) -> u32 {
        debug_assert!(index <= self.index_mask() as usize);
        debug_assert!(generation <= self.max_generation());
        (generation << self.index_bits) | index as u32
    }

    /// The generation that follows `generation`, skipping 0 on wraparound.
    #[inline]
    pub const fn next_generation(self, generation: u32) -> u32 {
        let next = (generation + 1) & self.max_generation();
        if next == 0 {
            1
        } else {
            next
        }
    }

    /// Token for the next occupant of slot `index`, whose previous token
    /// (0 if never used) is `stale`.
    #[inline]
    pub const fn next_token(self, index: usize, stale: u32) -> u32 {
        self.compose(index, self.next_generation(self.generation(stale)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_HANDLE_COUNT;

    #[test]
    fn test_default_split() {
        let layout = TokenLayout::for_capacity(MAX_HANDLE_COUNT).unwrap();
        assert_eq!(layout.index_bits(), 18);
        assert_eq!(layout.generation_bits(), 12);
        assert_eq!(layout.index_mask(), 0x0003_FFFF);
        assert_eq!(layout.generation_mask(), 0x3FFC_0000);
        assert_eq!(layout.reserved_mask(), 0xC000_0000);
        assert_ne!(layout.reserved_mask() & RETIRED_BIT, 0);
    }

    #[test]
    fn test_rejects_bad_capacities() {
        assert!(TokenLayout::for_capacity(0).is_none());
        assert!(TokenLayout::for_capacity(1000).is_none());
        assert!(TokenLayout::for_capacity(1 << 23).is_none());
        assert!(TokenLayout::for_capacity(1 << 22).is_some());
    }

    #[test]
    fn test_fresh_slot_starts_at_generation_one() {
        let layout = TokenLayout::for_capacity(64).unwrap();
        let token = layout.next_token(5, 0);
        assert_eq!(layout.index(token), 5);
        assert_eq!(layout.generation(token), 1);
    }

    #[test]
    fn test_retired_bit_ignored_for_generation() {
        let layout = TokenLayout::for_capacity(64).unwrap();
        let token = layout.compose(9, 7);
        let next = layout.next_token(9, token | RETIRED_BIT);
        assert_eq!(layout.generation(next), 8);
        assert_eq!(next & layout.reserved_mask(), 0);
    }

    #[test]
    fn test_generation_wraps_past_zero() {
        let layout = TokenLayout::for_capacity(MAX_HANDLE_COUNT).unwrap();
        let last = layout.compose(3, layout.max_generation());
        let next = layout.next_token(3, last);
        assert_eq!(layout.generation(next), 1);
        assert_eq!(layout.index(next), 3);
    }
}
