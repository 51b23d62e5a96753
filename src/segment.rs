//! Fixed-width bitmap over route segments.
//!
//! A train's timetable of N stations defines N−1 consecutive segments. A
//! seat may be sold several times on one run as long as the sold intervals
//! are pairwise disjoint over those segments, so each seat carries one bit
//! per segment. Real timetables stay below 64 stations and fit the low word;
//! the mask is a single 128-bit word so the same O(1) operations cover the
//! fallback width too.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Widest supported journey, in segments
pub const MAX_SEGMENTS: u8 = 128;

/// Occupancy bitmap for one seat on one schedule instance.
///
/// Bit `i` set ⇔ the seat is sold on segment `i` (station `i` → `i+1`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentMask(u128);

impl SegmentMask {
    /// The empty mask
    pub const EMPTY: Self = Self(0);

    /// Mask with bits `dep_idx..arr_idx` set.
    ///
    /// Callers guarantee `dep_idx < arr_idx <= MAX_SEGMENTS`; the range is
    /// half-open over segments, so a journey from station 0 to station 2
    /// sets bits 0 and 1.
    #[must_use]
    pub fn for_range(dep_idx: u8, arr_idx: u8) -> Self {
        debug_assert!(dep_idx < arr_idx, "empty or inverted segment range");
        debug_assert!(arr_idx <= MAX_SEGMENTS);
        let width = arr_idx - dep_idx;
        let run = if width >= MAX_SEGMENTS {
            u128::MAX
        } else {
            (1u128 << width) - 1
        };
        Self(run << dep_idx)
    }

    /// Whether any segment is shared with `other`
    #[must_use]
    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Sets every bit in `dep_idx..arr_idx`
    pub fn set_range(&mut self, dep_idx: u8, arr_idx: u8) {
        self.0 |= Self::for_range(dep_idx, arr_idx).0;
    }

    /// Clears every bit in `dep_idx..arr_idx`
    pub fn clear_range(&mut self, dep_idx: u8, arr_idx: u8) {
        self.0 &= !Self::for_range(dep_idx, arr_idx).0;
    }

    /// Whether no segment is sold
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether segment `i` is sold
    #[must_use]
    pub const fn is_set(&self, i: u8) -> bool {
        self.0 & (1u128 << i) != 0
    }

    /// Number of sold segments
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.0.count_ones()
    }
}

impl fmt::Display for SegmentMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:b}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_mask_covers_half_open_interval() {
        let m = SegmentMask::for_range(1, 3);
        assert!(!m.is_set(0));
        assert!(m.is_set(1));
        assert!(m.is_set(2));
        assert!(!m.is_set(3));
        assert_eq!(m.count(), 2);
    }

    #[test]
    fn adjacent_journeys_do_not_intersect() {
        // A→B and B→D share station B but no segment.
        let first = SegmentMask::for_range(0, 1);
        let second = SegmentMask::for_range(1, 3);
        assert!(!first.intersects(second));
        // A→C and B→D share segment B→C.
        let long = SegmentMask::for_range(0, 2);
        assert!(long.intersects(second));
    }

    #[test]
    fn set_then_clear_restores_exactly() {
        let mut m = SegmentMask::for_range(4, 6);
        let before = m;
        m.set_range(0, 2);
        m.clear_range(0, 2);
        assert_eq!(m, before);
    }

    #[test]
    fn full_width_range() {
        let m = SegmentMask::for_range(0, MAX_SEGMENTS);
        assert_eq!(m.count(), u32::from(MAX_SEGMENTS));
    }
}
