#![forbid(unsafe_code)]

//! Priority lanes.
//!
//! A [`Lane`] is a single priority bit; [`Lanes`] is a set of them. Lower
//! bits are more urgent, so "the highest-priority lane in a set" is simply
//! its lowest set bit.
//!
//! | Lane         | Bit | Used for                                   |
//! |--------------|-----|--------------------------------------------|
//! | `SYNC`       | 0   | discrete input, layout-phase updates       |
//! | `INPUT`      | 1   | continuous input (drag, scroll)            |
//! | `DEFAULT`    | 2   | everything without an explicit priority    |
//! | `TRANSITION` | 3   | non-urgent UI transitions                  |
//! | `RETRY`      | 4   | re-rendering a suspended boundary          |
//! | `IDLE`       | 5   | background work                            |
//! | `OFFSCREEN`  | 6   | prerendering hidden subtrees               |

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// A set of priority lanes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Lanes: u32 {
        const SYNC = 1 << 0;
        const INPUT = 1 << 1;
        const DEFAULT = 1 << 2;
        const TRANSITION = 1 << 3;
        const RETRY = 1 << 4;
        const IDLE = 1 << 5;
        const OFFSCREEN = 1 << 6;
    }
}

/// Number of distinct lanes.
pub const LANE_COUNT: usize = 7;

impl Lanes {
    /// Lanes an ordinary state update can be scheduled at.
    pub const UPDATE_LANES: Self = Self::SYNC
        .union(Self::INPUT)
        .union(Self::DEFAULT)
        .union(Self::TRANSITION)
        .union(Self::IDLE);

    /// Lanes that never block user input and may be interrupted freely.
    pub const NON_BLOCKING: Self = Self::TRANSITION
        .union(Self::RETRY)
        .union(Self::IDLE)
        .union(Self::OFFSCREEN);

    /// The most urgent lane in the set, if any.
    #[must_use]
    pub fn highest_priority(self) -> Option<Lane> {
        let bits = self.bits();
        if bits == 0 {
            return None;
        }
        Some(Lane(Self::from_bits_retain(bits & bits.wrapping_neg())))
    }

    /// Iterate the individual lanes, most urgent first.
    pub fn each_lane(self) -> impl Iterator<Item = Lane> {
        let mut rest = self.bits();
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let bit = rest & rest.wrapping_neg();
            rest &= !bit;
            Some(Lane(Self::from_bits_retain(bit)))
        })
    }

    /// Whether `lane` is a member of this set.
    #[must_use]
    pub fn includes(self, lane: Lane) -> bool {
        self.contains(lane.0)
    }

    /// Whether this set contains the synchronous lane.
    #[must_use]
    pub fn includes_sync(self) -> bool {
        self.contains(Self::SYNC)
    }

    /// Whether every lane in the set is non-blocking.
    #[must_use]
    pub fn is_non_blocking(self) -> bool {
        !self.is_empty() && Self::NON_BLOCKING.contains(self)
    }
}

impl Default for Lanes {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for lane in self.each_lane() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(lane.name())?;
            first = false;
        }
        Ok(())
    }
}

/// Exactly one priority lane.
///
/// `Ord` follows urgency: a lane that sorts first is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lane(Lanes);

impl Lane {
    pub const SYNC: Self = Self(Lanes::SYNC);
    pub const INPUT: Self = Self(Lanes::INPUT);
    pub const DEFAULT: Self = Self(Lanes::DEFAULT);
    pub const TRANSITION: Self = Self(Lanes::TRANSITION);
    pub const RETRY: Self = Self(Lanes::RETRY);
    pub const IDLE: Self = Self(Lanes::IDLE);
    pub const OFFSCREEN: Self = Self(Lanes::OFFSCREEN);

    /// All lanes, most urgent first.
    pub const ALL: [Self; LANE_COUNT] = [
        Self::SYNC,
        Self::INPUT,
        Self::DEFAULT,
        Self::TRANSITION,
        Self::RETRY,
        Self::IDLE,
        Self::OFFSCREEN,
    ];

    /// The lane as a one-element set.
    #[must_use]
    pub const fn lanes(self) -> Lanes {
        self.0
    }

    /// Dense index of the lane (0 = most urgent).
    #[must_use]
    pub const fn index(self) -> usize {
        self.0.bits().trailing_zeros() as usize
    }

    /// The lane at dense index `index`.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Parse a lane from its lowercase name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|lane| lane.name() == name)
    }

    /// Whether `self` must be processed before `other`.
    #[must_use]
    pub fn is_more_urgent_than(self, other: Self) -> bool {
        self.0.bits() < other.0.bits()
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0.bits() {
            0b1 => "sync",
            0b10 => "input",
            0b100 => "default",
            0b1000 => "transition",
            0b1_0000 => "retry",
            0b10_0000 => "idle",
            _ => "offscreen",
        }
    }
}

impl From<Lane> for Lanes {
    fn from(lane: Lane) -> Self {
        lane.0
    }
}

impl PartialOrd for Lane {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Lane {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.bits().cmp(&other.0.bits())
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-size table with one entry per lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneMap<T> {
    entries: [T; LANE_COUNT],
}

impl<T: Default> Default for LaneMap<T> {
    fn default() -> Self {
        Self {
            entries: std::array::from_fn(|_| T::default()),
        }
    }
}

impl<T> LaneMap<T> {
    #[must_use]
    pub fn get(&self, lane: Lane) -> &T {
        &self.entries[lane.index()]
    }

    pub fn get_mut(&mut self, lane: Lane) -> &mut T {
        &mut self.entries[lane.index()]
    }

    /// Iterate `(lane, entry)` pairs, most urgent first.
    pub fn iter(&self) -> impl Iterator<Item = (Lane, &T)> {
        Lane::ALL.into_iter().zip(self.entries.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_is_lowest_bit() {
        let set = Lanes::TRANSITION | Lanes::DEFAULT | Lanes::IDLE;
        assert_eq!(set.highest_priority(), Some(Lane::DEFAULT));
        assert_eq!(Lanes::empty().highest_priority(), None);
    }

    #[test]
    fn each_lane_is_ordered_by_urgency() {
        let set = Lanes::OFFSCREEN | Lanes::SYNC | Lanes::RETRY;
        let lanes: Vec<_> = set.each_lane().collect();
        assert_eq!(lanes, vec![Lane::SYNC, Lane::RETRY, Lane::OFFSCREEN]);
    }

    #[test]
    fn lane_ordering_matches_urgency() {
        assert!(Lane::SYNC.is_more_urgent_than(Lane::DEFAULT));
        assert!(!Lane::IDLE.is_more_urgent_than(Lane::TRANSITION));
        let mut lanes = vec![Lane::IDLE, Lane::SYNC, Lane::TRANSITION];
        lanes.sort();
        assert_eq!(lanes, vec![Lane::SYNC, Lane::TRANSITION, Lane::IDLE]);
    }

    #[test]
    fn index_round_trips_through_table() {
        for lane in Lane::ALL {
            assert_eq!(Lane::from_index(lane.index()), Some(lane));
            assert_eq!(Lane::from_name(lane.name()), Some(lane));
        }
        assert_eq!(Lane::from_index(LANE_COUNT), None);
    }

    #[test]
    fn empty_set_is_contained_in_everything() {
        // Rebased updates carry no lane and must apply in every pass.
        assert!(Lanes::SYNC.contains(Lanes::empty()));
        assert!(Lanes::empty().contains(Lanes::empty()));
    }

    #[test]
    fn non_blocking_excludes_urgent_lanes() {
        assert!((Lanes::TRANSITION | Lanes::RETRY).is_non_blocking());
        assert!(!(Lanes::TRANSITION | Lanes::DEFAULT).is_non_blocking());
        assert!(!Lanes::empty().is_non_blocking());
    }

    #[test]
    fn display_lists_lane_names() {
        assert_eq!((Lanes::SYNC | Lanes::RETRY).to_string(), "sync|retry");
        assert_eq!(Lanes::empty().to_string(), "none");
    }

    #[test]
    fn lane_map_indexes_by_lane() {
        let mut map: LaneMap<u32> = LaneMap::default();
        *map.get_mut(Lane::RETRY) += 3;
        assert_eq!(*map.get(Lane::RETRY), 3);
        assert_eq!(*map.get(Lane::SYNC), 0);
        assert_eq!(map.iter().filter(|(_, v)| **v > 0).count(), 1);
    }
}
