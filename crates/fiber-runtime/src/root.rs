#![forbid(unsafe_code)]

//! Root-level lane bookkeeping: pending work, starvation, entanglement and
//! updater attribution.

use std::time::Duration;

use fiber_core::{Lane, LaneMap, Lanes};

use crate::element::WorkKind;
use crate::policy_config::StarvationPolicy;
use crate::store::NodeId;

/// The node whose update caused a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterInfo {
    pub node: NodeId,
    pub kind: WorkKind,
    pub name: String,
}

#[derive(Debug, Default)]
pub(crate) struct RootSchedule {
    pending: Lanes,
    expiration: LaneMap<Option<Duration>>,
    expired: Lanes,
    interruptions: LaneMap<u32>,
    entangled: LaneMap<Lanes>,
    updaters: LaneMap<Vec<UpdaterInfo>>,
}

impl RootSchedule {
    pub(crate) fn pending(&self) -> Lanes {
        self.pending
    }

    pub(crate) fn expired(&self) -> Lanes {
        self.expired
    }

    /// Record new work on `lane`, starting its expiration clock.
    pub(crate) fn mark_pending(&mut self, lane: Lane, now: Duration, policy: &StarvationPolicy) {
        self.pending |= lane.lanes();
        let slot = self.expiration.get_mut(lane);
        if slot.is_none() {
            *slot = policy.timeout(lane).map(|t| now.saturating_add(t));
        }
    }

    pub(crate) fn add_updater(&mut self, lane: Lane, info: UpdaterInfo) {
        let list = self.updaters.get_mut(lane);
        if !list.iter().any(|u| u.node == info.node) {
            list.push(info);
        }
    }

    /// Move pending lanes whose expiration time passed into the expired set.
    pub(crate) fn mark_starved(&mut self, now: Duration) {
        for lane in self.pending.each_lane() {
            if self.expiration.get(lane).is_some_and(|at| at <= now) {
                if !self.expired.includes(lane) {
                    tracing::debug!(target: "fiber.scheduler", lane = %lane, "lane expired");
                }
                self.expired |= lane.lanes();
            }
        }
    }

    /// Lanes the next pass should render.
    pub(crate) fn next_lanes(&self) -> Option<Lanes> {
        let highest = self.pending.highest_priority()?;
        let mut lanes = highest.lanes();
        for lane in lanes.each_lane() {
            lanes |= *self.entangled.get(lane);
        }
        Some(lanes & self.pending | highest.lanes())
    }

    /// Whether a pass for `lanes` must run without interruption.
    pub(crate) fn is_forced(&self, lanes: Lanes) -> bool {
        lanes.includes_sync() || lanes.intersects(self.expired)
    }

    /// Count an abandoned pass. Lanes interrupted too often expire.
    pub(crate) fn record_interruption(&mut self, lanes: Lanes, policy: &StarvationPolicy) {
        for lane in lanes.each_lane() {
            let count = self.interruptions.get_mut(lane);
            *count += 1;
            if policy.max_interruptions > 0 && *count >= policy.max_interruptions {
                if !self.expired.includes(lane) {
                    tracing::debug!(
                        target: "fiber.scheduler",
                        lane = %lane,
                        interruptions = *count,
                        "lane starved by interruptions"
                    );
                }
                self.expired |= lane.lanes();
            }
        }
    }

    /// Render `lanes` together from now on.
    pub(crate) fn entangle(&mut self, lanes: Lanes) {
        for lane in lanes.each_lane() {
            *self.entangled.get_mut(lane) |= lanes;
        }
    }

    /// Updaters attributed to `lanes`, removed from the schedule.
    pub(crate) fn take_updaters(&mut self, lanes: Lanes) -> Vec<(Lane, UpdaterInfo)> {
        let mut taken = Vec::new();
        for lane in lanes.each_lane() {
            for info in std::mem::take(self.updaters.get_mut(lane)) {
                taken.push((lane, info));
            }
        }
        taken
    }

    pub(crate) fn restore_updaters(&mut self, taken: Vec<(Lane, UpdaterInfo)>) {
        for (lane, info) in taken {
            self.add_updater(lane, info);
        }
    }

    /// A commit happened; `remaining` is the work left in the tree.
    pub(crate) fn finish(&mut self, remaining: Lanes) {
        let finished = self.pending - remaining;
        self.pending = remaining;
        self.expired &= remaining;
        for lane in finished.each_lane() {
            *self.expiration.get_mut(lane) = None;
            *self.interruptions.get_mut(lane) = 0;
            *self.entangled.get_mut(lane) = Lanes::empty();
        }
        for lane in Lane::ALL {
            *self.entangled.get_mut(lane) &= !finished;
        }
    }

    /// Forget `lanes` entirely (their pass failed without a boundary).
    pub(crate) fn drop_lanes(&mut self, lanes: Lanes) {
        let remaining = self.pending - lanes;
        self.finish(remaining);
        for lane in lanes.each_lane() {
            self.updaters.get_mut(lane).clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> StarvationPolicy {
        StarvationPolicy::default()
    }

    fn info(index: u32) -> UpdaterInfo {
        UpdaterInfo {
            node: NodeId::new(index, 0),
            kind: WorkKind::FunctionComponent,
            name: format!("C{index}"),
        }
    }

    #[test]
    fn next_lanes_picks_most_urgent() {
        let mut s = RootSchedule::default();
        assert_eq!(s.next_lanes(), None);
        s.mark_pending(Lane::TRANSITION, Duration::ZERO, &policy());
        s.mark_pending(Lane::DEFAULT, Duration::ZERO, &policy());
        assert_eq!(s.next_lanes(), Some(Lanes::DEFAULT));
    }

    #[test]
    fn entangled_lanes_render_together() {
        let mut s = RootSchedule::default();
        s.mark_pending(Lane::DEFAULT, Duration::ZERO, &policy());
        s.mark_pending(Lane::RETRY, Duration::ZERO, &policy());
        s.entangle(Lanes::DEFAULT | Lanes::RETRY);
        assert_eq!(s.next_lanes(), Some(Lanes::DEFAULT | Lanes::RETRY));
        s.finish(Lanes::RETRY);
        // Entanglement with a finished lane is gone.
        assert_eq!(s.next_lanes(), Some(Lanes::RETRY));
    }

    #[test]
    fn lanes_expire_by_time() {
        let mut s = RootSchedule::default();
        s.mark_pending(Lane::DEFAULT, Duration::ZERO, &policy());
        s.mark_starved(Duration::from_millis(4_999));
        assert!(!s.is_forced(Lanes::DEFAULT));
        s.mark_starved(Duration::from_secs(5));
        assert!(s.is_forced(Lanes::DEFAULT));
        s.finish(Lanes::empty());
        assert!(s.expired().is_empty());
    }

    #[test]
    fn idle_work_never_expires() {
        let mut s = RootSchedule::default();
        s.mark_pending(Lane::IDLE, Duration::ZERO, &policy());
        s.mark_starved(Duration::from_secs(3_600));
        assert!(!s.is_forced(Lanes::IDLE));
    }

    #[test]
    fn repeated_interruptions_expire_a_lane() {
        let mut s = RootSchedule::default();
        let policy = StarvationPolicy {
            max_interruptions: 2,
            ..StarvationPolicy::default()
        };
        s.mark_pending(Lane::TRANSITION, Duration::ZERO, &policy);
        s.record_interruption(Lanes::TRANSITION, &policy);
        assert!(!s.is_forced(Lanes::TRANSITION));
        s.record_interruption(Lanes::TRANSITION, &policy);
        assert!(s.is_forced(Lanes::TRANSITION));
    }

    #[test]
    fn updaters_are_deduplicated_and_restorable() {
        let mut s = RootSchedule::default();
        s.add_updater(Lane::DEFAULT, info(1));
        s.add_updater(Lane::DEFAULT, info(1));
        s.add_updater(Lane::SYNC, info(2));
        let taken = s.take_updaters(Lanes::DEFAULT);
        assert_eq!(taken.len(), 1);
        assert!(s.take_updaters(Lanes::DEFAULT).is_empty());
        s.restore_updaters(taken);
        assert_eq!(s.take_updaters(Lanes::all()).len(), 2);
    }

    #[test]
    fn sync_passes_are_always_forced() {
        let s = RootSchedule::default();
        assert!(s.is_forced(Lanes::SYNC));
        assert!(!s.is_forced(Lanes::DEFAULT));
    }
}
