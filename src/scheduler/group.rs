use anyhow::Result;
use serde::Serialize;

use super::timer::{self, Timestamp};
use crate::protocol::{DatapointDescriptor, DatapointGroup, Tier};

/// Mutable scheduling state of one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupState {
    /// Next datapoint to request, always `< group.len()`.
    pub index: usize,
    pub last_request_at: Option<Timestamp>,
    /// Start of the current sweep. `None` until the group is armed or polled.
    pub round_started_at: Option<Timestamp>,
    pub interval_ms: u32,
}

/// Round-robin scheduler over one datapoint group.
///
/// A sweep starts when index 0 is submitted; the next sweep may not start
/// before `interval_ms` has passed since that submission.
#[derive(Debug, Clone)]
pub struct GroupScheduler {
    group: DatapointGroup,
    state: GroupState,
}

impl GroupScheduler {
    pub fn new(group: DatapointGroup, interval_ms: u32) -> Self {
        let interval_ms = group.tier().clamp_interval_ms(interval_ms);
        Self {
            group,
            state: GroupState {
                index: 0,
                last_request_at: None,
                round_started_at: None,
                interval_ms,
            },
        }
    }

    /// Build a scheduler straight from descriptors; an empty list is rejected.
    pub fn from_datapoints(
        tier: Tier,
        datapoints: Vec<DatapointDescriptor>,
        interval_ms: u32,
    ) -> Result<Self> {
        Ok(Self::new(DatapointGroup::new(tier, datapoints)?, interval_ms))
    }

    pub fn tier(&self) -> Tier {
        self.group.tier()
    }

    pub fn group(&self) -> &DatapointGroup {
        &self.group
    }

    pub fn state(&self) -> &GroupState {
        &self.state
    }

    pub fn interval_ms(&self) -> u32 {
        self.state.interval_ms
    }

    /// Start counting the first interval at `now`, so the first sweep waits one
    /// full period.
    pub fn arm(&mut self, now: Timestamp) {
        self.state.round_started_at = Some(now);
    }

    /// An unarmed group that never swept is due right away.
    pub fn is_due(&self, now: Timestamp) -> bool {
        match self.state.round_started_at {
            None => true,
            mark => timer::elapsed(mark, now, self.state.interval_ms),
        }
    }

    pub fn next_request(&self) -> &DatapointDescriptor {
        // index < len is kept by `on_completed`, and groups are never empty.
        &self.group.datapoints()[self.state.index]
    }

    pub fn on_submitted(&mut self, now: Timestamp) {
        self.state.last_request_at = Some(now);
        if self.state.index == 0 {
            self.state.round_started_at = Some(now);
        }
    }

    /// Advance to the next datapoint; success or failure both move on so one bad
    /// datapoint cannot stall the sweep.
    pub fn on_completed(&mut self, success: bool) {
        log::trace!(
            "{} datapoint {} completed, success={}",
            self.tier(),
            self.state.index,
            success
        );
        self.state.index = (self.state.index + 1) % self.group.len();
        if self.state.index == 0 {
            log::trace!("{} sweep finished", self.tier());
        }
    }

    /// Store a clamped interval and return the effective value. The running sweep
    /// keeps its start mark.
    pub fn set_interval(&mut self, interval_ms: u32) -> u32 {
        let effective = self.tier().clamp_interval_ms(interval_ms);
        if effective != interval_ms {
            log::info!(
                "{} interval {}ms clamped to {}ms",
                self.tier(),
                interval_ms,
                effective
            );
        }
        self.state.interval_ms = effective;
        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Decoder;

    fn ts(ms: u32) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn scheduler(size: usize, interval_ms: u32) -> GroupScheduler {
        let datapoints = (0..size)
            .map(|i| {
                DatapointDescriptor::new(format!("dp{i}"), 0x0100 + i as u16, 2, Decoder::Div10)
                    .unwrap()
            })
            .collect();
        GroupScheduler::from_datapoints(Tier::Fast, datapoints, interval_ms).unwrap()
    }

    #[test]
    fn test_empty_group_fails_fast() {
        assert!(GroupScheduler::from_datapoints(Tier::Slow, Vec::new(), 10_000).is_err());
    }

    #[test]
    fn test_not_due_until_interval_after_sweep_start() {
        let mut g = scheduler(1, 5000);
        g.on_submitted(ts(1000));
        g.on_completed(true);
        assert!(!g.is_due(ts(1000)));
        assert!(!g.is_due(ts(5999)));
        assert!(g.is_due(ts(6000)));
    }

    #[test]
    fn test_due_across_clock_rollover() {
        let mut g = scheduler(1, 5000);
        g.on_submitted(ts(u32::MAX - 1000));
        g.on_completed(true);
        assert!(!g.is_due(ts(3998)));
        assert!(g.is_due(ts(3999)));
    }

    #[test]
    fn test_armed_group_waits_one_interval() {
        let mut g = scheduler(2, 5000);
        g.arm(ts(0));
        assert!(!g.is_due(ts(0)));
        assert!(!g.is_due(ts(4999)));
        assert!(g.is_due(ts(5000)));
    }

    #[test]
    fn test_unarmed_group_is_due() {
        let g = scheduler(2, 5000);
        assert!(g.is_due(ts(0)));
    }

    #[test]
    fn test_full_sweep_wraps_index() {
        let mut g = scheduler(3, 5000);
        let mut now = 0;
        for expected in ["dp0", "dp1", "dp2"] {
            assert_eq!(g.next_request().id, expected);
            g.on_submitted(ts(now));
            g.on_completed(expected != "dp1");
            now += 100;
        }
        assert_eq!(g.state().index, 0);
        assert_eq!(g.state().round_started_at, Some(ts(0)));
        assert_eq!(g.state().last_request_at, Some(ts(200)));

        g.on_submitted(ts(7000));
        assert_eq!(g.state().round_started_at, Some(ts(7000)));
    }

    #[test]
    fn test_mid_sweep_submission_keeps_round_start() {
        let mut g = scheduler(2, 5000);
        g.on_submitted(ts(0));
        g.on_completed(false);
        g.on_submitted(ts(5050));
        assert_eq!(g.state().round_started_at, Some(ts(0)));
        assert_eq!(g.state().last_request_at, Some(ts(5050)));
    }

    #[test]
    fn test_set_interval_clamps_and_keeps_sweep() {
        let mut g = scheduler(2, 60_000);
        g.on_submitted(ts(1000));
        assert_eq!(g.set_interval(1000), 5000);
        assert_eq!(g.state().round_started_at, Some(ts(1000)));
        assert!(g.is_due(ts(6000)));
        assert_eq!(g.set_interval(10_000_000), 300_000);
    }

    #[test]
    fn test_next_request_does_not_mutate() {
        let g = scheduler(2, 5000);
        let before = g.state().clone();
        let _ = g.next_request();
        let _ = g.next_request();
        assert_eq!(g.state(), &before);
    }
}
