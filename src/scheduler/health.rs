use serde::{Deserialize, Serialize};

use crate::protocol::Tier;

pub const MIN_ERROR_THRESHOLD: u32 = 1;
pub const MAX_ERROR_THRESHOLD: u32 = 100;
pub const DEFAULT_ERROR_THRESHOLD: u32 = 5;

/// Fault state change caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultTransition {
    Unchanged,
    Raised,
    Cleared,
}

/// Consecutive and cumulative communication failure counters.
///
/// The tracker only reports; it never resets the link on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorTracker {
    consecutive_failures: u32,
    total_failures: u32,
    threshold: u32,
}

impl ErrorTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: 0,
            total_failures: 0,
            threshold: clamp_threshold(threshold),
        }
    }

    pub fn record_success(&mut self) -> FaultTransition {
        let was_faulted = self.is_faulted();
        self.consecutive_failures = 0;
        if was_faulted {
            FaultTransition::Cleared
        } else {
            FaultTransition::Unchanged
        }
    }

    pub fn record_failure(&mut self) -> FaultTransition {
        let was_faulted = self.is_faulted();
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        // Lifetime counter rolls over silently.
        self.total_failures = self.total_failures.wrapping_add(1);
        if !was_faulted && self.is_faulted() {
            FaultTransition::Raised
        } else {
            FaultTransition::Unchanged
        }
    }

    /// Store a threshold clamped to `[1, 100]` and return the effective value.
    pub fn set_threshold(&mut self, threshold: u32) -> u32 {
        self.threshold = clamp_threshold(threshold);
        self.threshold
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_failures(&self) -> u32 {
        self.total_failures
    }

    pub fn is_faulted(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_THRESHOLD)
    }
}

pub fn clamp_threshold(threshold: u32) -> u32 {
    threshold.clamp(MIN_ERROR_THRESHOLD, MAX_ERROR_THRESHOLD)
}

/// Point-in-time view published to reporting collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub consecutive_failures: u32,
    pub total_failures: u32,
    pub threshold: u32,
    pub faulted: bool,
    pub intervals_ms: Vec<TierInterval>,
    pub outstanding: bool,
    pub pending_writes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierInterval {
    pub tier: Tier,
    pub interval_ms: u32,
}

impl HealthSnapshot {
    pub fn interval_ms(&self, tier: Tier) -> Option<u32> {
        self.intervals_ms
            .iter()
            .find(|entry| entry.tier == tier)
            .map(|entry| entry.interval_ms)
    }
}
