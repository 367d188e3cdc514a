//! Tiered poll coordinator
//!
//! Owns the fast, medium and slow group schedulers plus the error tracker and
//! decides, once per tick, whether a request goes out on the link. At most one
//! request is outstanding at any time. A due fast group always goes first. Queued
//! writes come next, but never twice in a row while a group is due, so the
//! medium and slow groups still get their turn under a stream of writes.
use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::{
    command::{ConfigAck, ConfigCommand},
    group::GroupScheduler,
    health::{ErrorTracker, FaultTransition, HealthSnapshot, TierInterval, DEFAULT_ERROR_THRESHOLD},
    timer::{self, Timestamp},
};
use crate::{
    api::traits::{Publisher, Transport},
    protocol::{
        DatapointDescriptor, DatapointGroup, DatapointValue, Outcome, PollRequest, Reading,
        RequestHandle, RequestOrigin, Tier, WriteAck,
    },
};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u32 = 3000;
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 16;

/// When the first sweep of each group may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Every group waits one full interval after start-up before its first sweep.
    #[default]
    Deferred,
    /// Every group is due on the first tick; the fast tier goes out first.
    Immediate,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing due.
    Idle,
    /// A request is still on the link.
    Busy,
    Submitted {
        origin: RequestOrigin,
        handle: RequestHandle,
    },
    /// The transport did not accept the request; state unchanged.
    Refused { origin: RequestOrigin },
    /// The outstanding request passed its deadline and was failed.
    TimedOut {
        origin: RequestOrigin,
        handle: RequestHandle,
    },
}

#[derive(Debug, Clone)]
struct Outstanding {
    handle: RequestHandle,
    origin: RequestOrigin,
    descriptor: DatapointDescriptor,
    submitted_at: Timestamp,
    written: Option<DatapointValue>,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    descriptor: DatapointDescriptor,
    value: DatapointValue,
    payload: Vec<u8>,
}

/// Builder for a [`Coordinator`]. All three tiers must be given.
#[derive(Debug, Clone)]
pub struct CoordinatorBuilder {
    groups: [Option<(Vec<DatapointDescriptor>, u32)>; 3],
    error_threshold: u32,
    request_timeout_ms: u32,
    write_queue_capacity: usize,
    startup: StartupPolicy,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self {
            groups: [None, None, None],
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
            startup: StartupPolicy::Deferred,
        }
    }
}

impl CoordinatorBuilder {
    /// Set the datapoints and interval (whole seconds, clamped) of one tier.
    pub fn with_group(
        mut self,
        tier: Tier,
        datapoints: Vec<DatapointDescriptor>,
        interval_secs: u32,
    ) -> Self {
        self.groups[tier.index()] = Some((datapoints, interval_secs));
        self
    }

    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub fn with_request_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_write_queue_capacity(mut self, capacity: usize) -> Self {
        self.write_queue_capacity = capacity;
        self
    }

    pub fn with_startup(mut self, startup: StartupPolicy) -> Self {
        self.startup = startup;
        self
    }

    pub fn build<T: Transport, P: Publisher>(
        self,
        transport: T,
        publisher: P,
        now: Timestamp,
    ) -> Result<Coordinator<T, P>> {
        if self.request_timeout_ms == 0 {
            bail!("request timeout must be greater than zero");
        }
        let [fast, medium, slow] = self.groups;
        let mut groups = [
            make_group(Tier::Fast, fast)?,
            make_group(Tier::Medium, medium)?,
            make_group(Tier::Slow, slow)?,
        ];
        if self.startup == StartupPolicy::Deferred {
            for group in groups.iter_mut() {
                group.arm(now);
            }
        }
        Ok(Coordinator {
            groups,
            errors: ErrorTracker::new(self.error_threshold),
            outstanding: None,
            writes: VecDeque::new(),
            write_queue_capacity: self.write_queue_capacity,
            last_was_write: false,
            request_timeout_ms: self.request_timeout_ms,
            submitted: 0,
            transport,
            publisher,
        })
    }
}

fn make_group(tier: Tier, entry: Option<(Vec<DatapointDescriptor>, u32)>) -> Result<GroupScheduler> {
    let (datapoints, interval_secs) =
        entry.ok_or_else(|| anyhow!("no datapoints configured for the {tier} group"))?;
    let group = DatapointGroup::new(tier, datapoints)?;
    Ok(GroupScheduler::new(group, secs_to_ms(interval_secs)))
}

fn secs_to_ms(seconds: u32) -> u32 {
    seconds.saturating_mul(1000)
}

pub struct Coordinator<T, P> {
    groups: [GroupScheduler; 3],
    errors: ErrorTracker,
    outstanding: Option<Outstanding>,
    writes: VecDeque<PendingWrite>,
    write_queue_capacity: usize,
    /// The last accepted submission was a write.
    last_was_write: bool,
    request_timeout_ms: u32,
    /// Requests accepted by the transport since start-up.
    submitted: u64,
    transport: T,
    publisher: P,
}

impl Coordinator<(), ()> {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }
}

impl<T: Transport, P: Publisher> Coordinator<T, P> {
    /// Run one scheduling step.
    pub fn tick(&mut self, now: Timestamp) -> TickAction {
        if let Some(outstanding) = &self.outstanding {
            if !timer::elapsed(
                Some(outstanding.submitted_at),
                now,
                self.request_timeout_ms,
            ) {
                return TickAction::Busy;
            }
            let handle = outstanding.handle;
            let origin = outstanding.origin;
            log::warn!(
                "request {} ({} {}) timed out after {}ms",
                handle,
                origin,
                outstanding.descriptor,
                now.wrapping_since(outstanding.submitted_at)
            );
            self.on_complete(handle, Outcome::Failure("timeout".into()));
            return TickAction::TimedOut { origin, handle };
        }

        let due = self.groups.iter().position(|g| g.is_due(now));
        let fast_due = due == Some(Tier::Fast.index());
        if !self.writes.is_empty() && !fast_due && (due.is_none() || !self.last_was_write) {
            return self.submit_write(now);
        }

        let Some(slot) = due else {
            return TickAction::Idle;
        };
        let group = &mut self.groups[slot];
        let origin = RequestOrigin::Group(group.tier());
        let descriptor = group.next_request().clone();
        let request = PollRequest::read(descriptor.clone());
        match self.transport.submit(&request) {
            Ok(handle) => {
                group.on_submitted(now);
                log::debug!(
                    "submitted {} read {} of {} (index {})",
                    origin,
                    handle,
                    descriptor,
                    group.state().index
                );
                self.outstanding = Some(Outstanding {
                    handle,
                    origin,
                    descriptor,
                    submitted_at: now,
                    written: None,
                });
                self.submitted += 1;
                self.last_was_write = false;
                TickAction::Submitted { origin, handle }
            }
            Err(e) => {
                log::warn!("transport refused {} read of {}: {e}", origin, descriptor);
                TickAction::Refused { origin }
            }
        }
    }

    fn submit_write(&mut self, now: Timestamp) -> TickAction {
        let Some(write) = self.writes.front() else {
            return TickAction::Idle;
        };
        let request = PollRequest::write(write.descriptor.clone(), write.payload.clone());
        match self.transport.submit(&request) {
            Ok(handle) => {
                if let Some(write) = self.writes.pop_front() {
                    log::debug!("submitted write {} to {}", handle, write.descriptor);
                    self.outstanding = Some(Outstanding {
                        handle,
                        origin: RequestOrigin::Write,
                        descriptor: write.descriptor,
                        submitted_at: now,
                        written: Some(write.value),
                    });
                }
                self.submitted += 1;
                self.last_was_write = true;
                TickAction::Submitted {
                    origin: RequestOrigin::Write,
                    handle,
                }
            }
            Err(e) => {
                log::warn!("transport refused write: {e}");
                TickAction::Refused {
                    origin: RequestOrigin::Write,
                }
            }
        }
    }

    /// Route a transport completion. Returns false for a handle that is not the
    /// outstanding request (late completion after a timeout, duplicate).
    pub fn on_complete(&mut self, handle: RequestHandle, outcome: Outcome) -> bool {
        let outstanding = match self.outstanding.take() {
            Some(o) if o.handle == handle => o,
            other => {
                self.outstanding = other;
                log::warn!("ignoring completion for unknown request {handle}");
                return false;
            }
        };

        let success = match outstanding.origin {
            RequestOrigin::Group(tier) => {
                let success = self.finish_read(tier, &outstanding, outcome);
                self.groups[tier.index()].on_completed(success);
                success
            }
            RequestOrigin::Write => self.finish_write(&outstanding, outcome),
        };

        let transition = if success {
            self.errors.record_success()
        } else {
            self.errors.record_failure()
        };
        match transition {
            FaultTransition::Raised => {
                log::error!(
                    "communication fault: {} consecutive failures (threshold {})",
                    self.errors.consecutive_failures(),
                    self.errors.threshold()
                );
                self.publish_health();
            }
            FaultTransition::Cleared => {
                log::info!("communication fault cleared");
                self.publish_health();
            }
            FaultTransition::Unchanged => {}
        }
        true
    }

    fn finish_read(&self, tier: Tier, outstanding: &Outstanding, outcome: Outcome) -> bool {
        let payload = match outcome {
            Outcome::Success(payload) => payload,
            Outcome::Failure(reason) => {
                log::warn!(
                    "{} read of {} failed: {}",
                    tier,
                    outstanding.descriptor,
                    reason
                );
                return false;
            }
        };
        match outstanding.descriptor.decode(&payload) {
            Ok(value) => {
                log::trace!("{} {} = {}", tier, outstanding.descriptor, value);
                let reading = Reading {
                    tier,
                    datapoint: outstanding.descriptor.id.clone(),
                    address: outstanding.descriptor.address,
                    value,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                };
                if let Err(e) = self.publisher.publish_reading(&reading) {
                    log::warn!("failed to publish {}: {e}", reading.datapoint);
                }
                true
            }
            Err(e) => {
                log::warn!("malformed response for {}: {e}", outstanding.descriptor);
                false
            }
        }
    }

    fn finish_write(&self, outstanding: &Outstanding, outcome: Outcome) -> bool {
        let success = match &outcome {
            Outcome::Success(_) => true,
            Outcome::Failure(reason) => {
                log::warn!("write to {} failed: {}", outstanding.descriptor, reason);
                false
            }
        };
        if let Some(value) = &outstanding.written {
            let ack = WriteAck {
                datapoint: outstanding.descriptor.id.clone(),
                address: outstanding.descriptor.address,
                value: value.clone(),
                success,
                timestamp: chrono::Utc::now().to_rfc3339(),
            };
            if let Err(e) = self.publisher.publish_write(&ack) {
                log::warn!("failed to publish write ack for {}: {e}", ack.datapoint);
            }
        }
        success
    }

    /// Hand the current health snapshot to the publisher.
    pub fn publish_health(&self) {
        if let Err(e) = self.publisher.publish_health(&self.health()) {
            log::warn!("failed to publish health: {e}");
        }
    }

    /// Apply a configuration command and report the effective value.
    pub fn apply(&mut self, command: ConfigCommand) -> Result<ConfigAck> {
        match command {
            ConfigCommand::SetGroupInterval { tier, seconds } => Ok(ConfigAck::GroupInterval {
                tier,
                seconds: self.set_group_interval(tier, seconds),
            }),
            ConfigCommand::SetErrorThreshold(count) => Ok(ConfigAck::ErrorThreshold(
                self.set_error_threshold(count),
            )),
            ConfigCommand::QueueWrite { datapoint, value } => {
                let pending = self.queue_write(&datapoint, value)?;
                Ok(ConfigAck::WriteQueued { datapoint, pending })
            }
        }
    }

    /// Returns the effective interval in whole seconds.
    pub fn set_group_interval(&mut self, tier: Tier, seconds: u32) -> u32 {
        self.groups[tier.index()].set_interval(secs_to_ms(seconds)) / 1000
    }

    /// Returns the effective threshold.
    pub fn set_error_threshold(&mut self, threshold: u32) -> u32 {
        let effective = self.errors.set_threshold(threshold);
        if effective != threshold {
            log::info!("error threshold {threshold} clamped to {effective}");
        }
        effective
    }

    /// Queue a write to a set-point known to any group. Read-only datapoints and
    /// values outside the set-point's range are rejected. Returns the queue length.
    pub fn queue_write(&mut self, datapoint: &str, value: DatapointValue) -> Result<usize> {
        let descriptor = self
            .find_datapoint(datapoint)
            .ok_or_else(|| anyhow!("unknown datapoint '{datapoint}'"))?
            .clone();
        let payload = descriptor.encode_write(&value)?;
        if self.writes.len() >= self.write_queue_capacity {
            bail!(
                "write queue full ({} pending), dropping write to '{datapoint}'",
                self.writes.len()
            );
        }
        self.writes.push_back(PendingWrite {
            descriptor,
            value,
            payload,
        });
        Ok(self.writes.len())
    }

    pub fn find_datapoint(&self, id: &str) -> Option<&DatapointDescriptor> {
        self.groups
            .iter()
            .flat_map(|g| g.group().iter())
            .find(|dp| dp.id == id)
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            consecutive_failures: self.errors.consecutive_failures(),
            total_failures: self.errors.total_failures(),
            threshold: self.errors.threshold(),
            faulted: self.errors.is_faulted(),
            intervals_ms: self
                .groups
                .iter()
                .map(|g| TierInterval {
                    tier: g.tier(),
                    interval_ms: g.interval_ms(),
                })
                .collect(),
            outstanding: self.outstanding.is_some(),
            pending_writes: self.writes.len(),
        }
    }

    pub fn group(&self, tier: Tier) -> &GroupScheduler {
        &self.groups[tier.index()]
    }

    pub fn errors(&self) -> &ErrorTracker {
        &self.errors
    }

    pub fn is_faulted(&self) -> bool {
        self.errors.is_faulted()
    }

    pub fn interval_ms(&self, tier: Tier) -> u32 {
        self.group(tier).interval_ms()
    }

    pub fn outstanding(&self) -> Option<(RequestHandle, RequestOrigin)> {
        self.outstanding.as_ref().map(|o| (o.handle, o.origin))
    }

    pub fn submissions(&self) -> u64 {
        self.submitted
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }
}
