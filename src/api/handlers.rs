/// Flume-backed publisher
///
/// Forwards every scheduler output as a [`PollEvent`] into a channel, so an
/// embedding application (MQTT bridge, UI, recorder) can consume readings on
/// its own thread.
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    api::traits::Publisher,
    protocol::{Reading, WriteAck},
    scheduler::HealthSnapshot,
};

/// One scheduler output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollEvent {
    Reading(Reading),
    Write(WriteAck),
    Health(HealthSnapshot),
}

pub struct ChannelPublisher {
    sender: flume::Sender<PollEvent>,
    running: Arc<AtomicBool>,
}

impl ChannelPublisher {
    /// Create a publisher with an unbounded channel
    pub fn new() -> (Self, flume::Receiver<PollEvent>) {
        let (sender, receiver) = flume::unbounded();
        (Self::from_sender(sender), receiver)
    }

    /// Create a publisher with a bounded channel. A full channel makes
    /// publishing fail instead of blocking the scheduler.
    pub fn with_capacity(cap: usize) -> (Self, flume::Receiver<PollEvent>) {
        let (sender, receiver) = flume::bounded(cap);
        (Self::from_sender(sender), receiver)
    }

    fn from_sender(sender: flume::Sender<PollEvent>) -> Self {
        Self {
            sender,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mute the publisher; later events are dropped silently.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn get_control_handle(&self) -> PublisherControl {
        PublisherControl {
            running: Arc::clone(&self.running),
        }
    }

    fn forward(&self, event: PollEvent) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.sender.try_send(event).map_err(|e| match e {
            flume::TrySendError::Full(_) => anyhow!("event channel full"),
            flume::TrySendError::Disconnected(_) => anyhow!("event receiver dropped"),
        })
    }
}

impl Publisher for ChannelPublisher {
    fn publish_reading(&self, reading: &Reading) -> Result<()> {
        self.forward(PollEvent::Reading(reading.clone()))
    }

    fn publish_write(&self, ack: &WriteAck) -> Result<()> {
        self.forward(PollEvent::Write(ack.clone()))
    }

    fn publish_health(&self, snapshot: &HealthSnapshot) -> Result<()> {
        self.forward(PollEvent::Health(snapshot.clone()))
    }
}

/// Control handle for a [`ChannelPublisher`] that outlives the move into the
/// coordinator.
#[derive(Clone)]
pub struct PublisherControl {
    running: Arc<AtomicBool>,
}

impl PublisherControl {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
