//! Collaborator traits of the poll coordinator
//!
//! The coordinator never talks to a serial port or a broker directly. A
//! [`Transport`] carries requests to the device and reports completions back,
//! a [`Publisher`] consumes decoded values and health state.
//!
//! Channel-backed and logging implementations live in the `handlers` and
//! `transport` modules.
use anyhow::Result;
use std::sync::Arc;

use crate::{
    protocol::{PollRequest, Reading, RequestHandle, WriteAck},
    scheduler::HealthSnapshot,
};

/// Non-blocking request sink on the half-duplex link
///
/// `submit` must return immediately. The completion for the returned handle
/// is delivered later, exactly once, through the coordinator's
/// `on_complete`. Returning `Err` means the request was not accepted (link
/// busy, worker gone); the coordinator keeps its state and retries on a later
/// tick.
pub trait Transport: Send {
    fn submit(&mut self, request: &PollRequest) -> Result<RequestHandle>;
}

/// Consumer of scheduler outputs
///
/// Errors are logged by the coordinator and never stop scheduling.
pub trait Publisher: Send + Sync {
    /// Called for every successfully decoded read.
    fn publish_reading(&self, reading: &Reading) -> Result<()>;

    /// Called when a queued write completed, successfully or not.
    fn publish_write(&self, _ack: &WriteAck) -> Result<()> {
        Ok(())
    }

    /// Called on fault transitions and on the runtime's status cadence.
    fn publish_health(&self, _snapshot: &HealthSnapshot) -> Result<()> {
        Ok(())
    }
}

impl<P: Publisher + ?Sized> Publisher for Arc<P> {
    fn publish_reading(&self, reading: &Reading) -> Result<()> {
        (**self).publish_reading(reading)
    }

    fn publish_write(&self, ack: &WriteAck) -> Result<()> {
        (**self).publish_write(ack)
    }

    fn publish_health(&self, snapshot: &HealthSnapshot) -> Result<()> {
        (**self).publish_health(snapshot)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(&mut self, request: &PollRequest) -> Result<RequestHandle> {
        (**self).submit(request)
    }
}

/// Publisher that drops everything (useful for tests)
pub struct NoOpPublisher;

impl Publisher for NoOpPublisher {
    fn publish_reading(&self, _reading: &Reading) -> Result<()> {
        Ok(())
    }
}

/// Publisher that logs every output
pub struct LoggingPublisher;

impl Publisher for LoggingPublisher {
    fn publish_reading(&self, reading: &Reading) -> Result<()> {
        log::info!(
            "{} {}@0x{:04X} = {}",
            reading.tier,
            reading.datapoint,
            reading.address,
            reading.value
        );
        Ok(())
    }

    fn publish_write(&self, ack: &WriteAck) -> Result<()> {
        if ack.success {
            log::info!("write {} <- {} confirmed", ack.datapoint, ack.value);
        } else {
            log::warn!("write {} <- {} failed", ack.datapoint, ack.value);
        }
        Ok(())
    }

    fn publish_health(&self, snapshot: &HealthSnapshot) -> Result<()> {
        log::info!(
            "health: consecutive={} total={} threshold={} faulted={}",
            snapshot.consecutive_failures,
            snapshot.total_failures,
            snapshot.threshold,
            snapshot.faulted
        );
        Ok(())
    }
}
