/// Poll loop driving a [`Coordinator`] on a blocking worker
///
/// Each iteration drains control messages, routes link completions into the
/// coordinator and runs one scheduling tick. Everything that mutates scheduler
/// state happens on this one thread.
use anyhow::{anyhow, Result};
use flume::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::bus::{Bus, ControlToCore, CoreToControl};
use crate::{
    api::traits::{Publisher, Transport},
    protocol::Completion,
    scheduler::{Clock, ConfigCommand, Coordinator, Timer},
};

/// Configuration for the poll loop
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on the time between two ticks
    pub tick_interval: Duration,
    /// Period of the unsolicited health report; 0 disables it
    pub status_interval_ms: u32,
    /// Whether polling is enabled on startup
    pub polling_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            status_interval_ms: 30_000,
            polling_enabled: true,
        }
    }
}

fn notify(core_tx: &Sender<CoreToControl>, message: CoreToControl) {
    if core_tx.send(message).is_err() {
        log::trace!("control surface gone, dropping notification");
    }
}

/// Run the poll loop until `Quit` arrives, the control side disconnects or the
/// link worker stops.
pub fn run_poll_loop<T, P, C>(
    coordinator: &mut Coordinator<T, P>,
    clock: &C,
    completions: Receiver<Completion>,
    control_rx: Receiver<ControlToCore>,
    core_tx: Sender<CoreToControl>,
    config: RuntimeConfig,
) -> Result<()>
where
    T: Transport,
    P: Publisher,
    C: Clock,
{
    let mut polling_enabled = config.polling_enabled;
    let mut status_timer =
        (config.status_interval_ms > 0).then(|| Timer::new(config.status_interval_ms));

    loop {
        loop {
            let msg = match control_rx.try_recv() {
                Ok(msg) => msg,
                Err(flume::TryRecvError::Empty) => break,
                Err(flume::TryRecvError::Disconnected) => {
                    log::info!("control channel closed, stopping poll loop");
                    notify(&core_tx, CoreToControl::Stopped);
                    return Ok(());
                }
            };
            match msg {
                ControlToCore::Quit => {
                    log::info!("Received quit signal");
                    notify(&core_tx, CoreToControl::Stopped);
                    return Ok(());
                }
                ControlToCore::Config(command) => match coordinator.apply(command) {
                    Ok(ack) => {
                        log::info!("applied: {ack}");
                        notify(&core_tx, CoreToControl::Applied(ack));
                    }
                    Err(err) => {
                        log::warn!("rejected configuration command: {err}");
                        notify(&core_tx, CoreToControl::Rejected(err.to_string()));
                    }
                },
                ControlToCore::Status => {
                    notify(&core_tx, CoreToControl::Health(coordinator.health()));
                }
                ControlToCore::PausePolling => {
                    log::info!("polling paused");
                    polling_enabled = false;
                }
                ControlToCore::ResumePolling => {
                    log::info!("polling resumed");
                    polling_enabled = true;
                }
            }
        }

        while let Ok(Completion { handle, outcome }) = completions.try_recv() {
            coordinator.on_complete(handle, outcome);
        }

        let now = clock.now();
        if polling_enabled || coordinator.outstanding().is_some() {
            // While paused this only enforces the deadline of the request on the link.
            coordinator.tick(now);
        }

        if let Some(timer) = status_timer.as_mut() {
            if timer.ready(now) {
                coordinator.publish_health();
            }
        }

        match completions.recv_timeout(config.tick_interval) {
            Ok(Completion { handle, outcome }) => {
                coordinator.on_complete(handle, outcome);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                notify(&core_tx, CoreToControl::Stopped);
                return Err(anyhow!("link worker stopped"));
            }
        }
    }
}

/// Handle to a poll loop running on the tokio blocking pool
pub struct PollRuntime {
    bus: Bus,
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl PollRuntime {
    /// Move the coordinator onto a blocking worker and start polling.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T, P, C>(
        mut coordinator: Coordinator<T, P>,
        clock: C,
        completions: Receiver<Completion>,
        config: RuntimeConfig,
    ) -> Self
    where
        T: Transport + 'static,
        P: Publisher + 'static,
        C: Clock + Send + 'static,
    {
        let (control_tx, control_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded();
        let handle = tokio::task::spawn_blocking(move || {
            run_poll_loop(
                &mut coordinator,
                &clock,
                completions,
                control_rx,
                core_tx,
                config,
            )
        });
        Self {
            bus: Bus::new(core_rx, control_tx),
            handle,
        }
    }

    /// A cloneable pair of channel ends for additional control surfaces.
    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    pub fn send(&self, message: ControlToCore) -> Result<()> {
        self.bus
            .control_tx
            .send(message)
            .map_err(|err| anyhow!("Failed to send control message: {err}"))
    }

    pub fn apply(&self, command: ConfigCommand) -> Result<()> {
        self.send(ControlToCore::Config(command))
    }

    pub fn try_recv(&self) -> Option<CoreToControl> {
        self.bus.core_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<CoreToControl> {
        self.bus.core_rx.recv_timeout(timeout).ok()
    }

    /// Ask the loop to quit and wait for it.
    pub async fn stop(self) -> Result<()> {
        // The loop may already be gone; the join result tells why.
        let _ = self.send(ControlToCore::Quit);
        self.handle.await?
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
