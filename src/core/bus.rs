use flume::{Receiver, Sender};

use crate::scheduler::{ConfigAck, ConfigCommand, HealthSnapshot};

/// Messages sent from a control surface (stdin, remote management) to the poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlToCore {
    /// Apply a configuration change; answered with `Applied` or `Rejected`.
    Config(ConfigCommand),
    /// Ask for a health snapshot.
    Status,
    /// Stop issuing new requests. Completions are still processed.
    PausePolling,
    ResumePolling,
    /// Graceful shutdown request.
    Quit,
}

/// Messages sent from the poll loop back to the control surface.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreToControl {
    Applied(ConfigAck),
    Rejected(String),
    Health(HealthSnapshot),
    /// The loop exited and will not answer again.
    Stopped,
}

/// Both ends a control surface needs.
#[derive(Debug, Clone)]
pub struct Bus {
    pub core_rx: Receiver<CoreToControl>,
    pub control_tx: Sender<ControlToCore>,
}

impl Bus {
    pub fn new(core_rx: Receiver<CoreToControl>, control_tx: Sender<ControlToCore>) -> Self {
        Self {
            core_rx,
            control_tx,
        }
    }
}
