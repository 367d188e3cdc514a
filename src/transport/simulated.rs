use flume::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, thread, time::Duration};

use super::channel::{ChannelTransport, LinkRequest};
use crate::protocol::{Completion, Outcome, RequestKind};

/// Behaviour of the in-memory device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay between receiving a request and answering it.
    pub latency_ms: u64,
    /// Every n-th request fails; 0 disables failure injection.
    pub fail_every: u32,
    /// Every n-th request is never answered, so the caller has to time out; 0 disables.
    pub drop_every: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency_ms: 40,
            fail_every: 0,
            drop_every: 0,
        }
    }
}

/// Register map served by [`SimulatedDevice`]. Unknown addresses read as zeros.
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    registers: HashMap<u16, Vec<u8>>,
}

impl RegisterMap {
    pub fn with_register(mut self, address: u16, bytes: Vec<u8>) -> Self {
        self.registers.insert(address, bytes);
        self
    }

    fn read(&self, address: u16, length: u8) -> Vec<u8> {
        let mut bytes = self
            .registers
            .get(&address)
            .cloned()
            .unwrap_or_default();
        bytes.resize(usize::from(length), 0);
        bytes
    }

    fn write(&mut self, address: u16, bytes: Vec<u8>) {
        self.registers.insert(address, bytes);
    }
}

/// Worker thread that answers link requests from an in-memory register map.
pub struct SimulatedDevice {
    pub completions: Receiver<Completion>,
    handle: thread::JoinHandle<()>,
}

impl SimulatedDevice {
    /// Spawn the worker and return the transport that feeds it.
    pub fn spawn(config: SimulationConfig, registers: RegisterMap) -> (ChannelTransport, Self) {
        let (transport, requests) = ChannelTransport::new();
        let (completion_tx, completions) = flume::unbounded();
        let handle = thread::spawn(move || run_loop(config, registers, requests, completion_tx));
        (
            transport,
            Self {
                completions,
                handle,
            },
        )
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

fn run_loop(
    config: SimulationConfig,
    mut registers: RegisterMap,
    requests: Receiver<LinkRequest>,
    completions: Sender<Completion>,
) {
    let mut served: u32 = 0;
    loop {
        let (handle, request) = match requests.recv_timeout(Duration::from_millis(200)) {
            Ok(next) => next,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("simulated device: transport dropped, stopping");
                return;
            }
        };
        served = served.wrapping_add(1);
        if config.latency_ms > 0 {
            thread::sleep(Duration::from_millis(config.latency_ms));
        }
        if config.drop_every > 0 && served % config.drop_every == 0 {
            log::debug!("simulated device: swallowing {handle}");
            continue;
        }
        let outcome = if config.fail_every > 0 && served % config.fail_every == 0 {
            Outcome::Failure("simulated checksum error".into())
        } else {
            let descriptor = &request.descriptor;
            match request.kind {
                RequestKind::Read => {
                    Outcome::Success(registers.read(descriptor.address, descriptor.length))
                }
                RequestKind::Write(bytes) => {
                    registers.write(descriptor.address, bytes);
                    Outcome::Success(Vec::new())
                }
            }
        };
        if completions.send(Completion { handle, outcome }).is_err() {
            return;
        }
    }
}
