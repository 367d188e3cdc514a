//! Link-side implementations of [`crate::api::Transport`].

pub mod channel;
pub mod simulated;

pub use channel::{ChannelTransport, LinkRequest};
pub use simulated::{RegisterMap, SimulatedDevice, SimulationConfig};
