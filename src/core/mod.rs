pub mod bus;
pub mod runtime;

pub use bus::{Bus, ControlToCore, CoreToControl};
pub use runtime::{run_poll_loop, PollRuntime, RuntimeConfig};
