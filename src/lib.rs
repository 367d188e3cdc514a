//! tierpoll: tiered polling scheduler for a half-duplex serial device
//!
//! A device that answers one request at a time exposes many datapoints that
//! change at very different rates. This crate sorts them into fast, medium and
//! slow groups, sweeps each group round-robin on its own interval, keeps at
//! most one request on the link, and tracks consecutive communication
//! failures against a configurable fault threshold.
//!
//! The scheduler itself is transport agnostic: plug in a [`api::Transport`]
//! for the link and a [`api::Publisher`] for the decoded values. The boot and
//! CLI helpers used by the binary are hidden from the generated documentation.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;
pub mod scheduler;
pub mod transport;

pub use api::*;
