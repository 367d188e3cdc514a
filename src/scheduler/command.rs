use anyhow::{anyhow, bail, Result};
use std::{fmt, str::FromStr};

use crate::protocol::{DatapointValue, Tier};

/// Runtime configuration change requested by an external collaborator.
///
/// Every variant is idempotent; out-of-range numbers are clamped by the
/// receiving setter and the effective value is reported in [`ConfigAck`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigCommand {
    SetGroupInterval { tier: Tier, seconds: u32 },
    SetErrorThreshold(u32),
    QueueWrite {
        datapoint: String,
        value: DatapointValue,
    },
}

/// Effective value after a [`ConfigCommand`] was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigAck {
    GroupInterval { tier: Tier, seconds: u32 },
    ErrorThreshold(u32),
    WriteQueued { datapoint: String, pending: usize },
}

impl fmt::Display for ConfigAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigAck::GroupInterval { tier, seconds } => {
                write!(f, "{tier} interval = {seconds}s")
            }
            ConfigAck::ErrorThreshold(n) => write!(f, "error threshold = {n}"),
            ConfigAck::WriteQueued { datapoint, pending } => {
                write!(f, "write to '{datapoint}' queued ({pending} pending)")
            }
        }
    }
}

/// Parse a whole-second interval. Fractions are truncated and negative values
/// become zero, which the setter then raises to the floor.
fn parse_seconds(text: &str) -> Result<u32> {
    if let Ok(v) = text.parse::<u32>() {
        return Ok(v);
    }
    let v: f64 = text
        .parse()
        .map_err(|_| anyhow!("'{text}' is not a number of seconds"))?;
    if !v.is_finite() {
        bail!("'{text}' is not a number of seconds");
    }
    Ok(v.clamp(0.0, f64::from(u32::MAX)) as u32)
}

fn parse_count(text: &str) -> Result<u32> {
    if text.starts_with('-') {
        return Ok(0);
    }
    text.parse::<u64>()
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
        .map_err(|_| anyhow!("'{text}' is not a count"))
}

impl FromStr for ConfigCommand {
    type Err = anyhow::Error;

    /// Line format used by the remote-management channel:
    /// `interval <tier> <seconds>`, `threshold <count>`, `write <datapoint> <value>`.
    fn from_str(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["interval", tier, seconds] => Ok(ConfigCommand::SetGroupInterval {
                tier: tier
                    .parse()
                    .map_err(|_| anyhow!("unknown tier '{tier}'"))?,
                seconds: parse_seconds(seconds)?,
            }),
            ["threshold", count] => Ok(ConfigCommand::SetErrorThreshold(parse_count(count)?)),
            ["write", datapoint, value] => Ok(ConfigCommand::QueueWrite {
                datapoint: (*datapoint).to_string(),
                value: DatapointValue::parse(value)?,
            }),
            [] => bail!("empty command"),
            [verb, ..] => bail!("unrecognised command '{verb}'"),
        }
    }
}
