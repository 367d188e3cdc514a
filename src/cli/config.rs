use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use crate::{
    core::RuntimeConfig,
    protocol::{DatapointDescriptor, Decoder, Tier, WriteRange},
    scheduler::{
        CoordinatorBuilder, StartupPolicy, DEFAULT_ERROR_THRESHOLD, DEFAULT_REQUEST_TIMEOUT_MS,
        DEFAULT_WRITE_QUEUE_CAPACITY,
    },
    transport::SimulationConfig,
};

/// One tier of the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Sweep interval in whole seconds, clamped to the tier's range when applied
    pub interval_secs: u32,
    pub datapoints: Vec<DatapointDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupsConfig {
    pub fast: GroupConfig,
    pub medium: GroupConfig,
    pub slow: GroupConfig,
}

impl GroupsConfig {
    pub fn get(&self, tier: Tier) -> &GroupConfig {
        match tier {
            Tier::Fast => &self.fast,
            Tier::Medium => &self.medium,
            Tier::Slow => &self.slow,
        }
    }
}

/// Poller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default)]
    pub startup: StartupPolicy,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u32,
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Health report period; 0 turns the periodic report off
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u32,
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
    #[serde(default)]
    pub simulation: SimulationConfig,
    pub groups: GroupsConfig,
}

fn default_request_timeout_ms() -> u32 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_error_threshold() -> u32 {
    DEFAULT_ERROR_THRESHOLD
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_status_interval_secs() -> u32 {
    30
}

fn default_write_queue_capacity() -> usize {
    DEFAULT_WRITE_QUEUE_CAPACITY
}

fn dp(id: &str, address: u16, length: u8, decoder: Decoder) -> DatapointDescriptor {
    DatapointDescriptor {
        id: id.to_string(),
        address,
        length,
        decoder,
        writable: None,
    }
}

fn setpoint(
    id: &str,
    address: u16,
    length: u8,
    decoder: Decoder,
    min: f32,
    max: f32,
) -> DatapointDescriptor {
    DatapointDescriptor {
        writable: Some(WriteRange { min, max }),
        ..dp(id, address, length, decoder)
    }
}

impl Default for PollerConfig {
    /// Heat pump catalog: hydraulics and compressor state poll fast, comfort
    /// temperatures and pumps poll at medium pace, set-points and modes poll slowly.
    fn default() -> Self {
        Self {
            startup: StartupPolicy::default(),
            request_timeout_ms: default_request_timeout_ms(),
            error_threshold: default_error_threshold(),
            tick_interval_ms: default_tick_interval_ms(),
            status_interval_secs: default_status_interval_secs(),
            write_queue_capacity: default_write_queue_capacity(),
            simulation: SimulationConfig::default(),
            groups: GroupsConfig {
                fast: GroupConfig {
                    interval_secs: Tier::Fast.default_interval_secs(),
                    datapoints: vec![
                        dp("flow_temp", 0x0105, 2, Decoder::Div10),
                        dp("return_temp", 0x0106, 2, Decoder::Div10),
                        dp("compressor_frequency", 0x1A54, 1, Decoder::NoConv),
                        dp("relay_compressor", 0x0480, 1, Decoder::NoConv),
                    ],
                },
                medium: GroupConfig {
                    interval_secs: Tier::Medium.default_interval_secs(),
                    datapoints: vec![
                        dp("outside_temp", 0x0101, 2, Decoder::Div10),
                        dp("dhw_temp_top", 0x010D, 2, Decoder::Div10),
                        dp("heating_circuit_pump", 0x048D, 1, Decoder::NoConv),
                        dp("dhw_circulation_pump", 0x0490, 1, Decoder::NoConv),
                        dp("fault", 0x0491, 1, Decoder::NoConv),
                    ],
                },
                slow: GroupConfig {
                    interval_secs: Tier::Slow.default_interval_secs(),
                    datapoints: vec![
                        setpoint("room_setpoint", 0x2000, 2, Decoder::Div10, 10.0, 30.0),
                        setpoint("room_setpoint_reduced", 0x2001, 2, Decoder::Div10, 10.0, 30.0),
                        setpoint("dhw_setpoint", 0x6000, 2, Decoder::Div10, 20.0, 60.0),
                        setpoint("dhw_hysteresis", 0x6007, 2, Decoder::Div10, 1.0, 20.0),
                        setpoint("heating_curve_level", 0x2006, 2, Decoder::Div10, 0.0, 10.0),
                        setpoint("heating_curve_slope", 0x2007, 2, Decoder::Div10, 0.0, 1.0),
                        dp("operation_mode", 0xB000, 1, Decoder::NoConv),
                        // normal, manual, DHW to second set-point
                        setpoint("manual_mode", 0xB020, 1, Decoder::NoConv, 0.0, 2.0),
                    ],
                },
            },
        }
    }
}

impl PollerConfig {
    /// Parse configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Read configuration from a file; the extension picks the format
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let parsed = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&content),
            Some("json") | None => Self::from_json(&content),
            Some(other) => bail!("unsupported config format '.{other}'"),
        };
        parsed.with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Every datapoint of the catalog, fast tier first.
    pub fn datapoints(&self) -> impl Iterator<Item = &DatapointDescriptor> {
        Tier::all()
            .iter()
            .flat_map(|&tier| self.groups.get(tier).datapoints.iter())
    }

    pub fn datapoint_count(&self) -> usize {
        self.datapoints().count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject catalogs that could not be scheduled.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be greater than zero");
        }
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be greater than zero");
        }
        for &tier in Tier::all() {
            if self.groups.get(tier).datapoints.is_empty() {
                bail!("group {tier} has no datapoints");
            }
        }
        let mut seen = std::collections::HashSet::new();
        for datapoint in self.datapoints() {
            datapoint.validate()?;
            if !seen.insert(datapoint.id.as_str()) {
                return Err(anyhow!("datapoint '{}' is defined twice", datapoint.id));
            }
        }
        Ok(())
    }

    /// Coordinator settings described by this configuration
    pub fn coordinator_builder(&self) -> CoordinatorBuilder {
        Tier::all().iter().fold(
            CoordinatorBuilder::default()
                .with_startup(self.startup)
                .with_error_threshold(self.error_threshold)
                .with_request_timeout_ms(self.request_timeout_ms)
                .with_write_queue_capacity(self.write_queue_capacity),
            |builder, &tier| {
                let group = self.groups.get(tier);
                builder.with_group(tier, group.datapoints.clone(), group.interval_secs)
            },
        )
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            status_interval_ms: self.status_interval_secs.saturating_mul(1000),
            polling_enabled: true,
        }
    }
}
