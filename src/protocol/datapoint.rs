use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString};

/// Polling cadence class of a datapoint group.
///
/// The declaration order is the arbitration priority: a due `Fast` group is
/// always served before `Medium`, and `Medium` before `Slow`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumString,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Tier {
    Fast,
    Medium,
    Slow,
}

impl Tier {
    pub const fn all() -> &'static [Tier] {
        &[Self::Fast, Self::Medium, Self::Slow]
    }

    pub const fn index(self) -> usize {
        match self {
            Tier::Fast => 0,
            Tier::Medium => 1,
            Tier::Slow => 2,
        }
    }

    /// Accepted interval range in whole seconds, `(floor, ceiling)`.
    pub const fn interval_bounds_secs(self) -> (u32, u32) {
        match self {
            Tier::Fast => (MIN_INTERVAL_SECS, 300),
            Tier::Medium => (MIN_INTERVAL_SECS, 600),
            Tier::Slow => (MIN_INTERVAL_SECS, 1800),
        }
    }

    pub const fn default_interval_secs(self) -> u32 {
        match self {
            Tier::Fast => 10,
            Tier::Medium => 60,
            Tier::Slow => 300,
        }
    }

    /// Clamp a requested interval into this tier's range and convert it to milliseconds.
    pub fn clamp_interval_ms(self, interval_ms: u32) -> u32 {
        let (floor, ceiling) = self.interval_bounds_secs();
        interval_ms.clamp(floor * 1000, ceiling * 1000)
    }
}

/// Minimum accepted polling interval for every tier, in seconds.
pub const MIN_INTERVAL_SECS: u32 = 5;

/// Rule used to turn a little-endian payload into a value (and back, for writes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Decoder {
    /// Signed 16-bit value scaled by 1/10 (temperatures).
    Div10,
    /// Unsigned 8-bit value scaled by 1/2.
    Div2,
    /// Unsigned 32-bit second counter reported in hours.
    Div3600,
    /// Unsigned integer of 1, 2 or 4 bytes (relays, modes, frequencies).
    #[serde(rename = "noconv")]
    #[strum(serialize = "noconv")]
    NoConv,
    /// Payload passed through untouched.
    Raw,
}

impl Decoder {
    /// Check that `length` bytes is a payload width this rule can handle.
    pub fn check_width(self, length: u8) -> Result<()> {
        let ok = match self {
            Decoder::Div10 => length == 2,
            Decoder::Div2 => length == 1,
            Decoder::Div3600 => length == 4,
            Decoder::NoConv => matches!(length, 1 | 2 | 4),
            Decoder::Raw => length > 0,
        };
        if !ok {
            bail!("decoder {self} cannot handle a {length}-byte payload");
        }
        Ok(())
    }

    pub fn decode(self, payload: &[u8]) -> Result<DatapointValue> {
        let value = match (self, payload) {
            (Decoder::Div10, [lo, hi]) => {
                DatapointValue::Float(f32::from(i16::from_le_bytes([*lo, *hi])) / 10.0)
            }
            (Decoder::Div2, [b]) => DatapointValue::Float(f32::from(*b) / 2.0),
            (Decoder::Div3600, [a, b, c, d]) => {
                DatapointValue::Float(u32::from_le_bytes([*a, *b, *c, *d]) as f32 / 3600.0)
            }
            (Decoder::NoConv, [b]) => DatapointValue::Unsigned(u32::from(*b)),
            (Decoder::NoConv, [lo, hi]) => {
                DatapointValue::Unsigned(u32::from(u16::from_le_bytes([*lo, *hi])))
            }
            (Decoder::NoConv, [a, b, c, d]) => {
                DatapointValue::Unsigned(u32::from_le_bytes([*a, *b, *c, *d]))
            }
            (Decoder::Raw, bytes) if !bytes.is_empty() => DatapointValue::Raw(bytes.to_vec()),
            (_, bytes) => {
                return Err(anyhow!(
                    "malformed payload for decoder {self}: {} bytes",
                    bytes.len()
                ))
            }
        };
        Ok(value)
    }

    /// Encode a value into a payload of exactly `length` bytes.
    pub fn encode(self, value: &DatapointValue, length: u8) -> Result<Vec<u8>> {
        let bytes = match (self, value) {
            (Decoder::Div10, v) => {
                let scaled = (v.as_f32()? * 10.0).round();
                if scaled < f32::from(i16::MIN) || scaled > f32::from(i16::MAX) {
                    bail!("value {v} out of range for decoder {self}");
                }
                (scaled as i16).to_le_bytes().to_vec()
            }
            (Decoder::Div2, v) => {
                let scaled = (v.as_f32()? * 2.0).round();
                if !(0.0..=255.0).contains(&scaled) {
                    bail!("value {v} out of range for decoder {self}");
                }
                vec![scaled as u8]
            }
            (Decoder::Div3600, v) => {
                let scaled = (v.as_f32()? * 3600.0).round();
                if scaled < 0.0 || scaled > u32::MAX as f32 {
                    bail!("value {v} out of range for decoder {self}");
                }
                (scaled as u32).to_le_bytes().to_vec()
            }
            (Decoder::NoConv, v) => {
                let raw = v.as_u32()?;
                match length {
                    1 => vec![u8::try_from(raw)?],
                    2 => u16::try_from(raw)?.to_le_bytes().to_vec(),
                    _ => raw.to_le_bytes().to_vec(),
                }
            }
            (Decoder::Raw, DatapointValue::Raw(bytes)) => bytes.clone(),
            (Decoder::Raw, v) => bail!("decoder raw cannot encode {v}"),
        };
        if bytes.len() != usize::from(length) {
            bail!(
                "encoded {} bytes for a {length}-byte datapoint",
                bytes.len()
            );
        }
        Ok(bytes)
    }
}

/// Decoded datapoint value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatapointValue {
    Unsigned(u32),
    Float(f32),
    Raw(Vec<u8>),
}

impl DatapointValue {
    pub fn as_f32(&self) -> Result<f32> {
        match self {
            DatapointValue::Float(v) => Ok(*v),
            DatapointValue::Unsigned(v) => Ok(*v as f32),
            DatapointValue::Raw(_) => Err(anyhow!("raw payload has no numeric value")),
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        match self {
            DatapointValue::Unsigned(v) => Ok(*v),
            DatapointValue::Float(v) if *v >= 0.0 && v.fract() == 0.0 && *v <= u32::MAX as f32 => {
                Ok(*v as u32)
            }
            other => Err(anyhow!("{other} is not an unsigned integer")),
        }
    }

    /// Parse a textual value the way a remote command would send it.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Ok(v) = text.parse::<u32>() {
            return Ok(DatapointValue::Unsigned(v));
        }
        if let Ok(v) = text.parse::<f32>() {
            if v.is_finite() {
                return Ok(DatapointValue::Float(v));
            }
        }
        Err(anyhow!("'{text}' is not a number"))
    }
}

impl fmt::Display for DatapointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatapointValue::Unsigned(v) => write!(f, "{v}"),
            DatapointValue::Float(v) => write!(f, "{v:.1}"),
            DatapointValue::Raw(bytes) => {
                let hex = bytes
                    .iter()
                    .map(|b| format!("{b:02x}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(f, "[{hex}]")
            }
        }
    }
}

/// Inclusive range of values a set-point datapoint accepts, in decoded units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WriteRange {
    pub min: f32,
    pub max: f32,
}

impl WriteRange {
    pub fn new(min: f32, max: f32) -> Result<Self> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            bail!("invalid write range {}..={}", self.min, self.max);
        }
        Ok(())
    }

    pub fn contains(&self, value: f32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl fmt::Display for WriteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}

/// Static description of one addressable value on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointDescriptor {
    pub id: String,
    pub address: u16,
    pub length: u8,
    pub decoder: Decoder,
    /// Set-points carry the range they accept; everything else is read-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writable: Option<WriteRange>,
}

impl DatapointDescriptor {
    pub fn new(id: impl Into<String>, address: u16, length: u8, decoder: Decoder) -> Result<Self> {
        let descriptor = Self {
            id: id.into(),
            address,
            length,
            decoder,
            writable: None,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Mark the datapoint as a set-point accepting `min..=max`.
    pub fn with_writable(mut self, min: f32, max: f32) -> Result<Self> {
        self.writable = Some(WriteRange::new(min, max)?);
        self.validate()?;
        Ok(self)
    }

    pub fn is_writable(&self) -> bool {
        self.writable.is_some()
    }

    /// Descriptors that arrive through serde bypass `new`, so loaders call this.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            bail!("datapoint at 0x{:04X} has an empty id", self.address);
        }
        self.decoder
            .check_width(self.length)
            .map_err(|e| anyhow!("datapoint '{}': {e}", self.id))?;
        if let Some(range) = &self.writable {
            range
                .validate()
                .map_err(|e| anyhow!("datapoint '{}': {e}", self.id))?;
            if self.decoder == Decoder::Raw {
                bail!("datapoint '{}': raw datapoints cannot be written", self.id);
            }
        }
        Ok(())
    }

    /// Encode `value` for a write after checking the datapoint is a set-point and
    /// the value lies inside its range.
    pub fn encode_write(&self, value: &DatapointValue) -> Result<Vec<u8>> {
        let Some(range) = &self.writable else {
            bail!("datapoint '{}' is read-only", self.id);
        };
        let numeric = value
            .as_f32()
            .map_err(|e| anyhow!("datapoint '{}': {e}", self.id))?;
        if !range.contains(numeric) {
            bail!(
                "value {value} for '{}' is outside the accepted range {range}",
                self.id
            );
        }
        self.encode(value)
    }

    pub fn decode(&self, payload: &[u8]) -> Result<DatapointValue> {
        if payload.len() != usize::from(self.length) {
            bail!(
                "datapoint '{}' expects {} bytes, got {}",
                self.id,
                self.length,
                payload.len()
            );
        }
        self.decoder.decode(payload)
    }

    pub fn encode(&self, value: &DatapointValue) -> Result<Vec<u8>> {
        self.decoder
            .encode(value, self.length)
            .map_err(|e| anyhow!("datapoint '{}': {e}", self.id))
    }
}

impl fmt::Display for DatapointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@0x{:04X}", self.id, self.address)
    }
}

/// Ordered, non-empty list of datapoints sharing one polling cadence.
#[derive(Debug, Clone, PartialEq)]
pub struct DatapointGroup {
    tier: Tier,
    datapoints: Vec<DatapointDescriptor>,
}

impl DatapointGroup {
    pub fn new(tier: Tier, datapoints: Vec<DatapointDescriptor>) -> Result<Self> {
        if datapoints.is_empty() {
            bail!("{tier} group must contain at least one datapoint");
        }
        for dp in &datapoints {
            dp.validate()?;
        }
        Ok(Self { tier, datapoints })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DatapointDescriptor> {
        self.datapoints.get(index)
    }

    pub fn datapoints(&self) -> &[DatapointDescriptor] {
        &self.datapoints
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatapointDescriptor> {
        self.datapoints.iter()
    }
}
