use serde::{Deserialize, Serialize};
use std::fmt;

use super::datapoint::{DatapointDescriptor, DatapointValue, Tier};

/// Opaque identifier the transport hands back for a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestHandle(pub u64);

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction of a request on the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    /// Write the already-encoded payload.
    Write(Vec<u8>),
}

/// A single request handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PollRequest {
    pub descriptor: DatapointDescriptor,
    pub kind: RequestKind,
}

impl PollRequest {
    pub fn read(descriptor: DatapointDescriptor) -> Self {
        Self {
            descriptor,
            kind: RequestKind::Read,
        }
    }

    pub fn write(descriptor: DatapointDescriptor, payload: Vec<u8>) -> Self {
        Self {
            descriptor,
            kind: RequestKind::Write(payload),
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, RequestKind::Write(_))
    }
}

/// Who issued the request currently on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOrigin {
    Group(Tier),
    Write,
}

impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOrigin::Group(tier) => write!(f, "{tier}"),
            RequestOrigin::Write => write!(f, "write"),
        }
    }
}

/// Result of a request as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Response payload (empty for acknowledged writes).
    Success(Vec<u8>),
    /// No response, malformed response or link error.
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Completion event delivered by a transport, exactly once per submitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub handle: RequestHandle,
    pub outcome: Outcome,
}

/// Decoded value handed to publication collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub tier: Tier,
    pub datapoint: String,
    pub address: u16,
    pub value: DatapointValue,
    pub timestamp: String,
}

/// Outcome of a queued write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteAck {
    pub datapoint: String,
    pub address: u16,
    pub value: DatapointValue,
    pub success: bool,
    pub timestamp: String,
}
