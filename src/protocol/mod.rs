pub mod datapoint;
pub mod request;

pub use datapoint::{
    DatapointDescriptor, DatapointGroup, DatapointValue, Decoder, Tier, WriteRange,
    MIN_INTERVAL_SECS,
};
pub use request::{
    Completion, Outcome, PollRequest, Reading, RequestHandle, RequestKind, RequestOrigin, WriteAck,
};
