use anyhow::{anyhow, Result};
use flume::{Receiver, Sender, TrySendError};

use crate::{
    api::traits::Transport,
    protocol::{PollRequest, RequestHandle},
};

/// Request hand-off to a link worker thread.
pub type LinkRequest = (RequestHandle, PollRequest);

/// Transport that forwards requests to a worker over a flume channel
///
/// Handles are allocated here, monotonically. The worker answers with
/// [`crate::protocol::Completion`]s on a channel of its own.
pub struct ChannelTransport {
    sender: Sender<LinkRequest>,
    next_handle: u64,
}

impl ChannelTransport {
    /// The channel holds a single request, matching a half-duplex link.
    pub fn new() -> (Self, Receiver<LinkRequest>) {
        Self::with_capacity(1)
    }

    pub fn with_capacity(cap: usize) -> (Self, Receiver<LinkRequest>) {
        let (sender, receiver) = flume::bounded(cap.max(1));
        (
            Self {
                sender,
                next_handle: 1,
            },
            receiver,
        )
    }
}

impl Transport for ChannelTransport {
    fn submit(&mut self, request: &PollRequest) -> Result<RequestHandle> {
        let handle = RequestHandle(self.next_handle);
        match self.sender.try_send((handle, request.clone())) {
            Ok(()) => {
                self.next_handle = self.next_handle.wrapping_add(1);
                Ok(handle)
            }
            Err(TrySendError::Full(_)) => Err(anyhow!("link worker busy")),
            Err(TrySendError::Disconnected(_)) => Err(anyhow!("link worker stopped")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DatapointDescriptor, Decoder};

    fn request() -> PollRequest {
        PollRequest::read(DatapointDescriptor::new("flow_temp", 0x0101, 2, Decoder::Div10).unwrap())
    }

    #[test]
    fn test_handles_are_monotonic() -> Result<()> {
        let (mut transport, receiver) = ChannelTransport::with_capacity(4);
        let a = transport.submit(&request())?;
        let b = transport.submit(&request())?;
        assert!(b.0 > a.0);
        assert_eq!(receiver.recv()?.0, a);
        Ok(())
    }

    #[test]
    fn test_full_link_refuses_without_consuming_handle() -> Result<()> {
        let (mut transport, receiver) = ChannelTransport::new();
        let first = transport.submit(&request())?;
        assert!(transport.submit(&request()).is_err());
        receiver.recv()?;
        assert_eq!(transport.submit(&request())?.0, first.0 + 1);
        Ok(())
    }

    #[test]
    fn test_stopped_worker_is_an_error() {
        let (mut transport, receiver) = ChannelTransport::new();
        drop(receiver);
        assert!(transport.submit(&request()).is_err());
    }
}
