use async_trait::async_trait;
use carelink_core::{ChannelError, ChatMessage};

/// One inbound occurrence on a live link.
#[derive(Debug)]
pub enum LinkEvent {
    Message(ChatMessage),
    Closed,
}

/// Capability seam over the transport so the channel state machine can be
/// driven by scripted fakes in tests. `connect` yields the two halves of one
/// established link.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(
        &self,
        identity: &str,
    ) -> Result<(Box<dyn LinkSink>, Box<dyn LinkStream>), ChannelError>;
}

/// Outbound half of a link.
#[async_trait]
pub trait LinkSink: Send {
    async fn send(&mut self, message: &ChatMessage) -> Result<(), ChannelError>;
    async fn close(&mut self);
}

/// Inbound half of a link. `recv` resolves to `Closed` exactly once, when the
/// link is gone; malformed inbound payloads are skipped, never surfaced.
#[async_trait]
pub trait LinkStream: Send {
    async fn recv(&mut self) -> LinkEvent;
}
