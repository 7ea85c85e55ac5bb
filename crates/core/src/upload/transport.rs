use async_trait::async_trait;

use super::frame::{Frame, Reply};
use crate::error::Result;

/// A bidirectional message stream carrying one upload connection.
///
/// Implemented by the server's WebSocket adapter and by test doubles.
#[async_trait]
pub trait FrameTransport: Send {
    /// Next frame from the peer. `None` means the peer closed the stream.
    async fn recv(&mut self) -> Option<Result<Frame>>;

    /// Write a reply to the peer.
    async fn send(&mut self, reply: &Reply) -> Result<()>;
}
