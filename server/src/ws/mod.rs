pub mod actor;
pub mod handler;
pub mod protocol;

use axum::extract::ws::Message;
use tokio::sync::mpsc;

use crate::hub::{ConnectionSink, Frame};

/// Sender half of a WebSocket connection's outbound channel.
/// The hub holds one clone per connection and pushes frames through it;
/// the connection's writer task owns the receiver.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

impl ConnectionSink for ConnectionSender {
    /// Open until the writer task exits and drops its receiver.
    fn is_open(&self) -> bool {
        !self.is_closed()
    }

    fn send(&self, frame: &Frame) -> bool {
        mpsc::UnboundedSender::send(self, Message::Text(frame.clone())).is_ok()
    }
}
