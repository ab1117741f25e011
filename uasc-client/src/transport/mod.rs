//! The client transport: TCP connection, hello negotiation, request
//! correlation and the secure channel wrapper.

pub mod channel;
pub mod connect;
pub mod state;
pub mod tcp;

pub use channel::{AsyncSecureChannel, ChannelState, SecureChannelEventLoop};
pub use connect::{Connector, Transport};
pub use state::{OutgoingMessage, Request, RequestSend, TransportState};
pub use tcp::{TcpConnector, TcpTransport, TransportConfiguration};

use uasc_types::StatusCode;

/// Result of polling a client transport once.
#[derive(Debug)]
pub enum TransportPollResult {
    /// An outgoing message was sent in full.
    OutgoingMessageSent,
    /// An outgoing message was queued into the send buffer.
    OutgoingMessage,
    /// An incoming message was processed.
    IncomingMessage,
    /// A message failed to encode; its request was completed with the error
    /// and the connection lives on.
    RecoverableError(StatusCode),
    /// The connection is closed with the given status.
    Closed(StatusCode),
}
