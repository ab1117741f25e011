//! The server transport: hello negotiation and the per-connection poll loop.

pub mod tcp;

pub use tcp::{Request, TcpConnector, TcpTransport, TransportConfig, TransportPollResult};
