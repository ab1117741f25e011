//! The connector abstraction: how a transport is established. Production
//! code uses [`crate::transport::TcpConnector`]; tests may plug in their
//! own.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use uasc_core::comms::secure_channel::SecureChannel;
use uasc_types::StatusCode;

use super::{
    state::OutgoingMessage,
    tcp::{TcpTransport, TransportConfiguration},
    TransportPollResult,
};

/// A running transport that must be polled to make progress.
pub trait Transport: Send + Sync + 'static {
    /// Poll the transport once. Cancel safe.
    fn poll(&mut self) -> impl std::future::Future<Output = TransportPollResult> + Send;
}

/// Establishes transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `endpoint_url`, performing the hello/acknowledge exchange,
    /// and return the transport ready for polling.
    async fn connect(
        &self,
        channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: mpsc::Receiver<OutgoingMessage>,
        config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<TcpTransport, StatusCode>;
}
