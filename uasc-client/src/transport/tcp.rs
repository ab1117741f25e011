//! The client's TCP transport: hello negotiation, framed reads, and the
//! cancel-safe poll loop that moves bytes both ways.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, error, trace, warn};
use parking_lot::RwLock;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use uasc_core::comms::{
    buffer::SendBuffer,
    secure_channel::SecureChannel,
    tcp_codec::{Message, TcpCodec},
    tcp_types::{AcknowledgeMessage, HelloMessage},
    url::hostname_port_from_url,
};
use uasc_core::RequestMessage;
use uasc_types::{BinaryEncodable, StatusCode};

use super::{
    connect::{Connector, Transport},
    state::{OutgoingMessage, TransportState},
    TransportPollResult,
};

#[derive(Debug, Clone, Copy)]
enum TransportCloseState {
    Open,
    Closing(StatusCode),
    Closed(StatusCode),
}

/// Limits and sizes applied to one transport connection.
#[derive(Debug, Clone)]
pub struct TransportConfiguration {
    /// Cap on concurrently in-flight requests.
    pub max_pending_incoming: usize,
    /// Largest chunk we send.
    pub send_buffer_size: usize,
    /// Largest chunk we accept.
    pub recv_buffer_size: usize,
    /// Largest reassembled message we accept, 0 for no limit.
    pub max_message_size: usize,
    /// Most chunks per message, 0 for no limit.
    pub max_chunk_count: usize,
}

/// A connected client transport.
pub struct TcpTransport {
    state: TransportState,
    read: FramedRead<ReadHalf<TcpStream>, TcpCodec>,
    write: WriteHalf<TcpStream>,
    send_buffer: SendBuffer,
    should_close: bool,
    closed: TransportCloseState,
}

/// Connects transports over plain TCP.
pub struct TcpConnector;

impl TcpConnector {
    async fn connect_inner(
        secure_channel: &RwLock<SecureChannel>,
        config: &TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<
        (
            FramedRead<ReadHalf<TcpStream>, TcpCodec>,
            WriteHalf<TcpStream>,
            AcknowledgeMessage,
        ),
        StatusCode,
    > {
        let (host, port) = hostname_port_from_url(
            endpoint_url,
            uasc_core::constants::DEFAULT_OPC_UA_SERVER_PORT,
        )?;

        let addr = {
            let addr = format!("{}:{}", host, port);
            match tokio::net::lookup_host(addr).await {
                Ok(mut addrs) => {
                    if let Some(addr) = addrs.next() {
                        addr
                    } else {
                        error!(
                            "Invalid address {}, does not resolve to any socket",
                            endpoint_url
                        );
                        return Err(StatusCode::BadTcpEndpointUrlInvalid);
                    }
                }
                Err(e) => {
                    error!("Invalid address {}, cannot be parsed {:?}", endpoint_url, e);
                    return Err(StatusCode::BadTcpEndpointUrlInvalid);
                }
            }
        };

        debug!("Connecting to {} with url {}", addr, endpoint_url);
        let socket = TcpStream::connect(&addr).await.map_err(|err| {
            error!("Could not connect to host {}, {:?}", addr, err);
            StatusCode::BadConnectionRejected
        })?;
        let _ = socket.set_nodelay(true);

        let (reader, mut writer) = tokio::io::split(socket);

        let hello = HelloMessage::new(
            endpoint_url,
            config.send_buffer_size,
            config.recv_buffer_size,
            config.max_message_size,
            config.max_chunk_count,
        );
        trace!("Sending hello message: {hello:?}");
        let mut framed_read = {
            let secure_channel = secure_channel.read();
            FramedRead::new(reader, TcpCodec::new(secure_channel.decoding_options()))
        };

        writer.write_all(&hello.encode_to_vec()).await.map_err(|err| {
            error!("Cannot send hello to server, err = {}", err);
            StatusCode::BadCommunicationError
        })?;

        let ack = match framed_read.next().await {
            Some(Ok(Message::Acknowledge(ack))) => {
                if ack.send_buffer_size > hello.receive_buffer_size {
                    warn!("Acknowledged send buffer size is greater than receive buffer size in hello message");
                }
                if ack.receive_buffer_size > hello.send_buffer_size {
                    warn!("Acknowledged receive buffer size is greater than send buffer size in hello message");
                }
                trace!("Received acknowledgement: {:?}", ack);
                ack
            }
            Some(Ok(Message::Error(error))) => {
                error!(
                    "Server rejected the connection with {}: {}",
                    error.error, error.reason
                );
                return Err(error.error);
            }
            other => {
                error!(
                    "Unexpected result while waiting for server ACK: {:?}",
                    other
                );
                return Err(StatusCode::BadConnectionClosed);
            }
        };

        Ok((framed_read, writer, ack))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: mpsc::Receiver<OutgoingMessage>,
        config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<TcpTransport, StatusCode> {
        let (framed_read, writer, ack) =
            Self::connect_inner(&channel, &config, endpoint_url).await?;

        // The effective limits are the pairwise minima of ours and theirs
        let mut buffer = SendBuffer::new(
            config.send_buffer_size,
            config.max_message_size,
            config.max_chunk_count,
        );
        buffer.revise(
            ack.receive_buffer_size as usize,
            ack.max_message_size as usize,
            ack.max_chunk_count as usize,
        );

        let max_chunk_count = buffer.max_chunk_count;
        Ok(TcpTransport {
            state: TransportState::new(
                channel,
                outgoing_recv,
                config.max_pending_incoming,
                max_chunk_count,
            ),
            read: framed_read,
            write: writer,
            send_buffer: buffer,
            should_close: false,
            closed: TransportCloseState::Open,
        })
    }
}

impl TcpTransport {
    fn handle_incoming_message(
        &mut self,
        incoming: Option<Result<Message, std::io::Error>>,
    ) -> TransportPollResult {
        let Some(incoming) = incoming else {
            return TransportPollResult::Closed(StatusCode::BadConnectionClosed);
        };
        match incoming {
            Ok(message) => {
                if let Err(e) = self.state.handle_incoming_message(message) {
                    TransportPollResult::Closed(e)
                } else {
                    TransportPollResult::IncomingMessage
                }
            }
            Err(err) => {
                error!("Error reading from stream {}", err);
                TransportPollResult::Closed(StatusCode::BadConnectionClosed)
            }
        }
    }

    async fn poll_inner(&mut self) -> TransportPollResult {
        // If there's nothing in the send buffer, but there are chunks
        // available, write them to the send buffer before proceeding.
        if self.send_buffer.should_encode_chunks() {
            let secure_channel = self.state.secure_channel.read();
            if let Err(e) = self.send_buffer.encode_next_chunk(&secure_channel) {
                return TransportPollResult::Closed(e.status());
            }
        }

        // If there is something in the send buffer, write to the stream.
        // If not, wait for outgoing messages. Either way, listen to incoming
        // messages while doing so.
        if self.send_buffer.can_read() {
            tokio::select! {
                r = self.send_buffer.read_into_async(&mut self.write) => {
                    if let Err(e) = r {
                        error!("write bytes task failed: {}", e);
                        return TransportPollResult::Closed(StatusCode::BadCommunicationError);
                    }
                    TransportPollResult::OutgoingMessageSent
                }
                incoming = self.read.next() => {
                    self.handle_incoming_message(incoming)
                }
            }
        } else {
            if self.should_close {
                debug!("Writer is setting the connection state to finished(good)");
                return TransportPollResult::Closed(StatusCode::Good);
            }
            tokio::select! {
                outgoing = self.state.wait_for_outgoing_message() => {
                    let Some((outgoing, request_id)) = outgoing else {
                        return TransportPollResult::Closed(StatusCode::Good);
                    };
                    if matches!(outgoing, RequestMessage::CloseSecureChannel(_)) {
                        // After a CloseSecureChannel nothing else may be sent
                        self.should_close = true;
                        debug!("Writer is about to send a CloseSecureChannelRequest and will close");
                    }
                    let secure_channel = self.state.secure_channel.read();
                    match self.send_buffer.write(request_id, outgoing, &secure_channel) {
                        Err(e) => {
                            drop(secure_channel);
                            if let Some((request_id, request_handle)) = e.full_context() {
                                error!(
                                    "Failed to send message with request handle {}: {}",
                                    request_handle,
                                    e.status()
                                );
                                self.state.message_send_failed(request_id, e.status());
                                TransportPollResult::RecoverableError(e.status())
                            } else {
                                TransportPollResult::Closed(e.status())
                            }
                        }
                        Ok(_) => TransportPollResult::OutgoingMessage,
                    }
                }
                incoming = self.read.next() => {
                    self.handle_incoming_message(incoming)
                }
            }
        }
    }
}

impl Transport for TcpTransport {
    async fn poll(&mut self) -> TransportPollResult {
        // Poll must be cancel safe: losing a `poll` future mid-flight leaves
        // the transport consistent because every await point inside
        // `poll_inner` is itself cancel safe and completes at most one unit
        // of work. Closing is the exception; it is made re-entrant by
        // tracking the close state and repeating `close` until it finishes.
        match self.closed {
            TransportCloseState::Open => {}
            TransportCloseState::Closing(c) => {
                let r = self.state.close(c).await;
                self.closed = TransportCloseState::Closed(c);
                return TransportPollResult::Closed(r);
            }
            TransportCloseState::Closed(c) => {
                return TransportPollResult::Closed(c);
            }
        }

        let r = self.poll_inner().await;
        if let TransportPollResult::Closed(status) = &r {
            self.closed = TransportCloseState::Closing(*status);
            let r = self.state.close(*status).await;
            self.closed = TransportCloseState::Closed(r);
        }
        r
    }
}
