//! Transport implementation for opc.tcp on the server side.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::StreamExt;
use log::{debug, error};
use tokio::{
    io::{AsyncWriteExt, ReadHalf, WriteHalf},
    net::TcpStream,
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};

use uasc_core::{
    comms::{
        buffer::SendBuffer,
        chunker::Chunker,
        message_chunk::{MessageChunk, MessageIsFinalType},
        message_chunk_info::ChunkInfo,
        secure_channel::SecureChannel,
        tcp_codec::{Message, TcpCodec},
        tcp_types::{AcknowledgeMessage, ErrorMessage},
    },
    RequestMessage, ResponseMessage,
};
use uasc_types::{DecodingOptions, Error, ResponseHeader, ServiceFault, StatusCode};

use crate::info::ServerInfo;

/// A connected server transport.
pub struct TcpTransport {
    read: FramedRead<ReadHalf<TcpStream>, TcpCodec>,
    write: WriteHalf<TcpStream>,
    send_buffer: SendBuffer,
    state: TransportState,
    pending_chunks: Vec<MessageChunk>,
    /// Client protocol version set during HELLO.
    pub client_protocol_version: u32,
    /// Last decoded sequence number.
    last_received_sequence_number: u32,
}

enum TransportState {
    Running,
    Closing,
}

/// Limits applied to one server connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest chunk the server sends.
    pub send_buffer_size: usize,
    /// Largest chunk the server accepts.
    pub receive_buffer_size: usize,
    /// Largest reassembled message, 0 for no limit.
    pub max_message_size: usize,
    /// Most chunks per message, 0 for no limit.
    pub max_chunk_count: usize,
    /// How long a connection may take to say hello.
    pub hello_timeout: Duration,
}

/// A fully reassembled and decoded request.
#[derive(Debug)]
pub struct Request {
    /// The decoded request message.
    pub message: RequestMessage,
    /// The chunk headers of the first chunk.
    pub chunk_info: ChunkInfo,
    /// The request id assigned by the client, echoed on the response chunks.
    pub request_id: u32,
}

/// Result of polling a server transport.
#[derive(Debug)]
pub enum TransportPollResult {
    /// An outgoing message was sent in full.
    OutgoingMessageSent,
    /// An intermediate chunk arrived.
    IncomingChunk,
    /// A full request arrived.
    IncomingMessage(Request),
    /// A fatal error, the connection closes.
    Error(StatusCode),
    /// Decoding a request failed but the failure is attributable: the given
    /// (status, request id, request handle) should be answered with a fault.
    RecoverableError(StatusCode, u32, u32),
    /// The connection is closed.
    Closed,
}

fn min_zero_infinite(server: u32, client: u32) -> u32 {
    if client == 0 {
        server
    } else if server == 0 {
        client
    } else {
        client.min(server)
    }
}

/// Performs the hello/acknowledge exchange for a fresh connection.
pub struct TcpConnector {
    read: FramedRead<ReadHalf<TcpStream>, TcpCodec>,
    write: WriteHalf<TcpStream>,
    deadline: Instant,
    config: TransportConfig,
    decoding_options: DecodingOptions,
}

impl TcpConnector {
    /// Wrap an accepted TCP stream, ready to wait for its hello.
    pub fn new(
        stream: TcpStream,
        config: TransportConfig,
        decoding_options: DecodingOptions,
    ) -> Self {
        let (read, write) = tokio::io::split(stream);
        let read = FramedRead::new(read, TcpCodec::new(decoding_options.clone()));
        TcpConnector {
            read,
            write,
            deadline: Instant::now() + config.hello_timeout,
            config,
            decoding_options,
        }
    }

    async fn connect_inner(&mut self, info: Arc<ServerInfo>) -> Result<SendBuffer, ErrorMessage> {
        let hello = match self.read.next().await {
            Some(Ok(Message::Hello(hello))) => Ok(hello),
            Some(Ok(bad_msg)) => Err(ErrorMessage::new(
                StatusCode::BadCommunicationError,
                &format!("Expected a hello message, got {:?} instead", bad_msg),
            )),
            Some(Err(communication_err)) => Err(ErrorMessage::new(
                StatusCode::BadCommunicationError,
                &format!(
                    "Communication error while waiting for Hello message: {}",
                    communication_err
                ),
            )),
            None => Err(ErrorMessage::new(
                StatusCode::BadCommunicationError,
                "Stream closed",
            )),
        }?;

        let mut buffer = SendBuffer::new(
            self.config.send_buffer_size,
            self.config.max_message_size,
            self.config.max_chunk_count,
        );

        let urls = info.endpoint_urls();
        if !hello.matches_endpoint(urls.iter().map(|s| s.as_str())) {
            return Err(ErrorMessage::new(
                StatusCode::BadTcpEndpointUrlInvalid,
                "HELLO endpoint url is invalid",
            ));
        }
        if !hello.is_valid_buffer_sizes() {
            return Err(ErrorMessage::new(
                StatusCode::BadConnectionRejected,
                "HELLO buffer sizes are invalid",
            ));
        }

        let server_protocol_version = 0;
        if hello.protocol_version > server_protocol_version {
            return Err(ErrorMessage::new(
                StatusCode::BadProtocolVersionUnsupported,
                "Client protocol version is unsupported",
            ));
        }

        // The effective limits are the pairwise minima of both sides, with
        // 0 meaning unlimited
        let acknowledge = AcknowledgeMessage::new(
            server_protocol_version,
            (self.config.receive_buffer_size as u32).min(hello.send_buffer_size),
            (buffer.send_buffer_size as u32).min(hello.receive_buffer_size),
            min_zero_infinite(
                self.decoding_options.max_message_size as u32,
                hello.max_message_size,
            ),
            min_zero_infinite(
                self.decoding_options.max_chunk_count as u32,
                hello.max_chunk_count,
            ),
        );
        buffer.revise(
            acknowledge.send_buffer_size as usize,
            acknowledge.max_message_size as usize,
            acknowledge.max_chunk_count as usize,
        );

        use uasc_types::BinaryEncodable;
        self.write
            .write_all(&acknowledge.encode_to_vec())
            .await
            .map_err(|e| {
                ErrorMessage::new(
                    StatusCode::BadCommunicationError,
                    &format!("Failed to send ack: {e}"),
                )
            })?;

        Ok(buffer)
    }

    /// Run the handshake, sending an ERR and failing on any violation.
    pub async fn connect(
        mut self,
        info: Arc<ServerInfo>,
        token: CancellationToken,
    ) -> Result<TcpTransport, StatusCode> {
        let err = tokio::select! {
            _ = tokio::time::sleep_until(self.deadline.into()) => {
                ErrorMessage::new(StatusCode::BadTimeout, "Timeout waiting for HELLO")
            }
            _ = token.cancelled() => {
                ErrorMessage::new(StatusCode::BadServerHalted, "Server closed")
            }
            r = self.connect_inner(info) => {
                match r {
                    Ok(r) => return Ok(TcpTransport::new(self.read, self.write, r)),
                    Err(e) => e,
                }
            }
        };

        // Send an error describing why the connection failed; the channel
        // may well be gone already, so failures to send are ignored
        use uasc_types::BinaryEncodable;
        let _ = self.write.write_all(&err.encode_to_vec()).await;

        Err(err.error)
    }
}

impl TcpTransport {
    fn new(
        read: FramedRead<ReadHalf<TcpStream>, TcpCodec>,
        write: WriteHalf<TcpStream>,
        send_buffer: SendBuffer,
    ) -> Self {
        Self {
            read,
            write,
            state: TransportState::Running,
            pending_chunks: Vec::new(),
            last_received_sequence_number: 0,
            client_protocol_version: 0,
            send_buffer,
        }
    }

    /// Set the transport state to closing; once the final staged message is
    /// sent the connection closes.
    pub fn set_closing(&mut self) {
        self.state = TransportState::Closing;
    }

    /// `true` when the transport is shutting down.
    pub fn is_closing(&self) -> bool {
        matches!(self.state, TransportState::Closing)
    }

    /// Stage a transport error; the connection closes after it is sent.
    pub fn enqueue_error(&mut self, message: ErrorMessage) {
        self.send_buffer.write_error(message);
    }

    /// Queue a response for sending. An encodable failure with request
    /// context degrades to a ServiceFault instead of killing the channel.
    pub fn enqueue_message_for_send(
        &mut self,
        channel: &mut SecureChannel,
        message: ResponseMessage,
        request_id: u32,
    ) -> Result<(), StatusCode> {
        match self.send_buffer.write(request_id, message, channel) {
            Ok(_) => Ok(()),
            Err(e) => {
                log::warn!("Failed to encode outgoing message: {e:?}");
                if let Some((request_id, request_handle)) = e.full_context() {
                    self.send_buffer.write(
                        request_id,
                        ResponseMessage::ServiceFault(Box::new(ServiceFault {
                            response_header: ResponseHeader::new_service_result(
                                request_handle,
                                e.into(),
                            ),
                        })),
                        channel,
                    )?;
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// The receive side must reset its sequence expectation right after an
    /// OPN is processed on this direction.
    pub fn reset_sequence_expectation(&mut self) {
        self.last_received_sequence_number = 0;
    }

    /// Poll the transport, draining staged bytes and accepting chunks.
    pub async fn poll(&mut self, channel: &mut SecureChannel) -> TransportPollResult {
        // If there's nothing in the send buffer, but there are chunks
        // available, write them to the send buffer before proceeding
        if self.send_buffer.should_encode_chunks() {
            if let Err(e) = self.send_buffer.encode_next_chunk(channel) {
                return TransportPollResult::Error(e.status());
            }
        }

        // If there is something staged, write to the stream, else wait for
        // incoming messages. Listen for incoming data in both cases.
        if self.send_buffer.can_read() {
            tokio::select! {
                r = self.send_buffer.read_into_async(&mut self.write) => {
                    if let Err(e) = r {
                        error!("write bytes task failed: {}", e);
                        return TransportPollResult::Closed;
                    }
                    TransportPollResult::OutgoingMessageSent
                }
                incoming = self.read.next() => {
                    self.handle_incoming_message(incoming, channel)
                }
            }
        } else {
            if self.is_closing() {
                return TransportPollResult::Closed;
            }
            let incoming = self.read.next().await;
            self.handle_incoming_message(incoming, channel)
        }
    }

    fn handle_incoming_message(
        &mut self,
        incoming: Option<Result<Message, std::io::Error>>,
        channel: &mut SecureChannel,
    ) -> TransportPollResult {
        let Some(incoming) = incoming else {
            return TransportPollResult::Closed;
        };
        match incoming {
            Ok(message) => match self.process_message(message, channel) {
                Ok(None) => TransportPollResult::IncomingChunk,
                Ok(Some(message)) => {
                    self.pending_chunks.clear();
                    TransportPollResult::IncomingMessage(message)
                }
                Err(e) => {
                    self.pending_chunks.clear();
                    if let Some((id, handle)) = e.full_context() {
                        TransportPollResult::RecoverableError(e.status(), id, handle)
                    } else {
                        TransportPollResult::Error(e.status())
                    }
                }
            },
            Err(err) => {
                error!("Error reading from stream {:?}", err);
                TransportPollResult::Error(StatusCode::BadConnectionClosed)
            }
        }
    }

    fn process_message(
        &mut self,
        message: Message,
        channel: &mut SecureChannel,
    ) -> Result<Option<Request>, Error> {
        match message {
            Message::Chunk(chunk) => {
                let header = chunk.message_header(&channel.decoding_options())?;

                if header.is_final == MessageIsFinalType::FinalError {
                    // Abort discards the accumulator and nothing travels up
                    debug!("Client aborted the message in flight");
                    self.pending_chunks.clear();
                    Ok(None)
                } else {
                    let chunk = channel.verify_and_remove_security(&chunk.data)?;

                    if self.pending_chunks.len() == self.send_buffer.max_chunk_count
                        && self.send_buffer.max_chunk_count > 0
                    {
                        return Err(Error::new(
                            StatusCode::BadEncodingLimitsExceeded,
                            format!(
                                "Message has more than {} chunks, exceeding negotiated limits",
                                self.send_buffer.max_chunk_count
                            ),
                        ));
                    }
                    self.pending_chunks.push(chunk);

                    if header.is_final == MessageIsFinalType::Intermediate {
                        return Ok(None);
                    }

                    let chunk_info = self.pending_chunks[0].chunk_info(channel)?;

                    self.last_received_sequence_number = Chunker::validate_chunks(
                        self.last_received_sequence_number + 1,
                        channel,
                        &self.pending_chunks,
                    )?;

                    let request = Chunker::decode(&self.pending_chunks, channel, None)
                        .map_err(|e| e.with_request_id(chunk_info.sequence_header.request_id))?;
                    Ok(Some(Request {
                        request_id: chunk_info.sequence_header.request_id,
                        chunk_info,
                        message: request,
                    }))
                }
            }
            unexpected => Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!("Received unexpected message: {:?}", unexpected),
            )),
        }
    }
}
