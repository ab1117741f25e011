//! In-flight request bookkeeping for the client transport. Every request
//! posted to the transport reaches exactly one completion: its response, a
//! send failure, or a synthetic timeout. Late responses are dropped.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use hashbrown::HashMap;
use log::{debug, error, warn};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use uasc_core::{
    comms::{
        chunker::Chunker,
        message_chunk::{MessageChunk, MessageIsFinalType},
        secure_channel::SecureChannel,
        tcp_codec::Message,
    },
    RequestMessage, ResponseMessage,
};
use uasc_types::StatusCode;

/// Sender half used to post requests to a running transport.
pub type RequestSend = mpsc::Sender<OutgoingMessage>;

/// A request on its way to the transport task.
#[derive(Debug)]
pub struct OutgoingMessage {
    /// The request to send.
    pub request: RequestMessage,
    /// Completion for the caller, `None` for fire-and-forget messages like
    /// CloseSecureChannel.
    pub callback: Option<oneshot::Sender<Result<ResponseMessage, StatusCode>>>,
    /// Absolute monotonic deadline for the response.
    pub deadline: Instant,
}

struct PendingRequest {
    callback: Option<oneshot::Sender<Result<ResponseMessage, StatusCode>>>,
    deadline: Instant,
}

/// State of a running transport: the secure channel, the queue of outgoing
/// messages and the in-flight request table keyed by request id.
pub struct TransportState {
    /// The secure channel, shared with the channel wrapper.
    pub secure_channel: Arc<RwLock<SecureChannel>>,
    outgoing_recv: mpsc::Receiver<OutgoingMessage>,
    pending_requests: HashMap<u32, PendingRequest>,
    last_received_sequence_number: u32,
    pending_chunks: Vec<MessageChunk>,
    request_id_counter: u32,
    max_pending_incoming: usize,
    max_chunk_count: usize,
}

impl TransportState {
    /// Create transport state around `secure_channel`, receiving outgoing
    /// messages from `outgoing_recv`.
    pub fn new(
        secure_channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: mpsc::Receiver<OutgoingMessage>,
        max_pending_incoming: usize,
        max_chunk_count: usize,
    ) -> TransportState {
        TransportState {
            secure_channel,
            outgoing_recv,
            pending_requests: HashMap::new(),
            last_received_sequence_number: 0,
            pending_chunks: Vec::new(),
            // Request ids start at 1, id 0 is never valid on the wire
            request_id_counter: 0,
            max_pending_incoming,
            max_chunk_count,
        }
    }

    /// Wait for the next outgoing message, servicing request deadlines while
    /// waiting. Returns `None` when the sender side is dropped, meaning the
    /// channel is shutting down.
    pub async fn wait_for_outgoing_message(&mut self) -> Option<(RequestMessage, u32)> {
        loop {
            let deadline = self.next_deadline();
            let message = if let Some(deadline) = deadline {
                tokio::select! {
                    m = self.outgoing_recv.recv() => m,
                    _ = tokio::time::sleep_until(deadline.into()) => {
                        self.fulfill_timeouts(Instant::now());
                        continue;
                    }
                }
            } else {
                self.outgoing_recv.recv().await
            };

            let message = message?;
            if self.pending_requests.len() >= self.max_pending_incoming {
                warn!("Too many pending requests, failing the new request");
                if let Some(callback) = message.callback {
                    let _ = callback.send(Err(StatusCode::BadTooManyOperations));
                }
                continue;
            }

            self.request_id_counter = self.request_id_counter.wrapping_add(1).max(1);
            let request_id = self.request_id_counter;
            self.pending_requests.insert(
                request_id,
                PendingRequest {
                    callback: message.callback,
                    deadline: message.deadline,
                },
            );
            break Some((message.request, request_id));
        }
    }

    /// Earliest pending deadline, if any requests are in flight.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending_requests.values().map(|p| p.deadline).min()
    }

    /// Complete every request whose deadline has passed with a synthetic
    /// `BadTimeout`. A real response arriving later is dropped.
    pub fn fulfill_timeouts(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .pending_requests
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for request_id in expired {
            debug!("Request {} timed out", request_id);
            if let Some(pending) = self.pending_requests.remove(&request_id) {
                if let Some(callback) = pending.callback {
                    let _ = callback.send(Err(StatusCode::BadTimeout));
                }
            }
        }
    }

    /// Complete the request with a send failure.
    pub fn message_send_failed(&mut self, request_id: u32, status: StatusCode) {
        if let Some(pending) = self.pending_requests.remove(&request_id) {
            if let Some(callback) = pending.callback {
                let _ = callback.send(Err(status));
            }
        }
    }

    /// Process one message from the wire. Returns an error when the
    /// connection must close.
    pub fn handle_incoming_message(&mut self, message: Message) -> Result<(), StatusCode> {
        match message {
            Message::Chunk(chunk) => self.process_chunk(chunk),
            Message::Error(error) => {
                error!(
                    "Received error message {}: {}",
                    error.error, error.reason
                );
                Err(error.error)
            }
            unexpected => {
                error!("Received unexpected transport message {:?}", unexpected);
                Err(StatusCode::BadUnexpectedError)
            }
        }
    }

    fn process_chunk(&mut self, chunk: MessageChunk) -> Result<(), StatusCode> {
        let mut secure_channel = self.secure_channel.write();
        let header = chunk
            .message_header(&secure_channel.decoding_options())
            .map_err(|e| e.status())?;

        if header.is_final == MessageIsFinalType::FinalError {
            // The sender aborted the message, nothing is delivered upward
            debug!("Discarding {} chunks of an aborted message", self.pending_chunks.len());
            self.pending_chunks.clear();
            return Ok(());
        }

        // Decrypt and verify first; any failure closes the connection
        let chunk = secure_channel
            .verify_and_remove_security(&chunk.data)
            .map_err(|_| StatusCode::BadSecurityChecksFailed)?;

        if self.max_chunk_count > 0 && self.pending_chunks.len() == self.max_chunk_count {
            error!(
                "Message has more than {} chunks, exceeding negotiated limits",
                self.max_chunk_count
            );
            return Err(StatusCode::BadEncodingLimitsExceeded);
        }
        self.pending_chunks.push(chunk);

        if header.is_final == MessageIsFinalType::Intermediate {
            return Ok(());
        }

        // Final chunk: validate the sequence and reassemble
        let chunks = std::mem::take(&mut self.pending_chunks);
        let chunk_info = chunks[0]
            .chunk_info(&secure_channel)
            .map_err(|e| e.status())?;

        self.last_received_sequence_number = Chunker::validate_chunks(
            self.last_received_sequence_number + 1,
            &secure_channel,
            &chunks,
        )
        .map_err(|_| StatusCode::BadSecurityChecksFailed)?;

        let request_id = chunk_info.sequence_header.request_id;
        let response = Chunker::decode::<ResponseMessage>(&chunks, &secure_channel, None)
            .map_err(|e| e.status())?;
        drop(secure_channel);

        match self.pending_requests.remove(&request_id) {
            Some(pending) => {
                if let Some(callback) = pending.callback {
                    let _ = callback.send(Ok(response));
                }
            }
            None => {
                // Timed out or cancelled earlier, the response is dropped
                debug!("Discarding late response to request id {}", request_id);
            }
        }
        Ok(())
    }

    /// Tear the transport down: every queued and in-flight request completes
    /// with `status`.
    pub async fn close(&mut self, status: StatusCode) -> StatusCode {
        self.outgoing_recv.close();
        while let Ok(message) = self.outgoing_recv.try_recv() {
            if let Some(callback) = message.callback {
                let _ = callback.send(Err(status));
            }
        }
        for (_, pending) in self.pending_requests.drain() {
            if let Some(callback) = pending.callback {
                let _ = callback.send(Err(status));
            }
        }
        status
    }
}

/// A single request bound to a running transport, sent with a timeout.
pub struct Request<T> {
    request: T,
    sender: RequestSend,
    timeout: Duration,
}

impl<T: Into<RequestMessage>> Request<T> {
    /// Create a request to be sent over `sender`.
    pub fn new(request: T, sender: RequestSend, timeout: Duration) -> Request<T> {
        Request {
            request,
            sender,
            timeout,
        }
    }

    /// Send the request and wait for its completion. The transport enforces
    /// the deadline; this future simply waits for whichever completion the
    /// transport delivers.
    pub async fn send(self) -> Result<ResponseMessage, StatusCode> {
        let (callback, receiver) = oneshot::channel();
        let message = OutgoingMessage {
            request: self.request.into(),
            callback: Some(callback),
            deadline: Instant::now() + self.timeout,
        };
        self.sender
            .send(message)
            .await
            .map_err(|_| StatusCode::BadConnectionClosed)?;
        receiver
            .await
            .unwrap_or(Err(StatusCode::BadConnectionClosed))
    }

    /// Send the request without waiting for any response.
    pub async fn send_no_response(self) -> Result<(), StatusCode> {
        let message = OutgoingMessage {
            request: self.request.into(),
            callback: None,
            deadline: Instant::now() + self.timeout,
        };
        self.sender
            .send(message)
            .await
            .map_err(|_| StatusCode::BadConnectionClosed)
    }
}
