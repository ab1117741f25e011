//! The outgoing half of a transport: messages are chunked into a queue, each
//! chunk is secured and staged into a byte buffer, and the buffer is drained
//! into the socket as it accepts bytes. Per-channel send order is preserved
//! throughout.

use std::collections::VecDeque;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use uasc_types::{BinaryEncodable, Buffer, EncodingResult, Error, StatusCode};

use super::{
    chunker::{next_sequence_number, Chunker},
    message_chunk::MessageChunk,
    secure_channel::SecureChannel,
    tcp_types::ErrorMessage,
};
use crate::Message;

// Headroom on top of the negotiated chunk size for signature growth and
// asymmetric cipher expansion.
const CHUNK_SECURITY_MARGIN: usize = 4096;

/// Staging area for outgoing messages on one connection.
pub struct SendBuffer {
    /// The send buffer, drained by the socket writer.
    buffer: Buffer,
    /// Queued chunks waiting for security and staging.
    chunks: VecDeque<MessageChunk>,
    /// The negotiated maximum size of a single chunk.
    pub send_buffer_size: usize,
    /// The negotiated maximum size of a whole message, 0 for no limit.
    pub max_message_size: usize,
    /// The negotiated maximum number of chunks per message, 0 for no limit.
    pub max_chunk_count: usize,
    /// The sequence number of the last chunk queued on this channel.
    last_sequence_number: u32,
}

impl SendBuffer {
    /// Create a send buffer with the local limits. [`SendBuffer::revise`]
    /// applies the peer's limits after negotiation.
    pub fn new(
        send_buffer_size: usize,
        max_message_size: usize,
        max_chunk_count: usize,
    ) -> SendBuffer {
        SendBuffer {
            buffer: Buffer::growable(
                send_buffer_size.min(65536),
                send_buffer_size + CHUNK_SECURITY_MARGIN,
            ),
            chunks: VecDeque::new(),
            send_buffer_size,
            max_message_size,
            max_chunk_count,
            last_sequence_number: 0,
        }
    }

    /// Apply the limits acknowledged by the peer. The effective value of
    /// every limit is the pairwise minimum, where 0 counts as unlimited.
    pub fn revise(
        &mut self,
        send_buffer_size: usize,
        max_message_size: usize,
        max_chunk_count: usize,
    ) {
        if send_buffer_size > 0 {
            self.send_buffer_size = self.send_buffer_size.min(send_buffer_size);
        }
        if max_message_size > 0 {
            self.max_message_size = if self.max_message_size == 0 {
                max_message_size
            } else {
                self.max_message_size.min(max_message_size)
            };
        }
        if max_chunk_count > 0 {
            self.max_chunk_count = if self.max_chunk_count == 0 {
                max_chunk_count
            } else {
                self.max_chunk_count.min(max_chunk_count)
            };
        }
        self.buffer = Buffer::growable(
            self.send_buffer_size.min(65536),
            self.send_buffer_size + CHUNK_SECURITY_MARGIN,
        );
    }

    /// Chunk `message` into the queue, assigning fresh sequence numbers.
    /// Returns the request id on success.
    pub fn write(
        &mut self,
        request_id: u32,
        message: impl Message,
        secure_channel: &SecureChannel,
    ) -> EncodingResult<u32> {
        let sequence_number = next_sequence_number(self.last_sequence_number, 1);
        let chunks = Chunker::encode(
            sequence_number,
            request_id,
            self.max_message_size,
            self.send_buffer_size,
            secure_channel,
            &message,
        )?;

        if self.max_chunk_count > 0 && chunks.len() > self.max_chunk_count {
            return Err(Error::new(
                StatusCode::BadCommunicationError,
                format!(
                    "Message requires {} chunks, exceeding the negotiated limit of {}",
                    chunks.len(),
                    self.max_chunk_count
                ),
            )
            .with_context(
                Some(request_id),
                Some(message.request_handle()).filter(|h| *h > 0),
            ));
        }

        self.last_sequence_number =
            next_sequence_number(self.last_sequence_number, chunks.len() as u32);
        self.chunks.extend(chunks);
        Ok(request_id)
    }

    /// Stage a transport error message. It jumps the chunk queue since the
    /// connection closes right after.
    pub fn write_error(&mut self, message: ErrorMessage) {
        self.chunks.clear();
        self.buffer.reset();
        // Writing a small fixed message into an empty buffer cannot fail
        let _ = self.buffer.write(&message.encode_to_vec());
    }

    /// `true` when chunks wait for security and the byte buffer is free.
    pub fn should_encode_chunks(&self) -> bool {
        !self.chunks.is_empty() && !self.can_read()
    }

    /// Apply security to the next queued chunk and stage its bytes.
    pub fn encode_next_chunk(&mut self, secure_channel: &SecureChannel) -> Result<(), Error> {
        let Some(chunk) = self.chunks.pop_front() else {
            return Ok(());
        };
        let mut secured = vec![0u8; chunk.data.len() + CHUNK_SECURITY_MARGIN];
        let size = secure_channel.apply_security(&chunk, &mut secured)?;
        self.buffer.reset();
        self.buffer.write(&secured[..size])?;
        Ok(())
    }

    /// `true` when staged bytes wait for the socket.
    pub fn can_read(&self) -> bool {
        self.buffer.remaining() > 0
    }

    /// Write staged bytes into the stream. Performs at most one write so the
    /// future is cancel safe; unwritten bytes stay staged and a later call
    /// continues where this one stopped.
    pub async fn read_into_async<W: AsyncWrite + Unpin>(
        &mut self,
        write: &mut W,
    ) -> std::io::Result<()> {
        let written = write.write(self.buffer.unread()).await?;
        if written == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "Connection closed while sending",
            ));
        }
        let position = self.buffer.position();
        let _ = self.buffer.set_position(position + written);
        if self.buffer.remaining() == 0 {
            self.buffer.reset();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SendBuffer;
    use crate::comms::secure_channel::{Role, SecureChannel};
    use crate::RequestMessage;
    use uasc_types::{DecodingOptions, GetEndpointsRequest, RequestHeader};

    fn test_message() -> RequestMessage {
        GetEndpointsRequest {
            request_header: RequestHeader::dummy(),
            endpoint_url: "opc.tcp://localhost:4841".into(),
            locale_ids: None,
            profile_uris: None,
        }
        .into()
    }

    #[tokio::test]
    async fn write_stage_drain() {
        let channel = SecureChannel::new(Role::Client, DecodingOptions::test());
        let mut buffer = SendBuffer::new(8192, 0, 0);

        assert!(!buffer.should_encode_chunks());
        buffer.write(1, test_message(), &channel).unwrap();
        assert!(buffer.should_encode_chunks());

        buffer.encode_next_chunk(&channel).unwrap();
        assert!(buffer.can_read());

        let mut sink = Vec::new();
        while buffer.can_read() {
            buffer.read_into_async(&mut sink).await.unwrap();
        }
        assert_eq!(&sink[0..3], b"MSG");
    }

    #[test]
    fn revise_takes_minima() {
        let mut buffer = SendBuffer::new(16384, 1 << 20, 8);
        buffer.revise(8192, 0, 16);
        assert_eq!(buffer.send_buffer_size, 8192);
        assert_eq!(buffer.max_message_size, 1 << 20);
        assert_eq!(buffer.max_chunk_count, 8);
    }

    #[test]
    fn sequence_numbers_increase_across_messages() {
        let channel = SecureChannel::new(Role::Client, DecodingOptions::test());
        let mut buffer = SendBuffer::new(8192, 0, 0);
        buffer.write(1, test_message(), &channel).unwrap();
        buffer.write(2, test_message(), &channel).unwrap();
        // Two single chunk messages, sequence numbers 1 and 2
        assert_eq!(buffer.last_sequence_number, 2);
    }
}
