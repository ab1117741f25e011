//! Turns messages into chunk sequences and chunk sequences back into
//! messages.

use std::io::{Read, Write};

use crate::{
    comms::{
        message_chunk::{MessageChunk, MessageIsFinalType},
        secure_channel::SecureChannel,
    },
    Message,
};

use log::{debug, error};
use uasc_crypto::SecurityPolicy;
use uasc_types::{
    BinaryDecodable, BinaryEncodable, EncodingResult, Error, NodeId, ObjectId, StatusCode,
};

use super::message_chunk::MessageChunkType;

/// Sequence numbers wrap back to 1 once they pass this value.
pub const SEQUENCE_NUMBER_WRAP: u32 = u32::MAX - 1024;

/// Read implementation for a sequence of message chunks. Reads to the end of
/// each chunk body, then steps into the next chunk, so a message can be
/// decoded without first copying all bodies into one buffer.
struct ReceiveStream<'a, T> {
    buffer: &'a [u8],
    channel: &'a SecureChannel,
    items: T,
    num_items: usize,
    pos: usize,
    index: usize,
}

impl<'a, T: Iterator<Item = &'a MessageChunk>> ReceiveStream<'a, T> {
    pub fn new(channel: &'a SecureChannel, mut items: T, num_items: usize) -> Result<Self, Error> {
        let Some(chunk) = items.next() else {
            return Err(Error::new(
                StatusCode::BadUnexpectedError,
                "Stream contained no chunks",
            ));
        };

        let chunk_info = chunk.chunk_info(channel)?;
        let expected_is_final = if num_items == 1 {
            MessageIsFinalType::Final
        } else {
            MessageIsFinalType::Intermediate
        };
        if chunk_info.message_header.is_final != expected_is_final {
            return Err(Error::new(
                StatusCode::BadDecodingError,
                "Last chunk not marked as final",
            ));
        }

        let body_start = chunk_info.body_offset;
        let body_end = body_start + chunk_info.body_length;
        Ok(Self {
            buffer: &chunk.data[body_start..body_end],
            channel,
            items,
            pos: 0,
            num_items,
            index: 0,
        })
    }
}

impl<'a, T: Iterator<Item = &'a MessageChunk>> Read for ReceiveStream<'a, T> {
    fn read(&mut self, mut buf: &mut [u8]) -> std::io::Result<usize> {
        if self.buffer.len() == self.pos {
            let Some(chunk) = self.items.next() else {
                return Ok(0);
            };
            self.index += 1;
            let chunk_info = chunk.chunk_info(self.channel)?;
            let expected_is_final = if self.index == self.num_items - 1 {
                MessageIsFinalType::Final
            } else {
                MessageIsFinalType::Intermediate
            };
            if chunk_info.message_header.is_final != expected_is_final {
                return Err(StatusCode::BadDecodingError.into());
            }

            let body_start = chunk_info.body_offset;
            let body_end = body_start + chunk_info.body_length;
            self.buffer = &chunk.data[body_start..body_end];
            self.pos = 0;
        }
        let written = buf.write(&self.buffer[self.pos..])?;
        self.pos += written;
        Ok(written)
    }
}

/// Write implementation that splits everything written through it into
/// chunks of at most the negotiated body size.
struct ChunkingStream<'a> {
    secure_channel: &'a SecureChannel,
    chunks: Vec<MessageChunk>,
    expected_chunk_count: usize,
    max_body_per_chunk: usize,
    next_buf: Vec<u8>,
    buf_position: usize,
    is_closed: bool,
    sequence_number: u32,
    request_id: u32,
    message_size: usize,
    message_type: MessageChunkType,
}

impl<'a> ChunkingStream<'a> {
    pub fn new(
        message_type: MessageChunkType,
        secure_channel: &'a SecureChannel,
        max_chunk_size: usize,
        message_size: usize,
        request_id: u32,
        request_handle: u32,
        sequence_number: u32,
    ) -> Result<Self, Error> {
        let (expected_chunk_count, max_body_per_chunk, next_buf_size) = if max_chunk_size > 0 {
            let max_body_per_chunk = MessageChunk::body_size_from_message_size(
                message_type,
                secure_channel,
                max_chunk_size,
            )
            .map_err(|_| {
                Error::new(
                    StatusCode::BadTcpInternalError,
                    format!(
                        "body_size_from_message_size error for max_chunk_size = {}",
                        max_chunk_size
                    ),
                )
                .with_context(
                    Some(request_id),
                    (request_handle > 0).then_some(request_handle),
                )
            })?;
            let expected_chunk_count = message_size / max_body_per_chunk + 1;
            let next_buf_size = if expected_chunk_count == 1 {
                message_size
            } else {
                max_body_per_chunk
            };
            (expected_chunk_count, max_body_per_chunk, next_buf_size)
        } else {
            (1, 0, message_size)
        };

        Ok(Self {
            secure_channel,
            chunks: Vec::with_capacity(expected_chunk_count),
            expected_chunk_count,
            max_body_per_chunk,
            next_buf: vec![0; next_buf_size],
            buf_position: 0,
            is_closed: false,
            sequence_number,
            request_id,
            message_type,
            message_size,
        })
    }

    fn flush_chunk(&mut self) -> EncodingResult<()> {
        if self.is_closed {
            return Ok(());
        }

        let buf = std::mem::take(&mut self.next_buf);
        let is_final = if self.chunks.len() == self.expected_chunk_count - 1 {
            self.is_closed = true;
            MessageIsFinalType::Final
        } else {
            MessageIsFinalType::Intermediate
        };

        let chunk = MessageChunk::new(
            next_sequence_number(self.sequence_number, self.chunks.len() as u32),
            self.request_id,
            self.message_type,
            is_final,
            self.secure_channel,
            &buf,
        )?;
        self.chunks.push(chunk);

        if !self.is_closed {
            let next_buf_size = if self.chunks.len() == self.expected_chunk_count - 1 {
                self.message_size % self.max_body_per_chunk
            } else {
                self.max_body_per_chunk
            };
            self.next_buf = vec![0; next_buf_size];
            self.buf_position = 0;
        }

        Ok(())
    }

    fn finish(self) -> EncodingResult<Vec<MessageChunk>> {
        if !self.is_closed {
            return Err(Error::encoding(
                "Message did not encode to the expected size",
            ));
        }
        Ok(self.chunks)
    }
}

impl Write for ChunkingStream<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.is_closed {
            return Ok(0);
        }

        let to_read = buf.len().min(self.next_buf.len() - self.buf_position);
        self.next_buf[self.buf_position..(self.buf_position + to_read)]
            .copy_from_slice(&buf[..to_read]);
        self.buf_position += to_read;
        if self.buf_position == self.next_buf.len() {
            self.flush_chunk()?;
        }

        Ok(to_read)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_chunk()?;
        Ok(())
    }
}

/// The sequence number `offset` steps after `start`, wrapping at the
/// protocol limit.
pub fn next_sequence_number(start: u32, offset: u32) -> u32 {
    let remaining = SEQUENCE_NUMBER_WRAP.saturating_sub(start);
    if offset <= remaining {
        start + offset
    } else {
        // Wraps restart at 1
        offset - remaining
    }
}

/// The Chunker is responsible for turning messages into chunks and chunks
/// into messages.
pub struct Chunker;

impl Chunker {
    /// Ensure all of the supplied chunks have a valid secure channel id,
    /// sequence numbers that increase by one from the first, and a uniform
    /// request id.
    ///
    /// Returns the last sequence number in the series for success.
    pub fn validate_chunks(
        starting_sequence_number: u32,
        secure_channel: &SecureChannel,
        chunks: &[MessageChunk],
    ) -> Result<u32, Error> {
        let first_sequence_number = {
            let chunk_info = chunks[0].chunk_info(secure_channel)?;
            chunk_info.sequence_header.sequence_number
        };

        // A sender that passed the wrap point restarts below 1024
        let wrapped = starting_sequence_number > SEQUENCE_NUMBER_WRAP
            && first_sequence_number < 1024;
        if first_sequence_number < starting_sequence_number && !wrapped {
            return Err(Error::new(
                StatusCode::BadSequenceNumberInvalid,
                format!(
                    "First sequence number of {} is less than last value {}",
                    first_sequence_number, starting_sequence_number
                ),
            ));
        }

        let secure_channel_id = secure_channel.secure_channel_id();
        let mut expected_request_id: u32 = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_info = chunk.chunk_info(secure_channel)?;

            // Every chunk must belong to this channel
            if secure_channel_id != 0
                && chunk_info.message_header.secure_channel_id != secure_channel_id
            {
                return Err(Error::new(
                    StatusCode::BadSecureChannelIdInvalid,
                    format!(
                        "Secure channel id {} does not match expected id {}",
                        chunk_info.message_header.secure_channel_id, secure_channel_id
                    ),
                ));
            }

            // Sequence numbers increase by exactly one per chunk
            let sequence_number = chunk_info.sequence_header.sequence_number;
            let expected_sequence_number =
                next_sequence_number(first_sequence_number, i as u32);
            if sequence_number != expected_sequence_number {
                return Err(Error::new(
                    StatusCode::BadSequenceNumberInvalid,
                    format!(
                        "Chunk sequence number of {} is not the expected value of {}, idx {}",
                        sequence_number, expected_sequence_number, i
                    ),
                ));
            }

            // All chunks of one message share the first chunk's request id
            if i == 0 {
                expected_request_id = chunk_info.sequence_header.request_id;
            } else if chunk_info.sequence_header.request_id != expected_request_id {
                return Err(Error::new(
                    StatusCode::BadSequenceNumberInvalid,
                    format!(
                        "Chunk sequence number of {} has a request id {} which is not the expected value of {}, idx {}",
                        sequence_number,
                        chunk_info.sequence_header.request_id,
                        expected_request_id,
                        i
                    ),
                ));
            }
        }
        Ok(next_sequence_number(
            first_sequence_number,
            chunks.len() as u32 - 1,
        ))
    }

    /// Encode a message into one or more chunks using the supplied sequence
    /// number and secure channel.
    ///
    /// `max_chunk_size` is the maximum byte length of a chunk, 0 for no
    /// limit; `max_message_size` the maximum byte length of the whole
    /// message, 0 for no limit.
    pub fn encode(
        sequence_number: u32,
        request_id: u32,
        max_message_size: usize,
        max_chunk_size: usize,
        secure_channel: &SecureChannel,
        supported_message: &impl Message,
    ) -> Result<Vec<MessageChunk>, Error> {
        let security_policy = secure_channel.security_policy();
        if security_policy == SecurityPolicy::Unknown {
            return Err(Error::new(
                StatusCode::BadSecurityPolicyRejected,
                "Security policy cannot be unknown",
            ));
        }

        let ctx_id = Some(request_id);
        let handle = supported_message.request_handle();
        let ctx_handle = (handle > 0).then_some(handle);

        // The message length must be validated before anything is sent, and
        // here is as good a place as any
        let mut message_size = supported_message.byte_len();
        if max_message_size > 0 && message_size > max_message_size {
            error!(
                "Max message size is {} and message {} exceeds that",
                max_message_size, message_size
            );
            // Client stack reports BadRequestTooLarge, server BadResponseTooLarge
            return Err(Error::new(
                if secure_channel.is_client_role() {
                    StatusCode::BadRequestTooLarge
                } else {
                    StatusCode::BadResponseTooLarge
                },
                format!(
                    "Max message size is {} and message {} exceeds that",
                    max_message_size, message_size
                ),
            )
            .with_context(ctx_id, ctx_handle));
        }

        let node_id: NodeId = supported_message.type_id().into();
        message_size += node_id.byte_len();

        let message_type = supported_message.message_type();

        let mut stream = ChunkingStream::new(
            message_type,
            secure_channel,
            max_chunk_size,
            message_size,
            request_id,
            handle,
            sequence_number,
        )?;

        // The message body on the wire is the type id then the struct
        node_id.encode(&mut stream)?;
        supported_message
            .encode(&mut stream)
            .map_err(|e| e.with_context(ctx_id, ctx_handle))?;

        stream.flush()?;
        stream.finish()
    }

    /// Decode a series of chunks into a message of type `T`.
    pub fn decode<T: Message>(
        chunks: &[MessageChunk],
        secure_channel: &SecureChannel,
        expected_node_id: Option<NodeId>,
    ) -> Result<T, Error> {
        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_info = chunk.chunk_info(secure_channel)?;
            // The last chunk is expected to be final, the rest intermediate
            let expected_is_final = if i == chunks.len() - 1 {
                MessageIsFinalType::Final
            } else {
                MessageIsFinalType::Intermediate
            };
            if chunk_info.message_header.is_final != expected_is_final {
                return Err(Error::decoding(
                    "Last message in sequence is not marked as final",
                ));
            }
        }

        let mut stream = ReceiveStream::new(secure_channel, chunks.iter(), chunks.len())?;
        let decoding_options = secure_channel.decoding_options();

        // The message body starts with the node id of the encodeable type
        let node_id = NodeId::decode(&mut stream, &decoding_options)?;
        let object_id = Self::object_id_from_node_id(node_id, expected_node_id)?;

        match T::decode_by_object_id(&mut stream, object_id, &decoding_options) {
            Ok(decoded_message) => Ok(decoded_message),
            Err(err) => {
                debug!("Cannot decode message {:?}, err = {:?}", object_id, err);
                Err(err)
            }
        }
    }

    fn object_id_from_node_id(
        node_id: NodeId,
        expected_node_id: Option<NodeId>,
    ) -> Result<ObjectId, Error> {
        if let Some(id) = expected_node_id {
            if node_id != id {
                return Err(Error::decoding(format!(
                    "The message ID {node_id} is not the expected value {id}"
                )));
            }
        }
        ObjectId::try_from(&node_id)
            .map_err(|_| Error::decoding(format!("The message id {node_id} is not an object id")))
    }
}

#[cfg(test)]
mod tests {
    use super::{next_sequence_number, Chunker, SEQUENCE_NUMBER_WRAP};
    use crate::comms::secure_channel::{Role, SecureChannel};
    use crate::{RequestMessage, ResponseMessage};
    use uasc_types::{
        DecodingOptions, NodeId, ReadRequest, ReadValueId, RequestHeader, TimestampsToReturn,
    };

    fn test_channel() -> SecureChannel {
        SecureChannel::new(Role::Client, DecodingOptions::test())
    }

    fn test_request(num_nodes: usize) -> RequestMessage {
        ReadRequest {
            request_header: RequestHeader::dummy(),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: Some(
                (0..num_nodes)
                    .map(|i| ReadValueId::value_of(NodeId::new(1, 1000 + i as u32)))
                    .collect(),
            ),
        }
        .into()
    }

    #[test]
    fn single_chunk_round_trip() {
        let channel = test_channel();
        let request = test_request(3);
        let chunks = Chunker::encode(1, 1, 0, 0, &channel, &request).unwrap();
        assert_eq!(chunks.len(), 1);

        let last = Chunker::validate_chunks(1, &channel, &chunks).unwrap();
        assert_eq!(last, 1);

        let decoded: RequestMessage = Chunker::decode(&chunks, &channel, None).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn multi_chunk_round_trip() {
        let channel = test_channel();
        // 500 nodes does not fit into one minimum sized chunk
        let request = test_request(500);
        let chunks = Chunker::encode(1, 1, 0, 8192, &channel, &request).unwrap();
        assert!(chunks.len() > 1, "expected multiple chunks");

        let last = Chunker::validate_chunks(1, &channel, &chunks).unwrap();
        assert_eq!(last, chunks.len() as u32);

        let decoded: RequestMessage = Chunker::decode(&chunks, &channel, None).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn out_of_order_sequence_rejected() {
        let channel = test_channel();
        let request = test_request(500);
        let mut chunks = Chunker::encode(1, 1, 0, 8192, &channel, &request).unwrap();
        assert!(chunks.len() > 1);
        chunks.swap(0, 1);
        assert!(Chunker::validate_chunks(1, &channel, &chunks).is_err());
    }

    #[test]
    fn stale_sequence_number_rejected() {
        let channel = test_channel();
        let request = test_request(1);
        let chunks = Chunker::encode(5, 1, 0, 0, &channel, &request).unwrap();
        // Receiver expects at least 6, replayed 5 must be rejected
        assert!(Chunker::validate_chunks(6, &channel, &chunks).is_err());
    }

    #[test]
    fn message_size_cap_enforced() {
        let channel = test_channel();
        let request = test_request(500);
        let err = Chunker::encode(1, 1, 128, 0, &channel, &request).unwrap_err();
        assert_eq!(err.status(), uasc_types::StatusCode::BadRequestTooLarge);
    }

    #[test]
    fn sequence_wrap() {
        assert_eq!(next_sequence_number(5, 1), 6);
        assert_eq!(next_sequence_number(SEQUENCE_NUMBER_WRAP, 1), 1);
        assert_eq!(next_sequence_number(SEQUENCE_NUMBER_WRAP - 1, 1), SEQUENCE_NUMBER_WRAP);

        let channel = test_channel();
        let request = test_request(1);
        // A chunk numbered 1 right after the wrap point is accepted
        let chunks = Chunker::encode(1, 1, 0, 0, &channel, &request).unwrap();
        assert!(Chunker::validate_chunks(SEQUENCE_NUMBER_WRAP + 1, &channel, &chunks).is_ok());
    }

    #[test]
    fn response_decode_mismatched_type() {
        let channel = test_channel();
        let request = test_request(1);
        let chunks = Chunker::encode(1, 1, 0, 0, &channel, &request).unwrap();
        // Decoding a request as a response must fail
        assert!(Chunker::decode::<ResponseMessage>(&chunks, &channel, None).is_err());
    }
}
