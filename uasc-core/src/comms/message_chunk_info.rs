//! Decoded header information about a chunk.

use std::io::Cursor;

use uasc_types::{BinaryDecodable, EncodingResult, Error};

use super::{
    message_chunk::{MessageChunk, MessageChunkHeader},
    secure_channel::SecureChannel,
    security_header::{SecurityHeader, SequenceHeader},
};

/// The headers of a chunk plus the offsets of its body. Only meaningful for
/// chunks whose security has not been applied yet or has already been
/// removed, i.e. the sequence header is plaintext.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    /// The chunk header.
    pub message_header: MessageChunkHeader,
    /// The security header, symmetric or asymmetric.
    pub security_header: SecurityHeader,
    /// The sequence header.
    pub sequence_header: SequenceHeader,
    /// Byte offset of the message body within the chunk data.
    pub body_offset: usize,
    /// Length of the message body.
    pub body_length: usize,
}

impl ChunkInfo {
    /// Decode the headers of `chunk`.
    pub fn new(chunk: &MessageChunk, secure_channel: &SecureChannel) -> EncodingResult<ChunkInfo> {
        let decoding_options = secure_channel.decoding_options();
        let mut stream = Cursor::new(&chunk.data);

        let message_header = MessageChunkHeader::decode(&mut stream, &decoding_options)?;
        let security_header = SecurityHeader::decode_from_stream(
            &mut stream,
            message_header.message_type.is_open_secure_channel(),
            &decoding_options,
        )?;
        let sequence_header = SequenceHeader::decode(&mut stream, &decoding_options)?;

        let body_offset = stream.position() as usize;
        if body_offset > chunk.data.len() {
            return Err(Error::decoding("Chunk headers exceed chunk data"));
        }
        // Padding and signature are already stripped (or not yet added), the
        // body runs to the end of the data
        let body_length = chunk.data.len() - body_offset;

        Ok(ChunkInfo {
            message_header,
            security_header,
            sequence_header,
            body_offset,
            body_length,
        })
    }
}
