//! The connection protocol messages of OPC UA TCP: Hello, Acknowledge and
//! Error, plus the constants shared with the chunk layer.

use std::io::{Read, Write};

use log::error;
use uasc_types::{
    process_decode_io_result, read_u32, read_u8, write_u32, write_u8, BinaryDecodable,
    BinaryEncodable, DecodingOptions, EncodingResult, Error, StatusCode, UAString,
};

/// Message type code for a hello message.
pub const HELLO_MESSAGE: &[u8] = b"HEL";
/// Message type code for an acknowledge message.
pub const ACKNOWLEDGE_MESSAGE: &[u8] = b"ACK";
/// Message type code for an error message.
pub const ERROR_MESSAGE: &[u8] = b"ERR";
/// Message type code for a service message chunk.
pub const CHUNK_MESSAGE: &[u8] = b"MSG";
/// Message type code for an open secure channel chunk.
pub const OPEN_SECURE_CHANNEL_MESSAGE: &[u8] = b"OPN";
/// Message type code for a close secure channel chunk.
pub const CLOSE_SECURE_CHANNEL_MESSAGE: &[u8] = b"CLO";

/// Is-final flag of an intermediate chunk.
pub const CHUNK_INTERMEDIATE: u8 = b'C';
/// Is-final flag of the final chunk of a message.
pub const CHUNK_FINAL: u8 = b'F';
/// Is-final flag of an abort chunk.
pub const CHUNK_FINAL_ERROR: u8 = b'A';

/// The connection protocol message header is always 8 bytes: type, reserved /
/// is-final byte, and total size.
pub const MESSAGE_HEADER_SIZE: usize = 3 + 1 + 4;

/// Hard floor on negotiated buffer sizes, from part 6.
pub const MIN_CHUNK_SIZE: usize = 8192;

/// Cap on the endpoint URL carried in a hello message.
pub const MAX_ENDPOINT_URL_LENGTH: usize = 4096;

/// The kind of a connection protocol message, before any chunk processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportMessageType {
    /// A client hello.
    Hello,
    /// A server acknowledge.
    Acknowledge,
    /// A fatal error notification, the connection closes after it.
    Error,
    /// A secure conversation chunk (MSG, OPN or CLO).
    Chunk,
}

/// Peek at the 3 byte message type code.
pub fn message_type(code: &[u8]) -> Option<TransportMessageType> {
    match code {
        HELLO_MESSAGE => Some(TransportMessageType::Hello),
        ACKNOWLEDGE_MESSAGE => Some(TransportMessageType::Acknowledge),
        ERROR_MESSAGE => Some(TransportMessageType::Error),
        CHUNK_MESSAGE | OPEN_SECURE_CHANNEL_MESSAGE | CLOSE_SECURE_CHANNEL_MESSAGE => {
            Some(TransportMessageType::Chunk)
        }
        _ => None,
    }
}

fn write_message_header<S: Write + ?Sized>(
    stream: &mut S,
    message_type: &[u8],
    body_size: usize,
) -> EncodingResult<()> {
    uasc_types::process_encode_io_result(stream.write_all(message_type))?;
    write_u8(stream, CHUNK_FINAL)?;
    write_u32(stream, (MESSAGE_HEADER_SIZE + body_size) as u32)
}

fn validate_message_header<S: Read + ?Sized>(
    stream: &mut S,
    expected_type: &[u8],
) -> EncodingResult<u32> {
    let mut code = [0u8; 3];
    process_decode_io_result(stream.read_exact(&mut code))?;
    if code != *expected_type {
        return Err(Error::new(
            StatusCode::BadTcpMessageTypeInvalid,
            format!("Expected message type {:?}, got {:?}", expected_type, code),
        ));
    }
    let _reserved = read_u8(stream)?;
    read_u32(stream)
}

/// First message on a connection, sent by the client with its transport
/// limits and the endpoint it wants to reach.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloMessage {
    /// Version of the connection protocol, currently 0.
    pub protocol_version: u32,
    /// Largest chunk the sender can receive.
    pub receive_buffer_size: u32,
    /// Largest chunk the sender will send.
    pub send_buffer_size: u32,
    /// Largest reassembled message the sender accepts, 0 for no limit.
    pub max_message_size: u32,
    /// Most chunks per message the sender accepts, 0 for no limit.
    pub max_chunk_count: u32,
    /// The endpoint URL the client connected to.
    pub endpoint_url: UAString,
}

impl BinaryEncodable for HelloMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_SIZE + 20 + self.endpoint_url.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_message_header(stream, HELLO_MESSAGE, 20 + self.endpoint_url.byte_len())?;
        write_u32(stream, self.protocol_version)?;
        write_u32(stream, self.receive_buffer_size)?;
        write_u32(stream, self.send_buffer_size)?;
        write_u32(stream, self.max_message_size)?;
        write_u32(stream, self.max_chunk_count)?;
        self.endpoint_url.encode(stream)
    }
}

impl BinaryDecodable for HelloMessage {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let _size = validate_message_header(stream, HELLO_MESSAGE)?;
        let protocol_version = read_u32(stream)?;
        let receive_buffer_size = read_u32(stream)?;
        let send_buffer_size = read_u32(stream)?;
        let max_message_size = read_u32(stream)?;
        let max_chunk_count = read_u32(stream)?;
        let endpoint_url = UAString::decode(stream, decoding_options)?;
        if endpoint_url.len() > MAX_ENDPOINT_URL_LENGTH as isize {
            return Err(Error::new(
                StatusCode::BadTcpEndpointUrlInvalid,
                format!(
                    "Hello endpoint url length {} exceeds {}",
                    endpoint_url.len(),
                    MAX_ENDPOINT_URL_LENGTH
                ),
            ));
        }
        Ok(HelloMessage {
            protocol_version,
            receive_buffer_size,
            send_buffer_size,
            max_message_size,
            max_chunk_count,
            endpoint_url,
        })
    }
}

impl HelloMessage {
    /// Create a hello for `endpoint_url` with the local limits.
    pub fn new(
        endpoint_url: &str,
        send_buffer_size: usize,
        receive_buffer_size: usize,
        max_message_size: usize,
        max_chunk_count: usize,
    ) -> HelloMessage {
        HelloMessage {
            protocol_version: 0,
            receive_buffer_size: receive_buffer_size as u32,
            send_buffer_size: send_buffer_size as u32,
            max_message_size: max_message_size as u32,
            max_chunk_count: max_chunk_count as u32,
            endpoint_url: UAString::from(endpoint_url),
        }
    }

    /// Buffer sizes below the hard floor are a protocol violation.
    pub fn is_valid_buffer_sizes(&self) -> bool {
        self.receive_buffer_size as usize >= MIN_CHUNK_SIZE
            && self.send_buffer_size as usize >= MIN_CHUNK_SIZE
    }

    /// Check the hello's endpoint url against the urls of the configured
    /// endpoints.
    pub fn matches_endpoint<'a>(&self, mut urls: impl Iterator<Item = &'a str>) -> bool {
        let hello_url = self.endpoint_url.as_ref();
        !hello_url.is_empty()
            && urls.any(|url| super::url::url_matches_except_host(url, hello_url))
    }
}

/// The server's reply to a hello, carrying its own limits.
#[derive(Debug, Clone, PartialEq)]
pub struct AcknowledgeMessage {
    /// Version of the connection protocol the server implements.
    pub protocol_version: u32,
    /// Largest chunk the server can receive.
    pub receive_buffer_size: u32,
    /// Largest chunk the server will send.
    pub send_buffer_size: u32,
    /// Largest reassembled message the server accepts, 0 for no limit.
    pub max_message_size: u32,
    /// Most chunks per message the server accepts, 0 for no limit.
    pub max_chunk_count: u32,
}

impl BinaryEncodable for AcknowledgeMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_SIZE + 20
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_message_header(stream, ACKNOWLEDGE_MESSAGE, 20)?;
        write_u32(stream, self.protocol_version)?;
        write_u32(stream, self.receive_buffer_size)?;
        write_u32(stream, self.send_buffer_size)?;
        write_u32(stream, self.max_message_size)?;
        write_u32(stream, self.max_chunk_count)?;
        Ok(())
    }
}

impl BinaryDecodable for AcknowledgeMessage {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let _size = validate_message_header(stream, ACKNOWLEDGE_MESSAGE)?;
        Ok(AcknowledgeMessage {
            protocol_version: read_u32(stream)?,
            receive_buffer_size: read_u32(stream)?,
            send_buffer_size: read_u32(stream)?,
            max_message_size: read_u32(stream)?,
            max_chunk_count: read_u32(stream)?,
        })
    }
}

impl AcknowledgeMessage {
    /// Create an acknowledge with the server's revised limits.
    pub fn new(
        protocol_version: u32,
        receive_buffer_size: u32,
        send_buffer_size: u32,
        max_message_size: u32,
        max_chunk_count: u32,
    ) -> AcknowledgeMessage {
        AcknowledgeMessage {
            protocol_version,
            receive_buffer_size,
            send_buffer_size,
            max_message_size,
            max_chunk_count,
        }
    }
}

/// A fatal transport error. The sender closes the connection right after.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    /// The status describing the failure.
    pub error: StatusCode,
    /// Human readable reason.
    pub reason: UAString,
}

impl BinaryEncodable for ErrorMessage {
    fn byte_len(&self) -> usize {
        MESSAGE_HEADER_SIZE + 4 + self.reason.byte_len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_message_header(stream, ERROR_MESSAGE, 4 + self.reason.byte_len())?;
        self.error.encode(stream)?;
        self.reason.encode(stream)
    }
}

impl BinaryDecodable for ErrorMessage {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let _size = validate_message_header(stream, ERROR_MESSAGE)?;
        Ok(ErrorMessage {
            error: StatusCode::decode(stream, decoding_options)?,
            reason: UAString::decode(stream, decoding_options)?,
        })
    }
}

impl ErrorMessage {
    /// Create an error message for `error`.
    pub fn new(error: StatusCode, reason: &str) -> ErrorMessage {
        error!("Sending transport error {}: {}", error, reason);
        ErrorMessage {
            error,
            reason: UAString::from(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AcknowledgeMessage, ErrorMessage, HelloMessage, MIN_CHUNK_SIZE};
    use std::io::Cursor;
    use uasc_types::{BinaryDecodable, BinaryEncodable, DecodingOptions, StatusCode};

    #[test]
    fn hello_round_trip() {
        let hello = HelloMessage::new("opc.tcp://localhost:4841", 65536, 65536, 0, 0);
        let bytes = hello.encode_to_vec();
        assert_eq!(&bytes[..4], b"HELF");
        assert_eq!(bytes.len(), hello.byte_len());
        let decoded =
            HelloMessage::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, hello);
    }

    #[test]
    fn hello_buffer_floor() {
        let mut hello = HelloMessage::new("opc.tcp://localhost:4841", 65536, 65536, 0, 0);
        assert!(hello.is_valid_buffer_sizes());
        hello.receive_buffer_size = (MIN_CHUNK_SIZE - 1) as u32;
        assert!(!hello.is_valid_buffer_sizes());
    }

    #[test]
    fn acknowledge_round_trip() {
        let ack = AcknowledgeMessage::new(0, 8192, 8192, 1 << 20, 16);
        let bytes = ack.encode_to_vec();
        assert_eq!(&bytes[..4], b"ACKF");
        let decoded =
            AcknowledgeMessage::decode(&mut Cursor::new(bytes), &DecodingOptions::test())
                .unwrap();
        assert_eq!(decoded, ack);
    }

    #[test]
    fn error_round_trip() {
        let err = ErrorMessage::new(StatusCode::BadTcpMessageTooLarge, "too large");
        let bytes = err.encode_to_vec();
        assert_eq!(&bytes[..4], b"ERRF");
        let decoded =
            ErrorMessage::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, err);
    }

    #[test]
    fn wrong_type_rejected() {
        let hello = HelloMessage::new("opc.tcp://localhost:4841", 65536, 65536, 0, 0);
        let bytes = hello.encode_to_vec();
        assert!(
            AcknowledgeMessage::decode(&mut Cursor::new(bytes), &DecodingOptions::test())
                .is_err()
        );
    }
}
