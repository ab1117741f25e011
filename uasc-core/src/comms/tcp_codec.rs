//! A tokio codec that splits the inbound byte stream into OPC UA TCP
//! messages: hello, acknowledge, error or chunk. The decoder never reads
//! beyond the declared message size and rejects sizes above the negotiated
//! maximum before buffering the body.

use std::io::Cursor;

use bytes::{Buf, BytesMut};
use log::error;
use tokio_util::codec::Decoder;

use uasc_types::{BinaryDecodable, DecodingOptions};

use super::{
    message_chunk::MessageChunk,
    tcp_types::{
        message_type, AcknowledgeMessage, ErrorMessage, HelloMessage, TransportMessageType,
        MESSAGE_HEADER_SIZE,
    },
};

/// A decoded transport-level message.
#[derive(Debug)]
pub enum Message {
    /// A client hello.
    Hello(HelloMessage),
    /// A server acknowledge.
    Acknowledge(AcknowledgeMessage),
    /// A fatal error notification.
    Error(ErrorMessage),
    /// A secure conversation chunk, still secured.
    Chunk(MessageChunk),
}

/// Frame decoder for the OPC UA TCP transport.
pub struct TcpCodec {
    decoding_options: DecodingOptions,
}

impl TcpCodec {
    /// Create a codec with the supplied limits.
    pub fn new(decoding_options: DecodingOptions) -> TcpCodec {
        TcpCodec { decoding_options }
    }

    fn io_error(message: String) -> std::io::Error {
        error!("{}", message);
        std::io::Error::new(std::io::ErrorKind::InvalidData, message)
    }
}

impl Decoder for TcpCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MESSAGE_HEADER_SIZE {
            return Ok(None);
        }

        let Some(kind) = message_type(&src[0..3]) else {
            return Err(Self::io_error(format!(
                "Invalid message type code {:?}",
                &src[0..3]
            )));
        };

        let message_size = u32::from_le_bytes([src[4], src[5], src[6], src[7]]) as usize;
        if message_size < MESSAGE_HEADER_SIZE {
            return Err(Self::io_error(format!(
                "Message size {} is smaller than the message header",
                message_size
            )));
        }
        if self.decoding_options.max_message_size > 0
            && message_size > self.decoding_options.max_message_size
        {
            return Err(Self::io_error(format!(
                "Message size {} exceeds negotiated maximum {}",
                message_size, self.decoding_options.max_message_size
            )));
        }

        if src.len() < message_size {
            src.reserve(message_size - src.len());
            return Ok(None);
        }

        let data = src.copy_to_bytes(message_size);
        let mut stream = Cursor::new(&data[..]);
        let message = match kind {
            TransportMessageType::Hello => Message::Hello(
                HelloMessage::decode(&mut stream, &self.decoding_options)
                    .map_err(std::io::Error::from)?,
            ),
            TransportMessageType::Acknowledge => Message::Acknowledge(
                AcknowledgeMessage::decode(&mut stream, &self.decoding_options)
                    .map_err(std::io::Error::from)?,
            ),
            TransportMessageType::Error => Message::Error(
                ErrorMessage::decode(&mut stream, &self.decoding_options)
                    .map_err(std::io::Error::from)?,
            ),
            TransportMessageType::Chunk => Message::Chunk(MessageChunk {
                data: data.to_vec(),
            }),
        };
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, TcpCodec};
    use crate::comms::tcp_types::HelloMessage;
    use bytes::BytesMut;
    use tokio_util::codec::Decoder;
    use uasc_types::{BinaryEncodable, DecodingOptions};

    #[test]
    fn partial_then_complete_frame() {
        let mut codec = TcpCodec::new(DecodingOptions::test());
        let hello = HelloMessage::new("opc.tcp://localhost:4841", 65536, 65536, 0, 0);
        let bytes = hello.encode_to_vec();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&bytes[..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[6..]);
        match codec.decode(&mut buf).unwrap() {
            Some(Message::Hello(decoded)) => assert_eq!(decoded, hello),
            other => panic!("expected hello, got {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_frame_rejected() {
        let options = DecodingOptions {
            max_message_size: 64,
            ..DecodingOptions::test()
        };
        let mut codec = TcpCodec::new(options);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"MSGF");
        buf.extend_from_slice(&1_000_000u32.to_le_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn unknown_type_rejected() {
        let mut codec = TcpCodec::new(DecodingOptions::test());
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"XXXF");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
