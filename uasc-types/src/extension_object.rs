//! The OPC UA `ExtensionObject`: a container for any structured value,
//! carried as its encoding node id plus an opaque body.

use std::io::{Cursor, Read, Write};

use crate::{
    byte_string::ByteString,
    encoding::{
        read_u8, write_u8, BinaryDecodable, BinaryEncodable, DecodingOptions, EncodingResult,
        Error,
    },
    node_id::NodeId,
    object_id::ObjectId,
};

/// The body of an extension object.
#[derive(PartialEq, Debug, Clone, Default)]
pub enum ExtensionObjectBody {
    /// No body.
    #[default]
    None,
    /// A binary encoded body.
    ByteString(ByteString),
}

/// A wrapper for any structured value. The stack treats bodies as opaque
/// bytes; typed access goes through [`ExtensionObject::decode_inner`] with
/// the expected type.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct ExtensionObject {
    /// Node id of the encoding node of the contained type, e.g. the
    /// `*_Encoding_DefaultBinary` object.
    pub node_id: NodeId,
    /// The encoded body.
    pub body: ExtensionObjectBody,
}

impl BinaryEncodable for ExtensionObject {
    fn byte_len(&self) -> usize {
        let mut size = self.node_id.byte_len() + 1;
        if let ExtensionObjectBody::ByteString(ref value) = self.body {
            size += value.byte_len();
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.node_id.encode(stream)?;
        match &self.body {
            ExtensionObjectBody::None => write_u8(stream, 0x0u8),
            ExtensionObjectBody::ByteString(value) => {
                write_u8(stream, 0x1u8)?;
                value.encode(stream)
            }
        }
    }
}

impl BinaryDecodable for ExtensionObject {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let node_id = NodeId::decode(stream, decoding_options)?;
        let encoding = read_u8(stream)?;
        let body = match encoding {
            0x0 => ExtensionObjectBody::None,
            0x1 => {
                ExtensionObjectBody::ByteString(ByteString::decode(stream, decoding_options)?)
            }
            0x2 => {
                // XML bodies are not supported by this stack, but the bytes
                // must still be consumed to keep the stream in sync
                let value = ByteString::decode(stream, decoding_options)?;
                return Err(Error::decoding(format!(
                    "Unsupported XML extension object body of {} bytes for node id {}",
                    value.len(),
                    node_id
                )));
            }
            r => {
                return Err(Error::decoding(format!(
                    "Invalid extension object encoding byte {}",
                    r
                )));
            }
        };
        Ok(ExtensionObject { node_id, body })
    }
}

impl ExtensionObject {
    /// An extension object with no body and a null node id.
    pub fn null() -> ExtensionObject {
        ExtensionObject::default()
    }

    /// Test if the object has no body.
    pub fn is_empty(&self) -> bool {
        matches!(self.body, ExtensionObjectBody::None)
    }

    /// Get the object id of the encoding node, if the node id is a numeric
    /// id in namespace 0 the stack knows about.
    pub fn object_id(&self) -> Option<ObjectId> {
        ObjectId::try_from(&self.node_id).ok()
    }

    /// Wrap `value` into an extension object, encoding it as its default
    /// binary representation.
    pub fn from_message<T>(value: &T) -> ExtensionObject
    where
        T: BinaryEncodable + crate::service::MessageInfo,
    {
        ExtensionObject {
            node_id: value.type_id().into(),
            body: ExtensionObjectBody::ByteString(ByteString::from(value.encode_to_vec())),
        }
    }

    /// Decode the body as `T`. The caller is expected to have checked
    /// [`ExtensionObject::object_id`] first.
    pub fn decode_inner<T>(&self, decoding_options: &DecodingOptions) -> EncodingResult<T>
    where
        T: BinaryDecodable,
    {
        match &self.body {
            ExtensionObjectBody::ByteString(bytes) if !bytes.is_null() => {
                let mut stream = Cursor::new(bytes.as_ref());
                T::decode(&mut stream, decoding_options)
            }
            _ => Err(Error::decoding("Extension object has no body to decode")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExtensionObject, ExtensionObjectBody};
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use crate::{ByteString, NodeId};
    use std::io::Cursor;

    #[test]
    fn null_round_trip() {
        let obj = ExtensionObject::null();
        let bytes = obj.encode_to_vec();
        assert_eq!(bytes, vec![0x00, 0x00, 0x00]);
        let decoded =
            ExtensionObject::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, obj);
    }

    #[test]
    fn body_round_trip() {
        let obj = ExtensionObject {
            node_id: NodeId::new(0, 321u32),
            body: ExtensionObjectBody::ByteString(ByteString::from(vec![1u8, 2, 3])),
        };
        let bytes = obj.encode_to_vec();
        assert_eq!(bytes.len(), obj.byte_len());
        let decoded =
            ExtensionObject::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, obj);
    }
}
