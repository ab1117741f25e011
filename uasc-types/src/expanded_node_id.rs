//! The OPC UA `ExpandedNodeId`: a [`NodeId`] extended with an optional
//! namespace URI and server index.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::{
    encoding::{
        read_u32, write_u32, BinaryDecodable, BinaryEncodable, DecodingOptions, EncodingResult,
    },
    node_id::{Identifier, NodeId},
    string::UAString,
};

/// A node id that may refer to a node on another server, either through a
/// namespace URI instead of an index, or through a non-zero server index.
#[derive(Eq, PartialEq, Clone, Debug, Hash, Default)]
pub struct ExpandedNodeId {
    /// The inner node id.
    pub node_id: NodeId,
    /// Namespace URI. When set it takes precedence over the node id's
    /// namespace index, which is then encoded as 0.
    pub namespace_uri: UAString,
    /// Index into the recipient's server table, 0 for the local server.
    pub server_index: u32,
}

impl fmt::Display for ExpandedNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.server_index != 0 {
            write!(f, "svr={};", self.server_index)?;
        }
        if !self.namespace_uri.is_null() {
            write!(f, "nsu={};{}", self.namespace_uri, self.node_id.identifier)
        } else {
            write!(f, "{}", self.node_id)
        }
    }
}

impl BinaryEncodable for ExpandedNodeId {
    fn byte_len(&self) -> usize {
        let mut size = self.node_id.byte_len();
        if !self.namespace_uri.is_null() {
            size += self.namespace_uri.byte_len();
        }
        if self.server_index != 0 {
            size += 4;
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        // The expanded flags ride in the high bits of the node id encoding
        // byte, so the node id encode is reproduced here with the flags
        // applied
        let mut flags = 0u8;
        if !self.namespace_uri.is_null() {
            flags |= 0x80;
        }
        if self.server_index != 0 {
            flags |= 0x40;
        }

        let namespace = if !self.namespace_uri.is_null() {
            0
        } else {
            self.node_id.namespace
        };

        match &self.node_id.identifier {
            Identifier::Numeric(value) => {
                if namespace == 0 && *value <= 255 {
                    crate::write_u8(stream, flags)?;
                    crate::write_u8(stream, *value as u8)?;
                } else if namespace <= 255 && *value <= 65535 {
                    crate::write_u8(stream, 0x1 | flags)?;
                    crate::write_u8(stream, namespace as u8)?;
                    crate::write_u16(stream, *value as u16)?;
                } else {
                    crate::write_u8(stream, 0x2 | flags)?;
                    crate::write_u16(stream, namespace)?;
                    write_u32(stream, *value)?;
                }
            }
            Identifier::String(value) => {
                crate::write_u8(stream, 0x3 | flags)?;
                crate::write_u16(stream, namespace)?;
                value.encode(stream)?;
            }
            Identifier::Guid(value) => {
                crate::write_u8(stream, 0x4 | flags)?;
                crate::write_u16(stream, namespace)?;
                value.encode(stream)?;
            }
            Identifier::ByteString(value) => {
                crate::write_u8(stream, 0x5 | flags)?;
                crate::write_u16(stream, namespace)?;
                value.encode(stream)?;
            }
        }

        if !self.namespace_uri.is_null() {
            self.namespace_uri.encode(stream)?;
        }
        if self.server_index != 0 {
            write_u32(stream, self.server_index)?;
        }
        Ok(())
    }
}

impl BinaryDecodable for ExpandedNodeId {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let encoding_byte = crate::read_u8(stream)?;
        let has_uri = encoding_byte & 0x80 != 0;
        let has_server_index = encoding_byte & 0x40 != 0;

        let node_id = match encoding_byte & 0x0f {
            0x0 => NodeId::new(0, u32::from(crate::read_u8(stream)?)),
            0x1 => {
                let namespace = crate::read_u8(stream)?;
                let value = crate::read_u16(stream)?;
                NodeId::new(u16::from(namespace), u32::from(value))
            }
            0x2 => {
                let namespace = crate::read_u16(stream)?;
                let value = read_u32(stream)?;
                NodeId::new(namespace, value)
            }
            0x3 => {
                let namespace = crate::read_u16(stream)?;
                let value = UAString::decode(stream, decoding_options)?;
                NodeId::new(namespace, value)
            }
            0x4 => {
                let namespace = crate::read_u16(stream)?;
                let value = crate::Guid::decode(stream, decoding_options)?;
                NodeId::new(namespace, value)
            }
            0x5 => {
                let namespace = crate::read_u16(stream)?;
                let value = crate::ByteString::decode(stream, decoding_options)?;
                NodeId::new(namespace, value)
            }
            r => {
                return Err(crate::Error::decoding(format!(
                    "Unrecognized expanded node id type {}",
                    r
                )));
            }
        };

        let namespace_uri = if has_uri {
            UAString::decode(stream, decoding_options)?
        } else {
            UAString::null()
        };
        let server_index = if has_server_index {
            read_u32(stream)?
        } else {
            0
        };

        Ok(ExpandedNodeId {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        ExpandedNodeId {
            node_id,
            namespace_uri: UAString::null(),
            server_index: 0,
        }
    }
}

impl From<&NodeId> for ExpandedNodeId {
    fn from(node_id: &NodeId) -> Self {
        node_id.clone().into()
    }
}

impl ExpandedNodeId {
    /// The null expanded node id.
    pub fn null() -> ExpandedNodeId {
        NodeId::null().into()
    }

    /// Test if the expanded node id is null.
    pub fn is_null(&self) -> bool {
        self.node_id.is_null() && self.namespace_uri.is_null() && self.server_index == 0
    }
}

#[cfg(test)]
mod tests {
    use super::ExpandedNodeId;
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use crate::{NodeId, UAString};
    use std::io::Cursor;

    fn round_trip(id: &ExpandedNodeId) {
        let bytes = id.encode_to_vec();
        assert_eq!(bytes.len(), id.byte_len());
        let decoded =
            ExpandedNodeId::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(&decoded, id);
    }

    #[test]
    fn plain_id_has_no_flags() {
        let id: ExpandedNodeId = NodeId::new(0, 84u32).into();
        assert_eq!(id.encode_to_vec(), vec![0x00, 84]);
        round_trip(&id);
    }

    #[test]
    fn with_uri_and_server_index() {
        let id = ExpandedNodeId {
            node_id: NodeId::new(3, 1012u32),
            namespace_uri: UAString::from("urn:some:namespace"),
            server_index: 7,
        };
        let bytes = id.encode_to_vec();
        assert_eq!(bytes[0] & 0xc0, 0xc0);
        // Namespace index is suppressed in favor of the URI
        let decoded =
            ExpandedNodeId::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded.node_id.namespace, 0);
        assert_eq!(decoded.namespace_uri, id.namespace_uri);
        assert_eq!(decoded.server_index, 7);
    }
}
