//! The OPC UA `NodeId`, the identifier of a node in a server address space.

use std::{
    fmt,
    io::{Read, Write},
    str::FromStr,
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    byte_string::ByteString,
    encoding::{
        read_u16, read_u32, read_u8, write_u16, write_u32, write_u8, BinaryDecodable,
        BinaryEncodable, DecodingOptions, EncodingResult, Error,
    },
    guid::Guid,
    status_code::StatusCode,
    string::UAString,
};

/// The kinds of identifier a node id can hold.
#[derive(Eq, PartialEq, Clone, Debug, Hash)]
pub enum Identifier {
    /// An unsigned numeric identifier.
    Numeric(u32),
    /// A string identifier.
    String(UAString),
    /// A GUID identifier.
    Guid(Guid),
    /// An opaque (byte string) identifier.
    ByteString(ByteString),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(v) => write!(f, "i={}", v),
            Identifier::String(v) => write!(f, "s={}", v),
            Identifier::Guid(v) => write!(f, "g={}", v),
            Identifier::ByteString(v) => write!(f, "b={}", v.as_base64()),
        }
    }
}

impl FromStr for Identifier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < 2 || !s.is_char_boundary(2) {
            return Err(());
        }
        let (kind, value) = s.split_at(2);
        match kind {
            "i=" => value.parse::<u32>().map(Identifier::Numeric).map_err(|_| ()),
            "s=" => Ok(Identifier::String(UAString::from(value))),
            "g=" => Guid::from_str(value).map(Identifier::Guid).map_err(|_| ()),
            "b=" => ByteString::from_base64(value)
                .map(Identifier::ByteString)
                .ok_or(()),
            _ => Err(()),
        }
    }
}

impl From<u32> for Identifier {
    fn from(value: u32) -> Self {
        Identifier::Numeric(value)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::String(value.into())
    }
}

impl From<UAString> for Identifier {
    fn from(value: UAString) -> Self {
        Identifier::String(value)
    }
}

impl From<Guid> for Identifier {
    fn from(value: Guid) -> Self {
        Identifier::Guid(value)
    }
}

impl From<ByteString> for Identifier {
    fn from(value: ByteString) -> Self {
        Identifier::ByteString(value)
    }
}

/// An identifier for a node in the address space of an OPC UA server.
#[derive(Eq, PartialEq, Clone, Debug, Hash)]
pub struct NodeId {
    /// The index for a namespace.
    pub namespace: u16,
    /// The identifier for a node in the address space of an OPC UA server.
    pub identifier: Identifier,
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::null()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};{}", self.namespace, self.identifier)
        } else {
            write!(f, "{}", self.identifier)
        }
    }
}

impl BinaryEncodable for NodeId {
    fn byte_len(&self) -> usize {
        match &self.identifier {
            Identifier::Numeric(value) => {
                if self.namespace == 0 && *value <= 255 {
                    2
                } else if self.namespace <= 255 && *value <= 65535 {
                    4
                } else {
                    7
                }
            }
            Identifier::String(value) => 3 + value.byte_len(),
            Identifier::Guid(value) => 3 + value.byte_len(),
            Identifier::ByteString(value) => 3 + value.byte_len(),
        }
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        // The encoder always picks the smallest representation that can hold
        // the value
        match &self.identifier {
            Identifier::Numeric(value) => {
                if self.namespace == 0 && *value <= 255 {
                    // Two byte form
                    write_u8(stream, 0x0u8)?;
                    write_u8(stream, *value as u8)
                } else if self.namespace <= 255 && *value <= 65535 {
                    // Four byte form
                    write_u8(stream, 0x1u8)?;
                    write_u8(stream, self.namespace as u8)?;
                    write_u16(stream, *value as u16)
                } else {
                    // Full numeric form
                    write_u8(stream, 0x2u8)?;
                    write_u16(stream, self.namespace)?;
                    write_u32(stream, *value)
                }
            }
            Identifier::String(value) => {
                write_u8(stream, 0x3u8)?;
                write_u16(stream, self.namespace)?;
                value.encode(stream)
            }
            Identifier::Guid(value) => {
                write_u8(stream, 0x4u8)?;
                write_u16(stream, self.namespace)?;
                value.encode(stream)
            }
            Identifier::ByteString(value) => {
                write_u8(stream, 0x5u8)?;
                write_u16(stream, self.namespace)?;
                value.encode(stream)
            }
        }
    }
}

impl BinaryDecodable for NodeId {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let encoding_byte = read_u8(stream)?;
        let node_id = match encoding_byte & 0x0f {
            0x0 => {
                let value = read_u8(stream)?;
                NodeId::new(0, u32::from(value))
            }
            0x1 => {
                let namespace = read_u8(stream)?;
                let value = read_u16(stream)?;
                NodeId::new(u16::from(namespace), u32::from(value))
            }
            0x2 => {
                let namespace = read_u16(stream)?;
                let value = read_u32(stream)?;
                NodeId::new(namespace, value)
            }
            0x3 => {
                let namespace = read_u16(stream)?;
                let value = UAString::decode(stream, decoding_options)?;
                NodeId::new(namespace, value)
            }
            0x4 => {
                let namespace = read_u16(stream)?;
                let value = Guid::decode(stream, decoding_options)?;
                NodeId::new(namespace, value)
            }
            0x5 => {
                let namespace = read_u16(stream)?;
                let value = ByteString::decode(stream, decoding_options)?;
                NodeId::new(namespace, value)
            }
            _ => {
                return Err(Error::decoding(format!(
                    "Unrecognized node id type {}",
                    encoding_byte
                )));
            }
        };
        Ok(node_id)
    }
}

static NODE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(ns=(?P<ns>[0-9]+);)?(?P<t>[isgb]=.+)$").unwrap());

impl FromStr for NodeId {
    type Err = StatusCode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Format specified in part 6, 5.3.1.10:
        //
        // ns=<namespaceindex>;<type>=<value>
        //
        // If namespace == 0, the ns=0; is omitted
        let captures = NODE_ID_RE.captures(s).ok_or(StatusCode::BadNodeIdInvalid)?;

        let namespace = if let Some(ns) = captures.name("ns") {
            ns.as_str()
                .parse::<u16>()
                .map_err(|_| StatusCode::BadNodeIdInvalid)?
        } else {
            0
        };

        let t = captures.name("t").unwrap();
        Identifier::from_str(t.as_str())
            .map(|t| NodeId::new(namespace, t))
            .map_err(|_| StatusCode::BadNodeIdInvalid)
    }
}

impl From<(u16, u32)> for NodeId {
    fn from(v: (u16, u32)) -> Self {
        Self::new(v.0, v.1)
    }
}

impl<'a> From<(u16, &'a str)> for NodeId {
    fn from(v: (u16, &'a str)) -> Self {
        Self::new(v.0, UAString::from(v.1))
    }
}

impl NodeId {
    /// Construct a new node id from anything that can be made into an
    /// [`Identifier`].
    pub fn new<T>(namespace: u16, value: T) -> NodeId
    where
        T: Into<Identifier>,
    {
        NodeId {
            namespace,
            identifier: value.into(),
        }
    }

    /// The null node id: namespace 0, numeric identifier 0.
    pub fn null() -> NodeId {
        NodeId::new(0, 0u32)
    }

    /// Test if the node id is null.
    pub fn is_null(&self) -> bool {
        self.namespace == 0 && self.identifier == Identifier::Numeric(0)
    }

    /// Get the numeric identifier if this node id holds one.
    pub fn as_u32(&self) -> Option<u32> {
        match self.identifier {
            Identifier::Numeric(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Identifier, NodeId};
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use crate::{ByteString, Guid};
    use std::{io::Cursor, str::FromStr};

    fn round_trip(id: &NodeId) -> NodeId {
        let bytes = id.encode_to_vec();
        assert_eq!(bytes.len(), id.byte_len());
        NodeId::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap()
    }

    #[test]
    fn smallest_form_two_byte() {
        let id = NodeId::new(0, 255u32);
        assert_eq!(id.encode_to_vec(), vec![0x00, 0xff]);
        assert_eq!(round_trip(&id), id);
    }

    #[test]
    fn smallest_form_four_byte() {
        let id = NodeId::new(5, 1025u32);
        assert_eq!(id.encode_to_vec(), vec![0x01, 0x05, 0x01, 0x04]);
        assert_eq!(round_trip(&id), id);
    }

    #[test]
    fn full_numeric_form() {
        let id = NodeId::new(256, 70000u32);
        let bytes = id.encode_to_vec();
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes.len(), 7);
        assert_eq!(round_trip(&id), id);
    }

    #[test]
    fn other_identifier_kinds() {
        for id in [
            NodeId::new(1, "the answer"),
            NodeId::new(2, Guid::new()),
            NodeId::new(3, ByteString::from(vec![1u8, 2, 3])),
        ] {
            assert_eq!(round_trip(&id), id);
        }
    }

    #[test]
    fn from_str() {
        assert_eq!(NodeId::from_str("i=13").unwrap(), NodeId::new(0, 13u32));
        assert_eq!(
            NodeId::from_str("ns=1;i=1012").unwrap(),
            NodeId::new(1, 1012u32)
        );
        assert_eq!(
            NodeId::from_str("ns=2;s=frobnicator").unwrap(),
            NodeId::new(2, "frobnicator")
        );
        assert!(NodeId::from_str("nonsense").is_err());
    }

    #[test]
    fn null() {
        assert!(NodeId::null().is_null());
        assert_eq!(NodeId::null().identifier, Identifier::Numeric(0));
        assert!(!NodeId::new(1, 0u32).is_null());
    }
}
