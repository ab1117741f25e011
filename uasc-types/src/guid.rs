//! The OPC UA `Guid`, a 16 byte globally unique identifier with the mixed
//! endian wire layout of part 6.

use std::{
    fmt,
    io::{Read, Write},
    str::FromStr,
};

use uuid::Uuid;

use crate::encoding::{
    process_decode_io_result, read_u16, read_u32, write_u16, write_u32, BinaryDecodable,
    BinaryEncodable, DecodingOptions, EncodingResult, Error,
};

/// A 128-bit globally unique identifier.
#[derive(Eq, PartialEq, Clone, Hash, Default)]
pub struct Guid {
    uuid: Uuid,
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl FromStr for Guid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(|uuid| Guid { uuid })
            .map_err(|e| Error::decoding(format!("Cannot parse GUID {s}: {e}")))
    }
}

impl BinaryEncodable for Guid {
    fn byte_len(&self) -> usize {
        16
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        // Data1-3 are little endian, data4 is a plain byte sequence
        let (data1, data2, data3, data4) = self.uuid.as_fields();
        write_u32(stream, data1)?;
        write_u16(stream, data2)?;
        write_u16(stream, data3)?;
        crate::encoding::process_encode_io_result(stream.write_all(data4))
    }
}

impl BinaryDecodable for Guid {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let data1 = read_u32(stream)?;
        let data2 = read_u16(stream)?;
        let data3 = read_u16(stream)?;
        let mut data4 = [0u8; 8];
        process_decode_io_result(stream.read_exact(&mut data4))?;
        Ok(Guid {
            uuid: Uuid::from_fields(data1, data2, data3, &data4),
        })
    }
}

impl From<Uuid> for Guid {
    fn from(uuid: Uuid) -> Self {
        Guid { uuid }
    }
}

impl Guid {
    /// The all-zero GUID.
    pub fn null() -> Guid {
        Guid { uuid: Uuid::nil() }
    }

    /// Create a new random GUID.
    pub fn new() -> Guid {
        Guid {
            uuid: Uuid::new_v4(),
        }
    }

    /// `true` when this is the all-zero GUID.
    pub fn is_null(&self) -> bool {
        self.uuid.is_nil()
    }

    /// The raw bytes of the GUID.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.uuid.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::Guid;
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use std::{io::Cursor, str::FromStr};

    #[test]
    fn wire_layout() {
        // Example from part 6: 72962B91-FA75-4AE6-8D28-B404DC7DAF63
        let guid = Guid::from_str("72962B91-FA75-4AE6-8D28-B404DC7DAF63").unwrap();
        let bytes = guid.encode_to_vec();
        assert_eq!(
            bytes,
            vec![
                0x91, 0x2B, 0x96, 0x72, 0x75, 0xFA, 0xE6, 0x4A, 0x8D, 0x28, 0xB4, 0x04, 0xDC,
                0x7D, 0xAF, 0x63
            ]
        );
        let decoded = Guid::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, guid);
    }

    #[test]
    fn random_guids_differ() {
        assert_ne!(Guid::new(), Guid::new());
        assert!(Guid::null().is_null());
    }
}
