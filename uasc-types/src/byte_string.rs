//! The OPC UA `ByteString`: an arbitrary octet string that may also be null.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::encoding::{
    process_decode_io_result, process_encode_io_result, read_i32, write_i32, BinaryDecodable,
    BinaryEncodable, DecodingOptions, EncodingResult, Error,
};

/// A sequence of octets, or null. Like [`crate::UAString`] a null value is
/// distinct from an empty one.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default)]
pub struct ByteString {
    /// The raw octets.
    pub value: Option<Vec<u8>>,
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        self.value.as_deref().unwrap_or(&[])
    }
}

impl BinaryEncodable for ByteString {
    fn byte_len(&self) -> usize {
        4 + match &self.value {
            Some(v) => v.len(),
            None => 0,
        }
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        match &self.value {
            Some(v) => {
                write_i32(stream, v.len() as i32)?;
                process_encode_io_result(stream.write_all(v))
            }
            None => write_i32(stream, -1),
        }
    }
}

impl BinaryDecodable for ByteString {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let len = read_i32(stream)?;
        if len == -1 {
            Ok(ByteString::null())
        } else if len < -1 {
            Err(Error::decoding(format!(
                "ByteString length is a negative number {}",
                len
            )))
        } else if len as usize > decoding_options.max_byte_string_length {
            Err(Error::decoding(format!(
                "ByteString length {} exceeds decoding limit {}",
                len, decoding_options.max_byte_string_length
            )))
        } else {
            let mut value = vec![0u8; len as usize];
            process_decode_io_result(stream.read_exact(&mut value))?;
            Ok(ByteString { value: Some(value) })
        }
    }
}

impl<'a> From<&'a [u8]> for ByteString {
    fn from(value: &'a [u8]) -> Self {
        ByteString {
            value: Some(value.to_vec()),
        }
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        ByteString { value: Some(value) }
    }
}

impl From<&Vec<u8>> for ByteString {
    fn from(value: &Vec<u8>) -> Self {
        ByteString {
            value: Some(value.clone()),
        }
    }
}

impl<const N: usize> From<[u8; N]> for ByteString {
    fn from(value: [u8; N]) -> Self {
        ByteString {
            value: Some(value.to_vec()),
        }
    }
}

impl ByteString {
    /// Create a null byte string (not the same as an empty byte string).
    pub fn null() -> ByteString {
        ByteString { value: None }
    }

    /// Test if the byte string is null.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Test if the byte string is null or empty.
    pub fn is_empty(&self) -> bool {
        self.value.as_ref().is_none_or(|v| v.is_empty())
    }

    /// Length in bytes, 0 for null.
    pub fn len(&self) -> usize {
        self.value.as_ref().map_or(0, |v| v.len())
    }

    /// Copy the content into a plain vector. Null yields an empty vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_ref().to_vec()
    }

    /// Decode a base64 string into a byte string, or `None` if the input is
    /// not valid base64.
    pub fn from_base64(data: &str) -> Option<ByteString> {
        STANDARD.decode(data).map(ByteString::from).ok()
    }

    /// Encode the content as base64. Null encodes as the empty string.
    pub fn as_base64(&self) -> String {
        STANDARD.encode(self.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::ByteString;
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use std::io::Cursor;

    #[test]
    fn null_and_empty_are_distinct() {
        assert_eq!(ByteString::null().encode_to_vec(), vec![0xff, 0xff, 0xff, 0xff]);
        assert_eq!(ByteString::from(vec![]).encode_to_vec(), vec![0, 0, 0, 0]);
        assert!(ByteString::null().is_null());
        assert!(!ByteString::from(vec![]).is_null());
    }

    #[test]
    fn round_trip() {
        let b = ByteString::from(vec![1u8, 2, 3, 4, 5]);
        let decoded = ByteString::decode(
            &mut Cursor::new(b.encode_to_vec()),
            &DecodingOptions::test(),
        )
        .unwrap();
        assert_eq!(b, decoded);
    }

    #[test]
    fn base64_round_trip() {
        let b = ByteString::from(vec![0u8, 255, 16, 32]);
        let encoded = b.as_base64();
        assert_eq!(ByteString::from_base64(&encoded), Some(b));
        assert_eq!(ByteString::from_base64("*not base64*"), None);
    }
}
