//! The OPC UA `String` type, named `UAString` so it does not collide with the
//! Rust `String`.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::encoding::{
    process_decode_io_result, process_encode_io_result, read_i32, write_i32, BinaryDecodable,
    BinaryEncodable, DecodingOptions, EncodingResult, Error,
};

/// A string contains UTF-8 encoded characters or a null value. A null value
/// is distinct from an empty string so internally the code maintains that
/// distinction by holding the value as an `Option<String>`.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default)]
pub struct UAString {
    value: Option<String>,
}

impl fmt::Display for UAString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref value) = self.value {
            write!(f, "{}", value)
        } else {
            write!(f, "[null]")
        }
    }
}

impl BinaryEncodable for UAString {
    fn byte_len(&self) -> usize {
        // Length prefix plus the actual string length in bytes for a non-null string.
        4 + match &self.value {
            Some(s) => s.len(),
            None => 0,
        }
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        // Strings are encoded as UTF8 chars preceded by an Int32 length. A -1
        // indicates a null string
        match &self.value {
            Some(s) => {
                write_i32(stream, s.len() as i32)?;
                process_encode_io_result(stream.write_all(s.as_bytes()))
            }
            None => write_i32(stream, -1),
        }
    }
}

impl BinaryDecodable for UAString {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let len = read_i32(stream)?;
        if len == -1 {
            Ok(UAString::null())
        } else if len < -1 {
            Err(Error::decoding(format!(
                "String buf length is a negative number {}",
                len
            )))
        } else if len as usize > decoding_options.max_string_length {
            Err(Error::decoding(format!(
                "String buf length {} exceeds decoding limit {}",
                len, decoding_options.max_string_length
            )))
        } else {
            let mut buf = vec![0u8; len as usize];
            process_decode_io_result(stream.read_exact(&mut buf))?;
            let value = String::from_utf8(buf).map_err(|err| {
                Error::decoding(format!("Decoded string was not valid UTF-8 - {}", err))
            })?;
            Ok(UAString::from(value))
        }
    }
}

impl From<UAString> for String {
    fn from(value: UAString) -> Self {
        value.as_ref().to_string()
    }
}

impl AsRef<str> for UAString {
    fn as_ref(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

impl<'a> From<&'a str> for UAString {
    fn from(value: &'a str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<&String> for UAString {
    fn from(value: &String) -> Self {
        UAString {
            value: Some(value.clone()),
        }
    }
}

impl From<String> for UAString {
    fn from(value: String) -> Self {
        UAString { value: Some(value) }
    }
}

impl From<Option<String>> for UAString {
    fn from(value: Option<String>) -> Self {
        UAString { value }
    }
}

impl PartialEq<str> for UAString {
    fn eq(&self, other: &str) -> bool {
        match self.value {
            None => false,
            Some(ref v) => v.eq(other),
        }
    }
}

impl UAString {
    /// Get the inner raw value.
    pub fn value(&self) -> &Option<String> {
        &self.value
    }

    /// Set the inner value.
    pub fn set_value(&mut self, value: Option<String>) {
        self.value = value;
    }

    /// Returns true if the string is null or empty, false otherwise.
    pub fn is_empty(&self) -> bool {
        self.value.as_ref().is_none_or(|v| v.is_empty())
    }

    /// Returns the length of the string in bytes or -1 for null.
    pub fn len(&self) -> isize {
        match &self.value {
            None => -1,
            Some(v) => v.len() as isize,
        }
    }

    /// Create a null string (not the same as an empty string).
    pub fn null() -> UAString {
        UAString { value: None }
    }

    /// Test if the string is null.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::UAString;
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use std::io::Cursor;

    #[test]
    fn string_null_vs_empty() {
        let null = UAString::null();
        assert!(null.is_null());
        assert!(null.is_empty());
        assert_eq!(null.len(), -1);
        assert_eq!(null.encode_to_vec(), vec![0xff, 0xff, 0xff, 0xff]);

        let empty = UAString::from("");
        assert!(!empty.is_null());
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
        assert_eq!(empty.encode_to_vec(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn string_round_trip() {
        let s = UAString::from("opc.tcp://localhost:4841");
        let bytes = s.encode_to_vec();
        let decoded =
            UAString::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(s, decoded);
    }

    #[test]
    fn string_too_long_rejected() {
        let options = DecodingOptions {
            max_string_length: 4,
            ..DecodingOptions::test()
        };
        let bytes = UAString::from("12345").encode_to_vec();
        assert!(UAString::decode(&mut Cursor::new(bytes), &options).is_err());
    }
}
