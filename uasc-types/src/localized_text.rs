//! The OPC UA `LocalizedText`: human readable text with an optional locale.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::{
    encoding::{
        read_u8, write_u8, BinaryDecodable, BinaryEncodable, DecodingOptions, EncodingResult,
    },
    string::UAString,
};

/// Human readable text with an optional locale identifier. Both fields are
/// optional on the wire, announced by a mask byte.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Default)]
pub struct LocalizedText {
    /// The locale, e.g. "en-US".
    pub locale: UAString,
    /// The text in that locale.
    pub text: UAString,
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl BinaryEncodable for LocalizedText {
    fn byte_len(&self) -> usize {
        let mut size = 1;
        if !self.locale.is_null() {
            size += self.locale.byte_len();
        }
        if !self.text.is_null() {
            size += self.text.byte_len();
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        let mut mask = 0u8;
        if !self.locale.is_null() {
            mask |= 0x1;
        }
        if !self.text.is_null() {
            mask |= 0x2;
        }
        write_u8(stream, mask)?;
        if !self.locale.is_null() {
            self.locale.encode(stream)?;
        }
        if !self.text.is_null() {
            self.text.encode(stream)?;
        }
        Ok(())
    }
}

impl BinaryDecodable for LocalizedText {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let mask = read_u8(stream)?;
        let locale = if mask & 0x1 != 0 {
            UAString::decode(stream, decoding_options)?
        } else {
            UAString::null()
        };
        let text = if mask & 0x2 != 0 {
            UAString::decode(stream, decoding_options)?
        } else {
            UAString::null()
        };
        Ok(LocalizedText { locale, text })
    }
}

impl<'a> From<&'a str> for LocalizedText {
    fn from(value: &'a str) -> Self {
        LocalizedText {
            locale: UAString::null(),
            text: UAString::from(value),
        }
    }
}

impl From<String> for LocalizedText {
    fn from(value: String) -> Self {
        LocalizedText {
            locale: UAString::null(),
            text: UAString::from(value),
        }
    }
}

impl LocalizedText {
    /// Create a localized text from a locale and a text.
    pub fn new(locale: &str, text: &str) -> LocalizedText {
        LocalizedText {
            locale: UAString::from(locale),
            text: UAString::from(text),
        }
    }

    /// The null localized text.
    pub fn null() -> LocalizedText {
        LocalizedText {
            locale: UAString::null(),
            text: UAString::null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LocalizedText;
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use std::io::Cursor;

    #[test]
    fn mask_reflects_missing_fields() {
        let null = LocalizedText::null();
        assert_eq!(null.encode_to_vec(), vec![0]);

        let text_only = LocalizedText::from("hello");
        assert_eq!(text_only.encode_to_vec()[0], 0x2);

        let both = LocalizedText::new("en", "hello");
        let bytes = both.encode_to_vec();
        assert_eq!(bytes[0], 0x3);
        let decoded =
            LocalizedText::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, both);
    }
}
