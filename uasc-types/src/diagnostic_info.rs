//! The OPC UA `DiagnosticInfo`: vendor specific diagnostics for an operation
//! or service. A mask byte enumerates which optional fields follow.

use std::io::{Read, Write};

use bitflags::bitflags;

use crate::{
    encoding::{
        read_i32, read_u8, write_i32, write_u8, BinaryDecodable, BinaryEncodable, DecodingOptions,
        EncodingResult,
    },
    status_code::StatusCode,
    string::UAString,
};

bitflags! {
    /// The request diagnostic bits defined for the request header.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct DiagnosticBits: u32 {
        /// ServiceLevel / SymbolicId
        const SERVICE_LEVEL_SYMBOLIC_ID = 0x0000_0001;
        /// ServiceLevel / LocalizedText
        const SERVICE_LEVEL_LOCALIZED_TEXT = 0x0000_0002;
        /// ServiceLevel / AdditionalInfo
        const SERVICE_LEVEL_ADDITIONAL_INFO = 0x0000_0004;
        /// ServiceLevel / Inner StatusCode
        const SERVICE_LEVEL_LOCALIZED_INNER_STATUS_CODE = 0x0000_0008;
        /// ServiceLevel / Inner Diagnostics
        const SERVICE_LEVEL_LOCALIZED_INNER_DIAGNOSTICS = 0x0000_0010;
        /// OperationLevel / SymbolicId
        const OPERATIONAL_LEVEL_SYMBOLIC_ID = 0x0000_0020;
        /// OperationLevel / LocalizedText
        const OPERATIONAL_LEVEL_LOCALIZED_TEXT = 0x0000_0040;
        /// OperationLevel / AdditionalInfo
        const OPERATIONAL_LEVEL_ADDITIONAL_INFO = 0x0000_0080;
        /// OperationLevel / Inner StatusCode
        const OPERATIONAL_LEVEL_INNER_STATUS_CODE = 0x0000_0100;
        /// OperationLevel / Inner Diagnostics
        const OPERATIONAL_LEVEL_INNER_DIAGNOSTICS = 0x0000_0200;
    }
}

mod mask {
    pub const HAS_SYMBOLIC_ID: u8 = 0x01;
    pub const HAS_NAMESPACE: u8 = 0x02;
    pub const HAS_LOCALIZED_TEXT: u8 = 0x04;
    pub const HAS_LOCALE: u8 = 0x08;
    pub const HAS_ADDITIONAL_INFO: u8 = 0x10;
    pub const HAS_INNER_STATUS_CODE: u8 = 0x20;
    pub const HAS_INNER_DIAGNOSTIC_INFO: u8 = 0x40;
}

/// Vendor-specific diagnostic information. Every field is optional; the wire
/// encoding starts with a bitmask byte enumerating which follow.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct DiagnosticInfo {
    /// Index into the string table of a symbolic name for the error.
    pub symbolic_id: Option<i32>,
    /// Index into the string table of the namespace the symbolic id belongs to.
    pub namespace_uri: Option<i32>,
    /// Index into the string table of the locale of the localized text.
    pub locale: Option<i32>,
    /// Index into the string table of a human readable error description.
    pub localized_text: Option<i32>,
    /// Vendor specific detail, e.g. a memory image.
    pub additional_info: Option<UAString>,
    /// Status code of the inner operation that failed.
    pub inner_status_code: Option<StatusCode>,
    /// Nested diagnostics of the inner operation.
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl BinaryEncodable for DiagnosticInfo {
    fn byte_len(&self) -> usize {
        let mut size = 1;
        if self.symbolic_id.is_some() {
            size += 4;
        }
        if self.namespace_uri.is_some() {
            size += 4;
        }
        if self.locale.is_some() {
            size += 4;
        }
        if self.localized_text.is_some() {
            size += 4;
        }
        if let Some(ref info) = self.additional_info {
            size += info.byte_len();
        }
        if self.inner_status_code.is_some() {
            size += 4;
        }
        if let Some(ref inner) = self.inner_diagnostic_info {
            size += inner.byte_len();
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u8(stream, self.encoding_mask())?;
        if let Some(symbolic_id) = self.symbolic_id {
            write_i32(stream, symbolic_id)?;
        }
        if let Some(namespace_uri) = self.namespace_uri {
            write_i32(stream, namespace_uri)?;
        }
        if let Some(locale) = self.locale {
            write_i32(stream, locale)?;
        }
        if let Some(localized_text) = self.localized_text {
            write_i32(stream, localized_text)?;
        }
        if let Some(ref additional_info) = self.additional_info {
            additional_info.encode(stream)?;
        }
        if let Some(inner_status_code) = self.inner_status_code {
            inner_status_code.encode(stream)?;
        }
        if let Some(ref inner_diagnostic_info) = self.inner_diagnostic_info {
            inner_diagnostic_info.encode(stream)?;
        }
        Ok(())
    }
}

impl BinaryDecodable for DiagnosticInfo {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        // Inner diagnostics nest, so the decode is depth-guarded
        let _depth_lock = decoding_options.depth_lock()?;

        let encoding_mask = read_u8(stream)?;
        let mut diagnostic_info = DiagnosticInfo::default();
        if encoding_mask & mask::HAS_SYMBOLIC_ID != 0 {
            diagnostic_info.symbolic_id = Some(read_i32(stream)?);
        }
        if encoding_mask & mask::HAS_NAMESPACE != 0 {
            diagnostic_info.namespace_uri = Some(read_i32(stream)?);
        }
        if encoding_mask & mask::HAS_LOCALE != 0 {
            diagnostic_info.locale = Some(read_i32(stream)?);
        }
        if encoding_mask & mask::HAS_LOCALIZED_TEXT != 0 {
            diagnostic_info.localized_text = Some(read_i32(stream)?);
        }
        if encoding_mask & mask::HAS_ADDITIONAL_INFO != 0 {
            diagnostic_info.additional_info = Some(UAString::decode(stream, decoding_options)?);
        }
        if encoding_mask & mask::HAS_INNER_STATUS_CODE != 0 {
            diagnostic_info.inner_status_code =
                Some(StatusCode::decode(stream, decoding_options)?);
        }
        if encoding_mask & mask::HAS_INNER_DIAGNOSTIC_INFO != 0 {
            diagnostic_info.inner_diagnostic_info =
                Some(Box::new(DiagnosticInfo::decode(stream, decoding_options)?));
        }
        Ok(diagnostic_info)
    }
}

impl DiagnosticInfo {
    /// The null diagnostic info: an encoding mask of zero and nothing else.
    pub fn null() -> DiagnosticInfo {
        DiagnosticInfo::default()
    }

    /// The encoding mask describing which optional fields are present.
    pub fn encoding_mask(&self) -> u8 {
        let mut encoding_mask = 0;
        if self.symbolic_id.is_some() {
            encoding_mask |= mask::HAS_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            encoding_mask |= mask::HAS_NAMESPACE;
        }
        if self.locale.is_some() {
            encoding_mask |= mask::HAS_LOCALE;
        }
        if self.localized_text.is_some() {
            encoding_mask |= mask::HAS_LOCALIZED_TEXT;
        }
        if self.additional_info.is_some() {
            encoding_mask |= mask::HAS_ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            encoding_mask |= mask::HAS_INNER_STATUS_CODE;
        }
        if self.inner_diagnostic_info.is_some() {
            encoding_mask |= mask::HAS_INNER_DIAGNOSTIC_INFO;
        }
        encoding_mask
    }
}

#[cfg(test)]
mod tests {
    use super::DiagnosticInfo;
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use crate::{StatusCode, UAString};
    use std::io::Cursor;

    #[test]
    fn null_is_single_byte() {
        assert_eq!(DiagnosticInfo::null().encode_to_vec(), vec![0]);
    }

    #[test]
    fn round_trip_with_inner() {
        let info = DiagnosticInfo {
            symbolic_id: Some(3),
            localized_text: Some(4),
            additional_info: Some(UAString::from("details")),
            inner_status_code: Some(StatusCode::BadNodeIdUnknown),
            inner_diagnostic_info: Some(Box::new(DiagnosticInfo {
                symbolic_id: Some(9),
                ..Default::default()
            })),
            ..Default::default()
        };
        let bytes = info.encode_to_vec();
        assert_eq!(bytes.len(), info.byte_len());
        let decoded =
            DiagnosticInfo::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn nesting_bounded_by_depth_gauge() {
        let mut info = DiagnosticInfo::null();
        for _ in 0..64 {
            info = DiagnosticInfo {
                inner_diagnostic_info: Some(Box::new(info)),
                ..Default::default()
            };
        }
        let bytes = info.encode_to_vec();
        assert!(
            DiagnosticInfo::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).is_err()
        );
    }
}
