//! Message header for requests.

use std::io::{Read, Write};

use crate::{
    data_types::{IntegerId, UtcTime},
    date_time::DateTime,
    diagnostic_info::DiagnosticBits,
    encoding::{
        BinaryDecodable, BinaryEncodable, DecodingOptions, EncodingResult, Error,
    },
    extension_object::ExtensionObject,
    node_id::NodeId,
    string::UAString,
};

/// The `RequestHeader` contains information common to every request from a
/// client to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHeader {
    /// The secret session identifier used to verify that the request is
    /// associated with the session. Treated as an opaque credential and never
    /// logged.
    pub authentication_token: NodeId,
    /// The time the client sent the request, for diagnostics only.
    pub timestamp: UtcTime,
    /// A handle associated with the request, chosen by the client and echoed
    /// in the response.
    pub request_handle: IntegerId,
    /// A bit mask selecting the vendor-specific diagnostics to return.
    pub return_diagnostics: DiagnosticBits,
    /// Identifier of the client's audit log entry for this request.
    pub audit_entry_id: UAString,
    /// Timeout in milliseconds the client stack applies to this call. For the
    /// server it is a hint; 0 indicates no timeout.
    pub timeout_hint: u32,
    /// Reserved for future use.
    pub additional_header: ExtensionObject,
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self {
            authentication_token: NodeId::default(),
            timestamp: DateTime::default(),
            request_handle: 0,
            return_diagnostics: DiagnosticBits::empty(),
            audit_entry_id: Default::default(),
            timeout_hint: 0,
            additional_header: Default::default(),
        }
    }
}

impl BinaryEncodable for RequestHeader {
    fn byte_len(&self) -> usize {
        let mut size: usize = 0;
        size += self.authentication_token.byte_len();
        size += self.timestamp.byte_len();
        size += self.request_handle.byte_len();
        size += self.return_diagnostics.bits().byte_len();
        size += self.audit_entry_id.byte_len();
        size += self.timeout_hint.byte_len();
        size += self.additional_header.byte_len();
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        self.authentication_token.encode(stream)?;
        self.timestamp.encode(stream)?;
        self.request_handle.encode(stream)?;
        self.return_diagnostics.bits().encode(stream)?;
        self.audit_entry_id.encode(stream)?;
        self.timeout_hint.encode(stream)?;
        self.additional_header.encode(stream)
    }
}

impl BinaryDecodable for RequestHeader {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let authentication_token = NodeId::decode(stream, decoding_options)?;
        let timestamp = UtcTime::decode(stream, decoding_options)?;
        let request_handle = IntegerId::decode(stream, decoding_options)?;
        // From here on errors can carry the request handle as context
        let (return_diagnostics, audit_entry_id, timeout_hint, additional_header) = (|| {
            let return_diagnostics =
                DiagnosticBits::from_bits_truncate(u32::decode(stream, decoding_options)?);
            let audit_entry_id = UAString::decode(stream, decoding_options)?;
            let timeout_hint = u32::decode(stream, decoding_options)?;
            let additional_header = ExtensionObject::decode(stream, decoding_options)?;
            Ok((
                return_diagnostics,
                audit_entry_id,
                timeout_hint,
                additional_header,
            ))
        })()
        .map_err(|e: Error| e.with_request_handle(request_handle))?;

        Ok(RequestHeader {
            authentication_token,
            timestamp,
            request_handle,
            return_diagnostics,
            audit_entry_id,
            timeout_hint,
            additional_header,
        })
    }
}

impl RequestHeader {
    /// Create a new request header.
    pub fn new(
        authentication_token: &NodeId,
        timestamp: &DateTime,
        request_handle: IntegerId,
    ) -> RequestHeader {
        RequestHeader {
            authentication_token: authentication_token.clone(),
            timestamp: *timestamp,
            request_handle,
            return_diagnostics: DiagnosticBits::empty(),
            audit_entry_id: UAString::null(),
            timeout_hint: 0,
            additional_header: ExtensionObject::null(),
        }
    }

    /// Create a new dummy request header for tests.
    pub fn dummy() -> RequestHeader {
        RequestHeader::new(&NodeId::null(), &DateTime::now(), 1)
    }
}
