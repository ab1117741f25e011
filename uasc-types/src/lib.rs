#![warn(missing_docs)]

//! Data types and the OPC UA Binary codec used by every layer of the UASC
//! stack. This crate knows nothing about sockets or channels, it only deals
//! with bytes and the types that travel in them.

pub mod buffer;
pub mod byte_string;
pub mod data_types;
pub mod data_value;
pub mod date_time;
pub mod diagnostic_info;
pub mod encoding;
pub mod expanded_node_id;
pub mod extension_object;
pub mod guid;
pub mod localized_text;
pub mod node_id;
pub mod object_id;
pub mod qualified_name;
pub mod request_header;
pub mod response_header;
pub mod service;
pub mod status_code;
pub mod string;
pub mod variant;

/// Limits placed on decoded data when nothing else is negotiated.
pub mod constants {
    /// Maximum size of a message in bytes.
    pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;
    /// Maximum number of chunks in a message.
    pub const MAX_CHUNK_COUNT: usize = 64;
    /// Maximum length in bytes of a decoded string.
    pub const MAX_STRING_LENGTH: usize = 65536;
    /// Maximum length in bytes of a decoded byte string.
    pub const MAX_BYTE_STRING_LENGTH: usize = 65536;
    /// Maximum number of elements in a decoded array.
    pub const MAX_ARRAY_LENGTH: usize = 65536;
    /// Maximum length of an encoded certificate.
    pub const MAX_CERTIFICATE_LENGTH: usize = 32768;
    /// Maximum recursion depth when decoding nested values.
    pub const MAX_DECODING_DEPTH: u64 = 10;
}

pub use buffer::Buffer;
pub use byte_string::ByteString;
pub use data_types::*;
pub use data_value::DataValue;
pub use date_time::DateTime;
pub use diagnostic_info::{DiagnosticBits, DiagnosticInfo};
pub use encoding::{
    process_decode_io_result, process_encode_io_result, read_bytes, read_f32, read_f64, read_i16,
    read_i32, read_i64, read_u16, read_u32, read_u64, read_u8, write_bytes, write_f32, write_f64,
    write_i16, write_i32, write_i64, write_u16, write_u32, write_u64, write_u8, BinaryDecodable,
    BinaryEncodable, DecodingOptions, DepthGauge, DepthLock, EncodingResult, Error,
};
pub use expanded_node_id::ExpandedNodeId;
pub use extension_object::ExtensionObject;
pub use guid::Guid;
pub use localized_text::LocalizedText;
pub use node_id::{Identifier, NodeId};
pub use object_id::ObjectId;
pub use qualified_name::QualifiedName;
pub use request_header::RequestHeader;
pub use response_header::ResponseHeader;
pub use service::*;
pub use status_code::StatusCode;
pub use string::UAString;
pub use variant::{Variant, VariantScalarTypeId};
