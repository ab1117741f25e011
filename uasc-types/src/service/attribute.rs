//! Attribute services: Read and Write.

use super::{ua_binary_codec, ua_message_info};
use crate::{
    data_types::TimestampsToReturn,
    data_value::DataValue,
    diagnostic_info::DiagnosticInfo,
    node_id::NodeId,
    qualified_name::QualifiedName,
    request_header::RequestHeader,
    response_header::ResponseHeader,
    status_code::StatusCode,
    string::UAString,
};

/// Identifies an attribute of a node to read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadValueId {
    /// The node to read.
    pub node_id: NodeId,
    /// Numeric id of the attribute, 13 for the value.
    pub attribute_id: u32,
    /// Sub-range of an array value, null for all.
    pub index_range: UAString,
    /// Data encoding for structured values, null for the default.
    pub data_encoding: QualifiedName,
}

ua_binary_codec!(
    ReadValueId,
    node_id,
    attribute_id,
    index_range,
    data_encoding
);

impl ReadValueId {
    /// Read the value attribute of `node_id`.
    pub fn value_of(node_id: NodeId) -> ReadValueId {
        ReadValueId {
            node_id,
            attribute_id: crate::data_types::AttributeId::Value as u32,
            ..Default::default()
        }
    }
}

/// Reads attributes from one or more nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Oldest acceptable cached value age in milliseconds.
    pub max_age: f64,
    /// Which timestamps to return.
    pub timestamps_to_return: TimestampsToReturn,
    /// The attributes to read.
    pub nodes_to_read: Option<Vec<ReadValueId>>,
}

ua_binary_codec!(
    ReadRequest,
    request_header,
    max_age,
    timestamps_to_return,
    nodes_to_read
);
ua_message_info!(ReadRequest, ReadRequest_Encoding_DefaultBinary);

/// Response to a [`ReadRequest`]. Results are in request order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// One value per requested attribute, in request order.
    pub results: Option<Vec<DataValue>>,
    /// Per operation diagnostics when requested.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

ua_binary_codec!(ReadResponse, response_header, results, diagnostic_infos);
ua_message_info!(ReadResponse, ReadResponse_Encoding_DefaultBinary);

/// A value to write to an attribute of a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteValue {
    /// The node to write.
    pub node_id: NodeId,
    /// Numeric id of the attribute.
    pub attribute_id: u32,
    /// Sub-range of an array value, null for all.
    pub index_range: UAString,
    /// The value to write.
    pub value: DataValue,
}

ua_binary_codec!(WriteValue, node_id, attribute_id, index_range, value);

/// Writes values to attributes of one or more nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// The values to write.
    pub nodes_to_write: Option<Vec<WriteValue>>,
}

ua_binary_codec!(WriteRequest, request_header, nodes_to_write);
ua_message_info!(WriteRequest, WriteRequest_Encoding_DefaultBinary);

/// Response to a [`WriteRequest`]. Results are in request order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// One status per write, in request order.
    pub results: Option<Vec<StatusCode>>,
    /// Per operation diagnostics when requested.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

ua_binary_codec!(WriteResponse, response_header, results, diagnostic_infos);
ua_message_info!(WriteResponse, WriteResponse_Encoding_DefaultBinary);
