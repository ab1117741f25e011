//! View services: Browse.

use super::{ua_binary_codec, ua_message_info};
use crate::{
    byte_string::ByteString,
    data_types::{BrowseDirection, NodeClass},
    date_time::DateTime,
    diagnostic_info::DiagnosticInfo,
    expanded_node_id::ExpandedNodeId,
    localized_text::LocalizedText,
    node_id::NodeId,
    qualified_name::QualifiedName,
    request_header::RequestHeader,
    response_header::ResponseHeader,
    status_code::StatusCode,
};

/// The view to browse in, the null view for the whole address space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewDescription {
    /// Node id of the view, null for no view.
    pub view_id: NodeId,
    /// Browse the view as it was at this time, null for now.
    pub timestamp: DateTime,
    /// Browse this version of the view, 0 for the current one.
    pub view_version: u32,
}

ua_binary_codec!(ViewDescription, view_id, timestamp, view_version);

/// One node to browse and how to follow its references.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrowseDescription {
    /// The node to browse.
    pub node_id: NodeId,
    /// Which direction to follow references.
    pub browse_direction: BrowseDirection,
    /// Only follow references of this type, null for all.
    pub reference_type_id: NodeId,
    /// Whether subtypes of the reference type are included.
    pub include_subtypes: bool,
    /// Bitmask of node classes to return, 0 for all.
    pub node_class_mask: u32,
    /// Bitmask of result fields to fill in.
    pub result_mask: u32,
}

ua_binary_codec!(
    BrowseDescription,
    node_id,
    browse_direction,
    reference_type_id,
    include_subtypes,
    node_class_mask,
    result_mask
);

/// A reference returned by browse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReferenceDescription {
    /// Type of the reference.
    pub reference_type_id: NodeId,
    /// Whether the reference is a forward reference.
    pub is_forward: bool,
    /// The target node.
    pub node_id: ExpandedNodeId,
    /// Browse name of the target.
    pub browse_name: QualifiedName,
    /// Display name of the target.
    pub display_name: LocalizedText,
    /// Node class of the target.
    pub node_class: NodeClass,
    /// Type definition of the target for objects and variables.
    pub type_definition: ExpandedNodeId,
}

ua_binary_codec!(
    ReferenceDescription,
    reference_type_id,
    is_forward,
    node_id,
    browse_name,
    display_name,
    node_class,
    type_definition
);

/// Result of browsing one node.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrowseResult {
    /// Status of this browse operation.
    pub status_code: StatusCode,
    /// Opaque handle to fetch remaining references, null when done.
    pub continuation_point: ByteString,
    /// References found.
    pub references: Option<Vec<ReferenceDescription>>,
}

ua_binary_codec!(
    BrowseResult,
    status_code,
    continuation_point,
    references
);

/// Browses the references of one or more nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrowseRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// The view to browse in.
    pub view: ViewDescription,
    /// Cap on references returned per node, 0 for no limit.
    pub requested_max_references_per_node: u32,
    /// The nodes to browse.
    pub nodes_to_browse: Option<Vec<BrowseDescription>>,
}

ua_binary_codec!(
    BrowseRequest,
    request_header,
    view,
    requested_max_references_per_node,
    nodes_to_browse
);
ua_message_info!(BrowseRequest, BrowseRequest_Encoding_DefaultBinary);

/// Response to a [`BrowseRequest`]. Results are in request order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrowseResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// One result per browsed node, in request order.
    pub results: Option<Vec<BrowseResult>>,
    /// Per operation diagnostics when requested.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

ua_binary_codec!(BrowseResponse, response_header, results, diagnostic_infos);
ua_message_info!(BrowseResponse, BrowseResponse_Encoding_DefaultBinary);
