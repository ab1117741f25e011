//! Discovery surface: GetEndpoints and the endpoint description structures.

use super::{ua_binary_codec, ua_message_info};
use crate::{
    byte_string::ByteString,
    data_types::{ApplicationType, MessageSecurityMode, UserTokenType},
    localized_text::LocalizedText,
    request_header::RequestHeader,
    response_header::ResponseHeader,
    string::UAString,
};

/// Describes an OPC UA application.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplicationDescription {
    /// Globally unique application identifier.
    pub application_uri: UAString,
    /// Identifier of the product.
    pub product_uri: UAString,
    /// Human readable application name.
    pub application_name: LocalizedText,
    /// Kind of application.
    pub application_type: ApplicationType,
    /// Gateway the application is reached through, if any.
    pub gateway_server_uri: UAString,
    /// Discovery profile supported.
    pub discovery_profile_uri: UAString,
    /// URLs for discovery.
    pub discovery_urls: Option<Vec<UAString>>,
}

ua_binary_codec!(
    ApplicationDescription,
    application_uri,
    product_uri,
    application_name,
    application_type,
    gateway_server_uri,
    discovery_profile_uri,
    discovery_urls
);

/// A user identity token kind accepted by an endpoint.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserTokenPolicy {
    /// Identifier the client echoes back when activating with this policy.
    pub policy_id: UAString,
    /// The kind of token.
    pub token_type: UserTokenType,
    /// For issued tokens, the kind of issued token.
    pub issued_token_type: UAString,
    /// For issued tokens, the endpoint of the issuing service.
    pub issuer_endpoint_url: UAString,
    /// Security policy applied to the token itself. When null the endpoint's
    /// policy applies.
    pub security_policy_uri: UAString,
}

ua_binary_codec!(
    UserTokenPolicy,
    policy_id,
    token_type,
    issued_token_type,
    issuer_endpoint_url,
    security_policy_uri
);

impl UserTokenPolicy {
    /// A policy accepting anonymous users.
    pub fn anonymous() -> UserTokenPolicy {
        UserTokenPolicy {
            policy_id: UAString::from("anonymous"),
            token_type: UserTokenType::Anonymous,
            ..Default::default()
        }
    }
}

/// Describes one endpoint a server offers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EndpointDescription {
    /// The URL clients connect to.
    pub endpoint_url: UAString,
    /// The server application.
    pub server: ApplicationDescription,
    /// The server application instance certificate.
    pub server_certificate: ByteString,
    /// Security mode applied to messages.
    pub security_mode: MessageSecurityMode,
    /// Security policy applied to messages.
    pub security_policy_uri: UAString,
    /// User token kinds accepted here.
    pub user_identity_tokens: Option<Vec<UserTokenPolicy>>,
    /// Transport profile, the binary TCP profile for this stack.
    pub transport_profile_uri: UAString,
    /// Relative security strength, higher is stronger.
    pub security_level: u8,
}

ua_binary_codec!(
    EndpointDescription,
    endpoint_url,
    server,
    server_certificate,
    security_mode,
    security_policy_uri,
    user_identity_tokens,
    transport_profile_uri,
    security_level
);

impl From<&str> for EndpointDescription {
    fn from(endpoint_url: &str) -> Self {
        EndpointDescription {
            endpoint_url: UAString::from(endpoint_url),
            security_mode: MessageSecurityMode::None,
            ..Default::default()
        }
    }
}

/// Asks a server for the endpoints it offers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetEndpointsRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// The URL the client used to reach the server.
    pub endpoint_url: UAString,
    /// Locales in order of preference for localized strings.
    pub locale_ids: Option<Vec<UAString>>,
    /// Transport profiles of interest, empty for all.
    pub profile_uris: Option<Vec<UAString>>,
}

ua_binary_codec!(
    GetEndpointsRequest,
    request_header,
    endpoint_url,
    locale_ids,
    profile_uris
);
ua_message_info!(
    GetEndpointsRequest,
    GetEndpointsRequest_Encoding_DefaultBinary
);

/// Response to a [`GetEndpointsRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetEndpointsResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// The endpoints matching the filter.
    pub endpoints: Option<Vec<EndpointDescription>>,
}

ua_binary_codec!(GetEndpointsResponse, response_header, endpoints);
ua_message_info!(
    GetEndpointsResponse,
    GetEndpointsResponse_Encoding_DefaultBinary
);
