//! Session treatment services: CreateSession, ActivateSession, CloseSession.

use super::{ua_binary_codec, ua_message_info, ApplicationDescription, EndpointDescription};
use crate::{
    byte_string::ByteString,
    diagnostic_info::DiagnosticInfo,
    extension_object::ExtensionObject,
    node_id::NodeId,
    request_header::RequestHeader,
    response_header::ResponseHeader,
    status_code::StatusCode,
    string::UAString,
};

/// A digital signature over data known to both peers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignatureData {
    /// URI of the signature algorithm.
    pub algorithm: UAString,
    /// The signature bytes.
    pub signature: ByteString,
}

ua_binary_codec!(SignatureData, algorithm, signature);

impl SignatureData {
    /// An absent signature.
    pub fn null() -> SignatureData {
        SignatureData::default()
    }

    /// Test if both fields are null.
    pub fn is_null(&self) -> bool {
        self.algorithm.is_null() && self.signature.is_null()
    }
}

/// A software certificate signed by an authority.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignedSoftwareCertificate {
    /// The DER encoded certificate.
    pub certificate_data: ByteString,
    /// Signature over the certificate.
    pub signature: ByteString,
}

ua_binary_codec!(SignedSoftwareCertificate, certificate_data, signature);

/// Creates a session on the server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateSessionRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Description of the client application.
    pub client_description: ApplicationDescription,
    /// URI of the server the client expects to talk to.
    pub server_uri: UAString,
    /// The network address the client used to connect.
    pub endpoint_url: UAString,
    /// Human readable session name.
    pub session_name: UAString,
    /// Client entropy mixed into signatures.
    pub client_nonce: ByteString,
    /// The client application instance certificate.
    pub client_certificate: ByteString,
    /// Requested session timeout in milliseconds.
    pub requested_session_timeout: f64,
    /// Largest response message the client accepts, 0 for no limit.
    pub max_response_message_size: u32,
}

ua_binary_codec!(
    CreateSessionRequest,
    request_header,
    client_description,
    server_uri,
    endpoint_url,
    session_name,
    client_nonce,
    client_certificate,
    requested_session_timeout,
    max_response_message_size
);
ua_message_info!(
    CreateSessionRequest,
    CreateSessionRequest_Encoding_DefaultBinary
);

/// Response to a [`CreateSessionRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateSessionResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// Server assigned session identifier, public.
    pub session_id: NodeId,
    /// The secret token the client presents in every request on the session.
    pub authentication_token: NodeId,
    /// Actual session timeout granted.
    pub revised_session_timeout: f64,
    /// Server entropy mixed into signatures.
    pub server_nonce: ByteString,
    /// The server application instance certificate.
    pub server_certificate: ByteString,
    /// Endpoints supported by the server, for client verification.
    pub server_endpoints: Option<Vec<EndpointDescription>>,
    /// Obsolete field, always empty.
    pub server_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
    /// Server signature over client certificate and nonce.
    pub server_signature: SignatureData,
    /// Largest request message the server accepts, 0 for no limit.
    pub max_request_message_size: u32,
}

ua_binary_codec!(
    CreateSessionResponse,
    response_header,
    session_id,
    authentication_token,
    revised_session_timeout,
    server_nonce,
    server_certificate,
    server_endpoints,
    server_software_certificates,
    server_signature,
    max_request_message_size
);
ua_message_info!(
    CreateSessionResponse,
    CreateSessionResponse_Encoding_DefaultBinary
);

/// Activates a session with a user identity, either right after creation or
/// when re-binding an orphaned session to a new secure channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivateSessionRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Client signature over server certificate and nonce.
    pub client_signature: SignatureData,
    /// Obsolete field, always empty.
    pub client_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
    /// Locales in order of preference.
    pub locale_ids: Option<Vec<UAString>>,
    /// The user identity token, one of the identity token structures.
    pub user_identity_token: ExtensionObject,
    /// Signature with the user's credentials where the token type demands it.
    pub user_token_signature: SignatureData,
}

ua_binary_codec!(
    ActivateSessionRequest,
    request_header,
    client_signature,
    client_software_certificates,
    locale_ids,
    user_identity_token,
    user_token_signature
);
ua_message_info!(
    ActivateSessionRequest,
    ActivateSessionRequest_Encoding_DefaultBinary
);

/// Response to an [`ActivateSessionRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActivateSessionResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// Fresh server entropy for the next activation.
    pub server_nonce: ByteString,
    /// Results for the software certificates, unused.
    pub results: Option<Vec<StatusCode>>,
    /// Diagnostics for the software certificates, unused.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

ua_binary_codec!(
    ActivateSessionResponse,
    response_header,
    server_nonce,
    results,
    diagnostic_infos
);
ua_message_info!(
    ActivateSessionResponse,
    ActivateSessionResponse_Encoding_DefaultBinary
);

/// Closes a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloseSessionRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Whether subscriptions owned by the session are deleted with it.
    pub delete_subscriptions: bool,
}

ua_binary_codec!(CloseSessionRequest, request_header, delete_subscriptions);
ua_message_info!(
    CloseSessionRequest,
    CloseSessionRequest_Encoding_DefaultBinary
);

/// Response to a [`CloseSessionRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloseSessionResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
}

ua_binary_codec!(CloseSessionResponse, response_header);
ua_message_info!(
    CloseSessionResponse,
    CloseSessionResponse_Encoding_DefaultBinary
);
