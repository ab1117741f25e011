//! Secure channel service messages: OpenSecureChannel and CloseSecureChannel.

use super::{ua_binary_codec, ua_message_info};
use crate::{
    byte_string::ByteString,
    data_types::{MessageSecurityMode, SecurityTokenRequestType},
    date_time::DateTime,
    request_header::RequestHeader,
    response_header::ResponseHeader,
};

/// The token issued by the server for one negotiation of a channel's
/// symmetric keys.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelSecurityToken {
    /// Runtime id of the secure channel.
    pub channel_id: u32,
    /// Id of this token, fresh for every issue and renew.
    pub token_id: u32,
    /// Server time the token was created.
    pub created_at: DateTime,
    /// Lifetime of the token in milliseconds.
    pub revised_lifetime: u32,
}

ua_binary_codec!(
    ChannelSecurityToken,
    channel_id,
    token_id,
    created_at,
    revised_lifetime
);

/// Opens or renews a secure channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpenSecureChannelRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Protocol version the client implements.
    pub client_protocol_version: u32,
    /// Issue a fresh token or renew the current one.
    pub request_type: SecurityTokenRequestType,
    /// The security mode to apply to messages on the channel.
    pub security_mode: MessageSecurityMode,
    /// Client entropy for key derivation.
    pub client_nonce: ByteString,
    /// Requested token lifetime in milliseconds.
    pub requested_lifetime: u32,
}

ua_binary_codec!(
    OpenSecureChannelRequest,
    request_header,
    client_protocol_version,
    request_type,
    security_mode,
    client_nonce,
    requested_lifetime
);
ua_message_info!(
    OpenSecureChannelRequest,
    OpenSecureChannelRequest_Encoding_DefaultBinary
);

/// Response to an [`OpenSecureChannelRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpenSecureChannelResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// Protocol version the server implements.
    pub server_protocol_version: u32,
    /// The issued or renewed token.
    pub security_token: ChannelSecurityToken,
    /// Server entropy for key derivation.
    pub server_nonce: ByteString,
}

ua_binary_codec!(
    OpenSecureChannelResponse,
    response_header,
    server_protocol_version,
    security_token,
    server_nonce
);
ua_message_info!(
    OpenSecureChannelResponse,
    OpenSecureChannelResponse_Encoding_DefaultBinary
);

/// Closes a secure channel. The server does not reply on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloseSecureChannelRequest {
    /// Common request header.
    pub request_header: RequestHeader,
}

ua_binary_codec!(CloseSecureChannelRequest, request_header);
ua_message_info!(
    CloseSecureChannelRequest,
    CloseSecureChannelRequest_Encoding_DefaultBinary
);

/// Response to a [`CloseSecureChannelRequest`]. Defined by the standard but
/// never actually sent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CloseSecureChannelResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
}

ua_binary_codec!(CloseSecureChannelResponse, response_header);
ua_message_info!(
    CloseSecureChannelResponse,
    CloseSecureChannelResponse_Encoding_DefaultBinary
);
