//! User identity token structures carried in ActivateSession.

use super::{ua_binary_codec, ua_message_info};
use crate::{byte_string::ByteString, string::UAString};

/// Identity token for anonymous users.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnonymousIdentityToken {
    /// The policy this token was issued under.
    pub policy_id: UAString,
}

ua_binary_codec!(AnonymousIdentityToken, policy_id);
ua_message_info!(
    AnonymousIdentityToken,
    AnonymousIdentityToken_Encoding_DefaultBinary
);

/// Identity token carrying a username and password.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserNameIdentityToken {
    /// The policy this token was issued under.
    pub policy_id: UAString,
    /// The user name.
    pub user_name: UAString,
    /// The password, possibly encrypted according to `encryption_algorithm`.
    pub password: ByteString,
    /// URI of the algorithm the password is encrypted with, null for none.
    pub encryption_algorithm: UAString,
}

ua_binary_codec!(
    UserNameIdentityToken,
    policy_id,
    user_name,
    password,
    encryption_algorithm
);
ua_message_info!(
    UserNameIdentityToken,
    UserNameIdentityToken_Encoding_DefaultBinary
);

/// Identity token referencing an X.509 v3 certificate.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct X509IdentityToken {
    /// The policy this token was issued under.
    pub policy_id: UAString,
    /// The DER encoded certificate.
    pub certificate_data: ByteString,
}

ua_binary_codec!(X509IdentityToken, policy_id, certificate_data);
ua_message_info!(X509IdentityToken, X509IdentityToken_Encoding_DefaultBinary);

/// Identity token issued by an external authorization service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IssuedIdentityToken {
    /// The policy this token was issued under.
    pub policy_id: UAString,
    /// The token data, possibly encrypted.
    pub token_data: ByteString,
    /// URI of the algorithm the token is encrypted with, null for none.
    pub encryption_algorithm: UAString,
}

ua_binary_codec!(
    IssuedIdentityToken,
    policy_id,
    token_data,
    encryption_algorithm
);
ua_message_info!(
    IssuedIdentityToken,
    IssuedIdentityToken_Encoding_DefaultBinary
);
