//! Immutable server state shared across connections: configuration,
//! certificate, capability implementations and the endpoint table.

use std::sync::Arc;

use log::error;

use uasc_core::comms::url::url_matches_except_host;
use uasc_crypto::{
    create_signature_data, verify_signature_data, Pki, PrivateKey, SecurityPolicy, Thumbprint,
    X509,
};
use uasc_types::{
    ActivateSessionRequest, ApplicationDescription, ApplicationType, ByteString, DecodingOptions,
    EndpointDescription, Error, MessageSecurityMode, SignatureData, StatusCode, UAString,
    UserTokenPolicy, UserTokenType,
};

use crate::{
    authenticator::{AuthManager, Password, UserToken, ANONYMOUS_USER_TOKEN},
    authorization::AuthorizationManager,
    config::{ServerConfig, ServerEndpoint},
    identity_token::{IdentityToken, POLICY_ID_ANONYMOUS, POLICY_ID_USER_PASS_NONE, POLICY_ID_X509},
    service::ServiceHandler,
};

/// The transport profile URI of the binary TCP mapping.
pub const BINARY_TRANSPORT_PROFILE_URI: &str =
    "http://opcfoundation.org/UA-Profile/Transport/uatcp-uasc-uabinary";

/// Shared server state. Built once at startup, read-only at steady state.
pub struct ServerInfo {
    /// The server configuration.
    pub config: Arc<ServerConfig>,
    /// The server application instance certificate.
    pub server_certificate: Option<X509>,
    /// The matching private key.
    pub server_pkey: Option<PrivateKey>,
    /// User credential validation.
    pub authenticator: Arc<dyn AuthManager>,
    /// Per-operation access decisions. Shared, outlives every user.
    pub authorization: Arc<dyn AuthorizationManager>,
    /// Certificate chain validation.
    pub pki: Arc<dyn Pki>,
    /// The embedder's service implementation.
    pub service_handler: Arc<dyn ServiceHandler>,
}

impl ServerInfo {
    /// The application description of this server.
    pub fn application_description(&self) -> ApplicationDescription {
        ApplicationDescription {
            application_uri: UAString::from(self.config.application_uri.as_str()),
            product_uri: UAString::from(self.config.product_uri.as_str()),
            application_name: self.config.application_name.as_str().into(),
            application_type: ApplicationType::Server,
            gateway_server_uri: UAString::null(),
            discovery_profile_uri: UAString::null(),
            discovery_urls: Some(vec![UAString::from(self.config.base_endpoint_url())]),
        }
    }

    /// The decoding options every connection starts from.
    pub fn decoding_options(&self) -> DecodingOptions {
        DecodingOptions {
            max_message_size: self.config.limits.max_message_size,
            max_chunk_count: self.config.limits.max_chunk_count,
            ..Default::default()
        }
    }

    /// The server certificate as wire bytes, null when absent.
    pub fn server_certificate_as_byte_string(&self) -> ByteString {
        match &self.server_certificate {
            Some(cert) => cert.as_byte_string(),
            None => ByteString::null(),
        }
    }

    fn user_token_policies(endpoint: &ServerEndpoint) -> Option<Vec<UserTokenPolicy>> {
        let policies: Vec<UserTokenPolicy> = endpoint
            .user_token_ids
            .iter()
            .filter_map(|id| match id.as_str() {
                POLICY_ID_ANONYMOUS => Some(UserTokenPolicy {
                    policy_id: POLICY_ID_ANONYMOUS.into(),
                    token_type: UserTokenType::Anonymous,
                    ..Default::default()
                }),
                POLICY_ID_USER_PASS_NONE => Some(UserTokenPolicy {
                    policy_id: POLICY_ID_USER_PASS_NONE.into(),
                    token_type: UserTokenType::UserName,
                    // Password encryption algorithms other than None are not
                    // supported, the password relies on channel security
                    security_policy_uri: SecurityPolicy::None.to_uri().into(),
                    ..Default::default()
                }),
                POLICY_ID_X509 => Some(UserTokenPolicy {
                    policy_id: POLICY_ID_X509.into(),
                    token_type: UserTokenType::Certificate,
                    ..Default::default()
                }),
                other => {
                    error!("Unknown user token id {} in endpoint config", other);
                    None
                }
            })
            .collect();
        if policies.is_empty() {
            None
        } else {
            Some(policies)
        }
    }

    fn endpoint_security(endpoint: &ServerEndpoint) -> Option<(SecurityPolicy, MessageSecurityMode)> {
        let policy = SecurityPolicy::from_uri(&endpoint.security_policy_uri);
        if policy == SecurityPolicy::Unknown {
            return None;
        }
        let mode = match endpoint.security_mode.as_str() {
            "None" => MessageSecurityMode::None,
            "Sign" => MessageSecurityMode::Sign,
            "SignAndEncrypt" => MessageSecurityMode::SignAndEncrypt,
            _ => return None,
        };
        Some((policy, mode))
    }

    /// The full endpoint url of a configured endpoint.
    pub fn endpoint_url(&self, endpoint: &ServerEndpoint) -> String {
        format!(
            "{}{}",
            self.config.base_endpoint_url(),
            endpoint.path.trim_end_matches('/')
        )
    }

    /// All endpoint urls this server answers for.
    pub fn endpoint_urls(&self) -> Vec<String> {
        self.config
            .endpoints
            .iter()
            .map(|e| self.endpoint_url(e))
            .collect()
    }

    /// Endpoint descriptions for a GetEndpoints or CreateSession response,
    /// filtered to endpoints matching `endpoint_url` except for the host.
    pub fn endpoint_descriptions(&self, endpoint_url: &str) -> Option<Vec<EndpointDescription>> {
        let descriptions: Vec<EndpointDescription> = self
            .config
            .endpoints
            .iter()
            .filter(|e| url_matches_except_host(&self.endpoint_url(e), endpoint_url))
            .filter_map(|e| {
                let (policy, mode) = Self::endpoint_security(e)?;
                Some(EndpointDescription {
                    endpoint_url: UAString::from(self.endpoint_url(e)),
                    server: self.application_description(),
                    server_certificate: self.server_certificate_as_byte_string(),
                    security_mode: mode,
                    security_policy_uri: policy.to_uri_string(),
                    user_identity_tokens: Self::user_token_policies(e),
                    transport_profile_uri: UAString::from(BINARY_TRANSPORT_PROFILE_URI),
                    security_level: match mode {
                        MessageSecurityMode::SignAndEncrypt => 3,
                        MessageSecurityMode::Sign => 2,
                        _ => 0,
                    },
                })
            })
            .collect();
        if descriptions.is_empty() {
            None
        } else {
            Some(descriptions)
        }
    }

    /// `true` when some configured endpoint matches the url, policy and mode
    /// of the caller's channel.
    pub fn endpoint_exists(
        &self,
        endpoint_url: &str,
        security_policy: SecurityPolicy,
        security_mode: MessageSecurityMode,
    ) -> bool {
        self.find_endpoint(endpoint_url, security_policy, security_mode)
            .is_some()
    }

    fn find_endpoint(
        &self,
        endpoint_url: &str,
        security_policy: SecurityPolicy,
        security_mode: MessageSecurityMode,
    ) -> Option<&ServerEndpoint> {
        self.config.endpoints.iter().find(|e| {
            url_matches_except_host(&self.endpoint_url(e), endpoint_url)
                && Self::endpoint_security(e)
                    .is_some_and(|(p, m)| p == security_policy && m == security_mode)
        })
    }

    /// Sign `client_certificate || client_nonce` with the server key for a
    /// CreateSession response.
    pub fn server_signature(
        &self,
        security_policy: SecurityPolicy,
        client_certificate: &ByteString,
        client_nonce: &ByteString,
    ) -> SignatureData {
        if security_policy == SecurityPolicy::None {
            return SignatureData::null();
        }
        let Some(pkey) = &self.server_pkey else {
            return SignatureData::null();
        };
        match uasc_crypto::profile_for_policy(security_policy) {
            Ok(profile) => {
                create_signature_data(profile.as_ref(), pkey, client_certificate, client_nonce)
                    .unwrap_or_else(|err| {
                        error!("Cannot create server signature: {err}");
                        SignatureData::null()
                    })
            }
            Err(_) => SignatureData::null(),
        }
    }

    /// Validate the user identity of an ActivateSession request against the
    /// endpoint's configured token policies, then consult the authentication
    /// manager. Returns the user token of the authenticated user.
    pub async fn authenticate_endpoint(
        &self,
        request: &ActivateSessionRequest,
        endpoint_url: &str,
        security_policy: SecurityPolicy,
        security_mode: MessageSecurityMode,
        server_nonce: &ByteString,
    ) -> Result<UserToken, Error> {
        let Some(endpoint) = self.find_endpoint(endpoint_url, security_policy, security_mode)
        else {
            return Err(Error::new(
                StatusCode::BadTcpEndpointUrlInvalid,
                "No endpoint matches the session's url and security settings",
            ));
        };

        let decoding_options = self.decoding_options();
        let token = IdentityToken::new(&request.user_identity_token, &decoding_options);
        match token {
            IdentityToken::None | IdentityToken::Anonymous(_) => {
                self.check_policy_configured(endpoint, POLICY_ID_ANONYMOUS)?;
                self.authenticator
                    .authenticate_anonymous_token(endpoint)
                    .await?;
                Ok(UserToken(ANONYMOUS_USER_TOKEN.to_string()))
            }
            IdentityToken::UserName(token) => {
                self.check_policy_configured(endpoint, POLICY_ID_USER_PASS_NONE)?;
                // Only unencrypted passwords are supported; anything naming
                // an encryption algorithm is rejected outright
                if !token.encryption_algorithm.is_null() {
                    return Err(Error::new(
                        StatusCode::BadIdentityTokenInvalid,
                        "Password encryption algorithms are not supported",
                    ));
                }
                let password = Password::new(
                    String::from_utf8(token.password.to_vec()).map_err(|_| {
                        Error::new(
                            StatusCode::BadIdentityTokenInvalid,
                            "Password is not valid UTF-8",
                        )
                    })?,
                );
                self.authenticator
                    .authenticate_username_identity_token(
                        endpoint,
                        token.user_name.as_ref(),
                        &password,
                    )
                    .await
            }
            IdentityToken::X509(token) => {
                self.check_policy_configured(endpoint, POLICY_ID_X509)?;
                let user_cert = X509::from_byte_string(&token.certificate_data)?;
                self.pki.validate_chain(&user_cert).map_err(|status| {
                    Error::new(status, "User certificate chain validation failed")
                })?;
                // The user must prove key possession by signing
                // serverCertificate || serverNonce before the authenticator
                // is consulted
                self.verify_user_token_signature(
                    &request.user_token_signature,
                    &user_cert,
                    server_nonce,
                )?;
                self.authenticator
                    .authenticate_x509_identity_token(endpoint, &user_cert.thumbprint())
                    .await
            }
            IdentityToken::Invalid => Err(Error::new(
                StatusCode::BadIdentityTokenInvalid,
                "Unsupported user identity token type",
            )),
        }
    }

    fn check_policy_configured(
        &self,
        endpoint: &ServerEndpoint,
        policy_id: &str,
    ) -> Result<(), Error> {
        if endpoint.user_token_ids.iter().any(|id| id == policy_id) {
            Ok(())
        } else {
            Err(Error::new(
                StatusCode::BadIdentityTokenRejected,
                format!(
                    "Endpoint {} does not accept {} tokens",
                    endpoint.path, policy_id
                ),
            ))
        }
    }

    fn verify_user_token_signature(
        &self,
        signature: &SignatureData,
        user_cert: &X509,
        server_nonce: &ByteString,
    ) -> Result<(), Error> {
        let server_certificate = self.server_certificate_as_byte_string();
        // User token signatures use the RSA-SHA256 algorithm of the secured
        // policies regardless of the channel's own policy
        let profile = uasc_crypto::profile_for_policy(SecurityPolicy::Basic256Sha256)?;
        verify_signature_data(
            profile.as_ref(),
            signature,
            user_cert,
            &server_certificate,
            server_nonce,
        )
        .map_err(|_| {
            Error::new(
                StatusCode::BadUserSignatureInvalid,
                "User token signature verification failed",
            )
        })
    }

    /// Compute a certificate thumbprint, for logging and x509 validation.
    pub fn thumbprint(cert: &X509) -> Thumbprint {
        cert.thumbprint()
    }
}
