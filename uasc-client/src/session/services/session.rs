//! Session treatment services: CreateSession, ActivateSession and
//! CloseSession, including the signatures and identity tokens they carry.

use std::sync::Arc;

use uasc_core::ResponseMessage;
use uasc_crypto::{self as crypto, PrivateKey, SecurityPolicy};
use uasc_types::{
    ActivateSessionRequest, AnonymousIdentityToken, ByteString, CloseSessionRequest,
    CreateSessionRequest, ExtensionObject, SignatureData, StatusCode, UAString,
    UserNameIdentityToken, X509IdentityToken,
};

use crate::{
    session::{
        process_service_result, process_unexpected_response, session_debug, session_error,
        Session, SessionEvent, SessionState,
    },
    IdentityToken,
};

impl Session {
    /// Send a CreateSessionRequest and install the returned ids.
    pub(crate) async fn create_session(&self) -> Result<(), StatusCode> {
        self.set_state(SessionState::Creating);

        let request = CreateSessionRequest {
            request_header: self.channel.make_request_header(self.request_timeout),
            client_description: self.application_description.clone(),
            server_uri: UAString::null(),
            endpoint_url: self.endpoint.endpoint_url.clone(),
            session_name: self.session_name.clone(),
            client_nonce: self.channel.client_nonce(),
            client_certificate: match &self.certificate {
                Some(cert) => cert.as_byte_string(),
                None => ByteString::null(),
            },
            requested_session_timeout: self.session_timeout,
            max_response_message_size: 0,
        };

        let response = self.channel.send(request, self.request_timeout).await?;
        let ResponseMessage::CreateSession(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;

        let session_id = response.session_id.clone();
        session_debug!(self, "Created session with id {}", session_id);
        // The authentication token is the session credential: store it for
        // every subsequent request header, never log it
        self.auth_token
            .store(Arc::new(response.authentication_token.clone()));
        self.session_id.store(Arc::new(session_id));

        self.channel
            .update_from_created_session(&response.server_nonce, &response.server_certificate)?;

        // With security on, prove the server owns its certificate
        let security_policy = self.channel.security_policy();
        if security_policy != SecurityPolicy::None {
            let Some(client_cert) = &self.certificate else {
                return Err(StatusCode::BadSecurityChecksFailed);
            };
            let server_cert =
                crypto::X509::from_byte_string(&response.server_certificate).map_err(|e| {
                    session_error!(self, "Server certificate is invalid: {e}");
                    StatusCode::BadCertificateInvalid
                })?;
            crypto::verify_signature_data(
                self.secure_channel().read().profile().as_ref(),
                &response.server_signature,
                &server_cert,
                &client_cert.as_byte_string(),
                &self.channel.client_nonce(),
            )
            .map_err(|_| {
                session_error!(self, "Server signature verification failed");
                StatusCode::BadApplicationSignatureInvalid
            })?;
        }

        self.set_state(SessionState::Created);
        Ok(())
    }

    /// Send an ActivateSessionRequest carrying the configured user identity.
    /// Used both for the first activation and to re-bind an orphaned session
    /// to a new channel.
    pub(crate) async fn activate_session(&self) -> Result<(), StatusCode> {
        let (user_identity_token, user_token_signature) = self.build_user_identity()?;

        let client_signature = {
            let secure_channel = self.secure_channel().read();
            if secure_channel.security_policy() == SecurityPolicy::None {
                SignatureData::null()
            } else {
                let Some(key) = &self.private_key else {
                    return Err(StatusCode::BadSecurityChecksFailed);
                };
                let server_cert = secure_channel.remote_cert_as_byte_string();
                let server_nonce = secure_channel.remote_nonce_as_byte_string();
                crypto::create_signature_data(
                    secure_channel.profile().as_ref(),
                    key,
                    &server_cert,
                    &server_nonce,
                )
                .map_err(|e| e.status())?
            }
        };

        let request = ActivateSessionRequest {
            request_header: self.channel.make_request_header(self.request_timeout),
            client_signature,
            client_software_certificates: None,
            locale_ids: if self.preferred_locales.is_empty() {
                None
            } else {
                Some(
                    self.preferred_locales
                        .iter()
                        .map(UAString::from)
                        .collect(),
                )
            },
            user_identity_token,
            user_token_signature,
        };

        let response = self.channel.send(request, self.request_timeout).await?;
        let ResponseMessage::ActivateSession(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;

        // The server rotates its nonce on every activation
        self.channel
            .update_from_created_session(&response.server_nonce, &ByteString::null())
            .ok();
        Ok(())
    }

    /// Close the session, transitioning to `Closed` even when the server
    /// does not answer in time.
    pub(crate) async fn close_session(&self) -> Result<(), StatusCode> {
        self.set_state(SessionState::Closing);
        let request = CloseSessionRequest {
            request_header: self.channel.make_request_header(self.request_timeout),
            delete_subscriptions: true,
        };
        let session_id = self.session_id().as_ref().clone();

        let status = match self.channel.send(request, self.request_timeout).await {
            Ok(ResponseMessage::CloseSession(_)) => StatusCode::Good,
            Ok(response) => process_unexpected_response(response),
            // Timeout or channel loss close the session all the same
            Err(status) => status,
        };
        self.set_state(SessionState::Closed);
        self.emit(SessionEvent::ClosedSession { session_id, status });
        if status.is_good() || status == StatusCode::BadTimeout {
            Ok(())
        } else {
            Err(status)
        }
    }

    fn build_user_identity(&self) -> Result<(ExtensionObject, SignatureData), StatusCode> {
        match &self.identity_token {
            IdentityToken::Anonymous => {
                let token = AnonymousIdentityToken {
                    policy_id: self.identity_token.policy_id(),
                };
                Ok((ExtensionObject::from_message(&token), SignatureData::null()))
            }
            IdentityToken::UserName(user, password) => {
                // Password encryption algorithms are not supported; the
                // token goes out with algorithm None and relies on channel
                // encryption
                let token = UserNameIdentityToken {
                    policy_id: self.identity_token.policy_id(),
                    user_name: UAString::from(user.as_str()),
                    password: ByteString::from(password.as_bytes()),
                    encryption_algorithm: UAString::null(),
                };
                Ok((ExtensionObject::from_message(&token), SignatureData::null()))
            }
            IdentityToken::X509(cert_der, key_pem) => {
                let token = X509IdentityToken {
                    policy_id: self.identity_token.policy_id(),
                    certificate_data: cert_der.clone(),
                };
                // The user key signs serverCertificate || serverNonce, just
                // like the application signature
                let key = PrivateKey::from_pem(key_pem).map_err(|e| e.status())?;
                let signature = {
                    let secure_channel = self.secure_channel().read();
                    let server_cert = secure_channel.remote_cert_as_byte_string();
                    let server_nonce = secure_channel.remote_nonce_as_byte_string();
                    crypto::create_signature_data(
                        &crypto::SoftwareProfile,
                        &key,
                        &server_cert,
                        &server_nonce,
                    )
                    .map_err(|e| e.status())?
                };
                Ok((ExtensionObject::from_message(&token), signature))
            }
        }
    }
}

