//! Manages all sessions on the server: creation, activation, closing and
//! expiry. Sessions survive the loss of their channel until they time out.
//!
//! The manager is shared between connections and locks internally, never
//! across an await point.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use hashbrown::HashMap;
use log::{error, info};
use parking_lot::RwLock;

use uasc_crypto::{self as crypto, SecurityPolicy, X509};
use uasc_types::{
    ActivateSessionRequest, ActivateSessionResponse, ByteString, CloseSessionRequest,
    CloseSessionResponse, CreateSessionRequest, CreateSessionResponse, Error, NodeId,
    ResponseHeader, StatusCode,
};

use crate::{
    channel::ChannelContext, identity_token::IdentityToken, info::ServerInfo,
};

use super::instance::Session;

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

fn next_session_id() -> NodeId {
    // Session ids are numeric in namespace 1, visible to clients
    NodeId::new(1, NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Manages all sessions on the server.
pub struct SessionManager {
    sessions: RwLock<HashMap<NodeId, Arc<RwLock<Session>>>>,
    info: Arc<ServerInfo>,
}

impl SessionManager {
    /// Create a session manager for the server described by `info`.
    pub fn new(info: Arc<ServerInfo>) -> Self {
        Self {
            sessions: Default::default(),
            info,
        }
    }

    /// The number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// `true` when no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Find a session by the authentication token presented in a request
    /// header.
    pub fn find_by_token(&self, authentication_token: &NodeId) -> Option<Arc<RwLock<Session>>> {
        self.sessions
            .read()
            .values()
            .find(|s| &s.read().authentication_token == authentication_token)
            .cloned()
    }

    fn fresh_server_nonce(channel: &ChannelContext) -> ByteString {
        let len = match channel.security_policy {
            SecurityPolicy::None => 32,
            policy => policy.secure_channel_nonce_length(),
        };
        ByteString::from(channel.profile.random_nonce(len))
    }

    /// Handle a CreateSessionRequest on `channel`.
    pub fn create_session(
        &self,
        channel: &ChannelContext,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, StatusCode> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.info.config.limits.max_sessions {
            return Err(StatusCode::BadTooManySessions);
        }

        if request.endpoint_url.is_null() {
            error!("Create session was passed a null endpoint url");
            return Err(StatusCode::BadTcpEndpointUrlInvalid);
        }
        let Some(endpoints) = self.info.endpoint_descriptions(request.endpoint_url.as_ref())
        else {
            return Err(StatusCode::BadTcpEndpointUrlInvalid);
        };

        if channel.security_policy != SecurityPolicy::None {
            // The client certificate must parse and pass PKI validation
            let cert =
                X509::from_byte_string(&request.client_certificate).map_err(|e| e.status())?;
            self.info.pki.validate_chain(&cert)?;
        }

        let session_timeout = Duration::from_millis(
            self.info
                .config
                .limits
                .clamp_session_timeout(request.requested_session_timeout),
        );

        let server_signature = self.info.server_signature(
            channel.security_policy,
            &request.client_certificate,
            &request.client_nonce,
        );

        // The credential for every subsequent request: 32 random bytes as an
        // opaque node id, generated once and never rotated
        let authentication_token = NodeId::new(0, crypto::random::byte_string(32));
        let server_nonce = Self::fresh_server_nonce(channel);

        let session_id = next_session_id();
        let session = Session::create(
            session_id.clone(),
            authentication_token.clone(),
            channel.secure_channel_id,
            session_timeout,
            request.endpoint_url.clone(),
            server_nonce.clone(),
        );
        info!("Created new session with ID {}", session_id);
        sessions.insert(session_id.clone(), Arc::new(RwLock::new(session)));

        Ok(CreateSessionResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            session_id,
            authentication_token,
            revised_session_timeout: session_timeout.as_millis() as f64,
            server_nonce,
            server_certificate: self.info.server_certificate_as_byte_string(),
            server_endpoints: Some(endpoints),
            server_software_certificates: None,
            server_signature,
            max_request_message_size: self.info.config.limits.max_message_size as u32,
        })
    }

    fn verify_client_signature(
        info: &ServerInfo,
        channel: &ChannelContext,
        session: &Session,
        request: &ActivateSessionRequest,
    ) -> Result<(), Error> {
        let Some(client_cert) = &channel.remote_cert else {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Client signature verification failed, channel has no client certificate",
            ));
        };
        let Some(server_cert) = &info.server_certificate else {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Client signature verification failed, server has no certificate",
            ));
        };
        crypto::verify_signature_data(
            channel.profile.as_ref(),
            &request.client_signature,
            client_cert,
            &server_cert.as_byte_string(),
            session.session_nonce(),
        )
        .map_err(|_| {
            Error::new(
                StatusCode::BadApplicationSignatureInvalid,
                "Client signature verification failed",
            )
        })
    }

    /// Handle an ActivateSessionRequest on `channel`. Re-binding an orphaned
    /// session to a new channel goes through here too.
    pub async fn activate_session(
        &self,
        channel: &ChannelContext,
        request: &ActivateSessionRequest,
    ) -> Result<ActivateSessionResponse, StatusCode> {
        let Some(session_lck) = self.find_by_token(&request.request_header.authentication_token)
        else {
            return Err(StatusCode::BadSessionIdInvalid);
        };

        let (endpoint_url, session_nonce) = {
            let session = session_lck.read();
            session.validate_timed_out().map_err(|e| e.status())?;

            let endpoint_url = session.endpoint_url().as_ref().to_string();
            if !self.info.endpoint_exists(
                &endpoint_url,
                channel.security_policy,
                channel.security_mode,
            ) {
                error!(
                    "activate_session, no endpoint exists for requested url & mode {}, {:?} / {:?}",
                    endpoint_url, channel.security_policy, channel.security_mode
                );
                return Err(StatusCode::BadTcpEndpointUrlInvalid);
            }

            if channel.security_policy != SecurityPolicy::None {
                Self::verify_client_signature(&self.info, channel, &session, request)
                    .map_err(|e| e.status())?;
            }

            // A session that was never activated is bound to the channel
            // that created it; only an activated (possibly orphaned) session
            // may move to a new channel
            if !session.is_activated()
                && session.secure_channel_id() != 0
                && session.secure_channel_id() != channel.secure_channel_id
            {
                error!(
                    "activate_session, rejected channel id {} for inactive session created on channel {}",
                    channel.secure_channel_id,
                    session.secure_channel_id()
                );
                return Err(StatusCode::BadSecureChannelIdInvalid);
            }

            (endpoint_url, session.session_nonce().clone())
        };

        // No lock is held while the authenticator runs
        let user_token = self
            .info
            .authenticate_endpoint(
                request,
                &endpoint_url,
                channel.security_policy,
                channel.security_mode,
                &session_nonce,
            )
            .await
            .map_err(|e| e.status())?;

        let server_nonce = Self::fresh_server_nonce(channel);
        {
            let mut session = session_lck.write();
            let decoding_options = self.info.decoding_options();
            session.activate(
                channel.secure_channel_id,
                server_nonce.clone(),
                IdentityToken::new(&request.user_identity_token, &decoding_options),
                user_token,
            );
        }

        Ok(ActivateSessionResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            server_nonce,
            results: None,
            diagnostic_infos: None,
        })
    }

    /// Handle a CloseSessionRequest on `channel`.
    pub fn close_session(
        &self,
        channel: &ChannelContext,
        request: &CloseSessionRequest,
    ) -> Result<CloseSessionResponse, StatusCode> {
        let Some(session) = self.find_by_token(&request.request_header.authentication_token)
        else {
            return Err(StatusCode::BadSessionIdInvalid);
        };

        let session_id = {
            let session = session.read();
            if !session.is_activated()
                && session.secure_channel_id() != channel.secure_channel_id
            {
                error!(
                    "close_session rejected, channel id {} does not match the one the inactive session was created on",
                    channel.secure_channel_id
                );
                return Err(StatusCode::BadSecureChannelIdInvalid);
            }
            session.session_id().clone()
        };

        info!("Closed session with ID {}", session_id);
        if let Some(session) = self.sessions.write().remove(&session_id) {
            session.write().close();
        }

        Ok(CloseSessionResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
        })
    }

    /// A channel died: orphan every session bound to it. The sessions stay
    /// eligible for re-activation until they time out.
    pub fn secure_channel_lost(&self, secure_channel_id: u32) {
        for session in self.sessions.read().values() {
            session.write().channel_lost(secure_channel_id);
        }
    }

    /// Drop a session whose deadline has passed.
    pub fn expire_session(&self, id: &NodeId) {
        if let Some(session) = self.sessions.write().remove(id) {
            info!("Session {id} has expired, removing it from the session map");
            session.write().close();
        }
    }

    /// The next expiry instant and the sessions already past theirs.
    pub fn check_session_expiry(&self) -> (Instant, Vec<NodeId>) {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut expiry =
            now + Duration::from_millis(self.info.config.limits.max_session_timeout_ms);
        for (id, session) in self.sessions.read().iter() {
            let deadline = session.read().deadline();
            if deadline < now {
                expired.push(id.clone());
            } else if deadline < expiry {
                expiry = deadline;
            }
        }
        (expiry, expired)
    }
}
