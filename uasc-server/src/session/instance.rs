//! One live session on the server.

use std::time::{Duration, Instant};

use uasc_types::{ByteString, Error, NodeId, StatusCode, UAString};

use crate::{authenticator::UserToken, identity_token::IdentityToken};

/// A session: created by a client, bound to a secure channel, possibly
/// orphaned and re-bound later. The session outlives its channel; it dies on
/// CloseSession or when its own timeout passes without activity.
pub struct Session {
    /// Server assigned public identifier.
    session_id: NodeId,
    /// The secret token clients present in request headers. Generated once
    /// at create, never rotated, never logged.
    pub(crate) authentication_token: NodeId,
    /// Id of the secure channel the session is currently bound to.
    secure_channel_id: u32,
    /// Session timeout.
    timeout: Duration,
    /// Last time a request touched this session.
    last_activity: Instant,
    /// The url the client connected to.
    endpoint_url: UAString,
    /// The activated user, `None` until the first activation.
    user_token: Option<UserToken>,
    /// The raw identity presented at activation.
    #[allow(unused)]
    identity: IdentityToken,
    /// Nonce of the most recent create/activate exchange.
    session_nonce: ByteString,
    /// Whether ActivateSession has succeeded at least once.
    activated: bool,
    /// Whether the session has been closed.
    closed: bool,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        session_id: NodeId,
        authentication_token: NodeId,
        secure_channel_id: u32,
        timeout: Duration,
        endpoint_url: UAString,
        session_nonce: ByteString,
    ) -> Session {
        Session {
            session_id,
            authentication_token,
            secure_channel_id,
            timeout,
            last_activity: Instant::now(),
            endpoint_url,
            user_token: None,
            identity: IdentityToken::None,
            session_nonce,
            activated: false,
            closed: false,
        }
    }

    /// The server assigned session id.
    pub fn session_id(&self) -> &NodeId {
        &self.session_id
    }

    /// The channel the session is bound to, 0 when orphaned.
    pub fn secure_channel_id(&self) -> u32 {
        self.secure_channel_id
    }

    /// The url the client connected to.
    pub fn endpoint_url(&self) -> &UAString {
        &self.endpoint_url
    }

    /// The activated user.
    pub fn user_token(&self) -> Option<&UserToken> {
        self.user_token.as_ref()
    }

    /// The nonce of the most recent create/activate exchange.
    pub fn session_nonce(&self) -> &ByteString {
        &self.session_nonce
    }

    /// `true` once ActivateSession has succeeded.
    pub fn is_activated(&self) -> bool {
        self.activated && !self.closed
    }

    /// Mark activity, pushing the expiry window out.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// When this session expires unless it sees activity.
    pub fn deadline(&self) -> Instant {
        self.last_activity + self.timeout
    }

    /// Fail when the session has timed out.
    pub fn validate_timed_out(&self) -> Result<(), Error> {
        if self.deadline() < Instant::now() {
            Err(Error::new(
                StatusCode::BadSessionIdInvalid,
                "Session has timed out",
            ))
        } else {
            Ok(())
        }
    }

    /// Activate the session on `secure_channel_id`, possibly a different
    /// channel than before for an orphaned session.
    pub(crate) fn activate(
        &mut self,
        secure_channel_id: u32,
        server_nonce: ByteString,
        identity: IdentityToken,
        user_token: UserToken,
    ) {
        self.activated = true;
        self.secure_channel_id = secure_channel_id;
        self.session_nonce = server_nonce;
        self.identity = identity;
        self.user_token = Some(user_token);
        self.touch();
    }

    /// Mark the session closed.
    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.activated = false;
    }

    /// The channel carrying this session was lost. The session stays alive
    /// as an orphan, eligible for re-activation from another channel until
    /// it times out.
    pub(crate) fn channel_lost(&mut self, secure_channel_id: u32) {
        if self.secure_channel_id == secure_channel_id {
            self.secure_channel_id = 0;
        }
    }
}
