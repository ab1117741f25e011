//! Connecting a session: open the channel, then either re-activate the
//! existing session on it or create a fresh one.

use std::sync::Arc;

use uasc_types::{NodeId, StatusCode};

use crate::transport::SecureChannelEventLoop;

use super::{session_debug, session_error, Session, SessionEvent, SessionState};

/// How a connection attempt bound the session to the server.
#[derive(Debug, Clone)]
pub enum SessionConnectMode {
    /// A new session was created with the given id.
    NewSession(NodeId),
    /// The existing session was re-activated on a fresh channel without the
    /// application issuing a new activate.
    ReactivatedSession(NodeId),
}

/// Connects sessions. Holds nothing but the session; exists so the event
/// loop can treat "connecting" as a state with behavior.
pub struct SessionConnector {
    inner: Arc<Session>,
}

impl SessionConnector {
    /// Create a connector for `session`.
    pub fn new(session: Arc<Session>) -> Self {
        SessionConnector { inner: session }
    }

    /// Run one full connection attempt.
    pub async fn try_connect(
        &self,
    ) -> Result<(SecureChannelEventLoop, SessionConnectMode), StatusCode> {
        let event_loop = self.inner.channel.connect().await?;
        match self.connect_session().await {
            Ok(mode) => Ok((event_loop, mode)),
            Err(e) => {
                self.inner.channel.close_channel().await;
                Err(e)
            }
        }
    }

    async fn connect_session(&self) -> Result<SessionConnectMode, StatusCode> {
        let session_id = self.inner.session_id().as_ref().clone();
        let reactivate = !session_id.is_null();

        let mode = if reactivate {
            // The channel died under an existing session: re-activate it
            // without creating a new one
            session_debug!(self.inner, "Reactivating session on new channel");
            self.inner.set_state(SessionState::ScActivating);
            self.inner.emit(SessionEvent::SessionReactivating {
                session_id: session_id.clone(),
            });

            match self.inner.activate_session().await {
                Err(status_code) if !self.inner.should_create_new_on(status_code) => {
                    session_error!(
                        self.inner,
                        "Could not reactivate session, error = {status_code}"
                    );
                    self.inner.emit(SessionEvent::SessionActivationFailure {
                        status: status_code,
                    });
                    return Err(status_code);
                }
                Err(status_code) => {
                    // The server forgot the session; the only way forward is
                    // a brand new one
                    session_debug!(
                        self.inner,
                        "Session activation failed with {status_code}, creating a new session"
                    );
                    self.inner.session_id.store(Arc::new(NodeId::null()));
                    let id = self.create_and_activate().await?;
                    SessionConnectMode::NewSession(id)
                }
                Ok(_) => SessionConnectMode::ReactivatedSession(session_id),
            }
        } else {
            let id = self.create_and_activate().await?;
            SessionConnectMode::NewSession(id)
        };

        self.inner.set_state(SessionState::Active);
        self.inner.emit(SessionEvent::ActivatedSession {
            session_id: self.inner.session_id().as_ref().clone(),
        });
        Ok(mode)
    }

    async fn create_and_activate(&self) -> Result<NodeId, StatusCode> {
        self.inner.create_session().await.map_err(|status| {
            self.inner
                .emit(SessionEvent::SessionActivationFailure { status });
            status
        })?;

        self.inner.set_state(SessionState::UserActivating);
        self.inner.activate_session().await.map_err(|status| {
            self.inner
                .emit(SessionEvent::SessionActivationFailure { status });
            status
        })?;

        Ok(self.inner.session_id().as_ref().clone())
    }
}

impl Session {
    /// Whether a failed re-activation with `status` should fall back to
    /// creating a new session.
    fn should_create_new_on(&self, status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::BadSessionIdInvalid
                | StatusCode::BadSessionClosed
                | StatusCode::BadSessionNotActivated
                | StatusCode::BadSecureChannelIdInvalid
        )
    }
}
