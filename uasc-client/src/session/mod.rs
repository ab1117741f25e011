//! The client session: a long lived logical connection that survives the
//! loss of its secure channel and re-activates itself on a fresh one.

mod connect;
mod event_loop;
pub mod services;

pub use connect::{SessionConnectMode, SessionConnector};
pub use event_loop::{SessionEventLoop, SessionPollResult};

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use log::{error, info};
use tokio::sync::{mpsc, watch};

use uasc_core::{comms::secure_channel::SecureChannel, RequestMessage, ResponseMessage};
use uasc_crypto::{PrivateKey, X509};
use uasc_types::{
    ApplicationDescription, ApplicationType, EndpointDescription, NodeId, ResponseHeader,
    StatusCode, UAString,
};

use crate::{
    config::ClientConfig,
    transport::{AsyncSecureChannel, TcpConnector, TransportConfiguration},
    IdentityToken,
};

macro_rules! session_warn {
    ($session: expr, $($arg:tt)*) =>  {
        log::warn!("session:{} {}", $session.session_id(), format!($($arg)*));
    }
}
pub(crate) use session_warn;

macro_rules! session_error {
    ($session: expr, $($arg:tt)*) =>  {
        log::error!("session:{} {}", $session.session_id(), format!($($arg)*));
    }
}
pub(crate) use session_error;

macro_rules! session_debug {
    ($session: expr, $($arg:tt)*) =>  {
        log::debug!("session:{} {}", $session.session_id(), format!($($arg)*));
    }
}
pub(crate) use session_debug;

/// The states a client session moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing has happened yet.
    Init,
    /// A CreateSession request is in flight.
    Creating,
    /// The session exists on the server but is not activated.
    Created,
    /// The first ActivateSession with the user identity is in flight.
    UserActivating,
    /// A re-activation on a fresh channel is in flight.
    ScActivating,
    /// The session is usable.
    Active,
    /// The channel was lost; a reconnect is scheduled and the session waits
    /// for re-activation.
    Orphaned,
    /// A CloseSession request is in flight.
    Closing,
    /// The session is gone.
    Closed,
}

/// Events surfaced to the application. The names are contractual; the
/// payloads carry what the application needs to correlate them.
#[derive(Debug)]
pub enum SessionEvent {
    /// Activation of a session failed terminally.
    SessionActivationFailure {
        /// Why activation failed.
        status: StatusCode,
    },
    /// The session reached the active state and can carry requests.
    ActivatedSession {
        /// The server assigned session id.
        session_id: NodeId,
    },
    /// A lost session is being re-activated on a new channel. Followed by
    /// `ActivatedSession` on success.
    SessionReactivating {
        /// The server assigned session id.
        session_id: NodeId,
    },
    /// A response to a request posted with [`Session::async_send`].
    RcvSessionResponse {
        /// The server assigned session id.
        session_id: NodeId,
        /// The decoded response.
        response: Box<ResponseMessage>,
        /// The context value given at send time.
        app_ctx: u64,
    },
    /// A request posted with [`Session::async_send`] failed before or
    /// instead of producing a response.
    SndRequestFailed {
        /// The failure.
        status: StatusCode,
        /// The context value given at send time.
        app_ctx: u64,
    },
    /// The session is closed. Terminal.
    ClosedSession {
        /// The server assigned session id.
        session_id: NodeId,
        /// Why the session closed.
        status: StatusCode,
    },
}

/// An OPC UA client session.
pub struct Session {
    pub(crate) channel: AsyncSecureChannel,
    pub(crate) state_watch_tx: watch::Sender<SessionState>,
    pub(crate) state_watch_rx: watch::Receiver<SessionState>,
    pub(crate) session_id: ArcSwap<NodeId>,
    pub(crate) auth_token: Arc<ArcSwap<NodeId>>,
    pub(crate) session_name: UAString,
    pub(crate) application_description: ApplicationDescription,
    pub(crate) endpoint: EndpointDescription,
    pub(crate) identity_token: IdentityToken,
    pub(crate) preferred_locales: Vec<String>,
    pub(crate) session_timeout: f64,
    pub(crate) request_timeout: Duration,
    pub(crate) certificate: Option<X509>,
    pub(crate) private_key: Option<PrivateKey>,
    pub(crate) event_tx: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) should_reconnect: AtomicBool,
}

impl Session {
    /// Create a session toward `endpoint` and the event loop that drives it.
    /// The returned receiver delivers [`SessionEvent`]s to the application;
    /// nothing happens until the event loop is polled.
    pub fn new(
        config: &ClientConfig,
        endpoint: EndpointDescription,
        identity_token: IdentityToken,
        certificate: Option<X509>,
        private_key: Option<PrivateKey>,
    ) -> (
        Arc<Session>,
        SessionEventLoop,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let auth_token: Arc<ArcSwap<NodeId>> = Default::default();
        let (state_watch_tx, state_watch_rx) = watch::channel(SessionState::Init);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let transport_config = TransportConfiguration {
            max_pending_incoming: 16384,
            send_buffer_size: config.transport_limits.send_buffer_size,
            recv_buffer_size: config.transport_limits.recv_buffer_size,
            max_message_size: config.transport_limits.max_message_size,
            max_chunk_count: config.transport_limits.max_chunk_count,
        };

        let channel = AsyncSecureChannel::new(
            endpoint.clone(),
            config.session_retry_policy.clone(),
            auth_token.clone(),
            transport_config,
            Box::new(TcpConnector),
            config.channel_lifetime_ms,
            certificate.clone(),
            private_key.clone(),
            Default::default(),
        );

        let session = Arc::new(Session {
            channel,
            state_watch_tx,
            state_watch_rx,
            session_id: ArcSwap::new(Arc::new(NodeId::null())),
            auth_token,
            session_name: config.session_name.clone().into(),
            application_description: ApplicationDescription {
                application_uri: config.application_uri.clone().into(),
                product_uri: config.product_uri.clone().into(),
                application_name: config.application_name.clone().into(),
                application_type: ApplicationType::Client,
                ..Default::default()
            },
            endpoint,
            identity_token,
            preferred_locales: config.preferred_locales.clone(),
            session_timeout: config.session_timeout_ms as f64,
            request_timeout: config.request_timeout(),
            certificate,
            private_key,
            event_tx,
            should_reconnect: AtomicBool::new(true),
        });

        let event_loop = SessionEventLoop::new(session.clone(), config.session_retry_policy.clone());
        (session, event_loop, event_rx)
    }

    /// The server assigned session id, null before the session is created.
    pub fn session_id(&self) -> Arc<NodeId> {
        self.session_id.load_full()
    }

    /// The current session state.
    pub fn state(&self) -> SessionState {
        *self.state_watch_rx.borrow()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let _ = self.state_watch_tx.send(state);
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Access to the channel security state for diagnostics.
    pub fn secure_channel(&self) -> &parking_lot::RwLock<SecureChannel> {
        &self.channel.secure_channel
    }

    /// Wait until the session reaches `Active`, with a timeout.
    pub async fn wait_for_active(&self, timeout: Duration) -> Result<(), StatusCode> {
        let mut rx = self.state_watch_rx.clone();
        tokio::time::timeout(timeout, async move {
            loop {
                if *rx.borrow_and_update() == SessionState::Active {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .map_err(|_| StatusCode::BadTimeout)
    }

    /// Send `request` on the session and wait for the response. The request
    /// header is filled in by the channel; the response is matched by its
    /// request handle and delivered here, exactly once.
    pub async fn send(
        &self,
        request: impl Into<RequestMessage>,
    ) -> Result<ResponseMessage, StatusCode> {
        if matches!(self.state(), SessionState::Closed | SessionState::Closing) {
            return Err(StatusCode::BadSessionIdInvalid);
        }
        let response = self.channel.send(request, self.request_timeout).await?;
        if let ResponseMessage::ServiceFault(fault) = &response {
            // The server no longer knows this session; it is gone without a
            // CloseSession exchange
            if fault.response_header.service_result == StatusCode::BadSessionIdInvalid {
                self.set_state(SessionState::Closed);
                self.emit(SessionEvent::ClosedSession {
                    session_id: self.session_id().as_ref().clone(),
                    status: StatusCode::BadSessionIdInvalid,
                });
            }
        }
        Ok(response)
    }

    /// Post `request` without waiting; the outcome arrives on the
    /// application event queue as `RcvSessionResponse` or, on any failure
    /// including a session that no longer exists, as `SndRequestFailed`.
    pub fn async_send(self: &Arc<Self>, request: impl Into<RequestMessage>, app_ctx: u64) {
        let request = request.into();
        if matches!(self.state(), SessionState::Closed | SessionState::Closing) {
            // A request posted to a dead session must fail loudly rather
            // than vanish
            self.emit(SessionEvent::SndRequestFailed {
                status: StatusCode::BadSessionIdInvalid,
                app_ctx,
            });
            return;
        }
        let session = self.clone();
        tokio::spawn(async move {
            match session.channel.send(request, session.request_timeout).await {
                Ok(response) => session.emit(SessionEvent::RcvSessionResponse {
                    session_id: session.session_id().as_ref().clone(),
                    response: Box::new(response),
                    app_ctx,
                }),
                Err(status) => session.emit(SessionEvent::SndRequestFailed { status, app_ctx }),
            }
        });
    }

    /// Disconnect from the server and close the session.
    pub async fn disconnect(&self) -> Result<(), StatusCode> {
        self.disconnect_inner(true).await
    }

    pub(crate) async fn disconnect_inner(&self, close_session: bool) -> Result<(), StatusCode> {
        self.should_reconnect.store(false, Ordering::Relaxed);
        let mut result = Ok(());
        if close_session && matches!(self.state(), SessionState::Active) {
            result = self.close_session().await;
        }
        self.channel.close_channel().await;
        Ok(result?)
    }
}

/// Process the service result, i.e. where the request "succeeded" but the
/// response contains a failure status code.
pub(crate) fn process_service_result(response_header: &ResponseHeader) -> Result<(), StatusCode> {
    if response_header.service_result.is_bad() {
        info!(
            "Received a bad service result {} from the request",
            response_header.service_result
        );
        Err(response_header.service_result)
    } else {
        Ok(())
    }
}

pub(crate) fn process_unexpected_response(response: ResponseMessage) -> StatusCode {
    match response {
        ResponseMessage::ServiceFault(service_fault) => {
            error!(
                "Received a service fault of {} for the request",
                service_fault.response_header.service_result
            );
            service_fault.response_header.service_result
        }
        _ => {
            error!("Received an unexpected response to the request");
            StatusCode::BadUnknownResponse
        }
    }
}
