//! Wrapper around an open secure channel: issue and renewal of security
//! tokens, request header minting, and the close handshake.

use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::{ArcSwap, ArcSwapOption};
use log::{debug, error};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use uasc_core::{
    comms::secure_channel::{Role, SecureChannel},
    RequestMessage, ResponseMessage,
};
use uasc_crypto::{PrivateKey, SecurityPolicy, X509};
use uasc_types::{
    CloseSecureChannelRequest, DateTime, DecodingOptions, EndpointDescription, IntegerId,
    MessageSecurityMode, NodeId, OpenSecureChannelRequest, RequestHeader,
    SecurityTokenRequestType, StatusCode,
};

use crate::retry::SessionRetryPolicy;

use super::{
    connect::{Connector, Transport},
    state::{Request, RequestSend},
    tcp::{TcpTransport, TransportConfiguration},
    TransportPollResult,
};

// An arbitrary limit on queued outgoing messages, a safety net against a
// stuck transport consuming unbounded memory.
const MAX_INFLIGHT_MESSAGES: usize = 1_000_000;

/// The lifecycle of a secure channel as observed by the session layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Nothing has happened yet.
    Init,
    /// TCP is open and the hello was sent.
    TcpInitialized,
    /// The hello was acknowledged, an OPN is about to go out.
    ScInit,
    /// An OPN(Issue) is in flight.
    ScConnecting,
    /// The channel carries a valid token.
    ScConnected,
    /// The channel is renewing its token; messages continue to flow.
    ScConnectedRenew,
    /// A close request is in flight.
    ScDisconnecting,
    /// The channel is gone; the session layer decides what happens next.
    Disconnected,
}

/// Request handle and credential state shared across requests on a channel.
pub(crate) struct SecureChannelState {
    request_handle: AtomicU32,
    auth_token: Arc<ArcSwap<NodeId>>,
    secure_channel: Arc<RwLock<SecureChannel>>,
}

impl SecureChannelState {
    const FIRST_REQUEST_HANDLE: u32 = 1;

    pub fn new(
        secure_channel: Arc<RwLock<SecureChannel>>,
        auth_token: Arc<ArcSwap<NodeId>>,
    ) -> SecureChannelState {
        SecureChannelState {
            request_handle: AtomicU32::new(Self::FIRST_REQUEST_HANDLE),
            auth_token,
            secure_channel,
        }
    }

    /// Next client-local request handle. Unique within the session/channel
    /// pair; wraps past zero since 0 means "no handle".
    pub fn request_handle(&self) -> IntegerId {
        loop {
            let next = self.request_handle.fetch_add(1, Ordering::Relaxed);
            if next != 0 {
                break next;
            }
        }
    }

    /// Mint a request header carrying the session credential and a fresh
    /// handle.
    pub fn make_request_header(&self, timeout: Duration) -> RequestHeader {
        RequestHeader {
            authentication_token: self.auth_token.load().as_ref().clone(),
            timestamp: DateTime::now(),
            request_handle: self.request_handle(),
            timeout_hint: timeout.as_millis() as u32,
            ..Default::default()
        }
    }

    /// Build an OPN request, generating a fresh client nonce.
    pub fn begin_issue_or_renew_secure_channel(
        &self,
        request_type: SecurityTokenRequestType,
        channel_lifetime: u32,
        timeout: Duration,
        sender: RequestSend,
    ) -> Request<OpenSecureChannelRequest> {
        let (client_nonce, security_mode) = {
            let mut secure_channel = self.secure_channel.write();
            secure_channel.create_random_nonce();
            (
                secure_channel.local_nonce_as_byte_string(),
                secure_channel.security_mode(),
            )
        };

        let request = OpenSecureChannelRequest {
            request_header: self.make_request_header(timeout),
            client_protocol_version: 0,
            request_type,
            security_mode,
            client_nonce,
            requested_lifetime: channel_lifetime,
        };

        Request::new(request, sender, timeout)
    }

    /// Process an OPN response: install the token and derive keys.
    pub fn end_issue_or_renew_secure_channel(
        &self,
        response: ResponseMessage,
    ) -> Result<(), StatusCode> {
        let ResponseMessage::OpenSecureChannel(response) = response else {
            error!("Expected an OpenSecureChannelResponse, got something else");
            return Err(StatusCode::BadUnknownResponse);
        };

        let mut secure_channel = self.secure_channel.write();
        secure_channel.set_remote_nonce_from_byte_string(&response.server_nonce)?;
        secure_channel
            .set_security_token(response.security_token.clone())
            .map_err(|e| e.status())?;
        debug!(
            "Secure channel {} token {} installed",
            response.security_token.channel_id, response.security_token.token_id
        );
        Ok(())
    }
}

/// Wrapper around an open secure channel.
pub struct AsyncSecureChannel {
    endpoint: EndpointDescription,
    session_retry_policy: SessionRetryPolicy,
    /// The channel security state, shared with the transport.
    pub(crate) secure_channel: Arc<RwLock<SecureChannel>>,
    transport_config: TransportConfiguration,
    state: SecureChannelState,
    certificate: Option<X509>,
    private_key: Option<PrivateKey>,
    issue_channel_lock: tokio::sync::Mutex<()>,
    connector: Box<dyn Connector>,
    channel_lifetime: u32,
    channel_state: tokio::sync::watch::Sender<ChannelState>,

    request_send: ArcSwapOption<RequestSend>,
}

/// The event loop of one established connection.
pub struct SecureChannelEventLoop {
    transport: TcpTransport,
}

impl SecureChannelEventLoop {
    /// Poll the connection, moving bytes in both directions.
    pub async fn poll(&mut self) -> TransportPollResult {
        self.transport.poll().await
    }
}

impl AsyncSecureChannel {
    /// Create a new client secure channel toward `endpoint`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: EndpointDescription,
        session_retry_policy: SessionRetryPolicy,
        auth_token: Arc<ArcSwap<NodeId>>,
        transport_config: TransportConfiguration,
        connector: Box<dyn Connector>,
        channel_lifetime: u32,
        certificate: Option<X509>,
        private_key: Option<PrivateKey>,
        decoding_options: DecodingOptions,
    ) -> Self {
        let secure_channel = Arc::new(RwLock::new(SecureChannel::new(
            Role::Client,
            decoding_options,
        )));
        let (channel_state, _) = tokio::sync::watch::channel(ChannelState::Init);

        Self {
            transport_config,
            issue_channel_lock: tokio::sync::Mutex::new(()),
            state: SecureChannelState::new(secure_channel.clone(), auth_token),
            endpoint,
            secure_channel,
            certificate,
            private_key,
            session_retry_policy,
            request_send: Default::default(),
            connector,
            channel_lifetime,
            channel_state,
        }
    }

    /// The current lifecycle state.
    pub fn channel_state(&self) -> ChannelState {
        *self.channel_state.borrow()
    }

    /// Subscribe to lifecycle transitions.
    pub fn subscribe_state(&self) -> tokio::sync::watch::Receiver<ChannelState> {
        self.channel_state.subscribe()
    }

    fn set_state(&self, state: ChannelState) {
        let _ = self.channel_state.send(state);
    }

    /// Get the next request handle on the channel.
    pub fn request_handle(&self) -> IntegerId {
        self.state.request_handle()
    }

    /// Mint a request header for a service call.
    pub fn make_request_header(&self, timeout: Duration) -> RequestHeader {
        self.state.make_request_header(timeout)
    }

    /// The client nonce of the last OPN exchange.
    pub fn client_nonce(&self) -> uasc_types::ByteString {
        self.secure_channel.read().local_nonce_as_byte_string()
    }

    /// The negotiated security policy.
    pub fn security_policy(&self) -> SecurityPolicy {
        self.secure_channel.read().security_policy()
    }

    /// Update the channel's view of the server from a CreateSession
    /// response: its nonce and certificate.
    pub fn update_from_created_session(
        &self,
        nonce: &uasc_types::ByteString,
        certificate: &uasc_types::ByteString,
    ) -> Result<(), StatusCode> {
        let mut secure_channel = self.secure_channel.write();
        secure_channel.set_remote_nonce_from_byte_string(nonce)?;
        secure_channel.set_remote_cert_from_byte_string(certificate)?;
        Ok(())
    }

    /// Send a message on the secure channel and wait for a response,
    /// renewing the security token first when 75% of its lifetime has
    /// elapsed.
    pub async fn send(
        &self,
        request: impl Into<RequestMessage>,
        timeout: Duration,
    ) -> Result<ResponseMessage, StatusCode> {
        let sender = self.request_send.load().as_deref().cloned();
        let Some(send) = sender else {
            return Err(StatusCode::BadServerNotConnected);
        };

        let should_renew_security_token = self.secure_channel.read().should_renew_security_token();
        if should_renew_security_token {
            // Hold the lock, then check again: many requests in quick
            // succession must produce a single renew, and a renew already in
            // progress must complete before this request goes out
            let guard = self.issue_channel_lock.lock().await;
            if self.secure_channel.read().should_renew_security_token() {
                self.set_state(ChannelState::ScConnectedRenew);
                let request = self.state.begin_issue_or_renew_secure_channel(
                    SecurityTokenRequestType::Renew,
                    self.channel_lifetime,
                    Duration::from_secs(30),
                    send.clone(),
                );
                let resp = request.send().await?;
                self.state.end_issue_or_renew_secure_channel(resp)?;
                self.set_state(ChannelState::ScConnected);
            }
            drop(guard);
        }

        Request::new(request.into(), send, timeout).send().await
    }

    /// Attempt to establish a connection using this channel, returning an
    /// event loop for polling the connection. Retries with the session's
    /// backoff policy.
    pub async fn connect(&self) -> Result<SecureChannelEventLoop, StatusCode> {
        self.request_send.store(None);
        let mut backoff = self.session_retry_policy.new_backoff();
        loop {
            match self.connect_no_retry().await {
                Ok(event_loop) => {
                    break Ok(event_loop);
                }
                Err(s) => {
                    self.set_state(ChannelState::Disconnected);
                    let Some(delay) = backoff.next() else {
                        break Err(s);
                    };
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Connect to the server without retrying on failure.
    pub async fn connect_no_retry(&self) -> Result<SecureChannelEventLoop, StatusCode> {
        {
            let mut secure_channel = self.secure_channel.write();
            secure_channel.clear_security_token();
        }
        self.set_state(ChannelState::Init);

        let (mut transport, send) = self.create_transport().await?;
        self.set_state(ChannelState::ScInit);

        let request = self.state.begin_issue_or_renew_secure_channel(
            SecurityTokenRequestType::Issue,
            self.channel_lifetime,
            Duration::from_secs(30),
            send.clone(),
        );
        self.set_state(ChannelState::ScConnecting);

        let request_fut = request.send();
        tokio::pin!(request_fut);

        // Poll the transport while waiting for the OPN response, it is the
        // transport that carries it
        let resp = loop {
            tokio::select! {
                r = &mut request_fut => break r?,
                r = transport.poll() => {
                    if let TransportPollResult::Closed(e) = r {
                        return Err(e);
                    }
                }
            }
        };

        self.request_send.store(Some(Arc::new(send)));
        self.state.end_issue_or_renew_secure_channel(resp)?;
        self.set_state(ChannelState::ScConnected);

        Ok(SecureChannelEventLoop { transport })
    }

    async fn create_transport(
        &self,
    ) -> Result<(TcpTransport, mpsc::Sender<super::state::OutgoingMessage>), StatusCode> {
        let endpoint_url = self.endpoint.endpoint_url.clone();
        let security_policy =
            SecurityPolicy::from_str(self.endpoint.security_policy_uri.as_ref())
                .map_err(|_| StatusCode::BadSecurityPolicyRejected)?;

        {
            let mut secure_channel = self.secure_channel.write();
            secure_channel.set_private_key(self.private_key.clone());
            secure_channel.set_cert(self.certificate.clone());
            secure_channel
                .set_security_policy(security_policy)
                .map_err(|e| e.status())?;
            secure_channel.set_security_mode(self.endpoint.security_mode);
            let _ = secure_channel
                .set_remote_cert_from_byte_string(&self.endpoint.server_certificate);
            debug!(
                "Connecting with policy {:?}, mode {:?}",
                security_policy, self.endpoint.security_mode
            );
        }

        if self.endpoint.security_mode != MessageSecurityMode::None
            && (self.certificate.is_none() || self.private_key.is_none())
        {
            error!("Secured endpoint requires an application certificate and private key");
            return Err(StatusCode::BadSecurityChecksFailed);
        }

        let (send, recv) = mpsc::channel(MAX_INFLIGHT_MESSAGES);
        let transport = self
            .connector
            .connect(
                self.secure_channel.clone(),
                recv,
                self.transport_config.clone(),
                endpoint_url.as_ref(),
            )
            .await?;
        self.set_state(ChannelState::TcpInitialized);

        Ok((transport, send))
    }

    /// Mark the channel as lost. Called by the owner of the event loop when
    /// polling reports a close.
    pub fn on_connection_lost(&self) {
        self.request_send.store(None);
        self.set_state(ChannelState::Disconnected);
    }

    /// Send a CloseSecureChannel and stop using the channel. The server does
    /// not respond; the connection just closes.
    pub async fn close_channel(&self) {
        let msg = CloseSecureChannelRequest {
            request_header: self.state.make_request_header(Duration::from_secs(60)),
        };

        let sender = self.request_send.load().as_deref().cloned();
        if let Some(sender) = sender {
            self.set_state(ChannelState::ScDisconnecting);
            let request = Request::new(msg, sender, Duration::from_secs(60));
            if let Err(e) = request.send_no_response().await {
                error!("Failed to send disconnect message, queue full: {e}");
            }
        }
    }
}
