//! The per-connection driver: owns the secure channel and transport of one
//! TCP connection, handles the OpenSecureChannel handshake and renewals, and
//! feeds decoded requests into the message handler. Responses are sent as
//! they complete, out of order when the handler finishes them out of order;
//! every request id is answered exactly once.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use log::{debug, error, warn};
use tokio_util::sync::CancellationToken;

use uasc_core::{
    comms::{
        secure_channel::{Role, SecureChannel},
        tcp_types::ErrorMessage,
    },
    RequestMessage, ResponseMessage,
};
use uasc_crypto::{CryptoProfile, SecurityPolicy, X509};
use uasc_types::{
    ChannelSecurityToken, DateTime, MessageSecurityMode, OpenSecureChannelRequest,
    OpenSecureChannelResponse, ResponseHeader, SecurityTokenRequestType, StatusCode,
};

use crate::{
    info::ServerInfo,
    session::MessageHandler,
    transport::{Request, TcpTransport, TransportPollResult},
};

static NEXT_CHANNEL_ID: AtomicU32 = AtomicU32::new(1);

/// A snapshot of the channel facts request handling needs, detached from the
/// live [`SecureChannel`] so handlers can run while the transport keeps
/// polling.
#[derive(Clone)]
pub struct ChannelContext {
    /// Runtime id of the secure channel.
    pub secure_channel_id: u32,
    /// Negotiated security policy.
    pub security_policy: SecurityPolicy,
    /// Negotiated security mode.
    pub security_mode: MessageSecurityMode,
    /// The client certificate, when the policy carries one.
    pub remote_cert: Option<X509>,
    /// The crypto profile of the policy.
    pub profile: Arc<dyn CryptoProfile>,
}

/// Drives one connection from accept to close.
pub struct SessionController {
    channel: SecureChannel,
    transport: TcpTransport,
    info: Arc<ServerInfo>,
    handler: Arc<MessageHandler>,
    token: CancellationToken,
    pending: FuturesUnordered<BoxFuture<'static, (u32, ResponseMessage)>>,
    token_counter: u32,
    channel_established: bool,
}

impl SessionController {
    /// Create a controller for a freshly accepted transport.
    pub fn new(
        transport: TcpTransport,
        info: Arc<ServerInfo>,
        handler: Arc<MessageHandler>,
        token: CancellationToken,
    ) -> SessionController {
        let mut channel = SecureChannel::new(Role::Server, info.decoding_options());
        // A secured OPN is decrypted with the server key and answered
        // encrypted to the client certificate, both must be in place before
        // the first chunk arrives
        channel.set_cert(info.server_certificate.clone());
        channel.set_private_key(info.server_pkey.clone());
        SessionController {
            channel,
            transport,
            info,
            handler,
            token,
            pending: FuturesUnordered::new(),
            token_counter: 0,
            channel_established: false,
        }
    }

    fn context(&self) -> ChannelContext {
        ChannelContext {
            secure_channel_id: self.channel.secure_channel_id(),
            security_policy: self.channel.security_policy(),
            security_mode: self.channel.security_mode(),
            remote_cert: self.channel.remote_cert().cloned(),
            profile: self.channel.profile().clone(),
        }
    }

    /// Run the connection until it closes. Returns the channel id, 0 when no
    /// channel was ever established.
    pub async fn run(mut self) -> u32 {
        loop {
            // Tokens have a bounded validity: when the client neither renews
            // nor talks, the channel dies
            let token_deadline = self.channel.has_valid_token().then(|| {
                self.channel.token_renewal_deadline()
            });

            tokio::select! {
                _ = self.token.cancelled() => {
                    self.fatal_error(StatusCode::BadServerHalted, "Server halted");
                    let _ = self.drain().await;
                    break;
                }
                _ = async {
                    match token_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                        None => futures::future::pending().await,
                    }
                } => {
                    if self.channel_established {
                        warn!(
                            "Channel {} token expired without renewal, closing",
                            self.channel.secure_channel_id()
                        );
                        break;
                    }
                }
                Some((request_id, response)) = self.pending.next(), if !self.pending.is_empty() => {
                    if self
                        .transport
                        .enqueue_message_for_send(&mut self.channel, response, request_id)
                        .is_err()
                    {
                        break;
                    }
                }
                r = self.transport.poll(&mut self.channel) => {
                    match r {
                        TransportPollResult::OutgoingMessageSent
                        | TransportPollResult::IncomingChunk => {}
                        TransportPollResult::IncomingMessage(request) => {
                            if !self.handle_request(request) {
                                break;
                            }
                        }
                        TransportPollResult::RecoverableError(status, request_id, request_handle) => {
                            debug!("Recoverable error {status}, faulting request {request_id}");
                            let fault = ResponseMessage::service_fault(request_handle, status);
                            if self
                                .transport
                                .enqueue_message_for_send(&mut self.channel, fault, request_id)
                                .is_err()
                            {
                                break;
                            }
                        }
                        TransportPollResult::Error(status) => {
                            self.fatal_error(status, "Protocol error");
                            let _ = self.drain().await;
                            break;
                        }
                        TransportPollResult::Closed => break,
                    }
                }
            }
        }

        let channel_id = self.channel.secure_channel_id();
        // Sessions bound to this channel become orphans, eligible for
        // re-activation on another channel until they time out
        self.handler.session_manager().secure_channel_lost(channel_id);
        channel_id
    }

    /// Queue an ERR for protocol violations. Security failures close the
    /// connection silently so they cannot be used as an oracle.
    fn fatal_error(&mut self, status: StatusCode, reason: &str) {
        if status != StatusCode::BadSecurityChecksFailed {
            self.transport
                .enqueue_error(ErrorMessage::new(status, reason));
        }
        self.transport.set_closing();
    }

    /// Poll until the staged error or final message is flushed.
    async fn drain(&mut self) -> StatusCode {
        loop {
            match self.transport.poll(&mut self.channel).await {
                TransportPollResult::Closed | TransportPollResult::Error(_) => {
                    break StatusCode::Good
                }
                _ => {}
            }
        }
    }

    /// Handle one decoded request. Returns `false` when the connection must
    /// close.
    fn handle_request(&mut self, request: Request) -> bool {
        match request.message {
            RequestMessage::OpenSecureChannel(r) => {
                match self.open_secure_channel(&r) {
                    Ok(response) => {
                        if self
                            .transport
                            .enqueue_message_for_send(
                                &mut self.channel,
                                response.into(),
                                request.request_id,
                            )
                            .is_err()
                        {
                            return false;
                        }
                        // The receive direction resets its sequence
                        // expectation right after an OPN
                        self.transport.reset_sequence_expectation();
                        true
                    }
                    Err(status) => {
                        self.fatal_error(status, "OpenSecureChannel failed");
                        true
                    }
                }
            }
            RequestMessage::CloseSecureChannel(_) => {
                debug!(
                    "Closing channel {} on client request",
                    self.channel.secure_channel_id()
                );
                // No response is sent to a CloseSecureChannel
                self.transport.set_closing();
                true
            }
            message => {
                if !self.channel_established {
                    error!("Service request before the channel was established");
                    self.fatal_error(
                        StatusCode::BadSecureChannelIdInvalid,
                        "No secure channel established",
                    );
                    return true;
                }
                let ctx = self.context();
                let handler = self.handler.clone();
                let request_id = request.request_id;
                self.pending.push(
                    async move { (request_id, handler.handle(&ctx, message).await) }.boxed(),
                );
                true
            }
        }
    }

    fn open_secure_channel(
        &mut self,
        request: &OpenSecureChannelRequest,
    ) -> Result<OpenSecureChannelResponse, StatusCode> {
        match request.request_type {
            SecurityTokenRequestType::Issue => {
                if self.channel_established {
                    error!("OPN(Issue) on an already established channel");
                    return Err(StatusCode::BadSecurityChecksFailed);
                }
                // The security policy was taken from the asymmetric header
                // when the chunk was decrypted; the mode comes from the
                // request body and must name a configured endpoint
                let policy = self.channel.security_policy();
                let mode = request.security_mode;
                if !self.mode_supported(policy, mode) {
                    error!(
                        "No endpoint is configured for policy {} mode {:?}",
                        policy, mode
                    );
                    return Err(StatusCode::BadSecurityModeRejected);
                }
                self.channel.set_security_mode(mode);
                self.channel
                    .set_secure_channel_id(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed));
            }
            SecurityTokenRequestType::Renew => {
                if !self.channel_established {
                    error!("OPN(Renew) with no established channel");
                    return Err(StatusCode::BadSecureChannelIdInvalid);
                }
                if request.security_mode != self.channel.security_mode() {
                    error!("OPN(Renew) attempted to change the security mode");
                    return Err(StatusCode::BadSecurityChecksFailed);
                }
            }
        }

        self.channel
            .set_remote_nonce_from_byte_string(&request.client_nonce)?;
        self.channel.create_random_nonce();

        // Fresh token id and clamped lifetime for issue and renew alike
        self.token_counter = self.token_counter.wrapping_add(1).max(1);
        let token = ChannelSecurityToken {
            channel_id: self.channel.secure_channel_id(),
            token_id: self.token_counter,
            created_at: DateTime::now(),
            revised_lifetime: self
                .info
                .config
                .limits
                .clamp_token_lifetime(request.requested_lifetime),
        };
        let server_nonce = self.channel.local_nonce_as_byte_string();
        self.channel
            .set_security_token(token.clone())
            .map_err(|e| e.status())?;
        self.channel_established = true;

        debug!(
            "Channel {} issued token {} with lifetime {} ms",
            token.channel_id, token.token_id, token.revised_lifetime
        );

        Ok(OpenSecureChannelResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            server_protocol_version: 0,
            security_token: token,
            server_nonce,
        })
    }

    fn mode_supported(&self, policy: SecurityPolicy, mode: MessageSecurityMode) -> bool {
        self.info.config.endpoints.iter().any(|e| {
            SecurityPolicy::from_uri(&e.security_policy_uri) == policy
                && matches!(
                    (e.security_mode.as_str(), mode),
                    ("None", MessageSecurityMode::None)
                        | ("Sign", MessageSecurityMode::Sign)
                        | ("SignAndEncrypt", MessageSecurityMode::SignAndEncrypt)
                )
        })
    }
}
