//! The server: listener, connection lifecycle, session expiry and shutdown
//! synchronization.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::{stream::FuturesUnordered, StreamExt};
use log::{error, info, warn};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use uasc_core::{RequestMessage, ResponseMessage};
use uasc_crypto::{AcceptAll, Pki, PrivateKey, X509};
use uasc_types::StatusCode;

use crate::{
    authenticator::{AuthManager, DefaultAuthenticator, UserToken, ANONYMOUS_USER_TOKEN},
    authorization::{AllowAll, AuthorizationManager},
    channel::SessionController,
    config::ServerConfig,
    info::ServerInfo,
    service::{DefaultServiceHandler, ServiceHandler, SessionUser},
    session::{MessageHandler, SessionManager},
    transport::{TcpConnector, TransportConfig},
};

/// Events surfaced to the embedder while the server runs.
#[derive(Debug)]
pub enum ServerEvent {
    /// The listener closed, voluntarily or not.
    ClosedEndpoint {
        /// Why the listener closed.
        status: StatusCode,
    },
    /// Response to a request posted with [`ServerHandle::local_service_async`].
    LocalServiceResponse {
        /// The response produced by the service handler.
        response: Box<ResponseMessage>,
        /// The context value given at call time.
        app_ctx: u64,
    },
}

/// The server. Consumed by [`Server::run`]; interactions while it runs go
/// through the [`ServerHandle`].
pub struct Server {
    config: Arc<ServerConfig>,
    info: Arc<ServerInfo>,
    session_manager: Arc<SessionManager>,
    handler: Arc<MessageHandler>,
    token: CancellationToken,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    /// Woken when the set of connections shrinks, for shutdown waiting.
    connections_changed: Arc<Notify>,
    bound_addr: Arc<parking_lot::Mutex<Option<SocketAddr>>>,
}

/// Builder-style construction of a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    certificate: Option<X509>,
    private_key: Option<PrivateKey>,
    authenticator: Arc<dyn AuthManager>,
    authorization: Arc<dyn AuthorizationManager>,
    pki: Arc<dyn Pki>,
    service_handler: Arc<dyn ServiceHandler>,
}

impl ServerBuilder {
    /// Start building a server from its configuration.
    pub fn new(config: ServerConfig) -> ServerBuilder {
        ServerBuilder {
            config,
            certificate: None,
            private_key: None,
            authenticator: Arc::new(DefaultAuthenticator),
            authorization: Arc::new(AllowAll),
            pki: Arc::new(AcceptAll),
            service_handler: Arc::new(DefaultServiceHandler),
        }
    }

    /// Set the application certificate and private key, required for
    /// secured endpoints.
    pub fn certificate(mut self, certificate: X509, private_key: PrivateKey) -> Self {
        self.certificate = Some(certificate);
        self.private_key = Some(private_key);
        self
    }

    /// Set the authentication manager.
    pub fn authenticator(mut self, authenticator: Arc<dyn AuthManager>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Set the authorization manager.
    pub fn authorization(mut self, authorization: Arc<dyn AuthorizationManager>) -> Self {
        self.authorization = authorization;
        self
    }

    /// Set the PKI used to validate peer certificates.
    pub fn pki(mut self, pki: Arc<dyn Pki>) -> Self {
        self.pki = pki;
        self
    }

    /// Set the service handler answering non-session-treatment services.
    pub fn service_handler(mut self, service_handler: Arc<dyn ServiceHandler>) -> Self {
        self.service_handler = service_handler;
        self
    }

    /// Build the server and its handle.
    pub fn build(self) -> Result<(Server, ServerHandle), String> {
        let errors = self.config.validate();
        if !errors.is_empty() {
            return Err(format!("Configuration is invalid: {}", errors.join(", ")));
        }
        if self.certificate.is_none()
            && self
                .config
                .endpoints
                .iter()
                .any(|e| e.security_mode != "None")
        {
            warn!("Server has secured endpoints but no certificate; they will not function");
        }

        let config = Arc::new(self.config);
        let info = Arc::new(ServerInfo {
            config: config.clone(),
            server_certificate: self.certificate,
            server_pkey: self.private_key,
            authenticator: self.authenticator,
            authorization: self.authorization,
            pki: self.pki,
            service_handler: self.service_handler,
        });
        let session_manager = Arc::new(SessionManager::new(info.clone()));
        let handler = Arc::new(MessageHandler::new(info.clone(), session_manager.clone()));
        let token = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let bound_addr = Arc::new(parking_lot::Mutex::new(None));

        let server = Server {
            config,
            info: info.clone(),
            session_manager: session_manager.clone(),
            handler,
            token: token.clone(),
            event_tx,
            connections_changed: Arc::new(Notify::new()),
            bound_addr: bound_addr.clone(),
        };
        let handle = ServerHandle {
            info,
            session_manager,
            token,
            event_tx: server.event_tx.clone(),
            event_rx: Some(event_rx),
            bound_addr,
        };
        Ok((server, handle))
    }
}

/// Handle to a running server: shutdown, local service invocation and the
/// application event queue.
pub struct ServerHandle {
    info: Arc<ServerInfo>,
    session_manager: Arc<SessionManager>,
    token: CancellationToken,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    bound_addr: Arc<parking_lot::Mutex<Option<SocketAddr>>>,
}

impl ServerHandle {
    /// Take the application event queue. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// The address the listener actually bound, useful with port 0.
    pub fn bound_address(&self) -> Option<SocketAddr> {
        *self.bound_addr.lock()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.session_manager.len()
    }

    /// Invoke a service locally, bypassing the channel and session machinery
    /// entirely. The request runs as the anonymous local user.
    pub async fn local_service(&self, request: RequestMessage) -> ResponseMessage {
        let user = SessionUser {
            token: UserToken(ANONYMOUS_USER_TOKEN.to_string()),
            authorization: self.info.authorization.clone(),
        };
        self.info
            .service_handler
            .handle(&request, &user, &uasc_types::NodeId::null())
            .await
    }

    /// Post a local service request; its response arrives on the event
    /// queue as [`ServerEvent::LocalServiceResponse`].
    pub fn local_service_async(&self, request: RequestMessage, app_ctx: u64) {
        let info = self.info.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let user = SessionUser {
                token: UserToken(ANONYMOUS_USER_TOKEN.to_string()),
                authorization: info.authorization.clone(),
            };
            let response = info
                .service_handler
                .handle(&request, &user, &uasc_types::NodeId::null())
                .await;
            let _ = event_tx.send(ServerEvent::LocalServiceResponse {
                response: Box::new(response),
                app_ctx,
            });
        });
    }

    /// Ask the server to stop: the listener closes, connections are
    /// cancelled, and [`Server::run`] returns once everything is down.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Server {
    /// Build a server accepting `config` with all-default capabilities.
    pub fn new(config: ServerConfig) -> Result<(Server, ServerHandle), String> {
        ServerBuilder::new(config).build()
    }

    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            send_buffer_size: self.config.limits.send_buffer_size,
            receive_buffer_size: self.config.limits.receive_buffer_size,
            max_message_size: self.config.limits.max_message_size,
            max_chunk_count: self.config.limits.max_chunk_count,
            hello_timeout: self.config.limits.hello_timeout(),
        }
    }

    /// Run the server until [`ServerHandle::shutdown`] is called. Returns
    /// once the listener is closed, every connection has terminated and
    /// every session is gone.
    pub async fn run(self) -> Result<(), StatusCode> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            error!("Cannot bind listener to {}: {}", addr, e);
            StatusCode::BadResourceUnavailable
        })?;
        let bound = listener.local_addr().ok();
        *self.bound_addr.lock() = bound;
        info!("Server listening on {:?}", bound);

        let mut connections: FuturesUnordered<JoinHandle<u32>> = FuturesUnordered::new();
        let mut expiry_interval = tokio::time::interval(Duration::from_millis(500));
        expiry_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let status = loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    break StatusCode::Good;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            if connections.len() >= self.config.limits.max_connections {
                                warn!("Refusing connection from {}: connection limit reached", peer);
                                // Dropping the stream closes it; the client
                                // sees a rejected connection
                                continue;
                            }
                            info!("Accepted connection from {}", peer);
                            let connector = TcpConnector::new(
                                stream,
                                self.transport_config(),
                                self.info.decoding_options(),
                            );
                            let info = self.info.clone();
                            let handler = self.handler.clone();
                            let token = self.token.child_token();
                            let notify = self.connections_changed.clone();
                            connections.push(tokio::spawn(async move {
                                let id = match connector.connect(info.clone(), token.clone()).await {
                                    Ok(transport) => {
                                        SessionController::new(transport, info, handler, token)
                                            .run()
                                            .await
                                    }
                                    Err(e) => {
                                        warn!("Connection handshake failed: {e}");
                                        0
                                    }
                                };
                                notify.notify_waiters();
                                id
                            }));
                        }
                        Err(e) => {
                            error!("Listener accept failed: {e}");
                            break StatusCode::BadCommunicationError;
                        }
                    }
                }
                Some(finished) = connections.next(), if !connections.is_empty() => {
                    match finished {
                        Ok(channel_id) => info!("Connection for channel {} terminated", channel_id),
                        Err(e) => error!("Connection task panicked: {e}"),
                    }
                }
                _ = expiry_interval.tick() => {
                    let (_, expired) = self.session_manager.check_session_expiry();
                    for id in expired {
                        self.session_manager.expire_session(&id);
                    }
                }
            }
        };

        // Shutdown: stop accepting, cancel the connections and wait for all
        // of them to confirm termination before reporting closed
        drop(listener);
        self.token.cancel();
        while let Some(finished) = connections.next().await {
            if let Err(e) = finished {
                error!("Connection task panicked during shutdown: {e}");
            }
        }

        let _ = self.event_tx.send(ServerEvent::ClosedEndpoint { status });
        info!(
            "Server stopped with {} sessions remaining in the arena",
            self.session_manager.len()
        );
        if status.is_good() {
            Ok(())
        } else {
            Err(status)
        }
    }

}
