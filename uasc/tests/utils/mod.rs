//! Shared harness for the end to end tests: an in-process server with a
//! small test service handler, and a TCP proxy whose connections can be
//! severed to simulate channel loss.

pub mod dbglogger;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Notify,
};

use uasc::client::{Client, ClientConfig, Session, SessionEvent};
use uasc::core::{RequestMessage, ResponseMessage};
use uasc::server::{ServerBuilder, ServerConfig, ServerHandle, ServiceHandler, SessionUser};
use uasc::types::{
    DataValue, EndpointDescription, NodeId, ReadResponse, ResponseHeader, StatusCode, Variant,
    WriteResponse,
};

/// A service handler that answers reads with `Int32` values derived from the
/// node id, and writes with `Good`. Optionally pauses to provoke timeouts.
pub struct TestHandler {
    pub paused: AtomicBool,
}

impl Default for TestHandler {
    fn default() -> Self {
        Self {
            paused: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ServiceHandler for TestHandler {
    async fn handle(
        &self,
        request: &RequestMessage,
        _user: &SessionUser,
        _session_id: &NodeId,
    ) -> ResponseMessage {
        if self.paused.load(Ordering::Relaxed) {
            // Simulates a server that cannot answer in time
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        match request {
            RequestMessage::Read(read) => {
                let results: Vec<DataValue> = read
                    .nodes_to_read
                    .iter()
                    .flatten()
                    .map(|n| {
                        DataValue::new_now(Variant::Int32(
                            n.node_id.as_u32().unwrap_or(0) as i32
                        ))
                    })
                    .collect();
                ReadResponse {
                    response_header: ResponseHeader::new_good(&read.request_header),
                    results: Some(results),
                    diagnostic_infos: None,
                }
                .into()
            }
            RequestMessage::Write(write) => WriteResponse {
                response_header: ResponseHeader::new_good(&write.request_header),
                results: Some(
                    write
                        .nodes_to_write
                        .iter()
                        .flatten()
                        .map(|_| StatusCode::Good)
                        .collect(),
                ),
                diagnostic_infos: None,
            }
            .into(),
            other => ResponseMessage::service_fault(
                other.request_header().request_handle,
                StatusCode::BadServiceUnsupported,
            ),
        }
    }
}

/// A running test server bound to an ephemeral port.
pub struct TestServer {
    pub handle: ServerHandle,
    pub handler: Arc<TestHandler>,
    pub url: String,
}

impl TestServer {
    /// Start a server with the given config adjustments applied.
    pub async fn start(adjust: impl FnOnce(&mut ServerConfig)) -> TestServer {
        let mut config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        adjust(&mut config);

        let handler = Arc::new(TestHandler::default());
        let (server, handle) = ServerBuilder::new(config)
            .service_handler(handler.clone())
            .build()
            .expect("server config valid");
        tokio::spawn(server.run());

        // Wait for the listener to bind
        let addr = loop {
            if let Some(addr) = handle.bound_address() {
                break addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        TestServer {
            handle,
            handler,
            url: format!("opc.tcp://{}:{}", addr.ip(), addr.port()),
        }
    }
}

/// Build a client session against `url` with a short request timeout and
/// spawn its event loop.
pub fn connect_session(
    url: &str,
    adjust: impl FnOnce(&mut ClientConfig),
) -> (
    Arc<Session>,
    tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
) {
    let mut config = ClientConfig {
        request_timeout_ms: 5_000,
        ..Default::default()
    };
    adjust(&mut config);
    let client = Client::new(config);
    let endpoint = EndpointDescription::from(url);
    let (session, event_loop, events) =
        client.new_session_from_endpoint(endpoint, Default::default());
    let _handle: tokio::task::JoinHandle<StatusCode> = event_loop.spawn();
    (session, events)
}

/// Wait for a specific event, failing after a timeout. Other events are
/// consumed and discarded.
pub async fn expect_event<F: Fn(&SessionEvent) -> bool>(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
    predicate: F,
    what: &str,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(10), async move {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                break event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

/// A byte-forwarding TCP proxy whose live connections can be severed on
/// command, to simulate losing the secure channel under a session.
pub struct ChaosProxy {
    pub url: String,
    kill: Arc<Notify>,
}

impl ChaosProxy {
    /// Start a proxy forwarding to `target` (host:port).
    pub async fn start(target: std::net::SocketAddr) -> ChaosProxy {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
        let addr = listener.local_addr().expect("proxy addr");
        let kill = Arc::new(Notify::new());

        let kill_inner = kill.clone();
        tokio::spawn(async move {
            loop {
                let Ok((client, _)) = listener.accept().await else {
                    break;
                };
                let kill = kill_inner.clone();
                tokio::spawn(async move {
                    let Ok(server) = TcpStream::connect(target).await else {
                        return;
                    };
                    Self::forward(client, server, kill).await;
                });
            }
        });

        ChaosProxy {
            url: format!("opc.tcp://{}:{}", addr.ip(), addr.port()),
            kill,
        }
    }

    /// Abort every live proxied connection.
    pub fn sever(&self) {
        self.kill.notify_waiters();
    }

    async fn forward(client: TcpStream, server: TcpStream, kill: Arc<Notify>) {
        let (mut client_read, mut client_write) = client.into_split();
        let (mut server_read, mut server_write) = server.into_split();

        let upstream = async move {
            let mut buf = [0u8; 4096];
            loop {
                match client_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if server_write.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        };
        let downstream = async move {
            let mut buf = [0u8; 4096];
            loop {
                match server_read.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if client_write.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        };

        tokio::select! {
            _ = kill.notified() => {}
            _ = async { tokio::join!(upstream, downstream) } => {}
        }
        // Dropping the halves closes both directions
    }
}

// Not every test uses every helper
#[allow(unused)]
pub use uasc::types::ReadValueId;
