//! The session event loop. It drives the connection: polling the transport,
//! noticing channel loss, orphaning the session and re-activating it on a
//! fresh channel, all without the application issuing anything.

use std::{
    sync::{atomic::Ordering, Arc},
    time::Instant,
};

use futures::{Stream, TryStreamExt};
use log::warn;

use uasc_types::StatusCode;

use crate::{
    retry::{ExponentialBackoff, SessionRetryPolicy},
    session::{session_warn, SessionState},
    transport::{SecureChannelEventLoop, TransportPollResult},
};

use super::{
    connect::{SessionConnectMode, SessionConnector},
    Session,
};

/// A list of possible events that happen while polling the session. The
/// application can use this to monitor connection state.
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionPollResult {
    /// A message was sent to or received from the server.
    Transport(TransportPollResult),
    /// Connection was lost with the inner status.
    ConnectionLost(StatusCode),
    /// Reconnecting to the server failed with the inner status.
    ReconnectFailed(StatusCode),
    /// Session was connected or reconnected in the given mode.
    Reconnected(SessionConnectMode),
    /// The session begins (re)connecting to the server.
    BeginConnect,
}

enum SessionEventLoopState {
    Connected(SecureChannelEventLoop),
    Connecting(SessionConnector, ExponentialBackoff, Instant),
    Disconnected,
}

/// The session event loop drives the client. It must be polled for anything
/// to happen at all.
#[must_use = "The session event loop must be started for the session to work"]
pub struct SessionEventLoop {
    inner: Arc<Session>,
    retry: SessionRetryPolicy,
}

impl SessionEventLoop {
    pub(crate) fn new(inner: Arc<Session>, retry: SessionRetryPolicy) -> Self {
        Self { inner, retry }
    }

    /// Convenience method for running the session event loop until
    /// completion: the session is closed manually, or reconnecting finally
    /// fails.
    pub async fn run(self) -> StatusCode {
        let stream = self.enter();
        tokio::pin!(stream);
        loop {
            let r = stream.try_next().await;
            match r {
                Ok(None) => break StatusCode::Good,
                Err(e) => break e,
                _ => (),
            }
        }
    }

    /// Convenience method for running the event loop on a tokio task.
    pub fn spawn(self) -> tokio::task::JoinHandle<StatusCode> {
        tokio::task::spawn(self.run())
    }

    /// Start the event loop, returning a stream that must be polled until it
    /// is closed. The stream ends with `None` when the session is closed
    /// manually, or an `Err` when the stream fails to reconnect after a loss
    /// of connection.
    pub fn enter(self) -> impl Stream<Item = Result<SessionPollResult, StatusCode>> {
        futures::stream::try_unfold(
            (self, SessionEventLoopState::Disconnected),
            |(slf, state)| async move {
                let (res, state) = match state {
                    SessionEventLoopState::Connected(mut channel) => {
                        let r = channel.poll().await;
                        if let TransportPollResult::Closed(code) = r {
                            session_warn!(slf.inner, "Transport disconnected: {code}");
                            slf.inner.channel.on_connection_lost();

                            let should_reconnect =
                                slf.inner.should_reconnect.load(Ordering::Relaxed);
                            if !should_reconnect
                                || slf.inner.state() == SessionState::Closed
                            {
                                slf.inner.set_state(SessionState::Closed);
                                return Ok(None);
                            }

                            // The session outlives its channel: it becomes
                            // orphaned and a reconnect is scheduled at once
                            slf.inner.set_state(SessionState::Orphaned);
                            Ok((
                                SessionPollResult::ConnectionLost(code),
                                SessionEventLoopState::Disconnected,
                            ))
                        } else {
                            Ok((
                                SessionPollResult::Transport(r),
                                SessionEventLoopState::Connected(channel),
                            ))
                        }
                    }
                    SessionEventLoopState::Disconnected => {
                        let connector = SessionConnector::new(slf.inner.clone());
                        Ok((
                            SessionPollResult::BeginConnect,
                            SessionEventLoopState::Connecting(
                                connector,
                                slf.retry.new_backoff(),
                                Instant::now(),
                            ),
                        ))
                    }
                    SessionEventLoopState::Connecting(connector, mut backoff, next_try) => {
                        tokio::time::sleep_until(next_try.into()).await;

                        match connector.try_connect().await {
                            Ok((channel, result)) => Ok((
                                SessionPollResult::Reconnected(result),
                                SessionEventLoopState::Connected(channel),
                            )),
                            Err(e) => {
                                warn!("Failed to connect to server, status code: {e}");
                                match backoff.next() {
                                    Some(x) => Ok((
                                        SessionPollResult::ReconnectFailed(e),
                                        SessionEventLoopState::Connecting(
                                            connector,
                                            backoff,
                                            Instant::now() + x,
                                        ),
                                    )),
                                    None => Err(e),
                                }
                            }
                        }
                    }
                }?;

                Ok(Some((res, (slf, state))))
            },
        )
    }
}
