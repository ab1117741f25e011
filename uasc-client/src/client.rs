//! The client entry point: discovery of server endpoints and construction of
//! sessions.

use std::sync::Arc;

use log::error;
use tokio::sync::mpsc;

use uasc_core::ResponseMessage;
use uasc_crypto::{PrivateKey, SecurityPolicy, X509};
use uasc_types::{
    EndpointDescription, GetEndpointsRequest, MessageSecurityMode, StatusCode, UAString,
};

use crate::{
    config::ClientConfig,
    session::{process_service_result, process_unexpected_response, Session, SessionEventLoop},
    transport::{AsyncSecureChannel, TcpConnector, TransportConfiguration, TransportPollResult},
    IdentityToken, SessionEvent,
};

/// An OPC UA client. Discovers endpoints and creates sessions according to
/// its configuration.
pub struct Client {
    config: ClientConfig,
    certificate: Option<X509>,
    private_key: Option<PrivateKey>,
}

impl Client {
    /// Create a client from its configuration, without an application
    /// certificate. Only `None` security endpoints will work.
    pub fn new(config: ClientConfig) -> Client {
        Client {
            config,
            certificate: None,
            private_key: None,
        }
    }

    /// Create a client with an application certificate and private key for
    /// secured endpoints.
    pub fn new_with_certificate(
        config: ClientConfig,
        certificate: X509,
        private_key: PrivateKey,
    ) -> Client {
        Client {
            config,
            certificate: Some(certificate),
            private_key: Some(private_key),
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn transport_config(&self) -> TransportConfiguration {
        TransportConfiguration {
            max_pending_incoming: 16384,
            send_buffer_size: self.config.transport_limits.send_buffer_size,
            recv_buffer_size: self.config.transport_limits.recv_buffer_size,
            max_message_size: self.config.transport_limits.max_message_size,
            max_chunk_count: self.config.transport_limits.max_chunk_count,
        }
    }

    /// Ask the server behind `endpoint_url` for its endpoints, over an
    /// unsecured channel and without a session.
    pub async fn get_server_endpoints(
        &self,
        endpoint_url: &str,
    ) -> Result<Vec<EndpointDescription>, StatusCode> {
        let endpoint = EndpointDescription::from(endpoint_url);
        let channel = AsyncSecureChannel::new(
            endpoint,
            self.config.session_retry_policy.clone(),
            Default::default(),
            self.transport_config(),
            Box::new(TcpConnector),
            self.config.channel_lifetime_ms,
            None,
            None,
            Default::default(),
        );

        let mut event_loop = channel.connect_no_retry().await?;

        let request = GetEndpointsRequest {
            request_header: channel.make_request_header(self.config.request_timeout()),
            endpoint_url: UAString::from(endpoint_url),
            locale_ids: None,
            profile_uris: None,
        };

        let request_fut = channel.send(request, self.config.request_timeout());
        tokio::pin!(request_fut);
        let response = loop {
            tokio::select! {
                r = &mut request_fut => break r,
                r = event_loop.poll() => {
                    if let TransportPollResult::Closed(e) = r {
                        error!("Connection closed while waiting for endpoints: {e}");
                        return Err(e);
                    }
                }
            }
        }?;

        channel.close_channel().await;
        // Drain the transport until the close goes out
        loop {
            if let TransportPollResult::Closed(_) = event_loop.poll().await {
                break;
            }
        }

        let ResponseMessage::GetEndpoints(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;
        Ok(response.endpoints.unwrap_or_default())
    }

    /// Create a session against `endpoint` with the given user identity.
    /// Returns the session, the event loop that must be polled to drive it,
    /// and the application event queue.
    pub fn new_session_from_endpoint(
        &self,
        endpoint: EndpointDescription,
        identity_token: IdentityToken,
    ) -> (
        Arc<Session>,
        SessionEventLoop,
        mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        Session::new(
            &self.config,
            endpoint,
            identity_token,
            self.certificate.clone(),
            self.private_key.clone(),
        )
    }

    /// Find an endpoint in `endpoints` matching the given security policy
    /// and mode.
    pub fn find_matching_endpoint(
        endpoints: &[EndpointDescription],
        security_policy: SecurityPolicy,
        security_mode: MessageSecurityMode,
    ) -> Option<EndpointDescription> {
        endpoints
            .iter()
            .find(|e| {
                SecurityPolicy::from_uri(e.security_policy_uri.as_ref()) == security_policy
                    && e.security_mode == security_mode
            })
            .cloned()
    }
}
