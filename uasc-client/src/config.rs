//! Client configuration surface. The embedder builds this in code or
//! deserializes it from whatever format they use; the stack only reads it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::SessionRetryPolicy;

/// Transport limits the client announces in its hello message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportLimits {
    /// Largest chunk the client accepts.
    pub recv_buffer_size: usize,
    /// Largest chunk the client sends.
    pub send_buffer_size: usize,
    /// Largest reassembled message, 0 for no limit.
    pub max_message_size: usize,
    /// Most chunks per message, 0 for no limit.
    pub max_chunk_count: usize,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            recv_buffer_size: 65536,
            send_buffer_size: 65536,
            max_message_size: 2 * 1024 * 1024,
            max_chunk_count: 64,
        }
    }
}

/// Configuration of a UASC client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Name of the client application.
    pub application_name: String,
    /// URI of the client application, matched against its certificate.
    pub application_uri: String,
    /// URI of the product.
    pub product_uri: String,
    /// Name given to created sessions.
    pub session_name: String,
    /// Requested session timeout in milliseconds.
    pub session_timeout_ms: u64,
    /// Default timeout applied to service calls.
    pub request_timeout_ms: u64,
    /// Requested secure channel token lifetime in milliseconds.
    pub channel_lifetime_ms: u32,
    /// Transport limits announced in the hello message.
    pub transport_limits: TransportLimits,
    /// Reconnect policy after connection loss.
    pub session_retry_policy: SessionRetryPolicy,
    /// Locales in order of preference.
    pub preferred_locales: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application_name: "UASC client".to_string(),
            application_uri: "urn:uasc:client".to_string(),
            product_uri: "urn:uasc".to_string(),
            session_name: "UASC session".to_string(),
            session_timeout_ms: 60_000,
            request_timeout_ms: 30_000,
            channel_lifetime_ms: 3_600_000,
            transport_limits: TransportLimits::default(),
            session_retry_policy: SessionRetryPolicy::default(),
            preferred_locales: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// The default request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
