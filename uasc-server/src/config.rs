//! Server configuration surface. Registries here are written once during
//! initialization and read-only afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits the server enforces on transports, sessions and tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerLimits {
    /// Most concurrent TCP connections.
    pub max_connections: usize,
    /// Most concurrent sessions.
    pub max_sessions: usize,
    /// Largest chunk the server sends.
    pub send_buffer_size: usize,
    /// Largest chunk the server accepts.
    pub receive_buffer_size: usize,
    /// Largest reassembled message, 0 for no limit.
    pub max_message_size: usize,
    /// Most chunks per message, 0 for no limit.
    pub max_chunk_count: usize,
    /// How long a fresh connection may take to say hello.
    pub hello_timeout_ms: u64,
    /// Smallest secure channel token lifetime granted.
    pub min_token_lifetime_ms: u32,
    /// Largest secure channel token lifetime granted.
    pub max_token_lifetime_ms: u32,
    /// Smallest session timeout granted.
    pub min_session_timeout_ms: u64,
    /// Largest session timeout granted.
    pub max_session_timeout_ms: u64,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_sessions: 100,
            send_buffer_size: 65536,
            receive_buffer_size: 65536,
            max_message_size: 2 * 1024 * 1024,
            max_chunk_count: 64,
            hello_timeout_ms: 5_000,
            min_token_lifetime_ms: 10_000,
            max_token_lifetime_ms: 3_600_000,
            min_session_timeout_ms: 1_000,
            max_session_timeout_ms: 600_000,
        }
    }
}

impl ServerLimits {
    /// The hello timeout as a duration.
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_millis(self.hello_timeout_ms)
    }

    /// Clamp a requested token lifetime into the configured range.
    pub fn clamp_token_lifetime(&self, requested_ms: u32) -> u32 {
        if requested_ms == 0 {
            self.max_token_lifetime_ms
        } else {
            requested_ms.clamp(self.min_token_lifetime_ms, self.max_token_lifetime_ms)
        }
    }

    /// Clamp a requested session timeout into the configured range.
    pub fn clamp_session_timeout(&self, requested_ms: f64) -> u64 {
        if !requested_ms.is_finite() || requested_ms <= 0.0 {
            self.max_session_timeout_ms
        } else {
            (requested_ms as u64).clamp(self.min_session_timeout_ms, self.max_session_timeout_ms)
        }
    }
}

/// One endpoint the server offers: a path plus a security policy, mode and
/// the user token kinds accepted there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerEndpoint {
    /// Path below the base address, e.g. "/".
    pub path: String,
    /// Security policy URI.
    pub security_policy_uri: String,
    /// Security mode name: "None", "Sign" or "SignAndEncrypt".
    pub security_mode: String,
    /// Accepted user token policy ids, e.g. "anonymous", "username", "x509".
    pub user_token_ids: Vec<String>,
}

impl ServerEndpoint {
    /// An unsecured endpoint accepting anonymous users at `path`.
    pub fn new_none(path: &str) -> ServerEndpoint {
        ServerEndpoint {
            path: path.to_string(),
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#None".to_string(),
            security_mode: "None".to_string(),
            user_token_ids: vec!["anonymous".to_string()],
        }
    }

    /// A Basic256Sha256 sign-and-encrypt endpoint at `path`.
    pub fn new_basic256sha256_sign_encrypt(path: &str, user_token_ids: &[&str]) -> ServerEndpoint {
        ServerEndpoint {
            path: path.to_string(),
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256"
                .to_string(),
            security_mode: "SignAndEncrypt".to_string(),
            user_token_ids: user_token_ids.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Configuration of a UASC server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Name of the server application.
    pub application_name: String,
    /// URI of the server application, matched against its certificate.
    pub application_uri: String,
    /// URI of the product.
    pub product_uri: String,
    /// Host the listener binds to.
    pub host: String,
    /// Port the listener binds to. 0 picks an ephemeral port.
    pub port: u16,
    /// Limits enforced on transports, sessions and tokens.
    pub limits: ServerLimits,
    /// The offered endpoints.
    pub endpoints: Vec<ServerEndpoint>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            application_name: "UASC server".to_string(),
            application_uri: "urn:uasc:server".to_string(),
            product_uri: "urn:uasc".to_string(),
            host: "127.0.0.1".to_string(),
            port: uasc_core::constants::DEFAULT_OPC_UA_SERVER_PORT,
            limits: ServerLimits::default(),
            endpoints: vec![ServerEndpoint::new_none("/")],
        }
    }
}

impl ServerConfig {
    /// The base endpoint URL of the server.
    pub fn base_endpoint_url(&self) -> String {
        format!("opc.tcp://{}:{}", self.host, self.port)
    }

    /// Problems with this configuration, empty when it is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.endpoints.is_empty() {
            errors.push("Server configuration declares no endpoints".to_string());
        }
        if self.limits.receive_buffer_size < uasc_core::comms::tcp_types::MIN_CHUNK_SIZE
            || self.limits.send_buffer_size < uasc_core::comms::tcp_types::MIN_CHUNK_SIZE
        {
            errors.push(format!(
                "Buffer sizes must be at least {}",
                uasc_core::comms::tcp_types::MIN_CHUNK_SIZE
            ));
        }
        if self.limits.min_token_lifetime_ms > self.limits.max_token_lifetime_ms {
            errors.push("Token lifetime range is inverted".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::{ServerConfig, ServerLimits};

    #[test]
    fn token_lifetime_clamp() {
        let limits = ServerLimits::default();
        assert_eq!(limits.clamp_token_lifetime(0), limits.max_token_lifetime_ms);
        assert_eq!(limits.clamp_token_lifetime(5), limits.min_token_lifetime_ms);
        assert_eq!(limits.clamp_token_lifetime(60_000), 60_000);
        assert_eq!(
            limits.clamp_token_lifetime(u32::MAX),
            limits.max_token_lifetime_ms
        );
    }

    #[test]
    fn session_timeout_clamp() {
        let limits = ServerLimits::default();
        assert_eq!(
            limits.clamp_session_timeout(f64::NAN),
            limits.max_session_timeout_ms
        );
        assert_eq!(limits.clamp_session_timeout(60_000.0), 60_000);
        assert_eq!(
            limits.clamp_session_timeout(0.5),
            limits.min_session_timeout_ms
        );
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ServerConfig::default().validate().is_empty());
    }
}
