#![warn(missing_docs)]

//! OPC UA client side of the UASC stack: the transport poll loop with
//! request correlation and timeouts, the secure channel lifecycle, and the
//! session state machine with automatic re-activation after channel loss.

pub mod config;
pub mod retry;
pub mod session;
pub mod transport;

mod client;

pub use client::Client;
pub use config::ClientConfig;
pub use retry::{ExponentialBackoff, SessionRetryPolicy};
pub use session::{
    Session, SessionConnectMode, SessionEvent, SessionEventLoop, SessionPollResult, SessionState,
};
pub use transport::{AsyncSecureChannel, SecureChannelEventLoop, TransportPollResult};

use uasc_types::{ByteString, UAString};

/// The user identity a client presents when activating a session.
#[derive(Debug, Clone, Default)]
pub enum IdentityToken {
    /// No user information, the anonymous policy.
    #[default]
    Anonymous,
    /// A username and password. The password is only accepted unencrypted
    /// (encryption algorithm `None`), so it should travel over a secured
    /// channel.
    UserName(String, String),
    /// An X.509 certificate (DER) and the matching private key in PEM form.
    /// The key signs `serverCertificate || serverNonce` at activation.
    X509(ByteString, String),
}

impl IdentityToken {
    /// The policy id this token kind conventionally matches.
    pub fn policy_id(&self) -> UAString {
        match self {
            IdentityToken::Anonymous => "anonymous".into(),
            IdentityToken::UserName(..) => "username".into(),
            IdentityToken::X509(..) => "x509".into(),
        }
    }
}
