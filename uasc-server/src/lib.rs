#![warn(missing_docs)]

//! OPC UA server side of the UASC stack: endpoint configuration, the
//! per-connection secure channel driver, the session manager, and message
//! dispatch into the embedder's service handler.

pub mod authenticator;
pub mod authorization;
pub mod channel;
pub mod config;
pub mod identity_token;
pub mod info;
pub mod server;
pub mod service;
pub mod session;
pub mod transport;

pub use authenticator::{AuthManager, DefaultAuthenticator, Password, UserToken};
pub use authorization::{AllowAll, AuthorizationManager, Operation};
pub use config::{ServerConfig, ServerEndpoint, ServerLimits};
pub use info::ServerInfo;
pub use server::{Server, ServerBuilder, ServerEvent, ServerHandle};
pub use service::{DefaultServiceHandler, ServiceHandler, SessionUser};
