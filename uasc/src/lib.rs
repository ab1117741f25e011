#![warn(missing_docs)]

//! UASC is an OPC UA communication stack: the binary TCP transport with
//! chunking, the secure channel with token renewal and per-chunk security,
//! and sessions that survive channel loss. Cryptographic primitives, PKI,
//! user authentication and the service business logic are consumed through
//! capability traits, so the stack carries conversations, not address
//! spaces.
//!
//! The [`client`] and [`server`] modules re-export the two application
//! surfaces; [`types`], [`crypto`] and [`core`] hold the shared layers.

/// Client side: sessions, service calls, the session event loop.
pub mod client {
    pub use uasc_client::*;
}

/// Server side: endpoints, sessions, service dispatch.
pub mod server {
    pub use uasc_server::*;
}

/// The shared transport and secure channel layers.
pub mod core {
    pub use uasc_core::*;
}

/// Security policies and crypto capability traits.
pub mod crypto {
    pub use uasc_crypto::*;
}

/// Data types and the binary codec.
pub mod types {
    pub use uasc_types::*;
}
