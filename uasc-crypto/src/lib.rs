#![warn(missing_docs)]

//! Security policies and the crypto capability surface of the UASC stack.
//!
//! The channel layer never touches a cipher directly, it goes through the
//! [`CryptoProfile`] trait. This crate defines that trait together with the
//! [`SecurityPolicy`] metadata the channel needs for sizing, and ships a
//! software profile backed by the RustCrypto crates so the stack works out of
//! the box. PKI chain validation stays behind the [`Pki`] trait; the embedder
//! brings their own or uses the permissive default.

pub mod pkey;
pub mod pki;
pub mod profile;
pub mod random;
pub mod security_policy;
pub mod x509;

pub use pkey::{PrivateKey, PublicKey};
pub use pki::{AcceptAll, Pki};
pub use profile::{
    create_signature_data, profile_for_policy, verify_signature_data, CryptoProfile, NullProfile,
    SecretBytes, SoftwareProfile, SymmetricKeys,
};
pub use security_policy::SecurityPolicy;
pub use x509::{Thumbprint, X509};
