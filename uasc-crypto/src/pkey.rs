//! RSA key wrappers. Key material is held by the `rsa` crate types, which
//! zeroize their contents on drop.

use rsa::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
    traits::PublicKeyParts,
    RsaPrivateKey, RsaPublicKey,
};
use uasc_types::{Error, StatusCode};

/// An RSA private key.
#[derive(Clone)]
pub struct PrivateKey {
    key: RsaPrivateKey,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        write!(f, "PrivateKey({} bytes)", self.size())
    }
}

impl PrivateKey {
    /// Generate a fresh key of `bits` bits. Used by tests and by embedders
    /// bootstrapping a configuration.
    pub fn new_rsa(bits: usize) -> Result<PrivateKey, Error> {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits).map_err(|e| {
            Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!("RSA key generation failed: {e}"),
            )
        })?;
        Ok(PrivateKey { key })
    }

    /// Load a key from PKCS#8 PEM.
    pub fn from_pem(pem: &str) -> Result<PrivateKey, Error> {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .map(|key| PrivateKey { key })
            .map_err(|e| {
                Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    format!("Cannot parse private key: {e}"),
                )
            })
    }

    /// Export the key as PKCS#8 PEM.
    pub fn to_pem(&self) -> Result<String, Error> {
        self.key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map(|p| p.to_string())
            .map_err(|e| {
                Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    format!("Cannot serialize private key: {e}"),
                )
            })
    }

    /// Size of the key modulus in bytes. Signatures and cipher blocks of
    /// this key are exactly this long.
    pub fn size(&self) -> usize {
        self.key.size()
    }

    /// The public half of the key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: RsaPublicKey::from(&self.key),
        }
    }

    pub(crate) fn inner(&self) -> &RsaPrivateKey {
        &self.key
    }
}

/// An RSA public key.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicKey {
    key: RsaPublicKey,
}

impl PublicKey {
    /// Size of the key modulus in bytes.
    pub fn size(&self) -> usize {
        self.key.size()
    }

    /// Bit length of the key modulus.
    pub fn bit_length(&self) -> usize {
        self.size() * 8
    }

    pub(crate) fn from_inner(key: RsaPublicKey) -> PublicKey {
        PublicKey { key }
    }

    pub(crate) fn inner(&self) -> &RsaPublicKey {
        &self.key
    }
}
