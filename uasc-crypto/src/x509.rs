//! A thin wrapper over DER encoded X.509 certificates. Only the pieces the
//! channel layer needs live here: the raw bytes, the SHA-1 thumbprint and the
//! RSA public key. Chain validation is the [`crate::Pki`] capability's job.

use sha1::{Digest, Sha1};
use x509_cert::{
    der::{Decode, Encode},
    Certificate,
};

use rsa::pkcs8::DecodePublicKey;
use uasc_types::{ByteString, Error, StatusCode};

use crate::pkey::PublicKey;

/// The SHA-1 thumbprint of a certificate, used in asymmetric security
/// headers to identify the receiver's certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbprint {
    value: [u8; Thumbprint::THUMBPRINT_SIZE],
}

impl Thumbprint {
    /// Thumbprints are SHA-1 digests, always 20 bytes.
    pub const THUMBPRINT_SIZE: usize = 20;

    /// Compute the thumbprint of DER encoded certificate bytes.
    pub fn new(der: &[u8]) -> Thumbprint {
        let digest = Sha1::digest(der);
        let mut value = [0u8; Self::THUMBPRINT_SIZE];
        value.copy_from_slice(&digest);
        Thumbprint { value }
    }

    /// The raw digest bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The digest as a byte string for wire headers.
    pub fn as_byte_string(&self) -> ByteString {
        ByteString::from(&self.value[..])
    }
}

/// An X.509 v3 certificate held as its DER bytes plus the parsed structure.
#[derive(Debug, Clone)]
pub struct X509 {
    der: Vec<u8>,
    cert: Box<Certificate>,
}

impl PartialEq for X509 {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl X509 {
    /// Parse a certificate from DER bytes.
    pub fn from_der(der: &[u8]) -> Result<X509, Error> {
        let cert = Certificate::from_der(der).map_err(|e| {
            Error::new(
                StatusCode::BadCertificateInvalid,
                format!("Cannot parse certificate: {e}"),
            )
        })?;
        Ok(X509 {
            der: der.to_vec(),
            cert: Box::new(cert),
        })
    }

    /// Parse a certificate from a byte string, e.g. out of a security header.
    pub fn from_byte_string(bytes: &ByteString) -> Result<X509, Error> {
        if bytes.is_null() {
            return Err(Error::new(
                StatusCode::BadCertificateInvalid,
                "Certificate byte string is null",
            ));
        }
        Self::from_der(bytes.as_ref())
    }

    /// The DER bytes as a byte string for wire headers.
    pub fn as_byte_string(&self) -> ByteString {
        ByteString::from(&self.der)
    }

    /// The raw DER bytes.
    pub fn as_der(&self) -> &[u8] {
        &self.der
    }

    /// The SHA-1 thumbprint of the DER bytes.
    pub fn thumbprint(&self) -> Thumbprint {
        Thumbprint::new(&self.der)
    }

    /// Extract the RSA public key from the certificate.
    pub fn public_key(&self) -> Result<PublicKey, Error> {
        let spki_der = self
            .cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| {
                Error::new(
                    StatusCode::BadCertificateInvalid,
                    format!("Cannot extract public key info: {e}"),
                )
            })?;
        let key = rsa::RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| {
            Error::new(
                StatusCode::BadCertificateInvalid,
                format!("Certificate public key is not RSA: {e}"),
            )
        })?;
        Ok(PublicKey::from_inner(key))
    }
}

#[cfg(test)]
mod tests {
    use super::Thumbprint;

    #[test]
    fn thumbprint_is_sha1() {
        // SHA-1("abc")
        let t = Thumbprint::new(b"abc");
        assert_eq!(
            t.value(),
            &[
                0xa9, 0x99, 0x3e, 0x36, 0x47, 0x06, 0x81, 0x6a, 0xba, 0x3e, 0x25, 0x71, 0x78,
                0x50, 0xc2, 0x6c, 0x9c, 0xd0, 0xd8, 0x9d
            ]
        );
        assert_eq!(t.as_byte_string().len(), Thumbprint::THUMBPRINT_SIZE);
    }
}
