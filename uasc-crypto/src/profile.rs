//! The [`CryptoProfile`] capability and its built in implementations.
//!
//! Profiles bundle the primitive operations a secure channel needs: key
//! derivation, symmetric signing and encryption of chunks, and the
//! asymmetric operations of the OpenSecureChannel handshake. The channel
//! layer calls only this trait so the embedder can swap in a hardware backed
//! implementation.

use std::ops::Deref;

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rsa::{Oaep, Pkcs1v15Sign};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use uasc_types::{ByteString, Error, SignatureData, StatusCode, UAString};

use crate::{
    pkey::{PrivateKey, PublicKey},
    security_policy::SecurityPolicy,
    x509::{Thumbprint, X509},
};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

// OAEP with SHA-1 hashing consumes 2 * 20 hash bytes + 2 per block
const OAEP_SHA1_OVERHEAD: usize = 42;

fn security_error(context: impl Into<String>) -> Error {
    Error::new(StatusCode::BadSecurityChecksFailed, context.into())
}

/// Heap bytes that are zeroed when dropped. Used for every piece of derived
/// key material.
pub struct SecretBytes {
    bytes: Vec<u8>,
}

impl SecretBytes {
    /// Wrap `bytes` as secret material.
    pub fn new(bytes: Vec<u8>) -> SecretBytes {
        SecretBytes { bytes }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` when empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Deref for SecretBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.bytes.fill(0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never reach a log sink
        write!(f, "SecretBytes({} bytes)", self.bytes.len())
    }
}

/// The derived symmetric keys of one direction of a secure channel,
/// partitioned as `signing || encrypting || iv`.
#[derive(Debug)]
pub struct SymmetricKeys {
    /// HMAC signing key.
    pub signing_key: SecretBytes,
    /// Block cipher key.
    pub encryption_key: SecretBytes,
    /// Initialization vector.
    pub iv: SecretBytes,
}

impl SymmetricKeys {
    /// Split a derived key block into its three parts per the policy's
    /// lengths.
    pub fn from_derived(policy: SecurityPolicy, block: &[u8]) -> Result<SymmetricKeys, Error> {
        let sig_len = policy.derived_signing_key_length();
        let enc_len = policy.derived_encryption_key_length();
        let iv_len = policy.symmetric_block_size();
        if block.len() != sig_len + enc_len + iv_len {
            return Err(security_error(format!(
                "Derived key block is {} bytes, policy {} requires {}",
                block.len(),
                policy,
                sig_len + enc_len + iv_len
            )));
        }
        Ok(SymmetricKeys {
            signing_key: SecretBytes::new(block[..sig_len].to_vec()),
            encryption_key: SecretBytes::new(block[sig_len..sig_len + enc_len].to_vec()),
            iv: SecretBytes::new(block[sig_len + enc_len..].to_vec()),
        })
    }
}

/// The crypto primitive surface consumed by the channel layer.
pub trait CryptoProfile: Send + Sync {
    /// The policy this profile implements.
    fn policy(&self) -> SecurityPolicy;

    /// A fresh random nonce of `len` bytes.
    fn random_nonce(&self, len: usize) -> Vec<u8>;

    /// SHA-1 thumbprint of DER certificate bytes.
    fn certificate_thumbprint(&self, der: &[u8]) -> Vec<u8>;

    /// Derive `length` bytes of key material from `secret` and `seed` with
    /// the policy's pseudo random function.
    fn derive_keys(&self, secret: &[u8], seed: &[u8], length: usize)
        -> Result<SecretBytes, Error>;

    /// Symmetric signature over `data`.
    fn sym_sign(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error>;

    /// Verify a symmetric signature over `data`.
    fn sym_verify(&self, key: &[u8], data: &[u8], signature: &[u8]) -> Result<(), Error>;

    /// Symmetric encrypt `src` into `dst`, returning the ciphertext length.
    /// `src` must be a whole number of cipher blocks.
    fn sym_encrypt(&self, key: &[u8], iv: &[u8], src: &[u8], dst: &mut [u8])
        -> Result<usize, Error>;

    /// Symmetric decrypt `src` into `dst`, returning the plaintext length.
    fn sym_decrypt(&self, key: &[u8], iv: &[u8], src: &[u8], dst: &mut [u8])
        -> Result<usize, Error>;

    /// Asymmetric signature over `data` with the local private key.
    fn asym_sign(&self, key: &PrivateKey, data: &[u8]) -> Result<Vec<u8>, Error>;

    /// Verify an asymmetric signature over `data` with the peer's public key.
    fn asym_verify(&self, key: &PublicKey, data: &[u8], signature: &[u8]) -> Result<(), Error>;

    /// Asymmetric encrypt `src` into `dst` block by block, returning the
    /// ciphertext length.
    fn asym_encrypt(&self, key: &PublicKey, src: &[u8], dst: &mut [u8])
        -> Result<usize, Error>;

    /// Asymmetric decrypt `src` into `dst` block by block, returning the
    /// plaintext length.
    fn asym_decrypt(&self, key: &PrivateKey, src: &[u8], dst: &mut [u8])
        -> Result<usize, Error>;

    /// Size in bytes of an asymmetric signature made with `key`.
    fn asym_signature_size(&self, key: &PrivateKey) -> usize {
        key.size()
    }

    /// Plain text block size for asymmetric encryption to `key`.
    fn asym_plain_block_size(&self, key: &PublicKey) -> usize;

    /// Cipher text block size for asymmetric encryption to `key`.
    fn asym_cipher_block_size(&self, key: &PublicKey) -> usize {
        key.size()
    }

    /// Cipher text size produced by asymmetrically encrypting `plain_len`
    /// bytes to `key`.
    fn asym_cipher_text_size(&self, key: &PublicKey, plain_len: usize) -> usize {
        let plain_block = self.asym_plain_block_size(key);
        if plain_block == 0 {
            return 0;
        }
        let blocks = plain_len.div_ceil(plain_block);
        blocks * self.asym_cipher_block_size(key)
    }
}

/// Software implementation of [`CryptoProfile`] for `Basic256Sha256`:
/// P_SHA256 derivation, HMAC-SHA256 signatures, AES-256-CBC symmetric
/// encryption, RSA PKCS#1 v1.5 SHA-256 signatures and RSA OAEP SHA-1
/// encryption.
#[derive(Debug, Default)]
pub struct SoftwareProfile;

impl SoftwareProfile {
    fn hmac_sha256(secret: &[u8], data: &[u8]) -> Vec<u8> {
        // HMAC accepts keys of any length
        let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// The P_SHA256 pseudo random function from part 6.
    fn p_sha256(secret: &[u8], seed: &[u8], length: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(length);
        // A(1) = HMAC(secret, seed), A(n) = HMAC(secret, A(n-1))
        let mut a = Self::hmac_sha256(secret, seed);
        while out.len() < length {
            let mut input = a.clone();
            input.extend_from_slice(seed);
            out.extend_from_slice(&Self::hmac_sha256(secret, &input));
            a = Self::hmac_sha256(secret, &a);
        }
        out.truncate(length);
        out
    }
}

impl CryptoProfile for SoftwareProfile {
    fn policy(&self) -> SecurityPolicy {
        SecurityPolicy::Basic256Sha256
    }

    fn random_nonce(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        crate::random::bytes(&mut buf);
        buf
    }

    fn certificate_thumbprint(&self, der: &[u8]) -> Vec<u8> {
        Thumbprint::new(der).value().to_vec()
    }

    fn derive_keys(
        &self,
        secret: &[u8],
        seed: &[u8],
        length: usize,
    ) -> Result<SecretBytes, Error> {
        if secret.is_empty() || seed.is_empty() {
            return Err(security_error("Cannot derive keys from an empty nonce"));
        }
        Ok(SecretBytes::new(Self::p_sha256(secret, seed, length)))
    }

    fn sym_sign(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
        if key.len() != self.policy().derived_signing_key_length() {
            return Err(security_error("Signing key has the wrong length"));
        }
        Ok(Self::hmac_sha256(key, data))
    }

    fn sym_verify(&self, key: &[u8], data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|_| security_error("Verification key has the wrong length"))?;
        mac.update(data);
        mac.verify_slice(signature)
            .map_err(|_| security_error("Symmetric signature verification failed"))
    }

    fn sym_encrypt(
        &self,
        key: &[u8],
        iv: &[u8],
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let block = self.policy().symmetric_block_size();
        if src.len() % block != 0 {
            return Err(security_error(format!(
                "Plaintext length {} is not a multiple of the cipher block size {}",
                src.len(),
                block
            )));
        }
        let cipher = Aes256CbcEnc::new_from_slices(key, iv)
            .map_err(|_| security_error("Encryption key or IV has the wrong length"))?;
        let ciphertext = cipher
            .encrypt_padded_b2b_mut::<NoPadding>(src, dst)
            .map_err(|_| security_error("Destination buffer too small for ciphertext"))?;
        Ok(ciphertext.len())
    }

    fn sym_decrypt(
        &self,
        key: &[u8],
        iv: &[u8],
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let block = self.policy().symmetric_block_size();
        if src.len() % block != 0 {
            return Err(security_error(format!(
                "Ciphertext length {} is not a multiple of the cipher block size {}",
                src.len(),
                block
            )));
        }
        let cipher = Aes256CbcDec::new_from_slices(key, iv)
            .map_err(|_| security_error("Decryption key or IV has the wrong length"))?;
        let plaintext = cipher
            .decrypt_padded_b2b_mut::<NoPadding>(src, dst)
            .map_err(|_| security_error("Symmetric decryption failed"))?;
        Ok(plaintext.len())
    }

    fn asym_sign(&self, key: &PrivateKey, data: &[u8]) -> Result<Vec<u8>, Error> {
        let digest = Sha256::digest(data);
        key.inner()
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| security_error(format!("RSA signing failed: {e}")))
    }

    fn asym_verify(&self, key: &PublicKey, data: &[u8], signature: &[u8]) -> Result<(), Error> {
        let digest = Sha256::digest(data);
        key.inner()
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .map_err(|_| security_error("Asymmetric signature verification failed"))
    }

    fn asym_encrypt(
        &self,
        key: &PublicKey,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let plain_block = self.asym_plain_block_size(key);
        let cipher_block = self.asym_cipher_block_size(key);
        let mut rng = rand::thread_rng();
        let mut written = 0;
        for chunk in src.chunks(plain_block) {
            let ciphertext = key
                .inner()
                .encrypt(&mut rng, Oaep::new::<Sha1>(), chunk)
                .map_err(|e| security_error(format!("RSA encryption failed: {e}")))?;
            if written + cipher_block > dst.len() {
                return Err(security_error("Destination buffer too small for ciphertext"));
            }
            dst[written..written + cipher_block].copy_from_slice(&ciphertext);
            written += cipher_block;
        }
        Ok(written)
    }

    fn asym_decrypt(
        &self,
        key: &PrivateKey,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let cipher_block = key.size();
        if src.len() % cipher_block != 0 {
            return Err(security_error(format!(
                "Ciphertext length {} is not a multiple of the RSA block size {}",
                src.len(),
                cipher_block
            )));
        }
        let mut written = 0;
        for chunk in src.chunks(cipher_block) {
            let plaintext = key
                .inner()
                .decrypt(Oaep::new::<Sha1>(), chunk)
                .map_err(|_| security_error("Asymmetric decryption failed"))?;
            if written + plaintext.len() > dst.len() {
                return Err(security_error("Destination buffer too small for plaintext"));
            }
            dst[written..written + plaintext.len()].copy_from_slice(&plaintext);
            written += plaintext.len();
        }
        Ok(written)
    }

    fn asym_plain_block_size(&self, key: &PublicKey) -> usize {
        key.size() - OAEP_SHA1_OVERHEAD
    }
}

/// Profile for [`SecurityPolicy::None`]: nonces are empty and every crypto
/// operation is rejected, which keeps misrouted calls loud.
#[derive(Debug, Default)]
pub struct NullProfile;

impl CryptoProfile for NullProfile {
    fn policy(&self) -> SecurityPolicy {
        SecurityPolicy::None
    }

    fn random_nonce(&self, len: usize) -> Vec<u8> {
        // The None policy exchanges empty or single-byte nonces; they carry
        // no entropy requirement but are still randomized
        let mut buf = vec![0u8; len];
        crate::random::bytes(&mut buf);
        buf
    }

    fn certificate_thumbprint(&self, der: &[u8]) -> Vec<u8> {
        Thumbprint::new(der).value().to_vec()
    }

    fn derive_keys(&self, _: &[u8], _: &[u8], _: usize) -> Result<SecretBytes, Error> {
        Err(security_error("Key derivation is invalid for policy None"))
    }

    fn sym_sign(&self, _: &[u8], _: &[u8]) -> Result<Vec<u8>, Error> {
        Err(security_error("Signing is invalid for policy None"))
    }

    fn sym_verify(&self, _: &[u8], _: &[u8], _: &[u8]) -> Result<(), Error> {
        Err(security_error("Verification is invalid for policy None"))
    }

    fn sym_encrypt(&self, _: &[u8], _: &[u8], _: &[u8], _: &mut [u8]) -> Result<usize, Error> {
        Err(security_error("Encryption is invalid for policy None"))
    }

    fn sym_decrypt(&self, _: &[u8], _: &[u8], _: &[u8], _: &mut [u8]) -> Result<usize, Error> {
        Err(security_error("Decryption is invalid for policy None"))
    }

    fn asym_sign(&self, _: &PrivateKey, _: &[u8]) -> Result<Vec<u8>, Error> {
        Err(security_error("Signing is invalid for policy None"))
    }

    fn asym_verify(&self, _: &PublicKey, _: &[u8], _: &[u8]) -> Result<(), Error> {
        Err(security_error("Verification is invalid for policy None"))
    }

    fn asym_encrypt(&self, _: &PublicKey, _: &[u8], _: &mut [u8]) -> Result<usize, Error> {
        Err(security_error("Encryption is invalid for policy None"))
    }

    fn asym_decrypt(&self, _: &PrivateKey, _: &[u8], _: &mut [u8]) -> Result<usize, Error> {
        Err(security_error("Decryption is invalid for policy None"))
    }

    fn asym_plain_block_size(&self, _: &PublicKey) -> usize {
        0
    }
}

/// Pick the built in profile for a policy.
pub fn profile_for_policy(policy: SecurityPolicy) -> Result<std::sync::Arc<dyn CryptoProfile>, Error> {
    match policy {
        SecurityPolicy::None => Ok(std::sync::Arc::new(NullProfile)),
        SecurityPolicy::Basic256Sha256 => Ok(std::sync::Arc::new(SoftwareProfile)),
        SecurityPolicy::Unknown => Err(security_error("Unknown security policy")),
    }
}

/// Sign `certificate || nonce` with the local private key, producing the
/// SignatureData clients and servers exchange in session services.
pub fn create_signature_data(
    profile: &dyn CryptoProfile,
    key: &PrivateKey,
    certificate: &ByteString,
    nonce: &ByteString,
) -> Result<SignatureData, Error> {
    let mut data = certificate.as_ref().to_vec();
    data.extend_from_slice(nonce.as_ref());
    let signature = profile.asym_sign(key, &data)?;
    Ok(SignatureData {
        algorithm: UAString::from(profile.policy().asymmetric_signature_algorithm()),
        signature: ByteString::from(signature),
    })
}

/// Verify a SignatureData over `certificate || nonce` with the signer's
/// certificate public key.
pub fn verify_signature_data(
    profile: &dyn CryptoProfile,
    signature: &SignatureData,
    signer_certificate: &X509,
    signed_certificate: &ByteString,
    nonce: &ByteString,
) -> Result<(), Error> {
    if signature.signature.is_null() {
        return Err(security_error("Signature is missing"));
    }
    let key = signer_certificate.public_key()?;
    let mut data = signed_certificate.as_ref().to_vec();
    data.extend_from_slice(nonce.as_ref());
    profile.asym_verify(&key, &data, signature.signature.as_ref())
}

#[cfg(test)]
mod tests {
    use super::{CryptoProfile, SoftwareProfile, SymmetricKeys};
    use crate::{pkey::PrivateKey, security_policy::SecurityPolicy};

    #[test]
    fn p_sha256_is_deterministic_and_direction_sensitive() {
        let profile = SoftwareProfile;
        let client_nonce = profile.random_nonce(32);
        let server_nonce = profile.random_nonce(32);

        let a = profile.derive_keys(&client_nonce, &server_nonce, 80).unwrap();
        let b = profile.derive_keys(&client_nonce, &server_nonce, 80).unwrap();
        let c = profile.derive_keys(&server_nonce, &client_nonce, 80).unwrap();
        assert_eq!(&*a, &*b);
        assert_ne!(&*a, &*c);
        assert_eq!(a.len(), 80);
    }

    #[test]
    fn symmetric_sign_verify() {
        let profile = SoftwareProfile;
        let key = profile.random_nonce(32);
        let data = b"a chunk of message data";
        let signature = profile.sym_sign(&key, data).unwrap();
        assert_eq!(signature.len(), 32);
        profile.sym_verify(&key, data, &signature).unwrap();
        assert!(profile.sym_verify(&key, b"tampered", &signature).is_err());
    }

    #[test]
    fn symmetric_encrypt_decrypt_round_trip() {
        let profile = SoftwareProfile;
        let derived = profile
            .derive_keys(&profile.random_nonce(32), &profile.random_nonce(32), 80)
            .unwrap();
        let keys = SymmetricKeys::from_derived(SecurityPolicy::Basic256Sha256, &derived).unwrap();

        let plaintext = vec![0x5au8; 64];
        let mut ciphertext = vec![0u8; 64];
        let n = profile
            .sym_encrypt(&keys.encryption_key, &keys.iv, &plaintext, &mut ciphertext)
            .unwrap();
        assert_eq!(n, 64);
        assert_ne!(ciphertext, plaintext);

        let mut decrypted = vec![0u8; 64];
        let n = profile
            .sym_decrypt(&keys.encryption_key, &keys.iv, &ciphertext, &mut decrypted)
            .unwrap();
        assert_eq!(&decrypted[..n], &plaintext[..]);
    }

    #[test]
    fn symmetric_encrypt_requires_whole_blocks() {
        let profile = SoftwareProfile;
        let key = profile.random_nonce(32);
        let iv = profile.random_nonce(16);
        let mut dst = vec![0u8; 32];
        assert!(profile.sym_encrypt(&key, &iv, &[1, 2, 3], &mut dst).is_err());
    }

    #[test]
    fn asymmetric_sign_verify_and_encrypt_decrypt() {
        let profile = SoftwareProfile;
        let key = PrivateKey::new_rsa(2048).unwrap();
        let public = key.public_key();

        let data = b"the signed region of a chunk";
        let signature = profile.asym_sign(&key, data).unwrap();
        assert_eq!(signature.len(), profile.asym_signature_size(&key));
        profile.asym_verify(&public, data, &signature).unwrap();
        assert!(profile.asym_verify(&public, b"other data", &signature).is_err());

        // Two plain blocks worth of data
        let plain_block = profile.asym_plain_block_size(&public);
        let plaintext = profile.random_nonce(plain_block + 7);
        let mut ciphertext = vec![0u8; profile.asym_cipher_text_size(&public, plaintext.len())];
        let n = profile
            .asym_encrypt(&public, &plaintext, &mut ciphertext)
            .unwrap();
        assert_eq!(n, ciphertext.len());

        let mut decrypted = vec![0u8; n];
        let n = profile.asym_decrypt(&key, &ciphertext, &mut decrypted).unwrap();
        assert_eq!(&decrypted[..n], &plaintext[..]);
    }
}
