//! The secure channel: token lifecycle, derived keys, and the per-chunk
//! security pipeline. All cryptographic primitives are reached through the
//! [`CryptoProfile`] capability.

use std::{
    io::{Cursor, Write},
    ops::Range,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, trace};

use uasc_crypto::{
    profile_for_policy, CryptoProfile, NullProfile, PrivateKey, PublicKey, SecurityPolicy,
    SymmetricKeys, X509,
};
use uasc_types::{
    write_bytes, write_u32, write_u8, BinaryDecodable, ByteString, ChannelSecurityToken,
    DecodingOptions, Error, MessageSecurityMode, StatusCode,
};

use super::{
    message_chunk::{MessageChunk, MessageChunkHeader, MessageChunkType, MESSAGE_SIZE_OFFSET},
    security_header::{AsymmetricSecurityHeader, SecurityHeader, SymmetricSecurityHeader},
};

/// Longest grace period during which the previous token is still accepted
/// after a renew.
pub const MAX_TOKEN_OVERLAP: Duration = Duration::from_secs(60);

/// Role of an application on a secure channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Role {
    /// Role is unknown.
    Unknown,
    /// Role is client.
    Client,
    /// Role is server.
    Server,
}

/// One issued security token: its id, validity window, and the symmetric
/// keys derived for it. Keys zero themselves when the token is dropped.
#[derive(Debug)]
struct SecurityToken {
    token_id: u32,
    created_at: Instant,
    lifetime: Duration,
    /// Keys securing what we send.
    local_keys: Option<SymmetricKeys>,
    /// Keys securing what the peer sends.
    remote_keys: Option<SymmetricKeys>,
}

impl SecurityToken {
    /// The window during which the previous token remains valid for chunks
    /// already in flight: a quarter of the lifetime, at most a minute.
    fn overlap_window(&self) -> Duration {
        (self.lifetime / 4).min(MAX_TOKEN_OVERLAP)
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.lifetime
    }
}

/// Holds all of the security state of one secure channel.
pub struct SecureChannel {
    /// The side of the channel this instance implements.
    role: Role,
    /// The security policy for the connection.
    security_policy: SecurityPolicy,
    /// The security mode for the connection.
    security_mode: MessageSecurityMode,
    /// Crypto primitives for the policy.
    profile: Arc<dyn CryptoProfile>,
    /// Secure channel id, 0 until the server assigns one.
    secure_channel_id: u32,
    /// Our certificate.
    cert: Option<X509>,
    /// Our private key.
    private_key: Option<PrivateKey>,
    /// Their certificate.
    remote_cert: Option<X509>,
    /// Our nonce generated for the open secure channel exchange.
    local_nonce: Vec<u8>,
    /// Their nonce from the open secure channel exchange.
    remote_nonce: Vec<u8>,
    /// The active token. Outbound always uses this one.
    current_token: Option<SecurityToken>,
    /// The token replaced by the last renew, accepted inbound until the
    /// deadline.
    previous_token: Option<(SecurityToken, Instant)>,
    /// Decoding options, carrying negotiated limits.
    decoding_options: DecodingOptions,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("role", &self.role)
            .field("security_policy", &self.security_policy)
            .field("security_mode", &self.security_mode)
            .field("secure_channel_id", &self.secure_channel_id)
            .field("token_id", &self.token_id())
            .finish()
    }
}

impl SecureChannel {
    /// Create a new secure channel for `role` with no security configured
    /// yet.
    pub fn new(role: Role, decoding_options: DecodingOptions) -> SecureChannel {
        SecureChannel {
            role,
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            profile: Arc::new(NullProfile),
            secure_channel_id: 0,
            cert: None,
            private_key: None,
            remote_cert: None,
            local_nonce: Vec::new(),
            remote_nonce: Vec::new(),
            current_token: None,
            previous_token: None,
            decoding_options,
        }
    }

    /// Return `true` if this channel is for a client.
    pub fn is_client_role(&self) -> bool {
        self.role == Role::Client
    }

    /// Set the application certificate.
    pub fn set_cert(&mut self, cert: Option<X509>) {
        self.cert = cert;
    }

    /// Get the application certificate.
    pub fn cert(&self) -> Option<&X509> {
        self.cert.as_ref()
    }

    /// Set the application private key.
    pub fn set_private_key(&mut self, private_key: Option<PrivateKey>) {
        self.private_key = private_key;
    }

    /// Set the remote certificate.
    pub fn set_remote_cert(&mut self, remote_cert: Option<X509>) {
        self.remote_cert = remote_cert;
    }

    /// Get the remote certificate.
    pub fn remote_cert(&self) -> Option<&X509> {
        self.remote_cert.as_ref()
    }

    /// Set the remote certificate from wire bytes. A null byte string clears
    /// it.
    pub fn set_remote_cert_from_byte_string(
        &mut self,
        remote_cert: &ByteString,
    ) -> Result<(), StatusCode> {
        self.remote_cert = if remote_cert.is_null() {
            None
        } else {
            Some(X509::from_byte_string(remote_cert).map_err(|e| e.status())?)
        };
        Ok(())
    }

    /// The remote certificate as a byte string, null when absent.
    pub fn remote_cert_as_byte_string(&self) -> ByteString {
        match &self.remote_cert {
            Some(cert) => cert.as_byte_string(),
            None => ByteString::null(),
        }
    }

    /// Get the application security mode.
    pub fn security_mode(&self) -> MessageSecurityMode {
        self.security_mode
    }

    /// Set the application security mode.
    pub fn set_security_mode(&mut self, security_mode: MessageSecurityMode) {
        self.security_mode = security_mode;
    }

    /// Get the application security policy.
    pub fn security_policy(&self) -> SecurityPolicy {
        self.security_policy
    }

    /// Set the security policy and select the matching crypto profile.
    pub fn set_security_policy(&mut self, security_policy: SecurityPolicy) -> Result<(), Error> {
        self.profile = profile_for_policy(security_policy)?;
        self.security_policy = security_policy;
        Ok(())
    }

    /// The crypto profile in use.
    pub fn profile(&self) -> &Arc<dyn CryptoProfile> {
        &self.profile
    }

    /// Set the ID of the secure channel, chosen by the server.
    pub fn set_secure_channel_id(&mut self, secure_channel_id: u32) {
        self.secure_channel_id = secure_channel_id;
    }

    /// Get the ID of the secure channel.
    pub fn secure_channel_id(&self) -> u32 {
        self.secure_channel_id
    }

    /// Get the decoding options.
    pub fn decoding_options(&self) -> DecodingOptions {
        self.decoding_options.clone()
    }

    /// Replace the decoding options, e.g. after limit negotiation.
    pub fn set_decoding_options(&mut self, decoding_options: DecodingOptions) {
        self.decoding_options = decoding_options;
    }

    /// Id of the active token, 0 when none has been issued.
    pub fn token_id(&self) -> u32 {
        self.current_token.as_ref().map(|t| t.token_id).unwrap_or(0)
    }

    /// `true` once a token has been issued and has not expired.
    pub fn has_valid_token(&self) -> bool {
        self.current_token
            .as_ref()
            .is_some_and(|t| !t.is_expired(Instant::now()))
    }

    /// Test if the token needs to be renewed: 75% or more of the issue
    /// period has elapsed.
    pub fn should_renew_security_token(&self) -> bool {
        match &self.current_token {
            None => false,
            Some(token) => {
                let renew_after = token.lifetime.mul_f64(0.75);
                Instant::now().duration_since(token.created_at) > renew_after
            }
        }
    }

    /// Deadline by which the peer must have renewed the token before the
    /// channel is considered dead, used for timeouts on the server.
    pub fn token_renewal_deadline(&self) -> Instant {
        match &self.current_token {
            None => Instant::now(),
            Some(token) => token.created_at + token.lifetime + token.overlap_window(),
        }
    }

    /// Drop every token and zero its keys.
    pub fn clear_security_token(&mut self) {
        self.secure_channel_id = 0;
        self.current_token = None;
        self.previous_token = None;
    }

    /// Generate a fresh local nonce sized for the policy.
    pub fn create_random_nonce(&mut self) {
        self.local_nonce = self
            .profile
            .random_nonce(self.security_policy.secure_channel_nonce_length());
    }

    /// Get the local nonce.
    pub fn local_nonce(&self) -> &[u8] {
        &self.local_nonce
    }

    /// Get the local nonce as a byte string, null when empty.
    pub fn local_nonce_as_byte_string(&self) -> ByteString {
        if self.local_nonce.is_empty() {
            ByteString::null()
        } else {
            ByteString::from(&self.local_nonce)
        }
    }

    /// Set the remote nonce from wire bytes, validating its length against
    /// the policy.
    pub fn set_remote_nonce_from_byte_string(
        &mut self,
        remote_nonce: &ByteString,
    ) -> Result<(), StatusCode> {
        if let Some(ref remote_nonce) = remote_nonce.value {
            if self.security_policy != SecurityPolicy::None
                && remote_nonce.len() != self.security_policy.secure_channel_nonce_length()
            {
                error!(
                    "Remote nonce is invalid length {}, expecting {}",
                    remote_nonce.len(),
                    self.security_policy.secure_channel_nonce_length()
                );
                return Err(StatusCode::BadNonceInvalid);
            }
            self.remote_nonce = remote_nonce.clone();
            Ok(())
        } else if self.security_policy != SecurityPolicy::None {
            error!("Remote nonce is absent but the policy requires one");
            Err(StatusCode::BadNonceInvalid)
        } else {
            self.remote_nonce.clear();
            Ok(())
        }
    }

    /// Get the remote nonce as a byte string, null when empty.
    pub fn remote_nonce_as_byte_string(&self) -> ByteString {
        if self.remote_nonce.is_empty() {
            ByteString::null()
        } else {
            ByteString::from(&self.remote_nonce)
        }
    }

    /// Install the token from an OpenSecureChannel exchange and derive the
    /// symmetric keys for both directions. The token that was active becomes
    /// the previous token, accepted inbound for a quarter of the revised
    /// lifetime, at most a minute. The keys of any token before that are
    /// zeroed and dropped.
    pub fn set_security_token(&mut self, token: ChannelSecurityToken) -> Result<(), Error> {
        self.secure_channel_id = token.channel_id;

        let (local_keys, remote_keys) = if self.security_policy == SecurityPolicy::None {
            (None, None)
        } else {
            // Keys securing our sends use the remote nonce as secret and our
            // nonce as seed; the peer's keys are the mirror image
            let block_len = self.security_policy.derived_key_block_length();
            let local = self
                .profile
                .derive_keys(&self.remote_nonce, &self.local_nonce, block_len)?;
            let remote = self
                .profile
                .derive_keys(&self.local_nonce, &self.remote_nonce, block_len)?;
            (
                Some(SymmetricKeys::from_derived(self.security_policy, &local)?),
                Some(SymmetricKeys::from_derived(self.security_policy, &remote)?),
            )
        };

        let new_token = SecurityToken {
            token_id: token.token_id,
            created_at: Instant::now(),
            lifetime: Duration::from_millis(u64::from(token.revised_lifetime)),
            local_keys,
            remote_keys,
        };

        if let Some(old) = self.current_token.take() {
            let deadline = Instant::now() + new_token.overlap_window();
            debug!(
                "Channel {} token {} renewed to {}, old token accepted until +{:?}",
                self.secure_channel_id,
                old.token_id,
                new_token.token_id,
                new_token.overlap_window()
            );
            self.previous_token = Some((old, deadline));
        }
        self.current_token = Some(new_token);
        Ok(())
    }

    /// Discard the previous token once its overlap window has passed.
    pub fn expire_previous_token(&mut self) {
        if let Some((_, deadline)) = &self.previous_token {
            if Instant::now() >= *deadline {
                self.previous_token = None;
            }
        }
    }

    /// The keys the peer used for a chunk carrying `token_id`, honoring the
    /// renewal overlap window.
    fn remote_keys_for_token(&self, token_id: u32) -> Result<&SymmetricKeys, Error> {
        if let Some(token) = &self.current_token {
            if token.token_id == token_id {
                return token
                    .remote_keys
                    .as_ref()
                    .ok_or_else(|| Error::new(StatusCode::BadSecurityChecksFailed, "No keys"));
            }
        }
        if let Some((token, deadline)) = &self.previous_token {
            if token.token_id == token_id && Instant::now() < *deadline {
                return token
                    .remote_keys
                    .as_ref()
                    .ok_or_else(|| Error::new(StatusCode::BadSecurityChecksFailed, "No keys"));
            }
        }
        Err(Error::new(
            StatusCode::BadSecureChannelTokenUnknown,
            format!("Token {} is not the current or previous token", token_id),
        ))
    }

    fn local_keys(&self) -> Result<&SymmetricKeys, Error> {
        self.current_token
            .as_ref()
            .and_then(|t| t.local_keys.as_ref())
            .ok_or_else(|| {
                Error::new(
                    StatusCode::BadSecureChannelClosed,
                    "No token has been issued on this channel",
                )
            })
    }

    /// Makes a security header according to the type of message being sent.
    pub fn make_security_header(&self, message_type: MessageChunkType) -> SecurityHeader {
        match message_type {
            MessageChunkType::OpenSecureChannel => {
                let header = if self.security_policy == SecurityPolicy::None {
                    AsymmetricSecurityHeader::none()
                } else {
                    let receiver_certificate_thumbprint = match &self.remote_cert {
                        Some(remote_cert) => remote_cert.thumbprint().as_byte_string(),
                        None => ByteString::null(),
                    };
                    let Some(cert) = &self.cert else {
                        // No certificate configured; the handshake will fail
                        // later with a security error, emit a none header so
                        // encoding does not panic
                        return SecurityHeader::Asymmetric(AsymmetricSecurityHeader::none());
                    };
                    AsymmetricSecurityHeader::new(
                        self.security_policy,
                        cert,
                        receiver_certificate_thumbprint,
                    )
                };
                SecurityHeader::Asymmetric(header)
            }
            _ => SecurityHeader::Symmetric(SymmetricSecurityHeader {
                token_id: self.token_id(),
            }),
        }
    }

    /// Calculates the signature size for a message depending on the supplied
    /// security header.
    pub fn signature_size(&self, security_header: &SecurityHeader) -> usize {
        match security_header {
            SecurityHeader::Asymmetric(security_header) => {
                if !security_header.sender_certificate.is_null() {
                    X509::from_byte_string(&security_header.sender_certificate)
                        .and_then(|x509| x509.public_key())
                        .map(|pk| pk.size())
                        .unwrap_or(0)
                } else {
                    0
                }
            }
            SecurityHeader::Symmetric(_) => {
                if self.security_mode == MessageSecurityMode::None {
                    0
                } else {
                    self.security_policy.symmetric_signature_size()
                }
            }
        }
    }

    // Padding grows a second length byte when the key is longer than 2048
    // bits (256 bytes)
    fn minimum_padding(key_length: usize) -> usize {
        if key_length <= 256 {
            1
        } else {
            2
        }
    }

    /// The plain text block size and minimum padding for this channel. Zero
    /// when nothing is encrypted.
    pub fn padding_block_sizes(
        &self,
        security_header: &SecurityHeader,
        signature_size: usize,
        message_type: MessageChunkType,
    ) -> (usize, usize) {
        if self.security_policy == SecurityPolicy::None
            || self.security_mode != MessageSecurityMode::SignAndEncrypt
                && !message_type.is_open_secure_channel()
        {
            return (0, 0);
        }

        match security_header {
            SecurityHeader::Asymmetric(_) => match &self.remote_cert {
                Some(cert) => match cert.public_key() {
                    Ok(pk) => (
                        self.profile.asym_plain_block_size(&pk),
                        Self::minimum_padding(pk.size()),
                    ),
                    Err(_) => (0, 0),
                },
                None => (0, 0),
            },
            SecurityHeader::Symmetric(_) => (
                self.security_policy.symmetric_block_size(),
                Self::minimum_padding(signature_size),
            ),
        }
    }

    /// Calculate the padding size.
    ///
    /// Padding adds bytes to the body to make it a whole multiple of the
    /// cipher block size. Returns `(total_padding, minimum_padding)`.
    pub fn padding_size(
        &self,
        security_header: &SecurityHeader,
        body_size: usize,
        signature_size: usize,
        message_type: MessageChunkType,
    ) -> (usize, usize) {
        let (plain_text_block_size, minimum_padding) =
            self.padding_block_sizes(security_header, signature_size, message_type);

        if plain_text_block_size == 0 {
            return (0, 0);
        }

        // The encrypted region covers the sequence header (8 bytes), body,
        // padding and signature
        let encrypt_size = 8 + body_size + signature_size + minimum_padding;
        let padding_size = if encrypt_size % plain_text_block_size != 0 {
            plain_text_block_size - (encrypt_size % plain_text_block_size)
        } else {
            0
        };
        (minimum_padding + padding_size, minimum_padding)
    }

    // Takes an unpadded message chunk and adds padding as well as space at
    // the end for a signature, updating the size in the message header.
    fn add_space_for_padding_and_signature(
        &self,
        message_chunk: &MessageChunk,
    ) -> Result<Vec<u8>, Error> {
        let chunk_info = message_chunk.chunk_info(self)?;
        let data = &message_chunk.data[..];

        let security_header = chunk_info.security_header;
        let signature_size = self.signature_size(&security_header);
        let body_size = chunk_info.body_length;
        let (padding_size, minimum_padding) = self.padding_size(
            &security_header,
            body_size,
            signature_size,
            chunk_info.message_header.message_type,
        );

        let buffer = Vec::with_capacity(data.len() + padding_size + signature_size);
        let mut stream = Cursor::new(buffer);
        stream.write_all(data)?;

        if padding_size > 0 {
            // Each padding byte holds the padding length; with a two byte
            // length the high byte goes last as the extra padding byte
            if minimum_padding == 1 {
                let padding_byte = ((padding_size - 1) & 0xff) as u8;
                let _ = write_bytes(&mut stream, padding_byte, padding_size)?;
            } else {
                let padding_byte = ((padding_size - 2) & 0xff) as u8;
                let extra_padding_byte = ((padding_size - 2) >> 8) as u8;
                let _ = write_bytes(&mut stream, padding_byte, padding_size - 1)?;
                write_u8(&mut stream, extra_padding_byte)?;
            }
        }

        // Zeroes where the signature will go
        let _ = write_bytes(&mut stream, 0u8, signature_size)?;

        let message_size = data.len() + padding_size + signature_size;
        Self::update_message_size_and_truncate(stream.into_inner(), message_size)
    }

    fn update_message_size(data: &mut [u8], message_size: usize) -> Result<(), Error> {
        let mut stream = Cursor::new(data);
        stream.set_position(MESSAGE_SIZE_OFFSET as u64);
        write_u32(&mut stream, message_size as u32)
    }

    /// Writes the message size into the chunk header and truncates the data
    /// to fit.
    pub fn update_message_size_and_truncate(
        mut data: Vec<u8>,
        message_size: usize,
    ) -> Result<Vec<u8>, Error> {
        Self::update_message_size(&mut data[..], message_size)?;
        data.truncate(message_size);
        Ok(data)
    }

    /// Applies security to a message chunk and writes the encrypted/signed
    /// block to `dst`, returning the number of bytes written.
    ///
    /// The security layout of a chunk is:
    ///
    /// S - Message Header
    /// S - Security Header
    /// S - Sequence Header - E
    /// S - Body            - E
    /// S - Padding         - E
    ///     Signature       - E
    pub fn apply_security(
        &self,
        message_chunk: &MessageChunk,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let size = if self.security_policy != SecurityPolicy::None
            && (self.security_mode == MessageSecurityMode::Sign
                || self.security_mode == MessageSecurityMode::SignAndEncrypt
                || message_chunk.is_open_secure_channel(&self.decoding_options))
        {
            let encrypted_data_offset =
                message_chunk.encrypted_data_offset(&self.decoding_options)?;

            let mut data = self.add_space_for_padding_and_signature(message_chunk)?;
            let encrypted_range = encrypted_data_offset..data.len();

            if message_chunk.is_open_secure_channel(&self.decoding_options) {
                self.asymmetric_sign_and_encrypt(&mut data, encrypted_range, dst)?
            } else {
                let signed_range =
                    0..(data.len() - self.security_policy.symmetric_signature_size());
                self.symmetric_sign_and_encrypt(&mut data, signed_range, encrypted_range, dst)?
            }
        } else {
            let size = message_chunk.data.len();
            if size > dst.len() {
                return Err(Error::new(
                    StatusCode::BadEncodingLimitsExceeded,
                    format!(
                        "Chunk size {} exceeds the destination buffer size {}",
                        size,
                        dst.len()
                    ),
                ));
            }
            dst[..size].copy_from_slice(&message_chunk.data[..]);
            size
        };
        Ok(size)
    }

    /// Decrypts and verifies a received chunk if the mode / policy requires
    /// it, returning the plaintext chunk with padding and signature removed.
    pub fn verify_and_remove_security(&mut self, src: &[u8]) -> Result<MessageChunk, Error> {
        // Keys of a token past its overlap window are zeroed before anything
        // else happens
        self.expire_previous_token();
        let decoding_options = self.decoding_options();
        let (message_header, security_header, encrypted_data_offset) = {
            let mut stream = Cursor::new(&src);
            let message_header = MessageChunkHeader::decode(&mut stream, &decoding_options)?;
            let security_header = SecurityHeader::decode_from_stream(
                &mut stream,
                message_header.message_type.is_open_secure_channel(),
                &decoding_options,
            )?;
            (message_header, security_header, stream.position() as usize)
        };

        let message_size = message_header.message_size as usize;
        if message_size != src.len() {
            return Err(Error::new(
                StatusCode::BadUnexpectedError,
                format!(
                    "The message size {} is not the same as the supplied buffer {}",
                    message_size,
                    src.len()
                ),
            ));
        }

        let data = if message_header.message_type.is_open_secure_channel() {
            let SecurityHeader::Asymmetric(security_header) = security_header else {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    "OpenSecureChannel chunk has a symmetric security header",
                ));
            };

            // The OpenSecureChannel is the first thing received on a channel,
            // the header's policy decides whether the chunk is encrypted
            let security_policy_uri = security_header.security_policy_uri.as_ref();
            let security_policy = SecurityPolicy::from_uri(security_policy_uri);
            match security_policy {
                SecurityPolicy::Unknown => {
                    return Err(Error::new(
                        StatusCode::BadSecurityPolicyRejected,
                        format!("Security policy \"{}\" is unknown", security_policy_uri),
                    ));
                }
                SecurityPolicy::None => {
                    return Ok(MessageChunk { data: src.to_vec() });
                }
                _ => {}
            }
            self.set_security_policy(security_policy)?;

            // OpenSecureChannel messages are always signed and encrypted when
            // the policy is not None, even in mode Sign
            if security_header.sender_certificate.is_null() {
                return Err(Error::new(
                    StatusCode::BadCertificateInvalid,
                    "Sender certificate is null",
                ));
            }
            let sender_certificate = X509::from_byte_string(&security_header.sender_certificate)?;
            let verification_key = sender_certificate.public_key()?;
            // A server learns the client certificate from this header; keep
            // it for the response encryption and later signature checks
            if self.remote_cert.is_none() {
                self.remote_cert = Some(sender_certificate.clone());
            }

            let encrypted_range = encrypted_data_offset..message_size;
            let mut decrypted_data = vec![0u8; message_size];
            let decrypted_size = self.asymmetric_decrypt_and_verify(
                &verification_key,
                &security_header.receiver_certificate_thumbprint,
                src,
                encrypted_range,
                &mut decrypted_data,
            )?;

            Self::update_message_size_and_truncate(decrypted_data, decrypted_size)?
        } else if self.security_policy != SecurityPolicy::None
            && (self.security_mode == MessageSecurityMode::Sign
                || self.security_mode == MessageSecurityMode::SignAndEncrypt)
        {
            let SecurityHeader::Symmetric(security_header) = security_header else {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    "Message chunk has an asymmetric security header",
                ));
            };

            let signature_size = self.security_policy.symmetric_signature_size();
            let encrypted_range = encrypted_data_offset..message_size;
            let signed_range = 0..(message_size - signature_size);

            let mut decrypted_data = vec![0u8; message_size];
            let decrypted_size = self.symmetric_decrypt_and_verify(
                src,
                signed_range,
                encrypted_range,
                security_header.token_id,
                &mut decrypted_data,
            )?;

            Self::update_message_size_and_truncate(decrypted_data, decrypted_size)?
        } else {
            src.to_vec()
        };

        Ok(MessageChunk { data })
    }

    /// Asymmetric sign and encrypt of an OpenSecureChannel chunk. Signs in
    /// place in `src`, encrypts into `dst`.
    fn asymmetric_sign_and_encrypt(
        &self,
        src: &mut [u8],
        encrypted_range: Range<usize>,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        let header_size = encrypted_range.start;

        let signing_key = self.private_key.as_ref().ok_or_else(|| {
            Error::new(
                StatusCode::BadSecurityChecksFailed,
                "No private key configured for a secured channel",
            )
        })?;
        let signing_key_size = self.profile.asym_signature_size(signing_key);

        let signed_range = 0..(encrypted_range.end - signing_key_size);
        let signature_range = signed_range.end..encrypted_range.end;

        let encryption_key = self
            .remote_cert
            .as_ref()
            .ok_or_else(|| {
                Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    "No remote certificate to encrypt to",
                )
            })?
            .public_key()?;

        // Encryption changes the size of the chunk; the header must carry
        // the final size before it is signed
        let plain_text_size = encrypted_range.end - encrypted_range.start;
        let cipher_text_size = self
            .profile
            .asym_cipher_text_size(&encryption_key, plain_text_size);
        Self::update_message_size(src, header_size + cipher_text_size)?;

        dst[0..encrypted_range.start].copy_from_slice(&src[0..encrypted_range.start]);

        // Sign message header, security header, sequence header, body and
        // padding, writing the signature into the reserved region
        let signature = self.profile.asym_sign(signing_key, &src[signed_range.clone()])?;
        if signature.len() != signature_range.len() {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Signature does not fit its reserved region",
            ));
        }
        src[signature_range].copy_from_slice(&signature);

        // Encrypt sequence header, body, padding and signature into dst
        let encrypted_size = self.profile.asym_encrypt(
            &encryption_key,
            &src[encrypted_range.clone()],
            &mut dst[encrypted_range.start..],
        )?;
        if encrypted_size != cipher_text_size {
            return Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                format!(
                    "Encrypted block size {} differs from calculated cipher text size {}",
                    encrypted_size, cipher_text_size
                ),
            ));
        }

        Ok(header_size + encrypted_size)
    }

    fn check_padding_bytes(
        padding_bytes: &[u8],
        expected_padding_byte: u8,
        padding_range_start: usize,
    ) -> Result<(), Error> {
        for (i, b) in padding_bytes.iter().enumerate() {
            if *b != expected_padding_byte {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    format!(
                        "Expected padding byte {}, got {} at index {}",
                        expected_padding_byte,
                        *b,
                        padding_range_start + i
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Verify that the padding before `padding_end` is well formed and return
    /// its range so the caller can strip it.
    fn verify_padding(
        &self,
        src: &[u8],
        key_size: usize,
        padding_end: usize,
    ) -> Result<Range<usize>, Error> {
        let padding_range = if key_size > 256 {
            let padding_byte = src[padding_end - 2];
            let extra_padding_byte = src[padding_end - 1];
            let padding_size = ((extra_padding_byte as usize) << 8) + (padding_byte as usize);
            let padding_range = (padding_end - padding_size - 2)..padding_end;
            Self::check_padding_bytes(
                &src[padding_range.start..(padding_range.end - 1)],
                padding_byte,
                padding_range.start,
            )?;
            if src[padding_range.end - 1] != extra_padding_byte {
                return Err(Error::new(
                    StatusCode::BadSecurityChecksFailed,
                    format!(
                        "Expected extra padding byte {}, at index {}",
                        extra_padding_byte, padding_range.start
                    ),
                ));
            }
            padding_range
        } else {
            let padding_byte = src[padding_end - 1];
            let padding_size = padding_byte as usize;
            let padding_range = (padding_end - padding_size - 1)..padding_end;
            Self::check_padding_bytes(
                &src[padding_range.clone()],
                padding_byte,
                padding_range.start,
            )?;
            padding_range
        };
        trace!("padding_range = {:?}", padding_range);
        Ok(padding_range)
    }

    fn asymmetric_decrypt_and_verify(
        &self,
        verification_key: &PublicKey,
        receiver_thumbprint: &ByteString,
        src: &[u8],
        encrypted_range: Range<usize>,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        // The receiver thumbprint names which of our certificates the peer
        // encrypted to; with a single application certificate it must match
        let our_cert = self.cert.as_ref().ok_or_else(|| {
            Error::new(
                StatusCode::BadSecurityChecksFailed,
                "No application certificate configured",
            )
        })?;
        if our_cert.thumbprint().value() != receiver_thumbprint.as_ref() {
            return Err(Error::new(
                StatusCode::BadNoValidCertificates,
                "Supplied thumbprint does not match application certificate's thumbprint",
            ));
        }

        dst[..encrypted_range.start].copy_from_slice(&src[..encrypted_range.start]);

        let private_key = self.private_key.as_ref().ok_or_else(|| {
            Error::new(
                StatusCode::BadSecurityChecksFailed,
                "No private key configured",
            )
        })?;
        let mut decrypted_tmp = vec![0u8; encrypted_range.len()];
        let decrypted_size = self.profile.asym_decrypt(
            private_key,
            &src[encrypted_range.clone()],
            &mut decrypted_tmp,
        )?;
        dst[encrypted_range.start..(encrypted_range.start + decrypted_size)]
            .copy_from_slice(&decrypted_tmp[0..decrypted_size]);

        // The signature sits at the end of the decrypted block
        let verification_key_signature_size = verification_key.size();
        let signature_dst_offset =
            encrypted_range.start + decrypted_size - verification_key_signature_size;
        let signed_range_dst = 0..signature_dst_offset;
        let signature_range_dst =
            signature_dst_offset..(signature_dst_offset + verification_key_signature_size);

        self.profile.asym_verify(
            verification_key,
            &dst[signed_range_dst],
            &dst[signature_range_dst],
        )?;

        // Padding length bytes depend on the key the peer encrypted to,
        // which is ours
        let key_size = our_cert
            .public_key()
            .map(|pk| pk.size())
            .unwrap_or(verification_key_signature_size);
        let padding_range = self.verify_padding(dst, key_size, signature_dst_offset)?;

        Ok(padding_range.start)
    }

    /// Symmetric sign and optional encrypt of an outbound chunk, writing the
    /// secured bytes to `dst`.
    pub fn symmetric_sign_and_encrypt(
        &self,
        src: &mut [u8],
        signed_range: Range<usize>,
        encrypted_range: Range<usize>,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        match self.security_mode {
            MessageSecurityMode::None => {
                dst[..src.len()].copy_from_slice(src);
                Ok(src.len())
            }
            MessageSecurityMode::Sign => {
                let size = self.symmetric_sign_in_place(src, signed_range)?;
                dst[0..size].copy_from_slice(&src[0..size]);
                Ok(size)
            }
            MessageSecurityMode::SignAndEncrypt => {
                self.symmetric_sign_in_place(src, signed_range)?;

                let keys = self.local_keys()?;
                let encrypted_size = self.profile.sym_encrypt(
                    &keys.encryption_key,
                    &keys.iv,
                    &src[encrypted_range.clone()],
                    &mut dst[encrypted_range.start..],
                )?;
                dst[..encrypted_range.start].copy_from_slice(&src[..encrypted_range.start]);
                Ok(encrypted_range.start + encrypted_size)
            }
            MessageSecurityMode::Invalid => Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Message security mode is invalid",
            )),
        }
    }

    fn symmetric_sign_in_place(
        &self,
        buf: &mut [u8],
        signed_range: Range<usize>,
    ) -> Result<usize, Error> {
        let signature_size = self.security_policy.symmetric_signature_size();
        let keys = self.local_keys()?;
        let signature = self
            .profile
            .sym_sign(&keys.signing_key, &buf[signed_range.clone()])?;
        buf[signed_range.end..signed_range.end + signature_size].copy_from_slice(&signature);
        Ok(signed_range.end + signature_size)
    }

    /// Symmetric decrypt and verify of an inbound chunk, selecting keys by
    /// token id. Returns the size of the plaintext without padding and
    /// signature.
    pub fn symmetric_decrypt_and_verify(
        &self,
        src: &[u8],
        signed_range: Range<usize>,
        encrypted_range: Range<usize>,
        token_id: u32,
        dst: &mut [u8],
    ) -> Result<usize, Error> {
        match self.security_mode {
            MessageSecurityMode::None => {
                dst[..src.len()].copy_from_slice(src);
                Ok(src.len())
            }
            MessageSecurityMode::Sign => {
                dst[..src.len()].copy_from_slice(src);
                let signature_range = signed_range.end..src.len();
                let keys = self.remote_keys_for_token(token_id)?;
                self.profile.sym_verify(
                    &keys.signing_key,
                    &dst[signed_range.clone()],
                    &dst[signature_range],
                )?;
                Ok(signed_range.end)
            }
            MessageSecurityMode::SignAndEncrypt => {
                // Copy the plaintext headers
                dst[..encrypted_range.start].copy_from_slice(&src[..encrypted_range.start]);

                let keys = self.remote_keys_for_token(token_id)?;
                let ciphertext_size = encrypted_range.len();
                let mut decrypted_tmp = vec![0u8; ciphertext_size];
                let decrypted_size = self.profile.sym_decrypt(
                    &keys.encryption_key,
                    &keys.iv,
                    &src[encrypted_range.clone()],
                    &mut decrypted_tmp,
                )?;

                let decrypted_range =
                    encrypted_range.start..(encrypted_range.start + decrypted_size);
                dst[decrypted_range.clone()].copy_from_slice(&decrypted_tmp[..decrypted_size]);

                // Verify the signature after the encrypted portion
                let signature_size = self.security_policy.symmetric_signature_size();
                let signature_range =
                    (decrypted_range.end - signature_size)..decrypted_range.end;
                self.profile.sym_verify(
                    &keys.signing_key,
                    &dst[signed_range],
                    &dst[signature_range.clone()],
                )?;

                let key_size = keys.encryption_key.len();
                let padding_range = self.verify_padding(dst, key_size, signature_range.start)?;
                Ok(padding_range.start)
            }
            MessageSecurityMode::Invalid => Err(Error::new(
                StatusCode::BadSecurityChecksFailed,
                "Message security mode is invalid",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Role, SecureChannel};
    use std::time::Duration;
    use uasc_crypto::SecurityPolicy;
    use uasc_types::{
        ByteString, ChannelSecurityToken, DateTime, DecodingOptions, MessageSecurityMode,
    };

    fn secured_pair() -> (SecureChannel, SecureChannel) {
        let mut client = SecureChannel::new(Role::Client, DecodingOptions::test());
        let mut server = SecureChannel::new(Role::Server, DecodingOptions::test());
        client
            .set_security_policy(SecurityPolicy::Basic256Sha256)
            .unwrap();
        server
            .set_security_policy(SecurityPolicy::Basic256Sha256)
            .unwrap();
        client.set_security_mode(MessageSecurityMode::SignAndEncrypt);
        server.set_security_mode(MessageSecurityMode::SignAndEncrypt);

        client.create_random_nonce();
        server.create_random_nonce();
        let client_nonce = client.local_nonce_as_byte_string();
        let server_nonce = server.local_nonce_as_byte_string();
        client
            .set_remote_nonce_from_byte_string(&server_nonce)
            .unwrap();
        server
            .set_remote_nonce_from_byte_string(&client_nonce)
            .unwrap();

        let token = ChannelSecurityToken {
            channel_id: 7,
            token_id: 1,
            created_at: DateTime::now(),
            revised_lifetime: 60_000,
        };
        client.set_security_token(token.clone()).unwrap();
        server.set_security_token(token).unwrap();
        (client, server)
    }

    #[test]
    fn nonce_length_enforced() {
        let mut channel = SecureChannel::new(Role::Client, DecodingOptions::test());
        channel
            .set_security_policy(SecurityPolicy::Basic256Sha256)
            .unwrap();
        assert!(channel
            .set_remote_nonce_from_byte_string(&ByteString::from(vec![1u8, 2, 3]))
            .is_err());
        assert!(channel
            .set_remote_nonce_from_byte_string(&ByteString::from(vec![7u8; 32]))
            .is_ok());
    }

    #[test]
    fn symmetric_chunk_round_trip() {
        let (client, mut server) = secured_pair();

        // Build a MSG chunk on the client and push it through the security
        // pipeline both ways
        let chunk = crate::comms::message_chunk::MessageChunk::new(
            1,
            1,
            crate::comms::message_chunk::MessageChunkType::Message,
            crate::comms::message_chunk::MessageIsFinalType::Final,
            &client,
            b"payload bytes for the round trip",
        )
        .unwrap();

        let mut secured = vec![0u8; chunk.data.len() + 1024];
        let size = client.apply_security(&chunk, &mut secured).unwrap();
        secured.truncate(size);
        assert_ne!(&secured[..], &chunk.data[..]);

        let decrypted = server.verify_and_remove_security(&secured).unwrap();
        assert_eq!(&decrypted.data[..], &chunk.data[..]);
    }

    #[test]
    fn tampered_chunk_rejected() {
        let (client, mut server) = secured_pair();
        let chunk = crate::comms::message_chunk::MessageChunk::new(
            1,
            1,
            crate::comms::message_chunk::MessageChunkType::Message,
            crate::comms::message_chunk::MessageIsFinalType::Final,
            &client,
            b"payload",
        )
        .unwrap();
        let mut secured = vec![0u8; chunk.data.len() + 1024];
        let size = client.apply_security(&chunk, &mut secured).unwrap();
        secured.truncate(size);

        // Flip a bit inside the encrypted region
        let last = secured.len() - 1;
        secured[last] ^= 0x01;
        assert!(server.verify_and_remove_security(&secured).is_err());
    }

    #[test]
    fn unknown_token_rejected() {
        let (client, mut server) = secured_pair();
        let chunk = crate::comms::message_chunk::MessageChunk::new(
            1,
            1,
            crate::comms::message_chunk::MessageChunkType::Message,
            crate::comms::message_chunk::MessageIsFinalType::Final,
            &client,
            b"payload",
        )
        .unwrap();
        let mut secured = vec![0u8; chunk.data.len() + 1024];
        let size = client.apply_security(&chunk, &mut secured).unwrap();
        secured.truncate(size);

        // Make the server forget the token
        server.clear_security_token();
        assert!(server.verify_and_remove_security(&secured).is_err());
    }

    #[test]
    fn renewal_keeps_previous_token_within_window() {
        let (_client, mut server) = secured_pair();
        assert_eq!(server.token_id(), 1);

        // Simulate a renew with fresh nonces on the server side only; the
        // point here is the token bookkeeping
        let token = ChannelSecurityToken {
            channel_id: 7,
            token_id: 2,
            created_at: DateTime::now(),
            revised_lifetime: 60_000,
        };
        server.set_security_token(token).unwrap();
        assert_eq!(server.token_id(), 2);
        // Previous token is still accepted for min(lifetime/4, 60s)
        assert!(server.remote_keys_for_token(1).is_ok());
        assert!(server.remote_keys_for_token(2).is_ok());
        assert!(server.remote_keys_for_token(3).is_err());
    }

    #[test]
    fn renewal_deadline_tracks_lifetime() {
        let (client, _server) = secured_pair();
        assert!(!client.should_renew_security_token());
        let deadline = client.token_renewal_deadline();
        let remaining = deadline - std::time::Instant::now();
        assert!(remaining > Duration::from_secs(60));
    }
}
