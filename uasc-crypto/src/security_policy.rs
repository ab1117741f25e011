//! Security policies: named bundles of algorithms with the lengths the
//! channel layer needs to size chunks, keys and nonces.

use std::fmt;
use std::str::FromStr;

use uasc_types::{StatusCode, UAString};

/// URI of the `None` security policy.
pub const SECURITY_POLICY_NONE_URI: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
/// URI of the `Basic256Sha256` security policy.
pub const SECURITY_POLICY_BASIC_256_SHA_256_URI: &str =
    "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";

/// A security policy determines key lengths, signature and encryption
/// algorithms, and nonce sizes for a secure channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum SecurityPolicy {
    /// Policy could not be recognized. Always rejected.
    Unknown,
    /// No security applied.
    #[default]
    None,
    /// AES-256-CBC + HMAC-SHA256 symmetric, RSA-2048+ asymmetric.
    Basic256Sha256,
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityPolicy::Unknown => write!(f, "Unknown"),
            SecurityPolicy::None => write!(f, "None"),
            SecurityPolicy::Basic256Sha256 => write!(f, "Basic256Sha256"),
        }
    }
}

impl FromStr for SecurityPolicy {
    type Err = StatusCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Self::from_uri(s) {
            SecurityPolicy::Unknown => Err(StatusCode::BadSecurityPolicyRejected),
            p => Ok(p),
        }
    }
}

impl SecurityPolicy {
    /// Map a security policy URI to a policy. Unknown URIs map to
    /// [`SecurityPolicy::Unknown`], which every layer rejects.
    pub fn from_uri(uri: &str) -> SecurityPolicy {
        match uri {
            SECURITY_POLICY_NONE_URI | "" => SecurityPolicy::None,
            SECURITY_POLICY_BASIC_256_SHA_256_URI => SecurityPolicy::Basic256Sha256,
            _ => SecurityPolicy::Unknown,
        }
    }

    /// The URI of this policy.
    pub fn to_uri(&self) -> &'static str {
        match self {
            SecurityPolicy::None => SECURITY_POLICY_NONE_URI,
            SecurityPolicy::Basic256Sha256 => SECURITY_POLICY_BASIC_256_SHA_256_URI,
            SecurityPolicy::Unknown => {
                panic!("Unknown security policy has no URI")
            }
        }
    }

    /// The URI as a [`UAString`] for wire headers.
    pub fn to_uri_string(&self) -> UAString {
        UAString::from(self.to_uri())
    }

    /// `true` for every policy the stack can actually run.
    pub fn is_supported(&self) -> bool {
        !matches!(self, SecurityPolicy::Unknown)
    }

    /// Length in bytes of the secure channel nonces exchanged in
    /// OpenSecureChannel.
    pub fn secure_channel_nonce_length(&self) -> usize {
        match self {
            SecurityPolicy::Basic256Sha256 => 32,
            _ => 0,
        }
    }

    /// Length in bytes of the derived symmetric signing key.
    pub fn derived_signing_key_length(&self) -> usize {
        match self {
            SecurityPolicy::Basic256Sha256 => 32,
            _ => 0,
        }
    }

    /// Length in bytes of the derived symmetric encryption key.
    pub fn derived_encryption_key_length(&self) -> usize {
        match self {
            SecurityPolicy::Basic256Sha256 => 32,
            _ => 0,
        }
    }

    /// Block size in bytes of the symmetric cipher, which is also the length
    /// of the initialization vector.
    pub fn symmetric_block_size(&self) -> usize {
        match self {
            SecurityPolicy::Basic256Sha256 => 16,
            _ => 0,
        }
    }

    /// Size in bytes of a symmetric signature.
    pub fn symmetric_signature_size(&self) -> usize {
        match self {
            SecurityPolicy::Basic256Sha256 => 32,
            _ => 0,
        }
    }

    /// Total length of derived key material for one direction: signing key,
    /// encryption key and initialization vector.
    pub fn derived_key_block_length(&self) -> usize {
        self.derived_signing_key_length()
            + self.derived_encryption_key_length()
            + self.symmetric_block_size()
    }

    /// Smallest asymmetric key length in bits this policy accepts.
    pub fn min_asymmetric_key_length(&self) -> usize {
        match self {
            SecurityPolicy::Basic256Sha256 => 2048,
            _ => 0,
        }
    }

    /// URI of the asymmetric signature algorithm, used in SignatureData.
    pub fn asymmetric_signature_algorithm(&self) -> &'static str {
        match self {
            SecurityPolicy::Basic256Sha256 => {
                "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"
            }
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SecurityPolicy;
    use std::str::FromStr;

    #[test]
    fn uri_round_trip() {
        for policy in [SecurityPolicy::None, SecurityPolicy::Basic256Sha256] {
            assert_eq!(SecurityPolicy::from_uri(policy.to_uri()), policy);
        }
        assert_eq!(
            SecurityPolicy::from_uri("http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15"),
            SecurityPolicy::Unknown
        );
        assert!(SecurityPolicy::from_str("garbage").is_err());
    }

    #[test]
    fn basic256sha256_lengths() {
        let p = SecurityPolicy::Basic256Sha256;
        assert_eq!(p.secure_channel_nonce_length(), 32);
        assert_eq!(p.derived_key_block_length(), 80);
        assert_eq!(p.symmetric_signature_size(), 32);
        assert_eq!(p.symmetric_block_size(), 16);
    }
}
