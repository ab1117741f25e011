//! Cryptographically secure randomness helpers.

use rand::RngCore;
use uasc_types::ByteString;

/// Fill `buf` with random bytes from the OS entropy source.
pub fn bytes(buf: &mut [u8]) {
    rand::thread_rng().fill_bytes(buf);
}

/// A random byte string of `len` bytes.
pub fn byte_string(len: usize) -> ByteString {
    let mut buf = vec![0u8; len];
    bytes(&mut buf);
    ByteString::from(buf)
}

#[cfg(test)]
mod tests {
    #[test]
    fn nonces_differ() {
        let a = super::byte_string(32);
        let b = super::byte_string(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
