//! Credential hashing.

use sha2::{Digest, Sha256};

/// SHA-256 of the secret's text bytes: the 32-byte credential clients send
/// after the TLS handshake.
#[inline]
pub fn secret_hash(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // SHA-256("abc")
        let hash = secret_hash("abc");
        assert_eq!(
            hash[..4],
            [0xba, 0x78, 0x16, 0xbf],
            "unexpected digest prefix"
        );
    }

    #[test]
    fn deterministic() {
        let uuid = "550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(secret_hash(uuid), secret_hash(uuid));
        assert_ne!(secret_hash(uuid), secret_hash("other"));
    }
}
