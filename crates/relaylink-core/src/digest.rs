//! Session digest
//!
//! The relay never sees a real destination address. Both peers send the same
//! opaque digest as the CONNECT "domain name" and the relay pairs the two
//! connections that carry it. The digest is the lowercase hex SHA-1 of
//! `session id || requester identity || target identity`; the hash and the
//! argument order are part of the wire contract.

use sha1::{Digest, Sha1};

/// Length of a digest in hex characters
pub const DIGEST_HEX_LEN: usize = 40;

/// Compute the session digest
///
/// Pure and order-sensitive: swapping requester and target yields a
/// different digest.
///
/// # Example
///
/// ```
/// use relaylink_core::compute_digest;
///
/// let digest = compute_digest("session_id", "alice@example.org/a", "bob@example.org/b");
/// assert_eq!(digest.len(), 40);
/// ```
#[must_use]
pub fn compute_digest(session_id: &str, requester: &str, target: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(session_id.as_bytes());
    hasher.update(requester.as_bytes());
    hasher.update(target.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION_ID: &str = "session_id";
    const INITIATOR: &str = "initiator@example.org/Resource";
    const TARGET: &str = "target@example.org/Resource";

    #[test]
    fn test_known_digest() {
        assert_eq!(
            compute_digest(SESSION_ID, INITIATOR, TARGET),
            "e0de961a3adfbaec8d9e326b2e7d4a461a26e3fc"
        );
    }

    #[test]
    fn test_digest_is_concatenation_hash() {
        // SHA-1("abc") split across the three inputs
        assert_eq!(
            compute_digest("a", "b", "c"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_digest_deterministic() {
        assert_eq!(
            compute_digest(SESSION_ID, INITIATOR, TARGET),
            compute_digest(SESSION_ID, INITIATOR, TARGET)
        );
    }

    #[test]
    fn test_digest_order_sensitive() {
        let forward = compute_digest(SESSION_ID, INITIATOR, TARGET);
        let swapped = compute_digest(SESSION_ID, TARGET, INITIATOR);
        assert_ne!(forward, swapped);
        assert_eq!(swapped, "97836a6333eeaf5fa840f3a1e0f5f68981911618");
    }

    #[test]
    fn test_digest_shape() {
        let digest = compute_digest("", "", "");
        assert_eq!(digest.len(), DIGEST_HEX_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
