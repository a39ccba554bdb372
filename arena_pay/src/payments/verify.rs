//! Inbound callback authenticity.
//!
//! The reconciler only ever sees notifications that a [`CallbackVerifier`]
//! accepted.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Header carrying the callback signature
pub const SIGNATURE_HEADER: &str = "x-callback-signature";

/// Decides whether an inbound notification is authentic
pub trait CallbackVerifier: Send + Sync {
    fn is_authentic(&self, signature: Option<&str>, body: &[u8]) -> bool;
}

/// Signature is lowercase hex SHA-256 of `secret || body`
pub struct SharedSecretVerifier {
    secret: Vec<u8>,
}

impl SharedSecretVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signature a sender holding the same secret would attach to `body`
    pub fn sign(&self, body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update(body);
        hex::encode(hasher.finalize())
    }
}

impl CallbackVerifier for SharedSecretVerifier {
    fn is_authentic(&self, signature: Option<&str>, body: &[u8]) -> bool {
        let Some(provided) = signature.map(str::trim).filter(|s| !s.is_empty()) else {
            return false;
        };
        let expected = self.sign(body);
        provided
            .to_ascii_lowercase()
            .as_bytes()
            .ct_eq(expected.as_bytes())
            .into()
    }
}

/// Accepts every notification; used when no callback secret is configured
pub struct AcceptAllVerifier;

impl CallbackVerifier for AcceptAllVerifier {
    fn is_authentic(&self, _signature: Option<&str>, _body: &[u8]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_signature_accepted() {
        let verifier = SharedSecretVerifier::new("callback-secret");
        let body = br#"{"Body":{}}"#;
        let signature = verifier.sign(body);
        assert!(verifier.is_authentic(Some(&signature), body));
        assert!(verifier.is_authentic(Some(&signature.to_uppercase()), body));
    }

    #[test]
    fn test_tampered_or_missing_signature_rejected() {
        let verifier = SharedSecretVerifier::new("callback-secret");
        let signature = verifier.sign(b"original");
        assert!(!verifier.is_authentic(Some(&signature), b"tampered"));
        assert!(!verifier.is_authentic(None, b"original"));
        assert!(!verifier.is_authentic(Some(""), b"original"));

        let other = SharedSecretVerifier::new("other-secret");
        assert!(!verifier.is_authentic(Some(&other.sign(b"original")), b"original"));
    }

    #[test]
    fn test_accept_all() {
        assert!(AcceptAllVerifier.is_authentic(None, b"anything"));
    }
}
