//! Signer verification and freshness checks
//!
//! Signatures never expire cryptographically, so every signed action also
//! carries a timestamp that must fall inside a bounded replay window.

use chrono::Utc;
use tracing::debug;

use crate::error::{NodeError, NodeResult};
use crate::identity::address::Address;
use crate::identity::signature::RecoverableSignature;
use crate::identity::typed_data::TypedDocument;

/// Default replay window: one hour
pub const DEFAULT_FRESHNESS_WINDOW_SECS: i64 = 3600;

/// Schema-agnostic verifier for typed-document signatures
#[derive(Debug, Clone, Copy)]
pub struct Verifier {
    window_secs: i64,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW_SECS)
    }
}

impl Verifier {
    /// Create a verifier with the given replay window in seconds
    pub fn new(window_secs: i64) -> Self {
        Self { window_secs }
    }

    /// Replay window in seconds
    pub fn window_secs(&self) -> i64 {
        self.window_secs
    }

    /// Recover whoever signed `document`
    pub fn recover_signer(&self, document: &TypedDocument, signature: &str) -> NodeResult<Address> {
        let signature = RecoverableSignature::parse(signature)?;
        let digest = document
            .digest()
            .map_err(|e| NodeError::InvalidSignature(format!("cannot hash document: {}", e)))?;
        signature.recover(&digest)
    }

    /// True when `document` was signed by `expected`
    ///
    /// Malformed documents or signatures verify as false.
    pub fn verify_signer(&self, document: &TypedDocument, signature: &str, expected: &Address) -> bool {
        match self.recover_signer(document, signature) {
            Ok(signer) => &signer == expected,
            Err(e) => {
                debug!(error = %e, expected = %expected, "Signature did not verify");
                false
            }
        }
    }

    /// Like [`Self::verify_signer`] but fails with `INVALID_SIGNATURE`
    pub fn require_signer(
        &self,
        document: &TypedDocument,
        signature: &str,
        expected: &Address,
    ) -> NodeResult<()> {
        if self.verify_signer(document, signature, expected) {
            Ok(())
        } else {
            Err(NodeError::InvalidSignature(format!(
                "document is not signed by {}",
                expected
            )))
        }
    }

    /// Fail when `timestamp` is outside the window around now
    pub fn assert_fresh(&self, timestamp: i64) -> NodeResult<()> {
        self.assert_fresh_at(timestamp, Utc::now().timestamp())
    }

    /// Fail when `timestamp` is outside the window around `now`
    pub fn assert_fresh_at(&self, timestamp: i64, now: i64) -> NodeResult<()> {
        let skew = now.saturating_sub(timestamp);
        if skew > self.window_secs {
            return Err(NodeError::ExpiredSignature(format!(
                "timestamp {} is {}s old (window {}s)",
                timestamp, skew, self.window_secs
            )));
        }
        if -skew > self.window_secs {
            return Err(NodeError::InvalidTimestamp(format!(
                "timestamp {} is {}s in the future (window {}s)",
                timestamp, -skew, self.window_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::typed_data::{TypedDomain, TypedField};
    use crate::identity::NodeKeypair;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn document() -> TypedDocument {
        let mut types = BTreeMap::new();
        types.insert(
            "Ping".to_string(),
            vec![
                TypedField::new("from", "address"),
                TypedField::new("timestamp", "uint256"),
            ],
        );
        TypedDocument {
            domain: TypedDomain {
                name: "pubnode".into(),
                version: "1".into(),
            },
            types,
            primary_type: "Ping".into(),
            message: json!({
                "from": "0x00112233445566778899aabbccddeeff00112233",
                "timestamp": 1_700_000_000u64,
            }),
        }
    }

    #[test]
    fn test_signature_round_trip() {
        let verifier = Verifier::default();
        let keypair = NodeKeypair::generate();
        let other = NodeKeypair::generate();
        let doc = document();
        let signature = keypair.sign_document(&doc).unwrap().to_hex();

        assert!(verifier.verify_signer(&doc, &signature, &keypair.address()));
        assert!(!verifier.verify_signer(&doc, &signature, &other.address()));
        assert_eq!(verifier.recover_signer(&doc, &signature).unwrap(), keypair.address());
    }

    #[test]
    fn test_tampered_message_fails() {
        let verifier = Verifier::default();
        let keypair = NodeKeypair::generate();
        let mut doc = document();
        let signature = keypair.sign_document(&doc).unwrap().to_hex();

        doc.message["timestamp"] = json!(1_700_000_001u64);
        assert!(!verifier.verify_signer(&doc, &signature, &keypair.address()));
    }

    #[test]
    fn test_malformed_signature_is_invalid_signature() {
        let verifier = Verifier::default();
        let err = verifier.recover_signer(&document(), "0xnothex").unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");

        let err = verifier
            .require_signer(&document(), "garbage", &NodeKeypair::generate().address())
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_SIGNATURE");
    }

    #[test]
    fn test_replay_window_boundaries() {
        let verifier = Verifier::default();
        let now = 1_700_000_000;

        assert!(verifier.assert_fresh_at(now - 3599, now).is_ok());
        assert!(verifier.assert_fresh_at(now - 3600, now).is_ok());
        assert!(verifier.assert_fresh_at(now + 3599, now).is_ok());

        let err = verifier.assert_fresh_at(now - 3601, now).unwrap_err();
        assert_eq!(err.code(), "EXPIRED_SIGNATURE");

        let err = verifier.assert_fresh_at(now + 3601, now).unwrap_err();
        assert_eq!(err.code(), "INVALID_TIMESTAMP");
    }

    #[test]
    fn test_assert_fresh_uses_wall_clock() {
        let verifier = Verifier::default();
        let now = Utc::now().timestamp();
        assert!(verifier.assert_fresh(now - 3599).is_ok());
        assert!(verifier.assert_fresh(now - 3601 - 5).is_err());
    }
}
