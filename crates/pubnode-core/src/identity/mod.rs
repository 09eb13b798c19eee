//! Identity module for pubnode
//!
//! Provides node keypairs, addresses, typed structured documents and the
//! signature verifier every signed federation action goes through.
//!
//! ## Example
//!
//! ```rust
//! use pubnode_core::identity::{NodeKeypair, Verifier};
//! use pubnode_core::types::documents::disconnection_document;
//!
//! let alice = NodeKeypair::generate();
//! let bob = NodeKeypair::generate();
//!
//! let doc = disconnection_document(&bob.address(), &alice.address(), 1_700_000_000);
//! let signature = alice.sign_document(&doc).unwrap().to_hex();
//!
//! let verifier = Verifier::default();
//! assert!(verifier.verify_signer(&doc, &signature, &alice.address()));
//! assert!(!verifier.verify_signer(&doc, &signature, &bob.address()));
//! ```
//!
//! ## Security Model
//!
//! - Trust is derived from signatures only, never from a wire claim
//! - Recovered signers are compared after checksum normalization
//! - A bounded freshness window is the only defense against replay

mod address;
mod keypair;
mod signature;
pub mod typed_data;
mod verifier;

// Re-export public types
pub use address::{Address, ADDRESS_LEN};
pub use keypair::NodeKeypair;
pub use signature::{RecoverableSignature, SIGNATURE_LEN};
pub use typed_data::{TypedDocument, TypedDomain, TypedField};
pub use verifier::{Verifier, DEFAULT_FRESHNESS_WINDOW_SECS};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_identity_workflow() {
        let keypair = NodeKeypair::generate();
        let address = keypair.address();

        let seed = keypair.to_bytes();
        let recovered = NodeKeypair::from_bytes(&seed).unwrap();
        assert_eq!(recovered.address(), address);

        let digest = [11u8; 32];
        let signature = keypair.sign_digest(&digest);
        assert_eq!(signature.recover(&digest).unwrap(), address);
    }

    #[test]
    fn test_cross_verification() {
        let alice = NodeKeypair::generate();
        let bob = NodeKeypair::generate();

        let digest = [12u8; 32];
        let alice_signature = alice.sign_digest(&digest);

        assert_eq!(alice_signature.recover(&digest).unwrap(), alice.address());
        assert_ne!(alice_signature.recover(&digest).unwrap(), bob.address());
    }
}
