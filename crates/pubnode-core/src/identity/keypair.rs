//! Node signing keypair
//!
//! Each node holds one Ed25519 keypair. Its address is derived from the
//! public key and is the node's identity across the federation.

use crate::error::{NodeError, NodeResult};
use crate::identity::address::Address;
use crate::identity::signature::RecoverableSignature;
use crate::identity::typed_data::TypedDocument;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};

/// Ed25519 keypair that signs typed documents on behalf of a node
pub struct NodeKeypair {
    signing: SigningKey,
}

impl NodeKeypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        // Use getrandom directly to avoid rand version conflicts
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed).expect("Failed to get random bytes");
        Self::from_seed(&seed)
    }

    /// Deterministic keypair from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Get the public key for this keypair
    pub fn public_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Address controlled by this keypair
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key())
    }

    /// Sign a raw 32-byte digest
    pub fn sign_digest(&self, digest: &[u8; 32]) -> RecoverableSignature {
        let signature = self.signing.sign(digest);
        RecoverableSignature::new(self.public_key(), signature)
    }

    /// Compute the typed-data digest of `document` and sign it
    pub fn sign_document(&self, document: &TypedDocument) -> NodeResult<RecoverableSignature> {
        let digest = document.digest()?;
        Ok(self.sign_digest(&digest))
    }

    /// Serialize the secret seed (32 bytes)
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Deserialize a keypair from its secret seed
    pub fn from_bytes(bytes: &[u8]) -> NodeResult<Self> {
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| NodeError::Identity("Keypair seed must be 32 bytes".to_string()))?;
        Ok(Self::from_seed(&seed))
    }
}

impl Clone for NodeKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing.to_bytes())
    }
}

impl std::fmt::Debug for NodeKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeypair")
            .field("public", &hex::encode(self.public_key().as_bytes()))
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
