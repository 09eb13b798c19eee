//! Recoverable signatures over typed-document digests
//!
//! Ed25519 cannot recover a public key from a signature alone, so the wire
//! form carries the signer's public key next to the signature:
//!
//! ```text
//! "0x" || hex(public_key: 32 bytes || signature: 64 bytes)
//! ```
//!
//! Recovery verifies the signature against the embedded key and returns the
//! address derived from that key. A forged key yields a different address,
//! so comparing the recovered address with the expected one is sufficient.

use crate::error::{NodeError, NodeResult};
use crate::identity::address::Address;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Total wire length in bytes (public key + signature)
pub const SIGNATURE_LEN: usize = 32 + 64;

/// Signature carrying the public key needed to recover the signer
#[derive(Clone, PartialEq, Eq)]
pub struct RecoverableSignature {
    public_key: VerifyingKey,
    signature: Signature,
}

impl RecoverableSignature {
    pub(crate) fn new(public_key: VerifyingKey, signature: Signature) -> Self {
        Self {
            public_key,
            signature,
        }
    }

    /// Parse the `0x`-prefixed hex wire form
    pub fn parse(s: &str) -> NodeResult<Self> {
        let hex_part = s
            .trim()
            .strip_prefix("0x")
            .ok_or_else(|| NodeError::InvalidSignature("signature must start with 0x".into()))?;
        let bytes = hex::decode(hex_part)
            .map_err(|e| NodeError::InvalidSignature(format!("signature is not hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Deserialize from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> NodeResult<Self> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(NodeError::InvalidSignature(format!(
                "signature must be {} bytes, got {}",
                SIGNATURE_LEN,
                bytes.len()
            )));
        }

        let key_bytes: [u8; 32] = bytes[..32]
            .try_into()
            .map_err(|_| NodeError::InvalidSignature("Invalid public key length".into()))?;
        let public_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| NodeError::InvalidSignature("Invalid public key".into()))?;

        let sig_bytes: [u8; 64] = bytes[32..]
            .try_into()
            .map_err(|_| NodeError::InvalidSignature("Invalid signature length".into()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        Ok(Self {
            public_key,
            signature,
        })
    }

    /// Serialize to raw bytes
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[..32].copy_from_slice(self.public_key.as_bytes());
        out[32..].copy_from_slice(&self.signature.to_bytes());
        out
    }

    /// Wire form: `0x` + hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// Verify against `digest` and return the signer's address
    pub fn recover(&self, digest: &[u8; 32]) -> NodeResult<Address> {
        self.public_key
            .verify_strict(digest, &self.signature)
            .map_err(|_| NodeError::InvalidSignature("signature does not verify".into()))?;
        Ok(Address::from_public_key(&self.public_key))
    }
}

impl std::fmt::Debug for RecoverableSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoverableSignature")
            .field("public_key", &hex::encode(self.public_key.as_bytes()))
            .field("signature", &hex::encode(self.signature.to_bytes()))
            .finish()
    }
}

impl std::fmt::Display for RecoverableSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for RecoverableSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RecoverableSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
