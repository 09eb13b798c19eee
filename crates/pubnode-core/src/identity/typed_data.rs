//! Typed structured documents
//!
//! A typed document is `{domain, types, primaryType, message}` in the
//! EIP-712 layout. Its digest is
//!
//! ```text
//! sha256(0x19 0x01 || hashStruct(EIP712Domain, domain) || hashStruct(primaryType, message))
//! hashStruct(T, v) = sha256(typeHash(T) || enc(v.f1) || enc(v.f2) || ...)
//! typeHash(T)      = sha256(encodeType(T))
//! ```
//!
//! `encodeType` lists `T(type name,...)` followed by every struct type it
//! references, sorted by name. Each field encodes to one 32-byte word.
//! Nothing here knows about concrete schemas; each signed action defines its
//! own `types` table.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{NodeError, NodeResult};
use crate::identity::address::Address;

/// Domain type name, always hashed with a fixed schema
pub const DOMAIN_TYPE: &str = "EIP712Domain";

/// Signing domain separating this protocol from other typed-data users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedDomain {
    pub name: String,
    pub version: String,
}

/// One field in a struct type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

impl TypedField {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// A document signed by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDocument {
    pub domain: TypedDomain,
    pub types: BTreeMap<String, Vec<TypedField>>,
    pub primary_type: String,
    pub message: Value,
}

impl TypedDocument {
    /// Compute the 32-byte digest that gets signed
    pub fn digest(&self) -> NodeResult<[u8; 32]> {
        let domain_hash = self.hash_domain();
        let message_hash = self.hash_struct(&self.primary_type, &self.message)?;

        let mut hasher = Sha256::new();
        hasher.update([0x19, 0x01]);
        hasher.update(domain_hash);
        hasher.update(message_hash);
        Ok(hasher.finalize().into())
    }

    fn hash_domain(&self) -> [u8; 32] {
        let type_hash = Sha256::digest(format!("{}(string name,string version)", DOMAIN_TYPE));
        let mut hasher = Sha256::new();
        hasher.update(type_hash);
        hasher.update(Sha256::digest(self.domain.name.as_bytes()));
        hasher.update(Sha256::digest(self.domain.version.as_bytes()));
        hasher.finalize().into()
    }

    fn fields(&self, type_name: &str) -> NodeResult<&[TypedField]> {
        self.types
            .get(type_name)
            .map(Vec::as_slice)
            .ok_or_else(|| NodeError::InvalidPayload(format!("unknown struct type {}", type_name)))
    }

    fn collect_dependencies(&self, type_name: &str, found: &mut BTreeSet<String>) -> NodeResult<()> {
        if found.contains(type_name) {
            return Ok(());
        }
        found.insert(type_name.to_string());
        for field in self.fields(type_name)? {
            if self.types.contains_key(&field.ty) {
                self.collect_dependencies(&field.ty, found)?;
            }
        }
        Ok(())
    }

    /// `Primary(type name,...)Dep1(...)Dep2(...)`
    pub fn encode_type(&self, type_name: &str) -> NodeResult<String> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(type_name, &mut deps)?;
        deps.remove(type_name);

        let mut out = String::new();
        for name in std::iter::once(type_name.to_string()).chain(deps) {
            let params: Vec<String> = self
                .fields(&name)?
                .iter()
                .map(|f| format!("{} {}", f.ty, f.name))
                .collect();
            out.push_str(&format!("{}({})", name, params.join(",")));
        }
        Ok(out)
    }

    fn hash_struct(&self, type_name: &str, value: &Value) -> NodeResult<[u8; 32]> {
        let object = value.as_object().ok_or_else(|| {
            NodeError::InvalidPayload(format!("{} value must be an object", type_name))
        })?;

        let mut hasher = Sha256::new();
        hasher.update(Sha256::digest(self.encode_type(type_name)?.as_bytes()));
        for field in self.fields(type_name)? {
            let field_value = object.get(&field.name).ok_or_else(|| {
                NodeError::InvalidPayload(format!("{}.{} is missing", type_name, field.name))
            })?;
            hasher.update(self.encode_value(&field.ty, field_value)?);
        }
        Ok(hasher.finalize().into())
    }

    fn encode_value(&self, ty: &str, value: &Value) -> NodeResult<[u8; 32]> {
        if self.types.contains_key(ty) {
            return self.hash_struct(ty, value);
        }

        let mut word = [0u8; 32];
        match ty {
            "string" => {
                let s = value
                    .as_str()
                    .ok_or_else(|| NodeError::InvalidPayload("expected string".into()))?;
                word = Sha256::digest(s.as_bytes()).into();
            }
            "address" => {
                let s = value
                    .as_str()
                    .ok_or_else(|| NodeError::InvalidPayload("expected address string".into()))?;
                word[12..].copy_from_slice(&Address::parse(s)?.to_bytes());
            }
            "bool" => {
                let b = value
                    .as_bool()
                    .ok_or_else(|| NodeError::InvalidPayload("expected bool".into()))?;
                word[31] = u8::from(b);
            }
            "uint256" | "uint64" => {
                let n = as_unsigned(value)?;
                word[24..].copy_from_slice(&n.to_be_bytes());
            }
            "bytes32" => {
                let s = value
                    .as_str()
                    .and_then(|s| s.strip_prefix("0x"))
                    .ok_or_else(|| NodeError::InvalidPayload("expected 0x bytes32".into()))?;
                let bytes = hex::decode(s)
                    .map_err(|e| NodeError::InvalidPayload(format!("bytes32 is not hex: {}", e)))?;
                if bytes.len() != 32 {
                    return Err(NodeError::InvalidPayload("bytes32 must be 32 bytes".into()));
                }
                word.copy_from_slice(&bytes);
            }
            other => {
                return Err(NodeError::InvalidPayload(format!(
                    "unsupported field type {}",
                    other
                )))
            }
        }
        Ok(word)
    }

    /// Read a string field from the message
    pub fn message_str(&self, field: &str) -> NodeResult<&str> {
        self.message
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::InvalidPayload(format!("message.{} must be a string", field)))
    }

    /// Read an address field from the message
    pub fn message_address(&self, field: &str) -> NodeResult<Address> {
        Address::parse(self.message_str(field)?)
    }

    /// Read an unsigned integer field (number or decimal string) as i64
    pub fn message_timestamp(&self, field: &str) -> NodeResult<i64> {
        let value = self
            .message
            .get(field)
            .ok_or_else(|| NodeError::InvalidPayload(format!("message.{} is missing", field)))?;
        let n = as_unsigned(value)?;
        i64::try_from(n)
            .map_err(|_| NodeError::InvalidPayload(format!("message.{} out of range", field)))
    }

    /// Check that the document uses exactly the expected schema
    ///
    /// A signature only covers the fields listed in `types`, so a document
    /// with a trimmed schema must not be trusted for fields it omits.
    pub fn expect_schema(
        &self,
        domain: &TypedDomain,
        primary_type: &str,
        fields: &[TypedField],
    ) -> NodeResult<()> {
        if &self.domain != domain {
            return Err(NodeError::InvalidPayload(format!(
                "unexpected domain {}/{}",
                self.domain.name, self.domain.version
            )));
        }
        if self.primary_type != primary_type {
            return Err(NodeError::InvalidPayload(format!(
                "expected primaryType {}, got {}",
                primary_type, self.primary_type
            )));
        }
        if self.types.len() != 1 || self.fields(primary_type)? != fields {
            return Err(NodeError::InvalidPayload(format!(
                "unexpected schema for {}",
                primary_type
            )));
        }
        Ok(())
    }
}

fn as_unsigned(value: &Value) -> NodeResult<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| NodeError::InvalidPayload("expected unsigned integer".into())),
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|_| NodeError::InvalidPayload(format!("not an unsigned integer: {}", s))),
        _ => Err(NodeError::InvalidPayload("expected unsigned integer".into())),
    }
}
