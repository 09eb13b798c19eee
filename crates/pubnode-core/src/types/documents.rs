//! Typed-document schemas for every signed federation action
//!
//! | primaryType      | signed by | fields |
//! |------------------|-----------|--------|
//! | `Connection`     | follower  | followeeAddress, followeeUrl, followerUrl, timestamp |
//! | `Disconnection`  | follower  | followeeAddress, followerAddress, timestamp |
//! | `Publication`    | author    | nodeAddress, authorAddress, contentHash, createdAtTimestamp |
//! | `ProfileUpdate`  | node      | address, url, title, description, profileVersion |
//!
//! Parsers reject documents whose schema differs from the canonical one, so a
//! signature always covers every field that is read back out.

use std::collections::BTreeMap;

use serde_json::json;

use crate::error::{NodeError, NodeResult};
use crate::identity::{Address, TypedDocument, TypedDomain, TypedField};
use crate::types::wire::RemoteProfile;
use crate::types::ContentHash;

pub const DOMAIN_NAME: &str = "pubnode";
pub const DOMAIN_VERSION: &str = "1";

pub const CONNECTION_TYPE: &str = "Connection";
pub const DISCONNECTION_TYPE: &str = "Disconnection";
pub const PUBLICATION_TYPE: &str = "Publication";
pub const PROFILE_UPDATE_TYPE: &str = "ProfileUpdate";

/// Domain shared by every document of this protocol
pub fn protocol_domain() -> TypedDomain {
    TypedDomain {
        name: DOMAIN_NAME.to_string(),
        version: DOMAIN_VERSION.to_string(),
    }
}

fn connection_fields() -> Vec<TypedField> {
    vec![
        TypedField::new("followeeAddress", "address"),
        TypedField::new("followeeUrl", "string"),
        TypedField::new("followerUrl", "string"),
        TypedField::new("timestamp", "uint256"),
    ]
}

fn disconnection_fields() -> Vec<TypedField> {
    vec![
        TypedField::new("followeeAddress", "address"),
        TypedField::new("followerAddress", "address"),
        TypedField::new("timestamp", "uint256"),
    ]
}

fn publication_fields() -> Vec<TypedField> {
    vec![
        TypedField::new("nodeAddress", "address"),
        TypedField::new("authorAddress", "address"),
        TypedField::new("contentHash", "bytes32"),
        TypedField::new("createdAtTimestamp", "uint256"),
    ]
}

fn profile_update_fields() -> Vec<TypedField> {
    vec![
        TypedField::new("address", "address"),
        TypedField::new("url", "string"),
        TypedField::new("title", "string"),
        TypedField::new("description", "string"),
        TypedField::new("profileVersion", "uint256"),
    ]
}

fn document(primary_type: &str, fields: Vec<TypedField>, message: serde_json::Value) -> TypedDocument {
    let mut types = BTreeMap::new();
    types.insert(primary_type.to_string(), fields);
    TypedDocument {
        domain: protocol_domain(),
        types,
        primary_type: primary_type.to_string(),
        message,
    }
}

/// Accept only absolute http(s) URLs; trailing slashes are dropped
pub fn validate_url(url: &str) -> NodeResult<String> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| NodeError::InvalidUrlFormat(format!("{}: {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(NodeError::InvalidUrlFormat(format!(
            "{}: expected an http(s) URL",
            url
        )));
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// Follow request, signed by the follower
pub fn connection_document(
    followee_address: &Address,
    followee_url: &str,
    follower_url: &str,
    timestamp: i64,
) -> TypedDocument {
    document(
        CONNECTION_TYPE,
        connection_fields(),
        json!({
            "followeeAddress": followee_address.as_str(),
            "followeeUrl": followee_url,
            "followerUrl": follower_url,
            "timestamp": timestamp,
        }),
    )
}

/// Parsed `Connection` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMessage {
    pub followee_address: Address,
    pub followee_url: String,
    pub follower_url: String,
    pub timestamp: i64,
}

impl ConnectionMessage {
    pub fn from_document(doc: &TypedDocument) -> NodeResult<Self> {
        doc.expect_schema(&protocol_domain(), CONNECTION_TYPE, &connection_fields())?;
        Ok(Self {
            followee_address: doc.message_address("followeeAddress")?,
            followee_url: validate_url(doc.message_str("followeeUrl")?)?,
            follower_url: validate_url(doc.message_str("followerUrl")?)?,
            timestamp: doc.message_timestamp("timestamp")?,
        })
    }
}

/// Unfollow request, signed by the follower
pub fn disconnection_document(
    followee_address: &Address,
    follower_address: &Address,
    timestamp: i64,
) -> TypedDocument {
    document(
        DISCONNECTION_TYPE,
        disconnection_fields(),
        json!({
            "followeeAddress": followee_address.as_str(),
            "followerAddress": follower_address.as_str(),
            "timestamp": timestamp,
        }),
    )
}

/// Parsed `Disconnection` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectionMessage {
    pub followee_address: Address,
    pub follower_address: Address,
    pub timestamp: i64,
}

impl DisconnectionMessage {
    pub fn from_document(doc: &TypedDocument) -> NodeResult<Self> {
        doc.expect_schema(&protocol_domain(), DISCONNECTION_TYPE, &disconnection_fields())?;
        Ok(Self {
            followee_address: doc.message_address("followeeAddress")?,
            follower_address: doc.message_address("followerAddress")?,
            timestamp: doc.message_timestamp("timestamp")?,
        })
    }
}

/// Publication attestation, signed by the author
pub fn publication_document(
    node_address: &Address,
    author_address: &Address,
    content_hash: &ContentHash,
    created_at: i64,
) -> TypedDocument {
    document(
        PUBLICATION_TYPE,
        publication_fields(),
        json!({
            "nodeAddress": node_address.as_str(),
            "authorAddress": author_address.as_str(),
            "contentHash": content_hash.as_str(),
            "createdAtTimestamp": created_at,
        }),
    )
}

/// Parsed `Publication` message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationMessage {
    pub node_address: Address,
    pub author_address: Address,
    pub content_hash: ContentHash,
    pub created_at: i64,
}

impl PublicationMessage {
    pub fn from_document(doc: &TypedDocument) -> NodeResult<Self> {
        doc.expect_schema(&protocol_domain(), PUBLICATION_TYPE, &publication_fields())?;
        Ok(Self {
            node_address: doc.message_address("nodeAddress")?,
            author_address: doc.message_address("authorAddress")?,
            content_hash: ContentHash::parse(doc.message_str("contentHash")?)?,
            created_at: doc.message_timestamp("createdAtTimestamp")?,
        })
    }
}

/// Profile push, signed by the node whose profile changed
pub fn profile_update_document(profile: &RemoteProfile) -> TypedDocument {
    document(
        PROFILE_UPDATE_TYPE,
        profile_update_fields(),
        json!({
            "address": profile.address.as_str(),
            "url": profile.url,
            "title": profile.title,
            "description": profile.description,
            "profileVersion": profile.profile_version,
        }),
    )
}

/// Parse a `ProfileUpdate` document back into a profile
pub fn parse_profile_update(doc: &TypedDocument) -> NodeResult<RemoteProfile> {
    doc.expect_schema(&protocol_domain(), PROFILE_UPDATE_TYPE, &profile_update_fields())?;
    let profile_version = doc.message_timestamp("profileVersion")?;
    Ok(RemoteProfile {
        address: doc.message_address("address")?,
        url: validate_url(doc.message_str("url")?)?,
        title: doc.message_str("title")?.to_string(),
        description: doc.message_str("description")?.to_string(),
        profile_version: u64::try_from(profile_version)
            .map_err(|_| NodeError::InvalidPayload("negative profileVersion".into()))?,
    })
}
