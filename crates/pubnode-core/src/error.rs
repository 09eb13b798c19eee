//! Error types for pubnode
//!
//! Every expected failure maps to a stable wire code that remote peers see,
//! an HTTP status the router uses, and an [`ErrorClass`] that decides whether
//! the sync scheduler retries it next cycle.

use thiserror::Error;

/// How a failure should be treated by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or missing input. Rejected synchronously, never retried.
    Validation,
    /// Bad signature, unfollowed publisher, identity mismatch. Never retried.
    Trust,
    /// Timeout, refused connection, 5xx. Retried next cycle.
    Transient,
    /// Content hash mismatch. Poisoned item, surfaced prominently.
    Integrity,
    /// Programmer error or persistence loss.
    Internal,
}

/// Main error type for pubnode operations
#[derive(Error, Debug)]
pub enum NodeError {
    /// Request body could not be parsed into the expected document
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A required field is missing or empty
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Signature is malformed or does not match the expected signer
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Timestamp lies too far in the future
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Timestamp is older than the freshness window
    #[error("Signature expired: {0}")]
    ExpiredSignature(String),

    /// URL in a signed document does not parse as http(s)
    #[error("Invalid URL format: {0}")]
    InvalidUrlFormat(String),

    /// The followee named in the document is not this node
    #[error("Followee identity mismatch: {0}")]
    FolloweeIdentityMismatch(String),

    /// The recovered signer does not control the claimed identity
    #[error("Signer mismatch: {0}")]
    SignerMismatch(String),

    /// A node tried to follow itself
    #[error("Self connection rejected: {0}")]
    SelfConnection(String),

    /// The (follower, followee) edge already exists
    #[error("Connection already exists: {0}")]
    ConnectionAlreadyExists(String),

    /// No such (follower, followee) edge
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Inbound replication from a publisher we do not follow
    #[error("Not following publisher: {0}")]
    NotFollowing(String),

    /// Publication already present locally
    #[error("Replication already exists: {0}")]
    ReplicationAlreadyExists(String),

    /// Recomputed content hash differs from the attested one
    #[error("Content hash mismatch: expected {expected}, got {actual}")]
    ContentHashMismatch { expected: String, actual: String },

    /// FILE publication without a description
    #[error("Content description missing: {0}")]
    ContentDescriptionMissing(String),

    /// Publication was not found
    #[error("Publication not found: {0}")]
    PublicationNotFound(String),

    /// Content was not found
    #[error("Content not found: {0}")]
    ContentNotFound(String),

    /// Signed publications are immutable
    #[error("Publication already signed: {0}")]
    PublicationAlreadySigned(String),

    /// Node record was not found
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Profile push carried a version that is not newer than the stored one
    #[error("Stale profile version: stored {stored}, received {received}")]
    StaleProfileVersion { stored: u64, received: u64 },

    /// Requested byte range cannot be served
    #[error("Range not satisfiable: {0}")]
    RangeNotSatisfiable(String),

    /// Outbound call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Outbound call failed at the transport level or with a 5xx
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Remote peer rejected the call with a taxonomy code
    #[error("Remote rejected with {code} (HTTP {status}): {message}")]
    RemoteRejected {
        status: u16,
        code: String,
        message: String,
    },

    /// Node has not been initialized with an identity
    #[error("Identity error: {0}")]
    Identity(String),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Stable wire code shown to remote peers
    pub fn code(&self) -> &'static str {
        match self {
            NodeError::InvalidPayload(_) => "INVALID_PAYLOAD",
            NodeError::ValidationFailed(_) => "VALIDATION_FAILED",
            NodeError::InvalidSignature(_) => "INVALID_SIGNATURE",
            NodeError::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            NodeError::ExpiredSignature(_) => "EXPIRED_SIGNATURE",
            NodeError::InvalidUrlFormat(_) => "INVALID_URL_FORMAT",
            NodeError::FolloweeIdentityMismatch(_) => "FOLLOWEE_IDENTITY_MISMATCH",
            NodeError::SignerMismatch(_) => "SIGNER_MISMATCH",
            NodeError::SelfConnection(_) => "SELF_CONNECTION",
            NodeError::ConnectionAlreadyExists(_) => "CONNECTION_ALREADY_EXISTS",
            NodeError::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND",
            NodeError::NotFollowing(_) => "NOT_FOLLOWING",
            NodeError::ReplicationAlreadyExists(_) => "REPLICATION_ALREADY_EXISTS",
            NodeError::ContentHashMismatch { .. } => "CONTENT_HASH_MISMATCH",
            NodeError::ContentDescriptionMissing(_) => "CONTENT_DESCRIPTION_MISSING",
            NodeError::PublicationNotFound(_) => "PUBLICATION_NOT_FOUND",
            NodeError::ContentNotFound(_) => "CONTENT_NOT_FOUND",
            NodeError::PublicationAlreadySigned(_) => "PUBLICATION_ALREADY_SIGNED",
            NodeError::NodeNotFound(_) => "NODE_NOT_FOUND",
            NodeError::StaleProfileVersion { .. } => "STALE_PROFILE_VERSION",
            NodeError::RangeNotSatisfiable(_) => "RANGE_NOT_SATISFIABLE",
            NodeError::Timeout(_) => "TIMEOUT",
            NodeError::RemoteUnavailable(_) => "REMOTE_UNAVAILABLE",
            NodeError::RemoteRejected { .. } => "REMOTE_REJECTED",
            _ => "INTERNAL_ERROR",
        }
    }

    /// HTTP status the router should answer with
    pub fn status(&self) -> u16 {
        match self {
            NodeError::InvalidPayload(_)
            | NodeError::ValidationFailed(_)
            | NodeError::InvalidUrlFormat(_)
            | NodeError::SelfConnection(_) => 400,
            NodeError::InvalidSignature(_)
            | NodeError::InvalidTimestamp(_)
            | NodeError::ExpiredSignature(_)
            | NodeError::NotFollowing(_) => 401,
            NodeError::FolloweeIdentityMismatch(_) | NodeError::SignerMismatch(_) => 403,
            NodeError::ConnectionNotFound(_)
            | NodeError::PublicationNotFound(_)
            | NodeError::ContentNotFound(_)
            | NodeError::NodeNotFound(_) => 404,
            NodeError::ConnectionAlreadyExists(_)
            | NodeError::ReplicationAlreadyExists(_)
            | NodeError::PublicationAlreadySigned(_)
            | NodeError::StaleProfileVersion { .. } => 409,
            NodeError::RangeNotSatisfiable(_) => 416,
            NodeError::ContentHashMismatch { .. } | NodeError::ContentDescriptionMissing(_) => 422,
            NodeError::RemoteUnavailable(_) | NodeError::RemoteRejected { .. } => 502,
            NodeError::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Taxonomy class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            NodeError::InvalidPayload(_)
            | NodeError::ValidationFailed(_)
            | NodeError::InvalidUrlFormat(_)
            | NodeError::ContentDescriptionMissing(_)
            | NodeError::RangeNotSatisfiable(_)
            | NodeError::PublicationNotFound(_)
            | NodeError::ContentNotFound(_)
            | NodeError::NodeNotFound(_)
            | NodeError::ConnectionAlreadyExists(_)
            | NodeError::ConnectionNotFound(_)
            | NodeError::ReplicationAlreadyExists(_)
            | NodeError::PublicationAlreadySigned(_)
            | NodeError::StaleProfileVersion { .. } => ErrorClass::Validation,
            NodeError::InvalidSignature(_)
            | NodeError::InvalidTimestamp(_)
            | NodeError::ExpiredSignature(_)
            | NodeError::FolloweeIdentityMismatch(_)
            | NodeError::SignerMismatch(_)
            | NodeError::SelfConnection(_)
            | NodeError::NotFollowing(_) => ErrorClass::Trust,
            NodeError::Timeout(_) | NodeError::RemoteUnavailable(_) => ErrorClass::Transient,
            NodeError::RemoteRejected { status, .. } if *status >= 500 => ErrorClass::Transient,
            NodeError::RemoteRejected { .. } => ErrorClass::Trust,
            NodeError::ContentHashMismatch { .. } => ErrorClass::Integrity,
            _ => ErrorClass::Internal,
        }
    }

    /// Whether the failure may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Rebuild a typed error from a remote taxonomy code where one exists
    pub fn from_remote(status: u16, code: &str, message: &str) -> Self {
        match code {
            "CONNECTION_ALREADY_EXISTS" => NodeError::ConnectionAlreadyExists(message.to_string()),
            "REPLICATION_ALREADY_EXISTS" => {
                NodeError::ReplicationAlreadyExists(message.to_string())
            }
            "CONNECTION_NOT_FOUND" => NodeError::ConnectionNotFound(message.to_string()),
            "PUBLICATION_NOT_FOUND" => NodeError::PublicationNotFound(message.to_string()),
            "CONTENT_NOT_FOUND" => NodeError::ContentNotFound(message.to_string()),
            _ if status >= 500 => NodeError::RemoteUnavailable(format!(
                "HTTP {} {}: {}",
                status, code, message
            )),
            _ => NodeError::RemoteRejected {
                status,
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}

/// Result type alias using NodeError
pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NodeError::PublicationNotFound("42".to_string());
        assert_eq!(format!("{}", err), "Publication not found: 42");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: NodeError = io_err.into();
        assert!(matches!(err, NodeError::Io(_)));
        assert_eq!(err.class(), ErrorClass::Internal);
    }

    #[test]
    fn test_codes_and_statuses() {
        let err = NodeError::ConnectionAlreadyExists("a->b".into());
        assert_eq!(err.code(), "CONNECTION_ALREADY_EXISTS");
        assert_eq!(err.status(), 409);

        let err = NodeError::NotFollowing("0xabc".into());
        assert_eq!(err.code(), "NOT_FOLLOWING");
        assert_eq!(err.status(), 401);

        let err = NodeError::ContentHashMismatch {
            expected: "0x01".into(),
            actual: "0x02".into(),
        };
        assert_eq!(err.code(), "CONTENT_HASH_MISMATCH");
        assert_eq!(err.class(), ErrorClass::Integrity);
    }

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(NodeError::Timeout("fetch".into()).is_retryable());
        assert!(NodeError::RemoteUnavailable("refused".into()).is_retryable());
        assert!(!NodeError::InvalidSignature("bad".into()).is_retryable());
        assert!(!NodeError::ContentHashMismatch {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_from_remote_maps_known_codes() {
        let err = NodeError::from_remote(409, "CONNECTION_ALREADY_EXISTS", "dup");
        assert!(matches!(err, NodeError::ConnectionAlreadyExists(_)));

        let err = NodeError::from_remote(503, "INTERNAL_ERROR", "down");
        assert!(err.is_retryable());

        let err = NodeError::from_remote(401, "NOT_FOLLOWING", "nope");
        assert_eq!(err.class(), ErrorClass::Trust);
    }
}
