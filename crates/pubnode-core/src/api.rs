//! Endpoint handlers
//!
//! Transport-agnostic: an outer HTTP router deserializes the request,
//! calls the matching handler and serializes the [`ApiResponse`] body or the
//! [`ApiError`] (as an [`ErrorBody`]) with the given status. The in-process
//! [`LoopbackNetwork`](crate::federation::LoopbackNetwork) calls these
//! directly.
//!
//! | route | handler |
//! |---|---|
//! | `GET /profile` | [`NodeApi::profile`] |
//! | `POST /connections` | [`NodeApi::create_connection`] |
//! | `DELETE /connections` | [`NodeApi::destroy_connection`] |
//! | `GET /contents/{hash}` | [`NodeApi::content`] |
//! | `GET /publications` | [`NodeApi::publications`] |
//! | `POST /replications` | [`NodeApi::replicate`] |
//! | `POST /nodes/updates` | [`NodeApi::profile_update`] |

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::content::ContentStore;
use crate::error::{ErrorClass, NodeError, NodeResult};
use crate::federation::publishing::signed_publication;
use crate::federation::{
    FederationContext, Handshake, Origin, ProfileService, ReplicationOutcome, Replicator,
};
use crate::types::{
    Connection, ConnectionRequest, ContentHash, ContentQuery, ErrorBody, ProfileUpdateRequest,
    Publication, PublicationPage, PublicationQuery, RemoteProfile, ReplicationRequest,
};

/// Largest page a peer may request
pub const MAX_PAGE_LIMIT: usize = 100;

/// Successful handler result
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub body: T,
}

impl<T> ApiResponse<T> {
    fn ok(body: T) -> Self {
        Self { status: 200, body }
    }

    fn created(body: T) -> Self {
        Self { status: 201, body }
    }
}

/// Failed handler result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

impl ApiError {
    /// JSON body for the response
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code.clone(),
            message: self.message.clone(),
        }
    }
}

impl From<NodeError> for ApiError {
    fn from(e: NodeError) -> Self {
        match e.class() {
            ErrorClass::Internal => error!(error = %e, "Handler failed"),
            ErrorClass::Integrity => error!(error = %e, "Integrity failure"),
            _ => debug!(code = e.code(), error = %e, "Request rejected"),
        }
        Self {
            status: e.status(),
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// Result alias for handlers
pub type ApiResult<T> = Result<ApiResponse<T>, ApiError>;

/// Body of `GET /contents/{hash}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBody {
    pub bytes: Bytes,
    pub mimetype: String,
    /// HTTP-date of the last modification; the `If-Range` validator
    pub last_modified: String,
    /// Set on 206 responses: `bytes start-end/total`
    pub content_range: Option<String>,
    pub total_size: u64,
}

/// Every inbound endpoint of a node
#[derive(Clone, Debug)]
pub struct NodeApi {
    ctx: FederationContext,
    content: ContentStore,
    handshake: Handshake,
    replicator: Replicator,
    profiles: ProfileService,
}

impl NodeApi {
    pub fn new(
        ctx: FederationContext,
        handshake: Handshake,
        replicator: Replicator,
        profiles: ProfileService,
    ) -> Self {
        Self {
            content: ctx.content.clone(),
            ctx,
            handshake,
            replicator,
            profiles,
        }
    }

    /// `GET /profile`
    pub async fn profile(&self) -> ApiResult<RemoteProfile> {
        let me = self.ctx.self_node()?;
        Ok(ApiResponse::ok(me.to_profile()))
    }

    /// `POST /connections`
    pub async fn create_connection(&self, request: ConnectionRequest) -> ApiResult<Connection> {
        let origin = Origin::from_relayed(request.relayed);
        let connection = self.handshake.create_connection(&request, origin).await?;
        Ok(ApiResponse::created(connection))
    }

    /// `DELETE /connections`
    pub async fn destroy_connection(&self, request: ConnectionRequest) -> ApiResult<()> {
        let origin = Origin::from_relayed(request.relayed);
        self.handshake.destroy_connection(&request, origin).await?;
        Ok(ApiResponse {
            status: 204,
            body: (),
        })
    }

    /// `GET /contents/{hash}`.
    ///
    /// Only content referenced by a signed publication authored here is
    /// served; `timestamp` narrows that to one publication.
    pub async fn content(&self, hash: &str, query: ContentQuery) -> ApiResult<ContentBody> {
        let hash = ContentHash::parse(hash)?;
        self.require_published(&hash, query.timestamp)?;

        let stored = self.content.read(&hash).await?;
        let total = stored.bytes.len() as u64;
        let last_modified = http_date(stored.modified);

        let range_applies = match (&query.range, &query.if_range) {
            (Some(_), Some(validator)) => validator == &last_modified,
            (Some(_), None) => true,
            _ => false,
        };

        if range_applies {
            if let Some((start, end)) = parse_range(query.range.as_deref().unwrap_or(""), total)? {
                return Ok(ApiResponse {
                    status: 206,
                    body: ContentBody {
                        bytes: stored.bytes.slice(start as usize..=end as usize),
                        mimetype: stored.content.mimetype,
                        last_modified,
                        content_range: Some(format!("bytes {}-{}/{}", start, end, total)),
                        total_size: total,
                    },
                });
            }
        }

        Ok(ApiResponse::ok(ContentBody {
            bytes: stored.bytes,
            mimetype: stored.content.mimetype,
            last_modified,
            content_range: None,
            total_size: total,
        }))
    }

    fn require_published(&self, hash: &ContentHash, timestamp: Option<i64>) -> NodeResult<()> {
        let me = self.ctx.address();
        let published = self
            .ctx
            .storage
            .publications_for_content(hash)?
            .into_iter()
            .any(|p: Publication| {
                p.is_signed()
                    && p.author_address == me
                    && timestamp.map_or(true, |ts| p.created_at == ts)
            });
        if published {
            Ok(())
        } else {
            Err(NodeError::PublicationNotFound(hash.to_string()))
        }
    }

    /// `GET /publications`: signed publications authored here, in the order
    /// they were signed
    pub async fn publications(&self, query: PublicationQuery) -> ApiResult<PublicationPage> {
        let limit = match query.limit {
            0 => PublicationQuery::default().limit,
            n => n.min(MAX_PAGE_LIMIT),
        };
        let page = query.page.max(1);

        let all = self
            .ctx
            .storage
            .list_published(&self.ctx.address(), query.since, query.after)?;
        let total_pages = all.len().div_ceil(limit);

        let items = all
            .iter()
            .skip((page - 1) * limit)
            .take(limit)
            .map(|p| signed_publication(&self.ctx, p))
            .collect::<NodeResult<Vec<_>>>()?;

        Ok(ApiResponse::ok(PublicationPage {
            items,
            page,
            total_pages,
            has_next_page: page < total_pages,
        }))
    }

    /// `POST /replications`
    pub async fn replicate(&self, request: ReplicationRequest) -> ApiResult<Publication> {
        match self.replicator.replicate(&request).await? {
            ReplicationOutcome::Replicated(publication) => Ok(ApiResponse::created(publication)),
            ReplicationOutcome::AlreadyReplicated => Err(NodeError::ReplicationAlreadyExists(
                "publication already replicated".into(),
            )
            .into()),
        }
    }

    /// `POST /nodes/updates`
    pub async fn profile_update(&self, request: ProfileUpdateRequest) -> ApiResult<RemoteProfile> {
        let node = self.profiles.receive_update(&request)?;
        Ok(ApiResponse::ok(node.to_profile()))
    }
}

/// RFC 7231 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`
pub fn http_date(timestamp: i64) -> String {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Resolve a single `bytes=` range against `total` bytes.
///
/// Returns `Ok(None)` for headers that should be ignored (malformed, other
/// units, multiple ranges) and `RangeNotSatisfiable` when the range lies
/// outside the body.
pub fn parse_range(header: &str, total: u64) -> NodeResult<Option<(u64, u64)>> {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }
    let Some((start, end)) = spec.split_once('-') else {
        return Ok(None);
    };
    let (start, end) = (start.trim(), end.trim());

    let unsatisfiable = || NodeError::RangeNotSatisfiable(format!("{} of {} bytes", header, total));

    let range = match (start.is_empty(), end.is_empty()) {
        // bytes=-N: the last N bytes
        (true, false) => {
            let Ok(suffix) = end.parse::<u64>() else {
                return Ok(None);
            };
            if suffix == 0 || total == 0 {
                return Err(unsatisfiable());
            }
            (total.saturating_sub(suffix), total - 1)
        }
        (false, _) => {
            let Ok(first) = start.parse::<u64>() else {
                return Ok(None);
            };
            let last = if end.is_empty() {
                total.saturating_sub(1)
            } else {
                match end.parse::<u64>() {
                    Ok(last) if last >= first => last.min(total.saturating_sub(1)),
                    _ => return Ok(None),
                }
            };
            if first >= total {
                return Err(unsatisfiable());
            }
            (first, last)
        }
        (true, true) => return Ok(None),
    };
    Ok(Some(range))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(parse_range("bytes=0-3", 10).unwrap(), Some((0, 3)));
        assert_eq!(parse_range("bytes=4-", 10).unwrap(), Some((4, 9)));
        assert_eq!(parse_range("bytes=-3", 10).unwrap(), Some((7, 9)));
        assert_eq!(parse_range("bytes=5-100", 10).unwrap(), Some((5, 9)));
    }

    #[test]
    fn test_parse_range_ignored() {
        assert_eq!(parse_range("items=0-3", 10).unwrap(), None);
        assert_eq!(parse_range("bytes=0-1,4-5", 10).unwrap(), None);
        assert_eq!(parse_range("bytes=x-3", 10).unwrap(), None);
        assert_eq!(parse_range("bytes=5-2", 10).unwrap(), None);
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        assert!(matches!(
            parse_range("bytes=10-", 10),
            Err(NodeError::RangeNotSatisfiable(_))
        ));
        assert!(matches!(
            parse_range("bytes=-0", 10),
            Err(NodeError::RangeNotSatisfiable(_))
        ));
    }

    #[test]
    fn test_http_date() {
        assert_eq!(http_date(784111777), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn test_api_error_from_node_error() {
        let err: ApiError = NodeError::NotFollowing("0xabc".into()).into();
        assert_eq!(err.status, 401);
        assert_eq!(err.code, "NOT_FOLLOWING");
        assert_eq!(err.body().code, "NOT_FOLLOWING");
    }
}
