//! Peer Client - outbound calls to other nodes
//!
//! Every node-to-node call goes through [`PeerClient`]. [`HttpPeerClient`]
//! speaks the JSON-over-HTTP protocol with `reqwest`; the in-process
//! [`LoopbackNetwork`](super::LoopbackNetwork) implements the same trait for
//! multi-node tests.
//!
//! Failures come back as [`NodeError`]: a remote taxonomy code is rebuilt
//! with [`NodeError::from_remote`], transport failures and 5xx become
//! `RemoteUnavailable`, deadlines become `Timeout`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::content::ContentReader;
use crate::error::{NodeError, NodeResult};
use crate::types::{
    ConnectionRequest, ContentHash, ErrorBody, ProfileUpdateRequest, PublicationPage,
    PublicationQuery, RemoteProfile, ReplicationRequest,
};

/// Raw content bytes fetched from a peer
pub struct FetchedContent {
    /// Content-Type the peer answered with
    pub mimetype: Option<String>,
    pub reader: ContentReader,
}

impl std::fmt::Debug for FetchedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedContent")
            .field("mimetype", &self.mimetype)
            .finish()
    }
}

/// Outbound protocol calls, addressed by a peer's base URL
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// `GET /profile`
    async fn fetch_profile(&self, base_url: &str) -> NodeResult<RemoteProfile>;

    /// `POST /connections`
    async fn create_connection(&self, base_url: &str, request: &ConnectionRequest)
        -> NodeResult<()>;

    /// `DELETE /connections`
    async fn destroy_connection(
        &self,
        base_url: &str,
        request: &ConnectionRequest,
    ) -> NodeResult<()>;

    /// `POST /replications`
    async fn replicate(&self, base_url: &str, request: &ReplicationRequest) -> NodeResult<()>;

    /// `GET /publications`
    async fn fetch_publications(
        &self,
        base_url: &str,
        query: &PublicationQuery,
    ) -> NodeResult<PublicationPage>;

    /// `GET /contents/{hash}`
    async fn fetch_content(
        &self,
        base_url: &str,
        hash: &ContentHash,
        timestamp: Option<i64>,
    ) -> NodeResult<FetchedContent>;

    /// `POST /nodes/updates`
    async fn push_profile_update(
        &self,
        base_url: &str,
        request: &ProfileUpdateRequest,
    ) -> NodeResult<()>;
}

/// Run `fut` with a deadline, mapping expiry to `NodeError::Timeout`
pub async fn with_timeout<T, F>(duration: Duration, what: &str, fut: F) -> NodeResult<T>
where
    F: Future<Output = NodeResult<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(NodeError::Timeout(format!(
            "{} after {}ms",
            what,
            duration.as_millis()
        ))),
    }
}

/// Join a base URL and an endpoint path
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// `PeerClient` over HTTP
#[derive(Clone, Debug)]
pub struct HttpPeerClient {
    http_client: reqwest::Client,
}

impl HttpPeerClient {
    /// Create a client whose requests time out after `timeout`
    pub fn new(timeout: Duration) -> NodeResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pubnode/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NodeError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> NodeResult<reqwest::Response> {
        let response = request.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => (body.code, body.message),
            Err(_) => ("HTTP_ERROR".to_string(), text),
        };
        debug!(status, code = %code, "Peer rejected request");
        Err(NodeError::from_remote(status, &code, &message))
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> NodeResult<T> {
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| NodeError::InvalidPayload(format!("peer sent malformed JSON: {}", e)))
    }
}

fn transport_error(e: reqwest::Error) -> NodeError {
    if e.is_timeout() {
        NodeError::Timeout(e.to_string())
    } else {
        NodeError::RemoteUnavailable(e.to_string())
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_profile(&self, base_url: &str) -> NodeResult<RemoteProfile> {
        let url = endpoint(base_url, "profile");
        debug!(%url, "Fetching profile");
        self.send_json(self.http_client.get(&url)).await
    }

    async fn create_connection(
        &self,
        base_url: &str,
        request: &ConnectionRequest,
    ) -> NodeResult<()> {
        let url = endpoint(base_url, "connections");
        debug!(%url, relayed = request.relayed, "Sending connection request");
        self.send(self.http_client.post(&url).json(request)).await?;
        Ok(())
    }

    async fn destroy_connection(
        &self,
        base_url: &str,
        request: &ConnectionRequest,
    ) -> NodeResult<()> {
        let url = endpoint(base_url, "connections");
        debug!(%url, relayed = request.relayed, "Sending disconnection request");
        self.send(self.http_client.delete(&url).json(request)).await?;
        Ok(())
    }

    async fn replicate(&self, base_url: &str, request: &ReplicationRequest) -> NodeResult<()> {
        let url = endpoint(base_url, "replications");
        self.send(self.http_client.post(&url).json(request)).await?;
        Ok(())
    }

    async fn fetch_publications(
        &self,
        base_url: &str,
        query: &PublicationQuery,
    ) -> NodeResult<PublicationPage> {
        let url = endpoint(base_url, "publications");
        debug!(%url, since = query.since, after = ?query.after, page = query.page, "Fetching publications page");
        self.send_json(self.http_client.get(&url).query(query)).await
    }

    async fn fetch_content(
        &self,
        base_url: &str,
        hash: &ContentHash,
        timestamp: Option<i64>,
    ) -> NodeResult<FetchedContent> {
        let url = endpoint(base_url, &format!("contents/{}", hash));
        let mut request = self.http_client.get(&url);
        if let Some(ts) = timestamp {
            request = request.query(&[("timestamp", ts)]);
        }

        let response = self.send(request).await?;
        let mimetype = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let stream = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(FetchedContent {
            mimetype,
            reader: Box::new(StreamReader::new(Box::pin(stream))),
        })
    }

    async fn push_profile_update(
        &self,
        base_url: &str,
        request: &ProfileUpdateRequest,
    ) -> NodeResult<()> {
        let url = endpoint(base_url, "nodes/updates");
        self.send(self.http_client.post(&url).json(request)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("https://a.example/", "/profile"),
            "https://a.example/profile"
        );
        assert_eq!(
            endpoint("https://a.example/blog", "contents/0x01"),
            "https://a.example/blog/contents/0x01"
        );
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: NodeResult<()> = with_timeout(Duration::from_millis(10), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(NodeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result() {
        let result = with_timeout(Duration::from_secs(1), "fast call", async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_transient() {
        let client = HttpPeerClient::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on localhost is closed on test machines
        let err = client.fetch_profile("http://127.0.0.1:9").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
