//! Connection Handshake - signed follow and unfollow between two nodes
//!
//! A follow edge exists on both nodes or on neither. The follower signs one
//! document; whichever node receives it first verifies it, forwards it to
//! the other party and stores its half of the edge only after the other
//! party accepted. Nothing intermediate is persisted.
//!
//! ```text
//! follower (F)                         followee (E)
//!     |  POST /connections (client)        |
//!     | ---------------------------------> |  verify, fetch F's profile
//!     |  POST /connections (relayed)       |
//!     | <--------------------------------- |  F stores mirror edge
//!     |                                    |  E stores edge
//! ```

use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::federation::{with_timeout, FederationContext, FederationEvent, Origin};
use crate::identity::Address;
use crate::types::documents::{
    connection_document, disconnection_document, ConnectionMessage, DisconnectionMessage,
};
use crate::types::{now_timestamp, Connection, ConnectionRequest};

/// Verifies and applies connection documents
#[derive(Clone, Debug)]
pub struct Handshake {
    ctx: FederationContext,
}

impl Handshake {
    pub fn new(ctx: FederationContext) -> Self {
        Self { ctx }
    }

    /// Handle a signed follow request.
    ///
    /// Returns the stored edge.
    pub async fn create_connection(
        &self,
        request: &ConnectionRequest,
        origin: Origin,
    ) -> NodeResult<Connection> {
        let message = ConnectionMessage::from_document(&request.typed_data).map_err(|e| match e {
            NodeError::InvalidUrlFormat(_) => e,
            other => NodeError::InvalidPayload(other.to_string()),
        })?;
        self.ctx.verifier.assert_fresh(message.timestamp)?;

        let signer = self
            .ctx
            .verifier
            .recover_signer(&request.typed_data, &request.signature)?;
        if signer == message.followee_address {
            return Err(NodeError::SelfConnection(signer.to_string()));
        }

        let me = self.ctx.address();
        if message.followee_address == me {
            self.accept_as_followee(request, &message, signer, origin)
                .await
        } else if signer == me {
            self.accept_as_follower(&message, signer).await
        } else {
            Err(NodeError::FolloweeIdentityMismatch(format!(
                "neither followee {} nor signer {} is this node",
                message.followee_address, signer
            )))
        }
    }

    async fn accept_as_followee(
        &self,
        request: &ConnectionRequest,
        message: &ConnectionMessage,
        follower: Address,
        origin: Origin,
    ) -> NodeResult<Connection> {
        let mut profile = self.ctx.fetch_profile(&message.follower_url).await?;
        if profile.address != follower {
            return Err(NodeError::SignerMismatch(format!(
                "profile at {} belongs to {}, document signed by {}",
                message.follower_url, profile.address, follower
            )));
        }
        // Store the URL the signature covers, not the one the profile claims
        profile.url = message.follower_url.clone();

        if self
            .ctx
            .storage
            .is_following(&follower, &message.followee_address)?
        {
            return Err(NodeError::ConnectionAlreadyExists(Connection::key(
                &follower,
                &message.followee_address,
            )));
        }

        if origin == Origin::Client {
            let forwarded = with_timeout(
                self.ctx.request_timeout,
                "connection forward",
                self.ctx
                    .client
                    .create_connection(&message.follower_url, &request.relayed()),
            )
            .await;
            match forwarded {
                Ok(()) => debug!(peer = %follower, "Follower accepted mirrored edge"),
                Err(NodeError::ConnectionAlreadyExists(_)) => {
                    debug!(peer = %follower, "Follower already had the edge")
                }
                Err(e) => {
                    warn!(peer = %follower, error = %e, "Follower rejected connection forward");
                    return Err(e);
                }
            }
        }

        self.ctx.storage.upsert_remote_profile(&profile)?;
        let stored = self
            .ctx
            .storage
            .insert_connection(&Connection::new(follower.clone(), message.followee_address.clone()))?;

        info!(peer = %follower, "New follower");
        self.ctx.emit(FederationEvent::ConnectionCreated {
            follower,
            followee: message.followee_address.clone(),
        });
        Ok(stored)
    }

    async fn accept_as_follower(
        &self,
        message: &ConnectionMessage,
        me: Address,
    ) -> NodeResult<Connection> {
        let mut profile = self.ctx.fetch_profile(&message.followee_url).await?;
        if profile.address != message.followee_address {
            return Err(NodeError::FolloweeIdentityMismatch(format!(
                "profile at {} belongs to {}, expected {}",
                message.followee_url, profile.address, message.followee_address
            )));
        }
        profile.url = message.followee_url.clone();

        self.ctx.storage.upsert_remote_profile(&profile)?;
        match self
            .ctx
            .storage
            .insert_connection(&Connection::new(me.clone(), profile.address.clone()))
        {
            Ok(stored) => {
                info!(peer = %profile.address, "Now following");
                self.ctx.emit(FederationEvent::ConnectionCreated {
                    follower: me,
                    followee: profile.address,
                });
                Ok(stored)
            }
            Err(NodeError::ConnectionAlreadyExists(key)) => {
                debug!(%key, "Mirrored edge already present");
                self.ctx
                    .storage
                    .load_connection(&me, &profile.address)?
                    .ok_or(NodeError::ConnectionNotFound(key))
            }
            Err(e) => Err(e),
        }
    }

    /// Handle a signed unfollow request
    pub async fn destroy_connection(
        &self,
        request: &ConnectionRequest,
        origin: Origin,
    ) -> NodeResult<()> {
        let message = DisconnectionMessage::from_document(&request.typed_data)
            .map_err(|e| NodeError::InvalidPayload(e.to_string()))?;
        self.ctx.verifier.assert_fresh(message.timestamp)?;

        let signer = self
            .ctx
            .verifier
            .recover_signer(&request.typed_data, &request.signature)?;
        if signer != message.follower_address {
            return Err(NodeError::SignerMismatch(format!(
                "document names follower {} but was signed by {}",
                message.follower_address, signer
            )));
        }

        let me = self.ctx.address();
        let other = if message.followee_address == me {
            &message.follower_address
        } else if message.follower_address == me {
            &message.followee_address
        } else {
            return Err(NodeError::FolloweeIdentityMismatch(format!(
                "edge {} -> {} does not involve this node",
                message.follower_address, message.followee_address
            )));
        };

        if origin == Origin::Client {
            self.forward_teardown(other, request).await;
        }

        let removed = self
            .ctx
            .storage
            .remove_connection(&message.follower_address, &message.followee_address)?;
        if !removed {
            if origin == Origin::Client {
                return Err(NodeError::ConnectionNotFound(Connection::key(
                    &message.follower_address,
                    &message.followee_address,
                )));
            }
            debug!(peer = %other, "Edge already gone");
            return Ok(());
        }

        info!(
            follower = %message.follower_address,
            followee = %message.followee_address,
            "Connection removed"
        );
        self.ctx.emit(FederationEvent::ConnectionDestroyed {
            follower: message.follower_address,
            followee: message.followee_address,
        });
        Ok(())
    }

    /// Best effort: the local teardown proceeds whatever the other side says
    async fn forward_teardown(&self, other: &Address, request: &ConnectionRequest) {
        let url = match self.ctx.storage.load_node(other) {
            Ok(Some(node)) => node.url,
            Ok(None) => {
                warn!(peer = %other, "Unknown peer, teardown not forwarded");
                return;
            }
            Err(e) => {
                warn!(peer = %other, error = %e, "Cannot load peer, teardown not forwarded");
                return;
            }
        };

        let forwarded = with_timeout(
            self.ctx.request_timeout,
            "disconnection forward",
            self.ctx.client.destroy_connection(&url, &request.relayed()),
        )
        .await;
        if let Err(e) = forwarded {
            warn!(peer = %other, error = %e, "Teardown forward failed");
        }
    }

    /// Follow the node at `followee_url`.
    ///
    /// Signs a connection document with this node's key and sends it to the
    /// followee, which forwards it back here for the mirror edge.
    pub async fn initiate_follow(&self, followee_url: &str) -> NodeResult<Connection> {
        let me = self.ctx.self_node()?;
        let profile = self.ctx.fetch_profile(followee_url).await?;

        let document = connection_document(&profile.address, &profile.url, &me.url, now_timestamp());
        let signature = self.ctx.keypair.sign_document(&document)?;
        let request = ConnectionRequest::new(document, signature.to_hex());

        info!(peer = %profile.address, url = %profile.url, "Requesting to follow");
        with_timeout(
            self.ctx.request_timeout,
            "follow request",
            self.ctx.client.create_connection(&profile.url, &request),
        )
        .await?;

        // The followee normally forwarded already; this is a no-op then
        self.create_connection(&request.relayed(), Origin::Peer).await
    }

    /// Stop following `followee`
    pub async fn initiate_unfollow(&self, followee: &Address) -> NodeResult<()> {
        let me = self.ctx.address();
        let node = self.ctx.node(followee)?;
        if !self.ctx.storage.is_following(&me, followee)? {
            return Err(NodeError::ConnectionNotFound(Connection::key(&me, followee)));
        }

        let document = disconnection_document(followee, &me, now_timestamp());
        let signature = self.ctx.keypair.sign_document(&document)?;
        let request = ConnectionRequest::new(document, signature.to_hex());

        info!(peer = %followee, "Requesting to unfollow");
        let sent = with_timeout(
            self.ctx.request_timeout,
            "unfollow request",
            self.ctx.client.destroy_connection(&node.url, &request),
        )
        .await;
        if let Err(e) = sent {
            warn!(peer = %followee, error = %e, "Followee did not acknowledge unfollow");
        }

        self.destroy_connection(&request.relayed(), Origin::Peer).await
    }
}
