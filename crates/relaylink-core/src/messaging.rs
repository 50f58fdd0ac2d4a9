//! Collaborator traits
//!
//! The negotiation core does not own a messaging stack or a relay server.
//! It talks to both through the traits in this module, which the embedding
//! application implements.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::candidate::CandidateHost;
use crate::error::Result;
use crate::messages::{BytestreamReply, Request};

/// Reply timeout of a channel that does not configure its own
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Correlated request/reply messaging with the other peer and with relays
///
/// # Errors
///
/// Implementations map a missing reply to [`crate::NegotiationError::NoResponse`]
/// and delivery failures to [`crate::NegotiationError::Messaging`].
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Stable identity of the local peer
    fn local_identity(&self) -> String;

    /// How long requests without a negotiation-specific bound wait for a reply
    fn reply_timeout(&self) -> Duration {
        DEFAULT_REPLY_TIMEOUT
    }

    /// Send `request` to `to` and wait up to `timeout` for the correlated reply
    async fn request(&self, to: &str, request: Request, timeout: Duration)
    -> Result<BytestreamReply>;

    /// Answer the request `correlation_id` received from `to`
    async fn reply(&self, to: &str, correlation_id: &str, reply: BytestreamReply) -> Result<()>;

    /// Whether `peer` announces support for bytestreams
    async fn supports_bytestreams(&self, peer: &str) -> Result<bool>;

    /// Identities of the relays offered by the local service
    async fn discover_proxies(&self) -> Result<Vec<String>>;
}

/// Relay instance running inside the local process
///
/// The relay keeps the connections of peers that connected to it, keyed by
/// session digest. Its own locking discipline is not this crate's concern.
pub trait LocalRelay: Send + Sync {
    /// Take the connection a peer opened for `digest`, if any
    fn connection_for_digest(&self, digest: &str) -> Option<TcpStream>;

    /// Allow peers to connect with `digest`
    fn add_transfer(&self, digest: &str);

    /// Stop accepting connections for `digest`
    fn remove_transfer(&self, digest: &str);

    /// Stream hosts the relay is reachable on, operated by `owner`
    fn stream_hosts(&self, owner: &str) -> Vec<CandidateHost>;
}
