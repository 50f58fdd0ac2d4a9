//! Initiator dispatcher
//!
//! Mirrors the responder's choice from the initiator's side. When the
//! selected relay is the initiator's own, the connection the responder opened
//! is taken from the local relay without any handshake. Otherwise the
//! initiator connects to the relay itself and asks its owner to activate the
//! session.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::candidate::CandidateHost;
use crate::error::{NegotiationError, Result};
use crate::messages::{ActivationRequest, BytestreamReply, Request};
use crate::messaging::{LocalRelay, MessagingChannel};
use crate::session::BytestreamSession;
use crate::socks5;

/// Session parameters the dispatcher needs
#[derive(Debug, Clone)]
pub struct DispatchTarget<'a> {
    /// Session identifier
    pub session_id: &'a str,
    /// Digest of the session
    pub digest: &'a str,
    /// Identity of the responder
    pub target: &'a str,
}

/// Initiator-side connection to the selected relay
pub struct InitiatorDispatcher {
    channel: Arc<dyn MessagingChannel>,
    local_relay: Option<Arc<dyn LocalRelay>>,
    connect_timeout: Duration,
}

impl InitiatorDispatcher {
    /// Create a dispatcher
    ///
    /// `connect_timeout` bounds connect plus handshake to a third-party
    /// relay. The activation reply is awaited for the channel's
    /// [`MessagingChannel::reply_timeout`].
    #[must_use]
    pub fn new(
        channel: Arc<dyn MessagingChannel>,
        local_relay: Option<Arc<dyn LocalRelay>>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            local_relay,
            connect_timeout,
        }
    }

    /// Open the session through `selected`
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::LocalPeerNotConnected`] if the local relay
    /// holds no connection for the digest, [`NegotiationError::RelayConnect`]
    /// if the relay cannot be reached and [`NegotiationError::ActivationFailed`]
    /// if the relay owner does not acknowledge the activation.
    pub async fn dispatch(
        &self,
        selected: &CandidateHost,
        target: DispatchTarget<'_>,
    ) -> Result<BytestreamSession> {
        let local_identity = self.channel.local_identity();

        if selected.is_owned_by(&local_identity) {
            let stream = self.local_connection(target.digest)?;
            tracing::debug!(
                "Session {} uses the local relay, skipping handshake",
                target.session_id
            );
            return Ok(BytestreamSession::new(
                stream,
                target.session_id,
                selected.clone(),
                &local_identity,
            ));
        }

        let stream = socks5::connect(selected, target.digest, self.connect_timeout)
            .await
            .map_err(|e| {
                tracing::warn!("Could not connect to selected stream host {}: {}", selected, e);
                NegotiationError::RelayConnect(e.to_string().into())
            })?;

        // Dropping the stream on error closes the relay leg
        self.activate(selected, &target).await?;

        tracing::info!(
            "Session {} activated on stream host {}",
            target.session_id,
            selected
        );
        Ok(BytestreamSession::new(
            stream,
            target.session_id,
            selected.clone(),
            &local_identity,
        ))
    }

    fn local_connection(&self, digest: &str) -> Result<TcpStream> {
        self.local_relay
            .as_ref()
            .and_then(|relay| relay.connection_for_digest(digest))
            .ok_or(NegotiationError::LocalPeerNotConnected)
    }

    async fn activate(&self, selected: &CandidateHost, target: &DispatchTarget<'_>) -> Result<()> {
        let request = Request::Activate(ActivationRequest {
            session_id: target.session_id.to_string(),
            target: target.target.to_string(),
        });

        let reply = self
            .channel
            .request(&selected.owner, request, self.channel.reply_timeout())
            .await
            .map_err(|e| NegotiationError::ActivationFailed(e.to_string().into()))?;

        match reply {
            BytestreamReply::Ack => Ok(()),
            BytestreamReply::Error(error) => {
                tracing::warn!("Stream host {} refused activation: {}", selected, error);
                Err(NegotiationError::ActivationFailed(error.to_string().into()))
            }
            _ => Err(NegotiationError::activation("unexpected reply to activation")),
        }
    }
}
