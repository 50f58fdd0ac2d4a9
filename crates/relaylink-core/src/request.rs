//! Incoming bytestream offer (responder role)

use std::sync::Arc;

use crate::blacklist::FailureHistory;
use crate::candidate::CandidateHost;
use crate::config::NegotiationConfig;
use crate::digest::compute_digest;
use crate::error::{NegotiationError, Result};
use crate::messages::{BytestreamReply, IncomingOffer, ProtocolError, StreamHostUsed, StreamMode};
use crate::messaging::MessagingChannel;
use crate::racer::CandidateRacer;
use crate::session::BytestreamSession;

/// Offer received from an initiator, waiting to be accepted or rejected
///
/// Consuming the request with [`accept`](Self::accept) or
/// [`reject`](Self::reject) always answers the initiator.
pub struct BytestreamRequest {
    incoming: IncomingOffer,
    channel: Arc<dyn MessagingChannel>,
    racer: CandidateRacer,
}

impl BytestreamRequest {
    pub(crate) fn new(
        incoming: IncomingOffer,
        channel: Arc<dyn MessagingChannel>,
        history: Arc<FailureHistory>,
        config: NegotiationConfig,
    ) -> Self {
        Self {
            incoming,
            channel,
            racer: CandidateRacer::new(history, config),
        }
    }

    /// Identity of the initiator
    #[must_use]
    pub fn from(&self) -> &str {
        &self.incoming.from
    }

    /// Session identifier chosen by the initiator
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.incoming.offer.session_id
    }

    /// Offered candidates in order of preference
    #[must_use]
    pub fn candidates(&self) -> &[CandidateHost] {
        &self.incoming.offer.candidates
    }

    /// Connect to one of the offered relays and confirm it to the initiator
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::MalformedOffer`] (also for non-tcp offers) or
    /// [`NegotiationError::NegotiationExhausted`] after answering the
    /// initiator with an error, and [`NegotiationError::Messaging`] if the
    /// confirmation cannot be delivered (the relay connection is closed).
    pub async fn accept(self) -> Result<BytestreamSession> {
        let offer = &self.incoming.offer;

        if let Err(e) = offer.validate() {
            tracing::warn!("Rejecting malformed offer from {}: {}", self.incoming.from, e);
            // An empty host list is answered like a race nobody won
            let reply = if offer.session_id.is_empty() {
                ProtocolError::malformed("Offer has no session id")
            } else {
                ProtocolError::exhausted()
            };
            self.send_error(reply).await;
            return Err(e);
        }

        if offer.mode != StreamMode::Tcp {
            tracing::warn!(
                "Rejecting {:?} mode bytestream {} from {}",
                offer.mode,
                offer.session_id,
                self.incoming.from
            );
            self.send_error(ProtocolError::malformed("Only tcp mode is supported")).await;
            return Err(NegotiationError::malformed("unsupported stream mode"));
        }

        let local_identity = self.channel.local_identity();
        let digest = compute_digest(&offer.session_id, &self.incoming.from, &local_identity);

        let outcome = match self.racer.race(&offer.candidates, &digest).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.send_error(ProtocolError::exhausted()).await;
                return Err(e);
            }
        };

        let used = BytestreamReply::StreamHostUsed(StreamHostUsed {
            owner: outcome.selected.owner.clone(),
        });
        if let Err(e) = self
            .channel
            .reply(&self.incoming.from, &self.incoming.id, used)
            .await
        {
            tracing::warn!(
                "Could not confirm stream host to {}, closing relay connection: {}",
                self.incoming.from,
                e
            );
            drop(outcome.stream);
            return Err(NegotiationError::Messaging(e.to_string().into()));
        }

        Ok(BytestreamSession::new(
            outcome.stream,
            offer.session_id.clone(),
            outcome.selected,
            &self.incoming.from,
        ))
    }

    /// Refuse the offer
    ///
    /// # Errors
    ///
    /// Returns an error if the refusal cannot be delivered.
    pub async fn reject(self) -> Result<()> {
        tracing::debug!(
            "Rejecting bytestream {} from {}",
            self.incoming.offer.session_id,
            self.incoming.from
        );
        self.channel
            .reply(
                &self.incoming.from,
                &self.incoming.id,
                BytestreamReply::Error(ProtocolError::not_acceptable()),
            )
            .await
    }

    async fn send_error(&self, error: ProtocolError) {
        if let Err(e) = self
            .channel
            .reply(&self.incoming.from, &self.incoming.id, BytestreamReply::Error(error))
            .await
        {
            tracing::warn!("Could not send error to {}: {}", self.incoming.from, e);
        }
    }
}

impl std::fmt::Debug for BytestreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytestreamRequest")
            .field("from", &self.incoming.from)
            .field("session_id", &self.incoming.offer.session_id)
            .field("candidates", &self.incoming.offer.candidates.len())
            .finish_non_exhaustive()
    }
}
