//! Candidate racer (responder role)
//!
//! Walks the offered candidates in order and keeps the first relay that
//! completes the handshake. Every candidate gets the same share of the total
//! budget (never less than the configured minimum) so that one unreachable
//! relay cannot starve the rest. Attempts are sequential, so at most one
//! relay connection is open at a time.
//!
//! Candidates that failed too often recently are skipped without a
//! connection attempt. Each attempted and failed candidate is recorded in the
//! shared [`FailureHistory`] exactly once per race.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::blacklist::FailureHistory;
use crate::candidate::CandidateHost;
use crate::config::NegotiationConfig;
use crate::error::{CandidateFailure, NegotiationError, Result};
use crate::socks5;

/// Result of one candidate attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Handshake completed, connection is ready
    Connected(TcpStream),
    /// Candidate is blacklisted and was not contacted
    Skipped,
    /// Connect or handshake failed; connection already closed
    Failed(CandidateFailure),
}

/// Winning candidate of a race
#[derive(Debug)]
pub struct RaceOutcome {
    /// Candidate the connection was established with
    pub selected: CandidateHost,
    /// Negotiated relay connection
    pub stream: TcpStream,
    /// Candidates a connection was attempted to (winner included)
    pub attempted: usize,
    /// Candidates skipped because of the failure history
    pub skipped: usize,
}

/// Responder-side candidate selection
pub struct CandidateRacer {
    history: Arc<FailureHistory>,
    config: NegotiationConfig,
}

impl CandidateRacer {
    /// Create a racer using the shared failure history
    #[must_use]
    pub fn new(history: Arc<FailureHistory>, config: NegotiationConfig) -> Self {
        Self { history, config }
    }

    /// Connect to the first usable candidate
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::MalformedOffer`] for an empty candidate list
    /// and [`NegotiationError::NegotiationExhausted`] if no candidate worked.
    pub async fn race(&self, candidates: &[CandidateHost], digest: &str) -> Result<RaceOutcome> {
        if candidates.is_empty() {
            return Err(NegotiationError::malformed("offer contains no stream hosts"));
        }

        let budget = self.config.per_host_timeout(candidates.len());
        let mut attempted = 0;
        let mut skipped = 0;

        for candidate in candidates {
            match self.attempt(candidate, digest, budget).await {
                AttemptOutcome::Connected(stream) => {
                    attempted += 1;
                    tracing::info!("Selected stream host {}", candidate);
                    return Ok(RaceOutcome {
                        selected: candidate.clone(),
                        stream,
                        attempted,
                        skipped,
                    });
                }
                AttemptOutcome::Skipped => {
                    skipped += 1;
                }
                AttemptOutcome::Failed(reason) => {
                    attempted += 1;
                    tracing::warn!("Stream host {} failed: {}", candidate, reason);
                    self.history.record_failure(&candidate.endpoint_key());
                }
            }
        }

        tracing::warn!(
            "No stream host usable ({} attempted, {} blacklisted)",
            attempted,
            skipped
        );
        Err(NegotiationError::NegotiationExhausted { attempted, skipped })
    }

    /// Try a single candidate within `budget`
    pub async fn attempt(
        &self,
        candidate: &CandidateHost,
        digest: &str,
        budget: Duration,
    ) -> AttemptOutcome {
        let key = candidate.endpoint_key();
        if self.config.blacklist_enabled()
            && self
                .history
                .is_blacklisted(&key, self.config.failure_threshold)
        {
            tracing::debug!("Skipping blacklisted stream host {}", key);
            return AttemptOutcome::Skipped;
        }

        tracing::debug!("Connecting to stream host {} (budget {:?})", candidate, budget);
        match socks5::connect(candidate, digest, budget).await {
            Ok(stream) => AttemptOutcome::Connected(stream),
            Err(reason) => AttemptOutcome::Failed(reason),
        }
    }

    /// Budget each of `candidates` candidates gets
    #[must_use]
    pub fn per_host_timeout(&self, candidates: usize) -> Duration {
        self.config.per_host_timeout(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dead_candidate, spawn_relay};
    use std::sync::atomic::Ordering;

    const DIGEST: &str = "0123456789abcdef0123456789abcdef01234567";

    fn racer(history: &Arc<FailureHistory>, threshold: u32) -> CandidateRacer {
        CandidateRacer::new(
            Arc::clone(history),
            NegotiationConfig {
                failure_threshold: threshold,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_empty_candidates_is_malformed() {
        let history = Arc::new(FailureHistory::default());
        let result = racer(&history, 2).race(&[], DIGEST).await;
        assert!(matches!(result, Err(NegotiationError::MalformedOffer(_))));
    }

    #[tokio::test]
    async fn test_falls_through_to_next_candidate() {
        let history = Arc::new(FailureHistory::default());
        let dead = dead_candidate("dead.example.org").await;
        let (relay, _) = spawn_relay("proxy.example.org").await;

        let outcome = racer(&history, 2)
            .race(&[dead.clone(), relay.clone()], DIGEST)
            .await
            .unwrap();

        assert_eq!(outcome.selected, relay);
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(history.failure_count(&dead.endpoint_key()), 1);
        assert_eq!(history.failure_count(&relay.endpoint_key()), 0);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let history = Arc::new(FailureHistory::default());
        let (first, first_hits) = spawn_relay("proxy.example.org").await;
        let (second, second_hits) = spawn_relay("proxy.example.org").await;

        let outcome = racer(&history, 2)
            .race(&[first.clone(), second], DIGEST)
            .await
            .unwrap();

        assert_eq!(outcome.selected, first);
        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(second_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_records_each_failure_once() {
        let history = Arc::new(FailureHistory::default());
        let candidates = vec![
            dead_candidate("a.example.org").await,
            dead_candidate("b.example.org").await,
            dead_candidate("c.example.org").await,
        ];

        let result = racer(&history, 2).race(&candidates, DIGEST).await;

        assert!(matches!(
            result,
            Err(NegotiationError::NegotiationExhausted {
                attempted: 3,
                skipped: 0
            })
        ));
        assert_eq!(history.len(), 3);
        for candidate in &candidates {
            assert_eq!(history.failure_count(&candidate.endpoint_key()), 1);
        }
    }

    #[tokio::test]
    async fn test_blacklisted_candidate_not_contacted() {
        let history = Arc::new(FailureHistory::default());
        let (relay, hits) = spawn_relay("proxy.example.org").await;
        history.record_failure(&relay.endpoint_key());
        history.record_failure(&relay.endpoint_key());

        let result = racer(&history, 2).race(&[relay.clone()], DIGEST).await;

        assert!(matches!(
            result,
            Err(NegotiationError::NegotiationExhausted {
                attempted: 0,
                skipped: 1
            })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        // Skipping does not count as another failure
        assert_eq!(history.failure_count(&relay.endpoint_key()), 2);
    }

    #[tokio::test]
    async fn test_threshold_zero_attempts_blacklisted_host() {
        let history = Arc::new(FailureHistory::default());
        let (relay, hits) = spawn_relay("proxy.example.org").await;
        for _ in 0..5 {
            history.record_failure(&relay.endpoint_key());
        }

        let outcome = racer(&history, 0).race(&[relay.clone()], DIGEST).await.unwrap();

        assert_eq!(outcome.selected, relay);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_order_preserved_around_skipped_hosts() {
        let history = Arc::new(FailureHistory::default());
        let (skipped, skipped_hits) = spawn_relay("proxy.example.org").await;
        let (used, used_hits) = spawn_relay("proxy.example.org").await;
        history.record_failure(&skipped.endpoint_key());
        history.record_failure(&skipped.endpoint_key());

        let outcome = racer(&history, 2)
            .race(&[skipped, used.clone()], DIGEST)
            .await
            .unwrap();

        assert_eq!(outcome.selected, used);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.attempted, 1);
        assert_eq!(skipped_hits.load(Ordering::SeqCst), 0);
        assert_eq!(used_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_per_host_timeout() {
        let history = Arc::new(FailureHistory::default());
        let racer = racer(&history, 2);
        assert_eq!(racer.per_host_timeout(10), Duration::from_millis(2_000));
        assert_eq!(racer.per_host_timeout(2), Duration::from_millis(5_000));
    }
}
