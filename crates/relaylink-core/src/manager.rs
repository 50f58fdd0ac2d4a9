//! Bytestream manager
//!
//! Composition root of the negotiation core. One manager exists per messaging
//! connection; it owns the failure history shared by every session, the
//! runtime configuration, and the routing of incoming offers to subscribers.
//!
//! # Initiator flow
//!
//! 1. Check the target supports bytestreams
//! 2. Collect candidates: local relay addresses, then discovered proxies
//! 3. Move the last working proxy to the front (if enabled)
//! 4. Register the digest with the local relay, send the offer
//! 5. Resolve the confirmed stream host and run the [`InitiatorDispatcher`]

use dashmap::DashSet;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, RwLock};

use crate::SESSION_ID_PREFIX;
use crate::blacklist::FailureHistory;
use crate::candidate::CandidateHost;
use crate::config::NegotiationConfig;
use crate::digest::compute_digest;
use crate::error::{NegotiationError, Result};
use crate::initiator::{DispatchTarget, InitiatorDispatcher};
use crate::messages::{BytestreamOffer, BytestreamReply, IncomingOffer, Request};
use crate::messaging::{LocalRelay, MessagingChannel};
use crate::request::BytestreamRequest;
use crate::session::BytestreamSession;

/// Length of the random part of generated session ids
const SESSION_ID_RANDOM_LEN: usize = 24;

#[derive(Default)]
struct Subscriptions {
    by_initiator: HashMap<String, UnboundedSender<BytestreamRequest>>,
    catch_all: Vec<UnboundedSender<BytestreamRequest>>,
}

/// Keeps a digest registered with the local relay while a negotiation runs
struct TransferGuard<'a> {
    relay: Option<&'a dyn LocalRelay>,
    digest: &'a str,
}

impl<'a> TransferGuard<'a> {
    fn register(relay: Option<&'a dyn LocalRelay>, digest: &'a str) -> Self {
        if let Some(relay) = relay {
            relay.add_transfer(digest);
        }
        Self { relay, digest }
    }
}

impl Drop for TransferGuard<'_> {
    fn drop(&mut self) {
        if let Some(relay) = self.relay {
            relay.remove_transfer(self.digest);
        }
    }
}

/// Negotiates bytestreams in both roles over one messaging connection
pub struct BytestreamManager {
    channel: Arc<dyn MessagingChannel>,
    local_relay: Option<Arc<dyn LocalRelay>>,
    history: Arc<FailureHistory>,
    config: RwLock<NegotiationConfig>,
    last_working_proxy: Mutex<Option<String>>,
    proxy_blacklist: DashSet<String>,
    ignored_requests: DashSet<String>,
    subscriptions: Mutex<Subscriptions>,
}

impl BytestreamManager {
    /// Create a manager with its own failure history
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::InvalidConfig`] if `config` is invalid.
    pub fn new(
        channel: Arc<dyn MessagingChannel>,
        local_relay: Option<Arc<dyn LocalRelay>>,
        config: NegotiationConfig,
    ) -> Result<Self> {
        let history = Arc::new(FailureHistory::from_config(&config));
        Self::with_failure_history(channel, local_relay, config, history)
    }

    /// Create a manager sharing `history` with other managers of the process
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::InvalidConfig`] if `config` is invalid.
    pub fn with_failure_history(
        channel: Arc<dyn MessagingChannel>,
        local_relay: Option<Arc<dyn LocalRelay>>,
        config: NegotiationConfig,
        history: Arc<FailureHistory>,
    ) -> Result<Self> {
        config.validate()?;
        history.set_limits(config.blacklist_max_size, config.blacklist_lifetime);

        Ok(Self {
            channel,
            local_relay,
            history,
            config: RwLock::new(config),
            last_working_proxy: Mutex::new(None),
            proxy_blacklist: DashSet::new(),
            ignored_requests: DashSet::new(),
            subscriptions: Mutex::new(Subscriptions::default()),
        })
    }

    // ===== Configuration =====

    /// Snapshot of the current configuration
    pub async fn config(&self) -> NegotiationConfig {
        self.config.read().await.clone()
    }

    /// Change the configuration; negotiations already running keep their snapshot
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::InvalidConfig`] and keeps the previous
    /// configuration if the result is invalid.
    pub async fn update_config<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut NegotiationConfig),
    {
        let mut config = self.config.write().await;
        let mut updated = config.clone();
        f(&mut updated);
        updated.validate()?;

        self.history
            .set_limits(updated.blacklist_max_size, updated.blacklist_lifetime);
        *config = updated;
        Ok(())
    }

    /// Failure history shared by all negotiations of this manager
    #[must_use]
    pub fn failure_history(&self) -> &Arc<FailureHistory> {
        &self.history
    }

    /// Relay that produced the last working initiator session
    pub async fn last_working_proxy(&self) -> Option<String> {
        self.last_working_proxy.lock().await.clone()
    }

    /// Whether `proxy` is skipped during discovery
    #[must_use]
    pub fn is_proxy_blacklisted(&self, proxy: &str) -> bool {
        self.proxy_blacklist.contains(proxy)
    }

    // ===== Initiator =====

    /// Generate a fresh session id
    #[must_use]
    pub fn next_session_id() -> String {
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_RANDOM_LEN)
            .map(char::from)
            .collect();
        format!("{SESSION_ID_PREFIX}{random}")
    }

    /// Open a bytestream to `target` with a generated session id
    ///
    /// # Errors
    ///
    /// See [`establish_session_with_id`](Self::establish_session_with_id).
    pub async fn establish_session(&self, target: &str) -> Result<BytestreamSession> {
        self.establish_session_with_id(target, &Self::next_session_id())
            .await
    }

    /// Open a bytestream to `target` for `session_id`
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::FeatureNotSupported`] if the target does not
    /// support bytestreams, [`NegotiationError::NoCandidatesAvailable`] if no
    /// relay could be offered, [`NegotiationError::Rejected`] if the target
    /// answered with an error, [`NegotiationError::UnknownStreamHost`] if it
    /// confirmed a relay that was never offered, and the dispatcher's errors.
    pub async fn establish_session_with_id(
        &self,
        target: &str,
        session_id: &str,
    ) -> Result<BytestreamSession> {
        if !self.channel.supports_bytestreams(target).await? {
            return Err(NegotiationError::FeatureNotSupported(target.to_string()));
        }

        let config = self.config().await;
        let local_identity = self.channel.local_identity();

        let mut candidates = self.stream_host_candidates(&config, &local_identity).await?;
        if config.proxy_prioritization {
            if let Some(proxy) = self.last_working_proxy().await {
                prioritize(&mut candidates, &proxy);
            }
        }

        let digest = compute_digest(session_id, &local_identity, target);
        let _transfer = TransferGuard::register(self.local_relay.as_deref(), &digest);

        let offer = BytestreamOffer::new(session_id, candidates);
        tracing::debug!(
            "Offering bytestream {} to {} with {} stream hosts",
            session_id,
            target,
            offer.candidates.len()
        );
        let reply = self
            .channel
            .request(
                target,
                Request::Offer(offer.clone()),
                config.effective_target_response_timeout(),
            )
            .await?;

        let used = match reply {
            BytestreamReply::StreamHostUsed(used) => used,
            BytestreamReply::Error(error) => {
                tracing::warn!("{} rejected bytestream {}: {}", target, session_id, error);
                return Err(NegotiationError::Rejected(error));
            }
            _ => return Err(NegotiationError::messaging("unexpected reply to offer")),
        };

        let selected = offer
            .stream_host(&used.owner)
            .cloned()
            .ok_or_else(|| NegotiationError::UnknownStreamHost(used.owner.clone()))?;

        let dispatcher = InitiatorDispatcher::new(
            Arc::clone(&self.channel),
            self.local_relay.clone(),
            config.effective_proxy_connection_timeout(),
        );
        let session = dispatcher
            .dispatch(
                &selected,
                DispatchTarget {
                    session_id,
                    digest: &digest,
                    target,
                },
            )
            .await?;

        *self.last_working_proxy.lock().await = Some(selected.owner);
        Ok(session)
    }

    /// Local relay addresses followed by the stream hosts of discovered proxies
    async fn stream_host_candidates(
        &self,
        config: &NegotiationConfig,
        local_identity: &str,
    ) -> Result<Vec<CandidateHost>> {
        let mut candidates = Vec::new();

        if config.announce_local_streamhost {
            if let Some(relay) = &self.local_relay {
                candidates.extend(
                    relay
                        .stream_hosts(local_identity)
                        .into_iter()
                        .filter(|host| !host.is_loopback()),
                );
            }
        }

        let discovery = self.determine_proxies().await;
        if let Ok(proxies) = &discovery {
            for proxy in proxies {
                match self.query_stream_hosts(proxy, config).await {
                    Ok(hosts) => candidates.extend(hosts),
                    Err(e) => {
                        tracing::debug!("Blacklisting proxy {}: {}", proxy, e);
                        self.proxy_blacklist.insert(proxy.clone());
                    }
                }
            }
        }

        if candidates.is_empty() {
            return match discovery {
                Err(e) => Err(e),
                Ok(_) => Err(NegotiationError::NoCandidatesAvailable),
            };
        }
        Ok(candidates)
    }

    /// Discovered proxies that are not blacklisted
    async fn determine_proxies(&self) -> Result<Vec<String>> {
        let proxies = self.channel.discover_proxies().await?;
        Ok(proxies
            .into_iter()
            .filter(|proxy| !self.proxy_blacklist.contains(proxy))
            .collect())
    }

    async fn query_stream_hosts(
        &self,
        proxy: &str,
        config: &NegotiationConfig,
    ) -> Result<Vec<CandidateHost>> {
        let reply = self
            .channel
            .request(
                proxy,
                Request::StreamHostQuery,
                config.effective_target_response_timeout(),
            )
            .await?;
        match reply {
            BytestreamReply::StreamHosts(hosts) if !hosts.is_empty() => Ok(hosts),
            BytestreamReply::Error(error) => Err(NegotiationError::Rejected(error)),
            _ => Err(NegotiationError::messaging("proxy announced no stream host")),
        }
    }

    // ===== Responder =====

    /// Receive offers from `initiator`; takes precedence over [`subscribe_all`](Self::subscribe_all)
    pub async fn subscribe(&self, initiator: &str) -> UnboundedReceiver<BytestreamRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .await
            .by_initiator
            .insert(initiator.to_string(), tx);
        rx
    }

    /// Receive offers no initiator-specific subscriber claims
    pub async fn subscribe_all(&self) -> UnboundedReceiver<BytestreamRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().await.catch_all.push(tx);
        rx
    }

    /// Drop the next offer for `session_id` without answering it
    pub fn ignore_request_once(&self, session_id: impl Into<String>) {
        self.ignored_requests.insert(session_id.into());
    }

    /// Route an offer delivered by the messaging collaborator
    ///
    /// Offers nobody is subscribed to are rejected with `not-acceptable`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rejection cannot be delivered.
    pub async fn handle_offer(&self, incoming: IncomingOffer) -> Result<()> {
        if self
            .ignored_requests
            .remove(&incoming.offer.session_id)
            .is_some()
        {
            tracing::debug!("Ignoring bytestream {}", incoming.offer.session_id);
            return Ok(());
        }

        let request = BytestreamRequest::new(
            incoming,
            Arc::clone(&self.channel),
            Arc::clone(&self.history),
            self.config().await,
        );

        match self.route(request).await {
            None => Ok(()),
            Some(unclaimed) => {
                tracing::debug!("No subscriber for bytestream from {}", unclaimed.from());
                unclaimed.reject().await
            }
        }
    }

    /// Hand `request` to a live subscriber; returns it if none exists
    async fn route(&self, mut request: BytestreamRequest) -> Option<BytestreamRequest> {
        let mut subscriptions = self.subscriptions.lock().await;
        let from = request.from().to_string();

        if let Some(tx) = subscriptions.by_initiator.get(&from) {
            match tx.send(request) {
                Ok(()) => return None,
                Err(mpsc::error::SendError(returned)) => {
                    subscriptions.by_initiator.remove(&from);
                    request = returned;
                }
            }
        }

        while let Some(tx) = subscriptions.catch_all.first() {
            match tx.send(request) {
                Ok(()) => return None,
                Err(mpsc::error::SendError(returned)) => {
                    subscriptions.catch_all.remove(0);
                    request = returned;
                }
            }
        }

        Some(request)
    }

    /// Drop subscriptions and forget prioritization, proxy blacklist and ignored ids
    pub async fn disable(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.by_initiator.clear();
        subscriptions.catch_all.clear();
        drop(subscriptions);

        *self.last_working_proxy.lock().await = None;
        self.proxy_blacklist.clear();
        self.ignored_requests.clear();
        tracing::debug!("Bytestream manager disabled");
    }
}

/// Move the first candidate operated by `proxy` to the front
fn prioritize(candidates: &mut [CandidateHost], proxy: &str) {
    if let Some(index) = candidates.iter().position(|c| c.is_owned_by(proxy)) {
        candidates[..=index].rotate_right(1);
    }
}
