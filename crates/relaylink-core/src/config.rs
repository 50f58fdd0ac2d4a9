//! Negotiation configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::NegotiationError;

/// Default budget for connecting to all offered candidates
pub const DEFAULT_TOTAL_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default floor for the budget of a single candidate
pub const DEFAULT_MINIMUM_CONNECT_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Default number of failures after which a relay endpoint is skipped
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

/// Default maximum number of endpoints kept in the failure history
pub const DEFAULT_BLACKLIST_MAX_SIZE: usize = 100;

/// Default lifetime of a failure record (2 hours)
pub const DEFAULT_BLACKLIST_LIFETIME: Duration = Duration::from_secs(120 * 60);

/// Default wait for the responder's answer to an offer
pub const DEFAULT_TARGET_RESPONSE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default budget for the initiator's connection to the selected relay
pub const DEFAULT_PROXY_CONNECTION_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Bytestream negotiation configuration
///
/// Durations are serialized as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Budget shared by all candidates of one offer (responder)
    #[serde(rename = "total_connect_timeout_ms", with = "millis")]
    pub total_connect_timeout: Duration,

    /// Minimum budget of a single candidate (responder)
    #[serde(rename = "minimum_connect_timeout_ms", with = "millis")]
    pub minimum_connect_timeout: Duration,

    /// Failures after which an endpoint is skipped; 0 disables the blacklist
    pub failure_threshold: u32,

    /// Maximum number of endpoints in the failure history
    pub blacklist_max_size: usize,

    /// Age after which a failure record is forgotten
    #[serde(rename = "blacklist_lifetime_ms", with = "millis")]
    pub blacklist_lifetime: Duration,

    /// Wait for the responder's answer to an offer (initiator)
    #[serde(rename = "target_response_timeout_ms", with = "millis")]
    pub target_response_timeout: Duration,

    /// Budget for connecting to the selected relay (initiator)
    #[serde(rename = "proxy_connection_timeout_ms", with = "millis")]
    pub proxy_connection_timeout: Duration,

    /// Offer the last relay that worked first
    pub proxy_prioritization: bool,

    /// Include the local relay's stream hosts in offers
    pub announce_local_streamhost: bool,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            total_connect_timeout: DEFAULT_TOTAL_CONNECT_TIMEOUT,
            minimum_connect_timeout: DEFAULT_MINIMUM_CONNECT_TIMEOUT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            blacklist_max_size: DEFAULT_BLACKLIST_MAX_SIZE,
            blacklist_lifetime: DEFAULT_BLACKLIST_LIFETIME,
            target_response_timeout: DEFAULT_TARGET_RESPONSE_TIMEOUT,
            proxy_connection_timeout: DEFAULT_PROXY_CONNECTION_TIMEOUT,
            proxy_prioritization: true,
            announce_local_streamhost: true,
        }
    }
}

impl NegotiationConfig {
    /// Total connect budget, falling back to the default when unset
    #[must_use]
    pub fn effective_total_connect_timeout(&self) -> Duration {
        non_zero_or(self.total_connect_timeout, DEFAULT_TOTAL_CONNECT_TIMEOUT)
    }

    /// Per-candidate floor, falling back to the default when unset
    #[must_use]
    pub fn effective_minimum_connect_timeout(&self) -> Duration {
        non_zero_or(self.minimum_connect_timeout, DEFAULT_MINIMUM_CONNECT_TIMEOUT)
    }

    /// Offer reply wait, falling back to the default when unset
    #[must_use]
    pub fn effective_target_response_timeout(&self) -> Duration {
        non_zero_or(self.target_response_timeout, DEFAULT_TARGET_RESPONSE_TIMEOUT)
    }

    /// Initiator relay budget, falling back to the default when unset
    #[must_use]
    pub fn effective_proxy_connection_timeout(&self) -> Duration {
        non_zero_or(self.proxy_connection_timeout, DEFAULT_PROXY_CONNECTION_TIMEOUT)
    }

    /// Budget of each candidate when `candidates` are offered
    ///
    /// Every candidate gets the same share so the first one cannot consume
    /// the whole budget: `max(total / candidates, minimum)`.
    #[must_use]
    pub fn per_host_timeout(&self, candidates: usize) -> Duration {
        let total = self.effective_total_connect_timeout().as_millis() as u64;
        let share = total / candidates.max(1) as u64;
        Duration::from_millis(share).max(self.effective_minimum_connect_timeout())
    }

    /// Whether the failure history is consulted at all
    #[must_use]
    pub fn blacklist_enabled(&self) -> bool {
        self.failure_threshold > 0
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::InvalidConfig`] if the failure history
    /// could never hold an entry.
    pub fn validate(&self) -> Result<(), NegotiationError> {
        if self.blacklist_max_size == 0 {
            return Err(NegotiationError::InvalidConfig(
                "blacklist_max_size must be at least 1".into(),
            ));
        }
        if self.blacklist_lifetime.is_zero() {
            return Err(NegotiationError::InvalidConfig(
                "blacklist_lifetime must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn non_zero_or(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() { fallback } else { value }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
