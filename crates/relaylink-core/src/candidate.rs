//! Candidate relay hosts

use serde::{Deserialize, Serialize};
use std::fmt;

/// A relay offered by the initiator as a possible stream host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateHost {
    /// Host name or IP address of the relay
    pub address: String,
    /// TCP port of the relay
    pub port: u16,
    /// Identity of the party operating the relay
    pub owner: String,
}

impl CandidateHost {
    /// Create a new candidate
    #[must_use]
    pub fn new(owner: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            owner: owner.into(),
        }
    }

    /// Failure history key, `address:port`
    #[must_use]
    pub fn endpoint_key(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Whether `identity` operates this relay
    #[must_use]
    pub fn is_owned_by(&self, identity: &str) -> bool {
        self.owner == identity
    }

    /// Whether this relay runs on a loopback address
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        self.address == "localhost"
            || self
                .address
                .parse::<std::net::IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }
}

impl fmt::Display for CandidateHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.owner, self.address, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_key() {
        let host = CandidateHost::new("proxy.example.org", "10.0.0.5", 7777);
        assert_eq!(host.endpoint_key(), "10.0.0.5:7777");
    }

    #[test]
    fn test_ownership() {
        let host = CandidateHost::new("alice@example.org/home", "10.0.0.5", 7777);
        assert!(host.is_owned_by("alice@example.org/home"));
        assert!(!host.is_owned_by("alice@example.org/work"));
    }

    #[test]
    fn test_loopback_detection() {
        assert!(CandidateHost::new("a", "127.0.0.1", 1).is_loopback());
        assert!(CandidateHost::new("a", "::1", 1).is_loopback());
        assert!(CandidateHost::new("a", "localhost", 1).is_loopback());
        assert!(!CandidateHost::new("a", "192.168.1.4", 1).is_loopback());
        assert!(!CandidateHost::new("a", "proxy.example.org", 1).is_loopback());
    }

    #[test]
    fn test_display() {
        let host = CandidateHost::new("proxy.example.org", "10.0.0.5", 7777);
        assert_eq!(host.to_string(), "proxy.example.org (10.0.0.5:7777)");
    }
}
