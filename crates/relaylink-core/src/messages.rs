//! Bytestream protocol messages
//!
//! Payloads exchanged through the messaging collaborator. The collaborator
//! owns framing, addressing and request/reply correlation; these types only
//! describe what is said.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::candidate::CandidateHost;
use crate::error::NegotiationError;

/// Transport mode requested in an offer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Reliable byte stream
    #[default]
    Tcp,
    /// Datagrams
    Udp,
}

/// Initiator's offer: the session and the relays it may be reached through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytestreamOffer {
    /// Session identifier chosen by the initiator
    pub session_id: String,
    /// Requested mode
    #[serde(default)]
    pub mode: StreamMode,
    /// Candidates in order of preference
    pub candidates: Vec<CandidateHost>,
}

impl BytestreamOffer {
    /// Create a TCP mode offer
    #[must_use]
    pub fn new(session_id: impl Into<String>, candidates: Vec<CandidateHost>) -> Self {
        Self {
            session_id: session_id.into(),
            mode: StreamMode::Tcp,
            candidates,
        }
    }

    /// Find the offered candidate operated by `owner`
    #[must_use]
    pub fn stream_host(&self, owner: &str) -> Option<&CandidateHost> {
        self.candidates.iter().find(|c| c.is_owned_by(owner))
    }

    /// Check the offer can be acted upon
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::MalformedOffer`] for an empty session id
    /// or an empty candidate list.
    pub fn validate(&self) -> Result<(), NegotiationError> {
        if self.session_id.is_empty() {
            return Err(NegotiationError::malformed("offer has no session id"));
        }
        if self.candidates.is_empty() {
            return Err(NegotiationError::malformed("offer contains no stream hosts"));
        }
        Ok(())
    }
}

/// An offer as delivered by the messaging collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingOffer {
    /// Correlation id the confirmation must answer
    pub id: String,
    /// Identity of the initiator
    pub from: String,
    /// The offer itself
    pub offer: BytestreamOffer,
}

/// Responder's confirmation naming the relay it connected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHostUsed {
    /// Owner identity of the selected candidate
    pub owner: String,
}

/// Request asking a third-party relay to start bridging a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRequest {
    /// Session to activate
    pub session_id: String,
    /// Identity of the responder (the other leg)
    pub target: String,
}

/// Requests sent through [`crate::messaging::MessagingChannel::request`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Offer sent by the initiator to the responder
    Offer(BytestreamOffer),
    /// Activation sent by the initiator to a relay owner
    Activate(ActivationRequest),
    /// Ask a proxy for the address it accepts connections on
    StreamHostQuery,
}

/// Replies carried back by the messaging collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BytestreamReply {
    /// Confirmation of an offer
    StreamHostUsed(StreamHostUsed),
    /// Answer to a stream host query
    StreamHosts(Vec<CandidateHost>),
    /// Empty success (activation)
    Ack,
    /// Structured protocol error
    Error(ProtocolError),
}

/// Condition of a protocol error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCondition {
    /// No offered relay could be used
    ItemNotFound,
    /// The request was refused
    NotAcceptable,
    /// The remote side failed internally
    InternalServerError,
    /// The remote side does not offer the service
    ServiceUnavailable,
}

impl ErrorCondition {
    /// Wire name of the condition
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCondition::ItemNotFound => "item-not-found",
            ErrorCondition::NotAcceptable => "not-acceptable",
            ErrorCondition::InternalServerError => "internal-server-error",
            ErrorCondition::ServiceUnavailable => "service-unavailable",
        }
    }
}

/// Structured error reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    /// Error condition
    pub condition: ErrorCondition,
    /// Optional human-readable text
    pub text: Option<String>,
}

impl ProtocolError {
    /// Create a protocol error
    #[must_use]
    pub fn new(condition: ErrorCondition, text: Option<String>) -> Self {
        Self { condition, text }
    }

    /// Error sent when no offered relay could be connected
    #[must_use]
    pub fn exhausted() -> Self {
        Self::new(
            ErrorCondition::ItemNotFound,
            Some("Could not establish socket with any provided host".to_string()),
        )
    }

    /// Error sent when an offer is refused
    #[must_use]
    pub fn not_acceptable() -> Self {
        Self::new(ErrorCondition::NotAcceptable, None)
    }

    /// Error sent when an offer cannot be acted upon as received
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::new(ErrorCondition::NotAcceptable, Some(reason.into()))
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{}: {}", self.condition.as_str(), text),
            None => f.write_str(self.condition.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<CandidateHost> {
        vec![
            CandidateHost::new("alice@example.org/home", "192.168.1.2", 7777),
            CandidateHost::new("proxy.example.org", "203.0.113.9", 7777),
        ]
    }

    #[test]
    fn test_offer_validation() {
        assert!(BytestreamOffer::new("sid", candidates()).validate().is_ok());

        let empty = BytestreamOffer::new("sid", Vec::new());
        assert!(matches!(
            empty.validate(),
            Err(NegotiationError::MalformedOffer(_))
        ));

        let no_sid = BytestreamOffer::new("", candidates());
        assert!(no_sid.validate().is_err());
    }

    #[test]
    fn test_stream_host_lookup() {
        let offer = BytestreamOffer::new("sid", candidates());
        assert_eq!(
            offer.stream_host("proxy.example.org").map(|c| c.port),
            Some(7777)
        );
        assert!(offer.stream_host("unknown.example.org").is_none());
    }

    #[test]
    fn test_mode_defaults_to_tcp() {
        let offer: BytestreamOffer =
            serde_json::from_str(r#"{"session_id":"sid","candidates":[]}"#).unwrap();
        assert_eq!(offer.mode, StreamMode::Tcp);
    }

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(
            ProtocolError::exhausted().to_string(),
            "item-not-found: Could not establish socket with any provided host"
        );
        assert_eq!(ProtocolError::not_acceptable().to_string(), "not-acceptable");
    }

    #[test]
    fn test_condition_wire_names() {
        let json = serde_json::to_string(&ErrorCondition::InternalServerError).unwrap();
        assert_eq!(json, "\"internal-server-error\"");
        assert_eq!(
            ErrorCondition::ServiceUnavailable.as_str(),
            "service-unavailable"
        );
    }
}
