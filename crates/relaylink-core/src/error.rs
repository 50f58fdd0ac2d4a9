//! Error types for bytestream negotiation
//!
//! Errors are split by how far they travel:
//!
//! - [`HandshakeError`]: the SOCKS5 exchange with a single relay went wrong
//! - [`CandidateFailure`]: one candidate attempt failed; consumed by the racer
//!   loop and recorded in the failure history, never returned to callers
//! - [`NegotiationError`]: the negotiation as a whole failed and the caller
//!   must be told
//!
//! # Example
//!
//! ```no_run
//! use relaylink_core::NegotiationError;
//!
//! fn report(err: &NegotiationError) {
//!     if err.is_transient() {
//!         println!("Negotiation failed, may retry: {}", err);
//!     } else {
//!         println!("Negotiation failed: {}", err);
//!     }
//! }
//! ```

use std::borrow::Cow;
use std::io;
use thiserror::Error;

use crate::messages::ProtocolError;

/// Result type for negotiation operations
pub type Result<T> = std::result::Result<T, NegotiationError>;

/// Failure of the binary handshake against one relay
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Reading or writing the relay connection failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The relay answered with a protocol version other than 5
    #[error("SOCKS5 negotiation failed: unsupported version {0:#04x}")]
    UnsupportedVersion(u8),

    /// The relay refused the only authentication method offered
    #[error("SOCKS5 negotiation failed: authentication method {0:#04x} not accepted")]
    MethodRejected(u8),

    /// The relay replied with an address type other than domain name
    #[error("Unsupported SOCKS5 address type {0:#04x}")]
    UnsupportedAddressType(u8),

    /// The digest does not fit the one-byte length field
    #[error("Address too long for SOCKS5 request: {0} bytes")]
    AddressTooLong(usize),

    /// The CONNECT reply is not the echo of the request
    #[error("SOCKS5 negotiation failed: connect reply does not match request")]
    ReplyMismatch,
}

/// Why a single candidate attempt failed
#[derive(Debug, Error)]
pub enum CandidateFailure {
    /// TCP connect did not finish within the per-host budget
    #[error("connect timed out")]
    ConnectTimeout,

    /// TCP connect failed
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// Handshake did not finish within what was left of the per-host budget
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// Handshake completed with a failure
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}

/// Errors surfaced to the caller of a negotiation
#[derive(Debug, Error, Clone)]
pub enum NegotiationError {
    // ============ Offer Errors ============
    /// Offer has no candidates or could not be understood
    #[error("Malformed offer: {0}")]
    MalformedOffer(Cow<'static, str>),

    /// No offered candidate could be connected
    #[error("Could not establish socket with any provided host ({attempted} attempted, {skipped} blacklisted)")]
    NegotiationExhausted {
        /// Candidates a connection was attempted to
        attempted: usize,
        /// Candidates skipped because of the failure history
        skipped: usize,
    },

    /// Peer has not announced support for bytestreams
    #[error("Bytestreams not supported by {0}")]
    FeatureNotSupported(String),

    /// Initiator could not assemble a single candidate
    #[error("No SOCKS5 proxies available")]
    NoCandidatesAvailable,

    // ============ Initiator Errors ============
    /// Responder named a stream host that was never offered
    #[error("Remote user responded with unknown host {0}")]
    UnknownStreamHost(String),

    /// Local relay holds no connection for this session's digest
    #[error("Target is not connected to the local SOCKS5 proxy")]
    LocalPeerNotConnected,

    /// Connecting to the selected relay failed
    #[error("Relay connection failed: {0}")]
    RelayConnect(Cow<'static, str>),

    /// Relay refused or ignored the activation request
    #[error("Activation failed: {0}")]
    ActivationFailed(Cow<'static, str>),

    // ============ Messaging Errors ============
    /// Peer answered with a protocol error
    #[error("Request rejected: {0}")]
    Rejected(ProtocolError),

    /// No correlated reply arrived in time
    #[error("No response: {0}")]
    NoResponse(Cow<'static, str>),

    /// Messaging collaborator failed to deliver
    #[error("Messaging error: {0}")]
    Messaging(Cow<'static, str>),

    // ============ Local Errors ============
    /// I/O failure outside a candidate attempt
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

impl NegotiationError {
    /// Returns true if a later negotiation may succeed without intervention
    ///
    /// Relays come and go and the failure history expires, so exhaustion
    /// and connection failures are worth retrying later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NegotiationError::NegotiationExhausted { .. }
                | NegotiationError::RelayConnect(_)
                | NegotiationError::NoResponse(_)
                | NegotiationError::Messaging(_)
                | NegotiationError::Io(_)
        )
    }

    /// Returns true if retrying the same request cannot succeed
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            NegotiationError::MalformedOffer(_)
                | NegotiationError::FeatureNotSupported(_)
                | NegotiationError::UnknownStreamHost(_)
                | NegotiationError::InvalidConfig(_)
                | NegotiationError::Rejected(_)
        )
    }

    /// Create a malformed offer error with static context
    #[must_use]
    pub const fn malformed(context: &'static str) -> Self {
        NegotiationError::MalformedOffer(Cow::Borrowed(context))
    }

    /// Create a messaging error with static context
    #[must_use]
    pub const fn messaging(context: &'static str) -> Self {
        NegotiationError::Messaging(Cow::Borrowed(context))
    }

    /// Create an activation error with static context
    #[must_use]
    pub const fn activation(context: &'static str) -> Self {
        NegotiationError::ActivationFailed(Cow::Borrowed(context))
    }

    /// Create a no-response error with static context
    #[must_use]
    pub const fn no_response(context: &'static str) -> Self {
        NegotiationError::NoResponse(Cow::Borrowed(context))
    }
}

impl From<io::Error> for NegotiationError {
    fn from(e: io::Error) -> Self {
        NegotiationError::Io(e.to_string())
    }
}
