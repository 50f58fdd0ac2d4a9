//! # relaylink Core
//!
//! Out-of-band bytestream negotiation between two messaging peers through one
//! or more SOCKS5 relays ("stream hosts").
//!
//! This crate provides:
//! - A process-wide, time- and size-bounded failure history of relay endpoints
//! - The session digest used as the relay CONNECT address
//! - The binary SOCKS5 handshake spoken to a single relay
//! - The responder-side candidate racer and the initiator-side dispatcher
//! - The offer / stream-host-used / activation message exchange
//!
//! ## Negotiation Flow
//!
//! ```text
//! Initiator                       Responder                     Relay
//!     |                              |                            |
//!     |---- offer (candidates) ----->|                            |
//!     |                              |--- SOCKS5 CONNECT digest ->|
//!     |                              |<------- echo reply --------|
//!     |<--- streamhost-used (jid) ---|                            |
//!     |--------------- SOCKS5 CONNECT digest -------------------->|
//!     |<-------------------- echo reply --------------------------|
//!     |------------------ activate (if third party) ------------->|
//!     |                              |                            |
//!     |<================ bytes piped by the relay ===============>|
//! ```
//!
//! The messaging stack that carries the offer and replies is an external
//! collaborator, see [`messaging::MessagingChannel`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blacklist;
pub mod candidate;
pub mod config;
pub mod digest;
pub mod error;
pub mod initiator;
pub mod manager;
pub mod messages;
pub mod messaging;
pub mod racer;
pub mod request;
pub mod session;
pub mod socks5;

#[cfg(test)]
mod testing;

pub use blacklist::FailureHistory;
pub use candidate::CandidateHost;
pub use config::NegotiationConfig;
pub use digest::compute_digest;
pub use error::{CandidateFailure, HandshakeError, NegotiationError, Result};
pub use initiator::{DispatchTarget, InitiatorDispatcher};
pub use manager::BytestreamManager;
pub use messages::{
    ActivationRequest, BytestreamOffer, BytestreamReply, ErrorCondition, IncomingOffer,
    ProtocolError, Request, StreamHostUsed, StreamMode,
};
pub use messaging::{DEFAULT_REPLY_TIMEOUT, LocalRelay, MessagingChannel};
pub use racer::{AttemptOutcome, CandidateRacer, RaceOutcome};
pub use request::BytestreamRequest;
pub use session::BytestreamSession;

/// Namespace of the bytestream protocol, used for feature discovery
pub const NAMESPACE: &str = "http://jabber.org/protocol/bytestreams";

/// Prefix of locally generated session ids
pub const SESSION_ID_PREFIX: &str = "js5_";
