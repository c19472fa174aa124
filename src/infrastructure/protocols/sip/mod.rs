//! SIP registrar protocol implementation
//!
//! Architecture:
//! ```text
//! ┌─────────────────────────┐
//! │  RegistrationHandler    │  digest challenge / verify / register
//! └───────────┬─────────────┘
//!             │ SipHandler
//! ┌───────────▼─────────────┐
//! │       SipServer         │  parse, dispatch by method, respond
//! └───────────┬─────────────┘
//!             │ ConnectionHandler
//! ┌───────────▼─────────────┐
//! │   Transport Layer       │  one virtual connection per UDP peer
//! └─────────────────────────┘
//! ```

pub mod auth;
pub mod builder;
pub mod challenge;
pub mod handler;
pub mod identity;
pub mod message;
pub mod registrar;
pub mod server;

pub use auth::{AuthChallenge, DigestAlgorithm, DigestCredentials, DigestPolicy};
pub use builder::ResponseBuilder;
pub use challenge::{ChallengeSession, ChallengeStore, RejectReason, Verdict};
pub use handler::SipHandler;
pub use identity::SipIdentity;
pub use message::{SipError, SipMessage, SipMethod, SipRequest, SipResponse};
pub use registrar::RegistrationHandler;
pub use server::SipServer;
