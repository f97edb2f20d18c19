//! Reprieve proof verification.
//!
//! Both collaborators are tagged enums chosen at startup from config: a mock
//! variant that accepts everything and a real one that calls out over HTTP.

pub mod payment;
pub mod share;

use thiserror::Error;

pub use payment::{PaymentTerms, PaymentVerifier, RedeemedPayments, RpcPaymentClient};
pub use share::{NeynarClient, ShareToken, ShareTokens, ShareVerification, ShareVerifier};

/// Verification failures.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The external service failed or answered nonsense.
    #[error("verification service error: {0}")]
    Upstream(String),
    /// The proof is not well formed.
    #[error("malformed proof: {0}")]
    Malformed(String),
    /// The verifier needs an identity the request did not carry.
    #[error("no social identity to verify against")]
    MissingIdentity,
}
