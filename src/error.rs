//! Error taxonomy.
//!
//! Every failure the service can hit maps to one [`Severity`]:
//!
//! - `Fatal`: the operation cannot proceed (empty catalog at run start)
//! - `Rejected`: this request is refused, nothing is corrupted
//! - `Degraded`: a dependency is down; the caller gets a best-effort answer
//! - `Advisory`: an inconsistency worth logging, never enforced
//!
//! Only `Fatal` and `Rejected` ever reach the client as failures.

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::game::catalog::CatalogError;
use crate::game::sequencer::SequenceError;
use crate::game::validator::{Finding, ValidationError};
use crate::network::auth::AuthError;
use crate::network::protocol::ErrorCode;
use crate::store::StoreError;
use crate::verify::VerifyError;

/// How far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Surface as a failure.
    Fatal,
    /// Surface as a failure of this request only.
    Rejected,
    /// Never surface; fall back.
    Degraded,
    /// Log only.
    Advisory,
}

/// Service-level error.
#[derive(Debug, Error)]
pub enum GameError {
    /// Item selection failed.
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    /// Catalog could not be loaded.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Guess refused.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Run record absent or expired where one is required.
    #[error("run {0} not found")]
    RunNotFound(String),

    /// Reprieve not offered for this run.
    #[error("reprieve not available: {0}")]
    ReprieveUnavailable(String),

    /// Reprieve proof did not check out.
    #[error("proof rejected: {0}")]
    ProofRejected(String),

    /// Request payload is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Token failed validation.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Connection has not authenticated.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Shared store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Proof collaborator failure.
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// Integrity finding.
    #[error("integrity finding: {0:?}")]
    Advisory(Finding),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GameError {
    /// Propagation class.
    pub fn severity(&self) -> Severity {
        match self {
            GameError::Sequence(_) | GameError::Catalog(_) | GameError::Internal(_) => {
                Severity::Fatal
            }
            GameError::Store(_) => Severity::Degraded,
            GameError::Advisory(_) => Severity::Advisory,
            GameError::Validation(_)
            | GameError::RunNotFound(_)
            | GameError::ReprieveUnavailable(_)
            | GameError::ProofRejected(_)
            | GameError::InvalidInput(_)
            | GameError::Auth(_)
            | GameError::NotAuthenticated
            | GameError::Verify(_) => Severity::Rejected,
        }
    }

    /// HTTP-equivalent status.
    pub fn status(&self) -> u16 {
        match self {
            GameError::Sequence(_) | GameError::Catalog(_) | GameError::Internal(_) => 500,
            GameError::Validation(ValidationError::Unauthorized) => 403,
            GameError::Validation(ValidationError::TokenMismatch) => 409,
            GameError::Validation(ValidationError::RunOver) => 409,
            GameError::Validation(ValidationError::RateLimited { .. }) => 429,
            GameError::RunNotFound(_) => 404,
            GameError::ReprieveUnavailable(_)
            | GameError::ProofRejected(_)
            | GameError::InvalidInput(_)
            | GameError::Verify(VerifyError::Malformed(_))
            | GameError::Verify(VerifyError::MissingIdentity) => 400,
            GameError::Auth(_) | GameError::NotAuthenticated => 401,
            GameError::Store(_) | GameError::Verify(VerifyError::Upstream(_)) => 503,
            GameError::Advisory(_) => 200,
        }
    }

    /// Wire error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            GameError::Sequence(_) | GameError::Catalog(_) => ErrorCode::CatalogExhausted,
            GameError::Validation(ValidationError::Unauthorized) => ErrorCode::Unauthorized,
            GameError::Validation(ValidationError::TokenMismatch) => ErrorCode::TokenMismatch,
            GameError::Validation(ValidationError::RateLimited { .. }) => ErrorCode::RateLimited,
            GameError::Validation(ValidationError::RunOver) => ErrorCode::RunOver,
            GameError::RunNotFound(_) => ErrorCode::RunNotFound,
            GameError::ReprieveUnavailable(_) => ErrorCode::ReprieveNotEligible,
            GameError::ProofRejected(_) | GameError::Verify(VerifyError::Malformed(_))
            | GameError::Verify(VerifyError::MissingIdentity) => ErrorCode::ProofRejected,
            GameError::Verify(VerifyError::Upstream(_)) => ErrorCode::VerifierUnavailable,
            GameError::InvalidInput(_) | GameError::Advisory(_) => ErrorCode::InvalidInput,
            GameError::Auth(AuthError::Expired) => ErrorCode::TokenExpired,
            GameError::Auth(_) => ErrorCode::InvalidToken,
            GameError::NotAuthenticated => ErrorCode::NotAuthenticated,
            GameError::Store(_) => ErrorCode::StoreUnavailable,
            GameError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Log at the level the severity calls for.
    pub fn log(&self, context: &str) {
        match self.severity() {
            Severity::Fatal => error!(context, error = %self, "fatal"),
            Severity::Rejected => debug!(context, error = %self, "rejected"),
            Severity::Degraded => warn!(context, error = %self, "degraded"),
            Severity::Advisory => warn!(context, error = %self, "advisory"),
        }
    }
}

/// Service result.
pub type GameResult<T> = Result<T, GameError>;
