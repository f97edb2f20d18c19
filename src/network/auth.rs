//! Player sign-in.
//!
//! Players log in through a wallet or Farcaster login provider, which hands
//! the client a JWT. The server never issues tokens, it only checks them.
//! The subject (a wallet address or `fid:<n>`) becomes the user id every
//! request on the connection must carry.
//!
//! Expiry is checked against the server clock rather than the host time, so
//! it follows the same clock as run timing.

use std::collections::HashSet;
use std::fmt;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

/// Clock skew tolerated past `exp`.
pub const EXPIRY_LEEWAY_SECS: u64 = 30;

/// Key that token signatures are checked with.
#[derive(Clone)]
pub enum SigningKey {
    /// Login provider's RS256 public key, PEM encoded.
    RsaPem(String),
    /// HS256 secret shared with the login service.
    Secret(String),
}

impl SigningKey {
    fn algorithm(&self) -> Algorithm {
        match self {
            SigningKey::RsaPem(_) => Algorithm::RS256,
            SigningKey::Secret(_) => Algorithm::HS256,
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey, AuthError> {
        match self {
            SigningKey::RsaPem(pem) => DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::BadKey(e.to_string())),
            SigningKey::Secret(secret) => Ok(DecodingKey::from_secret(secret.as_bytes())),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningKey::RsaPem(_) => f.write_str("RsaPem(..)"),
            SigningKey::Secret(_) => f.write_str("Secret(..)"),
        }
    }
}

/// Sign-in settings. Without a key every connection is trusted.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Signature key; `None` disables auth.
    pub key: Option<SigningKey>,
    /// Required `iss`, if any.
    pub issuer: Option<String>,
    /// Required `aud`, if any.
    pub audience: Option<String>,
    /// Accept expired tokens. Local play only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_*` variables. A public key wins over a shared secret.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let key = lookup("AUTH_PUBLIC_KEY_PEM")
            .map(SigningKey::RsaPem)
            .or_else(|| lookup("AUTH_SECRET").map(SigningKey::Secret));

        Self {
            key,
            issuer: lookup("AUTH_ISSUER"),
            audience: lookup("AUTH_AUDIENCE"),
            skip_expiry: lookup("AUTH_SKIP_EXPIRY").is_some_and(|v| v == "true" || v == "1"),
        }
    }

    /// HS256 with a shared secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self { key: Some(SigningKey::Secret(secret.into())), ..Self::default() }
    }

    /// Whether connections must sign in.
    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct PlayerClaims {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    exp: Option<u64>,
}

/// A checked sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInPlayer {
    /// User id the connection is bound to.
    pub user_id: String,
    /// Token expiry (unix seconds), if the token has one.
    pub expires_at: Option<u64>,
}

/// Sign-in failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server has no key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// The configured key cannot be used.
    #[error("unusable verification key: {0}")]
    BadKey(String),
    /// Past `exp`.
    #[error("token expired")]
    Expired,
    /// No user in the token.
    #[error("token has no subject")]
    MissingSubject,
    /// Bad format, signature, issuer or audience.
    #[error("token rejected: {0}")]
    Rejected(String),
}

/// Check a login token at `now_secs`.
pub fn validate_token(
    token: &str,
    config: &AuthConfig,
    now_secs: u64,
) -> Result<SignedInPlayer, AuthError> {
    let key = config.key.as_ref().ok_or(AuthError::NotConfigured)?;

    let mut validation = Validation::new(key.algorithm());
    validation.required_spec_claims = HashSet::new();
    // exp is checked against the server clock below
    validation.validate_exp = false;
    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer]);
    }
    match &config.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    let claims = decode::<PlayerClaims>(token, &key.decoding_key()?, &validation)
        .map_err(|e| AuthError::Rejected(e.to_string()))?
        .claims;

    let user_id = claims.sub.trim();
    if user_id.is_empty() {
        return Err(AuthError::MissingSubject);
    }

    let expires_at = claims.exp.filter(|exp| *exp > 0);
    if let Some(exp) = expires_at {
        if !config.skip_expiry && now_secs > exp.saturating_add(EXPIRY_LEEWAY_SECS) {
            return Err(AuthError::Expired);
        }
    }

    Ok(SignedInPlayer { user_id: user_id.to_string(), expires_at })
}
