//! Share-to-reprieve.
//!
//! A short-lived token ties a share attempt to one run. The player posts,
//! then redeems the token; the verifier confirms a qualifying post was made
//! after the token was issued.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use reqwest::{Client, Url};
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::clock::Clock;
use crate::store::{keys, SharedStore, StoreError};
use super::VerifyError;

/// Default Neynar API root.
pub const NEYNAR_BASE_URL: &str = "https://api.neynar.com/v2";
/// Compose URL the client opens to post.
pub const COMPOSE_URL: &str = "https://warpcast.com/~/compose";
/// Casts inspected per verification.
const CAST_LOOKBACK: usize = 5;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Pending share proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareToken {
    /// Token value.
    pub token: String,
    /// Owner.
    pub user_id: String,
    /// Run being continued.
    pub run_id: String,
    /// Streak at the loss.
    pub streak: u32,
    /// Farcaster id of the poster, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fid: Option<u64>,
    /// Issue time (ms).
    pub created_at: u64,
    /// Expiry (ms).
    pub expires_at: u64,
    /// Redeemed.
    #[serde(default)]
    pub used: bool,
}

/// Suggested post text.
pub fn share_text(streak: u32, last_symbol: Option<&str>) -> String {
    let base = format!("Just got rekt at streak {} on CapOrSlap 💀", streak);
    match last_symbol {
        Some(symbol) => {
            format!("{}\n\nThought {} was the play... 😭\n\ncaporslap.xyz", base, symbol)
        }
        None => format!("{}\n\ncaporslap.xyz", base),
    }
}

/// Compose link with the text pre-filled.
pub fn compose_url(text: &str) -> Result<String, VerifyError> {
    Url::parse_with_params(COMPOSE_URL, &[("text", text)])
        .map(String::from)
        .map_err(|e| VerifyError::Upstream(e.to_string()))
}

/// Share token persistence.
#[derive(Clone)]
pub struct ShareTokens {
    store: SharedStore,
    clock: Arc<dyn Clock>,
}

impl ShareTokens {
    /// Tokens on a store and clock.
    pub fn new(store: SharedStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Issue a token for a run.
    pub async fn issue(
        &self,
        user_id: &str,
        run_id: &str,
        streak: u32,
        fid: Option<u64>,
    ) -> Result<ShareToken, StoreError> {
        let now = self.clock.now_ms();
        let token = ShareToken {
            token: format!("share_{}", uuid::Uuid::new_v4().simple()),
            user_id: user_id.to_string(),
            run_id: run_id.to_string(),
            streak,
            fid,
            created_at: now,
            expires_at: now + keys::SHARE_TOKEN_TTL.as_millis() as u64,
            used: false,
        };

        let json = serde_json::to_string(&token)?;
        self.store
            .set(&keys::share_token(&token.token), &json, Some(keys::SHARE_TOKEN_TTL))
            .await?;
        Ok(token)
    }

    /// Look up a token. Expired tokens are `None`.
    pub async fn get(&self, token: &str) -> Result<Option<ShareToken>, StoreError> {
        let Some(json) = self.store.get(&keys::share_token(token)).await? else {
            return Ok(None);
        };
        let parsed: ShareToken = serde_json::from_str(&json)?;
        if parsed.expires_at <= self.clock.now_ms() {
            return Ok(None);
        }
        Ok(Some(parsed))
    }

    /// Latch a token as redeemed; it lingers briefly so replays are refused.
    pub async fn mark_used(&self, token: &ShareToken) -> Result<(), StoreError> {
        let used = ShareToken { used: true, ..token.clone() };
        let json = serde_json::to_string(&used)?;
        self.store
            .set(&keys::share_token(&token.token), &json, Some(keys::SHARE_TOKEN_USED_TTL))
            .await
    }
}

impl std::fmt::Debug for ShareTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareTokens").finish_non_exhaustive()
    }
}

/// Outcome of a share check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareVerification {
    /// A qualifying post exists.
    pub verified: bool,
    /// Hash of the post that qualified.
    pub cast_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Cast {
    hash: String,
    text: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct CastFeed {
    #[serde(default)]
    casts: Vec<Cast>,
}

/// First cast mentioning the game at or after `since_ms`.
fn qualifying_cast(casts: &[Cast], since_ms: u64) -> Option<&Cast> {
    casts.iter().find(|cast| {
        let Ok(at) = DateTime::parse_from_rfc3339(&cast.timestamp) else {
            return false;
        };
        if (at.timestamp_millis() as u64) < since_ms {
            return false;
        }
        let text = cast.text.to_lowercase();
        text.contains("caporslap") || text.contains("cap or slap")
    })
}

/// Neynar feed client.
#[derive(Debug, Clone)]
pub struct NeynarClient {
    http: Client,
    api_key: String,
    base_url: String,
}

impl NeynarClient {
    /// Client for an API key.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, VerifyError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VerifyError::Upstream(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn recent_casts(&self, fid: u64) -> Result<Vec<Cast>, VerifyError> {
        let url = format!(
            "{}/farcaster/feed/user/{}/casts?limit={}",
            self.base_url, fid, CAST_LOOKBACK
        );
        let resp = self
            .http
            .get(url)
            .header("accept", "application/json")
            .header("api_key", &self.api_key)
            .send()
            .await
            .map_err(|e| VerifyError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(VerifyError::Upstream(format!("neynar status {}", resp.status())));
        }
        let feed: CastFeed = resp
            .json()
            .await
            .map_err(|e| VerifyError::Upstream(e.to_string()))?;
        Ok(feed.casts)
    }
}

/// Share verification backend.
#[derive(Debug, Clone)]
pub enum ShareVerifier {
    /// Accepts every share. Used when no API key is configured.
    Mock,
    /// Checks the poster's recent casts.
    Neynar(NeynarClient),
}

impl ShareVerifier {
    /// Confirm a qualifying post by `fid` made at or after `since_ms`.
    pub async fn verify(
        &self,
        fid: Option<u64>,
        since_ms: u64,
    ) -> Result<ShareVerification, VerifyError> {
        match self {
            ShareVerifier::Mock => {
                debug!("mock share verifier accepting share");
                Ok(ShareVerification { verified: true, cast_hash: None })
            }
            ShareVerifier::Neynar(client) => {
                let Some(fid) = fid else {
                    warn!("share verification without a farcaster id");
                    return Err(VerifyError::MissingIdentity);
                };
                let casts = client.recent_casts(fid).await?;
                let cast_hash = qualifying_cast(&casts, since_ms).map(|c| c.hash.clone());
                Ok(ShareVerification { verified: cast_hash.is_some(), cast_hash })
            }
        }
    }
}
