//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Every frame
//! is a JSON envelope:
//!
//! ```text
//! request:  {"id": 7, "type": "guess", "runId": "...", ...}
//! response: {"id": 7, "success": true, "status": 200, "type": "guess_result", ...}
//! error:    {"id": 7, "success": false, "status": 409, "type": "error",
//!            "code": "token_mismatch", "error": "..."}
//! ```
//!
//! The `id` is echoed so clients can match responses to requests.

use serde::{Serialize, Deserialize};

use crate::game::catalog::Item;
use crate::game::reprieve::ReprieveState;
use crate::game::run::Guess;
use crate::game::timer::TimerBudget;
use crate::leaderboard::{BoardKind, Identity, LeaderboardEntry, OvertakeEvent};

/// Default leaderboard page.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 100;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, echoed in the response.
    #[serde(default)]
    pub id: u64,
    /// The request.
    #[serde(flatten)]
    pub message: ClientMessage,
}

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate the connection.
    Auth(AuthRequest),
    /// Start a run.
    StartRun(StartRunRequest),
    /// Guess on the current pair.
    Guess(GuessRequest),
    /// Continue a lost run.
    Resume(ResumeRequest),
    /// Begin the share-to-reprieve flow.
    InitiateShare(InitiateShareRequest),
    /// Submit a final streak.
    SubmitScore(SubmitScoreRequest),
    /// Probe overtakes during a run.
    CheckOvertakes(OvertakeQuery),
    /// Read a leaderboard.
    Leaderboard(LeaderboardQuery),
    /// Latency probe.
    Ping {
        /// Client timestamp.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// JWT from the auth provider.
    pub token: String,
}

/// Start a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    /// Player.
    pub user_id: String,
}

/// A guess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuessRequest {
    /// Run.
    pub run_id: String,
    /// Player.
    pub user_id: String,
    /// The call.
    pub guess: Guess,
    /// Item the client shows.
    pub current_item_id: String,
    /// Item the client is guessing about.
    pub next_item_id: String,
    /// Client streak; only used when the run record is unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streak: Option<u32>,
}

/// Proof attached to a resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReprieveProof {
    /// Redeem a share token.
    Share {
        /// Token from `initiate_share`.
        token: String,
        /// Farcaster id of the poster.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fid: Option<u64>,
    },
    /// Redeem a payment.
    Payment {
        /// Transaction hash.
        #[serde(rename = "txHash")]
        tx_hash: String,
        /// Wallet the payment was sent from.
        #[serde(rename = "userAddress", default, skip_serializing_if = "Option::is_none")]
        user_address: Option<String>,
    },
}

/// Continue a lost run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRequest {
    /// Run.
    pub run_id: String,
    /// Player.
    pub user_id: String,
    /// Item the client still shows.
    pub current_item_id: String,
    /// Share or payment proof; optional only when paid reprieves are waived.
    #[serde(default)]
    pub proof: Option<ReprieveProof>,
}

/// Start the share flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateShareRequest {
    /// Player.
    pub user_id: String,
    /// Run.
    pub run_id: String,
    /// Streak at the loss.
    pub streak: u32,
    /// Farcaster id of the poster.
    #[serde(default)]
    pub fid: Option<u64>,
    /// Symbol of the item that ended the run.
    #[serde(default)]
    pub last_symbol: Option<String>,
}

/// Reference to the item a run ended on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRef {
    /// Item id.
    pub id: String,
    /// Symbol.
    pub symbol: String,
}

/// Final score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitScoreRequest {
    /// Run.
    pub run_id: String,
    /// Player.
    pub user_id: String,
    /// Claimed final streak.
    pub streak: u32,
    /// Item the run ended on.
    pub last_item: ItemRef,
    /// Display identity to cache.
    #[serde(default)]
    pub identity: Option<Identity>,
}

/// Live overtake probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OvertakeQuery {
    /// Player.
    pub user_id: String,
    /// Streak after the guess.
    pub current_streak: u32,
    /// Streak before the guess.
    #[serde(default)]
    pub previous_streak: u32,
}

fn default_limit() -> usize {
    DEFAULT_LEADERBOARD_LIMIT
}

/// Leaderboard read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    /// Which board.
    #[serde(default)]
    pub board: BoardKind,
    /// Rows wanted.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Include this user's rank.
    #[serde(default)]
    pub user_id: Option<String>,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id of the request.
    pub id: u64,
    /// False only for errors.
    pub success: bool,
    /// HTTP-equivalent status.
    pub status: u16,
    /// The response.
    #[serde(flatten)]
    pub message: ServerMessage,
}

impl Response {
    /// Successful response.
    pub fn ok(id: u64, message: ServerMessage) -> Self {
        Self { id, success: true, status: 200, message }
    }

    /// Error response.
    pub fn error(id: u64, status: u16, code: ErrorCode, error: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            status,
            message: ServerMessage::Error(ServerError { code, error: error.into() }),
        }
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection authenticated.
    AuthResult(AuthResult),
    /// Run started.
    RunStarted(RunStarted),
    /// Guess evaluated.
    GuessResult(GuessOutcome),
    /// Run resumed.
    Resumed(Resumed),
    /// Share token issued.
    ShareInitiated(ShareInitiated),
    /// Score recorded.
    ScoreSubmitted(ScoreSubmitted),
    /// Live overtakes.
    Overtakes(Overtakes),
    /// Leaderboard page.
    Leaderboard(LeaderboardPage),
    /// Latency probe answer.
    #[serde(rename_all = "camelCase")]
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (ms).
        server_time: u64,
    },
    /// Request failed.
    Error(ServerError),
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    /// User id bound to the connection.
    pub user_id: String,
}

/// A new run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStarted {
    /// Run.
    pub run_id: String,
    /// Seed fixing the selection streams.
    pub seed: String,
    /// Visible item.
    pub current_item: Item,
    /// Hidden item.
    pub next_item: Item,
    /// Think-time for the first round.
    pub timer_budget: TimerBudget,
    /// Start time (ms).
    pub started_at: u64,
    /// The run record could not be persisted.
    #[serde(default)]
    pub degraded: bool,
}

/// Correct guess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectGuess {
    /// Always true.
    pub correct: bool,
    /// Streak after the guess.
    pub new_streak: u32,
    /// The revealed item, now visible.
    pub current_item: Item,
    /// The next hidden item.
    pub next_item: Item,
    /// Think-time for the next round.
    pub timer_budget: TimerBudget,
    /// The next round is a boss round.
    pub boss_round: bool,
    /// Answered without a run record.
    #[serde(default)]
    pub degraded: bool,
}

/// Wrong guess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncorrectGuess {
    /// Always false.
    pub correct: bool,
    /// Streak the run ended on.
    pub final_streak: u32,
    /// What the player should have said.
    pub correct_answer: Guess,
    /// Value of the hidden item.
    pub revealed_value: f64,
    /// Continuation offer.
    pub reprieve: ReprieveState,
    /// Answered without a run record.
    #[serde(default)]
    pub degraded: bool,
}

/// Result of a guess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GuessOutcome {
    /// Streak continues.
    Correct(CorrectGuess),
    /// Run over.
    Incorrect(IncorrectGuess),
}

impl GuessOutcome {
    /// Whether the guess was right.
    pub fn is_correct(&self) -> bool {
        matches!(self, GuessOutcome::Correct(_))
    }
}

/// A resumed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resumed {
    /// Replacement hidden item.
    pub next_item: Item,
    /// Think-time including the reprieve grace.
    pub timer_budget: TimerBudget,
    /// Always true once resumed.
    pub has_used_reprieve: bool,
    /// Granted under the paid-reprieve waiver.
    #[serde(default)]
    pub waived: bool,
}

/// Issued share token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareInitiated {
    /// Token to redeem on resume.
    pub token: String,
    /// Compose link.
    pub share_url: String,
    /// Suggested text.
    pub cast_text: String,
    /// Farcaster id, if known.
    pub fid: Option<u64>,
    /// Token expiry (ms).
    pub expires_at: u64,
}

/// Score submission result.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSubmitted {
    /// The best went up.
    pub is_new_best: bool,
    /// All-time rank before.
    pub previous_rank: Option<u64>,
    /// All-time rank after.
    pub new_rank: Option<u64>,
    /// Submitted streak.
    pub streak: u32,
    /// Users passed.
    pub overtakes: Vec<OvertakeEvent>,
    /// Rank data unavailable.
    #[serde(default)]
    pub degraded: bool,
}

/// Live overtakes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Overtakes {
    /// Users passed, highest first.
    pub overtakes: Vec<OvertakeEvent>,
    /// Leaderboard unavailable.
    #[serde(default)]
    pub degraded: bool,
}

/// Leaderboard page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardPage {
    /// Which board.
    pub board: BoardKind,
    /// Rows, best first.
    pub entries: Vec<LeaderboardEntry>,
    /// Requesting user's rank.
    pub user_rank: Option<u64>,
    /// Leaderboard unavailable.
    #[serde(default)]
    pub degraded: bool,
}

/// Server error message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub error: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Invalid input.
    InvalidInput,
    /// Run belongs to someone else.
    Unauthorized,
    /// Claimed pair does not match the run.
    TokenMismatch,
    /// Rate limited.
    RateLimited,
    /// Run already lost.
    RunOver,
    /// Run record absent or expired.
    RunNotFound,
    /// No reprieve on offer.
    ReprieveNotEligible,
    /// Reprieve proof refused.
    ProofRejected,
    /// Proof service unreachable.
    VerifierUnavailable,
    /// Not enough items to play.
    CatalogExhausted,
    /// Shared store unreachable.
    StoreUnavailable,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl Request {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Deserialize from a binary frame holding UTF-8 JSON.
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl Response {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Best-effort correlation id from a frame that failed to parse.
pub fn peek_id(raw: &[u8]) -> u64 {
    serde_json::from_slice::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("id").and_then(|id| id.as_u64()))
        .unwrap_or(0)
}
