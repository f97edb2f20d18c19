//! Game Service
//!
//! Orchestrates every player-facing operation on top of the pure game logic
//! and the store-backed collaborators. The transport layer calls into here
//! with already-parsed requests and serializes whatever comes back.
//!
//! Store failures never fail a guess, a score submission or a leaderboard
//! read: those fall back to a stateless answer flagged `degraded`. Resuming
//! and issuing share tokens need persisted state and report the store error.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::GameConfig;
use crate::core::clock::Clock;
use crate::core::rng::generate_run_seed;
use crate::error::{GameError, GameResult};
use crate::game::catalog::{Catalog, Item};
use crate::game::difficulty::is_boss_round;
use crate::game::reprieve::ReprieveOffer;
use crate::game::run::{Guess, RunRecord};
use crate::game::sequencer::{
    select_fresh, select_initial_pair, select_next, SelectionContext, SequenceError, RECENT_WINDOW,
};
use crate::game::timer::{timer_budget, timer_budget_after_reprieve};
use crate::game::validator::{check_submission, validate_guess, SubmissionCheck, ValidationError};
use crate::leaderboard::{Leaderboard, MAX_STREAK};
use crate::network::protocol::{
    CorrectGuess, GuessOutcome, GuessRequest, IncorrectGuess, InitiateShareRequest, LeaderboardPage,
    LeaderboardQuery, OvertakeQuery, Overtakes, ReprieveProof, ResumeRequest, Resumed, RunStarted,
    ScoreSubmitted, ShareInitiated, StartRunRequest, SubmitScoreRequest,
};
use crate::store::{RunStore, SharedStore};
use crate::verify::payment::is_address;
use crate::verify::share::{compose_url, share_text};
use crate::verify::{PaymentVerifier, RedeemedPayments, ShareToken, ShareTokens, ShareVerifier};

/// Proof accepted for a reprieve, consumed once the resumed record is saved.
enum Redemption {
    Share(ShareToken),
    Payment(String),
    Waived,
}

/// Game orchestration over a catalog snapshot and a shared store.
pub struct GameService {
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    runs: RunStore,
    leaderboard: Leaderboard,
    share_tokens: ShareTokens,
    share_verifier: ShareVerifier,
    payment_verifier: PaymentVerifier,
    payments: RedeemedPayments,
    config: GameConfig,
}

impl GameService {
    /// Service with mock proof verifiers.
    pub fn new(
        catalog: Arc<Catalog>,
        store: SharedStore,
        clock: Arc<dyn Clock>,
        config: GameConfig,
    ) -> Self {
        Self {
            runs: RunStore::with_ttl(store.clone(), config.run_ttl),
            leaderboard: Leaderboard::new(store.clone(), clock.clone()),
            share_tokens: ShareTokens::new(store.clone(), clock.clone()),
            share_verifier: ShareVerifier::Mock,
            payment_verifier: PaymentVerifier::Mock,
            payments: RedeemedPayments::new(store),
            catalog,
            clock,
            config,
        }
    }

    /// Replace the proof verifiers.
    pub fn with_verifiers(mut self, share: ShareVerifier, payment: PaymentVerifier) -> Self {
        self.share_verifier = share;
        self.payment_verifier = payment;
        self
    }

    /// Catalog snapshot in use.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Game rules in use.
    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Current server time (ms).
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // =========================================================================
    // RUNS
    // =========================================================================

    /// Start a run with a fresh random seed.
    pub async fn start_run(&self, req: StartRunRequest) -> GameResult<RunStarted> {
        self.start_run_seeded(&req.user_id, &generate_run_seed()).await
    }

    /// Start a run with a given seed.
    #[instrument(skip(self, seed), fields(run_id = tracing::field::Empty))]
    pub async fn start_run_seeded(&self, user_id: &str, seed: &str) -> GameResult<RunStarted> {
        if user_id.is_empty() {
            return Err(GameError::InvalidInput("userId is required".into()));
        }

        let (current, next) = select_initial_pair(&self.catalog, seed)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());

        let now = self.clock.now_ms();
        let record = RunRecord::new(&run_id, seed, user_id, now, &current, &next);

        let degraded = match self.runs.create(&record).await {
            Ok(()) => false,
            Err(e) => {
                GameError::from(e).log("start_run");
                true
            }
        };

        info!(current = %current.id, degraded, "run started");

        Ok(RunStarted {
            run_id,
            seed: seed.to_string(),
            current_item: current,
            next_item: next,
            timer_budget: timer_budget(0),
            started_at: now,
            degraded,
        })
    }

    /// Evaluate a guess against the stored run.
    ///
    /// Without a record (expired, never written, store down) the guess is
    /// evaluated from the claimed pair and the client's streak.
    #[instrument(skip(self, req), fields(run_id = %req.run_id, user_id = %req.user_id))]
    pub async fn submit_guess(&self, req: GuessRequest) -> GameResult<GuessOutcome> {
        let record = match self.runs.get(&req.run_id).await {
            Ok(record) => record,
            Err(e) => {
                GameError::from(e).log("submit_guess");
                None
            }
        };

        match record {
            Some(record) => self.guess_on_record(record, &req).await,
            None => {
                warn!("run record unavailable, answering statelessly");
                self.guess_stateless(&req)
            }
        }
    }

    async fn guess_on_record(
        &self,
        mut record: RunRecord,
        req: &GuessRequest,
    ) -> GameResult<GuessOutcome> {
        let now = self.clock.now_ms();
        validate_guess(
            &record,
            &req.user_id,
            &req.current_item_id,
            &req.next_item_id,
            now,
            &self.config.validation,
        )?;

        let current = self.item(&record.current_item_id)?.clone();
        let next = self.item(&record.next_item_id)?.clone();

        if !req.guess.is_correct(&current, &next) {
            record.apply_incorrect(req.guess, now);
            let degraded = !self.persist(&record, "submit_guess").await;

            let reprieve = self
                .config
                .reprieve
                .state(record.current_streak, record.has_used_reprieve);
            info!(streak = record.current_streak, offer = ?reprieve.offer, "run lost");

            return Ok(GuessOutcome::Incorrect(IncorrectGuess {
                correct: false,
                final_streak: record.current_streak,
                correct_answer: Guess::answer(&current, &next),
                revealed_value: next.value,
                reprieve,
                degraded,
            }));
        }

        // Pick the upcoming item against the log as it will read after this guess
        let mut advanced = record.clone();
        advanced.apply_correct(req.guess, now, String::new());
        let recent = advanced.recent_item_ids(RECENT_WINDOW);
        let upcoming = select_next(
            &self.catalog,
            &record.seed,
            &SelectionContext {
                current: &next,
                round: advanced.round_number,
                streak: advanced.current_streak,
                recent_ids: &recent,
                excluded_ids: &[],
            },
        )?;

        record.apply_correct(req.guess, now, upcoming.id.clone());
        let degraded = !self.persist(&record, "submit_guess").await;
        debug!(streak = record.current_streak, round = record.round_number, "correct guess");

        Ok(GuessOutcome::Correct(CorrectGuess {
            correct: true,
            new_streak: record.current_streak,
            current_item: next,
            next_item: upcoming,
            timer_budget: timer_budget(record.current_streak),
            boss_round: is_boss_round(record.round_number),
            degraded,
        }))
    }

    fn guess_stateless(&self, req: &GuessRequest) -> GameResult<GuessOutcome> {
        if req.current_item_id == req.next_item_id {
            return Err(GameError::InvalidInput("current and next item are the same".into()));
        }
        let current = self.claimed_item(&req.current_item_id)?;
        let next = self.claimed_item(&req.next_item_id)?;
        let streak = req.streak.unwrap_or(0);
        if streak > MAX_STREAK {
            return Err(GameError::InvalidInput(format!("streak {} is out of range", streak)));
        }

        if !req.guess.is_correct(current, next) {
            return Ok(GuessOutcome::Incorrect(IncorrectGuess {
                correct: false,
                final_streak: streak,
                correct_answer: Guess::answer(current, next),
                revealed_value: next.value,
                reprieve: self.config.reprieve.state(streak, false),
                degraded: true,
            }));
        }

        let new_streak = streak + 1;
        let recent = vec![current.id.clone()];
        let upcoming = select_next(
            &self.catalog,
            &format!("fallback_{}", req.run_id),
            &SelectionContext {
                current: next,
                round: new_streak,
                streak: new_streak,
                recent_ids: &recent,
                excluded_ids: &[],
            },
        )?;

        Ok(GuessOutcome::Correct(CorrectGuess {
            correct: true,
            new_streak,
            current_item: next.clone(),
            next_item: upcoming,
            timer_budget: timer_budget(new_streak),
            boss_round: is_boss_round(new_streak),
            degraded: true,
        }))
    }

    // =========================================================================
    // REPRIEVES
    // =========================================================================

    /// Continue a lost run once, against a share or payment proof.
    #[instrument(skip(self, req), fields(run_id = %req.run_id, user_id = %req.user_id))]
    pub async fn resume_run(&self, req: ResumeRequest) -> GameResult<Resumed> {
        let mut record = self
            .runs
            .get(&req.run_id)
            .await?
            .ok_or_else(|| GameError::RunNotFound(req.run_id.clone()))?;

        if record.user_id != req.user_id {
            return Err(ValidationError::Unauthorized.into());
        }
        if record.current_item_id != req.current_item_id {
            return Err(ValidationError::TokenMismatch.into());
        }
        if record.has_used_reprieve {
            return Err(GameError::ReprieveUnavailable("reprieve already used".into()));
        }
        if !record.is_lost() {
            return Err(GameError::ReprieveUnavailable("run is not over".into()));
        }

        let redemption = self.check_proof(&record, req.proof.as_ref()).await?;

        let current = self.item(&record.current_item_id)?.clone();
        let failed_id = record
            .failed_guess
            .as_ref()
            .map(|entry| entry.next_item_id.clone())
            .unwrap_or_else(|| record.next_item_id.clone());
        let recent = record.recent_item_ids(RECENT_WINDOW);
        let fresh = select_fresh(
            &self.catalog,
            &record.seed,
            &SelectionContext {
                current: &current,
                round: record.round_number,
                streak: record.current_streak,
                recent_ids: &recent,
                excluded_ids: &[],
            },
            &failed_id,
        )?;

        record.resume(fresh.id.clone());
        self.runs.replace(&record).await?;

        let waived = matches!(redemption, Redemption::Waived);
        self.redeem(redemption, &record).await;
        info!(streak = record.current_streak, waived, "run resumed");

        Ok(Resumed {
            next_item: fresh,
            timer_budget: timer_budget_after_reprieve(record.current_streak),
            has_used_reprieve: record.has_used_reprieve,
            waived,
        })
    }

    async fn check_proof(
        &self,
        record: &RunRecord,
        proof: Option<&ReprieveProof>,
    ) -> GameResult<Redemption> {
        let policy = &self.config.reprieve;
        match (policy.offer(record.current_streak, record.has_used_reprieve), proof) {
            (ReprieveOffer::None, _) => {
                Err(GameError::ReprieveUnavailable("no reprieve on offer".into()))
            }
            (ReprieveOffer::Paid, _) if policy.waive_paid => {
                warn!(
                    audit = true,
                    run_id = %record.run_id,
                    user_id = %record.user_id,
                    streak = record.current_streak,
                    "paid reprieve waived"
                );
                Ok(Redemption::Waived)
            }
            (ReprieveOffer::Share, Some(ReprieveProof::Share { token, fid })) => {
                self.check_share(record, token, *fid).await.map(Redemption::Share)
            }
            (ReprieveOffer::Paid, Some(ReprieveProof::Payment { tx_hash, user_address })) => {
                // Wallet users pay from the address they play as
                let payer = user_address
                    .as_deref()
                    .or_else(|| is_address(&record.user_id).then_some(record.user_id.as_str()));
                self.check_payment(tx_hash, payer).await?;
                Ok(Redemption::Payment(tx_hash.clone()))
            }
            (ReprieveOffer::Share, Some(ReprieveProof::Payment { .. })) => {
                Err(GameError::ReprieveUnavailable(format!(
                    "streaks below {} continue by sharing",
                    policy.share_threshold
                )))
            }
            (ReprieveOffer::Paid, Some(ReprieveProof::Share { .. })) => {
                Err(GameError::ReprieveUnavailable(format!(
                    "streaks of {} or more need a paid reprieve",
                    policy.share_threshold
                )))
            }
            (_, None) => Err(GameError::ProofRejected("proof required".into())),
        }
    }

    async fn check_share(
        &self,
        record: &RunRecord,
        token: &str,
        fid: Option<u64>,
    ) -> GameResult<ShareToken> {
        let share = self
            .share_tokens
            .get(token)
            .await?
            .ok_or_else(|| GameError::ProofRejected("share token not found or expired".into()))?;

        if share.used {
            return Err(GameError::ProofRejected("share token already used".into()));
        }
        if share.user_id != record.user_id || share.run_id != record.run_id {
            return Err(GameError::ProofRejected("share token belongs to another run".into()));
        }

        let verification = self
            .share_verifier
            .verify(fid.or(share.fid), share.created_at)
            .await?;
        if !verification.verified {
            return Err(GameError::ProofRejected("no qualifying post found".into()));
        }
        debug!(cast = ?verification.cast_hash, "share verified");
        Ok(share)
    }

    async fn check_payment(&self, tx_hash: &str, payer: Option<&str>) -> GameResult<()> {
        if self.payments.is_redeemed(tx_hash).await? {
            return Err(GameError::ProofRejected("payment already redeemed".into()));
        }
        if !self.payment_verifier.verify(tx_hash, payer).await? {
            return Err(GameError::ProofRejected("payment not confirmed".into()));
        }
        Ok(())
    }

    async fn redeem(&self, redemption: Redemption, record: &RunRecord) {
        let result = match redemption {
            Redemption::Share(token) => self.share_tokens.mark_used(&token).await,
            Redemption::Payment(tx_hash) => self.payments.redeem(&tx_hash, &record.run_id).await,
            Redemption::Waived => Ok(()),
        };
        if let Err(e) = result {
            GameError::from(e).log("redeem_proof");
        }
    }

    /// Issue a share token for a lost run.
    #[instrument(skip(self, req), fields(run_id = %req.run_id, user_id = %req.user_id))]
    pub async fn initiate_share(&self, req: InitiateShareRequest) -> GameResult<ShareInitiated> {
        let mut streak = req.streak;
        let mut has_used_reprieve = false;

        match self.runs.get(&req.run_id).await {
            Ok(Some(record)) => {
                if record.user_id != req.user_id {
                    return Err(ValidationError::Unauthorized.into());
                }
                streak = record.current_streak;
                has_used_reprieve = record.has_used_reprieve;
            }
            Ok(None) => debug!("no run record, trusting client streak"),
            Err(e) => GameError::from(e).log("initiate_share"),
        }

        let policy = &self.config.reprieve;
        match policy.offer(streak, has_used_reprieve) {
            ReprieveOffer::Share => {}
            ReprieveOffer::Paid => {
                return Err(GameError::ReprieveUnavailable(format!(
                    "streaks of {} or more need a paid reprieve",
                    policy.share_threshold
                )));
            }
            ReprieveOffer::None => {
                return Err(GameError::ReprieveUnavailable("reprieve already used".into()));
            }
        }

        let token = self
            .share_tokens
            .issue(&req.user_id, &req.run_id, streak, req.fid)
            .await?;
        let cast_text = share_text(streak, req.last_symbol.as_deref());
        let share_url = compose_url(&cast_text)?;
        info!(streak, "share token issued");

        Ok(ShareInitiated {
            token: token.token,
            share_url,
            cast_text,
            fid: token.fid,
            expires_at: token.expires_at,
        })
    }

    // =========================================================================
    // LEADERBOARD
    // =========================================================================

    /// Record a final streak.
    ///
    /// A missing run record never blocks the submission; integrity findings
    /// are logged only.
    #[instrument(
        skip(self, req),
        fields(run_id = %req.run_id, user_id = %req.user_id, streak = req.streak)
    )]
    pub async fn submit_score(&self, req: SubmitScoreRequest) -> GameResult<ScoreSubmitted> {
        if req.user_id.is_empty() || req.run_id.is_empty() {
            return Err(GameError::InvalidInput("userId and runId are required".into()));
        }
        if req.last_item.id.is_empty() || req.last_item.symbol.is_empty() {
            return Err(GameError::InvalidInput("lastItem needs an id and symbol".into()));
        }
        if req.streak > MAX_STREAK {
            return Err(GameError::InvalidInput(format!("streak {} is out of range", req.streak)));
        }

        match self.runs.get(&req.run_id).await {
            Ok(Some(record)) => {
                let check =
                    check_submission(&record, &req.user_id, req.streak, &self.config.validation);
                match check {
                    SubmissionCheck::Unauthorized => {
                        return Err(ValidationError::Unauthorized.into())
                    }
                    SubmissionCheck::Checked(findings) => {
                        for finding in findings {
                            GameError::Advisory(finding).log("submit_score");
                        }
                    }
                }
            }
            Ok(None) => warn!("run record not found, accepting submission"),
            Err(e) => GameError::from(e).log("submit_score"),
        }

        match self
            .leaderboard
            .submit_score(&req.user_id, req.streak, req.identity.as_ref())
            .await
        {
            Ok(outcome) => {
                info!(
                    is_new_best = outcome.is_new_best,
                    new_rank = ?outcome.new_rank,
                    "score submitted"
                );
                Ok(ScoreSubmitted {
                    is_new_best: outcome.is_new_best,
                    previous_rank: outcome.previous_rank,
                    new_rank: outcome.new_rank,
                    streak: req.streak,
                    overtakes: outcome.overtakes,
                    degraded: false,
                })
            }
            Err(e) => {
                GameError::from(e).log("submit_score");
                Ok(ScoreSubmitted { streak: req.streak, degraded: true, ..Default::default() })
            }
        }
    }

    /// Users passed by an in-progress streak.
    #[instrument(skip(self, query), fields(user_id = %query.user_id))]
    pub async fn check_overtakes(&self, query: OvertakeQuery) -> GameResult<Overtakes> {
        match self
            .leaderboard
            .live_overtakes(&query.user_id, query.previous_streak, query.current_streak)
            .await
        {
            Ok(overtakes) => Ok(Overtakes { overtakes, degraded: false }),
            Err(e) => {
                GameError::from(e).log("check_overtakes");
                Ok(Overtakes { overtakes: Vec::new(), degraded: true })
            }
        }
    }

    /// A page of a leaderboard.
    #[instrument(skip(self, query), fields(board = ?query.board))]
    pub async fn get_leaderboard(&self, query: LeaderboardQuery) -> GameResult<LeaderboardPage> {
        let mut degraded = false;

        let entries = match self.leaderboard.entries(query.board, query.limit).await {
            Ok(entries) => entries,
            Err(e) => {
                GameError::from(e).log("get_leaderboard");
                degraded = true;
                Vec::new()
            }
        };

        let user_rank = match &query.user_id {
            Some(user_id) if !degraded => {
                match self.leaderboard.user_rank(query.board, user_id).await {
                    Ok(rank) => rank,
                    Err(e) => {
                        GameError::from(e).log("get_leaderboard");
                        degraded = true;
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(LeaderboardPage { board: query.board, entries, user_rank, degraded })
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Item referenced by a stored record.
    fn item(&self, id: &str) -> GameResult<&Item> {
        self.catalog
            .get(id)
            .ok_or_else(|| SequenceError::UnknownItem(id.to_string()).into())
    }

    /// Item referenced by a client.
    fn claimed_item(&self, id: &str) -> GameResult<&Item> {
        self.catalog
            .get(id)
            .ok_or_else(|| GameError::InvalidInput(format!("unknown item {}", id)))
    }

    /// Save a record; false when the store refused.
    async fn persist(&self, record: &RunRecord, context: &str) -> bool {
        match self.runs.replace(record).await {
            Ok(()) => true,
            Err(e) => {
                GameError::from(e).log(context);
                false
            }
        }
    }
}

impl std::fmt::Debug for GameService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameService")
            .field("catalog_items", &self.catalog.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
