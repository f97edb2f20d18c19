//! Reprieve Policy
//!
//! One continuation per run after a loss. Short streaks pay with a social
//! share, longer ones with a micropayment. The waiver flag grants paid
//! reprieves for free; callers must log every waived grant.

use serde::{Serialize, Deserialize};

/// Streak at which the offer switches from share to paid.
pub const DEFAULT_SHARE_THRESHOLD: u32 = 5;
/// Price of a paid reprieve in US cents.
pub const DEFAULT_PRICE_CENTS: u32 = 100;

/// What the player may do after a loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprieveOffer {
    /// No continuation.
    None,
    /// Free, gated on a verified social post.
    Share,
    /// Gated on a verified payment.
    Paid,
}

/// Offer plus the numbers the client needs to present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReprieveState {
    /// The offer.
    pub offer: ReprieveOffer,
    /// Price in cents when the offer is paid.
    pub price_cents: Option<u32>,
    /// Streak at which paid reprieves start.
    pub share_threshold: u32,
    /// Paid reprieves are currently granted without payment.
    pub waived: bool,
}

/// Reprieve decision table.
#[derive(Debug, Clone)]
pub struct ReprievePolicy {
    /// Streaks below this get the share offer.
    pub share_threshold: u32,
    /// Paid price in cents.
    pub price_cents: u32,
    /// Grant paid reprieves without payment.
    pub waive_paid: bool,
}

impl Default for ReprievePolicy {
    fn default() -> Self {
        Self {
            share_threshold: DEFAULT_SHARE_THRESHOLD,
            price_cents: DEFAULT_PRICE_CENTS,
            waive_paid: false,
        }
    }
}

impl ReprievePolicy {
    /// Offer for a lost run.
    pub fn offer(&self, streak: u32, has_used_reprieve: bool) -> ReprieveOffer {
        if has_used_reprieve {
            ReprieveOffer::None
        } else if streak < self.share_threshold {
            ReprieveOffer::Share
        } else {
            ReprieveOffer::Paid
        }
    }

    /// Offer with presentation metadata.
    pub fn state(&self, streak: u32, has_used_reprieve: bool) -> ReprieveState {
        let offer = self.offer(streak, has_used_reprieve);
        ReprieveState {
            offer,
            price_cents: (offer == ReprieveOffer::Paid).then_some(self.price_cents),
            share_threshold: self.share_threshold,
            waived: offer == ReprieveOffer::Paid && self.waive_paid,
        }
    }
}
