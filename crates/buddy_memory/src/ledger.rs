//! Heart-to-coupon reward ledger.
//!
//! Entitlement is floor(lifetime hearts received / hearts per coupon). A
//! claim issues at most one coupon and only while issued < entitlement, so
//! the issued count can never overtake entitlement even under concurrent
//! claims.

use crate::sqlite::{IssueResult, NewCoupon, RedeemResult, SqliteStore};
use anyhow::Result;
use buddy_core::config::RewardConfig;
use buddy_core::Coupon;
use chrono::{DateTime, Months, Utc};
use rand::Rng;
use serde::Serialize;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 5;

pub const NOT_ENTITLED: &str = "not yet entitled";

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClaimOutcome {
    Issued { coupon: Coupon },
    NotEntitled { noop: bool, reason: String },
}

impl ClaimOutcome {
    fn not_entitled() -> Self {
        ClaimOutcome::NotEntitled {
            noop: true,
            reason: NOT_ENTITLED.to_string(),
        }
    }

    pub fn coupon(&self) -> Option<&Coupon> {
        match self {
            ClaimOutcome::Issued { coupon } => Some(coupon),
            ClaimOutcome::NotEntitled { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStatus {
    pub lifetime_hearts: i64,
    pub hearts_per_coupon: i64,
    pub entitlement: i64,
    pub issued: i64,
    pub unclaimed: i64,
    /// Hearts still needed for the next threshold.
    pub hearts_to_next: i64,
}

impl LedgerStatus {
    pub fn compute(lifetime_hearts: i64, hearts_per_coupon: i64, issued: i64) -> Self {
        let per = hearts_per_coupon.max(1);
        let entitlement = lifetime_hearts / per;
        Self {
            lifetime_hearts,
            hearts_per_coupon: per,
            entitlement,
            issued,
            unclaimed: (entitlement - issued).max(0),
            hearts_to_next: per - lifetime_hearts % per,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExpiryStatus {
    Redeemed,
    Expired,
    DaysLeft(i64),
}

impl ExpiryStatus {
    pub fn of(coupon: &Coupon, now: DateTime<Utc>) -> Self {
        if coupon.is_redeemed {
            ExpiryStatus::Redeemed
        } else if coupon.is_expired(now) {
            ExpiryStatus::Expired
        } else {
            ExpiryStatus::DaysLeft(coupon.days_until_expiry(now))
        }
    }

    pub fn label(&self) -> String {
        match self {
            ExpiryStatus::Redeemed => "Redeemed".to_string(),
            ExpiryStatus::Expired => "Expired".to_string(),
            ExpiryStatus::DaysLeft(n) => format!("{} days left", n),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponView {
    #[serde(flatten)]
    pub coupon: Coupon,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RedeemOutcome {
    Redeemed { coupon: Coupon },
    AlreadyRedeemed { coupon: Coupon },
    Expired { coupon: Coupon },
    NotFound,
}

pub struct RewardLedger {
    store: SqliteStore,
    config: RewardConfig,
}

impl RewardLedger {
    pub fn new(store: SqliteStore, config: RewardConfig) -> Self {
        Self { store, config }
    }

    /// Threshold used by both status and claim; never below one heart.
    fn hearts_per_coupon(&self) -> i64 {
        self.config.hearts_per_coupon.max(1)
    }

    pub async fn status(&self, caregiver_id: &str) -> Result<LedgerStatus> {
        let hearts = self.store.lifetime_hearts_received(caregiver_id).await?;
        let issued = self.store.coupon_count(caregiver_id).await?;
        Ok(LedgerStatus::compute(hearts, self.hearts_per_coupon(), issued))
    }

    /// Issue one coupon if a threshold is unclaimed. Lack of entitlement is
    /// an outcome, not an error.
    #[tracing::instrument(skip(self))]
    pub async fn claim(&self, caregiver_id: &str) -> Result<ClaimOutcome> {
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let earned_at = Utc::now();
            let new = NewCoupon {
                caregiver_id: caregiver_id.to_string(),
                code: generate_code(&self.config.code_prefix, self.config.code_length),
                coupon_type: self.config.coupon_type.clone(),
                title: self.config.title.clone(),
                description: self.config.description.clone(),
                hearts_required: self.hearts_per_coupon(),
                earned_at,
                expires_at: earned_at
                    .checked_add_months(Months::new(self.config.expiry_months))
                    .unwrap_or(earned_at),
            };

            match self
                .store
                .try_issue_coupon(&new, self.hearts_per_coupon())
                .await?
            {
                IssueResult::Issued(coupon) => {
                    tracing::info!(code = %coupon.code, seq = coupon.claim_seq, "coupon issued");
                    return Ok(ClaimOutcome::Issued { coupon });
                }
                IssueResult::NotEntitled => return Ok(ClaimOutcome::not_entitled()),
                IssueResult::CodeTaken => {
                    tracing::warn!(attempt, "coupon code collision, regenerating");
                }
            }
        }
        anyhow::bail!("could not generate a unique coupon code after {} attempts", MAX_CODE_ATTEMPTS)
    }

    /// All coupons, newest first, with their expiry label.
    pub async fn list(&self, caregiver_id: &str, now: DateTime<Utc>) -> Result<Vec<CouponView>> {
        let coupons = self.store.coupons_for(caregiver_id).await?;
        Ok(coupons
            .into_iter()
            .map(|coupon| {
                let status = ExpiryStatus::of(&coupon, now).label();
                CouponView { coupon, status }
            })
            .collect())
    }

    pub async fn redeem(
        &self,
        caregiver_id: &str,
        coupon_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome> {
        if let Some(coupon) = self.store.coupon_by_id(coupon_id).await? {
            if coupon.caregiver_id == caregiver_id && !coupon.is_redeemed && coupon.is_expired(now) {
                return Ok(RedeemOutcome::Expired { coupon });
            }
        }
        Ok(match self.store.redeem_coupon(caregiver_id, coupon_id, now).await? {
            RedeemResult::Redeemed(coupon) => {
                tracing::info!(code = %coupon.code, "coupon redeemed");
                RedeemOutcome::Redeemed { coupon }
            }
            RedeemResult::AlreadyRedeemed(coupon) => RedeemOutcome::AlreadyRedeemed { coupon },
            RedeemResult::NotFound => RedeemOutcome::NotFound,
        })
    }
}

/// `prefix` followed by `length` characters from `A-Z0-9`.
pub fn generate_code(prefix: &str, length: usize) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..length)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}
