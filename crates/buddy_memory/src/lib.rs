pub mod bus;
pub mod feed;
pub mod ledger;
pub mod sqlite;

pub use bus::ActivityBus;
pub use feed::{CaregiverFeed, FeedMessage, FeedSnapshot, FeedUpdate};
pub use ledger::{ClaimOutcome, CouponView, ExpiryStatus, LedgerStatus, RedeemOutcome, RewardLedger};
pub use sqlite::{IssueResult, NewCoupon, RedeemResult, SqliteStore};

#[cfg(test)]
mod tests;
