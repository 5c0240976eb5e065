//! Error types for the ad network core

use crate::{Amount, CampaignId, PoolId};
use thiserror::Error;

/// Failures reported by an external fungible-asset ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Insufficient allowance: need {needed}, approved {approved}")]
    InsufficientAllowance { needed: Amount, approved: Amount },

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Amount, available: Amount },

    #[error("Account {0} is not authorized to mint")]
    NotMinter(String),

    #[error("Arithmetic overflow")]
    Overflow,

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum AdNetworkError {
    #[error("Insufficient allowance: need {needed}, approved {approved}")]
    InsufficientAllowance { needed: Amount, approved: Amount },

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Amount, available: Amount },

    #[error("No stake found for {staker} in pool {pool}")]
    NoStakeFound { pool: PoolId, staker: String },

    #[error("No unlock requested by {staker} in pool {pool}")]
    UnlockNotRequested { pool: PoolId, staker: String },

    #[error("Lock not elapsed: unlocks at {unlocks_at}, now {now}")]
    LockNotElapsed { unlocks_at: u64, now: u64 },

    #[error("Pool {0} is not assigned to this publisher")]
    UnauthorizedPool(PoolId),

    #[error("Account {validator} is not a member of pool {pool}")]
    UnauthorizedValidator { pool: PoolId, validator: String },

    #[error("Account {0} does not hold the slasher role")]
    UnauthorizedSlasher(String),

    #[error("Account {0} is not authorized for this operation")]
    Unauthorized(String),

    #[error("Insufficient campaign budget: need {needed}, remaining {remaining}")]
    InsufficientBudget { needed: Amount, remaining: Amount },

    #[error("Pool not found: {0}")]
    PoolNotFound(PoolId),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error("Funding token not approved: {0}")]
    TokenNotApproved(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid affiliate: {0}")]
    InvalidAffiliate(String),

    #[error("Invalid pool metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid reward split: {0}")]
    InvalidRewardSplit(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),
}

impl From<LedgerError> for AdNetworkError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientAllowance { needed, approved } => {
                AdNetworkError::InsufficientAllowance { needed, approved }
            }
            LedgerError::InsufficientBalance { needed, available } => {
                AdNetworkError::InsufficientBalance { needed, available }
            }
            other => AdNetworkError::Ledger(other),
        }
    }
}
