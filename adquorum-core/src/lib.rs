//! adquorum core - decentralized ad-click validation and reward distribution
//!
//! Advertisers fund campaigns, publishers display ads, and staked validator pools
//! independently attest clicks. Once a quorum of distinct pools agrees that a click
//! is genuine and not a duplicate, the campaign pays the publisher and native reward
//! tokens are minted for every party, including the attesting pools' stakers.

pub mod affiliate;
pub mod assignment;
pub mod campaign;
pub mod clock;
pub mod config;
pub mod consensus;
pub mod error;
pub mod events;
pub mod ledger;
pub mod math;
pub mod network;
pub mod pool;
pub mod rewards;
pub mod roles;
pub mod staking;
pub mod types;

pub use affiliate::{AffiliateRef, AffiliateRegistry};
pub use assignment::ValidatorAssignment;
pub use campaign::{Campaign, CampaignBudget, CampaignParams, FundingToken, PayoutOutcome, SkipReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AssignmentConfig, CampaignConfig, ConsensusConfig, DedupKeyShape, NetworkConfig,
    RewardConfig, StakingConfig,
};
pub use consensus::{
    AttestationOutcome, ClickAttestation, ClickStatus, ClickValidationConsensus, SettlementRecord,
};
pub use error::{AdNetworkError, LedgerError};
pub use events::{EventBus, NetworkEvent};
pub use ledger::{FungibleAssetLedger, InMemoryLedger};
pub use network::{AdNetwork, AdNetworkBuilder};
pub use pool::{PoolRegistry, PoolSnapshot, UnlockRequest, ValidatorPool};
pub use rewards::{RewardParties, RewardPlan, RewardSplit, RewardSplitter};
pub use roles::AccessControl;
pub use staking::StakingLedger;
pub use types::{fingerprint, AccountId, CampaignId, DedupKey, Fingerprint, PoolId, TokenId};

/// Result type for ad network operations
pub type Result<T> = std::result::Result<T, AdNetworkError>;

/// Token amount in the smallest indivisible unit of its asset
pub type Amount = u128;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Protocol version
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Network configuration constants
pub mod constants {
    use super::Amount;

    /// One whole token at 18 decimals
    pub const TOKEN: Amount = 1_000_000_000_000_000_000;

    /// One thousandth of a token
    pub const FINNEY: Amount = TOKEN / 1_000;

    /// Seconds in a day
    pub const SECONDS_PER_DAY: u64 = 86_400;

    /// Waiting period between an unlock request and unstake
    pub const LOCK_DURATION: u64 = 31 * SECONDS_PER_DAY;

    /// Distinct pools required to settle a click
    pub const DEFAULT_QUORUM: usize = 2;

    /// Pools assigned to witness each publisher
    pub const DEFAULT_SUBSET_SIZE: usize = 10;

    /// Total native-token reward per settled click
    pub const REWARD_PER_CLICK: Amount = TOKEN;

    /// Lifetime cap on minted click rewards
    pub const DEFAULT_MINT_CAP: Amount = 100_000_000 * TOKEN;
}
