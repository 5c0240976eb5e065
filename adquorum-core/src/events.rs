//! Event surface for external observers

use crate::{AccountId, Amount, CampaignId, DedupKey, PoolId, Timestamp, TokenId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Observable state changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NetworkEvent {
    /// A validator pool was created
    PoolCreated {
        pool: PoolId,
        name: String,
        members: Vec<AccountId>,
    },

    /// A pool published a new discovery descriptor
    PoolMetadataUpdated { pool: PoolId },

    /// Stake added to a pool
    Staked {
        pool: PoolId,
        staker: AccountId,
        amount: Amount,
    },

    /// A staker started the unlock timelock
    UnlockRequested {
        pool: PoolId,
        staker: AccountId,
        amount: Amount,
        unlocks_at: Timestamp,
    },

    /// Stake withdrawn after the timelock
    Unstaked {
        pool: PoolId,
        staker: AccountId,
        amount: Amount,
    },

    /// A pool's stake was slashed
    SlashApplied {
        pool: PoolId,
        requested: Amount,
        removed: Amount,
    },

    /// A campaign was created
    CampaignCreated {
        campaign: CampaignId,
        owner: AccountId,
        token: TokenId,
    },

    /// A pool attested a click that has not reached quorum
    ClickAttested {
        campaign: CampaignId,
        key: DedupKey,
        pool: PoolId,
        attestations: usize,
    },

    /// A click reached quorum
    ClickSettled {
        campaign: CampaignId,
        publisher: AccountId,
        key: DedupKey,
        payout: Amount,
        pools: Vec<PoolId>,
    },

    /// A settled click was not paid
    PayoutSkipped {
        campaign: CampaignId,
        key: DedupKey,
        reason: String,
    },

    /// Native-token rewards were minted for a settled click
    RewardsDistributed {
        key: DedupKey,
        total: Amount,
        pools: Vec<PoolId>,
    },
}

/// Fan-out point for [`NetworkEvent`]s
#[derive(Debug, Default)]
pub struct EventBus {
    sender: std::sync::RwLock<Option<UnboundedSender<NetworkEvent>>>,
}

impl EventBus {
    /// Create a bus without a subscriber
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the channel events are forwarded to
    pub fn set_sender(&self, sender: UnboundedSender<NetworkEvent>) {
        if let Ok(mut slot) = self.sender.write() {
            *slot = Some(sender);
        }
    }

    /// Publish an event; a closed or missing channel drops it
    pub fn emit(&self, event: NetworkEvent) {
        tracing::trace!(?event, "network event");
        if let Ok(slot) = self.sender.read() {
            if let Some(sender) = slot.as_ref() {
                let _ = sender.send(event);
            }
        }
    }
}
