//! Top-level ad network facade
//!
//! `AdNetwork` wires the pool registry, staking ledger, campaign budgets, reward
//! splitter and click consensus around one native-token ledger and exposes
//! their operations. All collaborators are injected through [`AdNetworkBuilder`].

use crate::affiliate::AffiliateRegistry;
use crate::assignment::ValidatorAssignment;
use crate::campaign::{Campaign, CampaignBudget, CampaignParams, PayoutOutcome};
use crate::clock::{Clock, SystemClock};
use crate::config::NetworkConfig;
use crate::consensus::{AttestationOutcome, ClickAttestation, ClickStatus, ClickValidationConsensus};
use crate::events::{EventBus, NetworkEvent};
use crate::ledger::FungibleAssetLedger;
use crate::pool::{PoolRegistry, PoolSnapshot, UnlockRequest, ValidatorPool};
use crate::rewards::{RewardSplit, RewardSplitter};
use crate::roles::AccessControl;
use crate::staking::StakingLedger;
use crate::{AccountId, AdNetworkError, Amount, CampaignId, DedupKey, PoolId, Result, TokenId};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// Builder for [`AdNetwork`]
#[derive(Debug)]
pub struct AdNetworkBuilder {
    config: NetworkConfig,
    native: Option<Arc<dyn FungibleAssetLedger>>,
    clock: Option<Arc<dyn Clock>>,
    admin: AccountId,
    platform: Option<AccountId>,
    escrow: AccountId,
    staking_custody: AccountId,
    reward_minter: AccountId,
    slash_sink: Option<AccountId>,
}

impl AdNetworkBuilder {
    fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            native: None,
            clock: None,
            admin: AccountId::new("admin"),
            platform: None,
            escrow: AccountId::new("adquorum-escrow"),
            staking_custody: AccountId::new("adquorum-staking"),
            reward_minter: AccountId::new("adquorum-rewards"),
            slash_sink: None,
        }
    }

    /// Native reward and staking token ledger (required)
    pub fn native_ledger(mut self, ledger: Arc<dyn FungibleAssetLedger>) -> Self {
        self.native = Some(ledger);
        self
    }

    /// Time source; defaults to the system clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Governance account
    pub fn admin(mut self, admin: AccountId) -> Self {
        self.admin = admin;
        self
    }

    /// Platform reward account; defaults to the admin
    pub fn platform(mut self, platform: AccountId) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Account campaign owners approve for payouts
    pub fn escrow_account(mut self, escrow: AccountId) -> Self {
        self.escrow = escrow;
        self
    }

    /// Account holding staked tokens; stakers approve it
    pub fn staking_custody(mut self, custody: AccountId) -> Self {
        self.staking_custody = custody;
        self
    }

    /// Account that must hold the native ledger's mint role
    pub fn reward_minter(mut self, minter: AccountId) -> Self {
        self.reward_minter = minter;
        self
    }

    /// Recipient of slashed stake; defaults to the admin
    pub fn slash_sink(mut self, sink: AccountId) -> Self {
        self.slash_sink = Some(sink);
        self
    }

    /// Validate the configuration and assemble the network
    pub fn build(self) -> Result<AdNetwork> {
        self.config.validate()?;
        let native = self
            .native
            .ok_or_else(|| AdNetworkError::Configuration("native ledger is required".to_string()))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let platform = self.platform.unwrap_or_else(|| self.admin.clone());
        let slash_sink = self.slash_sink.unwrap_or_else(|| self.admin.clone());

        let events = Arc::new(EventBus::new());
        let roles = Arc::new(AccessControl::new(self.admin.clone()));
        let affiliates = Arc::new(AffiliateRegistry::new());
        let registry = Arc::new(PoolRegistry::new(events.clone()));

        let staking = Arc::new(StakingLedger::new(
            registry.clone(),
            native.clone(),
            self.staking_custody.clone(),
            slash_sink,
            roles.clone(),
            clock.clone(),
            self.config.staking.lock_duration_secs,
            events.clone(),
        ));
        let campaigns = Arc::new(CampaignBudget::new(
            self.escrow,
            self.config.campaigns.clone(),
            roles.clone(),
            affiliates.clone(),
            clock.clone(),
            events.clone(),
        ));
        let rewards = Arc::new(RewardSplitter::new(
            native.clone(),
            self.reward_minter,
            self.staking_custody,
            roles.clone(),
            &self.config.rewards,
            events.clone(),
        )?);
        let consensus = ClickValidationConsensus::new(
            self.config.consensus.clone(),
            registry.clone(),
            staking.clone(),
            ValidatorAssignment::new(&self.config.assignment),
            campaigns.clone(),
            rewards.clone(),
            affiliates.clone(),
            platform.clone(),
            clock.clone(),
            events.clone(),
        );

        info!(
            "Ad network ready: quorum {}, subset {}, lock {}s",
            self.config.consensus.quorum, self.config.assignment.subset_size, self.config.staking.lock_duration_secs
        );

        Ok(AdNetwork {
            config: self.config,
            native,
            clock,
            platform,
            events,
            roles,
            affiliates,
            registry,
            staking,
            campaigns,
            rewards,
            consensus,
        })
    }
}

/// Decentralized ad-click validation network
#[derive(Debug)]
pub struct AdNetwork {
    config: NetworkConfig,
    native: Arc<dyn FungibleAssetLedger>,
    clock: Arc<dyn Clock>,
    platform: AccountId,
    events: Arc<EventBus>,
    roles: Arc<AccessControl>,
    affiliates: Arc<AffiliateRegistry>,
    registry: Arc<PoolRegistry>,
    staking: Arc<StakingLedger>,
    campaigns: Arc<CampaignBudget>,
    rewards: Arc<RewardSplitter>,
    consensus: ClickValidationConsensus,
}

impl AdNetwork {
    /// Start building a network from `config`
    pub fn builder(config: NetworkConfig) -> AdNetworkBuilder {
        AdNetworkBuilder::new(config)
    }

    /// Active configuration
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Native token ledger
    pub fn native_ledger(&self) -> &Arc<dyn FungibleAssetLedger> {
        &self.native
    }

    /// Governance account
    pub fn admin(&self) -> &AccountId {
        self.roles.admin()
    }

    /// Platform reward account
    pub fn platform(&self) -> &AccountId {
        &self.platform
    }

    /// Account stakers approve
    pub fn staking_custody(&self) -> &AccountId {
        self.staking.custody()
    }

    /// Account campaign owners approve
    pub fn escrow_account(&self) -> &AccountId {
        self.campaigns.escrow()
    }

    /// Forward every [`NetworkEvent`] to `sender`
    pub fn set_network_sender(&self, sender: UnboundedSender<NetworkEvent>) {
        self.events.set_sender(sender);
    }

    // Pools

    /// Create a validator pool with zero stake
    pub async fn create_pool(&self, name: impl Into<String>, members: Vec<AccountId>) -> PoolId {
        self.registry.create_pool(name, members, self.clock.now()).await
    }

    /// Publish a pool's discovery descriptor
    pub async fn set_pool_metadata(&self, pool: PoolId, metadata: &str, caller: &AccountId) -> Result<()> {
        self.registry.set_metadata(pool, metadata, caller).await
    }

    /// Copy of a pool
    pub async fn pool(&self, pool: PoolId) -> Result<ValidatorPool> {
        self.registry.pool(pool).await
    }

    /// Number of pools
    pub async fn pool_count(&self) -> usize {
        self.registry.pool_count().await
    }

    /// Pools assigned to witness `publisher`
    pub async fn assigned_pools(&self, publisher: &AccountId) -> Vec<PoolId> {
        self.consensus.assigned_pools(publisher).await
    }

    /// Descriptors of the pools assigned to `publisher`, in assignment order
    pub async fn assigned_pool_metadata(&self, publisher: &AccountId) -> Vec<PoolSnapshot> {
        let snapshot = self.registry.snapshot().await;
        self.consensus
            .assigned_pools(publisher)
            .await
            .into_iter()
            .filter_map(|id| snapshot.iter().find(|pool| pool.id == id).cloned())
            .collect()
    }

    // Staking

    /// Stake native tokens into a pool
    pub async fn stake(&self, pool: PoolId, amount: Amount, staker: &AccountId) -> Result<()> {
        self.staking.stake(pool, amount, staker).await
    }

    /// Start the unlock timelock
    pub async fn request_unlock(&self, pool: PoolId, staker: &AccountId) -> Result<UnlockRequest> {
        self.staking.request_unlock(pool, staker).await
    }

    /// Withdraw after the timelock
    pub async fn unstake(&self, pool: PoolId, staker: &AccountId) -> Result<Amount> {
        self.staking.unstake(pool, staker).await
    }

    /// Slash a pool proportionally
    pub async fn slash(&self, pool: PoolId, amount: Amount, caller: &AccountId) -> Result<Amount> {
        self.staking.slash(pool, amount, caller).await
    }

    /// A staker's balance
    pub async fn stake_of(&self, pool: PoolId, staker: &AccountId) -> Result<Amount> {
        self.staking.stake_of(pool, staker).await
    }

    /// A pool's total stake
    pub async fn pool_total(&self, pool: PoolId) -> Result<Amount> {
        self.staking.pool_total(pool).await
    }

    /// A staker's pending unlock
    pub async fn pending_unlock(&self, pool: PoolId, staker: &AccountId) -> Result<Option<UnlockRequest>> {
        self.staking.pending_unlock(pool, staker).await
    }

    // Roles

    /// Grant the slasher role (admin only)
    pub async fn grant_slasher(&self, caller: &AccountId, account: AccountId) -> Result<()> {
        self.roles.grant_slasher(caller, account).await
    }

    /// Revoke the slasher role (admin only)
    pub async fn revoke_slasher(&self, caller: &AccountId, account: &AccountId) -> Result<()> {
        self.roles.revoke_slasher(caller, account).await
    }

    /// Redirect slashed stake (admin only)
    pub async fn set_slash_sink(&self, caller: &AccountId, sink: AccountId) -> Result<()> {
        self.staking.set_slash_sink(caller, sink).await
    }

    // Campaigns

    /// Approve or withdraw a funding token (admin only)
    pub async fn approve_funding_token(
        &self,
        caller: &AccountId,
        token: TokenId,
        ledger: Arc<dyn FungibleAssetLedger>,
        price_per_click: Amount,
        approved: bool,
    ) -> Result<()> {
        self.campaigns
            .approve_funding_token(caller, token, ledger, price_per_click, approved)
            .await
    }

    /// Register a campaign owned by `owner`
    pub async fn create_campaign(&self, owner: &AccountId, params: CampaignParams) -> Result<CampaignId> {
        self.campaigns.create_campaign(owner, params).await
    }

    /// Raise a campaign's spend cap
    pub async fn top_up_budget(&self, campaign: CampaignId, caller: &AccountId, amount: Amount) -> Result<Amount> {
        self.campaigns.top_up_budget(campaign, caller, amount).await
    }

    /// Pause payouts
    pub async fn pause_campaign(&self, campaign: CampaignId, caller: &AccountId) -> Result<()> {
        self.campaigns.pause(campaign, caller).await
    }

    /// Resume payouts
    pub async fn resume_campaign(&self, campaign: CampaignId, caller: &AccountId) -> Result<()> {
        self.campaigns.resume(campaign, caller).await
    }

    /// Copy of a campaign
    pub async fn campaign(&self, campaign: CampaignId) -> Result<Campaign> {
        self.campaigns.campaign(campaign).await
    }

    /// Pay a publisher directly from a campaign
    pub async fn payout(&self, campaign: CampaignId, publisher: &AccountId, amount: Amount) -> Result<PayoutOutcome> {
        self.campaigns.payout(campaign, publisher, amount).await
    }

    /// Payouts held for `publisher` after a failed forward
    pub async fn pending_claims(&self, publisher: &AccountId) -> Vec<(TokenId, Amount)> {
        self.campaigns.pending_claims(publisher).await
    }

    /// Withdraw held payouts
    pub async fn claim_pending(&self, publisher: &AccountId) -> Vec<(TokenId, Amount)> {
        self.campaigns.claim_pending(publisher).await
    }

    /// Register an affiliate name
    pub async fn register_affiliate(&self, name: &str, account: AccountId) -> Result<()> {
        self.affiliates.register(name, account).await
    }

    // Clicks

    /// Submit a validator attestation
    pub async fn submit_attestation(&self, attestation: ClickAttestation) -> Result<AttestationOutcome> {
        self.consensus.submit_attestation(attestation).await
    }

    /// Dedup key of an attestation
    pub fn dedup_key(&self, attestation: &ClickAttestation) -> DedupKey {
        self.consensus.dedup_key(attestation)
    }

    /// State of a click
    pub async fn click_status(&self, key: &DedupKey) -> ClickStatus {
        self.consensus.click_status(key).await
    }

    // Rewards

    /// Replace the reward split (admin only, before the first distribution)
    pub async fn configure_rewards(&self, caller: &AccountId, split: RewardSplit) -> Result<()> {
        self.rewards.configure(caller, split).await
    }

    /// Current reward split
    pub async fn reward_split(&self) -> RewardSplit {
        self.rewards.split().await
    }

    /// Lifetime minted click rewards
    pub async fn total_minted(&self) -> Amount {
        self.rewards.total_minted().await
    }
}
