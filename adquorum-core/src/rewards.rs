//! Native-token reward splitting
//!
//! Each settled click mints a fixed reward split across seven beneficiaries. A
//! missing affiliate's slice goes to its principal, the validator-pool slice is
//! divided evenly among the pools that formed quorum and compounded into their
//! stakers' balances.

use crate::config::amount_str;
use crate::constants::FINNEY;
use crate::events::{EventBus, NetworkEvent};
use crate::ledger::FungibleAssetLedger;
use crate::math::mul_div;
use crate::pool::ValidatorPool;
use crate::roles::AccessControl;
use crate::{AccountId, AdNetworkError, Amount, DedupKey, PoolId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{info, warn};

/// Per-beneficiary reward proportions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSplit {
    /// Advertiser running the campaign
    #[serde(with = "amount_str")]
    pub campaign_owner: Amount,
    /// Affiliate that referred the advertiser
    #[serde(with = "amount_str")]
    pub campaign_affiliate: Amount,
    /// Publisher showing the ad
    #[serde(with = "amount_str")]
    pub publisher: Amount,
    /// Affiliate that referred the publisher
    #[serde(with = "amount_str")]
    pub publisher_affiliate: Amount,
    /// Platform operator
    #[serde(with = "amount_str")]
    pub platform: Amount,
    /// Affiliate of the platform front-end
    #[serde(with = "amount_str")]
    pub platform_affiliate: Amount,
    /// Pools that formed quorum
    #[serde(with = "amount_str")]
    pub validator_pools: Amount,
}

impl Default for RewardSplit {
    // Affiliates get 10% of their principal, validators 10% of the total
    fn default() -> Self {
        Self {
            campaign_owner: 630 * FINNEY,
            campaign_affiliate: 70 * FINNEY,
            publisher: 160 * FINNEY,
            publisher_affiliate: 20 * FINNEY,
            platform: 18 * FINNEY,
            platform_affiliate: 2 * FINNEY,
            validator_pools: 100 * FINNEY,
        }
    }
}

impl RewardSplit {
    fn parts(&self) -> [Amount; 7] {
        [
            self.campaign_owner,
            self.campaign_affiliate,
            self.publisher,
            self.publisher_affiliate,
            self.platform,
            self.platform_affiliate,
            self.validator_pools,
        ]
    }

    fn checked_total(&self) -> Option<Amount> {
        self.parts().iter().try_fold(0u128, |acc, part| acc.checked_add(*part))
    }

    /// Sum of all proportions (saturating)
    pub fn total(&self) -> Amount {
        self.checked_total().unwrap_or(Amount::MAX)
    }

    /// Proportions must sum exactly to the reward per click
    pub fn validate(&self, reward_per_click: Amount) -> Result<()> {
        match self.checked_total() {
            None => Err(AdNetworkError::InvalidRewardSplit("proportions overflow".to_string())),
            Some(0) => Err(AdNetworkError::InvalidRewardSplit("proportions sum to zero".to_string())),
            Some(total) if total != reward_per_click => Err(AdNetworkError::InvalidRewardSplit(format!(
                "proportions sum to {}, expected {}",
                total, reward_per_click
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Recipients of one click's reward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardParties {
    /// Advertiser
    pub campaign_owner: AccountId,
    /// Advertiser's affiliate
    pub campaign_affiliate: Option<AccountId>,
    /// Publisher
    pub publisher: AccountId,
    /// Publisher's affiliate
    pub publisher_affiliate: Option<AccountId>,
    /// Platform operator
    pub platform: AccountId,
    /// Platform front-end affiliate
    pub platform_affiliate: Option<AccountId>,
    /// Distinct pools that formed quorum
    pub validator_pools: Vec<PoolId>,
}

/// Concrete amounts for one distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPlan {
    /// Account payouts, merged per account
    pub accounts: BTreeMap<AccountId, Amount>,
    /// Pool payouts, compounded into stake
    pub pools: BTreeMap<PoolId, Amount>,
    /// Everything minted
    pub total: Amount,
}

impl RewardPlan {
    /// Split `gross` by `split` among `parties`.
    ///
    /// Shares are floor(gross * part / total); the flooring remainder goes to the
    /// platform so the plan always sums to `gross`.
    pub fn compute(split: &RewardSplit, gross: Amount, parties: &RewardParties) -> Result<Self> {
        let total = split.checked_total().filter(|t| *t > 0).ok_or_else(|| {
            AdNetworkError::InvalidRewardSplit("proportions must sum to a positive amount".to_string())
        })?;

        let share = |part: Amount| mul_div(gross, part, total).unwrap_or(0);
        let mut owner = share(split.campaign_owner);
        let campaign_affiliate = share(split.campaign_affiliate);
        let mut publisher = share(split.publisher);
        let publisher_affiliate = share(split.publisher_affiliate);
        let mut platform = share(split.platform);
        let platform_affiliate = share(split.platform_affiliate);
        let mut pools_share = share(split.validator_pools);

        let assigned = owner + campaign_affiliate + publisher + publisher_affiliate + platform
            + platform_affiliate + pools_share;
        platform += gross - assigned;

        let mut plan = RewardPlan {
            accounts: BTreeMap::new(),
            pools: BTreeMap::new(),
            total: gross,
        };

        match &parties.campaign_affiliate {
            Some(affiliate) => plan.credit_account(affiliate, campaign_affiliate),
            None => owner += campaign_affiliate,
        }
        match &parties.publisher_affiliate {
            Some(affiliate) => plan.credit_account(affiliate, publisher_affiliate),
            None => publisher += publisher_affiliate,
        }
        match &parties.platform_affiliate {
            Some(affiliate) => plan.credit_account(affiliate, platform_affiliate),
            None => platform += platform_affiliate,
        }

        let mut pool_ids = parties.validator_pools.clone();
        pool_ids.sort();
        pool_ids.dedup();
        if pool_ids.is_empty() {
            platform += pools_share;
        } else {
            let each = pools_share / pool_ids.len() as Amount;
            for id in &pool_ids {
                plan.pools.insert(*id, each);
                pools_share -= each;
            }
            // Remainder to the lowest pool id
            if let Some(first) = plan.pools.values_mut().next() {
                *first += pools_share;
            }
        }

        plan.credit_account(&parties.campaign_owner, owner);
        plan.credit_account(&parties.publisher, publisher);
        plan.credit_account(&parties.platform, platform);
        Ok(plan)
    }

    fn credit_account(&mut self, account: &AccountId, amount: Amount) {
        if amount > 0 {
            *self.accounts.entry(account.clone()).or_insert(0) += amount;
        }
    }

    /// Move a pool's slice to `beneficiary`
    pub fn forfeit_pool(&mut self, pool: &PoolId, beneficiary: &AccountId) {
        if let Some(amount) = self.pools.remove(pool) {
            self.credit_account(beneficiary, amount);
        }
    }

    /// Sum of all pool slices
    pub fn pools_total(&self) -> Amount {
        self.pools.values().sum()
    }

    /// Sum of all account and pool amounts
    pub fn sum(&self) -> Amount {
        self.accounts.values().sum::<Amount>() + self.pools_total()
    }
}

#[derive(Debug)]
struct SplitterState {
    split: RewardSplit,
    reward_per_click: Amount,
    mint_cap: Amount,
    minted: Amount,
    distributions: u64,
}

/// Mints click rewards and compounds the pool share into stake
#[derive(Debug)]
pub struct RewardSplitter {
    native: Arc<dyn FungibleAssetLedger>,
    minter: AccountId,
    staking_custody: AccountId,
    roles: Arc<AccessControl>,
    state: RwLock<SplitterState>,
    events: Arc<EventBus>,
}

impl RewardSplitter {
    /// Create a splitter; `minter` must hold the native ledger's mint role
    pub fn new(
        native: Arc<dyn FungibleAssetLedger>,
        minter: AccountId,
        staking_custody: AccountId,
        roles: Arc<AccessControl>,
        config: &crate::config::RewardConfig,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        config.split.validate(config.reward_per_click)?;
        Ok(Self {
            native,
            minter,
            staking_custody,
            roles,
            state: RwLock::new(SplitterState {
                split: config.split,
                reward_per_click: config.reward_per_click,
                mint_cap: config.mint_cap,
                minted: 0,
                distributions: 0,
            }),
            events,
        })
    }

    /// Current proportions
    pub async fn split(&self) -> RewardSplit {
        self.state.read().await.split
    }

    /// Native tokens minted per settled click
    pub async fn reward_per_click(&self) -> Amount {
        self.state.read().await.reward_per_click
    }

    /// Lifetime minted rewards
    pub async fn total_minted(&self) -> Amount {
        self.state.read().await.minted
    }

    /// Replace the split (admin only, before the first distribution)
    pub async fn configure(&self, caller: &AccountId, split: RewardSplit) -> Result<()> {
        self.roles.require_admin(caller)?;
        let mut state = self.state.write().await;
        if state.distributions > 0 {
            return Err(AdNetworkError::InvalidRewardSplit(
                "split is fixed once rewards have been distributed".to_string(),
            ));
        }
        let reward_per_click = split.total();
        split.validate(reward_per_click)?;
        state.split = split;
        state.reward_per_click = reward_per_click;
        info!("Reward split configured: {} per click", reward_per_click);
        Ok(())
    }

    /// Mint the reward for one click and compound the pool share.
    ///
    /// `pools` are the locked quorum pools; any without stakers forfeit their slice
    /// to the platform. Returns `None` when the mint cap would be exceeded. A mint
    /// failure aborts before any pool is credited.
    pub async fn distribute(
        &self,
        key: DedupKey,
        parties: &RewardParties,
        pools: &mut [OwnedMutexGuard<ValidatorPool>],
    ) -> Result<Option<RewardPlan>> {
        let mut state = self.state.write().await;
        let gross = state.reward_per_click;

        let within_cap = state
            .minted
            .checked_add(gross)
            .map_or(false, |after| after <= state.mint_cap);
        if !within_cap {
            warn!(
                "Reward mint cap reached ({} of {}); click {} settles without rewards",
                state.minted, state.mint_cap, key
            );
            return Ok(None);
        }

        let mut plan = RewardPlan::compute(&state.split, gross, parties)?;
        for pool in pools.iter() {
            if pool.total_stake() == 0 {
                plan.forfeit_pool(&pool.id, &parties.platform);
            }
        }

        let mut recipients: Vec<(AccountId, Amount)> =
            plan.accounts.iter().map(|(a, v)| (a.clone(), *v)).collect();
        let pools_total = plan.pools_total();
        if pools_total > 0 {
            recipients.push((self.staking_custody.clone(), pools_total));
        }

        self.native.mint_batch(&self.minter, &recipients).await?;

        for pool in pools.iter_mut() {
            if let Some(amount) = plan.pools.get(&pool.id) {
                pool.credit_reward(*amount);
            }
        }

        state.minted += gross;
        state.distributions += 1;
        drop(state);

        info!("Distributed {} {} for click {}", gross, self.native.symbol(), key);
        self.events.emit(NetworkEvent::RewardsDistributed {
            key,
            total: gross,
            pools: plan.pools.keys().copied().collect(),
        });
        Ok(Some(plan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TOKEN;
    use proptest::prelude::*;

    fn acct(name: &str) -> AccountId {
        AccountId::new(name)
    }

    fn parties(pools: Vec<PoolId>) -> RewardParties {
        RewardParties {
            campaign_owner: acct("advertiser"),
            campaign_affiliate: None,
            publisher: acct("publisher"),
            publisher_affiliate: Some(acct("publisher-affiliate")),
            platform: acct("platform"),
            platform_affiliate: None,
            validator_pools: pools,
        }
    }

    #[test]
    fn test_reference_split() {
        let pools = vec![PoolId::generate(), PoolId::generate()];
        let plan = RewardPlan::compute(&RewardSplit::default(), TOKEN, &parties(pools.clone())).unwrap();

        assert_eq!(plan.accounts[&acct("advertiser")], 700 * FINNEY);
        assert_eq!(plan.accounts[&acct("publisher")], 160 * FINNEY);
        assert_eq!(plan.accounts[&acct("publisher-affiliate")], 20 * FINNEY);
        assert_eq!(plan.accounts[&acct("platform")], 20 * FINNEY);
        for pool in &pools {
            assert_eq!(plan.pools[pool], 50 * FINNEY);
        }
        assert_eq!(plan.sum(), TOKEN);
    }

    #[test]
    fn test_no_pools_redirects_to_platform() {
        let plan = RewardPlan::compute(&RewardSplit::default(), TOKEN, &parties(vec![])).unwrap();
        assert!(plan.pools.is_empty());
        assert_eq!(plan.accounts[&acct("platform")], 120 * FINNEY);
        assert_eq!(plan.sum(), TOKEN);
    }

    #[test]
    fn test_forfeit_pool() {
        let pool = PoolId::generate();
        let mut plan = RewardPlan::compute(&RewardSplit::default(), TOKEN, &parties(vec![pool])).unwrap();
        plan.forfeit_pool(&pool, &acct("platform"));
        assert_eq!(plan.accounts[&acct("platform")], 120 * FINNEY);
        assert_eq!(plan.sum(), TOKEN);
    }

    #[test]
    fn test_split_validation() {
        let split = RewardSplit::default();
        split.validate(TOKEN).unwrap();
        assert!(split.validate(TOKEN + 1).is_err());

        let zero = RewardSplit {
            campaign_owner: 0,
            campaign_affiliate: 0,
            publisher: 0,
            publisher_affiliate: 0,
            platform: 0,
            platform_affiliate: 0,
            validator_pools: 0,
        };
        assert!(zero.validate(0).is_err());
    }

    #[tokio::test]
    async fn test_configure_is_admin_only_and_frozen_after_use() {
        let native = Arc::new(crate::ledger::InMemoryLedger::new("EAD"));
        native.grant_minter(acct("rewards")).await;
        let admin = acct("admin");
        let splitter = RewardSplitter::new(
            native.clone(),
            acct("rewards"),
            acct("custody"),
            Arc::new(AccessControl::new(admin.clone())),
            &crate::config::RewardConfig::default(),
            Arc::new(EventBus::new()),
        )
        .unwrap();

        let mut split = RewardSplit::default();
        split.platform += FINNEY;
        assert!(splitter.configure(&acct("x"), split).await.is_err());
        splitter.configure(&admin, split).await.unwrap();
        assert_eq!(splitter.reward_per_click().await, TOKEN + FINNEY);

        let plan = splitter
            .distribute(DedupKey::from_bytes([1; 32]), &parties(vec![]), &mut [])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(plan.total, TOKEN + FINNEY);
        assert_eq!(native.total_supply().await, TOKEN + FINNEY);
        assert!(splitter.configure(&admin, RewardSplit::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_mint_cap_skips_distribution() {
        let native = Arc::new(crate::ledger::InMemoryLedger::new("EAD"));
        native.grant_minter(acct("rewards")).await;
        let config = crate::config::RewardConfig {
            mint_cap: TOKEN,
            ..Default::default()
        };
        let splitter = RewardSplitter::new(
            native.clone(),
            acct("rewards"),
            acct("custody"),
            Arc::new(AccessControl::new(acct("admin"))),
            &config,
            Arc::new(EventBus::new()),
        )
        .unwrap();

        let key = DedupKey::from_bytes([2; 32]);
        assert!(splitter.distribute(key, &parties(vec![]), &mut []).await.unwrap().is_some());
        assert!(splitter.distribute(key, &parties(vec![]), &mut []).await.unwrap().is_none());
        assert_eq!(splitter.total_minted().await, TOKEN);
    }

    proptest! {
        #[test]
        fn prop_plan_sums_to_gross(
            parts in prop::array::uniform7(0u128..1_000_000_000_000_000_000u128),
            gross in 0u128..1_000_000_000_000_000_000_000u128,
            pool_count in 0usize..5,
            with_affiliates in any::<bool>(),
        ) {
            let split = RewardSplit {
                campaign_owner: parts[0],
                campaign_affiliate: parts[1],
                publisher: parts[2],
                publisher_affiliate: parts[3],
                platform: parts[4],
                platform_affiliate: parts[5],
                validator_pools: parts[6] + 1,
            };
            let mut parties = parties((0..pool_count).map(|_| PoolId::generate()).collect());
            if with_affiliates {
                parties.campaign_affiliate = Some(acct("ca"));
                parties.platform_affiliate = Some(acct("pa"));
            }

            let plan = RewardPlan::compute(&split, gross, &parties).unwrap();
            prop_assert_eq!(plan.sum(), gross);
            prop_assert_eq!(plan.total, gross);
        }

        #[test]
        fn prop_exact_split_when_gross_equals_total(
            parts in prop::array::uniform7(1u128..1_000_000_000_000_000_000u128),
        ) {
            let split = RewardSplit {
                campaign_owner: parts[0],
                campaign_affiliate: parts[1],
                publisher: parts[2],
                publisher_affiliate: parts[3],
                platform: parts[4],
                platform_affiliate: parts[5],
                validator_pools: parts[6],
            };
            let mut parties = parties(vec![PoolId::generate()]);
            parties.campaign_affiliate = Some(acct("ca"));
            parties.platform_affiliate = Some(acct("pa"));

            let plan = RewardPlan::compute(&split, split.total(), &parties).unwrap();
            prop_assert_eq!(plan.accounts[&acct("advertiser")], parts[0]);
            prop_assert_eq!(plan.accounts[&acct("ca")], parts[1]);
            prop_assert_eq!(plan.accounts[&acct("publisher")], parts[2]);
            prop_assert_eq!(plan.accounts[&acct("publisher-affiliate")], parts[3]);
            prop_assert_eq!(plan.accounts[&acct("platform")], parts[4]);
            prop_assert_eq!(plan.accounts[&acct("pa")], parts[5]);
            prop_assert_eq!(plan.pools_total(), parts[6]);
        }
    }
}
