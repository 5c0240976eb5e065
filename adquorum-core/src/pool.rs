//! Validator pool registry
//!
//! A pool is a collective staking entity representing one validator. Members are
//! the controller accounts allowed to attest clicks and publish the pool's
//! discovery descriptor; stakers delegate native tokens to it. Pools are never
//! destroyed and may sit at zero stake.

use crate::events::{EventBus, NetworkEvent};
use crate::math::mul_div;
use crate::{AccountId, AdNetworkError, Amount, PoolId, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Pending withdrawal of a staker's balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRequest {
    /// When the unlock was requested
    pub requested_at: Timestamp,
    /// Earliest time `unstake` succeeds
    pub unlocks_at: Timestamp,
}

/// A validator pool and its stake ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorPool {
    /// Pool identity
    pub id: PoolId,

    /// Display name (not unique)
    pub name: String,

    /// Controller accounts allowed to attest and publish metadata
    pub members: BTreeSet<AccountId>,

    /// Sum of all staker balances
    total_stake: Amount,

    /// Staker balances
    stakes: BTreeMap<AccountId, Amount>,

    /// Pending unlock requests
    unlocks: BTreeMap<AccountId, UnlockRequest>,

    /// Published discovery descriptor (JSON object)
    pub metadata: Option<String>,

    /// Creation time
    pub created_at: Timestamp,
}

impl ValidatorPool {
    fn new(name: String, members: BTreeSet<AccountId>, created_at: Timestamp) -> Self {
        Self {
            id: PoolId::generate(),
            name,
            members,
            total_stake: 0,
            stakes: BTreeMap::new(),
            unlocks: BTreeMap::new(),
            metadata: None,
            created_at,
        }
    }

    /// Whether `account` controls this pool
    pub fn is_member(&self, account: &AccountId) -> bool {
        self.members.contains(account)
    }

    /// Total staked native tokens
    pub fn total_stake(&self) -> Amount {
        self.total_stake
    }

    /// A staker's current balance
    pub fn stake_of(&self, staker: &AccountId) -> Amount {
        self.stakes.get(staker).copied().unwrap_or(0)
    }

    /// Every staker with a non-zero balance
    pub fn stakers(&self) -> impl Iterator<Item = (&AccountId, &Amount)> {
        self.stakes.iter()
    }

    /// A staker's pending unlock, if any
    pub fn pending_unlock(&self, staker: &AccountId) -> Option<UnlockRequest> {
        self.unlocks.get(staker).copied()
    }

    /// Sum of balances matches the recorded total
    pub fn is_consistent(&self) -> bool {
        self.stakes
            .values()
            .try_fold(0u128, |acc, v| acc.checked_add(*v))
            == Some(self.total_stake)
    }

    pub(crate) fn add_stake(&mut self, staker: &AccountId, amount: Amount) -> Result<()> {
        let new_total = self
            .total_stake
            .checked_add(amount)
            .ok_or_else(|| AdNetworkError::InvalidAmount("pool stake overflow".to_string()))?;
        let balance = self.stake_of(staker);
        self.stakes.insert(staker.clone(), balance + amount);
        self.total_stake = new_total;
        Ok(())
    }

    pub(crate) fn set_unlock(&mut self, staker: &AccountId, request: UnlockRequest) {
        self.unlocks.insert(staker.clone(), request);
    }

    /// Remove a staker entirely, returning the released balance
    pub(crate) fn remove_staker(&mut self, staker: &AccountId) -> Amount {
        self.unlocks.remove(staker);
        let balance = self.stakes.remove(staker).unwrap_or(0);
        self.total_stake -= balance;
        balance
    }

    /// Reduce every staker by `amount / total`, rounding each balance down.
    ///
    /// Returns the amount actually removed, which is at least the requested
    /// amount (capped at the pool total) because of per-staker flooring.
    pub(crate) fn apply_slash(&mut self, amount: Amount) -> Amount {
        let before = self.total_stake;
        let amount = amount.min(before);
        if amount == 0 {
            return 0;
        }

        let remaining = before - amount;
        let mut new_total: Amount = 0;
        for balance in self.stakes.values_mut() {
            // balance <= before and remaining <= before, so the quotient fits
            *balance = mul_div(*balance, remaining, before).unwrap_or(0);
            new_total += *balance;
        }
        self.stakes.retain(|_, balance| *balance > 0);
        let stakes = &self.stakes;
        self.unlocks.retain(|staker, _| stakes.contains_key(staker));
        self.total_stake = new_total;
        before - new_total
    }

    /// Compound a reward into the stakers' balances pro rata.
    ///
    /// The flooring remainder goes to the largest staker (first by account order
    /// on ties) so the pool total grows by exactly `amount`. Returns false and
    /// changes nothing when the pool has no stakers.
    pub(crate) fn credit_reward(&mut self, amount: Amount) -> bool {
        if self.total_stake == 0 || self.stakes.is_empty() {
            return false;
        }
        if amount == 0 {
            return true;
        }

        let before = self.total_stake;
        let mut distributed: Amount = 0;
        let mut largest: Option<(AccountId, Amount)> = None;
        for (staker, balance) in self.stakes.iter_mut() {
            let share = mul_div(*balance, amount, before).unwrap_or(0);
            if largest.as_ref().map_or(true, |(_, top)| *balance > *top) {
                largest = Some((staker.clone(), *balance));
            }
            *balance += share;
            distributed += share;
        }

        if let Some((staker, _)) = largest {
            if let Some(balance) = self.stakes.get_mut(&staker) {
                *balance += amount - distributed;
            }
        }
        self.total_stake = before + amount;
        true
    }
}

/// Read-only view of a pool used for validator assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Pool identity
    pub id: PoolId,
    /// Total stake at snapshot time
    pub total_stake: Amount,
    /// Published descriptor
    pub metadata: Option<String>,
}

/// Creates and tracks validator pools
#[derive(Debug)]
pub struct PoolRegistry {
    pools: RwLock<BTreeMap<PoolId, Arc<Mutex<ValidatorPool>>>>,
    events: Arc<EventBus>,
}

impl PoolRegistry {
    /// Create an empty registry
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            pools: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Allocate a new pool with zero stake
    pub async fn create_pool(
        &self,
        name: impl Into<String>,
        initial_members: Vec<AccountId>,
        now: Timestamp,
    ) -> PoolId {
        let name = name.into();
        let members: BTreeSet<AccountId> = initial_members.into_iter().collect();
        let pool = ValidatorPool::new(name.clone(), members.clone(), now);
        let id = pool.id;

        self.pools.write().await.insert(id, Arc::new(Mutex::new(pool)));

        info!("Validator pool created: {} ({}) with {} members", name, id, members.len());
        self.events.emit(NetworkEvent::PoolCreated {
            pool: id,
            name,
            members: members.into_iter().collect(),
        });
        id
    }

    /// Overwrite the pool's discovery descriptor; caller must be a member
    pub async fn set_metadata(&self, pool_id: PoolId, metadata: &str, caller: &AccountId) -> Result<()> {
        let value: serde_json::Value = serde_json::from_str(metadata)
            .map_err(|e| AdNetworkError::InvalidMetadata(e.to_string()))?;
        if !value.is_object() {
            return Err(AdNetworkError::InvalidMetadata(
                "descriptor must be a JSON object".to_string(),
            ));
        }

        let handle = self.handle(pool_id).await?;
        let mut pool = handle.lock().await;
        if !pool.is_member(caller) {
            return Err(AdNetworkError::UnauthorizedValidator {
                pool: pool_id,
                validator: caller.to_string(),
            });
        }
        pool.metadata = Some(metadata.to_string());
        drop(pool);

        info!("Metadata updated for pool {}", pool_id);
        self.events.emit(NetworkEvent::PoolMetadataUpdated { pool: pool_id });
        Ok(())
    }

    /// Shared handle to a pool's state
    pub(crate) async fn handle(&self, pool_id: PoolId) -> Result<Arc<Mutex<ValidatorPool>>> {
        self.pools
            .read()
            .await
            .get(&pool_id)
            .cloned()
            .ok_or(AdNetworkError::PoolNotFound(pool_id))
    }

    /// Copy of a pool's current state
    pub async fn pool(&self, pool_id: PoolId) -> Result<ValidatorPool> {
        let handle = self.handle(pool_id).await?;
        let pool = handle.lock().await;
        Ok(pool.clone())
    }

    /// Whether `account` is a member of the pool
    pub async fn is_member(&self, pool_id: PoolId, account: &AccountId) -> Result<bool> {
        let handle = self.handle(pool_id).await?;
        let pool = handle.lock().await;
        Ok(pool.is_member(account))
    }

    /// Number of pools ever created
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Current stake and metadata of every pool, in id order
    pub async fn snapshot(&self) -> Vec<PoolSnapshot> {
        let handles: Vec<_> = self.pools.read().await.values().cloned().collect();
        let mut snapshot = Vec::with_capacity(handles.len());
        for handle in handles {
            let pool = handle.lock().await;
            snapshot.push(PoolSnapshot {
                id: pool.id,
                total_stake: pool.total_stake,
                metadata: pool.metadata.clone(),
            });
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn acct(name: &str) -> AccountId {
        AccountId::new(name)
    }

    fn pool_with(stakes: &[(&str, Amount)]) -> ValidatorPool {
        let mut pool = ValidatorPool::new("test".to_string(), BTreeSet::new(), 0);
        for (staker, amount) in stakes {
            pool.add_stake(&acct(staker), *amount).unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn test_create_pool_and_metadata() {
        let registry = PoolRegistry::new(Arc::new(EventBus::new()));
        let pool_id = registry
            .create_pool("Test Pool 1", vec![acct("validator1")], 0)
            .await;

        let pool = registry.pool(pool_id).await.unwrap();
        assert_eq!(pool.total_stake(), 0);
        assert!(pool.is_member(&acct("validator1")));

        let descriptor = r#"{"endpoint":"endpoint","gunPublicKey":"","address":"1"}"#;
        let err = registry
            .set_metadata(pool_id, descriptor, &acct("validator2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AdNetworkError::UnauthorizedValidator { .. }));

        registry
            .set_metadata(pool_id, descriptor, &acct("validator1"))
            .await
            .unwrap();
        assert_eq!(registry.pool(pool_id).await.unwrap().metadata.as_deref(), Some(descriptor));
    }

    #[tokio::test]
    async fn test_metadata_must_be_json_object() {
        let registry = PoolRegistry::new(Arc::new(EventBus::new()));
        let pool_id = registry.create_pool("p", vec![acct("v")], 0).await;

        for bad in ["not json", "[1,2]", "\"text\""] {
            let err = registry.set_metadata(pool_id, bad, &acct("v")).await.unwrap_err();
            assert!(matches!(err, AdNetworkError::InvalidMetadata(_)));
        }
    }

    #[tokio::test]
    async fn test_pool_names_need_not_be_unique() {
        let registry = PoolRegistry::new(Arc::new(EventBus::new()));
        let a = registry.create_pool("same", vec![], 0).await;
        let b = registry.create_pool("same", vec![], 0).await;
        assert_ne!(a, b);
        assert_eq!(registry.pool_count().await, 2);
    }

    #[test]
    fn test_slash_twenty_percent() {
        let mut pool = pool_with(&[("a", 600), ("b", 400)]);
        let removed = pool.apply_slash(200);

        assert_eq!(removed, 200);
        assert_eq!(pool.stake_of(&acct("a")), 480);
        assert_eq!(pool.stake_of(&acct("b")), 320);
        assert_eq!(pool.total_stake(), 800);
        assert!(pool.is_consistent());
    }

    #[test]
    fn test_slash_rounding_only_removes_more() {
        let mut pool = pool_with(&[("a", 1), ("b", 1), ("c", 1)]);
        let removed = pool.apply_slash(1);

        assert!(removed >= 1);
        assert!(pool.is_consistent());
        assert!(pool.total_stake() <= 2);
    }

    #[test]
    fn test_slash_is_capped_at_total() {
        let mut pool = pool_with(&[("a", 100)]);
        assert_eq!(pool.apply_slash(1_000), 100);
        assert_eq!(pool.total_stake(), 0);
        assert_eq!(pool.stakers().count(), 0);
    }

    #[test]
    fn test_credit_reward_keeps_total_exact() {
        let mut pool = pool_with(&[("a", 1), ("b", 1), ("c", 1)]);
        assert!(pool.credit_reward(100));
        assert_eq!(pool.total_stake(), 103);
        assert!(pool.is_consistent());
        assert_eq!(pool.stake_of(&acct("a")), 35);

        let mut empty = pool_with(&[]);
        assert!(!empty.credit_reward(100));
        assert_eq!(empty.total_stake(), 0);
    }

    #[derive(Debug, Clone)]
    enum PoolOp {
        Stake(usize, Amount),
        Remove(usize),
        Slash(Amount),
        Credit(Amount),
    }

    fn pool_op() -> impl Strategy<Value = PoolOp> {
        prop_oneof![
            (0usize..4, 1u128..1_000_000_000_000_000_000_000u128).prop_map(|(i, a)| PoolOp::Stake(i, a)),
            (0usize..4).prop_map(PoolOp::Remove),
            (0u128..2_000_000_000_000_000_000_000u128).prop_map(PoolOp::Slash),
            (0u128..1_000_000_000_000_000_000u128).prop_map(PoolOp::Credit),
        ]
    }

    proptest! {
        #[test]
        fn prop_any_sequence_keeps_total_equal_to_balances(ops in prop::collection::vec(pool_op(), 1..40)) {
            let mut pool = ValidatorPool::new("p".to_string(), BTreeSet::new(), 0);
            for op in ops {
                match op {
                    PoolOp::Stake(i, amount) => pool.add_stake(&acct(&format!("s{}", i)), amount).unwrap(),
                    PoolOp::Remove(i) => {
                        let before = pool.total_stake();
                        let returned = pool.remove_staker(&acct(&format!("s{}", i)));
                        prop_assert_eq!(pool.total_stake(), before - returned);
                    }
                    PoolOp::Slash(amount) => {
                        let before = pool.total_stake();
                        let removed = pool.apply_slash(amount);
                        prop_assert!(removed <= before);
                    }
                    PoolOp::Credit(reward) => {
                        let before = pool.total_stake();
                        if pool.credit_reward(reward) {
                            prop_assert_eq!(pool.total_stake(), before + reward);
                        } else {
                            prop_assert_eq!(pool.total_stake(), before);
                        }
                    }
                }
                prop_assert!(pool.is_consistent());
            }
        }

        #[test]
        fn prop_slash_preserves_invariant_and_order(
            stakes in prop::collection::vec(1u128..1_000_000_000_000_000_000_000u128, 1..8),
            fraction_bps in 0u128..=10_000,
        ) {
            let names: Vec<String> = (0..stakes.len()).map(|i| format!("s{}", i)).collect();
            let mut pool = ValidatorPool::new("p".to_string(), BTreeSet::new(), 0);
            for (name, amount) in names.iter().zip(&stakes) {
                pool.add_stake(&acct(name), *amount).unwrap();
            }

            let before = pool.total_stake();
            let amount = before * fraction_bps / 10_000;
            let removed = pool.apply_slash(amount);

            prop_assert!(pool.is_consistent());
            prop_assert!(removed >= amount);
            prop_assert!(pool.total_stake() <= before - amount);
            // Rounding loses at most one unit per staker
            prop_assert!(removed - amount <= stakes.len() as u128);

            for (i, a) in stakes.iter().enumerate() {
                for (j, b) in stakes.iter().enumerate() {
                    if a <= b {
                        prop_assert!(pool.stake_of(&acct(&names[i])) <= pool.stake_of(&acct(&names[j])));
                    }
                }
            }
        }

        #[test]
        fn prop_credit_reward_is_exact(
            stakes in prop::collection::vec(1u128..1_000_000_000_000_000_000u128, 1..8),
            reward in 0u128..1_000_000_000_000_000_000u128,
        ) {
            let mut pool = ValidatorPool::new("p".to_string(), BTreeSet::new(), 0);
            for (i, amount) in stakes.iter().enumerate() {
                pool.add_stake(&acct(&format!("s{}", i)), *amount).unwrap();
            }
            let before = pool.total_stake();

            prop_assert!(pool.credit_reward(reward));
            prop_assert_eq!(pool.total_stake(), before + reward);
            prop_assert!(pool.is_consistent());
        }
    }
}
