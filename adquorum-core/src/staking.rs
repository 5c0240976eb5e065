//! Per-pool, per-staker stake accounting
//!
//! Stake records move `Unstaked -> Staked -> UnlockRequested -> Unstaked`. Staked
//! tokens sit in a custody account on the native ledger; slashing moves the
//! removed amount to the configured slash sink. Every operation holds the pool's
//! lock across its ledger call, so stake, unstake and slash on one pool serialize
//! and a failed transfer leaves the pool untouched.

use crate::clock::Clock;
use crate::events::{EventBus, NetworkEvent};
use crate::ledger::FungibleAssetLedger;
use crate::pool::{PoolRegistry, UnlockRequest, ValidatorPool};
use crate::roles::AccessControl;
use crate::{AccountId, AdNetworkError, Amount, PoolId, Result};
use std::sync::Arc;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{info, warn};

/// Stake, unlock, unstake and slash operations over the pool registry
#[derive(Debug)]
pub struct StakingLedger {
    registry: Arc<PoolRegistry>,
    native: Arc<dyn FungibleAssetLedger>,
    custody: AccountId,
    slash_sink: RwLock<AccountId>,
    roles: Arc<AccessControl>,
    clock: Arc<dyn Clock>,
    lock_duration: u64,
    events: Arc<EventBus>,
}

impl StakingLedger {
    /// Create a staking ledger holding stake in `custody`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<PoolRegistry>,
        native: Arc<dyn FungibleAssetLedger>,
        custody: AccountId,
        slash_sink: AccountId,
        roles: Arc<AccessControl>,
        clock: Arc<dyn Clock>,
        lock_duration: u64,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            native,
            custody,
            slash_sink: RwLock::new(slash_sink),
            roles,
            clock,
            lock_duration,
            events,
        }
    }

    /// Account holding all staked tokens
    pub fn custody(&self) -> &AccountId {
        &self.custody
    }

    /// Seconds between an unlock request and the earliest unstake
    pub fn lock_duration(&self) -> u64 {
        self.lock_duration
    }

    /// Pull `amount` native tokens from `staker` into the pool.
    ///
    /// The staker must have approved the custody account beforehand. Staking while
    /// an unlock is pending is allowed and restarts that unlock's timer, so newly
    /// added stake always serves the full lock duration.
    pub async fn stake(&self, pool_id: PoolId, amount: Amount, staker: &AccountId) -> Result<()> {
        if amount == 0 {
            return Err(AdNetworkError::InvalidAmount("stake amount must be greater than 0".to_string()));
        }

        let handle = self.registry.handle(pool_id).await?;
        let mut pool = handle.lock().await;

        if pool.total_stake().checked_add(amount).is_none() {
            return Err(AdNetworkError::InvalidAmount("pool stake overflow".to_string()));
        }

        self.native
            .transfer_from(&self.custody, staker, &self.custody, amount)
            .await?;

        pool.add_stake(staker, amount)?;
        if pool.pending_unlock(staker).is_some() {
            let now = self.clock.now();
            pool.set_unlock(staker, self.unlock_request(now));
        }
        let total = pool.total_stake();
        drop(pool);

        info!("Staked {} into pool {} by {} (pool total {})", amount, pool_id, staker, total);
        self.events.emit(NetworkEvent::Staked {
            pool: pool_id,
            staker: staker.clone(),
            amount,
        });
        Ok(())
    }

    /// Start the unlock timelock for the staker's whole balance.
    ///
    /// Moves no funds. Re-requesting restarts the timer (latest request wins).
    pub async fn request_unlock(&self, pool_id: PoolId, staker: &AccountId) -> Result<UnlockRequest> {
        let handle = self.registry.handle(pool_id).await?;
        let mut pool = handle.lock().await;

        let balance = pool.stake_of(staker);
        if balance == 0 {
            return Err(AdNetworkError::NoStakeFound {
                pool: pool_id,
                staker: staker.to_string(),
            });
        }

        let request = self.unlock_request(self.clock.now());
        pool.set_unlock(staker, request);
        drop(pool);

        info!(
            "Unlock requested in pool {} by {} for {} (unlocks at {})",
            pool_id, staker, balance, request.unlocks_at
        );
        self.events.emit(NetworkEvent::UnlockRequested {
            pool: pool_id,
            staker: staker.clone(),
            amount: balance,
            unlocks_at: request.unlocks_at,
        });
        Ok(request)
    }

    /// Return the staker's current balance once the lock has elapsed
    pub async fn unstake(&self, pool_id: PoolId, staker: &AccountId) -> Result<Amount> {
        let handle = self.registry.handle(pool_id).await?;
        let mut pool = handle.lock().await;

        let balance = pool.stake_of(staker);
        if balance == 0 {
            return Err(AdNetworkError::NoStakeFound {
                pool: pool_id,
                staker: staker.to_string(),
            });
        }

        let request = pool
            .pending_unlock(staker)
            .ok_or_else(|| AdNetworkError::UnlockNotRequested {
                pool: pool_id,
                staker: staker.to_string(),
            })?;

        let now = self.clock.now();
        if now < request.unlocks_at {
            return Err(AdNetworkError::LockNotElapsed {
                unlocks_at: request.unlocks_at,
                now,
            });
        }

        self.native.transfer(&self.custody, staker, balance).await?;
        let released = pool.remove_staker(staker);
        drop(pool);

        info!("Unstaked {} from pool {} to {}", released, pool_id, staker);
        self.events.emit(NetworkEvent::Unstaked {
            pool: pool_id,
            staker: staker.clone(),
            amount: released,
        });
        Ok(released)
    }

    /// Reduce the pool and all of its stakers proportionally by `amount`.
    ///
    /// Returns the amount removed from the pool, which may exceed `amount` by the
    /// per-staker rounding residue and is capped at the pool total.
    pub async fn slash(&self, pool_id: PoolId, amount: Amount, caller: &AccountId) -> Result<Amount> {
        self.roles.require_slasher(caller).await?;
        if amount == 0 {
            return Err(AdNetworkError::InvalidAmount("slash amount must be greater than 0".to_string()));
        }

        let handle = self.registry.handle(pool_id).await?;
        let mut pool = handle.lock().await;

        let mut slashed = pool.clone();
        let removed = slashed.apply_slash(amount);
        if removed < amount {
            warn!(
                "Slash of {} on pool {} exceeds its stake; removing {}",
                amount, pool_id, removed
            );
        }

        if removed > 0 {
            let sink = self.slash_sink.read().await.clone();
            self.native.transfer(&self.custody, &sink, removed).await?;
        }
        *pool = slashed;
        drop(pool);

        info!("Slashed pool {} by {} (requested {})", pool_id, removed, amount);
        self.events.emit(NetworkEvent::SlashApplied {
            pool: pool_id,
            requested: amount,
            removed,
        });
        Ok(removed)
    }

    /// Redirect future slashed tokens (admin only)
    pub async fn set_slash_sink(&self, caller: &AccountId, sink: AccountId) -> Result<()> {
        self.roles.require_admin(caller)?;
        info!("Slash sink set to {}", sink);
        *self.slash_sink.write().await = sink;
        Ok(())
    }

    /// Current slash sink
    pub async fn slash_sink(&self) -> AccountId {
        self.slash_sink.read().await.clone()
    }

    /// A staker's current balance in a pool
    pub async fn stake_of(&self, pool_id: PoolId, staker: &AccountId) -> Result<Amount> {
        Ok(self.registry.pool(pool_id).await?.stake_of(staker))
    }

    /// A pool's total stake
    pub async fn pool_total(&self, pool_id: PoolId) -> Result<Amount> {
        Ok(self.registry.pool(pool_id).await?.total_stake())
    }

    /// A staker's pending unlock
    pub async fn pending_unlock(&self, pool_id: PoolId, staker: &AccountId) -> Result<Option<UnlockRequest>> {
        Ok(self.registry.pool(pool_id).await?.pending_unlock(staker))
    }

    /// Lock several pools in ascending id order for a reward credit
    pub(crate) async fn lock_pools(&self, pool_ids: &[PoolId]) -> Result<Vec<OwnedMutexGuard<ValidatorPool>>> {
        let mut ids = pool_ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let handle = self.registry.handle(id).await?;
            guards.push(handle.lock_owned().await);
        }
        Ok(guards)
    }

    fn unlock_request(&self, now: u64) -> UnlockRequest {
        UnlockRequest {
            requested_at: now,
            unlocks_at: now.saturating_add(self.lock_duration),
        }
    }
}
