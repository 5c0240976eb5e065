//! Fungible asset ledger interface
//!
//! The native reward token and every funding token are external ledgers. The core
//! only needs balance, transfer, allowance and (for the native token) mint
//! semantics, so each asset is consumed through [`FungibleAssetLedger`].
//! [`InMemoryLedger`] backs simulations and tests.

use crate::{AccountId, Amount, LedgerError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Transfer/approve/balance primitive for a single asset
#[async_trait]
pub trait FungibleAssetLedger: Send + Sync + std::fmt::Debug {
    /// Asset symbol, for logs
    fn symbol(&self) -> &str;

    /// Balance held by an account
    async fn balance_of(&self, account: &AccountId) -> Amount;

    /// Amount `spender` may still pull from `owner`
    async fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount;

    /// Move funds out of `from`
    async fn transfer(&self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<(), LedgerError>;

    /// Set the amount `spender` may pull from `owner`
    async fn approve(&self, owner: &AccountId, spender: &AccountId, amount: Amount) -> Result<(), LedgerError>;

    /// Pull funds from `owner` to `to` against the allowance granted to `spender`
    async fn transfer_from(
        &self,
        spender: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Create new units for every recipient, all or nothing
    async fn mint_batch(&self, minter: &AccountId, recipients: &[(AccountId, Amount)]) -> Result<(), LedgerError>;

    /// Create new units for one recipient
    async fn mint(&self, minter: &AccountId, to: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        self.mint_batch(minter, &[(to.clone(), amount)]).await
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<AccountId, Amount>,
    allowances: HashMap<(AccountId, AccountId), Amount>,
    minters: HashSet<AccountId>,
    total_supply: Amount,
}

impl LedgerState {
    fn debit(&mut self, account: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let available = self.balances.get(account).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                needed: amount,
                available,
            });
        }
        self.balances.insert(account.clone(), available - amount);
        Ok(())
    }

    fn credit(&mut self, account: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.balances.entry(account.clone()).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }
}

/// Process-local ledger with ERC-20 style semantics
#[derive(Debug)]
pub struct InMemoryLedger {
    symbol: String,
    state: RwLock<LedgerState>,
}

impl InMemoryLedger {
    /// Create an empty ledger
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Authorize an account to mint
    pub async fn grant_minter(&self, account: AccountId) {
        self.state.write().await.minters.insert(account);
    }

    /// Seed an account balance outside the mint path
    pub async fn deposit(&self, account: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        state.total_supply = state.total_supply.checked_add(amount).ok_or(LedgerError::Overflow)?;
        state.credit(account, amount)
    }

    /// Units in circulation
    pub async fn total_supply(&self) -> Amount {
        self.state.read().await.total_supply
    }
}

#[async_trait]
impl FungibleAssetLedger for InMemoryLedger {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn balance_of(&self, account: &AccountId) -> Amount {
        self.state.read().await.balances.get(account).copied().unwrap_or(0)
    }

    async fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount {
        self.state
            .read()
            .await
            .allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }

    async fn transfer(&self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        state.debit(from, amount)?;
        state.credit(to, amount)
    }

    async fn approve(&self, owner: &AccountId, spender: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        self.state
            .write()
            .await
            .allowances
            .insert((owner.clone(), spender.clone()), amount);
        Ok(())
    }

    async fn transfer_from(
        &self,
        spender: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        let key = (owner.clone(), spender.clone());
        let approved = state.allowances.get(&key).copied().unwrap_or(0);
        if approved < amount {
            return Err(LedgerError::InsufficientAllowance {
                needed: amount,
                approved,
            });
        }

        state.debit(owner, amount)?;
        state.credit(to, amount)?;
        state.allowances.insert(key, approved - amount);
        Ok(())
    }

    async fn mint_batch(&self, minter: &AccountId, recipients: &[(AccountId, Amount)]) -> Result<(), LedgerError> {
        let mut state = self.state.write().await;
        if !state.minters.contains(minter) {
            return Err(LedgerError::NotMinter(minter.to_string()));
        }

        // Check the whole batch before touching any balance
        let mut per_account: HashMap<&AccountId, Amount> = HashMap::new();
        let mut total: Amount = 0;
        for (account, amount) in recipients {
            total = total.checked_add(*amount).ok_or(LedgerError::Overflow)?;
            let entry = per_account.entry(account).or_insert(0);
            *entry = entry.checked_add(*amount).ok_or(LedgerError::Overflow)?;
        }
        let new_supply = state.total_supply.checked_add(total).ok_or(LedgerError::Overflow)?;
        for (account, amount) in &per_account {
            let balance = state.balances.get(*account).copied().unwrap_or(0);
            balance.checked_add(*amount).ok_or(LedgerError::Overflow)?;
        }

        state.total_supply = new_supply;
        for (account, amount) in per_account {
            state.credit(account, amount)?;
        }
        Ok(())
    }
}
