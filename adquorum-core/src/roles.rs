//! Capability checks for governance and slashing

use crate::{AccountId, AdNetworkError, Result};
use std::collections::HashSet;
use tokio::sync::RwLock;

/// Explicit sets of authorized identities per role
#[derive(Debug)]
pub struct AccessControl {
    admin: AccountId,
    slashers: RwLock<HashSet<AccountId>>,
}

impl AccessControl {
    /// Create with a single admin and no slashers
    pub fn new(admin: AccountId) -> Self {
        Self {
            admin,
            slashers: RwLock::new(HashSet::new()),
        }
    }

    /// Governance account
    pub fn admin(&self) -> &AccountId {
        &self.admin
    }

    /// Fail unless `caller` is the admin
    pub fn require_admin(&self, caller: &AccountId) -> Result<()> {
        if caller != &self.admin {
            return Err(AdNetworkError::Unauthorized(caller.to_string()));
        }
        Ok(())
    }

    /// Fail unless `caller` holds the slasher role
    pub async fn require_slasher(&self, caller: &AccountId) -> Result<()> {
        if !self.slashers.read().await.contains(caller) {
            return Err(AdNetworkError::UnauthorizedSlasher(caller.to_string()));
        }
        Ok(())
    }

    /// Grant the slasher role (admin only)
    pub async fn grant_slasher(&self, caller: &AccountId, account: AccountId) -> Result<()> {
        self.require_admin(caller)?;
        tracing::info!("Slasher role granted to {}", account);
        self.slashers.write().await.insert(account);
        Ok(())
    }

    /// Revoke the slasher role (admin only)
    pub async fn revoke_slasher(&self, caller: &AccountId, account: &AccountId) -> Result<()> {
        self.require_admin(caller)?;
        tracing::info!("Slasher role revoked from {}", account);
        self.slashers.write().await.remove(account);
        Ok(())
    }

    /// Whether `account` may slash
    pub async fn is_slasher(&self, account: &AccountId) -> bool {
        self.slashers.read().await.contains(account)
    }
}
