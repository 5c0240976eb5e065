//! Affiliate directory
//!
//! Attestations may name affiliates instead of passing their accounts. Unknown or
//! empty names resolve to no affiliate, and the reward slice falls back to the
//! principal.

use crate::{AccountId, AdNetworkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

/// How an attestation refers to an affiliate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffiliateRef {
    /// Direct account
    Account(AccountId),
    /// Registered affiliate name
    Name(String),
}

/// Name to account mapping for affiliates
#[derive(Debug, Default)]
pub struct AffiliateRegistry {
    by_name: RwLock<HashMap<String, AccountId>>,
}

impl AffiliateRegistry {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or re-point an affiliate name
    pub async fn register(&self, name: &str, account: AccountId) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AdNetworkError::InvalidAffiliate(
                "affiliate name must not be empty".to_string(),
            ));
        }
        info!("Affiliate {} registered as {}", name, account);
        self.by_name.write().await.insert(name.to_string(), account);
        Ok(())
    }

    /// Account registered under `name`
    pub async fn lookup(&self, name: &str) -> Option<AccountId> {
        self.by_name.read().await.get(name.trim()).cloned()
    }

    /// Resolve an optional reference to an account
    pub async fn resolve(&self, reference: Option<&AffiliateRef>) -> Option<AccountId> {
        match reference? {
            AffiliateRef::Account(account) => Some(account.clone()),
            AffiliateRef::Name(name) if name.trim().is_empty() => None,
            AffiliateRef::Name(name) => self.lookup(name).await,
        }
    }
}
