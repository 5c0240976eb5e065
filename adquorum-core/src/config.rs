//! Configuration for the ad network core

use crate::constants::{self, TOKEN};
use crate::rewards::RewardSplit;
use crate::{AdNetworkError, Amount, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level network configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Stake lifecycle configuration
    pub staking: StakingConfig,
    /// Click quorum configuration
    pub consensus: ConsensusConfig,
    /// Validator assignment configuration
    pub assignment: AssignmentConfig,
    /// Reward distribution configuration
    pub rewards: RewardConfig,
    /// Campaign defaults
    pub campaigns: CampaignConfig,
}

/// Stake lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingConfig {
    /// Seconds between an unlock request and the earliest unstake
    pub lock_duration_secs: u64,
}

/// Which click attributes form the dedup key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKeyShape {
    /// One payout per (campaign, ip hash)
    CampaignIp,
    /// One payout per (campaign, publisher, content fingerprint, ip hash)
    CampaignPublisherContentIp,
}

/// Click quorum configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Distinct pools that must attest before a click settles
    pub quorum: usize,
    /// Dedup key derivation
    pub dedup_key: DedupKeyShape,
    /// Reject attestations from pools not assigned to the publisher
    pub enforce_assignment: bool,
}

/// Validator assignment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentConfig {
    /// Pools assigned per publisher
    pub subset_size: usize,
    /// Minimum total stake for a pool to be eligible
    #[serde(with = "amount_str")]
    pub min_pool_stake: Amount,
    /// Force at least one pool from a different stake tier when possible
    pub require_tier_diversity: bool,
    /// Ascending stake tier boundaries, in whole tokens
    pub tier_boundaries_tokens: Vec<u64>,
}

/// Reward distribution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Native tokens minted per settled click
    #[serde(with = "amount_str")]
    pub reward_per_click: Amount,
    /// Per-beneficiary proportions, summing to `reward_per_click`
    pub split: RewardSplit,
    /// Lifetime cap on minted click rewards
    #[serde(with = "amount_str")]
    pub mint_cap: Amount,
}

/// Campaign defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    /// Rate-limit window used when a campaign passes zero
    pub default_rate_limit_window_secs: u64,
    /// Upper bound accepted for a campaign's rate-limit window
    pub max_rate_limit_window_secs: u64,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            lock_duration_secs: constants::LOCK_DURATION,
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            quorum: constants::DEFAULT_QUORUM,
            dedup_key: DedupKeyShape::CampaignIp,
            enforce_assignment: true,
        }
    }
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            subset_size: constants::DEFAULT_SUBSET_SIZE,
            min_pool_stake: 1,
            require_tier_diversity: true,
            tier_boundaries_tokens: vec![1_000, 100_000],
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            reward_per_click: constants::REWARD_PER_CLICK,
            split: RewardSplit::default(),
            mint_cap: constants::DEFAULT_MINT_CAP,
        }
    }
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            default_rate_limit_window_secs: 3600, // 1 hour
            max_rate_limit_window_secs: 30 * constants::SECONDS_PER_DAY,
        }
    }
}

impl AssignmentConfig {
    /// Stake tier boundaries in base units
    pub fn tier_boundaries(&self) -> Vec<Amount> {
        self.tier_boundaries_tokens
            .iter()
            .map(|tokens| Amount::from(*tokens) * TOKEN)
            .collect()
    }
}

impl NetworkConfig {
    /// Load configuration from a TOML or JSON file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AdNetworkError::Configuration(format!("Failed to read config file: {}", e)))?;

        let config: NetworkConfig = if path.extension() == Some(std::ffi::OsStr::new("json")) {
            serde_json::from_str(&content)
                .map_err(|e| AdNetworkError::Configuration(format!("Failed to parse JSON config: {}", e)))?
        } else {
            Self::from_toml_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without validating it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AdNetworkError::Configuration(format!("Failed to parse TOML config: {}", e)))
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AdNetworkError::Serialization(e.to_string()))
    }

    /// Save configuration as TOML
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content)
            .map_err(|e| AdNetworkError::Configuration(format!("Failed to write config file: {}", e)))
    }

    /// Config file locations searched by `load_default`
    pub fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".adquorum").join("config.toml"));
        }
        paths.push(PathBuf::from("/etc/adquorum/config.toml"));
        paths
    }

    /// Load the first config file found, or the defaults
    pub fn load_default() -> Result<Self> {
        for path in Self::default_config_paths() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.staking.lock_duration_secs == 0 {
            return Err(AdNetworkError::Configuration(
                "Lock duration must be greater than 0".to_string(),
            ));
        }

        if self.consensus.quorum == 0 {
            return Err(AdNetworkError::Configuration(
                "Quorum must be at least 1".to_string(),
            ));
        }

        if self.assignment.subset_size < self.consensus.quorum {
            return Err(AdNetworkError::Configuration(format!(
                "Assigned subset size {} is smaller than quorum {}",
                self.assignment.subset_size, self.consensus.quorum
            )));
        }

        if self.assignment.min_pool_stake == 0 {
            return Err(AdNetworkError::Configuration(
                "Minimum pool stake must be greater than 0".to_string(),
            ));
        }

        if self
            .assignment
            .tier_boundaries_tokens
            .windows(2)
            .any(|pair| pair[0] >= pair[1])
        {
            return Err(AdNetworkError::Configuration(
                "Stake tier boundaries must be strictly ascending".to_string(),
            ));
        }

        self.rewards.split.validate(self.rewards.reward_per_click)?;

        if self.campaigns.default_rate_limit_window_secs == 0
            || self.campaigns.default_rate_limit_window_secs > self.campaigns.max_rate_limit_window_secs
        {
            return Err(AdNetworkError::Configuration(
                "Default rate-limit window must be within (0, max]".to_string(),
            ));
        }

        Ok(())
    }
}

/// Amounts as decimal strings; TOML integers stop at i64
pub(crate) mod amount_str {
    use crate::Amount;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.replace('_', "").parse().map_err(de::Error::custom),
            Raw::Int(value) => Ok(Amount::from(value)),
        }
    }
}
