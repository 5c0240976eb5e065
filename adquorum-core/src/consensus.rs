//! Click validation quorum
//!
//! Each click is identified by a dedup key. A key moves
//! `Unseen -> Pending (attested by fewer than quorum pools) -> Settled`; the
//! attestation that brings the number of distinct pools to the quorum runs the
//! whole settlement pipeline exactly once. Attestations on a settled key are
//! no-ops. Access is serialized per key, so unrelated clicks settle concurrently.

use crate::affiliate::{AffiliateRef, AffiliateRegistry};
use crate::assignment::ValidatorAssignment;
use crate::campaign::{CampaignBudget, PayoutOutcome};
use crate::clock::Clock;
use crate::config::{ConsensusConfig, DedupKeyShape};
use crate::events::{EventBus, NetworkEvent};
use crate::pool::PoolRegistry;
use crate::rewards::{RewardParties, RewardSplitter};
use crate::staking::StakingLedger;
use crate::types::fingerprint;
use crate::{AccountId, AdNetworkError, Amount, CampaignId, DedupKey, Fingerprint, PoolId, Result, Timestamp};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const DEDUP_DOMAIN: &[u8] = b"adquorum-click";

/// One validator's claim that a click is genuine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickAttestation {
    /// Campaign the ad belongs to
    pub campaign: CampaignId,
    /// Publisher that displayed the ad
    pub publisher: AccountId,
    /// Publisher's affiliate
    pub publisher_affiliate: Option<AffiliateRef>,
    /// Platform front-end affiliate
    pub platform_affiliate: Option<AffiliateRef>,
    /// Opaque click data
    pub click_payload: String,
    /// Content fingerprint; derived from the payload when absent
    pub content_hash: Option<Fingerprint>,
    /// Hash of the clicking IP
    pub ip_hash: Fingerprint,
    /// Attesting pool
    pub pool: PoolId,
    /// Pool member signing the attestation
    pub validator: AccountId,
    /// Mint native rewards when this attestation settles the click
    pub rewardable: bool,
    /// Keep the payload in the settlement record
    pub retain_payload: bool,
}

impl ClickAttestation {
    /// Rewardable attestation without affiliates or a retained payload
    pub fn new(
        campaign: CampaignId,
        publisher: AccountId,
        click_payload: impl Into<String>,
        ip_hash: Fingerprint,
        pool: PoolId,
        validator: AccountId,
    ) -> Self {
        Self {
            campaign,
            publisher,
            publisher_affiliate: None,
            platform_affiliate: None,
            click_payload: click_payload.into(),
            content_hash: None,
            ip_hash,
            pool,
            validator,
            rewardable: true,
            retain_payload: false,
        }
    }

    /// Set both affiliates
    pub fn with_affiliates(mut self, publisher: Option<AffiliateRef>, platform: Option<AffiliateRef>) -> Self {
        self.publisher_affiliate = publisher;
        self.platform_affiliate = platform;
        self
    }

    /// Set the rewardable flag
    pub fn rewardable(mut self, rewardable: bool) -> Self {
        self.rewardable = rewardable;
        self
    }

    /// Set the payload retention flag
    pub fn retain_payload(mut self, retain: bool) -> Self {
        self.retain_payload = retain;
        self
    }

    /// Same click seen by another pool
    pub fn from_pool(&self, pool: PoolId, validator: AccountId) -> Self {
        Self {
            pool,
            validator,
            ..self.clone()
        }
    }

    /// Dedup key under `shape`
    pub fn dedup_key(&self, shape: DedupKeyShape) -> DedupKey {
        let mut hasher = Sha3_256::new();
        hasher.update(DEDUP_DOMAIN);
        hasher.update(self.campaign.as_bytes());
        match shape {
            DedupKeyShape::CampaignIp => hasher.update([0u8]),
            DedupKeyShape::CampaignPublisherContentIp => {
                hasher.update([1u8]);
                hasher.update((self.publisher.as_str().len() as u64).to_le_bytes());
                hasher.update(self.publisher.as_str().as_bytes());
                let content = self
                    .content_hash
                    .unwrap_or_else(|| fingerprint(self.click_payload.as_bytes()));
                hasher.update(content);
            }
        }
        hasher.update(self.ip_hash);
        DedupKey::from_bytes(hasher.finalize().into())
    }
}

/// Permanent record of a settled click
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    /// Dedup key
    pub key: DedupKey,
    /// Paying campaign
    pub campaign: CampaignId,
    /// Publisher credited with the click
    pub publisher: AccountId,
    /// Distinct pools that formed quorum, ascending
    pub pools: Vec<PoolId>,
    /// Funding-token payout
    pub payout: PayoutOutcome,
    /// Native tokens minted, zero when no reward was distributed
    pub rewards_minted: Amount,
    /// Settlement time
    pub settled_at: Timestamp,
    /// Click payload, kept only when the settling attestation asked for it
    pub payload: Option<String>,
}

/// Externally visible state of a dedup key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickStatus {
    /// Never attested
    Unseen,
    /// Attested by fewer pools than the quorum
    Pending { pools: Vec<PoolId> },
    /// Settled; further attestations are no-ops
    Settled(SettlementRecord),
}

/// Result of `submit_attestation`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationOutcome {
    /// Recorded; quorum not reached yet
    Recorded { attestations: usize },
    /// The pool had already attested this click
    Duplicate,
    /// This attestation completed the quorum
    Settled(SettlementRecord),
    /// The click was settled earlier
    AlreadySettled,
}

#[derive(Debug)]
struct PendingClick {
    campaign: CampaignId,
    publisher: AccountId,
    publisher_affiliate: Option<AffiliateRef>,
    platform_affiliate: Option<AffiliateRef>,
    pools: BTreeSet<PoolId>,
}

#[derive(Debug)]
enum KeyState {
    Unseen,
    Pending(PendingClick),
    Settled(SettlementRecord),
}

/// Quorum state machine over all clicks
#[derive(Debug)]
pub struct ClickValidationConsensus {
    config: ConsensusConfig,
    registry: Arc<PoolRegistry>,
    staking: Arc<StakingLedger>,
    assignment: ValidatorAssignment,
    campaigns: Arc<CampaignBudget>,
    rewards: Arc<RewardSplitter>,
    affiliates: Arc<AffiliateRegistry>,
    platform: AccountId,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    clicks: RwLock<HashMap<DedupKey, Arc<Mutex<KeyState>>>>,
}

impl ClickValidationConsensus {
    /// Wire the consensus engine to its collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConsensusConfig,
        registry: Arc<PoolRegistry>,
        staking: Arc<StakingLedger>,
        assignment: ValidatorAssignment,
        campaigns: Arc<CampaignBudget>,
        rewards: Arc<RewardSplitter>,
        affiliates: Arc<AffiliateRegistry>,
        platform: AccountId,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            registry,
            staking,
            assignment,
            campaigns,
            rewards,
            affiliates,
            platform,
            clock,
            events,
            clicks: RwLock::new(HashMap::new()),
        }
    }

    /// Dedup key of an attestation under the configured shape
    pub fn dedup_key(&self, attestation: &ClickAttestation) -> DedupKey {
        attestation.dedup_key(self.config.dedup_key)
    }

    /// Pools that witness `publisher`'s clicks under the current stake snapshot
    pub async fn assigned_pools(&self, publisher: &AccountId) -> Vec<PoolId> {
        let snapshot = self.registry.snapshot().await;
        self.assignment.assign(publisher, &snapshot)
    }

    /// Current state of a click
    pub async fn click_status(&self, key: &DedupKey) -> ClickStatus {
        let entry = self.clicks.read().await.get(key).cloned();
        let Some(entry) = entry else {
            return ClickStatus::Unseen;
        };
        let state = entry.lock().await;
        match &*state {
            KeyState::Unseen => ClickStatus::Unseen,
            KeyState::Pending(pending) => ClickStatus::Pending {
                pools: pending.pools.iter().copied().collect(),
            },
            KeyState::Settled(record) => ClickStatus::Settled(record.clone()),
        }
    }

    async fn entry(&self, key: DedupKey) -> Arc<Mutex<KeyState>> {
        if let Some(entry) = self.clicks.read().await.get(&key) {
            return entry.clone();
        }
        self.clicks
            .write()
            .await
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(KeyState::Unseen)))
            .clone()
    }

    /// Record a pool's attestation and settle the click once quorum is reached.
    ///
    /// Authorization failures and ledger faults abort with no state change.
    /// Funding shortfalls settle the click without payment.
    pub async fn submit_attestation(&self, attestation: ClickAttestation) -> Result<AttestationOutcome> {
        if !self.registry.is_member(attestation.pool, &attestation.validator).await? {
            return Err(AdNetworkError::UnauthorizedValidator {
                pool: attestation.pool,
                validator: attestation.validator.to_string(),
            });
        }
        if !self.campaigns.contains(attestation.campaign).await {
            return Err(AdNetworkError::CampaignNotFound(attestation.campaign));
        }

        let key = self.dedup_key(&attestation);
        let entry = self.entry(key).await;
        let mut state = entry.lock().await;

        // A click keeps the publisher of its first attestation
        if self.config.enforce_assignment {
            let publisher = match &*state {
                KeyState::Settled(record) => &record.publisher,
                KeyState::Pending(pending) => &pending.publisher,
                KeyState::Unseen => &attestation.publisher,
            };
            if !self.assigned_pools(publisher).await.contains(&attestation.pool) {
                return Err(AdNetworkError::UnauthorizedPool(attestation.pool));
            }
        }

        let fresh;
        let pending = match &*state {
            KeyState::Settled(_) => {
                debug!("Click {} already settled; attestation from pool {} ignored", key, attestation.pool);
                return Ok(AttestationOutcome::AlreadySettled);
            }
            KeyState::Pending(pending) if pending.pools.contains(&attestation.pool) => {
                debug!("Pool {} re-attested click {}", attestation.pool, key);
                return Ok(AttestationOutcome::Duplicate);
            }
            KeyState::Pending(pending) => pending,
            KeyState::Unseen => {
                fresh = PendingClick {
                    campaign: attestation.campaign,
                    publisher: attestation.publisher.clone(),
                    publisher_affiliate: attestation.publisher_affiliate.clone(),
                    platform_affiliate: attestation.platform_affiliate.clone(),
                    pools: BTreeSet::new(),
                };
                &fresh
            }
        };

        let mut pools = pending.pools.clone();
        pools.insert(attestation.pool);

        if pools.len() < self.config.quorum {
            let attestations = pools.len();
            let campaign = pending.campaign;
            let next = PendingClick {
                campaign,
                publisher: pending.publisher.clone(),
                publisher_affiliate: pending.publisher_affiliate.clone(),
                platform_affiliate: pending.platform_affiliate.clone(),
                pools,
            };
            *state = KeyState::Pending(next);

            debug!(
                "Click {} attested by pool {} ({}/{})",
                key, attestation.pool, attestations, self.config.quorum
            );
            self.events.emit(NetworkEvent::ClickAttested {
                campaign,
                key,
                pool: attestation.pool,
                attestations,
            });
            return Ok(AttestationOutcome::Recorded { attestations });
        }

        let record = self.settle(key, pending, pools, &attestation).await?;
        *state = KeyState::Settled(record.clone());
        Ok(AttestationOutcome::Settled(record))
    }

    async fn settle(
        &self,
        key: DedupKey,
        click: &PendingClick,
        pools: BTreeSet<PoolId>,
        settling: &ClickAttestation,
    ) -> Result<SettlementRecord> {
        let pool_ids: Vec<PoolId> = pools.into_iter().collect();
        let mut campaign = self.campaigns.lock_campaign(click.campaign).await?;
        let mut pool_guards = self.staking.lock_pools(&pool_ids).await?;
        let now = self.clock.now();

        let reservation = self.campaigns.reserve(&campaign, now).await?;

        let mut rewards_minted = 0;
        let reservation = match reservation {
            Ok(escrowed) if settling.rewardable => {
                let parties = RewardParties {
                    campaign_owner: campaign.owner.clone(),
                    campaign_affiliate: campaign.affiliate.clone(),
                    publisher: click.publisher.clone(),
                    publisher_affiliate: self.affiliates.resolve(click.publisher_affiliate.as_ref()).await,
                    platform: self.platform.clone(),
                    platform_affiliate: self.affiliates.resolve(click.platform_affiliate.as_ref()).await,
                    validator_pools: pool_ids.clone(),
                };
                match self.rewards.distribute(key, &parties, &mut pool_guards).await {
                    Ok(plan) => {
                        rewards_minted = plan.map_or(0, |p| p.total);
                        Ok(escrowed)
                    }
                    Err(e) => {
                        warn!("Reward mint failed for click {}; refunding {} from escrow", key, escrowed.amount());
                        self.campaigns.refund(&campaign, escrowed).await;
                        return Err(e);
                    }
                }
            }
            other => other,
        };

        let payout = match reservation {
            Ok(escrowed) => self.campaigns.forward(escrowed, &click.publisher).await,
            Err(reason) => {
                warn!("Click {} settles without payout: {}", key, reason);
                self.events.emit(NetworkEvent::PayoutSkipped {
                    campaign: click.campaign,
                    key,
                    reason: reason.to_string(),
                });
                PayoutOutcome::Skipped { reason }
            }
        };

        CampaignBudget::record_settlement(&mut campaign, now, payout.amount());
        drop(pool_guards);
        drop(campaign);

        info!(
            "Click {} settled for publisher {} by {} pools (payout {}, rewards {})",
            key,
            click.publisher,
            pool_ids.len(),
            payout.amount(),
            rewards_minted
        );
        self.events.emit(NetworkEvent::ClickSettled {
            campaign: click.campaign,
            publisher: click.publisher.clone(),
            key,
            payout: payout.amount(),
            pools: pool_ids.clone(),
        });

        Ok(SettlementRecord {
            key,
            campaign: click.campaign,
            publisher: click.publisher.clone(),
            pools: pool_ids,
            payout,
            rewards_minted,
            settled_at: now,
            payload: settling.retain_payload.then(|| settling.click_payload.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attestation(shape_payload: &str, ip: &str) -> ClickAttestation {
        ClickAttestation::new(
            CampaignId::generate(),
            AccountId::new("publisher"),
            shape_payload,
            fingerprint(ip.as_bytes()),
            PoolId::generate(),
            AccountId::new("validator"),
        )
    }

    #[test]
    fn test_campaign_ip_key_ignores_pool_and_payload() {
        let a = attestation("CLICKDATA", "10.0.0.1");
        let mut b = a.from_pool(PoolId::generate(), AccountId::new("other"));
        b.click_payload = "OTHER".to_string();
        b.publisher = AccountId::new("someone-else");

        assert_eq!(a.dedup_key(DedupKeyShape::CampaignIp), b.dedup_key(DedupKeyShape::CampaignIp));
        assert_ne!(
            a.dedup_key(DedupKeyShape::CampaignPublisherContentIp),
            b.dedup_key(DedupKeyShape::CampaignPublisherContentIp)
        );
    }

    #[test]
    fn test_ip_and_campaign_change_key() {
        let a = attestation("CLICKDATA", "10.0.0.1");
        let mut other_ip = a.clone();
        other_ip.ip_hash = fingerprint(b"10.0.0.2");
        let mut other_campaign = a.clone();
        other_campaign.campaign = CampaignId::generate();

        let key = a.dedup_key(DedupKeyShape::CampaignIp);
        assert_ne!(key, other_ip.dedup_key(DedupKeyShape::CampaignIp));
        assert_ne!(key, other_campaign.dedup_key(DedupKeyShape::CampaignIp));
    }

    #[test]
    fn test_content_hash_overrides_payload() {
        let mut a = attestation("CLICKDATA", "10.0.0.1");
        let shape = DedupKeyShape::CampaignPublisherContentIp;
        let derived = a.dedup_key(shape);

        a.content_hash = Some(fingerprint(b"CLICKDATA"));
        assert_eq!(a.dedup_key(shape), derived);
        a.content_hash = Some(fingerprint(b"creative-42"));
        assert_ne!(a.dedup_key(shape), derived);
    }

    #[test]
    fn test_builder_flags() {
        let a = attestation("CLICKDATA", "10.0.0.1")
            .rewardable(false)
            .retain_payload(true)
            .with_affiliates(Some(AffiliateRef::Name("pub-aff".to_string())), None);
        assert!(!a.rewardable);
        assert!(a.retain_payload);
        assert_eq!(a.publisher_affiliate, Some(AffiliateRef::Name("pub-aff".to_string())));
    }
}
