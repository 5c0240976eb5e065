//! Deterministic validator-pool assignment per publisher
//!
//! Every pool is scored with `SHA3-256(domain || publisher || pool)`; the lowest
//! scores win. Independent validators holding the same pool snapshot therefore
//! converge on the same witness set for a publisher without coordinating.

use crate::config::AssignmentConfig;
use crate::pool::PoolSnapshot;
use crate::{AccountId, Amount, PoolId};
use sha3::{Digest, Sha3_256};
use tracing::debug;

const ASSIGNMENT_DOMAIN: &[u8] = b"adquorum-validator-assignment";

/// Selects the pools that witness a publisher's clicks
#[derive(Debug, Clone)]
pub struct ValidatorAssignment {
    subset_size: usize,
    min_pool_stake: Amount,
    require_tier_diversity: bool,
    tier_boundaries: Vec<Amount>,
}

impl ValidatorAssignment {
    /// Build from configuration
    pub fn new(config: &AssignmentConfig) -> Self {
        Self {
            subset_size: config.subset_size,
            min_pool_stake: config.min_pool_stake.max(1),
            require_tier_diversity: config.require_tier_diversity,
            tier_boundaries: config.tier_boundaries(),
        }
    }

    /// Ranking score of a pool for a publisher
    pub fn score(publisher: &AccountId, pool: &PoolId) -> [u8; 32] {
        let mut hasher = Sha3_256::new();
        hasher.update(ASSIGNMENT_DOMAIN);
        hasher.update((publisher.as_str().len() as u64).to_le_bytes());
        hasher.update(publisher.as_str().as_bytes());
        hasher.update(pool.as_bytes());
        hasher.finalize().into()
    }

    /// Stake tier index: number of boundaries at or below `stake`
    pub fn stake_tier(&self, stake: Amount) -> usize {
        self.tier_boundaries.iter().filter(|b| **b <= stake).count()
    }

    /// Pools assigned to `publisher` given a snapshot of all pools
    pub fn assign(&self, publisher: &AccountId, snapshot: &[PoolSnapshot]) -> Vec<PoolId> {
        let mut ranked: Vec<(&PoolSnapshot, [u8; 32])> = snapshot
            .iter()
            .filter(|pool| pool.total_stake >= self.min_pool_stake)
            .map(|pool| (pool, Self::score(publisher, &pool.id)))
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));

        let take = self.subset_size.min(ranked.len());
        let mut selected: Vec<&PoolSnapshot> = ranked[..take].iter().map(|(pool, _)| *pool).collect();

        if self.require_tier_diversity && selected.len() >= 2 {
            let tier = self.stake_tier(selected[0].total_stake);
            let uniform = selected.iter().all(|p| self.stake_tier(p.total_stake) == tier);
            if uniform {
                let outsider = ranked[take..]
                    .iter()
                    .map(|(pool, _)| *pool)
                    .find(|p| self.stake_tier(p.total_stake) != tier);
                if let Some(outsider) = outsider {
                    debug!(
                        "Replacing pool {} with {} for stake tier diversity",
                        selected[selected.len() - 1].id,
                        outsider.id
                    );
                    let last = selected.len() - 1;
                    selected[last] = outsider;
                }
            }
        }

        debug!(
            "Assigned {} of {} pools to publisher {}",
            selected.len(),
            snapshot.len(),
            publisher
        );
        selected.into_iter().map(|pool| pool.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TOKEN;

    fn snapshot(stakes: &[Amount]) -> Vec<PoolSnapshot> {
        stakes
            .iter()
            .map(|stake| PoolSnapshot {
                id: PoolId::generate(),
                total_stake: *stake,
                metadata: None,
            })
            .collect()
    }

    fn assignment(subset_size: usize, diversity: bool) -> ValidatorAssignment {
        ValidatorAssignment::new(&AssignmentConfig {
            subset_size,
            require_tier_diversity: diversity,
            ..AssignmentConfig::default()
        })
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let pools = snapshot(&[TOKEN; 8]);
        let picker = assignment(3, false);
        let publisher = AccountId::new("publisher");

        let first = picker.assign(&publisher, &pools);
        assert_eq!(first.len(), 3);
        assert_eq!(first, picker.assign(&publisher, &pools));

        let mut reversed = pools.clone();
        reversed.reverse();
        assert_eq!(first, picker.assign(&publisher, &reversed));
    }

    #[test]
    fn test_zero_stake_pools_are_excluded() {
        let pools = snapshot(&[0, TOKEN, 0, TOKEN]);
        let assigned = assignment(10, false).assign(&AccountId::new("publisher"), &pools);

        assert_eq!(assigned.len(), 2);
        assert!(assigned.iter().all(|id| pools.iter().any(|p| p.id == *id && p.total_stake > 0)));
    }

    #[test]
    fn test_min_stake_filter() {
        let pools = snapshot(&[10, 1_000]);
        let picker = ValidatorAssignment::new(&AssignmentConfig {
            min_pool_stake: 500,
            ..AssignmentConfig::default()
        });
        assert_eq!(picker.assign(&AccountId::new("p"), &pools), vec![pools[1].id]);
    }

    #[test]
    fn test_publishers_get_different_subsets() {
        let pools = snapshot(&[TOKEN; 16]);
        let picker = assignment(4, false);
        let subsets: std::collections::HashSet<Vec<PoolId>> = (0..20)
            .map(|i| picker.assign(&AccountId::new(format!("publisher{}", i)), &pools))
            .collect();
        assert!(subsets.len() > 1);
    }

    #[test]
    fn test_tier_diversity_pulls_in_other_tier() {
        let mut pools = snapshot(&[10 * TOKEN; 6]);
        pools.extend(snapshot(&[1_000_000 * TOKEN]));
        let publisher = AccountId::new("publisher");

        let picker = assignment(3, true);
        let assigned = picker.assign(&publisher, &pools);
        assert_eq!(assigned.len(), 3);

        let tiers: std::collections::HashSet<usize> = assigned
            .iter()
            .map(|id| {
                let pool = pools.iter().find(|p| p.id == *id).unwrap();
                picker.stake_tier(pool.total_stake)
            })
            .collect();
        assert_eq!(tiers.len(), 2);
    }

    #[test]
    fn test_stake_tiers() {
        let picker = assignment(2, true);
        assert_eq!(picker.stake_tier(0), 0);
        assert_eq!(picker.stake_tier(999 * TOKEN), 0);
        assert_eq!(picker.stake_tier(1_000 * TOKEN), 1);
        assert_eq!(picker.stake_tier(100_000 * TOKEN), 2);
    }
}
