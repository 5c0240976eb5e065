//! Advertiser campaigns and click payouts
//!
//! Budgets are allowance-backed: the owner approves the escrow account on the
//! funding-token ledger and each paid click pulls the token's price per click at
//! settlement time. A campaign additionally caps its total spend and rate-limits
//! paid clicks per fixed window. Shortfalls never fail a settlement; the click
//! settles unpaid.

use crate::affiliate::{AffiliateRef, AffiliateRegistry};
use crate::clock::Clock;
use crate::config::CampaignConfig;
use crate::events::{EventBus, NetworkEvent};
use crate::ledger::FungibleAssetLedger;
use crate::roles::AccessControl;
use crate::{AccountId, AdNetworkError, Amount, CampaignId, Result, Timestamp, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};

/// A governance-approved funding token
#[derive(Debug, Clone)]
pub struct FundingToken {
    /// Token identity
    pub token: TokenId,
    /// Ledger holding the token
    pub ledger: Arc<dyn FungibleAssetLedger>,
    /// Amount paid to the publisher per settled click
    pub price_per_click: Amount,
    /// Whether new campaigns may use the token
    pub approved: bool,
}

/// Arguments of `create_campaign`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignParams {
    /// Spend cap in funding-token units
    pub budget: Amount,
    /// Rate-limit window in seconds; zero selects the configured default
    pub rate_limit_window: u64,
    /// Paid clicks allowed per window
    pub max_clicks_per_window: u32,
    /// Funding token
    pub token: TokenId,
    /// Advertiser's affiliate
    pub affiliate: Option<AffiliateRef>,
    /// Ad format tag, e.g. "BANNER"
    pub format: String,
    /// Targeting or blacklist reference
    pub targeting_ref: Option<String>,
}

/// Campaign state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Campaign identity
    pub id: CampaignId,
    /// Advertiser funding the campaign
    pub owner: AccountId,
    /// Funding token
    pub token: TokenId,
    /// Spend cap
    pub budget: Amount,
    /// Paid so far
    pub spent: Amount,
    /// Window length in seconds
    pub rate_limit_window: u64,
    /// Paid clicks allowed per window
    pub max_clicks_per_window: u32,
    /// Resolved advertiser affiliate
    pub affiliate: Option<AccountId>,
    /// Ad format tag
    pub format: String,
    /// Targeting or blacklist reference
    pub targeting_ref: Option<String>,
    /// Settled clicks are not paid while set
    pub paused: bool,
    /// Start of the current rate-limit window
    pub window_start: Timestamp,
    /// Settled clicks in the current window
    pub window_clicks: u32,
    /// Lifetime settled clicks
    pub settled_clicks: u64,
    /// Lifetime paid clicks
    pub paid_clicks: u64,
    /// Creation time
    pub created_at: Timestamp,
}

impl Campaign {
    /// Spend still allowed under the cap
    pub fn remaining_budget(&self) -> Amount {
        self.budget.saturating_sub(self.spent)
    }

    /// Settled clicks counted in the window containing `now`
    pub fn clicks_in_window(&self, now: Timestamp) -> u32 {
        if now >= self.window_start.saturating_add(self.rate_limit_window) {
            0
        } else {
            self.window_clicks
        }
    }

    fn record_settlement(&mut self, now: Timestamp, paid: Amount) {
        if now >= self.window_start.saturating_add(self.rate_limit_window) {
            self.window_start = now;
            self.window_clicks = 0;
        }
        self.window_clicks = self.window_clicks.saturating_add(1);
        self.settled_clicks += 1;
        if paid > 0 {
            self.spent = self.spent.saturating_add(paid);
            self.paid_clicks += 1;
        }
    }
}

/// Why a settled click was not paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Campaign paused by its owner
    Paused,
    /// Window quota used up
    RateLimited,
    /// Spend cap reached
    BudgetExhausted,
    /// Owner allowance to escrow too low
    InsufficientAllowance,
    /// Owner balance too low
    InsufficientBalance,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::Paused => "campaign paused",
            SkipReason::RateLimited => "rate limit reached",
            SkipReason::BudgetExhausted => "campaign budget exhausted",
            SkipReason::InsufficientAllowance => "owner allowance exhausted",
            SkipReason::InsufficientBalance => "owner balance exhausted",
        };
        f.write_str(reason)
    }
}

/// Result of a click payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PayoutOutcome {
    /// Forwarded to the publisher
    Paid { token: TokenId, amount: Amount },
    /// Held in escrow as a publisher claim
    PendingClaim { token: TokenId, amount: Amount },
    /// Nothing was paid
    Skipped { reason: SkipReason },
}

impl PayoutOutcome {
    /// Funding-token amount taken from the campaign
    pub fn amount(&self) -> Amount {
        match self {
            PayoutOutcome::Paid { amount, .. } | PayoutOutcome::PendingClaim { amount, .. } => *amount,
            PayoutOutcome::Skipped { .. } => 0,
        }
    }

    /// Whether funds left the owner
    pub fn is_funded(&self) -> bool {
        !matches!(self, PayoutOutcome::Skipped { .. })
    }
}

/// Funds pulled into escrow for one click, not yet forwarded
#[derive(Debug)]
pub(crate) struct Escrowed {
    ledger: Arc<dyn FungibleAssetLedger>,
    token: TokenId,
    amount: Amount,
}

impl Escrowed {
    pub(crate) fn amount(&self) -> Amount {
        self.amount
    }
}

/// Campaign registry and payout engine
#[derive(Debug)]
pub struct CampaignBudget {
    campaigns: RwLock<HashMap<CampaignId, Arc<Mutex<Campaign>>>>,
    tokens: RwLock<HashMap<TokenId, FundingToken>>,
    pending: Mutex<BTreeMap<(AccountId, TokenId), Amount>>,
    escrow: AccountId,
    config: CampaignConfig,
    roles: Arc<AccessControl>,
    affiliates: Arc<AffiliateRegistry>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
}

impl CampaignBudget {
    /// Create an empty registry paying out through `escrow`
    pub fn new(
        escrow: AccountId,
        config: CampaignConfig,
        roles: Arc<AccessControl>,
        affiliates: Arc<AffiliateRegistry>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            campaigns: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            pending: Mutex::new(BTreeMap::new()),
            escrow,
            config,
            roles,
            affiliates,
            clock,
            events,
        }
    }

    /// Account campaign owners approve and payouts pass through
    pub fn escrow(&self) -> &AccountId {
        &self.escrow
    }

    /// Approve or withdraw a funding token (admin only)
    pub async fn approve_funding_token(
        &self,
        caller: &AccountId,
        token: TokenId,
        ledger: Arc<dyn FungibleAssetLedger>,
        price_per_click: Amount,
        approved: bool,
    ) -> Result<()> {
        self.roles.require_admin(caller)?;
        if approved && price_per_click == 0 {
            return Err(AdNetworkError::InvalidAmount(
                "price per click must be greater than 0".to_string(),
            ));
        }
        info!(
            "Funding token {} {} at {} per click",
            token,
            if approved { "approved" } else { "withdrawn" },
            price_per_click
        );
        self.tokens.write().await.insert(
            token.clone(),
            FundingToken {
                token,
                ledger,
                price_per_click,
                approved,
            },
        );
        Ok(())
    }

    /// Registered funding token
    pub async fn funding_token(&self, token: &TokenId) -> Option<FundingToken> {
        self.tokens.read().await.get(token).cloned()
    }

    /// Register a campaign; the budget stays with the owner until clicks settle
    pub async fn create_campaign(&self, owner: &AccountId, params: CampaignParams) -> Result<CampaignId> {
        match self.tokens.read().await.get(&params.token) {
            Some(token) if token.approved => {}
            _ => return Err(AdNetworkError::TokenNotApproved(params.token.to_string())),
        }
        if params.budget == 0 {
            return Err(AdNetworkError::InvalidAmount("campaign budget must be greater than 0".to_string()));
        }
        if params.max_clicks_per_window == 0 {
            return Err(AdNetworkError::InvalidAmount(
                "max clicks per window must be greater than 0".to_string(),
            ));
        }
        let window = match params.rate_limit_window {
            0 => self.config.default_rate_limit_window_secs,
            w if w > self.config.max_rate_limit_window_secs => {
                return Err(AdNetworkError::InvalidAmount(format!(
                    "rate limit window {}s exceeds maximum {}s",
                    w, self.config.max_rate_limit_window_secs
                )))
            }
            w => w,
        };

        let now = self.clock.now();
        let campaign = Campaign {
            id: CampaignId::generate(),
            owner: owner.clone(),
            token: params.token.clone(),
            budget: params.budget,
            spent: 0,
            rate_limit_window: window,
            max_clicks_per_window: params.max_clicks_per_window,
            affiliate: self.affiliates.resolve(params.affiliate.as_ref()).await,
            format: params.format,
            targeting_ref: params.targeting_ref,
            paused: false,
            window_start: now,
            window_clicks: 0,
            settled_clicks: 0,
            paid_clicks: 0,
            created_at: now,
        };
        let id = campaign.id;
        self.campaigns.write().await.insert(id, Arc::new(Mutex::new(campaign)));

        info!("Campaign {} created by {} (budget {} {})", id, owner, params.budget, params.token);
        self.events.emit(NetworkEvent::CampaignCreated {
            campaign: id,
            owner: owner.clone(),
            token: params.token,
        });
        Ok(id)
    }

    pub(crate) async fn lock_campaign(&self, id: CampaignId) -> Result<OwnedMutexGuard<Campaign>> {
        let handle = self
            .campaigns
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(AdNetworkError::CampaignNotFound(id))?;
        Ok(handle.lock_owned().await)
    }

    async fn lock_owned_by(&self, id: CampaignId, caller: &AccountId) -> Result<OwnedMutexGuard<Campaign>> {
        let campaign = self.lock_campaign(id).await?;
        if &campaign.owner != caller {
            return Err(AdNetworkError::Unauthorized(caller.to_string()));
        }
        Ok(campaign)
    }

    /// Copy of a campaign's state
    pub async fn campaign(&self, id: CampaignId) -> Result<Campaign> {
        Ok(self.lock_campaign(id).await?.clone())
    }

    /// Whether the campaign exists
    pub async fn contains(&self, id: CampaignId) -> bool {
        self.campaigns.read().await.contains_key(&id)
    }

    /// Raise the spend cap (owner only)
    pub async fn top_up_budget(&self, id: CampaignId, caller: &AccountId, amount: Amount) -> Result<Amount> {
        let mut campaign = self.lock_owned_by(id, caller).await?;
        campaign.budget = campaign
            .budget
            .checked_add(amount)
            .ok_or_else(|| AdNetworkError::InvalidAmount("budget overflow".to_string()))?;
        info!("Campaign {} budget raised by {} to {}", id, amount, campaign.budget);
        Ok(campaign.budget)
    }

    /// Stop paying for clicks (owner only)
    pub async fn pause(&self, id: CampaignId, caller: &AccountId) -> Result<()> {
        self.lock_owned_by(id, caller).await?.paused = true;
        info!("Campaign {} paused", id);
        Ok(())
    }

    /// Resume paying for clicks (owner only)
    pub async fn resume(&self, id: CampaignId, caller: &AccountId) -> Result<()> {
        self.lock_owned_by(id, caller).await?.paused = false;
        info!("Campaign {} resumed", id);
        Ok(())
    }

    /// Pay `amount` to `publisher` outside the click pipeline.
    ///
    /// Fails with `InsufficientBudget` when the cap, allowance or balance cannot
    /// cover the amount.
    pub async fn payout(&self, id: CampaignId, publisher: &AccountId, amount: Amount) -> Result<PayoutOutcome> {
        if amount == 0 {
            return Err(AdNetworkError::InvalidAmount("payout must be greater than 0".to_string()));
        }
        let mut campaign = self.lock_campaign(id).await?;
        let remaining = campaign.remaining_budget();
        if amount > remaining {
            return Err(AdNetworkError::InsufficientBudget { needed: amount, remaining });
        }

        let escrowed = match self.pull(&campaign, amount).await? {
            Ok(escrowed) => escrowed,
            Err(_) => {
                let ledger = self.ledger_for(&campaign.token).await?;
                let approved = ledger.allowance(&campaign.owner, &self.escrow).await;
                let available = ledger.balance_of(&campaign.owner).await;
                return Err(AdNetworkError::InsufficientBudget {
                    needed: amount,
                    remaining: approved.min(available),
                });
            }
        };

        let outcome = self.forward(escrowed, publisher).await;
        campaign.spent += amount;
        Ok(outcome)
    }

    /// Check pause, rate limit and cap, then pull the click price into escrow.
    ///
    /// Shortfalls come back as `Err(SkipReason)` inside `Ok`; only ledger faults
    /// abort.
    pub(crate) async fn reserve(
        &self,
        campaign: &Campaign,
        now: Timestamp,
    ) -> Result<std::result::Result<Escrowed, SkipReason>> {
        if campaign.paused {
            return Ok(Err(SkipReason::Paused));
        }
        if campaign.clicks_in_window(now) >= campaign.max_clicks_per_window {
            return Ok(Err(SkipReason::RateLimited));
        }
        let price = self
            .tokens
            .read()
            .await
            .get(&campaign.token)
            .map(|t| t.price_per_click)
            .ok_or_else(|| AdNetworkError::TokenNotApproved(campaign.token.to_string()))?;
        if price > campaign.remaining_budget() {
            return Ok(Err(SkipReason::BudgetExhausted));
        }
        self.pull(campaign, price).await
    }

    async fn ledger_for(&self, token: &TokenId) -> Result<Arc<dyn FungibleAssetLedger>> {
        self.tokens
            .read()
            .await
            .get(token)
            .map(|t| t.ledger.clone())
            .ok_or_else(|| AdNetworkError::TokenNotApproved(token.to_string()))
    }

    async fn pull(&self, campaign: &Campaign, amount: Amount) -> Result<std::result::Result<Escrowed, SkipReason>> {
        let ledger = self.ledger_for(&campaign.token).await?;
        match ledger
            .transfer_from(&self.escrow, &campaign.owner, &self.escrow, amount)
            .await
        {
            Ok(()) => Ok(Ok(Escrowed {
                ledger,
                token: campaign.token.clone(),
                amount,
            })),
            Err(crate::LedgerError::InsufficientAllowance { .. }) => Ok(Err(SkipReason::InsufficientAllowance)),
            Err(crate::LedgerError::InsufficientBalance { .. }) => Ok(Err(SkipReason::InsufficientBalance)),
            Err(e) => Err(e.into()),
        }
    }

    /// Return escrowed funds to the campaign owner after an aborted settlement.
    ///
    /// If the transfer back fails the amount is held as a pending claim for the owner.
    pub(crate) async fn refund(&self, campaign: &Campaign, escrowed: Escrowed) {
        let Escrowed { ledger, token, amount } = escrowed;
        if let Err(e) = ledger.transfer(&self.escrow, &campaign.owner, amount).await {
            warn!(
                "Refund of {} {} to {} held as pending claim: {}",
                amount, token, campaign.owner, e
            );
            self.book_claim(&campaign.owner, token, amount).await;
        }
    }

    /// Forward escrowed funds; a failed transfer is booked as a pending claim
    pub(crate) async fn forward(&self, escrowed: Escrowed, publisher: &AccountId) -> PayoutOutcome {
        let Escrowed { ledger, token, amount } = escrowed;
        match ledger.transfer(&self.escrow, publisher, amount).await {
            Ok(()) => PayoutOutcome::Paid { token, amount },
            Err(e) => {
                warn!("Payout of {} {} to {} held as pending claim: {}", amount, token, publisher, e);
                self.book_claim(publisher, token.clone(), amount).await;
                PayoutOutcome::PendingClaim { token, amount }
            }
        }
    }

    async fn book_claim(&self, account: &AccountId, token: TokenId, amount: Amount) {
        let mut pending = self.pending.lock().await;
        let slot = pending.entry((account.clone(), token)).or_insert(0);
        *slot = slot.saturating_add(amount);
    }

    /// Count a settled click against the campaign
    pub(crate) fn record_settlement(campaign: &mut Campaign, now: Timestamp, paid: Amount) {
        campaign.record_settlement(now, paid);
    }

    /// Unclaimed payouts held for `publisher`
    pub async fn pending_claims(&self, publisher: &AccountId) -> Vec<(TokenId, Amount)> {
        self.pending
            .lock()
            .await
            .iter()
            .filter(|((account, _), _)| account == publisher)
            .map(|((_, token), amount)| (token.clone(), *amount))
            .collect()
    }

    /// Withdraw all pending payouts.
    ///
    /// Returns the tokens actually paid out. A token whose transfer fails stays
    /// pending and the remaining tokens are still attempted.
    pub async fn claim_pending(&self, account: &AccountId) -> Vec<(TokenId, Amount)> {
        let mut pending = self.pending.lock().await;
        let owed: Vec<(TokenId, Amount)> = pending
            .iter()
            .filter(|((holder, _), _)| holder == account)
            .map(|((_, token), amount)| (token.clone(), *amount))
            .collect();

        let mut claimed = Vec::with_capacity(owed.len());
        for (token, amount) in owed {
            let ledger = match self.ledger_for(&token).await {
                Ok(ledger) => ledger,
                Err(e) => {
                    warn!("Claim of {} {} by {} skipped: {}", amount, token, account, e);
                    continue;
                }
            };
            if let Err(e) = ledger.transfer(&self.escrow, account, amount).await {
                warn!("Claim of {} {} by {} stays pending: {}", amount, token, account, e);
                continue;
            }
            pending.remove(&(account.clone(), token.clone()));
            info!("{} claimed {} {}", account, amount, token);
            claimed.push((token, amount));
        }
        claimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::constants::FINNEY;
    use crate::ledger::InMemoryLedger;

    const PRICE: Amount = 10 * FINNEY;

    struct Fixture {
        budget: CampaignBudget,
        dai: Arc<InMemoryLedger>,
        clock: Arc<ManualClock>,
        admin: AccountId,
        owner: AccountId,
    }

    fn acct(name: &str) -> AccountId {
        AccountId::new(name)
    }

    fn params(budget: Amount, max_clicks: u32) -> CampaignParams {
        CampaignParams {
            budget,
            rate_limit_window: 3600,
            max_clicks_per_window: max_clicks,
            token: TokenId::new("DAI"),
            affiliate: None,
            format: "BANNER".to_string(),
            targeting_ref: None,
        }
    }

    async fn fixture() -> Fixture {
        let admin = acct("admin");
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let budget = CampaignBudget::new(
            acct("escrow"),
            CampaignConfig::default(),
            Arc::new(AccessControl::new(admin.clone())),
            Arc::new(AffiliateRegistry::new()),
            clock.clone(),
            Arc::new(EventBus::new()),
        );
        let dai = Arc::new(InMemoryLedger::new("DAI"));
        budget
            .approve_funding_token(&admin, TokenId::new("DAI"), dai.clone(), PRICE, true)
            .await
            .unwrap();

        let owner = acct("advertiser");
        dai.deposit(&owner, 1_000 * PRICE).await.unwrap();
        Fixture { budget, dai, clock, admin, owner }
    }

    #[tokio::test]
    async fn test_unapproved_token_rejected() {
        let f = fixture().await;
        let mut p = params(PRICE, 10);
        p.token = TokenId::new("WETH");
        assert!(matches!(
            f.budget.create_campaign(&f.owner, p).await,
            Err(AdNetworkError::TokenNotApproved(_))
        ));

        assert!(f
            .budget
            .approve_funding_token(&f.owner, TokenId::new("WETH"), f.dai.clone(), 1, true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reserve_and_forward() {
        let f = fixture().await;
        let id = f.budget.create_campaign(&f.owner, params(100 * PRICE, 10)).await.unwrap();
        f.dai.approve(&f.owner, f.budget.escrow(), 5 * PRICE).await.unwrap();

        let mut campaign = f.budget.lock_campaign(id).await.unwrap();
        let escrowed = f.budget.reserve(&campaign, f.clock.now()).await.unwrap().unwrap();
        assert_eq!(escrowed.amount(), PRICE);

        let publisher = acct("publisher");
        let outcome = f.budget.forward(escrowed, &publisher).await;
        CampaignBudget::record_settlement(&mut campaign, f.clock.now(), outcome.amount());
        drop(campaign);

        assert_eq!(outcome, PayoutOutcome::Paid { token: TokenId::new("DAI"), amount: PRICE });
        assert_eq!(f.dai.balance_of(&publisher).await, PRICE);
        let campaign = f.budget.campaign(id).await.unwrap();
        assert_eq!(campaign.spent, PRICE);
        assert_eq!(campaign.paid_clicks, 1);
    }

    #[tokio::test]
    async fn test_reserve_skips_without_allowance() {
        let f = fixture().await;
        let id = f.budget.create_campaign(&f.owner, params(100 * PRICE, 10)).await.unwrap();
        let campaign = f.budget.lock_campaign(id).await.unwrap();
        let reason = f.budget.reserve(&campaign, f.clock.now()).await.unwrap().unwrap_err();
        assert_eq!(reason, SkipReason::InsufficientAllowance);
    }

    #[tokio::test]
    async fn test_rate_limit_uses_fixed_window() {
        let f = fixture().await;
        let id = f.budget.create_campaign(&f.owner, params(100 * PRICE, 2)).await.unwrap();
        f.dai.approve(&f.owner, f.budget.escrow(), 100 * PRICE).await.unwrap();

        let mut campaign = f.budget.lock_campaign(id).await.unwrap();
        for _ in 0..2 {
            let now = f.clock.now();
            let escrowed = f.budget.reserve(&campaign, now).await.unwrap().unwrap();
            let outcome = f.budget.forward(escrowed, &acct("publisher")).await;
            CampaignBudget::record_settlement(&mut campaign, now, outcome.amount());
        }
        assert_eq!(
            f.budget.reserve(&campaign, f.clock.now()).await.unwrap().unwrap_err(),
            SkipReason::RateLimited
        );

        f.clock.advance(3600);
        assert!(f.budget.reserve(&campaign, f.clock.now()).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_budget_cap_and_top_up() {
        let f = fixture().await;
        let id = f.budget.create_campaign(&f.owner, params(PRICE, 10)).await.unwrap();
        f.dai.approve(&f.owner, f.budget.escrow(), 100 * PRICE).await.unwrap();

        f.budget.payout(id, &acct("publisher"), PRICE).await.unwrap();
        assert!(matches!(
            f.budget.payout(id, &acct("publisher"), PRICE).await,
            Err(AdNetworkError::InsufficientBudget { remaining: 0, .. })
        ));
        {
            let campaign = f.budget.lock_campaign(id).await.unwrap();
            assert_eq!(
                f.budget.reserve(&campaign, f.clock.now()).await.unwrap().unwrap_err(),
                SkipReason::BudgetExhausted
            );
        }

        assert!(f.budget.top_up_budget(id, &f.admin, PRICE).await.is_err());
        assert_eq!(f.budget.top_up_budget(id, &f.owner, PRICE).await.unwrap(), 2 * PRICE);
        f.budget.payout(id, &acct("publisher"), PRICE).await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_payout_reports_allowance_shortfall() {
        let f = fixture().await;
        let id = f.budget.create_campaign(&f.owner, params(100 * PRICE, 10)).await.unwrap();
        f.dai.approve(&f.owner, f.budget.escrow(), PRICE / 2).await.unwrap();

        match f.budget.payout(id, &acct("publisher"), PRICE).await {
            Err(AdNetworkError::InsufficientBudget { needed, remaining }) => {
                assert_eq!(needed, PRICE);
                assert_eq!(remaining, PRICE / 2);
            }
            other => panic!("unexpected payout result: {:?}", other),
        }
        assert_eq!(f.budget.campaign(id).await.unwrap().spent, 0);
    }

    #[tokio::test]
    async fn test_pause_skips_payout() {
        let f = fixture().await;
        let id = f.budget.create_campaign(&f.owner, params(100 * PRICE, 10)).await.unwrap();
        f.dai.approve(&f.owner, f.budget.escrow(), 100 * PRICE).await.unwrap();

        f.budget.pause(id, &f.owner).await.unwrap();
        {
            let campaign = f.budget.lock_campaign(id).await.unwrap();
            assert_eq!(
                f.budget.reserve(&campaign, f.clock.now()).await.unwrap().unwrap_err(),
                SkipReason::Paused
            );
        }
        f.budget.resume(id, &f.owner).await.unwrap();
        let campaign = f.budget.lock_campaign(id).await.unwrap();
        assert!(f.budget.reserve(&campaign, f.clock.now()).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_refund_returns_escrow_to_owner() {
        let f = fixture().await;
        let id = f.budget.create_campaign(&f.owner, params(100 * PRICE, 10)).await.unwrap();
        f.dai.approve(&f.owner, f.budget.escrow(), PRICE).await.unwrap();
        let before = f.dai.balance_of(&f.owner).await;

        let campaign = f.budget.lock_campaign(id).await.unwrap();
        let escrowed = f.budget.reserve(&campaign, f.clock.now()).await.unwrap().unwrap();
        assert_eq!(f.dai.balance_of(&f.owner).await, before - PRICE);
        f.budget.refund(&campaign, escrowed).await;
        assert_eq!(f.dai.balance_of(&f.owner).await, before);
    }

    #[tokio::test]
    async fn test_pending_claim_roundtrip() {
        let f = fixture().await;
        let publisher = acct("publisher");
        {
            let mut pending = f.budget.pending.lock().await;
            pending.insert((publisher.clone(), TokenId::new("DAI")), PRICE);
        }
        f.dai.deposit(f.budget.escrow(), PRICE).await.unwrap();

        assert_eq!(f.budget.pending_claims(&publisher).await, vec![(TokenId::new("DAI"), PRICE)]);
        let claimed = f.budget.claim_pending(&publisher).await;
        assert_eq!(claimed, vec![(TokenId::new("DAI"), PRICE)]);
        assert_eq!(f.dai.balance_of(&publisher).await, PRICE);
        assert!(f.budget.pending_claims(&publisher).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refund_is_held_for_owner() {
        let f = fixture().await;
        let id = f.budget.create_campaign(&f.owner, params(100 * PRICE, 10)).await.unwrap();
        f.dai.approve(&f.owner, f.budget.escrow(), PRICE).await.unwrap();
        let before = f.dai.balance_of(&f.owner).await;

        let campaign = f.budget.lock_campaign(id).await.unwrap();
        let escrowed = f.budget.reserve(&campaign, f.clock.now()).await.unwrap().unwrap();
        // Drain escrow so the transfer back cannot succeed
        f.dai.transfer(f.budget.escrow(), &acct("elsewhere"), PRICE).await.unwrap();
        f.budget.refund(&campaign, escrowed).await;

        assert_eq!(f.dai.balance_of(&f.owner).await, before - PRICE);
        assert_eq!(f.budget.pending_claims(&f.owner).await, vec![(TokenId::new("DAI"), PRICE)]);

        f.dai.deposit(f.budget.escrow(), PRICE).await.unwrap();
        assert_eq!(f.budget.claim_pending(&f.owner).await, vec![(TokenId::new("DAI"), PRICE)]);
        assert_eq!(f.dai.balance_of(&f.owner).await, before);
    }

    #[tokio::test]
    async fn test_claim_continues_past_failing_token() {
        let f = fixture().await;
        let publisher = acct("publisher");
        let aaa = Arc::new(InMemoryLedger::new("AAA"));
        f.budget
            .approve_funding_token(&f.admin, TokenId::new("AAA"), aaa.clone(), PRICE, true)
            .await
            .unwrap();
        {
            let mut pending = f.budget.pending.lock().await;
            pending.insert((publisher.clone(), TokenId::new("AAA")), PRICE);
            pending.insert((publisher.clone(), TokenId::new("DAI")), 2 * PRICE);
        }
        // Escrow holds DAI but no AAA, so the first token in order fails
        f.dai.deposit(f.budget.escrow(), 2 * PRICE).await.unwrap();

        let claimed = f.budget.claim_pending(&publisher).await;
        assert_eq!(claimed, vec![(TokenId::new("DAI"), 2 * PRICE)]);
        assert_eq!(f.dai.balance_of(&publisher).await, 2 * PRICE);
        assert_eq!(aaa.balance_of(&publisher).await, 0);
        assert_eq!(f.budget.pending_claims(&publisher).await, vec![(TokenId::new("AAA"), PRICE)]);

        aaa.deposit(f.budget.escrow(), PRICE).await.unwrap();
        assert_eq!(f.budget.claim_pending(&publisher).await, vec![(TokenId::new("AAA"), PRICE)]);
        assert!(f.budget.pending_claims(&publisher).await.is_empty());
    }
}
