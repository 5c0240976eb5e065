//! adquorum node - operator CLI for the click-validation network

use adquorum_core::constants::{FINNEY, TOKEN};
use adquorum_core::*;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "adquorum-node",
    about = "adquorum - staked validator pools attesting ad clicks",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Network configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file and print the effective settings
    CheckConfig,

    /// Print the default configuration as TOML
    DefaultConfig {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run an in-memory simulation of staking, clicks and rewards
    Simulate {
        /// Validator pools to create
        #[arg(long, default_value = "4")]
        pools: usize,

        /// Distinct clicks to attest
        #[arg(long, default_value = "20")]
        clicks: usize,

        /// Stake per pool in whole tokens
        #[arg(long, default_value = "1000")]
        stake: u64,

        /// Funding allowance in whole tokens granted by the advertiser
        #[arg(long, default_value = "5")]
        allowance: u64,

        /// Percentage of the first pool's stake to slash at the end
        #[arg(long)]
        slash_percent: Option<u8>,

        /// Print settlement records as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("adquorum_core={},adquorum_node={}", log_level, log_level))
        .init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::CheckConfig => check_config(&config),
        Commands::DefaultConfig { output } => default_config(output),
        Commands::Simulate {
            pools,
            clicks,
            stake,
            allowance,
            slash_percent,
            json,
        } => simulate(config, pools, clicks, stake, allowance, slash_percent, json).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<NetworkConfig> {
    match path {
        Some(path) => NetworkConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => NetworkConfig::load_default().context("Failed to load default config"),
    }
}

fn check_config(config: &NetworkConfig) -> Result<()> {
    config.validate().context("Configuration is invalid")?;
    println!("✅ Configuration valid");
    println!("   Quorum:           {} pools", config.consensus.quorum);
    println!("   Dedup key:        {:?}", config.consensus.dedup_key);
    println!("   Assignment:       {} pools per publisher", config.assignment.subset_size);
    println!("   Lock duration:    {}s", config.staking.lock_duration_secs);
    println!("   Reward per click: {}", format_tokens(config.rewards.reward_per_click));
    println!("   Mint cap:         {}", format_tokens(config.rewards.mint_cap));
    Ok(())
}

fn default_config(output: Option<PathBuf>) -> Result<()> {
    let config = NetworkConfig::default();
    match output {
        Some(path) => {
            config
                .save_to_file(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Default configuration written to {}", path.display());
        }
        None => print!("{}", config.to_toml_string().context("Failed to render config")?),
    }
    Ok(())
}

fn format_tokens(amount: Amount) -> String {
    format!("{}.{:018}", amount / TOKEN, amount % TOKEN)
}

async fn simulate(
    config: NetworkConfig,
    pool_count: usize,
    clicks: usize,
    stake: u64,
    allowance: u64,
    slash_percent: Option<u8>,
    json: bool,
) -> Result<()> {
    let quorum = config.consensus.quorum;
    if pool_count < quorum {
        bail!("Need at least {} pools to reach quorum, got {}", quorum, pool_count);
    }
    if matches!(slash_percent, Some(p) if p > 100) {
        bail!("Slash percentage must be between 0 and 100");
    }

    let admin = AccountId::new("admin");
    let minter = AccountId::new("adquorum-rewards");
    let native = Arc::new(InMemoryLedger::new("EAD"));
    native.grant_minter(minter.clone()).await;
    let clock = Arc::new(ManualClock::new(1_700_000_000));

    let network = AdNetwork::builder(config)
        .native_ledger(native.clone())
        .clock(clock.clone())
        .admin(admin.clone())
        .platform(AccountId::new("platform"))
        .reward_minter(minter)
        .build()
        .context("Failed to build network")?;
    network.grant_slasher(&admin, admin.clone()).await?;

    info!("🚀 Creating {} validator pools with {} tokens each", pool_count, stake);
    let stake = Amount::from(stake) * TOKEN;
    let mut validators = HashMap::new();
    for i in 0..pool_count {
        let validator = AccountId::new(format!("validator{}", i + 1));
        let pool = network.create_pool(format!("pool-{}", i + 1), vec![validator.clone()]).await;
        let delegate = AccountId::new(format!("delegate{}", i + 1));
        native.deposit(&delegate, stake).await?;
        native.approve(&delegate, network.staking_custody(), stake).await?;
        network.stake(pool, stake, &delegate).await?;
        network
            .set_pool_metadata(
                pool,
                &serde_json::json!({
                    "endpoint": format!("https://validator{}.example", i + 1),
                    "address": validator.as_str(),
                })
                .to_string(),
                &validator,
            )
            .await?;
        validators.insert(pool, validator);
    }

    let dai = Arc::new(InMemoryLedger::new("DAI"));
    network
        .approve_funding_token(&admin, TokenId::new("DAI"), dai.clone(), 10 * FINNEY, true)
        .await?;

    let advertiser = AccountId::new("advertiser");
    let publisher = AccountId::new("publisher");
    let allowance = Amount::from(allowance) * TOKEN;
    dai.deposit(&advertiser, allowance).await?;
    dai.approve(&advertiser, network.escrow_account(), allowance).await?;
    let campaign = network
        .create_campaign(
            &advertiser,
            CampaignParams {
                budget: allowance,
                rate_limit_window: 3600,
                max_clicks_per_window: 10,
                token: TokenId::new("DAI"),
                affiliate: None,
                format: "BANNER".to_string(),
                targeting_ref: None,
            },
        )
        .await?;

    let assigned = network.assigned_pools(&publisher).await;
    if assigned.len() < quorum {
        bail!("Only {} pools assigned to {}, quorum is {}", assigned.len(), publisher, quorum);
    }
    info!("📋 Publisher {} is witnessed by {} pools", publisher, assigned.len());

    let (mut paid, mut skipped) = (0usize, 0usize);
    for i in 0..clicks {
        let ip = format!("10.0.{}.{}", i / 256, i % 256);
        for pool in assigned.iter().take(quorum) {
            let validator = validators
                .get(pool)
                .cloned()
                .context("Assigned pool has no validator")?;
            let attestation = ClickAttestation::new(
                campaign,
                publisher.clone(),
                "CLICKDATA",
                fingerprint(ip.as_bytes()),
                *pool,
                validator,
            );
            if let AttestationOutcome::Settled(record) = network.submit_attestation(attestation).await? {
                if record.payout.is_funded() {
                    paid += 1;
                } else {
                    skipped += 1;
                }
                if json {
                    println!("{}", serde_json::to_string(&record)?);
                }
            }
        }
        clock.advance(60);
    }

    if let Some(percent) = slash_percent {
        let pool = assigned[0];
        let total = network.pool_total(pool).await?;
        let amount = total * Amount::from(percent) / 100;
        if amount > 0 {
            let removed = network.slash(pool, amount, &admin).await?;
            warn!("⚔️  Slashed pool {} by {}", pool, format_tokens(removed));
        }
    }

    println!("✅ Simulation complete");
    println!("   Clicks settled:   {} paid, {} unpaid", paid, skipped);
    println!("   Publisher earned: {} DAI", format_tokens(dai.balance_of(&publisher).await));
    println!("   Rewards minted:   {} EAD", format_tokens(network.total_minted().await));
    for descriptor in network.assigned_pool_metadata(&publisher).await {
        println!(
            "   Pool {}: {} EAD staked",
            descriptor.id,
            format_tokens(descriptor.total_stake)
        );
    }
    Ok(())
}
