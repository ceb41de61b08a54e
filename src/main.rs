//! Prop-firm trade copier
//!
//! Mirrors a leader account's trades onto follower accounts and monitors
//! every account's prop-firm risk rules against a live quote feed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use prop_copier::models::{
    Account, OrderIntent, OrderSide, Platform, PropFirmRule, DAILY_LOSS_LIMIT, MAX_DRAWDOWN,
};
use prop_copier::simulation::{load_accounts, AccountSeeder};
use prop_copier::trading::{EngineConfig, RiskEvaluator};
use prop_copier::Engine;

/// Prop-firm trade copier CLI.
#[derive(Parser)]
#[command(name = "propcopier")]
#[command(about = "Replicate trades across prop-firm accounts and watch their risk rules", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON engine configuration; defaults apply when omitted
    #[arg(short, long, env = "PROPCOPIER_CONFIG")]
    config: Option<PathBuf>,

    /// JSON account book; simulated accounts are seeded when omitted
    #[arg(short, long, env = "PROPCOPIER_ACCOUNTS")]
    accounts: Option<PathBuf>,

    /// Number of simulated accounts to seed
    #[arg(long, default_value = "5")]
    count: usize,

    /// Seed for simulated accounts and quotes
    #[arg(long, env = "PROPCOPIER_SEED")]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the quote feed, ledger marking and replication
    Run {
        /// Leader account to replicate from
        #[arg(long, requires = "follower")]
        leader: Option<String>,

        /// Follower account (repeatable)
        #[arg(long)]
        follower: Vec<String>,

        /// Seconds between status reports
        #[arg(short, long, default_value = "10")]
        interval: u64,
    },

    /// List accounts with rule utilisation
    Accounts,

    /// Scripted replication run printing the audit trail
    Simulate,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            ref leader,
            ref follower,
            interval,
        } => {
            let accounts = account_book(&cli)?;
            let engine = Engine::new(config, accounts)
                .await
                .context("Failed to build engine")?;

            if let Some(leader) = leader {
                let link = engine.configure_replication(leader, follower).await?;
                engine.set_replication_active(link, true).await?;
                println!("Replicating {} -> {}", leader, follower.join(", "));
            }

            let tasks = engine.start_market_data(cli.seed);

            println!("\n=== Prop-Firm Trade Copier ===");
            println!("Accounts:         {}", engine.accounts().await.len());
            println!("Quote period:     {}ms", engine.config().quote_period_ms);
            println!("Report interval:  {}s", interval);
            println!("\nPress Ctrl+C to stop.\n");

            let mut report = tokio::time::interval(Duration::from_secs(interval.max(1)));
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received");
                        break;
                    }
                    _ = report.tick() => print_report(&engine).await,
                }
            }

            engine.shutdown().await;
            for task in tasks {
                task.abort();
            }
            print_report(&engine).await;
        }

        Commands::Accounts => {
            let accounts = account_book(&cli)?;
            let engine = Engine::new(config, accounts)
                .await
                .context("Failed to build engine")?;
            print_accounts(&engine).await;
        }

        Commands::Simulate => simulate(config).await?,

        Commands::Config => {
            println!("\n=== Engine Configuration ===\n");
            println!("Quote Feed:");
            println!("  Period:               {}ms", config.quote_period_ms);
            println!("  Price Decimals:       {}", config.price_decimals);
            println!("  Channel Capacity:     {}", config.quote_channel_capacity);
            for seed in &config.quotes {
                println!("  {:<4} open {:>10} change {:>8}", seed.symbol, seed.price, seed.change);
            }

            println!("\nExecution:");
            println!("  Simulated Latency:    {}ms", config.execution_latency_ms);
            println!("  Deadline:             {}ms", config.execution_timeout_ms);
            println!("  Idempotency Window:   {}s", config.idempotency_window_secs);
            println!("  Max Order Quantity:   {}", config.max_order_quantity);

            println!("\nRisk:");
            println!("  Risk per Contract:    ${}", config.risk_unit_per_contract);
            println!("  P&L Point Threshold:  ${}", config.pnl_point_threshold);
            println!("  P&L History Length:   {}", config.pnl_history_len);

            println!("\nPoint Values:");
            for (symbol, value) in &config.point_values {
                println!("  {:<4} ${}", symbol, value);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse config {}", path.display()))
}

fn account_book(cli: &Cli) -> Result<Vec<Account>> {
    if let Some(path) = &cli.accounts {
        return load_accounts(path);
    }
    let mut seeder = match cli.seed {
        Some(seed) => AccountSeeder::with_seed(seed),
        None => AccountSeeder::new(),
    };
    Ok(seeder.accounts(cli.count))
}

async fn print_report(engine: &Engine) {
    let quotes = engine
        .quotes()
        .await
        .iter()
        .map(|q| format!("{} {} ({}%)", q.symbol, q.price, q.change_percent.round_dp(2)))
        .collect::<Vec<_>>()
        .join(" | ");
    let stats = engine.global_stats().await;

    println!(
        "[{}] {} || Balance: ${:.2} | Cushion: ${:.2} | Accounts: {} | Breached: {}",
        chrono::Local::now().format("%H:%M:%S"),
        quotes,
        stats.total_balance,
        stats.total_cushion,
        stats.account_count,
        stats.breached_accounts
    );

    for link in engine.replication_links().await {
        for follower in &link.followers {
            if let Some(last) = &follower.last {
                println!(
                    "  {} {} -> {}: {:?} last #{} {}{}",
                    link.id,
                    link.leader_id,
                    follower.account_id,
                    follower.state,
                    last.sequence,
                    last.status,
                    last.reason.as_ref().map(|r| format!(" ({})", r)).unwrap_or_default()
                );
            }
        }
    }
}

async fn print_accounts(engine: &Engine) {
    println!(
        "\n{:<8} {:<10} {:<16} {:>12} {:>10}  RULES",
        "ID", "PLATFORM", "FIRM", "BALANCE", "CUSHION"
    );
    println!("{}", "-".repeat(96));

    for account in engine.accounts().await {
        let rules = RiskEvaluator::evaluate(&account)
            .iter()
            .map(|r| {
                format!(
                    "{} {}/{} ({}%, {})",
                    r.name,
                    r.current,
                    r.limit,
                    r.percentage.round_dp(1),
                    r.severity.as_str()
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        println!(
            "{:<8} {:<10} {:<16} {:>12} {:>10}  {}",
            account.id,
            account.platform,
            truncate(&account.firm, 16),
            account.balance,
            account.cushion,
            rules
        );
    }

    let stats = engine.global_stats().await;
    println!(
        "\nTotal balance: ${}  Total cushion: ${}  Breached: {}/{}",
        stats.total_balance, stats.total_cushion, stats.breached_accounts, stats.account_count
    );
}

/// Leader acc_1 with followers acc_2 and acc_3. The first round fills both
/// followers and pushes acc_3 over its daily loss limit; the second round
/// finds acc_3 suspended while acc_2 times out.
async fn simulate(config: EngineConfig) -> Result<()> {
    let accounts = vec![
        Account::new("acc_1", Platform::ProjectX, "TopstepX", dec!(50000)),
        Account::new("acc_2", Platform::Tradovate, "Apex", dec!(50000)),
        Account::with_rules(
            "acc_3",
            Platform::ProjectX,
            "TradeDay",
            dec!(50000),
            vec![
                PropFirmRule::with_current(DAILY_LOSS_LIMIT, dec!(1000), dec!(990)),
                PropFirmRule::new(MAX_DRAWDOWN, dec!(2500)),
            ],
        ),
    ];
    let deadline = config.execution_timeout();
    let engine = Engine::new(config, accounts)
        .await
        .context("Failed to build engine")?;

    let followers = vec!["acc_2".to_string(), "acc_3".to_string()];
    let link = engine.configure_replication("acc_1", &followers).await?;
    engine.set_replication_active(link, true).await?;

    println!("\n=== Round 1: leader BUY 2 ES ===");
    place(&engine, OrderSide::Buy).await?;

    println!("\n=== Round 2: acc_2 venue stalls past the deadline ===");
    engine
        .venue(Platform::Tradovate)
        .set_latency("acc_2", deadline * 2)
        .await;
    place(&engine, OrderSide::Sell).await?;

    engine.set_replication_active(link, false).await?;

    println!("\n=== Audit trail ===");
    for record in engine.replication_audit(link).await? {
        println!("{}", record);
    }

    println!("\n=== Follower status ===");
    let status = engine.replication_status(link).await?;
    for follower in &status.followers {
        println!("  {:<8} {:?}", follower.account_id, follower.state);
    }

    print_accounts(&engine).await;
    Ok(())
}

async fn place(engine: &Engine, side: OrderSide) -> Result<()> {
    let fill = engine
        .place_manual_order(OrderIntent::manual("acc_1", "ES", side, 2))
        .await?;
    if !fill.is_filled() {
        warn!(reason = ?fill.rejection, "Leader order rejected");
    }
    engine.flush_replication().await;
    Ok(())
}

/// Truncate a string with ellipsis if too long.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
