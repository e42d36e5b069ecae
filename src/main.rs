//! Lay-betting engine for exchange horse racing win markets.

use clap::{Parser, Subcommand};
use lay_bot::client::ExchangeClient;
use lay_bot::config::Config;
use lay_bot::control::{EngineHandle, ExchangeSessionCheck};
use lay_bot::engine::Engine;
use lay_bot::persistence::{HttpBlobStore, ObjectStore, StateStore};
use lay_bot::pipeline::ExchangeSubmitter;
use lay_bot::scheduler::{trading_date, trading_day_bounds};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lay-bot")]
#[command(about = "Autonomous lay-betting engine for exchange win markets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine and serve the control API
    Run {
        /// Force dry-run mode regardless of config or persisted state
        #[arg(long)]
        dry_run: bool,
    },
    /// List today's win markets for the configured countries
    Markets {
        /// Number of markets to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show login state and account balance
    Status,
    /// List settled bets over the last N days
    Results {
        #[arg(short, long, default_value = "1")]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run { dry_run } => run_engine(config, dry_run).await,
        Commands::Markets { limit } => show_markets(config, limit).await,
        Commands::Status => show_status(config).await,
        Commands::Results { days } => show_results(config, days).await,
    }
}

async fn run_engine(config: Config, force_dry_run: bool) -> anyhow::Result<()> {
    tracing::info!("starting lay engine");

    let client = ExchangeClient::new(config.exchange.clone())?;

    let blob: Option<Arc<dyn ObjectStore>> = match &config.persistence.blob_base_url {
        Some(base) => Some(Arc::new(HttpBlobStore::new(
            base.clone(),
            config.persistence.blob_auth_token.clone(),
        )?)),
        None => None,
    };
    let store = Arc::new(StateStore::new(config.persistence.state_path.clone(), blob));

    // Cold-start recovery: the freshest persisted document wins over the
    // config file for hot-swappable settings.
    let today = trading_date(chrono::Utc::now());
    let mut engine = match store.load().await {
        Ok(Some(document)) => document.into_engine(today),
        Ok(None) => Engine::new(config.engine.clone(), today),
        Err(e) => {
            // Unreadable local state is fatal on startup: betting blind
            // over a day that may already hold bets is never safe.
            anyhow::bail!("failed to load persisted state: {e}");
        }
    };
    if force_dry_run {
        engine.config.dry_run = true;
        tracing::warn!("dry-run forced from the command line");
    }
    if engine.config.dry_run {
        tracing::warn!("running in DRY RUN mode, no orders will be placed");
    }

    let handle = Arc::new(EngineHandle::new(
        Arc::new(Mutex::new(engine)),
        Arc::new(client.betting.clone()),
        Arc::new(ExchangeSubmitter {
            betting: client.betting.clone(),
        }),
        Arc::new(ExchangeSessionCheck {
            client: client.clone(),
        }),
        store,
    ));

    let start = handle.start().await;
    if start.status != "ok" {
        tracing::error!(
            message = start.message.as_deref().unwrap_or("unknown"),
            "engine failed to start; the control API stays up for retry"
        );
    }

    let api_handle = handle.clone();
    let bind = config.api.bind.clone();
    tokio::select! {
        result = lay_bot::api::start_api(api_handle, &bind) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    handle.stop().await;
    Ok(())
}

async fn show_markets(config: Config, limit: usize) -> anyhow::Result<()> {
    let client = ExchangeClient::new(config.exchange)?;
    let now = chrono::Utc::now();
    let (from, to) = trading_day_bounds(now);
    let markets = client
        .betting
        .list_win_markets(from, to, &config.engine.countries)
        .await?;

    println!(
        "\n{} win markets today ({})\n",
        markets.len(),
        config.engine.countries.join(",")
    );
    println!("{:<12} {:<20} {:<28} {:>8}", "Market", "Venue", "Race", "Mins");
    println!("{}", "-".repeat(72));
    for market in markets.iter().take(limit) {
        println!(
            "{:<12} {:<20} {:<28} {:>8}",
            market.market_id,
            market.venue,
            market.market_name,
            market.minutes_to_off(now)
        );
    }
    Ok(())
}

async fn show_status(config: Config) -> anyhow::Result<()> {
    let client = ExchangeClient::new(config.exchange)?;
    client.session.ensure_session().await?;
    let balance = client.account.get_balance().await?;

    println!("\nAuthenticated: yes");
    println!("Balance: {balance:.2}");
    Ok(())
}

async fn show_results(config: Config, days: i64) -> anyhow::Result<()> {
    let client = ExchangeClient::new(config.exchange)?;
    let to = chrono::Utc::now();
    let from = to - chrono::Duration::days(days);
    let cleared = client.betting.list_cleared(from, to).await?;

    println!("\n{} settled bets over the last {days} day(s)\n", cleared.len());
    println!(
        "{:<14} {:<12} {:>8} {:>8} {:>10} {:<8}",
        "Bet", "Market", "Size", "Price", "Commission", "Outcome"
    );
    println!("{}", "-".repeat(66));
    for bet in &cleared {
        println!(
            "{:<14} {:<12} {:>8} {:>8} {:>10} {:<8}",
            bet.bet_id,
            bet.market_id,
            bet.size_settled,
            bet.avg_price_matched,
            bet.commission,
            bet.outcome
        );
    }
    Ok(())
}
