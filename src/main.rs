use autotrader::api::{run_bot, BinanceClient, TelegramClient};
use autotrader::commands::{CommandQueue, CommandRouter};
use autotrader::config::Settings;
use autotrader::db::TradeStore;
use autotrader::engine::{EngineState, TradingEngine};
use autotrader::execution::paper::default_quote_asset;
use autotrader::execution::{
    ExchangeClient, MarketDataGateway, PaperExchange, PositionLedger, TradeStats,
};
use autotrader::strategy::SupertrendStrategy;
use autotrader::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "autotrader")]
#[command(about = "Unattended Supertrend trading bot for Binance futures", long_about = None)]
struct Cli {
    /// Settings file (defaults to ./autotrader.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulate fills against live market data
    #[arg(long, conflicts_with = "live")]
    dry_run: bool,

    /// Send real orders to the exchange
    #[arg(long)]
    live: bool,

    /// Start trading right away instead of waiting for /runbot
    #[arg(long)]
    autostart: bool,

    /// Do not start the Telegram command bot
    #[arg(long)]
    no_telegram: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if cli.live {
        settings.trading.dry_run = false;
    } else if cli.dry_run {
        settings.trading.dry_run = true;
    }

    tracing::info!("🚀 AutoTrader starting");

    // Trade history
    let store = open_store(&settings).await;
    let ledger = PositionLedger::with_positions(restore_positions(store.as_ref()).await);

    // Market data and order entry
    let binance = Arc::new(BinanceClient::new(settings.binance_config())?);
    let gateway: Arc<dyn MarketDataGateway> = binance.clone();
    let exchange: Arc<dyn ExchangeClient> = if settings.trading.dry_run {
        let quote = settings
            .paper
            .quote_asset
            .clone()
            .unwrap_or_else(|| default_quote_asset(&settings.trading.pairs));
        Arc::new(PaperExchange::new(
            gateway.clone(),
            &settings.trading.candle_interval,
            &quote,
            settings.paper.initial_balance,
        ))
    } else {
        if !binance.has_credentials() {
            return Err("live trading needs BINANCE_API_KEY and BINANCE_API_SECRET".into());
        }
        binance.clone()
    };

    let strategy = Arc::new(SupertrendStrategy::new(settings.strategy_config()));
    let engine = TradingEngine::new(
        settings.engine_config(),
        gateway,
        exchange.clone(),
        strategy,
        ledger,
        store,
    );

    log_configuration(&settings);

    // Command interface
    let (queue, handle) = CommandQueue::new(
        CommandRouter::new(engine.clone(), exchange),
        settings.telegram.queue_capacity,
    );
    let dispatcher = tokio::spawn(queue.run());

    let telegram_task = match (&settings.telegram.token, cli.no_telegram) {
        (Some(token), false) if !token.is_empty() => {
            let client = TelegramClient::new(
                token,
                Duration::from_secs(settings.telegram.poll_timeout_secs),
            )?;
            let allowed = settings.telegram.allowed_chat_ids.clone();
            Some(tokio::spawn(run_bot(client, handle, allowed)))
        }
        _ => {
            tracing::warn!("Telegram bot disabled, commands are unavailable");
            drop(handle);
            None
        }
    };

    // Without a command channel nobody could ever send /runbot
    if cli.autostart || telegram_task.is_none() {
        engine.start()?;
    }

    tracing::info!("\nPress Ctrl+C to stop...\n");
    tokio::signal::ctrl_c().await?;
    tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");

    if engine.state() != EngineState::Stopped {
        engine.stop()?;
        engine.wait_stopped().await;
    }

    if let Some(task) = telegram_task {
        task.abort();
    }
    dispatcher.abort();

    let history = engine.ledger().history();
    if !history.is_empty() {
        TradeStats::from_history(&history).print();
    }

    tracing::info!("👋 AutoTrader stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("autotrader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn open_store(settings: &Settings) -> Option<TradeStore> {
    let url = settings.database.url.as_deref()?;

    match TradeStore::new(url).await {
        Ok(store) => {
            tracing::info!("Trade history persisted to {}", url);
            Some(store)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to open {}: {}. Trade history will not be persisted",
                url,
                e
            );
            None
        }
    }
}

async fn restore_positions(store: Option<&TradeStore>) -> Vec<autotrader::execution::Position> {
    let Some(store) = store else {
        return Vec::new();
    };

    match store.load_positions().await {
        Ok(positions) => {
            let open = positions.iter().filter(|p| p.is_open()).count();
            tracing::info!(
                "📂 Restored {} positions ({} open) from the trade store",
                positions.len(),
                open
            );
            positions
        }
        Err(e) => {
            tracing::error!("Failed to load positions: {}", e);
            Vec::new()
        }
    }
}

fn log_configuration(settings: &Settings) {
    let mode = if settings.trading.dry_run {
        "dry run"
    } else {
        "LIVE"
    };

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Mode: {}", mode);
    tracing::info!("  Pairs: {}", settings.trading.pairs.join(", "));
    tracing::info!(
        "  Candles: {} every {}s",
        settings.trading.candle_interval,
        settings.trading.tick_interval_secs
    );
    tracing::info!("  Stake: {:.2} per entry", settings.strategy.stake_amount);
    if settings.trading.dry_run {
        tracing::info!("  Paper balance: {:.2}", settings.paper.initial_balance);
    }
}
