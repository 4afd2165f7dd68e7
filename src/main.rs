use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futuresbot::config::{AppConfig, Credentials};
use futuresbot::execution::{PositionManager, TradingBot, TradingEvent};
use futuresbot::{ExchangeGateway, StrategyEngine};
use tokio::sync::{broadcast, watch};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "futuresbot")]
#[command(about = "Signal-driven USDT-M futures trading bot")]
struct Cli {
    /// Config file name without extension
    #[arg(long, default_value = "futuresbot")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trade the configured symbol until Ctrl+C (default)
    Run,
    /// Print the USDT balance and open positions
    Account,
    /// Evaluate every strategy once on recent klines
    Analyze {
        /// Symbol to analyze (defaults to the configured one)
        #[arg(long)]
        symbol: Option<String>,

        /// Closed candles to fetch
        #[arg(long, default_value_t = 200)]
        limit: u32,
    },
    /// Market-close every open position
    CloseAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config).context("failed to load configuration")?;
    if let Err(e) = config.trading.validate() {
        anyhow::bail!("invalid trading config: {}", e);
    }
    let credentials = Credentials::from_env();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, credentials).await,
        Command::Account => account(config, credentials).await,
        Command::Analyze { symbol, limit } => analyze(config, credentials, symbol, limit).await,
        Command::CloseAll => close_all(config, credentials).await,
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("futuresbot=info")),
        )
        .init();
}

async fn run(config: AppConfig, credentials: Credentials) -> Result<()> {
    if !credentials.is_complete() {
        tracing::warn!("⚠️  BINANCE_API_KEY / BINANCE_SECRET_KEY not set, signed calls will fail");
    }
    tracing::info!(
        "🚀 futuresbot starting on {} {} ({})",
        config.trading.symbol,
        config.trading.timeframe,
        if config.exchange.testnet { "testnet" } else { "live" }
    );

    let bot = TradingBot::new(&config, credentials)?;
    let event_log = tokio::spawn(log_events(bot.positions().subscribe()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("🛑 Ctrl+C received, shutting down"),
            Err(e) => tracing::error!("❌ Could not listen for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let result = bot.run(shutdown_rx).await;
    event_log.abort();
    result.context("trading bot stopped")
}

async fn log_events(mut events: broadcast::Receiver<TradingEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::info!(event = event.name(), "🔔 {}", json),
                Err(_) => tracing::info!(event = event.name(), "🔔 {:?}", event),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("⚠️  Event log skipped {} events", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn account(config: AppConfig, credentials: Credentials) -> Result<()> {
    let gateway = ExchangeGateway::new(&config.exchange, credentials)?;

    let balance = gateway
        .usdt_balance()
        .await
        .context("failed to fetch balance")?;
    println!(
        "USDT  total {:.2}  available {:.2}  used {:.2}",
        balance.total, balance.available, balance.used
    );

    let positions = gateway
        .open_positions()
        .await
        .context("failed to fetch positions")?;
    if positions.is_empty() {
        println!("No open positions");
    }
    for p in positions {
        println!(
            "{:<12} {:>12} @ {:<12} mark {:<12} uPnL {:>10.2} ({}x)",
            p.symbol, p.position_amt, p.entry_price, p.mark_price, p.un_realized_profit, p.leverage
        );
    }
    Ok(())
}

async fn analyze(
    config: AppConfig,
    credentials: Credentials,
    symbol: Option<String>,
    limit: u32,
) -> Result<()> {
    let gateway = ExchangeGateway::new(&config.exchange, credentials)?;
    let symbol = symbol
        .unwrap_or_else(|| config.trading.symbol.clone())
        .to_uppercase();
    let timeframe = &config.trading.timeframe;

    let mut candles = gateway
        .klines(&symbol, timeframe, limit.saturating_add(1))
        .await
        .with_context(|| format!("failed to fetch {} klines", symbol))?;
    // Still forming
    candles.pop();

    let engine = StrategyEngine::new();
    if candles.len() < engine.min_candles_required() {
        println!(
            "Only {} closed candles; some strategies need {}",
            candles.len(),
            engine.min_candles_required()
        );
    }

    let signals = engine.evaluate_all(&symbol, &candles);
    if signals.is_empty() {
        println!("No strategy fired on the last closed {} {} candle", symbol, timeframe);
    }
    for s in signals {
        println!(
            "{:<28} {:<5} confidence {:>3.0}  entry {:.4}  stop {:.4}  target {:.4}",
            s.strategy_name, s.direction, s.confidence, s.entry_price, s.stop_loss, s.take_profit
        );
    }
    Ok(())
}

async fn close_all(config: AppConfig, credentials: Credentials) -> Result<()> {
    let gateway = ExchangeGateway::new(&config.exchange, credentials)?;
    let manager = PositionManager::new(gateway, config.trading.clone());

    let tracked = manager
        .adopt_exchange_positions()
        .await
        .context("failed to fetch positions")?;
    if tracked == 0 {
        println!("No open positions");
        return Ok(());
    }

    let outcomes = manager.close_all_positions("manual close-all").await;
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(trade) => println!(
                "✅ {:<12} closed @ {}  PnL {:.2}",
                outcome.symbol, trade.exit_price, trade.realized_pnl
            ),
            Err(e) => {
                failed += 1;
                println!("❌ {:<12} {}", outcome.symbol, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} positions could not be closed", failed, outcomes.len());
    }
    Ok(())
}
