//! tdk-terminal entry point.
//!
//! This binary is intentionally thin: it wires the engine together — sim
//! gateway, session, cascade, poller, coordinator — and plays the role the
//! presentation layer would, subscribing to the event bus and rendering
//! events as log lines. A GUI replaces only this consumer loop; the engine
//! underneath is identical.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

use tdk_broker_sim::{SimConfig, SimGateway};
use tdk_config::Config;
use tdk_gateway::{BrokerGateway, Endpoint, LiveTick};
use tdk_ledger::TradeLedger;
use tdk_md::{DataSourceCascade, LiveFeed, SyntheticQuotes, YahooChartProvider};
use tdk_orders::{default_bracket_prices, OrderCoordinator, OrderTicket};
use tdk_poller::{PollerConfig, PollingScheduler, Watchlist};
use tdk_schemas::{OrderRequest, Side, TerminalEvent};
use tdk_session::{SessionConfig, SessionManager};

#[derive(Parser)]
#[command(name = "tdk")]
#[command(about = "tradedesk terminal core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine: connect, poll, stream events to the log.
    Run {
        /// Config file (YAML); defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Submit one demo bracket order once fresh data arrives.
        #[arg(long, default_value_t = false)]
        demo_order: bool,
    },

    /// Print the persisted trade history and positions.
    History {
        /// Config file (YAML); defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; deployments inject env directly.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Run { config, demo_order } => run(load_config(config)?, demo_order).await,
        Commands::History { config } => history(load_config(config)?),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(&path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(Config::load_default()),
    }
}

async fn run(cfg: Config, demo_order: bool) -> Result<()> {
    let ledger = Arc::new(StdMutex::new(
        TradeLedger::open(&cfg.ledger.history_path, &cfg.ledger.positions_path)
            .context("opening trade ledger")?,
    ));

    let (bus, _keepalive) = broadcast::channel::<TerminalEvent>(4096);

    let sim = Arc::new(SimGateway::new(SimConfig::default()));
    seed_demo_feed(&sim, &cfg.polling.watchlist);

    let session = SessionManager::new(
        Arc::clone(&sim) as Arc<dyn BrokerGateway>,
        Arc::clone(&ledger),
        bus.clone(),
        SessionConfig {
            connect_timeout: cfg.connection.connect_timeout(),
        },
    );

    let endpoint = Endpoint::new(
        cfg.connection.host.clone(),
        cfg.connection.port,
        cfg.connection.client_id,
    );
    if let Err(err) = session.connect(&endpoint).await {
        warn!(error = %err, "gateway unavailable; continuing in degraded mode");
    }

    let cascade = Arc::new(DataSourceCascade::new(
        Some(Arc::new(session.clone()) as Arc<dyn LiveFeed>),
        Arc::new(YahooChartProvider::with_base_url(
            cfg.data.secondary_base_url.clone(),
        )),
        SyntheticQuotes::new(),
    ));

    let watchlist = Watchlist::new(cfg.polling.watchlist.iter().cloned());
    let poller = PollingScheduler::new(
        cascade,
        Arc::new(session.clone()),
        bus.clone(),
        watchlist.clone(),
        PollerConfig {
            interval: cfg.polling.interval(),
            ..PollerConfig::default()
        },
    )
    .spawn();

    let coordinator = OrderCoordinator::new(session.clone());
    let demo_symbol = cfg.polling.watchlist.first().cloned();
    if demo_order {
        if let Some(symbol) = &demo_symbol {
            coordinator.select_symbol(symbol).await;
        }
    }
    let mut demo_pending = demo_order && demo_symbol.is_some();

    info!("terminal engine running; ctrl-c to exit");
    let mut events = bus.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let TerminalEvent::Quote(quote) = &event {
                        coordinator.observe_quote(quote).await;
                    }
                    render(&event);
                    if demo_pending && coordinator.trading_enabled().await {
                        demo_pending = false;
                        place_demo_bracket(&coordinator, &sim).await;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event consumer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    poller.stop().await;
    session.disconnect().await;
    Ok(())
}

/// Give the sim gateway a live book so the cascade's top layer answers
/// while "connected" in demo mode.
fn seed_demo_feed(sim: &SimGateway, watchlist: &[String]) {
    let seed = SyntheticQuotes::new();
    for symbol in watchlist {
        let q = seed.quote(symbol);
        sim.set_last_trade(LiveTick {
            symbol: q.symbol,
            last: q.last,
            bid: q.bid,
            ask: q.ask,
            volume: q.volume,
            prev_close: Some(q.last - q.change),
        });
    }
    sim.set_account_tag("NetLiquidation", 125_450.00);
    sim.set_account_tag("TotalCashValue", 15_230.00);
    sim.set_account_tag("BuyingPower", 45_690.00);
}

/// One showcase bracket against the cached quote, immediately filled by
/// the sim so the ledger and event stream light up.
async fn place_demo_bracket(coordinator: &OrderCoordinator, sim: &SimGateway) {
    let Some(quote) = coordinator.current_quote().await else {
        return;
    };
    let (take_profit, stop_loss) = default_bracket_prices(quote.last);
    let req = OrderRequest::bracket(
        quote.symbol.clone(),
        Side::Buy,
        10,
        quote.last,
        take_profit,
        stop_loss,
    );
    match coordinator.submit(&req).await {
        Ok(OrderTicket::Bracket { parent, .. }) => {
            info!(parent, symbol = quote.symbol, "demo bracket submitted");
            sim.apply_fill(parent, 10, quote.last, 1.0);
        }
        Ok(OrderTicket::Single(order_id)) => {
            info!(order_id, "demo order submitted");
        }
        Err(err) => warn!(error = %err, "demo bracket failed"),
    }
}

fn render(event: &TerminalEvent) {
    match event {
        TerminalEvent::Quote(q) => info!(
            symbol = %q.symbol,
            last = q.last,
            change = %format!("{:+.2} ({:+.2}%)", q.change, q.percent_change),
            source = q.source.as_str(),
            "quote"
        ),
        TerminalEvent::Portfolio(p) => info!(
            total_value = p.total_value,
            cash = p.cash_balance,
            buying_power = p.buying_power,
            positions = p.positions.len(),
            "portfolio"
        ),
        TerminalEvent::OpenOrders { orders } => {
            if !orders.is_empty() {
                info!(open = orders.len(), "open orders");
            }
        }
        TerminalEvent::Executions { fills } => {
            if !fills.is_empty() {
                info!(executions = fills.len(), "recent executions");
            }
        }
        TerminalEvent::OrderStatusChanged { order_id, status } => {
            info!(order_id, ?status, "order status");
        }
        TerminalEvent::Trade(t) => info!(
            symbol = %t.symbol,
            side = t.side.as_str(),
            quantity = t.quantity,
            price = t.price,
            "trade recorded"
        ),
        TerminalEvent::News(n) => info!(provider = %n.provider, headline = %n.headline, "news"),
        TerminalEvent::Connection { state } => info!(state = state.as_str(), "connection"),
        TerminalEvent::PollError { context, message } => {
            warn!(context = %context, message = %message, "poll error");
        }
    }
}

fn history(cfg: Config) -> Result<()> {
    let ledger = TradeLedger::open(&cfg.ledger.history_path, &cfg.ledger.positions_path)
        .context("opening trade ledger")?;

    println!("{} recorded trades", ledger.entries().len());
    for entry in ledger.entries() {
        println!(
            "{}  {:<4} {:>6} {:<6} @ {:>10.2}  commission {:>6.2}",
            entry.executed_at.format("%Y-%m-%d %H:%M:%S"),
            entry.side.as_str(),
            entry.quantity,
            entry.symbol,
            entry.price,
            entry.commission,
        );
    }
    if !ledger.positions().is_empty() {
        println!("\nnet positions:");
        for (symbol, qty) in ledger.positions() {
            println!("  {symbol:<6} {qty:>8}");
        }
    }
    Ok(())
}
