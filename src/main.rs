use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt};

use spot_core::core::{Asset, NotificationSink, Order, OwnerId, Side, Symbol};
use spot_core::ledger::AccountType;
use spot_core::notify::FanoutNotifier;
use spot_core::{
    ChannelNotifier, Config, LogNotifier, MarkPriceBoard, MemoryStore, OrderLifecycleManager,
    Sweeper,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let config = match std::env::var("CORE_CONFIG") {
        Ok(path) => Config::load(&PathBuf::from(path))?,
        Err(_) => Config::load_default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.app.log_filter));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    tracing::info!("🦀 {} starting ({} pairs)", config.app.name, config.pairs.len());

    let store = Arc::new(MemoryStore::new());
    let board = Arc::new(MarkPriceBoard::new());
    let (channel, events) = ChannelNotifier::bounded(1024);
    let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogNotifier), Arc::new(channel)];
    let notifier = Arc::new(FanoutNotifier::new(sinks));

    let manager = Arc::new(OrderLifecycleManager::assemble(
        &config,
        store.clone(),
        board.clone(),
        notifier,
    )?);

    if let Some(pair) = config.pairs.first() {
        seed_demo(&manager, &board, &pair.symbol, &pair.base_asset, &pair.quote_asset)?;
        let depth = manager.depth(&pair.symbol, None);
        println!("{}", serde_json::to_string_pretty(&depth)?);
    } else {
        tracing::warn!("⚠️ No trading pairs configured, nothing to seed");
    }

    let sweeper = Sweeper::new(manager.clone(), board.clone(), config.sweeps.clone()).spawn();
    tracing::info!("⏳ Running sweeps. Ctrl-C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = async {
            while let Ok(event) = events.recv_async().await {
                tracing::debug!("event: {}", serde_json::to_string(&event).unwrap_or_default());
            }
        } => {}
    }

    sweeper.shutdown().await;
    tracing::info!(
        "👋 Shutdown: {} orders, {} trades on record",
        store.order_count(),
        store.trade_count()
    );
    Ok(())
}

/// Two accounts and a small crossing book so the sweeps have work to do.
fn seed_demo(
    manager: &OrderLifecycleManager,
    board: &MarkPriceBoard,
    symbol: &Symbol,
    base: &Asset,
    quote: &Asset,
) -> anyhow::Result<()> {
    let ledger = manager.ledger();
    let maker = ledger.open_account(OwnerId::new("demo-maker"), AccountType::Spot)?;
    let taker = ledger.open_account(OwnerId::new("demo-taker"), AccountType::Spot)?;
    ledger.credit(maker, base.clone(), 10.into())?;
    ledger.credit(maker, quote.clone(), 1_000_000.into())?;
    ledger.credit(taker, quote.clone(), 1_000_000.into())?;

    board.set(symbol.clone(), 100.into());
    for (i, side) in [(0, Side::Sell), (1, Side::Sell), (0, Side::Buy), (1, Side::Buy)] {
        let offset = rust_decimal::Decimal::from(i + 1);
        let price = match side {
            Side::Sell => rust_decimal::Decimal::from(100) + offset,
            Side::Buy => rust_decimal::Decimal::from(100) - offset,
        };
        manager.create_order(Order::new_limit(maker, symbol.clone(), side, 1.into(), price))?;
    }

    let order = Order::new_market(taker, symbol.clone(), Side::Buy, 1.into()).with_client_order_id("demo-taker-1");
    let outcome = manager.create_order(order)?;
    tracing::info!(
        "📈 Demo market buy {} filled {} @ {}",
        outcome.order.id,
        outcome.order.executed_quantity,
        outcome.order.avg_price
    );
    Ok(())
}
