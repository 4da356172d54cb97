//! Execution layer - Order lifecycle and background sweeps
//!
//! `OrderLifecycleManager` is the only entry point that takes client orders:
//! it validates against the catalog, runs the risk checks, reserves funds and
//! hands the order to the matching engine. Cancellation, expiry, stop
//! triggering and margin enforcement also go through here.

mod sweeper;

pub use sweeper::{Sweeper, SweeperHandle};

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::catalog::TradingPairCatalog;
use crate::core::{
    AccountId, BookDepth, Config, Error, Notification, NotificationSink, Order, OrderId,
    OrderStatus, OwnerId, PriceFeed, Result, Side, Store, Symbol, Trade,
};
use crate::core::config::EngineConfig;
use crate::engine::{MatchingEngine, SubmitOutcome, TradeRecorder};
use crate::ledger::{Account, AccountLedger};
use crate::position::{Position, PositionTracker};
use crate::risk::{Reservation, RiskEngine};

pub struct OrderLifecycleManager {
    config: EngineConfig,
    catalog: Arc<TradingPairCatalog>,
    ledger: Arc<AccountLedger>,
    positions: Arc<PositionTracker>,
    risk: Arc<RiskEngine>,
    engine: Arc<MatchingEngine>,
    recorder: Arc<TradeRecorder>,
    store: Arc<dyn Store>,
    feed: Arc<dyn PriceFeed>,
    notifier: Arc<dyn NotificationSink>,
}

impl OrderLifecycleManager {
    /// Wire a full core from configuration and the three outer interfaces.
    /// Pairs and every ledger mutation are saved to `store`.
    pub fn assemble(
        config: &Config,
        store: Arc<dyn Store>,
        feed: Arc<dyn PriceFeed>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let catalog = Arc::new(TradingPairCatalog::persisted(config.pairs.iter().cloned(), store.clone())?);
        let ledger = Arc::new(AccountLedger::with_store(store.clone()));
        let positions = Arc::new(PositionTracker::new());
        let recorder = Arc::new(TradeRecorder::new(ledger.clone(), positions.clone(), store.clone()));
        let engine = Arc::new(MatchingEngine::new(
            catalog.clone(),
            ledger.clone(),
            recorder.clone(),
            store.clone(),
            notifier.clone(),
        ));
        let risk = Arc::new(RiskEngine::new(
            config.risk.clone(),
            ledger.clone(),
            positions.clone(),
            feed.clone(),
        ));
        info!(
            "🦀 Core assembled: {} pairs, slippage {}",
            config.pairs.len(),
            config.engine.market_slippage
        );
        Ok(Self {
            config: config.engine.clone(),
            catalog,
            ledger,
            positions,
            risk,
            engine,
            recorder,
            store,
            feed,
            notifier,
        })
    }

    pub fn catalog(&self) -> &Arc<TradingPairCatalog> {
        &self.catalog
    }

    pub fn ledger(&self) -> &Arc<AccountLedger> {
        &self.ledger
    }

    pub fn positions(&self) -> &Arc<PositionTracker> {
        &self.positions
    }

    pub fn risk(&self) -> &Arc<RiskEngine> {
        &self.risk
    }

    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.engine
    }

    pub fn recorder(&self) -> &Arc<TradeRecorder> {
        &self.recorder
    }

    /// Mark price, then the best opposite quote, then one.
    pub fn reference_price(&self, symbol: &Symbol, side: Side) -> Decimal {
        self.feed
            .mark_price(symbol)
            .or_else(|| match side {
                Side::Buy => self.engine.best_ask(symbol),
                Side::Sell => self.engine.best_bid(symbol),
            })
            .unwrap_or(Decimal::ONE)
    }

    /// Validate, risk-check, reserve and submit. A validation or risk
    /// failure is returned as `Err` with nothing reserved; the order is kept
    /// on record as REJECTED.
    pub fn create_order(&self, mut order: Order) -> Result<SubmitOutcome> {
        if order.status != OrderStatus::Pending {
            return Err(Error::InvalidStateTransition {
                order: order.id,
                from: order.status,
                action: "submit",
            });
        }

        let reservation = match self.admit(&mut order) {
            Ok(r) => r,
            Err(e) => {
                if e.is_rejection() {
                    warn!("🚫 Order {} rejected: {}", order.id, e);
                } else {
                    error!("❌ Order {} failed admission: {}", order.id, e);
                }
                order.reject(e.to_string());
                if let Err(save) = self.store.save_order(&order) {
                    error!("rejected order {} not saved: {}", order.id, save);
                }
                return Err(e);
            }
        };

        info!(
            "📝 Accepted {} {} {} {} @ {:?} reserved {} {}",
            order.symbol, order.order_type, order.side, order.quantity, order.price, reservation.amount, reservation.asset
        );

        let (id, account) = (order.id, order.account_id);
        match self.engine.submit(order) {
            Ok(outcome) => {
                debug!(
                    "📤 {} {} resting={} trades={}",
                    id,
                    outcome.order.status,
                    outcome.is_resting(),
                    outcome.trades.len()
                );
                Ok(outcome)
            }
            Err(e) => {
                error!("❌ Submission of {} failed: {}", id, e);
                if let Err(unlock) = self.ledger.unlock(account, reservation.asset, reservation.amount) {
                    error!("reservation of {} not released: {}", id, unlock);
                }
                if let Ok(Some(mut stored)) = self.store.load_order(&id) {
                    stored.locked_amount = Decimal::ZERO;
                    stored.reject(e.to_string());
                    if let Err(save) = self.store.save_order(&stored) {
                        error!("rejected order {} not saved: {}", id, save);
                    }
                }
                Err(e)
            }
        }
    }

    fn admit(&self, order: &mut Order) -> Result<Reservation> {
        let account = self.ledger.account(&order.account_id)?;
        if !account.active {
            return Err(Error::Validation(format!("account {} is not active", account.id)));
        }

        let reference = self.reference_price(&order.symbol, order.side);
        let pair = self.catalog.normalize_order(order, reference)?;
        let reservation = Reservation::for_order(order, &pair, reference, self.config.market_slippage);
        self.risk.validate_order_risk(order, &reservation)?;

        self.ledger
            .lock(order.account_id, reservation.asset.clone(), reservation.amount)?;
        order.locked_amount = reservation.amount;

        if let Err(e) = self.store.save_order(order) {
            self.ledger
                .unlock(order.account_id, reservation.asset.clone(), reservation.amount)?;
            order.locked_amount = Decimal::ZERO;
            return Err(e);
        }
        Ok(reservation)
    }

    /// Cancel a live order on behalf of `requester`, who must own its account.
    pub fn cancel_order(&self, order_id: &OrderId, requester: &OwnerId) -> Result<Order> {
        let order = self.order(order_id)?;
        let owner = self.ledger.owner_of(&order.account_id)?;
        if owner != *requester {
            return Err(Error::Validation(format!(
                "order {} is not owned by {}",
                order_id, requester
            )));
        }
        if !order.can_be_cancelled() {
            return Err(Error::InvalidStateTransition {
                order: order.id,
                from: order.status,
                action: "cancel",
            });
        }

        let Some(live) = self.engine.cancel(&order.symbol, order_id) else {
            // Filled or cancelled since it was loaded
            let current = self.order(order_id)?;
            return Err(Error::InvalidStateTransition {
                order: current.id,
                from: current.status,
                action: "cancel",
            });
        };
        self.close_out(live, OrderStatus::Cancelled)
    }

    /// Release what a removed order still holds and record its final status.
    fn close_out(&self, mut order: Order, status: OrderStatus) -> Result<Order> {
        let pair = self.catalog.get(&order.symbol)?;
        let released = order.locked_amount;
        if released > Decimal::ZERO {
            self.ledger
                .unlock(order.account_id, pair.reserve_asset(order.side).clone(), released)?;
            order.locked_amount = Decimal::ZERO;
        }
        order.transition(status);
        self.store.save_order(&order)?;

        let event = match status {
            OrderStatus::Expired => Notification::Expired {
                order_id: order.id,
                account_id: order.account_id,
                symbol: order.symbol.clone(),
            },
            _ => Notification::Cancelled {
                order_id: order.id,
                account_id: order.account_id,
                symbol: order.symbol.clone(),
                released,
            },
        };
        self.notifier.notify(event);
        info!("🗑️ {} {} released {}", status, order.id, released);
        Ok(order)
    }

    /// Expire every live order past its expiry. Returns how many expired.
    pub fn process_expired_orders(&self) -> usize {
        let candidates = match self.store.expired_orders(Utc::now()) {
            Ok(c) => c,
            Err(e) => {
                error!("❌ Expiry sweep could not list orders: {}", e);
                return 0;
            }
        };

        let mut expired = 0;
        for candidate in candidates {
            let Some(live) = self.engine.cancel(&candidate.symbol, &candidate.id) else {
                debug!("expiry: {} no longer live", candidate.id);
                continue;
            };
            match self.close_out(live, OrderStatus::Expired) {
                Ok(_) => expired += 1,
                Err(e) => error!("❌ Expiry of {} failed: {}", candidate.id, e),
            }
        }
        if expired > 0 {
            info!("⌛ Expired {} orders", expired);
        }
        expired
    }

    /// Fire the parked stops on `symbol` that `price` reaches.
    pub fn process_triggered_stop_orders(&self, symbol: &Symbol, price: Decimal) -> Vec<SubmitOutcome> {
        let outcomes = match self.engine.trigger_stops(symbol, price) {
            Ok(o) => o,
            Err(e) => {
                error!("❌ Stop sweep on {} failed: {}", symbol, e);
                return Vec::new();
            }
        };
        for outcome in &outcomes {
            if let Some(e) = &outcome.failure {
                error!("❌ Triggered order {} failed: {}", outcome.order.id, e);
            }
        }
        outcomes
    }

    /// Refresh every margin account and act on margin calls and
    /// liquidations. Returns the number of accounts flagged.
    pub fn process_margin_checks(&self) -> usize {
        let mut flagged = 0;
        for account in self.ledger.accounts().into_iter().filter(|a| a.margin_enabled) {
            if let Err(e) = self.risk.refresh_account(&account.id) {
                error!("❌ Margin refresh of {} failed: {}", account.id, e);
                continue;
            }
            let assessment = match self.risk.assess(&account.id) {
                Ok(a) => a,
                Err(e) => {
                    error!("❌ Margin assessment of {} failed: {}", account.id, e);
                    continue;
                }
            };

            if assessment.liquidation {
                flagged += 1;
                let cancelled = self.cancel_all_by_account(&account.id);
                error!(
                    "🚨 Liquidating {} at level {}: {} orders cancelled",
                    account.id, assessment.margin_level, cancelled.len()
                );
                self.notifier.notify(Notification::Liquidation {
                    account_id: account.id,
                    margin_level: assessment.margin_level,
                    cancelled_orders: cancelled.len(),
                });
            } else if assessment.margin_call {
                flagged += 1;
                warn!("⚠️ Margin call for {} at level {}", account.id, assessment.margin_level);
                self.notifier.notify(Notification::MarginCall {
                    account_id: account.id,
                    margin_level: assessment.margin_level,
                });
            }
        }
        flagged
    }

    pub fn cancel_all_by_account(&self, account: &AccountId) -> Vec<Order> {
        match self.store.orders_by_account(account) {
            Ok(orders) => self.cancel_all(orders),
            Err(e) => {
                error!("❌ Orders of {} not listed: {}", account, e);
                Vec::new()
            }
        }
    }

    pub fn cancel_all_by_symbol(&self, symbol: &Symbol) -> Vec<Order> {
        match self.store.active_orders(Some(symbol)) {
            Ok(orders) => self.cancel_all(orders),
            Err(e) => {
                error!("❌ Active orders on {} not listed: {}", symbol, e);
                Vec::new()
            }
        }
    }

    fn cancel_all(&self, orders: Vec<Order>) -> Vec<Order> {
        orders
            .into_iter()
            .filter(Order::can_be_cancelled)
            .filter_map(|o| {
                let live = self.engine.cancel(&o.symbol, &o.id)?;
                self.close_out(live, OrderStatus::Cancelled)
                    .inspect_err(|e| error!("❌ Cancel of {} failed: {}", o.id, e))
                    .ok()
            })
            .collect()
    }

    pub fn order(&self, id: &OrderId) -> Result<Order> {
        self.store.load_order(id)?.ok_or(Error::OrderNotFound(*id))
    }

    pub fn active_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<Order>> {
        self.store.active_orders(symbol)
    }

    pub fn orders_by_account(&self, account: &AccountId) -> Result<Vec<Order>> {
        self.store.orders_by_account(account)
    }

    pub fn trades_for_order(&self, id: &OrderId) -> Result<Vec<Trade>> {
        self.recorder.trades_for_order(id)
    }

    /// Trade history of one account, as committed.
    pub fn trades_for_account(&self, account: &AccountId) -> Result<Vec<Trade>> {
        self.store.trades_for_account(account)
    }

    /// Committed position, as the store holds it.
    pub fn position(&self, account: &AccountId, symbol: &Symbol) -> Result<Option<Position>> {
        self.store.load_position(account, symbol)
    }

    pub fn positions_for_account(&self, account: &AccountId) -> Result<Vec<Position>> {
        self.store.positions_for_account(account)
    }

    /// Load an account, its balances and its positions back from the store
    /// into the ledger and tracker, replacing whatever they held for it.
    pub fn restore_account(&self, id: &AccountId) -> Result<Account> {
        let record = self.store.load_account(id)?.ok_or(Error::AccountNotFound(*id))?;
        let positions = self.store.positions_for_account(id)?;
        self.ledger.restore(record);
        let restored = self.positions.restore(positions);
        info!("♻️ Restored account {} with {} positions", id, restored);
        self.ledger.account(id)
    }

    /// Book depth; `levels` defaults to the configured depth.
    pub fn depth(&self, symbol: &Symbol, levels: Option<usize>) -> BookDepth {
        self.engine
            .depth(symbol, levels.unwrap_or(self.config.depth_levels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TradingPair;
    use crate::core::{Asset, RiskCheck, RiskPolicy, TimeInForce};
    use crate::feeds::MarkPriceBoard;
    use crate::ledger::AccountType;
    use crate::notify::ChannelNotifier;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    struct Harness {
        manager: OrderLifecycleManager,
        board: Arc<MarkPriceBoard>,
        store: Arc<MemoryStore>,
        events: flume::Receiver<Notification>,
    }

    fn sym() -> Symbol {
        Symbol::new("BTCUSDT")
    }

    fn usdt() -> Asset {
        Asset::new("USDT")
    }

    fn btc() -> Asset {
        Asset::new("BTC")
    }

    fn config(risk: RiskPolicy) -> Config {
        Config {
            risk,
            pairs: vec![TradingPair::new("BTCUSDT", "BTC", "USDT").with_increments(dec!(0.01), dec!(0.001))],
            ..Config::default()
        }
    }

    fn harness_with(risk: RiskPolicy) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let board = Arc::new(MarkPriceBoard::new());
        let (notifier, events) = ChannelNotifier::unbounded();
        let manager =
            OrderLifecycleManager::assemble(&config(risk), store.clone(), board.clone(), Arc::new(notifier)).unwrap();
        Harness { manager, board, store, events }
    }

    /// Balances mix assets, so a base-only seller would always trip the
    /// concentration check.
    fn harness() -> Harness {
        harness_with(RiskPolicy {
            max_concentration: dec!(1000000),
            ..RiskPolicy::default()
        })
    }

    impl Harness {
        fn account(&self, owner: &str, kind: AccountType, quote: Decimal, base: Decimal) -> AccountId {
            let ledger = self.manager.ledger();
            let id = ledger.open_account(OwnerId::new(owner), kind).unwrap();
            if quote > Decimal::ZERO {
                ledger.credit(id, usdt(), quote).unwrap();
            }
            if base > Decimal::ZERO {
                ledger.credit(id, btc(), base).unwrap();
            }
            id
        }

        fn balance(&self, account: AccountId, asset: Asset) -> (Decimal, Decimal) {
            let b = self.manager.ledger().balance(&account, &asset).unwrap();
            assert!(b.is_consistent());
            (b.available, b.locked)
        }

        fn limit(&self, account: AccountId, side: Side, qty: Decimal, price: Decimal) -> SubmitOutcome {
            self.manager
                .create_order(Order::new_limit(account, sym(), side, qty, price))
                .unwrap()
        }

        fn drain(&self) -> Vec<Notification> {
            self.events.try_iter().collect()
        }
    }

    #[test]
    fn test_create_rests_and_reserves() {
        let h = harness();
        let a = h.account("alice", AccountType::Spot, dec!(1000), dec!(0));
        let outcome = h.limit(a, Side::Buy, dec!(1), dec!(900));

        assert_eq!(outcome.order.status, OrderStatus::Open);
        assert_eq!(outcome.order.locked_amount, dec!(900));
        assert_eq!(h.balance(a, usdt()), (dec!(100), dec!(900)));
        assert_eq!(h.manager.depth(&sym(), None).bids.len(), 1);
        assert_eq!(h.manager.order(&outcome.order.id).unwrap().status, OrderStatus::Open);
    }

    #[test]
    fn test_rejection_reserves_nothing() {
        let h = harness_with(RiskPolicy {
            max_position_size: dec!(500),
            max_concentration: dec!(1),
            ..RiskPolicy::default()
        });
        let a = h.account("alice", AccountType::Spot, dec!(1000), dec!(0));
        let order = Order::new_limit(a, sym(), Side::Buy, dec!(1), dec!(900));
        let id = order.id;

        let err = h.manager.create_order(order).unwrap_err();
        assert!(matches!(err, Error::RiskLimitExceeded { check: RiskCheck::PositionSize, .. }));
        assert_eq!(h.balance(a, usdt()), (dec!(1000), dec!(0)));
        assert_eq!(h.manager.order(&id).unwrap().status, OrderStatus::Rejected);

        let poor = h.account("bob", AccountType::Spot, dec!(10), dec!(0));
        let err = h
            .manager
            .create_order(Order::new_limit(poor, sym(), Side::Buy, dec!(1), dec!(100)))
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert_eq!(h.balance(poor, usdt()), (dec!(10), dec!(0)));
    }

    #[test]
    fn test_inactive_account_rejected() {
        let h = harness();
        let a = h.account("alice", AccountType::Spot, dec!(1000), dec!(0));
        h.manager.ledger().set_active(&a, false).unwrap();
        let err = h
            .manager
            .create_order(Order::new_limit(a, sym(), Side::Buy, dec!(1), dec!(100)))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_market_buy_reference_uses_best_ask() {
        let h = harness();
        let seller = h.account("sam", AccountType::Spot, dec!(0), dec!(1));
        h.limit(seller, Side::Sell, dec!(1), dec!(100));
        assert_eq!(h.manager.reference_price(&sym(), Side::Buy), dec!(100));

        let buyer = h.account("bea", AccountType::Spot, dec!(1000), dec!(0));
        let outcome = h
            .manager
            .create_order(Order::new_market(buyer, sym(), Side::Buy, dec!(1)))
            .unwrap();
        assert_eq!(outcome.order.status, OrderStatus::Filled);
        // Slippage headroom returned after the fill
        assert_eq!(h.balance(buyer, usdt()), (dec!(900), dec!(0)));
        assert_eq!(h.balance(buyer, btc()), (dec!(0.999), dec!(0)));

        h.board.set(sym(), dec!(120));
        assert_eq!(h.manager.reference_price(&sym(), Side::Buy), dec!(120));
    }

    #[test]
    fn test_cancel_releases_and_checks_owner() {
        let h = harness();
        let a = h.account("alice", AccountType::Spot, dec!(1000), dec!(0));
        let id = h.limit(a, Side::Buy, dec!(1), dec!(900)).order.id;
        h.drain();

        let err = h.manager.cancel_order(&id, &OwnerId::new("mallory")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(h.balance(a, usdt()), (dec!(100), dec!(900)));

        let cancelled = h.manager.cancel_order(&id, &OwnerId::new("alice")).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(h.balance(a, usdt()), (dec!(1000), dec!(0)));
        assert!(h.manager.depth(&sym(), None).bids.is_empty());
        assert!(matches!(
            h.drain().as_slice(),
            [Notification::Cancelled { released, .. }] if *released == dec!(900)
        ));

        let again = h.manager.cancel_order(&id, &OwnerId::new("alice")).unwrap_err();
        assert!(matches!(
            again,
            Error::InvalidStateTransition { from: OrderStatus::Cancelled, .. }
        ));
        assert_eq!(h.balance(a, usdt()), (dec!(1000), dec!(0)));
        assert!(h.drain().is_empty());
    }

    #[test]
    fn test_cancel_filled_order_fails_without_mutation() {
        let h = harness();
        let buyer = h.account("bea", AccountType::Spot, dec!(1000), dec!(0));
        let seller = h.account("sam", AccountType::Spot, dec!(0), dec!(1));
        let bid = h.limit(buyer, Side::Buy, dec!(1), dec!(900)).order.id;
        h.limit(seller, Side::Sell, dec!(1), dec!(900));

        let before = h.manager.order(&bid).unwrap();
        assert_eq!(before.status, OrderStatus::Filled);
        let err = h.manager.cancel_order(&bid, &OwnerId::new("bea")).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { from: OrderStatus::Filled, .. }));
        assert_eq!(h.manager.order(&bid).unwrap().updated_at, before.updated_at);
    }

    #[test]
    fn test_expiry_sweep() {
        let h = harness();
        let a = h.account("alice", AccountType::Spot, dec!(1000), dec!(0));
        let order = Order::new_limit(a, sym(), Side::Buy, dec!(1), dec!(500))
            .with_expiry(Utc::now() - Duration::seconds(1));
        let id = h.manager.create_order(order).unwrap().order.id;
        h.limit(a, Side::Buy, dec!(1), dec!(400));
        h.drain();

        assert_eq!(h.manager.process_expired_orders(), 1);
        assert_eq!(h.manager.order(&id).unwrap().status, OrderStatus::Expired);
        assert_eq!(h.balance(a, usdt()), (dec!(600), dec!(400)));
        assert!(matches!(h.drain().as_slice(), [Notification::Expired { order_id, .. }] if *order_id == id));

        // Already handled
        assert_eq!(h.manager.process_expired_orders(), 0);
    }

    #[test]
    fn test_stop_sweep_fires_at_mark() {
        let h = harness();
        let maker = h.account("mia", AccountType::Spot, dec!(1000), dec!(0));
        h.limit(maker, Side::Buy, dec!(1), dec!(95));

        let holder = h.account("hal", AccountType::Spot, dec!(0), dec!(1));
        let stop = Order::new_stop_loss(holder, sym(), Side::Sell, dec!(1), dec!(96));
        let stop = h.manager.create_order(stop).unwrap();
        assert_eq!(stop.order.status, OrderStatus::Open);
        assert_eq!(h.balance(holder, btc()), (dec!(0), dec!(1)));

        assert!(h.manager.process_triggered_stop_orders(&sym(), dec!(97)).is_empty());
        let outcomes = h.manager.process_triggered_stop_orders(&sym(), dec!(96));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].order.status, OrderStatus::Filled);
        assert_eq!(outcomes[0].order.triggered_from, Some(crate::core::OrderType::StopLoss));
        assert_eq!(h.balance(holder, usdt()), (dec!(94.905), dec!(0)));
    }

    #[test]
    fn test_margin_sweep_liquidates() {
        let h = harness();
        let trader = h.account("tom", AccountType::Margin, dec!(1000), dec!(0));
        let resting = h.limit(trader, Side::Buy, dec!(1), dec!(5)).order.id;
        h.manager
            .ledger()
            .update_risk_metrics(&trader, dec!(0), dec!(1000), dec!(500))
            .unwrap();
        h.drain();

        // Refresh recomputes margin from (empty) positions first
        assert_eq!(h.manager.process_margin_checks(), 0);

        let seller = h.account("sam", AccountType::Spot, dec!(0), dec!(100));
        let buy = Order::new_limit(trader, sym(), Side::Buy, dec!(90), dec!(10));
        h.manager.create_order(buy).unwrap();
        h.limit(seller, Side::Sell, dec!(90), dec!(10));
        // Mark collapses far below entry
        h.board.set(sym(), dec!(0.01));
        h.drain();

        let account = h.manager.risk().refresh_account(&trader).unwrap();
        assert!(account.unrealized_pnl < Decimal::ZERO);
        assert_eq!(h.manager.process_margin_checks(), 1);
        assert_eq!(h.manager.order(&resting).unwrap().status, OrderStatus::Cancelled);
        let events = h.drain();
        assert!(events.iter().any(|e| matches!(e, Notification::Liquidation { cancelled_orders: 1, .. })));
    }

    #[test]
    fn test_bulk_cancel_and_queries() {
        let h = harness();
        let a = h.account("alice", AccountType::Spot, dec!(1000), dec!(2));
        h.limit(a, Side::Buy, dec!(1), dec!(100));
        h.limit(a, Side::Buy, dec!(1), dec!(90));
        let ioc = Order::new_limit(a, sym(), Side::Sell, dec!(1), dec!(200)).with_time_in_force(TimeInForce::Ioc);
        let ioc = h.manager.create_order(ioc).unwrap();
        assert_eq!(ioc.order.status, OrderStatus::Rejected);
        assert_eq!(h.balance(a, btc()), (dec!(2), dec!(0)));

        assert_eq!(h.manager.active_orders(Some(&sym())).unwrap().len(), 2);
        assert_eq!(h.manager.orders_by_account(&a).unwrap().len(), 3);

        let cancelled = h.manager.cancel_all_by_symbol(&sym());
        assert_eq!(cancelled.len(), 2);
        assert!(h.manager.active_orders(None).unwrap().is_empty());
        assert_eq!(h.balance(a, usdt()), (dec!(1000), dec!(0)));
        assert_eq!(h.store.order_count(), 3);
        assert!(h.manager.trades_for_order(&ioc.order.id).unwrap().is_empty());
    }

    #[test]
    fn test_unpriced_sell_passes_small_position_limit() {
        let h = harness_with(RiskPolicy {
            max_position_size: dec!(50),
            max_concentration: dec!(1000000),
            ..RiskPolicy::default()
        });
        h.board.set(sym(), dec!(100));
        let buyer = h.account("bea", AccountType::Spot, dec!(1000), dec!(0));
        h.limit(buyer, Side::Buy, dec!(0.4), dec!(100));

        let seller = h.account("sid", AccountType::Spot, dec!(0), dec!(2));
        let outcome = h
            .manager
            .create_order(Order::new_market(seller, sym(), Side::Sell, dec!(2)))
            .unwrap();
        assert_eq!(outcome.order.status, OrderStatus::PartiallyFilled);
        assert_eq!(outcome.order.executed_quantity, dec!(0.4));
        assert_eq!(h.balance(seller, btc()), (dec!(1.6), dec!(0)));
    }

    #[test]
    fn test_ledger_and_pairs_saved_to_store() {
        let h = harness();
        let a = h.account("alice", AccountType::Spot, dec!(1000), dec!(0));
        h.limit(a, Side::Buy, dec!(1), dec!(900));

        let record = h.store.load_account(&a).unwrap().unwrap();
        assert_eq!(record.account, h.manager.ledger().account(&a).unwrap());
        assert_eq!(record.balances, h.manager.ledger().balances(&a).unwrap());
        let row = &record.balances[0];
        assert_eq!((row.available, row.locked), (dec!(100), dec!(900)));

        h.manager.ledger().set_active(&a, false).unwrap();
        assert!(!h.store.load_account(&a).unwrap().unwrap().account.active);
        assert_eq!(h.store.load_pair(&sym()).unwrap().unwrap().tick_size, dec!(0.01));
    }

    #[test]
    fn test_restore_account_from_store() {
        let h = harness();
        let seller = h.account("sam", AccountType::Spot, dec!(0), dec!(1));
        h.limit(seller, Side::Sell, dec!(1), dec!(100));
        let buyer = h.account("bea", AccountType::Spot, dec!(1000), dec!(0));
        h.limit(buyer, Side::Buy, dec!(1), dec!(100));

        assert_eq!(h.manager.trades_for_account(&buyer).unwrap().len(), 1);
        let stored = h.manager.position(&buyer, &sym()).unwrap().unwrap();
        assert_eq!(stored.quantity, dec!(1));
        assert_eq!(Some(stored.clone()), h.manager.positions().position(&buyer, &sym()));
        assert_eq!(h.manager.positions_for_account(&seller).unwrap()[0].quantity, dec!(-1));

        // A second core over the same store starts empty until restored
        let (notifier, _events) = ChannelNotifier::unbounded();
        let fresh = OrderLifecycleManager::assemble(
            &config(RiskPolicy::default()),
            h.store.clone(),
            Arc::new(MarkPriceBoard::new()),
            Arc::new(notifier),
        )
        .unwrap();
        assert!(matches!(fresh.ledger().account(&buyer), Err(Error::AccountNotFound(_))));

        let account = fresh.restore_account(&buyer).unwrap();
        assert_eq!(account, h.manager.ledger().account(&buyer).unwrap());
        assert_eq!(fresh.ledger().balances(&buyer).unwrap(), h.manager.ledger().balances(&buyer).unwrap());
        assert_eq!(fresh.positions().position(&buyer, &sym()), Some(stored));
        assert!(matches!(fresh.restore_account(&AccountId::new()), Err(Error::AccountNotFound(_))));
    }
}
