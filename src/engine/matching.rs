use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::settlement::TradeRecorder;
use crate::catalog::{TradingPair, TradingPairCatalog};
use crate::core::{
    BookDepth, Error, Notification, NotificationSink, Order, OrderId, OrderStatus, OrderType,
    Result, Side, Store, Symbol, TimeInForce, Trade,
};
use crate::ledger::AccountLedger;
use crate::orderbook::OrderBook;

/// What happened to a submitted order
#[derive(Debug)]
pub struct SubmitOutcome {
    /// Final state of the order after matching
    pub order: Order,
    pub trades: Vec<Trade>,
    /// Set when settlement or persistence failed part-way; fills before the
    /// failure stand, nothing after it was applied.
    pub failure: Option<Error>,
}

impl SubmitOutcome {
    pub fn is_resting(&self) -> bool {
        matches!(self.order.status, OrderStatus::Open | OrderStatus::PartiallyFilled)
            && self.order.time_in_force == TimeInForce::Gtc
            && self.failure.is_none()
            && !self.order.remaining_quantity.is_zero()
    }
}

/// One book per symbol, each behind its own mutex. Every matching loop for a
/// symbol (submission, cancellation, stop triggering) runs with that mutex
/// held, so a symbol has exactly one active writer.
pub struct MatchingEngine {
    books: RwLock<HashMap<Symbol, Arc<Mutex<OrderBook>>>>,
    catalog: Arc<TradingPairCatalog>,
    ledger: Arc<AccountLedger>,
    recorder: Arc<TradeRecorder>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn NotificationSink>,
}

impl MatchingEngine {
    pub fn new(
        catalog: Arc<TradingPairCatalog>,
        ledger: Arc<AccountLedger>,
        recorder: Arc<TradeRecorder>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            catalog,
            ledger,
            recorder,
            store,
            notifier,
        }
    }

    fn book(&self, symbol: &Symbol) -> Arc<Mutex<OrderBook>> {
        if let Some(book) = self.books.read().get(symbol) {
            return Arc::clone(book);
        }
        let mut books = self.books.write();
        Arc::clone(
            books
                .entry(symbol.clone())
                .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new(symbol.clone())))),
        )
    }

    fn existing_book(&self, symbol: &Symbol) -> Option<Arc<Mutex<OrderBook>>> {
        self.books.read().get(symbol).cloned()
    }

    /// Match `order` against the book, rest any GTC limit remainder and
    /// release reservations that can no longer be used. Stop orders are
    /// parked until triggered.
    ///
    /// The order's reservation must already be held in the ledger and
    /// recorded in `locked_amount`.
    pub fn submit(&self, order: Order) -> Result<SubmitOutcome> {
        let pair = self.catalog.get(&order.symbol)?;
        let book = self.book(&order.symbol);
        let mut book = book.lock();

        let mut order = order;
        order.sequence = book.next_sequence();
        order.submitted_at = Some(Utc::now());
        order.transition(OrderStatus::Submitted);

        if order.is_stop() {
            order.transition(OrderStatus::Open);
            self.store.save_order(&order)?;
            info!(
                "⏸️ Parked {} {} {} stop@{:?} id={}",
                order.order_type, order.side, order.quantity, order.stop_price, order.id
            );
            book.park_stop(order.clone());
            return Ok(SubmitOutcome {
                order,
                trades: Vec::new(),
                failure: None,
            });
        }

        Ok(self.execute(&mut book, &pair, order))
    }

    /// The matching loop proper. Caller holds the book lock.
    fn execute(&self, book: &mut OrderBook, pair: &TradingPair, mut order: Order) -> SubmitOutcome {
        let limit = match order.order_type {
            OrderType::Market => None,
            _ => order.price,
        };

        if order.time_in_force == TimeInForce::Fok {
            let available = book.crossing_liquidity(order.side, limit, order.remaining_quantity);
            if available < order.remaining_quantity {
                self.release(pair, &mut order);
                order.reject(format!(
                    "fill-or-kill: only {} of {} available",
                    available, order.remaining_quantity
                ));
                warn!("🚫 FOK {} rejected: insufficient liquidity", order.id);
                return self.finish(order, Vec::new(), None);
            }
        }

        let mut trades = Vec::new();
        let mut failure = None;

        while order.remaining_quantity > Decimal::ZERO {
            let Some(maker) = book.best_order(order.side.opposite()).cloned() else {
                break;
            };
            let Some(price) = maker.price else {
                failure = Some(Error::MatchingEngine(format!("resting order {} has no price", maker.id)));
                break;
            };
            if let Some(limit) = limit {
                let crosses = match order.side {
                    Side::Buy => limit >= price,
                    Side::Sell => limit <= price,
                };
                if !crosses {
                    break;
                }
            }

            let mut quantity = order.remaining_quantity.min(maker.remaining_quantity);
            if order.order_type == OrderType::Market && order.side == Side::Buy {
                // Bounded by the quote still reserved
                let affordable = pair.floor_quantity(order.locked_amount / price);
                quantity = quantity.min(affordable);
                if quantity <= Decimal::ZERO {
                    debug!("market buy {} exhausted its reserve at {}", order.id, price);
                    break;
                }
            }

            match self.recorder.record(pair, &order, &maker, quantity, price, Utc::now()) {
                Ok(settlement) => {
                    order = settlement.taker;
                    book.settle_resting(settlement.maker);
                    for trade in [&settlement.taker_trade, &settlement.maker_trade] {
                        self.notifier.notify(Notification::Fill {
                            order_id: trade.order_id,
                            account_id: trade.account_id,
                            symbol: trade.symbol.clone(),
                            side: trade.side,
                            quantity: trade.quantity,
                            price: trade.price,
                            is_maker: trade.is_maker,
                        });
                    }
                    trades.push(settlement.taker_trade);
                    trades.push(settlement.maker_trade);
                }
                Err(e) => {
                    error!("❌ Settlement failed for {} against {}: {}", order.id, maker.id, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = &failure {
            self.release(pair, &mut order);
            order.reject_reason = Some(e.to_string());
            if order.executed_quantity.is_zero() {
                order.transition(OrderStatus::Rejected);
            } else {
                order.transition(OrderStatus::PartiallyFilled);
            }
        } else if order.remaining_quantity.is_zero() {
            // Leftover headroom from market reservations or rounding
            self.release(pair, &mut order);
        } else if order.order_type == OrderType::Limit && order.time_in_force == TimeInForce::Gtc {
            if order.executed_quantity.is_zero() {
                order.transition(OrderStatus::Open);
            }
            book.insert(order.clone());
            debug!(
                "📥 Rested {} {} {} @ {:?}",
                order.id, order.side, order.remaining_quantity, order.price
            );
        } else {
            // Market / IOC / FOK remainder is never rested
            self.release(pair, &mut order);
            if order.executed_quantity.is_zero() {
                order.reject("no liquidity");
            } else {
                order.reject_reason = Some(format!(
                    "unfilled remainder {} cancelled",
                    order.remaining_quantity
                ));
                order.transition(OrderStatus::PartiallyFilled);
            }
        }

        self.finish(order, trades, failure)
    }

    fn finish(&self, order: Order, trades: Vec<Trade>, mut failure: Option<Error>) -> SubmitOutcome {
        if let Err(e) = self.store.save_order(&order) {
            error!("❌ Order {} state not saved: {}", order.id, e);
            failure.get_or_insert(e);
        }
        if !trades.is_empty() {
            info!(
                "✅ {} {} {} executed {} avg {} status {}",
                order.symbol, order.side, order.id, order.executed_quantity, order.avg_price, order.status
            );
        }
        SubmitOutcome {
            order,
            trades,
            failure,
        }
    }

    /// Return whatever the order still has reserved.
    fn release(&self, pair: &TradingPair, order: &mut Order) {
        if order.locked_amount <= Decimal::ZERO {
            return;
        }
        let asset = pair.reserve_asset(order.side).clone();
        match self.ledger.unlock(order.account_id, asset.clone(), order.locked_amount) {
            Ok(()) => {
                debug!("released {} {} for {}", order.locked_amount, asset, order.id);
                order.locked_amount = Decimal::ZERO;
            }
            Err(e) => error!("❌ Release of {} {} for {} failed: {}", order.locked_amount, asset, order.id, e),
        }
    }

    /// Remove a live order (resting or parked). None if it is no longer live.
    pub fn cancel(&self, symbol: &Symbol, order_id: &OrderId) -> Option<Order> {
        let book = self.existing_book(symbol)?;
        let removed = book.lock().remove(order_id);
        if removed.is_none() {
            debug!("cancel {}: not live in {}", order_id, symbol);
        }
        removed
    }

    /// Fire every parked stop on `symbol` that `price` triggers. Each fired
    /// order passes through TRIGGERED and is resubmitted as MARKET IOC with
    /// its remaining quantity.
    pub fn trigger_stops(&self, symbol: &Symbol, price: Decimal) -> Result<Vec<SubmitOutcome>> {
        let Some(book) = self.existing_book(symbol) else {
            return Ok(Vec::new());
        };
        let pair = self.catalog.get(symbol)?;
        let mut book = book.lock();
        let fired = book.take_triggered(price);

        let mut outcomes = Vec::with_capacity(fired.len());
        for mut order in fired {
            order.transition(OrderStatus::Triggered);
            if let Err(e) = self.store.save_order(&order) {
                warn!("triggered state of {} not saved: {}", order.id, e);
            }
            self.notifier.notify(Notification::Triggered {
                order_id: order.id,
                account_id: order.account_id,
                symbol: symbol.clone(),
                price,
            });
            info!("⚡ Triggered {} {} at {}", order.order_type, order.id, price);

            order.triggered_from = Some(order.order_type);
            order.order_type = OrderType::Market;
            order.time_in_force = TimeInForce::Ioc;
            order.sequence = book.next_sequence();
            outcomes.push(self.execute(&mut book, &pair, order));
        }
        Ok(outcomes)
    }

    pub fn depth(&self, symbol: &Symbol, levels: usize) -> BookDepth {
        match self.existing_book(symbol) {
            Some(book) => book.lock().depth(levels),
            None => BookDepth {
                symbol: symbol.clone(),
                bids: Vec::new(),
                asks: Vec::new(),
            },
        }
    }

    pub fn best_bid(&self, symbol: &Symbol) -> Option<Decimal> {
        self.existing_book(symbol)?.lock().best_bid()
    }

    pub fn best_ask(&self, symbol: &Symbol) -> Option<Decimal> {
        self.existing_book(symbol)?.lock().best_ask()
    }

    pub fn open_order_count(&self, symbol: &Symbol) -> usize {
        self.existing_book(symbol)
            .map_or(0, |book| book.lock().open_order_count())
    }

    /// Live copy of a resting or parked order
    pub fn resting_order(&self, symbol: &Symbol, order_id: &OrderId) -> Option<Order> {
        let book = self.existing_book(symbol)?;
        let book = book.lock();
        book.order(order_id)
            .or_else(|| book.stop_order(order_id))
            .cloned()
    }

    /// Parked stops awaiting a trigger
    pub fn stop_count(&self, symbol: &Symbol) -> usize {
        self.existing_book(symbol).map_or(0, |book| book.lock().stop_count())
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.books.read().keys().cloned().collect()
    }
}
