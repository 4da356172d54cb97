//! Trade recorder - Trade records, commissions and settlement of one fill
//!
//! A fill moves the two orders, the trade records, both counterparties'
//! balances and realized PnL, and both positions. The ledger batch is
//! validated first, then positions are staged and the store commit runs
//! while the ledger and tracker are still locked. Nothing is written unless
//! the commit succeeds.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::TradingPair;
use crate::core::{
    ExecutionRecord, Order, OrderId, OrderType, Result, Side, Store, Symbol, Trade, TradeId,
};
use crate::ledger::{AccountLedger, LedgerOp};
use crate::position::PositionTracker;

/// Result of one settled fill
#[derive(Debug, Clone)]
pub struct Settlement {
    pub taker: Order,
    pub maker: Order,
    pub taker_trade: Trade,
    pub maker_trade: Trade,
}

pub struct TradeRecorder {
    ledger: Arc<AccountLedger>,
    positions: Arc<PositionTracker>,
    store: Arc<dyn Store>,
}

impl TradeRecorder {
    pub fn new(ledger: Arc<AccountLedger>, positions: Arc<PositionTracker>, store: Arc<dyn Store>) -> Self {
        Self { ledger, positions, store }
    }

    /// Settle `quantity` between `taker` and the resting `maker` at `price`.
    /// On error no balance, position or stored record has changed.
    pub fn record(
        &self,
        pair: &TradingPair,
        taker: &Order,
        maker: &Order,
        quantity: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Settlement> {
        let mut taker = taker.clone();
        let mut maker = maker.clone();
        let mut ops = Vec::with_capacity(8);

        let taker_trade = settle_side(pair, &mut taker, &maker, quantity, price, false, at, &mut ops);
        let maker_trade = settle_side(pair, &mut maker, &taker, quantity, price, true, at, &mut ops);

        let trades = [taker_trade.clone(), maker_trade.clone()];
        self.ledger.apply_with(&ops, |batch| {
            self.positions.stage(&trades, |staged| {
                for (account, pnl) in &staged.realized {
                    if !pnl.is_zero() {
                        batch.add_realized_pnl(account, *pnl)?;
                    }
                }
                self.store.commit_execution(&ExecutionRecord {
                    orders: vec![taker.clone(), maker.clone()],
                    trades: trades.to_vec(),
                    positions: staged.positions.clone(),
                    accounts: batch.records(),
                })
            })
        })?;

        debug!(
            "💱 {} {} @ {} taker={} maker={}",
            pair.symbol, quantity, price, taker.id, maker.id
        );
        Ok(Settlement {
            taker,
            maker,
            taker_trade,
            maker_trade,
        })
    }

    pub fn trades_for_order(&self, id: &OrderId) -> Result<Vec<Trade>> {
        self.store.trades_for_order(id)
    }

    pub fn trades_for_symbol(&self, symbol: &Symbol) -> Result<Vec<Trade>> {
        self.store.trades_for_symbol(symbol)
    }

    /// Executed base volume (each execution counted once)
    pub fn volume(&self, symbol: &Symbol) -> Result<Decimal> {
        Ok(self
            .store
            .trades_for_symbol(symbol)?
            .iter()
            .filter(|t| !t.is_maker)
            .map(|t| t.quantity)
            .sum())
    }

    pub fn vwap(&self, symbol: &Symbol) -> Result<Option<Decimal>> {
        let trades = self.store.trades_for_symbol(symbol)?;
        let (qty, value) = trades
            .iter()
            .filter(|t| !t.is_maker)
            .fold((Decimal::ZERO, Decimal::ZERO), |(q, v), t| (q + t.quantity, v + t.quote_quantity));
        Ok((!qty.is_zero()).then(|| value / qty))
    }

    pub fn last_price(&self, symbol: &Symbol) -> Result<Option<Decimal>> {
        Ok(self
            .store
            .trades_for_symbol(symbol)?
            .iter()
            .max_by_key(|t| t.executed_at)
            .map(|t| t.price))
    }
}

/// Update one side's order, push its ledger legs and build its trade.
#[allow(clippy::too_many_arguments)]
fn settle_side(
    pair: &TradingPair,
    order: &mut Order,
    counterparty: &Order,
    quantity: Decimal,
    price: Decimal,
    is_maker: bool,
    at: DateTime<Utc>,
    ops: &mut Vec<LedgerOp>,
) -> Trade {
    let fee_rate = pair.fee_rate(is_maker);
    let quote_quantity = quantity * price;
    let account = order.account_id;

    let (commission, commission_asset) = match order.side {
        Side::Buy => {
            let commission = quantity * fee_rate;
            push(ops, LedgerOp::DebitLocked { account, asset: pair.quote_asset.clone(), amount: quote_quantity });
            // Price improvement on a limit buy
            let improvement = match order.price {
                Some(limit) if order.order_type == OrderType::Limit && limit > price => (limit - price) * quantity,
                _ => Decimal::ZERO,
            };
            push(ops, LedgerOp::Unlock { account, asset: pair.quote_asset.clone(), amount: improvement });
            order.locked_amount = (order.locked_amount - quote_quantity - improvement).max(Decimal::ZERO);
            push(ops, LedgerOp::Credit { account, asset: pair.base_asset.clone(), amount: quantity - commission });
            (commission, pair.base_asset.clone())
        }
        Side::Sell => {
            let commission = quote_quantity * fee_rate;
            push(ops, LedgerOp::DebitLocked { account, asset: pair.base_asset.clone(), amount: quantity });
            order.locked_amount = (order.locked_amount - quantity).max(Decimal::ZERO);
            push(ops, LedgerOp::Credit { account, asset: pair.quote_asset.clone(), amount: quote_quantity - commission });
            (commission, pair.quote_asset.clone())
        }
    };

    order.apply_fill(quantity, price, at);
    order.commission += commission;

    Trade {
        id: TradeId::new(),
        order_id: order.id,
        counterparty_order_id: counterparty.id,
        account_id: account,
        symbol: pair.symbol.clone(),
        side: order.side,
        quantity,
        price,
        quote_quantity,
        is_maker,
        commission,
        commission_asset,
        executed_at: at,
    }
}

/// Zero legs carry no effect and are dropped.
fn push(ops: &mut Vec<LedgerOp>, op: LedgerOp) {
    if op.amount() > Decimal::ZERO {
        ops.push(op);
    }
}
