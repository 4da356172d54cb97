//! Position tracking - Weighted-average cost per account and symbol

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::{AccountId, PriceFeed, Result, Symbol, Trade};

/// Position in one symbol for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: AccountId,
    pub symbol: Symbol,
    /// Positive = long, negative = short
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// |quantity| × avg_entry_price
    pub cost_basis: Decimal,
    /// Commissions paid, in quote units
    pub total_fees: Decimal,
    pub mark_price: Decimal,
    pub is_open: bool,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn new(account_id: AccountId, symbol: Symbol) -> Self {
        Self {
            account_id,
            symbol,
            quantity: Decimal::ZERO,
            avg_entry_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            cost_basis: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            mark_price: Decimal::ZERO,
            is_open: false,
            opened_at: None,
            closed_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Apply one trade. Returns the realized PnL it produced, net of its
    /// commission.
    pub fn add_trade(&mut self, trade: &Trade) -> Decimal {
        let signed = trade.signed_quantity();
        let price = trade.price;
        let mut realized = Decimal::ZERO;

        if self.quantity.is_zero() {
            self.open_at(signed, price, trade.executed_at);
        } else if self.quantity.is_sign_positive() == signed.is_sign_positive() {
            // Same direction
            self.quantity += signed;
            self.cost_basis += signed.abs() * price;
            self.avg_entry_price = self.cost_basis / self.quantity.abs();
        } else {
            let closing = signed.abs().min(self.quantity.abs());
            let direction = if self.quantity.is_sign_positive() { Decimal::ONE } else { Decimal::NEGATIVE_ONE };
            realized = (price - self.avg_entry_price) * closing * direction;
            let remaining = self.quantity + signed;

            if remaining.is_zero() {
                self.quantity = Decimal::ZERO;
                self.cost_basis = Decimal::ZERO;
                self.avg_entry_price = Decimal::ZERO;
                self.is_open = false;
                self.closed_at = Some(trade.executed_at);
            } else if remaining.is_sign_positive() == self.quantity.is_sign_positive() {
                // Reduction keeps the entry price
                self.quantity = remaining;
                self.cost_basis = self.avg_entry_price * remaining.abs();
            } else {
                // Flip: residual opens fresh at the trade price
                self.open_at(remaining, price, trade.executed_at);
            }
        }

        let fee = trade.commission_in_quote();
        self.total_fees += fee;
        realized -= fee;
        self.realized_pnl += realized;
        self.mark(price, trade.executed_at);
        realized
    }

    fn open_at(&mut self, quantity: Decimal, price: Decimal, at: DateTime<Utc>) {
        self.quantity = quantity;
        self.avg_entry_price = price;
        self.cost_basis = quantity.abs() * price;
        self.is_open = true;
        self.opened_at = Some(at);
        self.closed_at = None;
    }

    /// Realize everything at `price` and flatten. Returns the realized PnL.
    pub fn close_position(&mut self, price: Decimal) -> Decimal {
        let realized = self.unrealized_at(price);
        self.realized_pnl += realized;
        self.quantity = Decimal::ZERO;
        self.cost_basis = Decimal::ZERO;
        self.avg_entry_price = Decimal::ZERO;
        self.unrealized_pnl = Decimal::ZERO;
        self.mark_price = price;
        self.is_open = false;
        let now = Utc::now();
        self.closed_at = Some(now);
        self.updated_at = now;
        realized
    }

    /// (mark − avg) × quantity; sign-aware through the signed quantity.
    pub fn unrealized_at(&self, mark: Decimal) -> Decimal {
        (mark - self.avg_entry_price) * self.quantity
    }

    pub fn mark(&mut self, price: Decimal, at: DateTime<Utc>) {
        self.mark_price = price;
        self.unrealized_pnl = self.unrealized_at(price);
        self.updated_at = at;
    }

    /// Absolute notional at the mark price
    pub fn notional(&self) -> Decimal {
        self.quantity.abs() * self.mark_price
    }
}

type PositionKey = (AccountId, Symbol);

/// All positions, keyed by account and symbol
pub struct PositionTracker {
    positions: Mutex<HashMap<PositionKey, Position>>,
}

/// Positions staged by one execution plus the realized PnL per account.
pub struct StagedPositions {
    pub positions: Vec<Position>,
    pub realized: Vec<(AccountId, Decimal)>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            positions: Mutex::new(HashMap::new()),
        }
    }

    pub fn position(&self, account: &AccountId, symbol: &Symbol) -> Option<Position> {
        self.positions.lock().get(&(*account, symbol.clone())).cloned()
    }

    pub fn open_positions(&self, account: &AccountId) -> Vec<Position> {
        self.positions
            .lock()
            .values()
            .filter(|p| p.account_id == *account && p.is_open)
            .cloned()
            .collect()
    }

    /// Apply `trades` on copies of the affected positions and hand them to
    /// `commit`. The copies replace the live positions only if `commit`
    /// succeeds; the tracker stays locked throughout.
    pub fn stage(
        &self,
        trades: &[Trade],
        commit: impl FnOnce(&StagedPositions) -> Result<()>,
    ) -> Result<StagedPositions> {
        let mut live = self.positions.lock();
        let mut staged: Vec<Position> = Vec::new();
        let mut realized: Vec<(AccountId, Decimal)> = Vec::new();

        for trade in trades {
            let idx = match staged
                .iter()
                .position(|p| p.account_id == trade.account_id && p.symbol == trade.symbol)
            {
                Some(i) => i,
                None => {
                    let current = live
                        .get(&(trade.account_id, trade.symbol.clone()))
                        .cloned()
                        .unwrap_or_else(|| Position::new(trade.account_id, trade.symbol.clone()));
                    staged.push(current);
                    staged.len() - 1
                }
            };
            let pnl = staged[idx].add_trade(trade);
            match realized.iter_mut().find(|(a, _)| *a == trade.account_id) {
                Some((_, total)) => *total += pnl,
                None => realized.push((trade.account_id, pnl)),
            }
        }

        let staged = StagedPositions { positions: staged, realized };
        commit(&staged)?;

        for position in &staged.positions {
            live.insert((position.account_id, position.symbol.clone()), position.clone());
        }
        Ok(staged)
    }

    /// Install positions read back from the store.
    pub fn restore(&self, positions: impl IntoIterator<Item = Position>) -> usize {
        let mut live = self.positions.lock();
        let mut count = 0;
        for position in positions {
            live.insert((position.account_id, position.symbol.clone()), position);
            count += 1;
        }
        count
    }

    /// Re-mark the account's open positions from `feed`; returns the total
    /// unrealized PnL. Positions without a mark keep their last one.
    pub fn mark_to_market(&self, account: &AccountId, feed: &dyn PriceFeed) -> Decimal {
        let now = Utc::now();
        let mut live = self.positions.lock();
        live.values_mut()
            .filter(|p| p.account_id == *account && p.is_open)
            .map(|p| {
                if let Some(price) = feed.mark_price(&p.symbol) {
                    p.mark(price, now);
                }
                p.unrealized_pnl
            })
            .sum()
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}
