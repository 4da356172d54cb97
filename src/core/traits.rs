//! Core traits - The narrow seams to the outside world
//!
//! Persistence, mark prices and notifications are collaborators; the core
//! only talks to them through these traits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::catalog::TradingPair;
use crate::core::{Result, types::*};
use crate::ledger::AccountRecord;
use crate::position::Position;

/// Everything one execution writes, committed in a single call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRecord {
    pub orders: Vec<Order>,
    pub trades: Vec<Trade>,
    pub positions: Vec<Position>,
    pub accounts: Vec<AccountRecord>,
}

/// Synchronous, consistent persistence for accounts, balances, orders,
/// trades, positions and trading pairs.
pub trait Store: Send + Sync {
    /// Save accounts with their balance rows, all or none.
    fn save_accounts(&self, records: &[AccountRecord]) -> Result<()>;

    /// The account with every balance row it holds.
    fn load_account(&self, id: &AccountId) -> Result<Option<AccountRecord>>;

    fn save_pair(&self, pair: &TradingPair) -> Result<()>;

    fn load_pair(&self, symbol: &Symbol) -> Result<Option<TradingPair>>;

    fn load_order(&self, id: &OrderId) -> Result<Option<Order>>;

    fn save_order(&self, order: &Order) -> Result<()>;

    /// Persist an execution atomically: either every record lands or none.
    fn commit_execution(&self, record: &ExecutionRecord) -> Result<()>;

    fn trades_for_order(&self, id: &OrderId) -> Result<Vec<Trade>>;

    fn trades_for_symbol(&self, symbol: &Symbol) -> Result<Vec<Trade>>;

    fn trades_for_account(&self, account: &AccountId) -> Result<Vec<Trade>>;

    fn load_position(&self, account: &AccountId, symbol: &Symbol) -> Result<Option<Position>>;

    fn positions_for_account(&self, account: &AccountId) -> Result<Vec<Position>>;

    /// Non-terminal orders, optionally restricted to one symbol.
    fn active_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<Order>>;

    fn orders_by_account(&self, account: &AccountId) -> Result<Vec<Order>>;

    /// Non-terminal orders whose expiry is before `now`.
    fn expired_orders(&self, now: DateTime<Utc>) -> Result<Vec<Order>>;
}

/// Mark price source
pub trait PriceFeed: Send + Sync {
    fn mark_price(&self, symbol: &Symbol) -> Option<Decimal>;
}

/// Events pushed to the notification sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Fill {
        order_id: OrderId,
        account_id: AccountId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        is_maker: bool,
    },
    Cancelled {
        order_id: OrderId,
        account_id: AccountId,
        symbol: Symbol,
        released: Decimal,
    },
    Expired {
        order_id: OrderId,
        account_id: AccountId,
        symbol: Symbol,
    },
    Triggered {
        order_id: OrderId,
        account_id: AccountId,
        symbol: Symbol,
        price: Decimal,
    },
    MarginCall {
        account_id: AccountId,
        margin_level: Decimal,
    },
    Liquidation {
        account_id: AccountId,
        margin_level: Decimal,
        cancelled_orders: usize,
    },
}

/// Fire-and-forget event hook. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: Notification);
}
