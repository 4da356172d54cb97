//! Core types - Strong typing for safety

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tradeable symbol (e.g., "BTCUSDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(s)
    }
}

/// Asset ticker (e.g., "BTC", "USDT")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct Asset(String);

impl Asset {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Asset {
    fn from(s: &str) -> Self {
        Asset::new(s)
    }
}

impl From<String> for Asset {
    fn from(s: String) -> Self {
        Asset::new(s)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Ledger account identifier
    AccountId
);
uuid_id!(OrderId);
uuid_id!(TradeId);

/// External identity that owns one or more accounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> Decimal {
        match self {
            Side::Buy => Decimal::ONE,
            Side::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    StopLimit,
    TakeProfit,
}

impl OrderType {
    pub fn is_stop(self) -> bool {
        matches!(self, OrderType::StopLoss | OrderType::StopLimit | OrderType::TakeProfit)
    }

    pub fn requires_price(self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopLoss => write!(f, "STOP_LOSS"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
            OrderType::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
    Triggered,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            OrderStatus::Open | OrderStatus::PartiallyFilled | OrderStatus::Submitted
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Open => "OPEN",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Triggered => "TRIGGERED",
        };
        write!(f, "{s}")
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    /// Good till cancel
    #[default]
    Gtc,
    /// Immediate or cancel
    Ioc,
    /// Fill or kill
    Fok,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Fok => write!(f, "FOK"),
        }
    }
}

/// Order
///
/// `remaining_quantity == quantity - executed_quantity` holds after every
/// mutation, and the status is `Filled` exactly when nothing remains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client_order_id: Option<String>,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub executed_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub avg_price: Decimal,
    pub commission: Decimal,
    pub status: OrderStatus,
    pub time_in_force: TimeInForce,
    /// Funds still reserved in the ledger for this order
    pub locked_amount: Decimal,
    /// Original type of a stop order after it has been triggered
    pub triggered_from: Option<OrderType>,
    /// Arrival sequence assigned by the matching engine
    pub sequence: u64,
    pub reject_reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    fn base(
        account_id: AccountId,
        symbol: Symbol,
        order_type: OrderType,
        side: Side,
        quantity: Decimal,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            client_order_id: None,
            account_id,
            symbol,
            order_type,
            side,
            quantity,
            price,
            stop_price,
            executed_quantity: Decimal::ZERO,
            remaining_quantity: quantity,
            avg_price: Decimal::ZERO,
            commission: Decimal::ZERO,
            status: OrderStatus::Pending,
            time_in_force: TimeInForce::Gtc,
            locked_amount: Decimal::ZERO,
            triggered_from: None,
            sequence: 0,
            reject_reason: None,
            expires_at: None,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            filled_at: None,
            cancelled_at: None,
        }
    }

    pub fn new_market(account_id: AccountId, symbol: Symbol, side: Side, quantity: Decimal) -> Self {
        let mut order = Self::base(account_id, symbol, OrderType::Market, side, quantity, None, None);
        order.time_in_force = TimeInForce::Ioc;
        order
    }

    pub fn new_limit(
        account_id: AccountId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self::base(account_id, symbol, OrderType::Limit, side, quantity, Some(price), None)
    }

    pub fn new_stop_loss(
        account_id: AccountId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self::base(account_id, symbol, OrderType::StopLoss, side, quantity, None, Some(stop_price))
    }

    pub fn new_stop_limit(
        account_id: AccountId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        stop_price: Decimal,
        price: Decimal,
    ) -> Self {
        Self::base(
            account_id,
            symbol,
            OrderType::StopLimit,
            side,
            quantity,
            Some(price),
            Some(stop_price),
        )
    }

    pub fn new_take_profit(
        account_id: AccountId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self::base(account_id, symbol, OrderType::TakeProfit, side, quantity, None, Some(stop_price))
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_be_cancelled(&self) -> bool {
        self.status.is_cancellable()
    }

    pub fn is_stop(&self) -> bool {
        self.order_type.is_stop()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// Whether a parked stop order fires at `price`.
    ///
    /// Stop-loss and stop-limit fire when price moves through the stop against
    /// the holder (buy: at or above, sell: at or below); take-profit fires in
    /// the favourable direction.
    pub fn should_trigger(&self, price: Decimal) -> bool {
        let Some(stop) = self.stop_price else {
            return false;
        };
        match (self.order_type, self.side) {
            (OrderType::StopLoss | OrderType::StopLimit, Side::Buy) => price >= stop,
            (OrderType::StopLoss | OrderType::StopLimit, Side::Sell) => price <= stop,
            (OrderType::TakeProfit, Side::Buy) => price <= stop,
            (OrderType::TakeProfit, Side::Sell) => price >= stop,
            _ => false,
        }
    }

    /// Record one execution of `qty` at `price`.
    ///
    /// Keeps the quantity invariant and a volume-weighted average price, and
    /// moves the status to `PartiallyFilled` or `Filled`.
    pub fn apply_fill(&mut self, qty: Decimal, price: Decimal, at: DateTime<Utc>) {
        let prior_value = self.avg_price * self.executed_quantity;
        self.executed_quantity += qty;
        self.remaining_quantity = self.quantity - self.executed_quantity;
        if !self.executed_quantity.is_zero() {
            self.avg_price = (prior_value + qty * price) / self.executed_quantity;
        }
        if self.remaining_quantity.is_zero() {
            self.status = OrderStatus::Filled;
            self.filled_at = Some(at);
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
        self.updated_at = at;
    }

    /// Move to `status`. A terminal order is never changed; returns whether
    /// the move happened.
    pub fn transition(&mut self, status: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        match status {
            OrderStatus::Cancelled | OrderStatus::Expired => self.cancelled_at = Some(now),
            OrderStatus::Filled => self.filled_at = Some(now),
            _ => {}
        }
        self.status = status;
        self.updated_at = now;
        true
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.reject_reason = Some(reason.into());
        self.transition(OrderStatus::Rejected)
    }

    /// Notional at the order's own price, or at `fallback` when it has none.
    pub fn notional(&self, fallback: Decimal) -> Decimal {
        self.quantity * self.price.unwrap_or(fallback)
    }
}

/// Trade - one side of one execution. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub order_id: OrderId,
    pub counterparty_order_id: OrderId,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub quote_quantity: Decimal,
    pub is_maker: bool,
    pub commission: Decimal,
    pub commission_asset: Asset,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    pub fn signed_quantity(&self) -> Decimal {
        self.quantity * self.side.sign()
    }

    /// Commission expressed in the quote asset.
    ///
    /// Buyers pay commission in the base asset; it is valued at the trade
    /// price.
    pub fn commission_in_quote(&self) -> Decimal {
        match self.side {
            Side::Buy => self.commission * self.price,
            Side::Sell => self.commission,
        }
    }
}

/// Aggregated book level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book depth snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDepth {
    pub symbol: Symbol,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}
