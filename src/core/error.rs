//! Error handling - Tagged business errors for the exchange core

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::types::{AccountId, Asset, OrderId, OrderStatus, Symbol};

pub type Result<T> = std::result::Result<T, Error>;

/// Which pre-trade risk check rejected an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskCheck {
    PositionSize,
    DailyLoss,
    Margin,
    Concentration,
}

impl std::fmt::Display for RiskCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskCheck::PositionSize => write!(f, "position size"),
            RiskCheck::DailyLoss => write!(f, "daily loss"),
            RiskCheck::Margin => write!(f, "margin"),
            RiskCheck::Concentration => write!(f, "concentration"),
        }
    }
}

/// Exchange core error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-bounds order parameters
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient balance: {asset} on {account} available {available}, required {required}")]
    InsufficientBalance {
        account: AccountId,
        asset: Asset,
        available: Decimal,
        required: Decimal,
    },

    #[error("Insufficient locked balance: {asset} on {account} locked {locked}, required {required}")]
    InsufficientLocked {
        account: AccountId,
        asset: Asset,
        locked: Decimal,
        required: Decimal,
    },

    #[error("Risk limit exceeded ({check}): {detail}")]
    RiskLimitExceeded { check: RiskCheck, detail: String },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Trading pair not found: {0}")]
    PairNotFound(Symbol),

    /// e.g. cancelling a filled order
    #[error("Invalid state transition: cannot {action} order {order} in status {from}")]
    InvalidStateTransition {
        order: OrderId,
        from: OrderStatus,
        action: &'static str,
    },

    /// Internal invariant violation inside the matching engine
    #[error("Matching engine: {0}")]
    MatchingEngine(String),

    #[error("Store: {0}")]
    Store(String),

    #[error("Config: {0}")]
    Config(String),
}

impl Error {
    /// True for failures that reject an order before any funds move.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::InsufficientBalance { .. }
                | Error::RiskLimitExceeded { .. }
                | Error::PairNotFound(_)
        )
    }
}
