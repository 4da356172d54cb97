//! Accounts and per-asset balances

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{AccountId, Asset, OwnerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Spot,
    Margin,
}

/// One asset row of an account. `total == available + locked`, nothing negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: Asset,
    pub total: Decimal,
    pub available: Decimal,
    pub locked: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            total: Decimal::ZERO,
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.available + self.locked
            && self.available >= Decimal::ZERO
            && self.locked >= Decimal::ZERO
    }
}

/// Account aggregate. Balance totals are derived from the rows after every
/// mutation and are never written directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: OwnerId,
    pub account_type: AccountType,
    pub margin_enabled: bool,
    pub active: bool,
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub locked_balance: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub initial_margin: Decimal,
    pub maintenance_margin: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(owner: OwnerId, account_type: AccountType) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new(),
            owner,
            account_type,
            margin_enabled: account_type == AccountType::Margin,
            active: true,
            total_balance: Decimal::ZERO,
            available_balance: Decimal::ZERO,
            locked_balance: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            initial_margin: Decimal::ZERO,
            maintenance_margin: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn recompute<'a>(&mut self, balances: impl Iterator<Item = &'a Balance>) {
        let (mut total, mut available, mut locked) = (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
        for b in balances {
            total += b.total;
            available += b.available;
            locked += b.locked;
        }
        self.total_balance = total;
        self.available_balance = available;
        self.locked_balance = locked;
        self.updated_at = Utc::now();
    }
}

/// An account with its balance rows, as saved to and loaded from a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account: Account,
    pub balances: Vec<Balance>,
}
