//! Mark prices - In-process price board implementing `PriceFeed`

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::core::{PriceFeed, Symbol};

/// Latest mark price per symbol, pushed by whatever owns market data
#[derive(Default)]
pub struct MarkPriceBoard {
    prices: RwLock<HashMap<Symbol, Decimal>>,
}

impl MarkPriceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-positive prices are ignored.
    pub fn set(&self, symbol: Symbol, price: Decimal) {
        if price <= Decimal::ZERO {
            return;
        }
        debug!("mark {} = {}", symbol, price);
        self.prices.write().insert(symbol, price);
    }
}

impl PriceFeed for MarkPriceBoard {
    fn mark_price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.prices.read().get(symbol).copied()
    }
}
