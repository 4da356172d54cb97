//! Trading pair catalog - Reference data for validating and rounding orders

use parking_lot::RwLock;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::core::{Asset, Error, Order, Result, Side, Store, Symbol};

fn default_max() -> Decimal {
    Decimal::from(999_999_999)
}

fn default_increment() -> Decimal {
    Decimal::new(1, 8)
}

fn default_fee() -> Decimal {
    Decimal::new(1, 3)
}

fn default_precision() -> u32 {
    8
}

fn default_active() -> bool {
    true
}

/// Listed pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: Symbol,
    pub base_asset: Asset,
    pub quote_asset: Asset,
    #[serde(default = "default_precision")]
    pub price_precision: u32,
    #[serde(default = "default_precision")]
    pub quantity_precision: u32,
    #[serde(default)]
    pub min_price: Decimal,
    #[serde(default = "default_max")]
    pub max_price: Decimal,
    #[serde(default)]
    pub min_quantity: Decimal,
    #[serde(default = "default_max")]
    pub max_quantity: Decimal,
    #[serde(default)]
    pub min_notional: Decimal,
    #[serde(default = "default_increment")]
    pub tick_size: Decimal,
    #[serde(default = "default_increment")]
    pub step_size: Decimal,
    #[serde(default = "default_fee")]
    pub maker_fee: Decimal,
    #[serde(default = "default_fee")]
    pub taker_fee: Decimal,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl TradingPair {
    pub fn new(symbol: impl Into<Symbol>, base: impl Into<Asset>, quote: impl Into<Asset>) -> Self {
        Self {
            symbol: symbol.into(),
            base_asset: base.into(),
            quote_asset: quote.into(),
            price_precision: default_precision(),
            quantity_precision: default_precision(),
            min_price: Decimal::ZERO,
            max_price: default_max(),
            min_quantity: Decimal::ZERO,
            max_quantity: default_max(),
            min_notional: Decimal::ZERO,
            tick_size: default_increment(),
            step_size: default_increment(),
            maker_fee: default_fee(),
            taker_fee: default_fee(),
            active: true,
        }
    }

    pub fn with_increments(mut self, tick_size: Decimal, step_size: Decimal) -> Self {
        self.tick_size = tick_size;
        self.step_size = step_size;
        self
    }

    pub fn with_quantity_bounds(mut self, min: Decimal, max: Decimal) -> Self {
        self.min_quantity = min;
        self.max_quantity = max;
        self
    }

    pub fn with_min_notional(mut self, min: Decimal) -> Self {
        self.min_notional = min;
        self
    }

    /// Round half-up to the nearest tick.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        round_to(price, self.tick_size, RoundingStrategy::MidpointAwayFromZero)
            .round_dp(self.price_precision)
    }

    /// Round half-up to the nearest step.
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        round_to(quantity, self.step_size, RoundingStrategy::MidpointAwayFromZero)
            .round_dp(self.quantity_precision)
    }

    /// Round down to a whole step.
    pub fn floor_quantity(&self, quantity: Decimal) -> Decimal {
        round_to(quantity, self.step_size, RoundingStrategy::ToZero)
            .round_dp_with_strategy(self.quantity_precision, RoundingStrategy::ToZero)
    }

    pub fn is_valid_quantity(&self, quantity: Decimal) -> bool {
        quantity >= self.min_quantity && quantity <= self.max_quantity
    }

    pub fn is_valid_price(&self, price: Decimal) -> bool {
        price >= self.min_price && price <= self.max_price
    }

    pub fn is_valid_notional(&self, notional: Decimal) -> bool {
        notional >= self.min_notional
    }

    pub fn fee_rate(&self, is_maker: bool) -> Decimal {
        if is_maker { self.maker_fee } else { self.taker_fee }
    }

    /// Asset reserved when placing an order on `side`.
    pub fn reserve_asset(&self, side: Side) -> &Asset {
        match side {
            Side::Buy => &self.quote_asset,
            Side::Sell => &self.base_asset,
        }
    }
}

fn round_to(value: Decimal, increment: Decimal, strategy: RoundingStrategy) -> Decimal {
    if increment <= Decimal::ZERO {
        return value;
    }
    (value / increment).round_dp_with_strategy(0, strategy) * increment
}

/// Catalog of listed pairs
pub struct TradingPairCatalog {
    pairs: RwLock<HashMap<Symbol, TradingPair>>,
    store: Option<Arc<dyn Store>>,
}

impl TradingPairCatalog {
    pub fn new(pairs: impl IntoIterator<Item = TradingPair>) -> Self {
        let catalog = Self {
            pairs: RwLock::new(HashMap::new()),
            store: None,
        };
        for pair in pairs {
            catalog.insert(pair);
        }
        catalog
    }

    /// Catalog whose listings are saved to `store`. A pair the store already
    /// knows keeps its stored activation flag over the configured one.
    pub fn persisted(pairs: impl IntoIterator<Item = TradingPair>, store: Arc<dyn Store>) -> Result<Self> {
        let catalog = Self {
            pairs: RwLock::new(HashMap::new()),
            store: Some(store),
        };
        for mut pair in pairs {
            if let Some(stored) = catalog.load(&pair.symbol)? {
                pair.active = stored.active;
            }
            catalog.list(pair)?;
        }
        Ok(catalog)
    }

    fn load(&self, symbol: &Symbol) -> Result<Option<TradingPair>> {
        match &self.store {
            Some(store) => store.load_pair(symbol),
            None => Ok(None),
        }
    }

    fn persist(&self, pair: &TradingPair) -> Result<()> {
        match &self.store {
            Some(store) => store.save_pair(pair),
            None => Ok(()),
        }
    }

    fn insert(&self, pair: TradingPair) {
        info!(
            "📈 Listed {} ({}/{}) tick={} step={} active={}",
            pair.symbol, pair.base_asset, pair.quote_asset, pair.tick_size, pair.step_size, pair.active
        );
        self.pairs.write().insert(pair.symbol.clone(), pair);
    }

    /// Add or replace a listing.
    pub fn list(&self, pair: TradingPair) -> Result<()> {
        self.persist(&pair)?;
        self.insert(pair);
        Ok(())
    }

    pub fn get(&self, symbol: &Symbol) -> Result<TradingPair> {
        self.pairs
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::PairNotFound(symbol.clone()))
    }

    pub fn set_active(&self, symbol: &Symbol, active: bool) -> Result<()> {
        let mut pairs = self.pairs.write();
        let pair = pairs
            .get_mut(symbol)
            .ok_or_else(|| Error::PairNotFound(symbol.clone()))?;
        let mut updated = pair.clone();
        updated.active = active;
        self.persist(&updated)?;
        *pair = updated;
        info!("📈 {} active={}", symbol, active);
        Ok(())
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.pairs.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Round the order's price fields and quantity in place and check them
    /// against the pair's bounds. `reference_price` values orders that carry
    /// no price of their own.
    pub fn normalize_order(&self, order: &mut Order, reference_price: Decimal) -> Result<TradingPair> {
        let pair = self.get(&order.symbol)?;
        if !pair.active {
            return Err(Error::Validation(format!("trading pair {} is not active", pair.symbol)));
        }

        if order.order_type.requires_price() && order.price.is_none() {
            return Err(Error::Validation(format!("{} orders must have a price", order.order_type)));
        }
        if order.is_stop() && order.stop_price.is_none() {
            return Err(Error::Validation(format!(
                "{} orders must have a stop price",
                order.order_type
            )));
        }

        order.quantity = pair.round_quantity(order.quantity);
        order.remaining_quantity = order.quantity - order.executed_quantity;
        if order.quantity <= Decimal::ZERO {
            return Err(Error::Validation("quantity must be positive".into()));
        }
        if !pair.is_valid_quantity(order.quantity) {
            return Err(Error::Validation(format!(
                "quantity {} outside [{}, {}]",
                order.quantity, pair.min_quantity, pair.max_quantity
            )));
        }

        for price in [order.price.as_mut(), order.stop_price.as_mut()].into_iter().flatten() {
            *price = pair.round_price(*price);
            if *price <= Decimal::ZERO || !pair.is_valid_price(*price) {
                return Err(Error::Validation(format!(
                    "price {} outside [{}, {}]",
                    price, pair.min_price, pair.max_price
                )));
            }
        }

        let notional = order.quantity * order.price.or(order.stop_price).unwrap_or(reference_price);
        if !pair.is_valid_notional(notional) {
            return Err(Error::Validation(format!(
                "notional {} below minimum {}",
                notional, pair.min_notional
            )));
        }
        Ok(pair)
    }
}
