use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::core::{BookDepth, Order, OrderId, PriceLevel, Side, Symbol};

/// Price-time ordered book for a single symbol.
/// Both sides are keyed ascending; the best bid is the last bid level.
/// Each level is a FIFO of order ids; the orders themselves live in `orders`.
pub struct OrderBook {
    pub symbol: Symbol,
    bids: BTreeMap<Decimal, VecDeque<OrderId>>,
    asks: BTreeMap<Decimal, VecDeque<OrderId>>,
    orders: HashMap<OrderId, Order>,
    stops: HashMap<OrderId, Order>,
    sequence: u64,
}

impl OrderBook {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            orders: HashMap::new(),
            stops: HashMap::new(),
            sequence: 0,
        }
    }

    /// Next arrival sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, VecDeque<OrderId>> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Rest a priced order at the back of its level. Returns false if the
    /// order has no price.
    pub fn insert(&mut self, order: Order) -> bool {
        let Some(price) = order.price else {
            return false;
        };
        let id = order.id;
        self.side_mut(order.side).entry(price).or_default().push_back(id);
        self.orders.insert(id, order);
        true
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Head order of the best level on `side`.
    pub fn best_order(&self, side: Side) -> Option<&Order> {
        let level = match side {
            Side::Buy => self.bids.values().next_back(),
            Side::Sell => self.asks.values().next(),
        }?;
        level.front().and_then(|id| self.orders.get(id))
    }

    pub fn order(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    /// Install the post-fill copy of a resting order. An exhausted order
    /// leaves the book; a partial one keeps its place at the head.
    pub fn settle_resting(&mut self, updated: Order) {
        if updated.remaining_quantity.is_zero() {
            self.remove(&updated.id);
        } else if let Some(slot) = self.orders.get_mut(&updated.id) {
            *slot = updated;
        }
    }

    /// Remove a resting or parked order by id.
    pub fn remove(&mut self, id: &OrderId) -> Option<Order> {
        if let Some(order) = self.stops.remove(id) {
            return Some(order);
        }
        let order = self.orders.remove(id)?;
        let price = order.price?;
        let levels = self.side_mut(order.side);
        if let Some(level) = levels.get_mut(&price) {
            level.retain(|queued| queued != id);
            if level.is_empty() {
                levels.remove(&price);
            }
        }
        Some(order)
    }

    /// Quantity resting on the opposite side of `side` at prices that cross
    /// `limit` (any price when `limit` is None), counted up to `wanted`.
    pub fn crossing_liquidity(&self, side: Side, limit: Option<Decimal>, wanted: Decimal) -> Decimal {
        let levels: Box<dyn Iterator<Item = (&Decimal, &VecDeque<OrderId>)>> = match side {
            Side::Buy => Box::new(self.asks.iter()),
            Side::Sell => Box::new(self.bids.iter().rev()),
        };
        let mut total = Decimal::ZERO;
        for (price, level) in levels {
            let crosses = match (side, limit) {
                (_, None) => true,
                (Side::Buy, Some(l)) => *price <= l,
                (Side::Sell, Some(l)) => *price >= l,
            };
            if !crosses {
                break;
            }
            total += level
                .iter()
                .filter_map(|id| self.orders.get(id))
                .map(|o| o.remaining_quantity)
                .sum::<Decimal>();
            if total >= wanted {
                break;
            }
        }
        total
    }

    pub fn depth(&self, levels: usize) -> BookDepth {
        let aggregate = |price: &Decimal, queue: &VecDeque<OrderId>| PriceLevel {
            price: *price,
            quantity: queue
                .iter()
                .filter_map(|id| self.orders.get(id))
                .map(|o| o.remaining_quantity)
                .sum(),
        };
        BookDepth {
            symbol: self.symbol.clone(),
            bids: self
                .bids
                .iter()
                .rev()
                .take(levels)
                .map(|(p, q)| aggregate(p, q))
                .collect(),
            asks: self
                .asks
                .iter()
                .take(levels)
                .map(|(p, q)| aggregate(p, q))
                .collect(),
        }
    }

    /// Resting orders (stops excluded)
    pub fn open_order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn park_stop(&mut self, order: Order) {
        self.stops.insert(order.id, order);
    }

    pub fn stop_order(&self, id: &OrderId) -> Option<&Order> {
        self.stops.get(id)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.len()
    }

    /// Remove and return every parked stop that fires at `price`, oldest first.
    pub fn take_triggered(&mut self, price: Decimal) -> Vec<Order> {
        let ids: Vec<OrderId> = self
            .stops
            .values()
            .filter(|o| o.should_trigger(price))
            .map(|o| o.id)
            .collect();
        let mut fired: Vec<Order> = ids.iter().filter_map(|id| self.stops.remove(id)).collect();
        fired.sort_by_key(|o| o.sequence);
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AccountId;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn resting(book: &mut OrderBook, side: Side, qty: Decimal, price: Decimal) -> OrderId {
        let mut order = Order::new_limit(AccountId::new(), book.symbol.clone(), side, qty, price);
        order.sequence = book.next_sequence();
        let id = order.id;
        assert!(book.insert(order));
        id
    }

    #[test]
    fn test_best_prices_and_fifo() {
        let mut book = OrderBook::new(Symbol::new("BTCUSDT"));
        resting(&mut book, Side::Buy, dec!(1), dec!(99));
        let first = resting(&mut book, Side::Buy, dec!(1), dec!(100));
        resting(&mut book, Side::Buy, dec!(2), dec!(100));
        resting(&mut book, Side::Sell, dec!(1), dec!(102));
        resting(&mut book, Side::Sell, dec!(1), dec!(101));

        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.best_ask(), Some(dec!(101)));
        assert_eq!(book.best_order(Side::Buy).map(|o| o.id), Some(first));
    }

    #[test]
    fn test_partial_fill_keeps_head() {
        let mut book = OrderBook::new(Symbol::new("BTCUSDT"));
        let head = resting(&mut book, Side::Sell, dec!(3), dec!(100));
        resting(&mut book, Side::Sell, dec!(1), dec!(100));

        let mut updated = book.order(&head).cloned().unwrap();
        updated.apply_fill(dec!(1), dec!(100), Utc::now());
        book.settle_resting(updated.clone());
        assert_eq!(book.order(&head).map(|o| o.remaining_quantity), Some(dec!(2)));
        assert_eq!(book.best_order(Side::Sell).map(|o| o.id), Some(head));

        updated.apply_fill(dec!(2), dec!(100), Utc::now());
        book.settle_resting(updated);
        assert!(book.order(&head).is_none());
        assert_eq!(book.open_order_count(), 1);
    }

    #[test]
    fn test_remove_drops_empty_level() {
        let mut book = OrderBook::new(Symbol::new("BTCUSDT"));
        let id = resting(&mut book, Side::Buy, dec!(1), dec!(100));
        assert!(book.remove(&id).is_some());
        assert!(book.remove(&id).is_none());
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn test_depth_aggregates_levels() {
        let mut book = OrderBook::new(Symbol::new("BTCUSDT"));
        resting(&mut book, Side::Buy, dec!(1), dec!(100));
        resting(&mut book, Side::Buy, dec!(2), dec!(100));
        resting(&mut book, Side::Buy, dec!(5), dec!(98));
        resting(&mut book, Side::Sell, dec!(4), dec!(103));

        let depth = book.depth(1);
        assert_eq!(depth.bids, vec![PriceLevel { price: dec!(100), quantity: dec!(3) }]);
        assert_eq!(depth.asks, vec![PriceLevel { price: dec!(103), quantity: dec!(4) }]);
        assert_eq!(book.depth(10).bids.len(), 2);
    }

    #[test]
    fn test_crossing_liquidity_respects_limit() {
        let mut book = OrderBook::new(Symbol::new("BTCUSDT"));
        resting(&mut book, Side::Sell, dec!(1), dec!(100));
        resting(&mut book, Side::Sell, dec!(1), dec!(101));
        resting(&mut book, Side::Sell, dec!(5), dec!(110));

        assert_eq!(book.crossing_liquidity(Side::Buy, Some(dec!(101)), dec!(10)), dec!(2));
        assert_eq!(book.crossing_liquidity(Side::Buy, None, dec!(10)), dec!(7));
        assert_eq!(book.crossing_liquidity(Side::Sell, Some(dec!(1)), dec!(1)), dec!(0));
    }

    #[test]
    fn test_take_triggered_in_arrival_order() {
        let mut book = OrderBook::new(Symbol::new("BTCUSDT"));
        let account = AccountId::new();
        let mut a = Order::new_stop_loss(account, book.symbol.clone(), Side::Sell, dec!(1), dec!(95));
        a.sequence = book.next_sequence();
        let mut b = Order::new_stop_loss(account, book.symbol.clone(), Side::Sell, dec!(1), dec!(97));
        b.sequence = book.next_sequence();
        let c = Order::new_stop_loss(account, book.symbol.clone(), Side::Sell, dec!(1), dec!(90));
        let (a_id, b_id) = (a.id, b.id);
        book.park_stop(b);
        book.park_stop(a);
        book.park_stop(c);

        let fired: Vec<_> = book.take_triggered(dec!(94)).iter().map(|o| o.id).collect();
        assert_eq!(fired, vec![a_id, b_id]);
        assert_eq!(book.stop_count(), 1);
    }
}
