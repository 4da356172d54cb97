//! In-process store - Every table behind one lock

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::catalog::TradingPair;
use crate::core::{AccountId, ExecutionRecord, Order, OrderId, Result, Store, Symbol, Trade};
use crate::ledger::AccountRecord;
use crate::position::Position;

#[derive(Default)]
struct Tables {
    accounts: HashMap<AccountId, AccountRecord>,
    pairs: HashMap<Symbol, TradingPair>,
    orders: HashMap<OrderId, Order>,
    trades: Vec<Trade>,
    positions: HashMap<(AccountId, Symbol), Position>,
}

/// `Store` backed by in-memory maps. An execution commit takes the single
/// write lock, so readers never see half of one.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_count(&self) -> usize {
        self.tables.read().orders.len()
    }

    pub fn trade_count(&self) -> usize {
        self.tables.read().trades.len()
    }
}

impl Tables {
    fn put_accounts(&mut self, records: &[AccountRecord]) {
        for record in records {
            self.accounts.insert(record.account.id, record.clone());
        }
    }
}

impl Store for MemoryStore {
    fn save_accounts(&self, records: &[AccountRecord]) -> Result<()> {
        self.tables.write().put_accounts(records);
        Ok(())
    }

    fn load_account(&self, id: &AccountId) -> Result<Option<AccountRecord>> {
        Ok(self.tables.read().accounts.get(id).cloned())
    }

    fn save_pair(&self, pair: &TradingPair) -> Result<()> {
        self.tables.write().pairs.insert(pair.symbol.clone(), pair.clone());
        Ok(())
    }

    fn load_pair(&self, symbol: &Symbol) -> Result<Option<TradingPair>> {
        Ok(self.tables.read().pairs.get(symbol).cloned())
    }

    fn load_order(&self, id: &OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().orders.get(id).cloned())
    }

    fn save_order(&self, order: &Order) -> Result<()> {
        self.tables.write().orders.insert(order.id, order.clone());
        Ok(())
    }

    fn commit_execution(&self, record: &ExecutionRecord) -> Result<()> {
        let mut tables = self.tables.write();
        tables.put_accounts(&record.accounts);
        for order in &record.orders {
            tables.orders.insert(order.id, order.clone());
        }
        tables.trades.extend(record.trades.iter().cloned());
        for position in &record.positions {
            tables
                .positions
                .insert((position.account_id, position.symbol.clone()), position.clone());
        }
        Ok(())
    }

    fn trades_for_order(&self, id: &OrderId) -> Result<Vec<Trade>> {
        Ok(self
            .tables
            .read()
            .trades
            .iter()
            .filter(|t| t.order_id == *id)
            .cloned()
            .collect())
    }

    fn trades_for_symbol(&self, symbol: &Symbol) -> Result<Vec<Trade>> {
        Ok(self
            .tables
            .read()
            .trades
            .iter()
            .filter(|t| t.symbol == *symbol)
            .cloned()
            .collect())
    }

    fn trades_for_account(&self, account: &AccountId) -> Result<Vec<Trade>> {
        Ok(self
            .tables
            .read()
            .trades
            .iter()
            .filter(|t| t.account_id == *account)
            .cloned()
            .collect())
    }

    fn load_position(&self, account: &AccountId, symbol: &Symbol) -> Result<Option<Position>> {
        Ok(self.tables.read().positions.get(&(*account, symbol.clone())).cloned())
    }

    fn positions_for_account(&self, account: &AccountId) -> Result<Vec<Position>> {
        Ok(self
            .tables
            .read()
            .positions
            .values()
            .filter(|p| p.account_id == *account)
            .cloned()
            .collect())
    }

    fn active_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| !o.is_terminal())
            .filter(|o| symbol.is_none_or(|s| o.symbol == *s))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    fn orders_by_account(&self, account: &AccountId) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| o.account_id == *account)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    fn expired_orders(&self, now: DateTime<Utc>) -> Result<Vec<Order>> {
        Ok(self
            .tables
            .read()
            .orders
            .values()
            .filter(|o| !o.is_terminal() && o.is_expired(now))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderStatus, OwnerId, Side};
    use crate::ledger::{Account, AccountType};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_execution_commit_writes_accounts_with_the_rest() {
        let store = MemoryStore::new();
        let account = Account::new(OwnerId::new("alice"), AccountType::Spot);
        let id = account.id;
        let order = Order::new_limit(id, Symbol::new("BTCUSDT"), Side::Buy, dec!(1), dec!(100));

        store
            .commit_execution(&ExecutionRecord {
                orders: vec![order.clone()],
                accounts: vec![AccountRecord { account, balances: Vec::new() }],
                ..ExecutionRecord::default()
            })
            .unwrap();

        assert_eq!(store.load_account(&id).unwrap().unwrap().account.id, id);
        assert!(store.load_order(&order.id).unwrap().is_some());
        assert!(store.load_account(&AccountId::new()).unwrap().is_none());
        assert!(store.load_pair(&Symbol::new("BTCUSDT")).unwrap().is_none());
    }

    #[test]
    fn test_active_and_expired_queries() {
        let store = MemoryStore::new();
        let account = AccountId::new();
        let sym = Symbol::new("BTCUSDT");

        let live = Order::new_limit(account, sym.clone(), Side::Buy, dec!(1), dec!(100));
        let stale = Order::new_limit(account, sym.clone(), Side::Buy, dec!(1), dec!(100))
            .with_expiry(Utc::now() - Duration::seconds(5));
        let mut done = Order::new_limit(account, sym.clone(), Side::Sell, dec!(1), dec!(100));
        done.transition(OrderStatus::Cancelled);

        for o in [&live, &stale, &done] {
            store.save_order(o).unwrap();
        }

        assert_eq!(store.active_orders(Some(&sym)).unwrap().len(), 2);
        assert!(store.active_orders(Some(&Symbol::new("ETHUSDT"))).unwrap().is_empty());
        let expired = store.expired_orders(Utc::now()).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);
        assert_eq!(store.orders_by_account(&account).unwrap().len(), 3);
    }
}
