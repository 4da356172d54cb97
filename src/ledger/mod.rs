//! Account ledger - Balances, reservations and atomic settlement batches
//!
//! Each account sits behind its own mutex. A batch touching several accounts
//! locks them in ascending id order, validates every leg against a scratch
//! copy and writes nothing unless all legs succeed.

pub mod account;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

pub use account::{Account, AccountRecord, AccountType, Balance};

use crate::core::{AccountId, Asset, Error, OwnerId, Result, Store};

/// One leg of a ledger batch
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOp {
    /// total += amount, available += amount
    Credit { account: AccountId, asset: Asset, amount: Decimal },
    /// total -= amount, available -= amount
    Debit { account: AccountId, asset: Asset, amount: Decimal },
    /// available -> locked
    Lock { account: AccountId, asset: Asset, amount: Decimal },
    /// locked -> available
    Unlock { account: AccountId, asset: Asset, amount: Decimal },
    /// total -= amount, locked -= amount
    DebitLocked { account: AccountId, asset: Asset, amount: Decimal },
}

impl LedgerOp {
    pub fn account(&self) -> AccountId {
        match self {
            LedgerOp::Credit { account, .. }
            | LedgerOp::Debit { account, .. }
            | LedgerOp::Lock { account, .. }
            | LedgerOp::Unlock { account, .. }
            | LedgerOp::DebitLocked { account, .. } => *account,
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            LedgerOp::Credit { amount, .. }
            | LedgerOp::Debit { amount, .. }
            | LedgerOp::Lock { amount, .. }
            | LedgerOp::Unlock { amount, .. }
            | LedgerOp::DebitLocked { amount, .. } => *amount,
        }
    }
}

struct AccountState {
    account: Account,
    balances: BTreeMap<Asset, Balance>,
}

impl AccountState {
    fn record(&self) -> AccountRecord {
        AccountRecord {
            account: self.account.clone(),
            balances: self.balances.values().cloned().collect(),
        }
    }
}

/// Post-batch copy of every account a batch touches. The commit step reads
/// it and may fold realized PnL in; it is installed only if the commit
/// succeeds.
pub struct LedgerBatch {
    ids: Vec<AccountId>,
    accounts: Vec<Account>,
    balances: Vec<BTreeMap<Asset, Balance>>,
}

impl LedgerBatch {
    fn index(&self, id: &AccountId) -> Result<usize> {
        self.ids.binary_search(id).map_err(|_| Error::AccountNotFound(*id))
    }

    pub fn add_realized_pnl(&mut self, id: &AccountId, delta: Decimal) -> Result<()> {
        let idx = self.index(id)?;
        self.accounts[idx].realized_pnl += delta;
        Ok(())
    }

    pub fn records(&self) -> Vec<AccountRecord> {
        self.accounts
            .iter()
            .zip(&self.balances)
            .map(|(account, balances)| AccountRecord {
                account: account.clone(),
                balances: balances.values().cloned().collect(),
            })
            .collect()
    }
}

/// Per-asset balances for every account. With a store attached, every
/// mutation is saved before it becomes visible and fails if the save does.
pub struct AccountLedger {
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<AccountState>>>>,
    store: Option<Arc<dyn Store>>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    fn persist(&self, records: &[AccountRecord]) -> Result<()> {
        match &self.store {
            Some(store) => store.save_accounts(records),
            None => Ok(()),
        }
    }

    pub fn open_account(&self, owner: OwnerId, account_type: AccountType) -> Result<AccountId> {
        let state = AccountState {
            account: Account::new(owner, account_type),
            balances: BTreeMap::new(),
        };
        let id = state.account.id;
        self.persist(&[state.record()])?;
        info!("📒 Opened {:?} account {} for {}", account_type, id, state.account.owner);
        self.accounts.write().insert(id, Arc::new(Mutex::new(state)));
        Ok(id)
    }

    /// Install an account read back from the store, replacing any copy
    /// already held.
    pub fn restore(&self, record: AccountRecord) -> AccountId {
        let id = record.account.id;
        let balances = record
            .balances
            .into_iter()
            .map(|b| (b.asset.clone(), b))
            .collect();
        info!("📒 Restored account {} for {}", id, record.account.owner);
        self.accounts.write().insert(
            id,
            Arc::new(Mutex::new(AccountState {
                account: record.account,
                balances,
            })),
        );
        id
    }

    fn handle(&self, id: &AccountId) -> Result<Arc<Mutex<AccountState>>> {
        self.accounts
            .read()
            .get(id)
            .cloned()
            .ok_or(Error::AccountNotFound(*id))
    }

    /// Change account-level fields of one account under its lock.
    fn update(&self, id: &AccountId, change: impl FnOnce(&mut Account)) -> Result<()> {
        let handle = self.handle(id)?;
        let mut state = handle.lock();
        let mut account = state.account.clone();
        change(&mut account);
        account.updated_at = chrono::Utc::now();
        self.persist(&[AccountRecord {
            account: account.clone(),
            balances: state.balances.values().cloned().collect(),
        }])?;
        state.account = account;
        Ok(())
    }

    pub fn credit(&self, account: AccountId, asset: Asset, amount: Decimal) -> Result<()> {
        self.apply(&[LedgerOp::Credit { account, asset, amount }])
    }

    pub fn debit(&self, account: AccountId, asset: Asset, amount: Decimal) -> Result<()> {
        self.apply(&[LedgerOp::Debit { account, asset, amount }])
    }

    pub fn lock(&self, account: AccountId, asset: Asset, amount: Decimal) -> Result<()> {
        self.apply(&[LedgerOp::Lock { account, asset, amount }])
    }

    pub fn unlock(&self, account: AccountId, asset: Asset, amount: Decimal) -> Result<()> {
        self.apply(&[LedgerOp::Unlock { account, asset, amount }])
    }

    /// Debit `from`, credit `to`. Both or neither.
    pub fn transfer(&self, from: AccountId, to: AccountId, asset: Asset, amount: Decimal) -> Result<()> {
        self.apply(&[
            LedgerOp::Debit { account: from, asset: asset.clone(), amount },
            LedgerOp::Credit { account: to, asset: asset.clone(), amount },
        ])?;
        debug!("transfer {} {} from {} to {}", amount, asset, from, to);
        Ok(())
    }

    /// Apply a batch of legs atomically and save the touched accounts.
    pub fn apply(&self, ops: &[LedgerOp]) -> Result<()> {
        self.apply_with(ops, |batch| self.persist(&batch.records()))
    }

    /// Validate `ops`, then run `commit` on the resulting batch while every
    /// touched account is still locked. Nothing is installed unless both
    /// succeed. `commit` is responsible for saving `batch.records()`.
    pub fn apply_with<T>(
        &self,
        ops: &[LedgerOp],
        commit: impl FnOnce(&mut LedgerBatch) -> Result<T>,
    ) -> Result<T> {
        for op in ops {
            if op.amount() <= Decimal::ZERO {
                return Err(Error::Validation(format!(
                    "ledger amount must be positive, got {}",
                    op.amount()
                )));
            }
        }

        let ids: Vec<AccountId> = ops
            .iter()
            .map(LedgerOp::account)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let handles = ids
            .iter()
            .map(|id| self.handle(id))
            .collect::<Result<Vec<_>>>()?;

        // Ascending id order
        let mut guards: Vec<_> = handles.iter().map(|h| h.lock()).collect();
        let mut batch = LedgerBatch {
            accounts: guards.iter().map(|g| g.account.clone()).collect(),
            balances: guards.iter().map(|g| g.balances.clone()).collect(),
            ids,
        };

        for op in ops {
            let idx = batch.index(&op.account())?;
            apply_leg(&mut batch.balances[idx], op)?;
        }
        for (account, balances) in batch.accounts.iter_mut().zip(&batch.balances) {
            account.recompute(balances.values());
        }

        let out = commit(&mut batch)?;

        for ((guard, account), balances) in guards.iter_mut().zip(batch.accounts).zip(batch.balances) {
            guard.account = account;
            guard.balances = balances;
        }
        Ok(out)
    }

    pub fn account(&self, id: &AccountId) -> Result<Account> {
        Ok(self.handle(id)?.lock().account.clone())
    }

    pub fn accounts(&self) -> Vec<Account> {
        let handles: Vec<_> = self.accounts.read().values().cloned().collect();
        handles.iter().map(|h| h.lock().account.clone()).collect()
    }

    pub fn owner_of(&self, id: &AccountId) -> Result<OwnerId> {
        Ok(self.handle(id)?.lock().account.owner.clone())
    }

    /// Balance row for `asset`; a zero row when the asset was never credited.
    pub fn balance(&self, id: &AccountId, asset: &Asset) -> Result<Balance> {
        let handle = self.handle(id)?;
        let state = handle.lock();
        Ok(state
            .balances
            .get(asset)
            .cloned()
            .unwrap_or_else(|| Balance::new(asset.clone())))
    }

    pub fn available(&self, id: &AccountId, asset: &Asset) -> Result<Decimal> {
        Ok(self.balance(id, asset)?.available)
    }

    pub fn balances(&self, id: &AccountId) -> Result<Vec<Balance>> {
        Ok(self.handle(id)?.lock().balances.values().cloned().collect())
    }

    pub fn set_margin_enabled(&self, id: &AccountId, enabled: bool) -> Result<()> {
        self.update(id, |a| a.margin_enabled = enabled)
    }

    pub fn set_active(&self, id: &AccountId, active: bool) -> Result<()> {
        self.update(id, |a| a.active = active)
    }

    pub fn record_realized_pnl(&self, id: &AccountId, delta: Decimal) -> Result<()> {
        self.update(id, |a| a.realized_pnl += delta)
    }

    pub fn update_risk_metrics(
        &self,
        id: &AccountId,
        unrealized_pnl: Decimal,
        initial_margin: Decimal,
        maintenance_margin: Decimal,
    ) -> Result<()> {
        self.update(id, |a| {
            a.unrealized_pnl = unrealized_pnl;
            a.initial_margin = initial_margin;
            a.maintenance_margin = maintenance_margin;
        })
    }
}

impl Default for AccountLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_leg(balances: &mut BTreeMap<Asset, Balance>, op: &LedgerOp) -> Result<()> {
    match op {
        LedgerOp::Credit { asset, amount, .. } => {
            let row = balances
                .entry(asset.clone())
                .or_insert_with(|| Balance::new(asset.clone()));
            row.total += *amount;
            row.available += *amount;
            row.updated_at = chrono::Utc::now();
        }
        LedgerOp::Debit { account, asset, amount } | LedgerOp::Lock { account, asset, amount } => {
            let available = balances.get(asset).map_or(Decimal::ZERO, |b| b.available);
            if available < *amount {
                return Err(Error::InsufficientBalance {
                    account: *account,
                    asset: asset.clone(),
                    available,
                    required: *amount,
                });
            }
            // Present, since available > 0
            if let Some(row) = balances.get_mut(asset) {
                row.available -= *amount;
                if matches!(op, LedgerOp::Debit { .. }) {
                    row.total -= *amount;
                } else {
                    row.locked += *amount;
                }
                row.updated_at = chrono::Utc::now();
            }
        }
        LedgerOp::Unlock { account, asset, amount }
        | LedgerOp::DebitLocked { account, asset, amount } => {
            let locked = balances.get(asset).map_or(Decimal::ZERO, |b| b.locked);
            if locked < *amount {
                return Err(Error::InsufficientLocked {
                    account: *account,
                    asset: asset.clone(),
                    locked,
                    required: *amount,
                });
            }
            if let Some(row) = balances.get_mut(asset) {
                row.locked -= *amount;
                if matches!(op, LedgerOp::Unlock { .. }) {
                    row.available += *amount;
                } else {
                    row.total -= *amount;
                }
                row.updated_at = chrono::Utc::now();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn usdt() -> Asset {
        Asset::new("USDT")
    }

    fn funded(ledger: &AccountLedger, amount: Decimal) -> AccountId {
        let id = ledger.open_account(OwnerId::new("alice"), AccountType::Spot).unwrap();
        ledger.credit(id, usdt(), amount).unwrap();
        id
    }

    fn assert_consistent(ledger: &AccountLedger, id: &AccountId) {
        for b in ledger.balances(id).unwrap() {
            assert!(b.is_consistent(), "inconsistent row {:?}", b);
        }
    }

    #[test]
    fn test_credit_lock_unlock_debit() {
        let ledger = AccountLedger::new();
        let id = funded(&ledger, dec!(1000));

        ledger.lock(id, usdt(), dec!(900)).unwrap();
        let b = ledger.balance(&id, &usdt()).unwrap();
        assert_eq!((b.total, b.available, b.locked), (dec!(1000), dec!(100), dec!(900)));

        ledger.unlock(id, usdt(), dec!(400)).unwrap();
        ledger.debit(id, usdt(), dec!(500)).unwrap();
        let b = ledger.balance(&id, &usdt()).unwrap();
        assert_eq!((b.total, b.available, b.locked), (dec!(500), dec!(0), dec!(500)));
        assert_consistent(&ledger, &id);

        let account = ledger.account(&id).unwrap();
        assert_eq!(account.total_balance, dec!(500));
        assert_eq!(account.locked_balance, dec!(500));
    }

    #[test]
    fn test_insufficient_errors_leave_state() {
        let ledger = AccountLedger::new();
        let id = funded(&ledger, dec!(100));

        let err = ledger.lock(id, usdt(), dec!(101)).unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { required, .. } if required == dec!(101)));

        let err = ledger.unlock(id, usdt(), dec!(1)).unwrap_err();
        assert!(matches!(err, Error::InsufficientLocked { .. }));

        let err = ledger.debit(id, Asset::new("BTC"), dec!(1)).unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { available, .. } if available.is_zero()));

        assert_eq!(ledger.available(&id, &usdt()).unwrap(), dec!(100));
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let ledger = AccountLedger::new();
        let id = funded(&ledger, dec!(100));
        assert!(matches!(ledger.credit(id, usdt(), dec!(0)), Err(Error::Validation(_))));
        assert!(matches!(ledger.lock(id, usdt(), dec!(-1)), Err(Error::Validation(_))));
    }

    #[test]
    fn test_transfer_both_or_neither() {
        let ledger = AccountLedger::new();
        let a = funded(&ledger, dec!(100));
        let b = ledger.open_account(OwnerId::new("bob"), AccountType::Spot).unwrap();

        ledger.transfer(a, b, usdt(), dec!(40)).unwrap();
        assert_eq!(ledger.available(&a, &usdt()).unwrap(), dec!(60));
        assert_eq!(ledger.available(&b, &usdt()).unwrap(), dec!(40));

        let missing = AccountId::new();
        assert!(matches!(
            ledger.transfer(a, missing, usdt(), dec!(10)),
            Err(Error::AccountNotFound(_))
        ));
        assert!(ledger.transfer(a, b, usdt(), dec!(61)).is_err());
        assert_eq!(ledger.available(&a, &usdt()).unwrap(), dec!(60));
        assert_eq!(ledger.available(&b, &usdt()).unwrap(), dec!(40));
    }

    #[test]
    fn test_batch_failure_writes_nothing() {
        let ledger = AccountLedger::new();
        let a = funded(&ledger, dec!(100));
        let b = funded(&ledger, dec!(100));

        let ops = vec![
            LedgerOp::Credit { account: a, asset: Asset::new("BTC"), amount: dec!(1) },
            LedgerOp::Debit { account: b, asset: usdt(), amount: dec!(150) },
        ];
        assert!(ledger.apply(&ops).is_err());
        assert!(ledger.balance(&a, &Asset::new("BTC")).unwrap().total.is_zero());
        assert_eq!(ledger.available(&b, &usdt()).unwrap(), dec!(100));
    }

    #[test]
    fn test_commit_failure_discards_batch() {
        let ledger = AccountLedger::new();
        let a = funded(&ledger, dec!(100));
        let ops = vec![LedgerOp::Debit { account: a, asset: usdt(), amount: dec!(10) }];

        let result: Result<()> = ledger.apply_with(&ops, |_| Err(Error::Store("down".into())));
        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(ledger.available(&a, &usdt()).unwrap(), dec!(100));

        let n = ledger.apply_with(&ops, |_| Ok(7)).unwrap();
        assert_eq!(n, 7);
        assert_eq!(ledger.available(&a, &usdt()).unwrap(), dec!(90));
    }

    #[test]
    fn test_batch_realized_pnl_discarded_with_failed_commit() {
        let ledger = AccountLedger::new();
        let a = funded(&ledger, dec!(100));
        let ops = vec![LedgerOp::Debit { account: a, asset: usdt(), amount: dec!(10) }];

        let result: Result<()> = ledger.apply_with(&ops, |batch| {
            batch.add_realized_pnl(&a, dec!(7))?;
            let record = &batch.records()[0];
            assert_eq!((record.account.realized_pnl, record.account.total_balance), (dec!(7), dec!(90)));
            Err(Error::Store("down".into()))
        });
        assert!(result.is_err());
        let account = ledger.account(&a).unwrap();
        assert_eq!((account.realized_pnl, account.total_balance), (dec!(0), dec!(100)));

        ledger.apply_with(&ops, |batch| batch.add_realized_pnl(&a, dec!(7))).unwrap();
        let account = ledger.account(&a).unwrap();
        assert_eq!((account.realized_pnl, account.total_balance), (dec!(7), dec!(90)));

        let outsider = AccountId::new();
        let err = ledger.apply_with(&ops, |batch| batch.add_realized_pnl(&outsider, dec!(1)));
        assert!(matches!(err, Err(Error::AccountNotFound(_))));
        assert_eq!(ledger.available(&a, &usdt()).unwrap(), dec!(90));
    }

    #[test]
    fn test_store_backed_ledger_saves_every_mutation() {
        let store = Arc::new(MemoryStore::new());
        let ledger = AccountLedger::with_store(store.clone());
        let id = funded(&ledger, dec!(100));
        ledger.lock(id, usdt(), dec!(40)).unwrap();
        ledger.record_realized_pnl(&id, dec!(3)).unwrap();

        let record = store.load_account(&id).unwrap().unwrap();
        assert_eq!(record.account, ledger.account(&id).unwrap());
        assert_eq!(record.account.realized_pnl, dec!(3));
        assert_eq!(record.balances, ledger.balances(&id).unwrap());

        let restored = AccountLedger::new();
        restored.restore(record);
        assert_eq!(restored.balance(&id, &usdt()).unwrap().locked, dec!(40));
    }

    #[test]
    fn test_legs_see_earlier_legs() {
        let ledger = AccountLedger::new();
        let a = funded(&ledger, dec!(10));
        ledger
            .apply(&[
                LedgerOp::Lock { account: a, asset: usdt(), amount: dec!(10) },
                LedgerOp::DebitLocked { account: a, asset: usdt(), amount: dec!(10) },
            ])
            .unwrap();
        let b = ledger.balance(&a, &usdt()).unwrap();
        assert!(b.total.is_zero() && b.locked.is_zero() && b.available.is_zero());
    }

    #[test]
    fn test_concurrent_reservations_never_overspend() {
        let ledger = Arc::new(AccountLedger::new());
        let id = funded(&ledger, dec!(100));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| ledger.lock(id, usdt(), dec!(1)).is_ok())
                        .count()
                })
            })
            .collect();
        let locked: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(locked, 100);
        let b = ledger.balance(&id, &usdt()).unwrap();
        assert_eq!(b.locked, dec!(100));
        assert!(b.available.is_zero());
        assert_consistent(&ledger, &id);
    }
}
