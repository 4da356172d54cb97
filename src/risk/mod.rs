//! Risk management - Pre-trade checks and portfolio metrics

pub mod metrics;

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::catalog::TradingPair;
use crate::core::{
    AccountId, Asset, Error, Order, OrderType, PriceFeed, Result, RiskCheck, RiskPolicy, Side,
};
use crate::ledger::{Account, AccountLedger};
use crate::position::PositionTracker;

/// Funds an order must reserve before it reaches the book
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub asset: Asset,
    pub amount: Decimal,
}

impl Reservation {
    /// Sells reserve base quantity. Priced buys reserve quantity × limit;
    /// unpriced buys reserve quantity × reference × (1 + slippage), where the
    /// reference is the stop price when there is one.
    pub fn for_order(order: &Order, pair: &TradingPair, reference_price: Decimal, market_slippage: Decimal) -> Self {
        match order.side {
            Side::Sell => Self {
                asset: pair.base_asset.clone(),
                amount: order.remaining_quantity,
            },
            Side::Buy => {
                let amount = match (order.order_type, order.price) {
                    (OrderType::Limit | OrderType::StopLimit, Some(price)) => order.remaining_quantity * price,
                    _ => {
                        let reference = order.stop_price.unwrap_or(reference_price);
                        order.remaining_quantity * reference * (Decimal::ONE + market_slippage)
                    }
                };
                Self {
                    asset: pair.quote_asset.clone(),
                    amount,
                }
            }
        }
    }
}

/// Point-in-time risk view of one account
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub account_id: AccountId,
    pub margin_level: Decimal,
    pub margin_call: bool,
    pub liquidation: bool,
    pub drawdown: Decimal,
}

pub struct RiskEngine {
    policy: RiskPolicy,
    ledger: Arc<AccountLedger>,
    positions: Arc<PositionTracker>,
    feed: Arc<dyn PriceFeed>,
}

impl RiskEngine {
    pub fn new(
        policy: RiskPolicy,
        ledger: Arc<AccountLedger>,
        positions: Arc<PositionTracker>,
        feed: Arc<dyn PriceFeed>,
    ) -> Self {
        Self {
            policy,
            ledger,
            positions,
            feed,
        }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Pre-trade checks in fixed order, failing on the first violation:
    /// balance, position size, daily loss, margin, concentration.
    /// Nothing is mutated. An order without a limit price is valued at one
    /// quote unit per unit of quantity.
    pub fn validate_order_risk(&self, order: &Order, reservation: &Reservation) -> Result<()> {
        let account = self.ledger.account(&order.account_id)?;

        let available = self.ledger.available(&account.id, &reservation.asset)?;
        if available < reservation.amount {
            return Err(Error::InsufficientBalance {
                account: account.id,
                asset: reservation.asset.clone(),
                available,
                required: reservation.amount,
            });
        }

        let notional = order.notional(Decimal::ONE);
        if notional > self.policy.max_position_size {
            return Err(Error::RiskLimitExceeded {
                check: RiskCheck::PositionSize,
                detail: format!("notional {} above max {}", notional, self.policy.max_position_size),
            });
        }

        let unrealized = self.current_unrealized(&account.id);
        let loss = unrealized.min(Decimal::ZERO).abs();
        if loss > self.policy.max_daily_loss {
            return Err(Error::RiskLimitExceeded {
                check: RiskCheck::DailyLoss,
                detail: format!("unrealized loss {} above cap {}", loss, self.policy.max_daily_loss),
            });
        }

        if account.margin_enabled {
            let level = metrics::margin_level(account.total_balance, unrealized, account.initial_margin);
            if level < self.policy.min_margin_level {
                return Err(Error::RiskLimitExceeded {
                    check: RiskCheck::Margin,
                    detail: format!("margin level {} below {}", level, self.policy.min_margin_level),
                });
            }
        }

        let concentration = if account.total_balance.is_zero() {
            None
        } else {
            Some(notional / account.total_balance)
        };
        match concentration {
            Some(ratio) if ratio <= self.policy.max_concentration => {}
            _ => {
                return Err(Error::RiskLimitExceeded {
                    check: RiskCheck::Concentration,
                    detail: format!(
                        "notional {} against balance {} exceeds {}",
                        notional, account.total_balance, self.policy.max_concentration
                    ),
                });
            }
        }

        debug!("risk ok for {} notional {}", order.id, notional);
        Ok(())
    }

    /// Unrealized PnL at current marks, without touching stored positions.
    fn current_unrealized(&self, account: &AccountId) -> Decimal {
        self.positions
            .open_positions(account)
            .iter()
            .map(|p| {
                let mark = self.feed.mark_price(&p.symbol).unwrap_or(p.mark_price);
                p.unrealized_at(mark)
            })
            .sum()
    }

    /// Re-mark positions and store unrealized PnL and initial/maintenance
    /// margin on the account.
    pub fn refresh_account(&self, account: &AccountId) -> Result<Account> {
        let unrealized = self.positions.mark_to_market(account, self.feed.as_ref());
        let notional: Decimal = self
            .positions
            .open_positions(account)
            .iter()
            .map(|p| p.notional())
            .sum();
        self.ledger.update_risk_metrics(
            account,
            unrealized,
            notional * self.policy.initial_margin_rate,
            notional * self.policy.maintenance_margin_rate,
        )?;
        self.ledger.account(account)
    }

    pub fn margin_level(&self, account: &AccountId) -> Result<Decimal> {
        let a = self.ledger.account(account)?;
        Ok(metrics::margin_level(a.total_balance, a.unrealized_pnl, a.initial_margin))
    }

    pub fn requires_margin_call(&self, account: &AccountId) -> Result<bool> {
        let a = self.ledger.account(account)?;
        if !a.margin_enabled {
            return Ok(false);
        }
        let level = metrics::margin_level(a.total_balance, a.unrealized_pnl, a.initial_margin);
        let call = level <= self.policy.margin_call_level;
        if call {
            warn!("⚠️ Account {} requires margin call, level {}", account, level);
        }
        Ok(call)
    }

    pub fn requires_liquidation(&self, account: &AccountId) -> Result<bool> {
        let a = self.ledger.account(account)?;
        if !a.margin_enabled {
            return Ok(false);
        }
        let level = metrics::margin_level(a.total_balance, a.unrealized_pnl, a.initial_margin);
        let liquidate = level <= self.policy.liquidation_level;
        if liquidate {
            error!("🚨 Account {} requires liquidation, level {}", account, level);
        }
        Ok(liquidate)
    }

    pub fn assess(&self, account: &AccountId) -> Result<RiskAssessment> {
        let a = self.ledger.account(account)?;
        let margin_level = metrics::margin_level(a.total_balance, a.unrealized_pnl, a.initial_margin);
        Ok(RiskAssessment {
            account_id: a.id,
            margin_level,
            margin_call: a.margin_enabled && margin_level <= self.policy.margin_call_level,
            liquidation: a.margin_enabled && margin_level <= self.policy.liquidation_level,
            drawdown: metrics::max_drawdown(a.unrealized_pnl, a.total_balance),
        })
    }

    pub fn calculate_var(&self, account: &AccountId, confidence: Decimal, horizon_days: u32) -> Result<Decimal> {
        let a = self.ledger.account(account)?;
        let notionals: Vec<Decimal> = self
            .positions
            .open_positions(account)
            .iter()
            .map(|p| p.notional())
            .collect();
        let volatility = metrics::portfolio_volatility(&notionals, self.policy.asset_volatility);
        let var = metrics::value_at_risk(a.total_balance, volatility, confidence, horizon_days);
        debug!("VaR {} for {}", var, account);
        Ok(var)
    }

    pub fn sharpe_ratio(&self, account: &AccountId, risk_free_rate: Decimal) -> Result<Decimal> {
        let a = self.ledger.account(account)?;
        Ok(metrics::sharpe_ratio(
            a.realized_pnl + a.unrealized_pnl,
            a.total_balance,
            risk_free_rate,
            self.policy.account_volatility,
        ))
    }

    pub fn max_drawdown(&self, account: &AccountId) -> Result<Decimal> {
        let a = self.ledger.account(account)?;
        let drawdown = metrics::max_drawdown(a.unrealized_pnl, a.total_balance);
        if drawdown > self.policy.max_drawdown {
            warn!("⚠️ Account {} drawdown {} above {}", account, drawdown, self.policy.max_drawdown);
        }
        Ok(drawdown)
    }

    /// Kelly-optimal position size in account currency
    pub fn optimal_position_size(
        &self,
        win_rate: Decimal,
        avg_win: Decimal,
        avg_loss: Decimal,
        account_value: Decimal,
    ) -> Decimal {
        let fraction = metrics::kelly_fraction(win_rate, avg_win, avg_loss, self.policy.max_kelly_fraction);
        account_value * fraction
    }
}
