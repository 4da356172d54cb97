//! Portfolio risk formulas. Ratios are rounded to 6 places, half-up.

use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};

const SCALE: u32 = 6;

/// Margin level reported when no margin is in use
pub const UNBOUNDED_MARGIN_LEVEL: Decimal = Decimal::from_parts(999_999, 0, 0, false, 0);

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    (numerator / denominator).round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// One-tailed normal z-score for the supported confidence levels; 1.96 otherwise.
pub fn z_score(confidence: Decimal) -> Decimal {
    if confidence == Decimal::new(95, 2) {
        Decimal::new(1645, 3)
    } else if confidence == Decimal::new(99, 2) {
        Decimal::new(2326, 3)
    } else if confidence == Decimal::new(999, 3) {
        Decimal::new(3090, 3)
    } else {
        Decimal::new(196, 2)
    }
}

/// Notional-weighted volatility with a flat per-asset volatility.
pub fn portfolio_volatility(notionals: &[Decimal], asset_volatility: Decimal) -> Decimal {
    let total: Decimal = notionals.iter().sum();
    if total.is_zero() {
        return Decimal::ZERO;
    }
    notionals
        .iter()
        .map(|n| ratio(*n, total) * asset_volatility)
        .sum()
}

/// value × volatility × z × sqrt(days)
pub fn value_at_risk(portfolio_value: Decimal, volatility: Decimal, confidence: Decimal, horizon_days: u32) -> Decimal {
    let horizon = Decimal::from(horizon_days).sqrt().unwrap_or(Decimal::ZERO);
    portfolio_value * volatility * z_score(confidence) * horizon
}

/// (pnl / value − rf) / volatility; zero when either denominator is zero.
pub fn sharpe_ratio(total_pnl: Decimal, account_value: Decimal, risk_free_rate: Decimal, volatility: Decimal) -> Decimal {
    if account_value.is_zero() || volatility.is_zero() {
        return Decimal::ZERO;
    }
    let excess = ratio(total_pnl, account_value) - risk_free_rate;
    ratio(excess, volatility)
}

/// Kelly fraction `(b·p − q) / b` clamped to `[0, max_fraction]`.
pub fn kelly_fraction(win_rate: Decimal, avg_win: Decimal, avg_loss: Decimal, max_fraction: Decimal) -> Decimal {
    if avg_loss.is_zero() {
        return Decimal::ZERO;
    }
    let b = ratio(avg_win, avg_loss);
    if b.is_zero() {
        return Decimal::ZERO;
    }
    let q = Decimal::ONE - win_rate;
    ratio(b * win_rate - q, b).min(max_fraction).max(Decimal::ZERO)
}

/// |min(unrealized, 0)| / value
pub fn max_drawdown(unrealized_pnl: Decimal, account_value: Decimal) -> Decimal {
    if account_value.is_zero() {
        return Decimal::ZERO;
    }
    ratio(unrealized_pnl.min(Decimal::ZERO).abs(), account_value)
}

/// (balance + unrealized) / initial margin
pub fn margin_level(total_balance: Decimal, unrealized_pnl: Decimal, initial_margin: Decimal) -> Decimal {
    if initial_margin.is_zero() {
        return UNBOUNDED_MARGIN_LEVEL;
    }
    ratio(total_balance + unrealized_pnl, initial_margin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_z_scores() {
        assert_eq!(z_score(dec!(0.95)), dec!(1.645));
        assert_eq!(z_score(dec!(0.99)), dec!(2.326));
        assert_eq!(z_score(dec!(0.999)), dec!(3.090));
        assert_eq!(z_score(dec!(0.9)), dec!(1.96));
    }

    #[test]
    fn test_var_scales_with_horizon() {
        let one_day = value_at_risk(dec!(10000), dec!(0.02), dec!(0.95), 1);
        assert_eq!(one_day.round_dp(6), dec!(329));
        let four_days = value_at_risk(dec!(10000), dec!(0.02), dec!(0.95), 4);
        assert_eq!(four_days.round_dp(6), dec!(658));
    }

    #[test]
    fn test_portfolio_volatility_weights() {
        assert_eq!(portfolio_volatility(&[dec!(300), dec!(700)], dec!(0.02)), dec!(0.02));
        assert_eq!(portfolio_volatility(&[], dec!(0.02)), dec!(0));
    }

    #[test]
    fn test_sharpe_zero_safe() {
        assert_eq!(sharpe_ratio(dec!(100), dec!(0), dec!(0.01), dec!(0.15)), dec!(0));
        assert_eq!(sharpe_ratio(dec!(100), dec!(1000), dec!(0.01), dec!(0)), dec!(0));
        assert_eq!(sharpe_ratio(dec!(100), dec!(1000), dec!(0.01), dec!(0.15)), dec!(0.6));
    }

    #[test]
    fn test_kelly_clamped() {
        // b = 2, p = 0.6: (1.2 - 0.4) / 2 = 0.4 -> clamped to 0.25
        assert_eq!(kelly_fraction(dec!(0.6), dec!(200), dec!(100), dec!(0.25)), dec!(0.25));
        // b = 1, p = 0.55: 0.1
        assert_eq!(kelly_fraction(dec!(0.55), dec!(100), dec!(100), dec!(0.25)), dec!(0.1));
        // negative edge -> 0
        assert_eq!(kelly_fraction(dec!(0.3), dec!(100), dec!(100), dec!(0.25)), dec!(0));
        assert_eq!(kelly_fraction(dec!(0.6), dec!(100), dec!(0), dec!(0.25)), dec!(0));
    }

    #[test]
    fn test_margin_level_and_drawdown() {
        assert_eq!(margin_level(dec!(1050), dec!(0), dec!(1000)), dec!(1.05));
        assert_eq!(margin_level(dec!(1500), dec!(0), dec!(0)), UNBOUNDED_MARGIN_LEVEL);
        assert_eq!(max_drawdown(dec!(-50), dec!(1000)), dec!(0.05));
        assert_eq!(max_drawdown(dec!(50), dec!(1000)), dec!(0));
    }
}
