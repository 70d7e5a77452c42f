use crate::config::RiskConfig;

/// Stop-distance position sizing.
///
/// Risk a fixed fraction of the equity baseline per trade: quantity is the
/// size that loses exactly `risk_amount` if the stop is hit. A margin cap
/// bounds the notional so one trade cannot consume the account.
pub fn position_quantity(
    config: &RiskConfig,
    equity_baseline: f64,
    entry_price_ref: f64,
    sl_pct: f64,
) -> f64 {
    if entry_price_ref <= 0.0 || sl_pct <= 0.0 || equity_baseline <= 0.0 {
        return 0.0;
    }

    let risk_amount = equity_baseline * config.risk_per_trade_pct;
    let sl_distance = entry_price_ref * sl_pct;
    let qty = risk_amount / sl_distance;

    // Margin cap: notional / leverage must stay under the per-trade share
    // of the baseline.
    let max_notional =
        equity_baseline * config.max_margin_per_trade_pct * config.leverage as f64;
    let max_qty = max_notional / entry_price_ref;

    qty.min(max_qty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_from_stop_distance() {
        let config = RiskConfig {
            risk_per_trade_pct: 0.005,
            max_margin_per_trade_pct: 0.25,
            leverage: 2,
            ..RiskConfig::default()
        };
        // risk = 7.0, sl_distance = 95000 * 0.0045 = 427.5 → qty ≈ 0.016374
        let qty = position_quantity(&config, 1400.0, 95_000.0, 0.0045);
        assert!((qty - 7.0 / 427.5).abs() < 1e-9);
    }

    #[test]
    fn test_margin_cap_binds() {
        let config = RiskConfig {
            risk_per_trade_pct: 0.01,
            max_margin_per_trade_pct: 0.05,
            leverage: 1,
            ..RiskConfig::default()
        };
        // Uncapped: 14 / (100 * 0.004) = 35. Cap: 1400*0.05*1/100 = 0.7
        let qty = position_quantity(&config, 1400.0, 100.0, 0.004);
        assert!((qty - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        let config = RiskConfig::default();
        assert_eq!(position_quantity(&config, 0.0, 95_000.0, 0.0045), 0.0);
        assert_eq!(position_quantity(&config, 1400.0, 0.0, 0.0045), 0.0);
        assert_eq!(position_quantity(&config, 1400.0, 95_000.0, 0.0), 0.0);
    }
}
