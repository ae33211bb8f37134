//! Account-wide derivatives overview, independent of any running
//! protection session.

use crate::error::EngineError;
use crate::exchange::types::ExchangeApi;
use crate::protection::types::{QUOTE_SUFFIX_USDC, QUOTE_SUFFIX_USDT};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionSummaryRecord {
    pub symbol: String,
    pub side: Option<crate::exchange::types::Side>,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub notional_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: String,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub trailing_stop: String,
    pub liq_price: String,
    pub created_time: String,
    pub updated_time: String,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PositionsSummary {
    pub positions: Vec<PositionSummaryRecord>,
    pub open_count: usize,
    pub total_position_value: Decimal,
    pub total_unrealized_pnl: Decimal,
}

/// All open linear positions across the USDT and USDC settlement pools.
/// Placeholder rows with neither size, value, nor profit are dropped.
pub async fn positions_summary(api: &dyn ExchangeApi) -> Result<PositionsSummary, EngineError> {
    let mut summary = PositionsSummary::default();
    for settle_coin in [QUOTE_SUFFIX_USDT, QUOTE_SUFFIX_USDC] {
        for position in api.positions_for_settle_coin(settle_coin).await? {
            if position.size.is_zero()
                && position.notional_value.is_zero()
                && position.unrealized_pnl.is_zero()
            {
                continue;
            }
            summary.total_position_value += position.notional_value;
            summary.total_unrealized_pnl += position.unrealized_pnl;
            summary.positions.push(PositionSummaryRecord {
                symbol: position.symbol,
                side: position.side,
                size: position.size,
                entry_price: position.entry_price,
                mark_price: position.mark_price,
                notional_value: position.notional_value,
                unrealized_pnl: position.unrealized_pnl,
                leverage: position.leverage,
                stop_loss: position.stop_loss,
                take_profit: position.take_profit,
                trailing_stop: position.trailing_stop,
                liq_price: position.liq_price,
                created_time: position.created_time,
                updated_time: position.updated_time,
            });
        }
    }
    summary.open_count = summary.positions.len();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::types::Side;
    use crate::protection::test_support::{sample_position, MockExchange};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn merges_both_settlement_pools_and_totals() {
        let api = MockExchange::new();
        let mut short_eth = sample_position("ETHUSDT", Side::Sell, dec!(2000), dec!(4000), dec!(2));
        short_eth.unrealized_pnl = dec!(-12.5);
        api.set_settle_positions(
            "USDT",
            vec![
                sample_position("BTCUSDT", Side::Buy, dec!(30000), dec!(3000), dec!(0.1)),
                short_eth,
            ],
        );
        let mut sol = sample_position("SOLUSDC", Side::Buy, dec!(150), dec!(1500), dec!(10));
        sol.unrealized_pnl = dec!(20);
        api.set_settle_positions("USDC", vec![sol]);

        let summary = positions_summary(&api).await.unwrap();
        assert_eq!(summary.open_count, 3);
        assert_eq!(summary.total_position_value, dec!(8500));
        assert_eq!(summary.total_unrealized_pnl, dec!(7.5));
        assert_eq!(summary.positions[2].symbol, "SOLUSDC");
    }

    #[tokio::test]
    async fn drops_placeholder_rows() {
        let api = MockExchange::new();
        let mut placeholder = sample_position("BTCUSDT", Side::Buy, dec!(0), dec!(0), dec!(0));
        placeholder.side = None;
        api.set_settle_positions(
            "USDT",
            vec![
                placeholder,
                sample_position("XRPUSDT", Side::Buy, dec!(0.5), dec!(500), dec!(1000)),
            ],
        );

        let summary = positions_summary(&api).await.unwrap();
        assert_eq!(summary.open_count, 1);
        assert_eq!(summary.positions[0].symbol, "XRPUSDT");
    }

    #[tokio::test]
    async fn empty_account_yields_an_empty_summary() {
        let api = MockExchange::new();
        let summary = positions_summary(&api).await.unwrap();
        assert_eq!(summary.open_count, 0);
        assert!(summary.positions.is_empty());
        assert_eq!(summary.total_position_value, Decimal::ZERO);
    }
}
