use crate::exchange::types::{
    ExchangeApi, POSITION_IDX_HEDGE_LONG, POSITION_IDX_HEDGE_SHORT, POSITION_IDX_ONE_WAY,
};
use crate::protection::types::{LogCategory, LogPublisher};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Per-symbol position-mode cache. Resolved lazily from the exchange on
/// first use and kept for the process lifetime; a mismatch-retry win also
/// lands here via `store`.
#[derive(Default)]
pub struct PositionModeResolver {
    cache: Mutex<HashMap<String, u8>>,
}

impl PositionModeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, symbol: &str) -> Option<u8> {
        self.cache.lock().get(symbol).copied()
    }

    pub fn store(&self, symbol: &str, position_idx: u8) {
        self.cache.lock().insert(symbol.to_string(), position_idx);
    }

    /// Position index to attach to orders for this symbol. Queries current
    /// positions once; any row carrying a hedge index means hedge mode,
    /// otherwise one-way. Query failure defaults to one-way.
    pub async fn resolve(&self, api: &dyn ExchangeApi, log: &LogPublisher, symbol: &str) -> u8 {
        if let Some(position_idx) = self.cached(symbol) {
            return position_idx;
        }

        let resolved = match api.positions_for_symbol(symbol).await {
            Ok(rows) => {
                let hedge_idx = rows.iter().map(|row| row.position_idx).find(|idx| {
                    *idx == POSITION_IDX_HEDGE_LONG || *idx == POSITION_IDX_HEDGE_SHORT
                });
                match hedge_idx {
                    Some(idx) => {
                        log.info(
                            LogCategory::PositionMode,
                            format!("detected hedge mode for {symbol}, position index {idx}"),
                        );
                        idx
                    }
                    None => {
                        log.info(
                            LogCategory::PositionMode,
                            format!("detected one-way mode for {symbol}"),
                        );
                        POSITION_IDX_ONE_WAY
                    }
                }
            }
            Err(error) => {
                log.warn(
                    LogCategory::PositionMode,
                    format!("position mode query failed for {symbol}, assuming one-way: {error}"),
                );
                POSITION_IDX_ONE_WAY
            }
        };

        self.store(symbol, resolved);
        resolved
    }
}

/// The other two indices to try after a position-mode mismatch, in the
/// fixed 0, 1, 2 order.
pub fn mode_retry_candidates(initial: u8) -> impl Iterator<Item = u8> {
    [
        POSITION_IDX_ONE_WAY,
        POSITION_IDX_HEDGE_LONG,
        POSITION_IDX_HEDGE_SHORT,
    ]
    .into_iter()
    .filter(move |idx| *idx != initial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::test_support::{positions_row, MockExchange};
    use crate::protection::types::LogPublisher;

    #[tokio::test]
    async fn caches_one_way_mode_after_first_query() {
        let api = MockExchange::new();
        api.set_positions(vec![positions_row("BTCUSDT", 0)]);
        let (log, _rx) = LogPublisher::channel();
        let resolver = PositionModeResolver::new();

        assert_eq!(resolver.resolve(&api, &log, "BTCUSDT").await, 0);
        assert_eq!(api.position_query_count(), 1);

        assert_eq!(resolver.resolve(&api, &log, "BTCUSDT").await, 0);
        assert_eq!(api.position_query_count(), 1, "second resolve must hit the cache");
    }

    #[tokio::test]
    async fn detects_hedge_mode_from_position_rows() {
        let api = MockExchange::new();
        api.set_positions(vec![positions_row("BTCUSDT", 0), positions_row("BTCUSDT", 2)]);
        let (log, _rx) = LogPublisher::channel();
        let resolver = PositionModeResolver::new();

        assert_eq!(resolver.resolve(&api, &log, "BTCUSDT").await, 2);
        assert_eq!(resolver.cached("BTCUSDT"), Some(2));
    }

    #[tokio::test]
    async fn query_failure_defaults_to_one_way() {
        let api = MockExchange::new();
        api.fail_position_queries();
        let (log, _rx) = LogPublisher::channel();
        let resolver = PositionModeResolver::new();

        assert_eq!(resolver.resolve(&api, &log, "BTCUSDT").await, 0);
        assert_eq!(resolver.cached("BTCUSDT"), Some(0));
    }

    #[test]
    fn stored_index_overrides_future_resolution() {
        let resolver = PositionModeResolver::new();
        resolver.store("BTCUSDT", 2);
        assert_eq!(resolver.cached("BTCUSDT"), Some(2));
    }

    #[test]
    fn retry_candidates_skip_the_initial_index() {
        assert_eq!(mode_retry_candidates(0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(mode_retry_candidates(1).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(mode_retry_candidates(2).collect::<Vec<_>>(), vec![0, 1]);
    }
}
