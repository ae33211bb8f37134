//! Converges the exchange toward the configured protection orders: one
//! position-resident stop-loss trigger and at most one reduce-only limit
//! take-profit per symbol.

use crate::error::EngineError;
use crate::exchange::types::{ApiOutcome, ExchangeApi, Position, POSITION_IDX_ONE_WAY};
use crate::protection::calculator::{compute_stop_loss, compute_take_profit};
use crate::protection::position_mode::{mode_retry_candidates, PositionModeResolver};
use crate::protection::quantizer::quantize;
use crate::protection::types::{
    LogCategory, LogPublisher, ProtectionConfig, ProtectionKind, SlFingerprint, TpFingerprint,
};
use crate::protection::ORDER_SETTLE_PAUSE;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Exchange stop-loss prices within this distance of our target count as
/// already correct, so restarts do not churn an equivalent trigger.
const SL_MATCH_TOLERANCE: Decimal = dec!(0.01);

/// Fallback when instrument metadata is unavailable during quantity
/// clamping.
const FALLBACK_MIN_ORDER_QTY: Decimal = dec!(0.001);

/// Per-session reconciliation state. Fingerprints record the position
/// attributes each order was derived from; an unchanged fingerprint means
/// the standing order is still correct and the pass is a no-op.
#[derive(Default)]
pub struct OrderReconciler {
    tp_order_id: Option<String>,
    sl_fingerprint: Option<SlFingerprint>,
    tp_fingerprint: Option<TpFingerprint>,
}

impl OrderReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the cached fingerprint for one protection type so the next
    /// pass recomputes and replaces its order.
    pub fn invalidate(&mut self, kind: ProtectionKind) {
        match kind {
            ProtectionKind::StopLoss => self.sl_fingerprint = None,
            ProtectionKind::TakeProfit => self.tp_fingerprint = None,
        }
    }

    /// Forgets all session state. Used when the position goes flat.
    pub fn reset(&mut self) {
        self.tp_order_id = None;
        self.sl_fingerprint = None;
        self.tp_fingerprint = None;
    }

    pub fn is_engaged(&self) -> bool {
        self.tp_order_id.is_some()
            || self.sl_fingerprint.is_some()
            || self.tp_fingerprint.is_some()
    }

    pub async fn reconcile_stop_loss(
        &mut self,
        api: &dyn ExchangeApi,
        log: &LogPublisher,
        modes: &PositionModeResolver,
        config: &ProtectionConfig,
        position: &Position,
    ) -> Result<(), EngineError> {
        if !config.stop_loss_enabled {
            // Clear when this session placed a trigger, and also when the
            // exchange still reports one we are not tracking (a stale
            // trigger from an earlier session, or a dropped fingerprint).
            let was_tracked = self.sl_fingerprint.take().is_some();
            if was_tracked || position.stop_loss.is_some() {
                self.clear_trading_stop(api, log, modes, config).await;
            }
            return Ok(());
        }

        let fingerprint = SlFingerprint::of(position);
        if self.sl_fingerprint.as_ref() == Some(&fingerprint) {
            return Ok(());
        }

        let Some(side) = position.side else {
            return Ok(());
        };
        let Some(raw_target) = compute_stop_loss(
            side,
            position.entry_price,
            position.notional_value,
            config.stop_loss_amount,
        ) else {
            log.warn(
                LogCategory::StopLoss,
                format!(
                    "stop-loss target invalid for {} (entry {}, value {}, amount {})",
                    config.symbol,
                    position.entry_price,
                    position.notional_value,
                    config.stop_loss_amount
                ),
            );
            self.sl_fingerprint = Some(fingerprint);
            return Ok(());
        };

        let target = quantize(api, log, &config.symbol, raw_target).await;

        // The exchange may already carry an equivalent trigger from a
        // previous session.
        if let Some(existing) = position.stop_loss {
            if (existing - target).abs() <= SL_MATCH_TOLERANCE {
                log.info(
                    LogCategory::StopLoss,
                    format!("stop-loss already at {existing} for {}", config.symbol),
                );
                self.sl_fingerprint = Some(fingerprint);
                return Ok(());
            }
        }

        let initial_idx = modes.resolve(api, log, &config.symbol).await;
        let applied = self
            .apply_trading_stop(api, log, modes, &config.symbol, target, initial_idx)
            .await;
        if applied {
            log.info(
                LogCategory::StopLoss,
                format!("stop-loss set to {target} for {}", config.symbol),
            );
            self.sl_fingerprint = Some(fingerprint);
        }
        Ok(())
    }

    pub async fn reconcile_take_profit(
        &mut self,
        api: &dyn ExchangeApi,
        log: &LogPublisher,
        modes: &PositionModeResolver,
        config: &ProtectionConfig,
        position: &Position,
    ) -> Result<(), EngineError> {
        if !config.take_profit_enabled {
            let had_fingerprint = self.tp_fingerprint.take().is_some();
            if had_fingerprint || self.tp_order_id.is_some() {
                self.sweep_reduce_only_limits(api, log, &config.symbol).await?;
            }
            return Ok(());
        }

        let fingerprint = TpFingerprint::of(position);
        if self.tp_fingerprint.as_ref() == Some(&fingerprint) {
            return Ok(());
        }

        let Some(side) = position.side else {
            return Ok(());
        };
        let Some(raw_target) =
            compute_take_profit(side, position.entry_price, config.take_profit_percentage)
        else {
            log.warn(
                LogCategory::TakeProfit,
                format!(
                    "take-profit target invalid for {} (entry {}, percentage {})",
                    config.symbol, position.entry_price, config.take_profit_percentage
                ),
            );
            self.tp_fingerprint = Some(fingerprint);
            return Ok(());
        };

        // This engine owns every reduce-only limit order on the symbol, so
        // the replacement starts from a clean slate.
        let swept = self
            .sweep_reduce_only_limits(api, log, &config.symbol)
            .await?;
        if swept {
            tokio::time::sleep(ORDER_SETTLE_PAUSE).await;
        }

        let qty = self.clamp_order_qty(api, position.size, &config.symbol).await;
        let price = quantize(api, log, &config.symbol, raw_target).await;

        let base_idx = modes.resolve(api, log, &config.symbol).await;
        let initial_idx = if base_idx == POSITION_IDX_ONE_WAY {
            POSITION_IDX_ONE_WAY
        } else {
            side.hedge_index()
        };

        if let Some(order_id) = self
            .place_take_profit(api, log, modes, config, side, qty, price, initial_idx)
            .await
        {
            log.info(
                LogCategory::TakeProfit,
                format!("take-profit placed at {price} for {} ({qty})", config.symbol),
            );
            self.tp_order_id = order_id;
            self.tp_fingerprint = Some(fingerprint);
        }
        Ok(())
    }

    /// Cancels every reduce-only limit order on the symbol. Returns whether
    /// anything was actually cancelled; the tracked id is forgotten either
    /// way since any order absent from the listing is already gone.
    pub async fn sweep_reduce_only_limits(
        &mut self,
        api: &dyn ExchangeApi,
        log: &LogPublisher,
        symbol: &str,
    ) -> Result<bool, EngineError> {
        let orders = api.open_orders(symbol).await?;
        let mut swept = false;
        for order in orders.iter().filter(|order| order.is_reduce_only_limit()) {
            match api.cancel_order(symbol, &order.order_id).await {
                Ok(outcome) if outcome.is_success() => {
                    swept = true;
                    log.info(
                        LogCategory::TakeProfit,
                        format!("cancelled reduce-only order {} on {symbol}", order.order_id),
                    );
                }
                Ok(outcome) => {
                    log.warn(
                        LogCategory::TakeProfit,
                        format!(
                            "cancel of order {} on {symbol} rejected: {outcome:?}",
                            order.order_id
                        ),
                    );
                }
                Err(error) => {
                    log.warn(
                        LogCategory::TakeProfit,
                        format!("cancel of order {} on {symbol} failed: {error}", order.order_id),
                    );
                }
            }
        }
        self.tp_order_id = None;
        Ok(swept)
    }

    async fn clear_trading_stop(
        &mut self,
        api: &dyn ExchangeApi,
        log: &LogPublisher,
        modes: &PositionModeResolver,
        config: &ProtectionConfig,
    ) {
        let initial_idx = modes.resolve(api, log, &config.symbol).await;
        let cleared = self
            .apply_trading_stop(api, log, modes, &config.symbol, Decimal::ZERO, initial_idx)
            .await;
        if cleared {
            log.info(
                LogCategory::StopLoss,
                format!("stop-loss cleared for {}", config.symbol),
            );
        }
    }

    /// Sets (or clears, with a zero price) the trading stop, retrying the
    /// other position indices on a mode mismatch and caching the index that
    /// the exchange accepts.
    async fn apply_trading_stop(
        &mut self,
        api: &dyn ExchangeApi,
        log: &LogPublisher,
        modes: &PositionModeResolver,
        symbol: &str,
        stop_loss: Decimal,
        initial_idx: u8,
    ) -> bool {
        let candidates =
            std::iter::once(initial_idx).chain(mode_retry_candidates(initial_idx));
        for position_idx in candidates {
            match api.set_trading_stop(symbol, stop_loss, position_idx).await {
                Ok(outcome) if outcome.is_success() => {
                    modes.store(symbol, position_idx);
                    return true;
                }
                Ok(ApiOutcome::ModeMismatch) => {
                    log.info(
                        LogCategory::PositionMode,
                        format!("position index {position_idx} rejected for {symbol}, retrying"),
                    );
                }
                Ok(outcome) => {
                    log.error(
                        LogCategory::StopLoss,
                        format!("trading stop update rejected for {symbol}: {outcome:?}"),
                    );
                    return false;
                }
                Err(error) => {
                    log.error(
                        LogCategory::StopLoss,
                        format!("trading stop update failed for {symbol}: {error}"),
                    );
                    return false;
                }
            }
        }
        log.error(
            LogCategory::PositionMode,
            format!("every position index rejected the trading stop for {symbol}"),
        );
        false
    }

    /// `Some` means the order was accepted; the exchange ack may still omit
    /// the order id, in which case the next sweep finds it by listing.
    #[allow(clippy::too_many_arguments)]
    async fn place_take_profit(
        &mut self,
        api: &dyn ExchangeApi,
        log: &LogPublisher,
        modes: &PositionModeResolver,
        config: &ProtectionConfig,
        side: crate::exchange::types::Side,
        qty: Decimal,
        price: Decimal,
        initial_idx: u8,
    ) -> Option<Option<String>> {
        let candidates =
            std::iter::once(initial_idx).chain(mode_retry_candidates(initial_idx));
        for position_idx in candidates {
            let placed = api
                .place_reduce_only_limit(&config.symbol, side.closing(), qty, price, position_idx)
                .await;
            match placed {
                Ok(response) if response.outcome.is_success() => {
                    modes.store(&config.symbol, position_idx);
                    return Some(response.order_id);
                }
                Ok(response) if response.outcome == ApiOutcome::ModeMismatch => {
                    log.info(
                        LogCategory::PositionMode,
                        format!(
                            "position index {position_idx} rejected for {}, retrying",
                            config.symbol
                        ),
                    );
                }
                Ok(response) => {
                    log.error(
                        LogCategory::TakeProfit,
                        format!(
                            "take-profit placement rejected for {}: {:?}",
                            config.symbol, response.outcome
                        ),
                    );
                    return None;
                }
                Err(error) => {
                    log.error(
                        LogCategory::TakeProfit,
                        format!("take-profit placement failed for {}: {error}", config.symbol),
                    );
                    return None;
                }
            }
        }
        log.error(
            LogCategory::PositionMode,
            format!("every position index rejected the take-profit for {}", config.symbol),
        );
        None
    }

    async fn clamp_order_qty(
        &self,
        api: &dyn ExchangeApi,
        size: Decimal,
        symbol: &str,
    ) -> Decimal {
        let min_qty = match api.instrument_info(symbol).await {
            Ok(info) if info.min_order_qty > Decimal::ZERO => info.min_order_qty,
            _ => FALLBACK_MIN_ORDER_QTY,
        };
        size.max(min_qty)
    }
}
