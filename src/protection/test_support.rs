//! In-memory exchange double for reconciler, pipeline, and engine tests.

use crate::error::EngineError;
use crate::exchange::types::{
    ApiOutcome, ExchangeApi, InstrumentInfo, OpenOrder, PlaceOrderResponse, Position, Side,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    SetTradingStop { stop_loss: Decimal, position_idx: u8 },
    PlaceOrder { side: Side, qty: Decimal, price: Decimal, position_idx: u8 },
    CancelOrder { order_id: String },
    CancelAll,
}

#[derive(Default)]
pub struct MockExchange {
    positions: Mutex<Vec<Position>>,
    settle_positions: Mutex<HashMap<String, Vec<Position>>>,
    open_orders: Mutex<Vec<OpenOrder>>,
    instrument: Mutex<Option<InstrumentInfo>>,
    server_time: Mutex<Option<i64>>,
    trading_stop: Mutex<Option<Decimal>>,
    accepted_indices: Mutex<Option<HashSet<u8>>>,
    trading_stop_overrides: Mutex<VecDeque<ApiOutcome>>,
    place_overrides: Mutex<VecDeque<ApiOutcome>>,
    fail_position_queries: AtomicBool,
    position_query_count: AtomicUsize,
    next_order_id: AtomicUsize,
    calls: Mutex<Vec<MockCall>>,
}

impl MockExchange {
    pub fn new() -> Self {
        let mock = Self::default();
        *mock.instrument.lock() = Some(InstrumentInfo {
            tick_size: dec!(0.1),
            price_scale: 2,
            min_order_qty: dec!(0.001),
        });
        mock
    }

    pub fn set_positions(&self, rows: Vec<Position>) {
        *self.positions.lock() = rows;
    }

    pub fn set_settle_positions(&self, settle_coin: &str, rows: Vec<Position>) {
        self.settle_positions
            .lock()
            .insert(settle_coin.to_string(), rows);
    }

    pub fn set_open_orders(&self, orders: Vec<OpenOrder>) {
        *self.open_orders.lock() = orders;
    }

    pub fn set_instrument(&self, info: Option<InstrumentInfo>) {
        *self.instrument.lock() = info;
    }

    pub fn set_server_time_ms(&self, time_ms: i64) {
        *self.server_time.lock() = Some(time_ms);
    }

    /// Only the given position indices succeed; everything else reports a
    /// position-mode mismatch.
    pub fn accept_only_indices(&self, indices: &[u8]) {
        *self.accepted_indices.lock() = Some(indices.iter().copied().collect());
    }

    pub fn push_trading_stop_outcome(&self, outcome: ApiOutcome) {
        self.trading_stop_overrides.lock().push_back(outcome);
    }

    pub fn push_place_outcome(&self, outcome: ApiOutcome) {
        self.place_overrides.lock().push_back(outcome);
    }

    pub fn fail_position_queries(&self) {
        self.fail_position_queries.store(true, Ordering::Relaxed);
    }

    pub fn restore_position_queries(&self) {
        self.fail_position_queries.store(false, Ordering::Relaxed);
    }

    pub fn position_query_count(&self) -> usize {
        self.position_query_count.load(Ordering::Relaxed)
    }

    pub fn open_orders_snapshot(&self) -> Vec<OpenOrder> {
        self.open_orders.lock().clone()
    }

    pub fn trading_stop(&self) -> Option<Decimal> {
        *self.trading_stop.lock()
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    fn index_allowed(&self, position_idx: u8) -> bool {
        match self.accepted_indices.lock().as_ref() {
            Some(accepted) => accepted.contains(&position_idx),
            None => true,
        }
    }

    fn mismatch() -> ApiOutcome {
        ApiOutcome::ModeMismatch
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn wallet_balance(&self) -> Result<ApiOutcome, EngineError> {
        Ok(ApiOutcome::Success)
    }

    async fn instrument_info(&self, symbol: &str) -> Result<InstrumentInfo, EngineError> {
        self.instrument.lock().clone().ok_or_else(|| {
            EngineError::InvalidArgument(format!("no instrument metadata for {symbol}"))
        })
    }

    async fn positions_for_symbol(&self, _symbol: &str) -> Result<Vec<Position>, EngineError> {
        if self.fail_position_queries.load(Ordering::Relaxed) {
            return Err(EngineError::Exchange {
                code: 10002,
                message: "mock position query failure".to_string(),
            });
        }
        self.position_query_count.fetch_add(1, Ordering::Relaxed);
        Ok(self.positions.lock().clone())
    }

    async fn positions_for_settle_coin(
        &self,
        settle_coin: &str,
    ) -> Result<Vec<Position>, EngineError> {
        Ok(self
            .settle_positions
            .lock()
            .get(settle_coin)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>, EngineError> {
        Ok(self.open_orders.lock().clone())
    }

    async fn place_reduce_only_limit(
        &self,
        _symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
        position_idx: u8,
    ) -> Result<PlaceOrderResponse, EngineError> {
        self.calls.lock().push(MockCall::PlaceOrder {
            side,
            qty,
            price,
            position_idx,
        });

        if let Some(outcome) = self.place_overrides.lock().pop_front() {
            return Ok(PlaceOrderResponse {
                outcome,
                order_id: None,
            });
        }
        if !self.index_allowed(position_idx) {
            return Ok(PlaceOrderResponse {
                outcome: Self::mismatch(),
                order_id: None,
            });
        }

        let order_id = format!(
            "mock-order-{}",
            self.next_order_id.fetch_add(1, Ordering::Relaxed) + 1
        );
        self.open_orders.lock().push(OpenOrder {
            order_id: order_id.clone(),
            side: Some(side),
            order_type: "Limit".to_string(),
            price,
            qty,
            reduce_only: true,
        });
        Ok(PlaceOrderResponse {
            outcome: ApiOutcome::Success,
            order_id: Some(order_id),
        })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<ApiOutcome, EngineError> {
        self.calls.lock().push(MockCall::CancelOrder {
            order_id: order_id.to_string(),
        });
        self.open_orders
            .lock()
            .retain(|order| order.order_id != order_id);
        Ok(ApiOutcome::Success)
    }

    async fn cancel_all_orders(&self, _symbol: &str) -> Result<ApiOutcome, EngineError> {
        self.calls.lock().push(MockCall::CancelAll);
        self.open_orders.lock().clear();
        Ok(ApiOutcome::Success)
    }

    async fn set_trading_stop(
        &self,
        _symbol: &str,
        stop_loss: Decimal,
        position_idx: u8,
    ) -> Result<ApiOutcome, EngineError> {
        self.calls.lock().push(MockCall::SetTradingStop {
            stop_loss,
            position_idx,
        });

        if let Some(outcome) = self.trading_stop_overrides.lock().pop_front() {
            return Ok(outcome);
        }
        if !self.index_allowed(position_idx) {
            return Ok(Self::mismatch());
        }

        *self.trading_stop.lock() = if stop_loss.is_zero() {
            None
        } else {
            Some(stop_loss)
        };
        Ok(ApiOutcome::Success)
    }

    async fn server_time_ms(&self) -> Result<i64, EngineError> {
        self.server_time.lock().ok_or(EngineError::Exchange {
            code: 10016,
            message: "mock server time unavailable".to_string(),
        })
    }
}

pub fn sample_position(
    symbol: &str,
    side: Side,
    entry_price: Decimal,
    notional_value: Decimal,
    size: Decimal,
) -> Position {
    Position {
        symbol: symbol.to_string(),
        side: Some(side),
        size,
        entry_price,
        notional_value,
        mark_price: entry_price,
        unrealized_pnl: Decimal::ZERO,
        leverage: "10".to_string(),
        position_idx: 0,
        stop_loss: None,
        take_profit: None,
        trailing_stop: String::new(),
        liq_price: String::new(),
        created_time: String::new(),
        updated_time: String::new(),
    }
}

pub fn positions_row(symbol: &str, position_idx: u8) -> Position {
    let mut row = sample_position(symbol, Side::Buy, dec!(30000), dec!(3000), dec!(0.1));
    row.position_idx = position_idx;
    row
}

pub fn stray_reduce_only_order(order_id: &str, price: Decimal) -> OpenOrder {
    OpenOrder {
        order_id: order_id.to_string(),
        side: Some(Side::Sell),
        order_type: "Limit".to_string(),
        price,
        qty: dec!(0.1),
        reduce_only: true,
    }
}
