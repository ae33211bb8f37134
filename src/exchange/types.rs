use crate::error::EngineError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const RET_CODE_OK: i64 = 0;
pub const RET_CODE_POSITION_MODE_MISMATCH: i64 = 10001;
pub const RET_CODE_TRADING_STOP_UNCHANGED: i64 = 34040;

/// One-way mode, or the hedge-mode index for the long/short leg of a symbol.
pub const POSITION_IDX_ONE_WAY: u8 = 0;
pub const POSITION_IDX_HEDGE_LONG: u8 = 1;
pub const POSITION_IDX_HEDGE_SHORT: u8 = 2;

#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .finish()
    }
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.trim().is_empty() && !self.api_secret.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "Buy",
            Self::Sell => "Sell",
        }
    }

    /// The order side that closes a position held on this side.
    pub fn closing(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Hedge-mode position index for the leg this side belongs to.
    pub fn hedge_index(self) -> u8 {
        match self {
            Self::Buy => POSITION_IDX_HEDGE_LONG,
            Self::Sell => POSITION_IDX_HEDGE_SHORT,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Buy" => Some(Self::Buy),
            "Sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Tagged result of an exchange call, so expected non-zero codes are
/// branches rather than faults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiOutcome {
    Success,
    AlreadySet,
    ModeMismatch,
    Failure { code: i64, message: String },
}

impl ApiOutcome {
    pub fn from_ret(code: i64, message: &str) -> Self {
        match code {
            RET_CODE_OK => Self::Success,
            RET_CODE_POSITION_MODE_MISMATCH => Self::ModeMismatch,
            RET_CODE_TRADING_STOP_UNCHANGED => Self::AlreadySet,
            _ => Self::Failure {
                code,
                message: message.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::AlreadySet)
    }
}

#[derive(Debug, Clone)]
pub struct PlaceOrderResponse {
    pub outcome: ApiOutcome,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentInfo {
    pub tick_size: Decimal,
    pub price_scale: u32,
    pub min_order_qty: Decimal,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PositionWire {
    pub symbol: String,
    pub side: String,
    pub size: String,
    pub avg_price: String,
    pub position_value: String,
    pub mark_price: String,
    pub unrealised_pnl: String,
    pub leverage: String,
    pub position_idx: i64,
    pub stop_loss: String,
    pub take_profit: String,
    pub trailing_stop: String,
    pub liq_price: String,
    pub position_status: String,
    pub created_time: String,
    pub updated_time: String,
}

/// Position snapshot with the numeric fields parsed into exact decimals.
/// Fetched fresh every poll cycle; never cached beyond change detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: Option<Side>,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub notional_value: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: String,
    pub position_idx: u8,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub trailing_stop: String,
    pub liq_price: String,
    pub created_time: String,
    pub updated_time: String,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }
}

fn parse_decimal_or_zero(value: &str) -> Decimal {
    Decimal::from_str(value.trim()).unwrap_or_default()
}

fn parse_optional_decimal(value: &str) -> Option<Decimal> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed).ok().filter(|v| !v.is_zero())
}

impl From<PositionWire> for Position {
    fn from(wire: PositionWire) -> Self {
        Self {
            side: Side::parse(&wire.side),
            size: parse_decimal_or_zero(&wire.size),
            entry_price: parse_decimal_or_zero(&wire.avg_price),
            notional_value: parse_decimal_or_zero(&wire.position_value),
            mark_price: parse_decimal_or_zero(&wire.mark_price),
            unrealized_pnl: parse_decimal_or_zero(&wire.unrealised_pnl),
            leverage: wire.leverage,
            position_idx: u8::try_from(wire.position_idx).unwrap_or(POSITION_IDX_ONE_WAY),
            stop_loss: parse_optional_decimal(&wire.stop_loss),
            take_profit: parse_optional_decimal(&wire.take_profit),
            trailing_stop: wire.trailing_stop,
            liq_price: wire.liq_price,
            created_time: wire.created_time,
            updated_time: wire.updated_time,
            symbol: wire.symbol,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenOrderWire {
    pub order_id: String,
    pub side: String,
    pub order_type: String,
    pub price: String,
    pub qty: String,
    pub reduce_only: bool,
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub side: Option<Side>,
    pub order_type: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub reduce_only: bool,
}

impl OpenOrder {
    /// A take-profit in this engine is a plain reduce-only limit order, so
    /// every such order on the symbol is subject to the exclusive sweep.
    pub fn is_reduce_only_limit(&self) -> bool {
        self.reduce_only && self.order_type.eq_ignore_ascii_case("Limit")
    }
}

impl From<OpenOrderWire> for OpenOrder {
    fn from(wire: OpenOrderWire) -> Self {
        Self {
            side: Side::parse(&wire.side),
            price: parse_decimal_or_zero(&wire.price),
            qty: parse_decimal_or_zero(&wire.qty),
            order_type: wire.order_type,
            reduce_only: wire.reduce_only,
            order_id: wire.order_id,
        }
    }
}

/// Exchange operations the protection engine depends on. Implemented by the
/// signed REST client and by in-memory mocks in tests.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn wallet_balance(&self) -> Result<ApiOutcome, EngineError>;

    async fn instrument_info(&self, symbol: &str) -> Result<InstrumentInfo, EngineError>;

    /// All position rows the exchange reports for one symbol (two in hedge
    /// mode, one otherwise).
    async fn positions_for_symbol(&self, symbol: &str) -> Result<Vec<Position>, EngineError>;

    /// All position rows settling in the given coin.
    async fn positions_for_settle_coin(&self, settle_coin: &str)
        -> Result<Vec<Position>, EngineError>;

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, EngineError>;

    async fn place_reduce_only_limit(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
        position_idx: u8,
    ) -> Result<PlaceOrderResponse, EngineError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<ApiOutcome, EngineError>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<ApiOutcome, EngineError>;

    /// Sets the position-resident stop-loss trigger. A zero price clears it.
    async fn set_trading_stop(
        &self,
        symbol: &str,
        stop_loss: Decimal,
        position_idx: u8,
    ) -> Result<ApiOutcome, EngineError>;

    async fn server_time_ms(&self) -> Result<i64, EngineError>;
}

/// First position row for a symbol, if any.
pub async fn first_position(
    api: &dyn ExchangeApi,
    symbol: &str,
) -> Result<Option<Position>, EngineError> {
    let mut rows = api.positions_for_symbol(symbol).await?;
    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(rows.remove(0)))
}
