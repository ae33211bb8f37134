use crate::error::EngineError;
use crate::exchange::types::{Position, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub const QUOTE_SUFFIX_USDT: &str = "USDT";
pub const QUOTE_SUFFIX_USDC: &str = "USDC";

pub(crate) fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Session,
    StopLoss,
    TakeProfit,
    PositionMode,
    TimeSync,
    Exchange,
}

/// Structured log entry consumed by the UI in arrival order. Consumers react
/// to `severity`/`category`, never to message wording.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub timestamp_ms: i64,
    pub severity: LogSeverity,
    pub category: LogCategory,
    pub message: String,
}

/// Cloneable sender half of the engine log stream.
#[derive(Clone)]
pub struct LogPublisher {
    sender: UnboundedSender<LogEvent>,
}

impl LogPublisher {
    pub fn channel() -> (Self, UnboundedReceiver<LogEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn publish(&self, severity: LogSeverity, category: LogCategory, message: impl Into<String>) {
        let event = LogEvent {
            timestamp_ms: now_unix_ms(),
            severity,
            category,
            message: message.into(),
        };
        if self.sender.send(event).is_err() {
            // Receiver dropped; nothing downstream to notify.
        }
    }

    pub fn info(&self, category: LogCategory, message: impl Into<String>) {
        self.publish(LogSeverity::Info, category, message);
    }

    pub fn warn(&self, category: LogCategory, message: impl Into<String>) {
        self.publish(LogSeverity::Warning, category, message);
    }

    pub fn error(&self, category: LogCategory, message: impl Into<String>) {
        self.publish(LogSeverity::Error, category, message);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionState {
    Stopped,
    Starting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionKind {
    StopLoss,
    TakeProfit,
}

/// Control messages from UI-facing setters into the running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Drop the cached fingerprint for one protection type and run its
    /// reconciliation pass immediately instead of waiting for the next tick.
    Refresh(ProtectionKind),
}

/// Live risk parameters for the protected symbol. Owned by the engine,
/// mutated only through setter operations, read by the loop each cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectionConfig {
    pub symbol: String,
    pub stop_loss_enabled: bool,
    pub stop_loss_amount: Decimal,
    pub take_profit_enabled: bool,
    pub take_profit_percentage: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartProtectionArgs {
    pub symbol: String,
    pub stop_loss_enabled: Option<bool>,
    pub stop_loss_amount: Option<Decimal>,
    pub take_profit_enabled: Option<bool>,
    pub take_profit_percentage: Option<Decimal>,
}

impl StartProtectionArgs {
    pub fn normalize(self) -> Result<ProtectionConfig, EngineError> {
        let mut symbol = self.symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(EngineError::InvalidArgument(
                "symbol must be non-empty alphanumeric ASCII".to_string(),
            ));
        }
        if !symbol.ends_with(QUOTE_SUFFIX_USDT) && !symbol.ends_with(QUOTE_SUFFIX_USDC) {
            symbol.push_str(QUOTE_SUFFIX_USDT);
        }

        let stop_loss_enabled = self.stop_loss_enabled.unwrap_or(false);
        let take_profit_enabled = self.take_profit_enabled.unwrap_or(false);
        if !stop_loss_enabled && !take_profit_enabled {
            return Err(EngineError::InvalidArgument(
                "at least one protection type must be enabled".to_string(),
            ));
        }

        let stop_loss_amount = self.stop_loss_amount.unwrap_or_default();
        if stop_loss_amount.is_sign_negative() {
            return Err(EngineError::InvalidArgument(
                "stopLossAmount must be non-negative".to_string(),
            ));
        }

        let take_profit_percentage = self.take_profit_percentage.unwrap_or_default();
        if take_profit_percentage.is_sign_negative() {
            return Err(EngineError::InvalidArgument(
                "takeProfitPercentage must be non-negative".to_string(),
            ));
        }

        Ok(ProtectionConfig {
            symbol,
            stop_loss_enabled,
            stop_loss_amount,
            take_profit_enabled,
            take_profit_percentage,
        })
    }
}

/// Echo of the accepted configuration, returned from `start`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionSession {
    pub running: bool,
    pub symbol: String,
    pub stop_loss_enabled: bool,
    pub stop_loss_amount: Decimal,
    pub take_profit_enabled: bool,
    pub take_profit_percentage: Decimal,
}

impl ProtectionSession {
    pub fn from_config(config: &ProtectionConfig) -> Self {
        Self {
            running: true,
            symbol: config.symbol.clone(),
            stop_loss_enabled: config.stop_loss_enabled,
            stop_loss_amount: config.stop_loss_amount,
            take_profit_enabled: config.take_profit_enabled,
            take_profit_percentage: config.take_profit_percentage,
        }
    }
}

/// By-value view of the last observed position, safe to hand to the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionObservation {
    pub symbol: String,
    pub side: Option<Side>,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub notional_value: Decimal,
    pub unrealized_pnl: Decimal,
}

impl PositionObservation {
    pub fn from_position(position: &Position) -> Self {
        Self {
            symbol: position.symbol.clone(),
            side: position.side,
            size: position.size,
            entry_price: position.entry_price,
            mark_price: position.mark_price,
            notional_value: position.notional_value,
            unrealized_pnl: position.unrealized_pnl,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionStatusSnapshot {
    pub state: ProtectionState,
    pub symbol: String,
    pub stop_loss_enabled: bool,
    pub stop_loss_amount: Decimal,
    pub take_profit_enabled: bool,
    pub take_profit_percentage: Decimal,
    pub clock_synced: bool,
    pub last_position: Option<PositionObservation>,
    pub reason: Option<String>,
}

impl ProtectionStatusSnapshot {
    pub fn stopped(symbol: String, reason: Option<String>) -> Self {
        Self {
            state: ProtectionState::Stopped,
            symbol,
            stop_loss_enabled: false,
            stop_loss_amount: Decimal::ZERO,
            take_profit_enabled: false,
            take_profit_percentage: Decimal::ZERO,
            clock_synced: true,
            last_position: None,
            reason,
        }
    }

    pub fn from_config(state: ProtectionState, config: &ProtectionConfig) -> Self {
        Self {
            state,
            symbol: config.symbol.clone(),
            stop_loss_enabled: config.stop_loss_enabled,
            stop_loss_amount: config.stop_loss_amount,
            take_profit_enabled: config.take_profit_enabled,
            take_profit_percentage: config.take_profit_percentage,
            clock_synced: true,
            last_position: None,
            reason: None,
        }
    }
}

/// Attributes whose change forces a stop-loss replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlFingerprint {
    pub entry_price: Decimal,
    pub notional_value: Decimal,
    pub size: Decimal,
}

impl SlFingerprint {
    pub fn of(position: &Position) -> Self {
        Self {
            entry_price: position.entry_price,
            notional_value: position.notional_value,
            size: position.size,
        }
    }
}

/// Attributes whose change forces a take-profit replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpFingerprint {
    pub entry_price: Decimal,
    pub size: Decimal,
}

impl TpFingerprint {
    pub fn of(position: &Position) -> Self {
        Self {
            entry_price: position.entry_price,
            size: position.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position(entry: Decimal, notional: Decimal, size: Decimal) -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            side: Some(Side::Buy),
            size,
            entry_price: entry,
            notional_value: notional,
            mark_price: entry,
            unrealized_pnl: Decimal::ZERO,
            leverage: String::new(),
            position_idx: 0,
            stop_loss: None,
            take_profit: None,
            trailing_stop: String::new(),
            liq_price: String::new(),
            created_time: String::new(),
            updated_time: String::new(),
        }
    }

    #[test]
    fn normalize_appends_quote_suffix() {
        let config = StartProtectionArgs {
            symbol: "btc".to_string(),
            stop_loss_enabled: Some(true),
            stop_loss_amount: Some(dec!(30)),
            ..Default::default()
        }
        .normalize()
        .expect("args should normalize");

        assert_eq!(config.symbol, "BTCUSDT");
        assert!(config.stop_loss_enabled);
        assert!(!config.take_profit_enabled);
    }

    #[test]
    fn normalize_keeps_existing_quote_suffix() {
        let config = StartProtectionArgs {
            symbol: "ethusdc".to_string(),
            take_profit_enabled: Some(true),
            take_profit_percentage: Some(dec!(2)),
            ..Default::default()
        }
        .normalize()
        .expect("args should normalize");

        assert_eq!(config.symbol, "ETHUSDC");
    }

    #[test]
    fn normalize_rejects_disabled_everything() {
        let result = StartProtectionArgs {
            symbol: "BTCUSDT".to_string(),
            ..Default::default()
        }
        .normalize();
        assert!(result.is_err());
    }

    #[test]
    fn normalize_rejects_negative_amounts() {
        let result = StartProtectionArgs {
            symbol: "BTCUSDT".to_string(),
            stop_loss_enabled: Some(true),
            stop_loss_amount: Some(dec!(-1)),
            ..Default::default()
        }
        .normalize();
        assert!(result.is_err());

        let result = StartProtectionArgs {
            symbol: "BTCUSDT".to_string(),
            take_profit_enabled: Some(true),
            take_profit_percentage: Some(dec!(-0.5)),
            ..Default::default()
        }
        .normalize();
        assert!(result.is_err());
    }

    #[test]
    fn normalize_rejects_malformed_symbols() {
        for symbol in ["", "BTC-USDT", "btc usdt"] {
            let result = StartProtectionArgs {
                symbol: symbol.to_string(),
                stop_loss_enabled: Some(true),
                ..Default::default()
            }
            .normalize();
            assert!(result.is_err(), "symbol {symbol:?} should be rejected");
        }
    }

    #[test]
    fn sl_fingerprint_tracks_entry_value_and_size() {
        let position = long_position(dec!(30000), dec!(3000), dec!(0.1));
        let fingerprint = SlFingerprint::of(&position);

        let mut moved = position.clone();
        moved.notional_value = dec!(3100);
        assert_ne!(fingerprint, SlFingerprint::of(&moved));

        let mut pnl_only = position.clone();
        pnl_only.unrealized_pnl = dec!(55);
        assert_eq!(fingerprint, SlFingerprint::of(&pnl_only));
    }

    #[test]
    fn tp_fingerprint_ignores_notional_value() {
        let position = long_position(dec!(30000), dec!(3000), dec!(0.1));
        let fingerprint = TpFingerprint::of(&position);

        let mut value_only = position.clone();
        value_only.notional_value = dec!(9999);
        assert_eq!(fingerprint, TpFingerprint::of(&value_only));

        let mut resized = position;
        resized.size = dec!(0.2);
        assert_ne!(fingerprint, TpFingerprint::of(&resized));
    }

    #[test]
    fn log_publisher_delivers_structured_events() {
        let (publisher, mut receiver) = LogPublisher::channel();
        publisher.warn(LogCategory::TimeSync, "clock drift 42s");

        let event = receiver.try_recv().expect("event should be queued");
        assert_eq!(event.severity, LogSeverity::Warning);
        assert_eq!(event.category, LogCategory::TimeSync);
        assert_eq!(event.message, "clock drift 42s");
        assert!(event.timestamp_ms > 0);
    }
}
