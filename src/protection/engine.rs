//! Session lifecycle and the UI-facing surface: start and stop protection,
//! edit parameters while running, and read engine state.

use crate::error::EngineError;
use crate::exchange::bybit::BybitClient;
use crate::exchange::types::{first_position, ApiCredentials, ApiOutcome, ExchangeApi};
use crate::protection::pipeline::{run_protection_loop, PipelineContext, PositionCallback};
use crate::protection::types::{
    ControlMessage, LogCategory, LogEvent, LogPublisher, ProtectionConfig, ProtectionKind,
    ProtectionSession, ProtectionState, ProtectionStatusSnapshot, StartProtectionArgs,
};
use crate::protection::STOP_JOIN_TIMEOUT;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

struct SessionRuntime {
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
    control_tx: UnboundedSender<ControlMessage>,
    config: Arc<RwLock<ProtectionConfig>>,
}

/// One engine instance manages at most one protection session at a time.
pub struct ProtectionEngine {
    api: Arc<dyn ExchangeApi>,
    status: Arc<RwLock<ProtectionStatusSnapshot>>,
    log: LogPublisher,
    log_rx: Mutex<Option<UnboundedReceiver<LogEvent>>>,
    position_callback: Mutex<Option<PositionCallback>>,
    runtime: tokio::sync::Mutex<Option<SessionRuntime>>,
}

impl ProtectionEngine {
    pub fn new(api: Arc<dyn ExchangeApi>) -> Self {
        let (log, log_rx) = LogPublisher::channel();
        Self {
            api,
            status: Arc::new(RwLock::new(ProtectionStatusSnapshot::stopped(
                String::new(),
                None,
            ))),
            log,
            log_rx: Mutex::new(Some(log_rx)),
            position_callback: Mutex::new(None),
            runtime: tokio::sync::Mutex::new(None),
        }
    }

    /// Engine backed by the signed REST client.
    pub fn with_credentials(credentials: ApiCredentials) -> Result<Self, EngineError> {
        if !credentials.is_complete() {
            return Err(EngineError::MissingCredentials);
        }
        Ok(Self::new(Arc::new(BybitClient::new(credentials))))
    }

    /// The receiver half of the structured log stream. Yields `None` after
    /// the first call; there is exactly one consumer.
    pub fn take_log_receiver(&self) -> Option<UnboundedReceiver<LogEvent>> {
        self.log_rx.lock().take()
    }

    pub fn set_position_callback(&self, callback: PositionCallback) {
        *self.position_callback.lock() = Some(callback);
    }

    pub fn status(&self) -> ProtectionStatusSnapshot {
        self.status.read().clone()
    }

    /// Validates the arguments and the account, then spawns the polling
    /// loop. Fails fast when no open position exists on the symbol: there
    /// is nothing to protect yet.
    pub async fn start(&self, args: StartProtectionArgs) -> Result<ProtectionSession, EngineError> {
        let config = args.normalize()?;

        let mut runtime = self.runtime.lock().await;
        if let Some(active) = runtime.as_ref() {
            return Err(EngineError::AlreadyRunning(active.config.read().symbol.clone()));
        }

        require_success(self.api.wallet_balance().await?)?;

        let position = first_position(self.api.as_ref(), &config.symbol)
            .await?
            .filter(|p| !p.is_flat());
        if position.is_none() {
            return Err(EngineError::NoOpenPosition(config.symbol));
        }

        self.log.info(
            LogCategory::Session,
            format!("starting protection for {}", config.symbol),
        );
        let session = ProtectionSession::from_config(&config);
        let shared_config = Arc::new(RwLock::new(config));
        *self.status.write() =
            ProtectionStatusSnapshot::from_config(ProtectionState::Starting, &shared_config.read());

        let cancel = CancellationToken::new();
        let (control_tx, control_rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = PipelineContext {
            api: self.api.clone(),
            config: shared_config.clone(),
            status: self.status.clone(),
            log: self.log.clone(),
            cancel: cancel.clone(),
            position_callback: self.position_callback.lock().clone(),
        };
        let join = tokio::spawn(run_protection_loop(ctx, control_rx));

        *runtime = Some(SessionRuntime {
            cancel,
            join,
            control_tx,
            config: shared_config,
        });
        Ok(session)
    }

    /// Stops the running session, waiting a bounded time for the loop to
    /// finish its current cycle. Returns whether a session was running.
    pub async fn stop(&self) -> bool {
        let Some(runtime) = self.runtime.lock().await.take() else {
            return false;
        };

        let symbol = runtime.config.read().symbol.clone();
        runtime.cancel.cancel();
        match tokio::time::timeout(STOP_JOIN_TIMEOUT, runtime.join).await {
            Ok(Ok(())) => {}
            Ok(Err(join_error)) => {
                self.log.error(
                    LogCategory::Session,
                    format!("protection loop for {symbol} aborted: {join_error}"),
                );
            }
            Err(_) => {
                self.log.warn(
                    LogCategory::Session,
                    format!("protection loop for {symbol} did not stop in time"),
                );
            }
        }

        *self.status.write() = ProtectionStatusSnapshot::stopped(symbol.clone(), None);
        self.log.info(
            LogCategory::Session,
            format!("protection stopped for {symbol}"),
        );
        true
    }

    /// Replaces the stop-loss loss amount of the running session. The loop
    /// is nudged to apply it immediately instead of on the next tick.
    pub async fn set_stop_loss_amount(
        &self,
        amount: Decimal,
    ) -> Result<ProtectionSession, EngineError> {
        if amount.is_sign_negative() {
            return Err(EngineError::InvalidArgument(
                "stopLossAmount must be non-negative".to_string(),
            ));
        }
        self.update_session(ProtectionKind::StopLoss, |config| {
            config.stop_loss_amount = amount;
        })
        .await
    }

    pub async fn set_stop_loss_enabled(
        &self,
        enabled: bool,
    ) -> Result<ProtectionSession, EngineError> {
        self.update_session(ProtectionKind::StopLoss, |config| {
            config.stop_loss_enabled = enabled;
        })
        .await
    }

    pub async fn set_take_profit_percentage(
        &self,
        percentage: Decimal,
    ) -> Result<ProtectionSession, EngineError> {
        if percentage.is_sign_negative() {
            return Err(EngineError::InvalidArgument(
                "takeProfitPercentage must be non-negative".to_string(),
            ));
        }
        self.update_session(ProtectionKind::TakeProfit, |config| {
            config.take_profit_percentage = percentage;
        })
        .await
    }

    pub async fn set_take_profit_enabled(
        &self,
        enabled: bool,
    ) -> Result<ProtectionSession, EngineError> {
        self.update_session(ProtectionKind::TakeProfit, |config| {
            config.take_profit_enabled = enabled;
        })
        .await
    }

    async fn update_session(
        &self,
        kind: ProtectionKind,
        apply: impl FnOnce(&mut ProtectionConfig),
    ) -> Result<ProtectionSession, EngineError> {
        let runtime = self.runtime.lock().await;
        let Some(runtime) = runtime.as_ref() else {
            return Err(EngineError::InvalidArgument(
                "no protection session is running".to_string(),
            ));
        };

        let updated = {
            let mut config = runtime.config.write();
            apply(&mut config);
            config.clone()
        };
        {
            let mut status = self.status.write();
            status.stop_loss_enabled = updated.stop_loss_enabled;
            status.stop_loss_amount = updated.stop_loss_amount;
            status.take_profit_enabled = updated.take_profit_enabled;
            status.take_profit_percentage = updated.take_profit_percentage;
        }
        if runtime.control_tx.send(ControlMessage::Refresh(kind)).is_err() {
            self.log.warn(
                LogCategory::Session,
                "protection loop is gone, parameters apply on restart".to_string(),
            );
        }
        Ok(ProtectionSession::from_config(&updated))
    }
}

fn require_success(outcome: ApiOutcome) -> Result<(), EngineError> {
    match outcome {
        outcome if outcome.is_success() => Ok(()),
        ApiOutcome::Failure { code, message } => Err(EngineError::Exchange { code, message }),
        other => Err(EngineError::Exchange {
            code: -1,
            message: format!("{other:?}"),
        }),
    }
}

/// Signs a minimal account read to prove that the supplied key pair works.
pub async fn test_connection(credentials: &ApiCredentials) -> Result<(), EngineError> {
    if !credentials.is_complete() {
        return Err(EngineError::MissingCredentials);
    }
    let client = BybitClient::new(credentials.clone());
    require_success(client.wallet_balance().await?)
}
