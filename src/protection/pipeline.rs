//! The polling reconciliation loop. One task per protection session: poll
//! the position once a second, converge the exchange toward the configured
//! protection orders, and react to live parameter edits out of band.

use crate::exchange::types::{first_position, ExchangeApi, Position};
use crate::protection::position_mode::PositionModeResolver;
use crate::protection::reconciler::OrderReconciler;
use crate::protection::time_sync::check_clock_sync;
use crate::protection::types::{
    ControlMessage, LogCategory, LogPublisher, PositionObservation, ProtectionConfig,
    ProtectionKind, ProtectionState, ProtectionStatusSnapshot,
};
use crate::protection::{ERROR_BACKOFF, POLL_INTERVAL, TIME_SYNC_INTERVAL};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub type PositionCallback = Arc<dyn Fn(PositionObservation) + Send + Sync>;

pub struct PipelineContext {
    pub api: Arc<dyn ExchangeApi>,
    pub config: Arc<RwLock<ProtectionConfig>>,
    pub status: Arc<RwLock<ProtectionStatusSnapshot>>,
    pub log: LogPublisher,
    pub cancel: CancellationToken,
    pub position_callback: Option<PositionCallback>,
}

pub async fn run_protection_loop(
    ctx: PipelineContext,
    mut control_rx: UnboundedReceiver<ControlMessage>,
) {
    let modes = PositionModeResolver::new();
    let mut reconciler = OrderReconciler::new();
    let symbol = ctx.config.read().symbol.clone();

    let synced = check_clock_sync(ctx.api.as_ref(), &ctx.log).await;
    ctx.status.write().clock_synced = synced;
    let mut last_sync_check = Instant::now();

    // Assert exclusive control before the first cycle: any reduce-only
    // limit order already on the symbol belongs to a previous session.
    if let Err(error) = reconciler
        .sweep_reduce_only_limits(ctx.api.as_ref(), &ctx.log, &symbol)
        .await
    {
        ctx.log.warn(
            LogCategory::Session,
            format!("startup order sweep failed for {symbol}: {error}"),
        );
    }

    {
        let mut status = ctx.status.write();
        status.state = ProtectionState::Running;
    }
    ctx.log.info(
        LogCategory::Session,
        format!("protection loop running for {symbol}"),
    );

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            message = control_rx.recv() => {
                match message {
                    Some(ControlMessage::Refresh(kind)) => {
                        // Only an enabled protection needs its fingerprint
                        // dropped for recomputation; a disable relies on the
                        // fingerprint to know there is an order to withdraw.
                        if kind_enabled(&ctx, kind) {
                            reconciler.invalidate(kind);
                        }
                        refresh_pass(&ctx, &modes, &mut reconciler, kind).await;
                    }
                    // Engine dropped; cancellation follows shortly.
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if last_sync_check.elapsed() >= TIME_SYNC_INTERVAL {
                    let synced = check_clock_sync(ctx.api.as_ref(), &ctx.log).await;
                    ctx.status.write().clock_synced = synced;
                    last_sync_check = Instant::now();
                }
                if let Err(error) = cycle(&ctx, &modes, &mut reconciler, &symbol).await {
                    ctx.log.error(
                        LogCategory::Session,
                        format!("reconciliation cycle failed for {symbol}: {error}"),
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }

    ctx.log.info(
        LogCategory::Session,
        format!("protection loop stopped for {symbol}"),
    );
}

/// One poll cycle: observe the position, then reconcile stop-loss before
/// take-profit so downside protection is never the one waiting.
async fn cycle(
    ctx: &PipelineContext,
    modes: &PositionModeResolver,
    reconciler: &mut OrderReconciler,
    symbol: &str,
) -> Result<(), crate::error::EngineError> {
    let Some(position) = open_position(ctx, symbol).await? else {
        handle_flat(ctx, reconciler, symbol).await?;
        return Ok(());
    };

    observe(ctx, &position);

    let config = ctx.config.read().clone();
    reconciler
        .reconcile_stop_loss(ctx.api.as_ref(), &ctx.log, modes, &config, &position)
        .await?;
    reconciler
        .reconcile_take_profit(ctx.api.as_ref(), &ctx.log, modes, &config, &position)
        .await?;
    Ok(())
}

/// Out-of-band pass for one protection type after a parameter edit.
async fn refresh_pass(
    ctx: &PipelineContext,
    modes: &PositionModeResolver,
    reconciler: &mut OrderReconciler,
    kind: ProtectionKind,
) {
    let symbol = ctx.config.read().symbol.clone();
    let position = match open_position(ctx, &symbol).await {
        Ok(Some(position)) => position,
        Ok(None) => return,
        Err(error) => {
            ctx.log.warn(
                LogCategory::Session,
                format!("parameter refresh deferred to the next cycle: {error}"),
            );
            return;
        }
    };

    observe(ctx, &position);
    let config = ctx.config.read().clone();
    let result = match kind {
        ProtectionKind::StopLoss => {
            reconciler
                .reconcile_stop_loss(ctx.api.as_ref(), &ctx.log, modes, &config, &position)
                .await
        }
        ProtectionKind::TakeProfit => {
            reconciler
                .reconcile_take_profit(ctx.api.as_ref(), &ctx.log, modes, &config, &position)
                .await
        }
    };
    if let Err(error) = result {
        ctx.log.warn(
            LogCategory::Session,
            format!("parameter refresh failed for {symbol}: {error}"),
        );
    }
}

fn kind_enabled(ctx: &PipelineContext, kind: ProtectionKind) -> bool {
    let config = ctx.config.read();
    match kind {
        ProtectionKind::StopLoss => config.stop_loss_enabled,
        ProtectionKind::TakeProfit => config.take_profit_enabled,
    }
}

async fn open_position(
    ctx: &PipelineContext,
    symbol: &str,
) -> Result<Option<Position>, crate::error::EngineError> {
    let position = first_position(ctx.api.as_ref(), symbol).await?;
    Ok(position.filter(|p| !p.is_flat()))
}

/// A flat or absent position retires the session's orders: the exchange
/// would otherwise keep a reduce-only order that could open a new position
/// the moment it crossed.
async fn handle_flat(
    ctx: &PipelineContext,
    reconciler: &mut OrderReconciler,
    symbol: &str,
) -> Result<(), crate::error::EngineError> {
    if reconciler.is_engaged() {
        ctx.api.cancel_all_orders(symbol).await?;
        reconciler.reset();
        ctx.log.info(
            LogCategory::Session,
            format!("position on {symbol} is flat, protection orders withdrawn"),
        );
    }
    ctx.status.write().last_position = None;
    Ok(())
}

fn observe(ctx: &PipelineContext, position: &Position) {
    let observation = PositionObservation::from_position(position);
    ctx.status.write().last_position = Some(observation.clone());
    if let Some(callback) = &ctx.position_callback {
        callback(observation);
    }
}
