//! Automatic stop-loss and take-profit maintenance for one watched
//! derivatives position.

use std::time::Duration;

pub mod calculator;
pub mod engine;
pub mod pipeline;
pub mod position_mode;
pub mod quantizer;
pub mod reconciler;
pub mod summary;
pub mod time_sync;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

/// Cadence of the reconciliation loop.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after a failed cycle before polling again.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Grace period after cancelling orders, so the replacement is not
/// rejected against a not-yet-released reduce-only allocation.
pub const ORDER_SETTLE_PAUSE: Duration = Duration::from_millis(300);

/// How often the running loop re-verifies clock drift.
pub const TIME_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// How long `stop` waits for the loop to finish its current cycle.
pub const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub use engine::{test_connection, ProtectionEngine};
pub use summary::{positions_summary, PositionSummaryRecord, PositionsSummary};
pub use types::{
    LogCategory, LogEvent, LogPublisher, LogSeverity, PositionObservation, ProtectionConfig,
    ProtectionSession, ProtectionState, ProtectionStatusSnapshot, StartProtectionArgs,
};
