//! Local-clock drift check against the exchange. Signed requests carry a
//! local timestamp, so heavy drift surfaces as authentication failures
//! long before any order is wrong; this check turns that into a readable
//! warning instead.

use crate::exchange::types::ExchangeApi;
use crate::protection::types::{now_unix_ms, LogCategory, LogPublisher};

const NOTABLE_DRIFT_MS: i64 = 10_000;
const EXCESSIVE_DRIFT_MS: i64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockDrift {
    /// Within 10 seconds; nothing worth reporting.
    Negligible,
    /// Between 10 and 30 seconds; logged, still considered in sync.
    Notable,
    /// Over 30 seconds; signed requests are at risk of rejection.
    Excessive,
}

pub fn classify_drift(drift_ms: i64) -> ClockDrift {
    let magnitude = drift_ms.abs();
    if magnitude > EXCESSIVE_DRIFT_MS {
        ClockDrift::Excessive
    } else if magnitude > NOTABLE_DRIFT_MS {
        ClockDrift::Notable
    } else {
        ClockDrift::Negligible
    }
}

/// Compares the local clock against the exchange clock. Returns whether the
/// clocks agree closely enough for signed requests. An unreachable time
/// endpoint is reported but never treated as drift.
pub async fn check_clock_sync(api: &dyn ExchangeApi, log: &LogPublisher) -> bool {
    let server_ms = match api.server_time_ms().await {
        Ok(server_ms) => server_ms,
        Err(error) => {
            log.warn(
                LogCategory::TimeSync,
                format!("server time unavailable, skipping drift check: {error}"),
            );
            return true;
        }
    };

    let drift_ms = now_unix_ms() - server_ms;
    match classify_drift(drift_ms) {
        ClockDrift::Negligible => true,
        ClockDrift::Notable => {
            log.info(
                LogCategory::TimeSync,
                format!("local clock drifts {}s from the exchange", drift_ms.abs() / 1000),
            );
            true
        }
        ClockDrift::Excessive => {
            log.warn(
                LogCategory::TimeSync,
                format!(
                    "local clock drifts {}s from the exchange; signed requests may be rejected",
                    drift_ms.abs() / 1000
                ),
            );
            false
        }
    }
}
