//! Guardrail engine for a single Bybit derivatives position.
//!
//! A desktop frontend starts one protection session per run; the engine
//! polls the position once a second and keeps a stop-loss trigger and a
//! reduce-only take-profit order converged with the configured risk
//! parameters, surviving restarts, partial closes, and live parameter
//! edits.

pub mod error;
pub mod exchange;
pub mod protection;

pub use error::EngineError;
pub use exchange::{ApiCredentials, BybitClient, ExchangeApi};
pub use protection::{
    positions_summary, test_connection, ProtectionEngine, StartProtectionArgs,
};
