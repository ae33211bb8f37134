use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("request error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("decimal parse error: {0}")]
    Decimal(#[from] rust_decimal::Error),
    #[error("exchange error {code}: {message}")]
    Exchange { code: i64, message: String },
    #[error("protection loop already running for {0}")]
    AlreadyRunning(String),
    #[error("no open position found for {0}")]
    NoOpenPosition(String),
    #[error("missing api credentials")]
    MissingCredentials,
}

impl serde::Serialize for EngineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
