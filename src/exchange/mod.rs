pub mod bybit;
pub mod types;

pub use bybit::BybitClient;
pub use types::{
    ApiCredentials, ApiOutcome, ExchangeApi, InstrumentInfo, OpenOrder, PlaceOrderResponse,
    Position, Side,
};
