use crate::exchange::types::{ExchangeApi, InstrumentInfo};
use crate::protection::types::{LogCategory, LogPublisher};
use rust_decimal::Decimal;

/// Floors a raw target price onto the instrument's legal price grid:
/// first to the instrument's decimal precision, then to the nearest
/// multiple of its tick size. Exact decimal arithmetic throughout; a
/// float rounding artifact here means a rejected order.
pub fn quantize_with(info: &InstrumentInfo, raw_price: Decimal) -> Decimal {
    let floored = raw_price.trunc_with_scale(info.price_scale);
    if info.tick_size <= Decimal::ZERO {
        return floored;
    }
    let ticks = (floored / info.tick_size).floor();
    ticks * info.tick_size
}

/// Metadata-fetching wrapper. Degrades to the raw price when the
/// instrument lookup fails; a slightly off price is better than no
/// protection order at all.
pub async fn quantize(
    api: &dyn ExchangeApi,
    log: &LogPublisher,
    symbol: &str,
    raw_price: Decimal,
) -> Decimal {
    match api.instrument_info(symbol).await {
        Ok(info) => quantize_with(&info, raw_price),
        Err(error) => {
            log.warn(
                LogCategory::Exchange,
                format!("instrument metadata unavailable for {symbol}, using raw price: {error}"),
            );
            raw_price
        }
    }
}
