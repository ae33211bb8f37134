use crate::error::EngineError;
use crate::exchange::types::{
    ApiCredentials, ApiOutcome, ExchangeApi, InstrumentInfo, OpenOrder, OpenOrderWire,
    PlaceOrderResponse, Position, PositionWire, Side,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

const BYBIT_REST_BASE_URL: &str = "https://api.bybit.com";
const RECV_WINDOW_MS: &str = "5000";
const CATEGORY_LINEAR: &str = "linear";
const SL_TRIGGER_BY: &str = "LastPrice";

type HmacSha256 = Hmac<Sha256>;

/// Signed REST client for the Bybit v5 unified trading API.
pub struct BybitClient {
    http: Client,
    credentials: ApiCredentials,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnvelope<T> {
    ret_code: i64,
    ret_msg: String,
    #[serde(default)]
    result: T,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ListResult<T> {
    list: Vec<T>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct InstrumentWire {
    price_scale: String,
    price_filter: PriceFilterWire,
    lot_size_filter: LotSizeFilterWire,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PriceFilterWire {
    tick_size: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct LotSizeFilterWire {
    min_order_qty: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct OrderIdResult {
    order_id: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ServerTimeResult {
    time_second: String,
}

fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

fn ensure_ok(code: i64, message: &str) -> Result<(), EngineError> {
    if code == super::types::RET_CODE_OK {
        return Ok(());
    }
    Err(EngineError::Exchange {
        code,
        message: message.to_string(),
    })
}

impl BybitClient {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self::with_base_url(credentials, BYBIT_REST_BASE_URL)
    }

    pub fn with_base_url(credentials: ApiCredentials, base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            credentials,
            base_url: base_url.into(),
        }
    }

    fn sign(&self, timestamp_ms: i64, payload: &str) -> Result<String, EngineError> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .map_err(|_| EngineError::MissingCredentials)?;
        mac.update(timestamp_ms.to_string().as_bytes());
        mac.update(self.credentials.api_key.as_bytes());
        mac.update(RECV_WINDOW_MS.as_bytes());
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn get_public<T>(&self, path: &str, query: &[(&str, String)]) -> Result<ApiEnvelope<T>, EngineError>
    where
        T: DeserializeOwned + Default,
    {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<ApiEnvelope<T>>().await?)
    }

    async fn get_signed<T>(&self, path: &str, query: &[(&str, String)]) -> Result<ApiEnvelope<T>, EngineError>
    where
        T: DeserializeOwned + Default,
    {
        let query_string = query
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        let timestamp_ms = now_unix_ms();
        let signature = self.sign(timestamp_ms, &query_string)?;

        let response = self
            .http
            .get(format!("{}{path}?{query_string}", self.base_url))
            .header("X-BAPI-API-KEY", &self.credentials.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp_ms.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<ApiEnvelope<T>>().await?)
    }

    async fn post_signed<T>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<ApiEnvelope<T>, EngineError>
    where
        T: DeserializeOwned + Default,
    {
        let body_string = body.to_string();
        let timestamp_ms = now_unix_ms();
        let signature = self.sign(timestamp_ms, &body_string)?;

        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .header("X-BAPI-API-KEY", &self.credentials.api_key)
            .header("X-BAPI-TIMESTAMP", timestamp_ms.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW_MS)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(body_string)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<ApiEnvelope<T>>().await?)
    }

    async fn positions_query(&self, query: &[(&str, String)]) -> Result<Vec<Position>, EngineError> {
        let envelope: ApiEnvelope<ListResult<PositionWire>> =
            self.get_signed("/v5/position/list", query).await?;
        ensure_ok(envelope.ret_code, &envelope.ret_msg)?;
        Ok(envelope.result.list.into_iter().map(Position::from).collect())
    }
}

#[async_trait]
impl ExchangeApi for BybitClient {
    async fn wallet_balance(&self) -> Result<ApiOutcome, EngineError> {
        let envelope: ApiEnvelope<serde_json::Value> = self
            .get_signed(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string())],
            )
            .await?;
        Ok(ApiOutcome::from_ret(envelope.ret_code, &envelope.ret_msg))
    }

    async fn instrument_info(&self, symbol: &str) -> Result<InstrumentInfo, EngineError> {
        let envelope: ApiEnvelope<ListResult<InstrumentWire>> = self
            .get_public(
                "/v5/market/instruments-info",
                &[
                    ("category", CATEGORY_LINEAR.to_string()),
                    ("symbol", symbol.to_string()),
                ],
            )
            .await?;
        ensure_ok(envelope.ret_code, &envelope.ret_msg)?;

        let instrument = envelope.result.list.into_iter().next().ok_or_else(|| {
            EngineError::InvalidArgument(format!("no instrument metadata for {symbol}"))
        })?;

        let price_scale = instrument.price_scale.trim().parse::<u32>().map_err(|_| {
            EngineError::InvalidArgument(format!(
                "unparsable priceScale '{}' for {symbol}",
                instrument.price_scale
            ))
        })?;

        Ok(InstrumentInfo {
            tick_size: Decimal::from_str(instrument.price_filter.tick_size.trim())?,
            price_scale,
            min_order_qty: Decimal::from_str(instrument.lot_size_filter.min_order_qty.trim())?,
        })
    }

    async fn positions_for_symbol(&self, symbol: &str) -> Result<Vec<Position>, EngineError> {
        self.positions_query(&[
            ("category", CATEGORY_LINEAR.to_string()),
            ("symbol", symbol.to_string()),
        ])
        .await
    }

    async fn positions_for_settle_coin(
        &self,
        settle_coin: &str,
    ) -> Result<Vec<Position>, EngineError> {
        self.positions_query(&[
            ("category", CATEGORY_LINEAR.to_string()),
            ("settleCoin", settle_coin.to_string()),
        ])
        .await
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, EngineError> {
        let envelope: ApiEnvelope<ListResult<OpenOrderWire>> = self
            .get_signed(
                "/v5/order/realtime",
                &[
                    ("category", CATEGORY_LINEAR.to_string()),
                    ("symbol", symbol.to_string()),
                ],
            )
            .await?;
        ensure_ok(envelope.ret_code, &envelope.ret_msg)?;
        Ok(envelope.result.list.into_iter().map(OpenOrder::from).collect())
    }

    async fn place_reduce_only_limit(
        &self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
        position_idx: u8,
    ) -> Result<PlaceOrderResponse, EngineError> {
        let body = serde_json::json!({
            "category": CATEGORY_LINEAR,
            "symbol": symbol,
            "side": side.as_str(),
            "orderType": "Limit",
            "reduceOnly": true,
            "qty": qty.to_string(),
            "price": price.to_string(),
            "positionIdx": position_idx,
        });
        let envelope: ApiEnvelope<OrderIdResult> = self.post_signed("/v5/order/create", &body).await?;
        let outcome = ApiOutcome::from_ret(envelope.ret_code, &envelope.ret_msg);
        let order_id = if envelope.result.order_id.is_empty() {
            None
        } else {
            Some(envelope.result.order_id)
        };
        Ok(PlaceOrderResponse { outcome, order_id })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<ApiOutcome, EngineError> {
        let body = serde_json::json!({
            "category": CATEGORY_LINEAR,
            "symbol": symbol,
            "orderId": order_id,
        });
        let envelope: ApiEnvelope<serde_json::Value> =
            self.post_signed("/v5/order/cancel", &body).await?;
        Ok(ApiOutcome::from_ret(envelope.ret_code, &envelope.ret_msg))
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<ApiOutcome, EngineError> {
        let body = serde_json::json!({
            "category": CATEGORY_LINEAR,
            "symbol": symbol,
        });
        let envelope: ApiEnvelope<serde_json::Value> =
            self.post_signed("/v5/order/cancel-all", &body).await?;
        Ok(ApiOutcome::from_ret(envelope.ret_code, &envelope.ret_msg))
    }

    async fn set_trading_stop(
        &self,
        symbol: &str,
        stop_loss: Decimal,
        position_idx: u8,
    ) -> Result<ApiOutcome, EngineError> {
        let body = serde_json::json!({
            "category": CATEGORY_LINEAR,
            "symbol": symbol,
            "stopLoss": stop_loss.to_string(),
            "slTriggerBy": SL_TRIGGER_BY,
            "positionIdx": position_idx,
        });
        let envelope: ApiEnvelope<serde_json::Value> =
            self.post_signed("/v5/position/trading-stop", &body).await?;
        Ok(ApiOutcome::from_ret(envelope.ret_code, &envelope.ret_msg))
    }

    async fn server_time_ms(&self) -> Result<i64, EngineError> {
        let envelope: ApiEnvelope<ServerTimeResult> = self.get_public("/v5/market/time", &[]).await?;
        ensure_ok(envelope.ret_code, &envelope.ret_msg)?;
        let seconds = envelope.result.time_second.trim().parse::<i64>().map_err(|_| {
            EngineError::InvalidArgument(format!(
                "unparsable timeSecond '{}'",
                envelope.result.time_second
            ))
        })?;
        Ok(seconds.saturating_mul(1_000))
    }
}
