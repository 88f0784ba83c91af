use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{ExchangeError, MarketDataError};
use crate::execution::{ExchangeClient, MarketDataGateway, OrderAck, OrderRequest, OrderStatus};
use crate::models::{exchange_symbol, AssetBalance, Balance, Candle};

pub const BINANCE_FUTURES_BASE: &str = "https://fapi.binance.com";

/// Largest page `/fapi/v1/klines` returns
const MAX_KLINES: usize = 1500;

// Binance codes the client reacts to
const CODE_UNKNOWN_ORDER: i64 = -2013;
const CODE_DUPLICATE_CLIENT_ID: i64 = -4116;
const CODE_INVALID_SYMBOL: i64 = -1121;
const CODE_MISSING_CREDENTIALS: i64 = -2015;
const CODE_QUANTITY_TOO_SMALL: i64 = -4003;

/// Codes that mean "try again", everything else is final
const RETRYABLE_CODES: [i64; 6] = [-1000, -1001, -1003, -1007, -1015, -1021];

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub recv_window_ms: u64,
    pub request_timeout: Duration,
    pub rate_limit_per_minute: u32,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: BINANCE_FUTURES_BASE.to_string(),
            api_key: None,
            api_secret: None,
            recv_window_ms: 5_000,
            request_timeout: Duration::from_secs(10),
            rate_limit_per_minute: 1_200,
        }
    }
}

#[derive(Clone)]
struct Credentials {
    api_key: String,
    api_secret: String,
}

/// Binance USDⓈ-M futures REST client
///
/// Serves both candles and order entry. Clones share the rate limiter and the
/// symbol precision cache.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    recv_window_ms: u64,
    rate_limiter: Arc<BinanceRateLimiter>,
    quantity_precision: Arc<RwLock<HashMap<String, u32>>>,
}

/// Error body returned by Binance on 4xx/5xx
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// `/fapi/v1/order` response, shared by submit, query and cancel
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    status: String,
    #[serde(default)]
    executed_qty: String,
    #[serde(default)]
    avg_price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    asset: String,
    balance: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    quantity_precision: u32,
}

impl BinanceClient {
    pub fn new(config: BinanceConfig) -> crate::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        let per_minute = NonZeroU32::new(config.rate_limit_per_minute)
            .ok_or("rate_limit_per_minute must be greater than zero")?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)));

        let credentials = match (config.api_key, config.api_secret) {
            (Some(api_key), Some(api_secret)) if !api_key.is_empty() && !api_secret.is_empty() => {
                Some(Credentials {
                    api_key,
                    api_secret,
                })
            }
            _ => None,
        };

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            recv_window_ms: config.recv_window_ms,
            rate_limiter,
            quantity_precision: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Whether signed endpoints can be used
    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Fetch up to `limit` candles, oldest first
    pub async fn klines(
        &self,
        pair: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let params = vec![
            ("symbol", exchange_symbol(pair)),
            ("interval", interval.to_string()),
            ("limit", limit.clamp(1, MAX_KLINES).to_string()),
        ];
        let rows: Vec<Vec<serde_json::Value>> = self
            .request(Method::GET, "/fapi/v1/klines", params, false)
            .await?;

        rows.iter().map(|row| parse_kline(row)).collect()
    }

    /// Round a quantity down to the symbol's lot precision
    async fn format_quantity(&self, symbol: &str, quantity: f64) -> Result<String, ExchangeError> {
        let precision = self.precision(symbol).await?;
        let factor = 10f64.powi(precision as i32);
        let rounded = (quantity * factor + 1e-9).floor() / factor;

        if rounded <= 0.0 {
            return Err(ExchangeError::fatal(
                CODE_QUANTITY_TOO_SMALL,
                format!("quantity {} is below the lot size of {}", quantity, symbol),
            ));
        }
        Ok(format!("{:.*}", precision as usize, rounded))
    }

    async fn precision(&self, symbol: &str) -> Result<u32, ExchangeError> {
        if let Some(precision) = self.quantity_precision.read().await.get(symbol) {
            return Ok(*precision);
        }

        let info: ExchangeInfo = self
            .request(Method::GET, "/fapi/v1/exchangeInfo", vec![], false)
            .await?;

        let mut cache = self.quantity_precision.write().await;
        for entry in info.symbols {
            cache.insert(entry.symbol, entry.quantity_precision);
        }
        tracing::debug!("Loaded lot precision for {} symbols", cache.len());

        cache.get(symbol).copied().ok_or_else(|| {
            ExchangeError::fatal(CODE_INVALID_SYMBOL, format!("invalid symbol {}", symbol))
        })
    }

    async fn order_by(
        &self,
        pair: &str,
        key: &'static str,
        value: &str,
    ) -> Result<OrderAck, ExchangeError> {
        let params = vec![("symbol", exchange_symbol(pair)), (key, value.to_string())];
        let response: OrderResponse = self
            .request(Method::GET, "/fapi/v1/order", params, true)
            .await?;
        Ok(response.into_ack())
    }

    /// Send a request and decode the JSON body; signed requests carry the
    /// API key header plus `recvWindow`, `timestamp` and `signature`
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&str, String)>,
        signed: bool,
    ) -> Result<T, ExchangeError> {
        let mut query = encode_params(&params);
        let mut builder;

        if signed {
            let credentials = self.credentials.as_ref().ok_or_else(|| {
                ExchangeError::fatal(CODE_MISSING_CREDENTIALS, "API credentials are not configured")
            })?;

            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!(
                "recvWindow={}&timestamp={}",
                self.recv_window_ms,
                Utc::now().timestamp_millis()
            ));
            let signature = sign(&credentials.api_secret, &query)?;
            query.push_str("&signature=");
            query.push_str(&signature);

            builder = self
                .client
                .request(method.clone(), self.url(path, &query))
                .header("X-MBX-APIKEY", &credentials.api_key);
        } else {
            builder = self.client.request(method.clone(), self.url(path, &query));
        }
        builder = builder.header("Accept", "application/json");

        self.rate_limiter.until_ready().await;

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err = classify_error(status, &body);
            tracing::debug!("{} {} failed: {}", method, path, err);
            return Err(err);
        }

        serde_json::from_str(&body).map_err(|e| {
            ExchangeError::fatal(-3, format!("invalid response from {}: {}", path, e))
        })
    }

    fn url(&self, path: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        }
    }
}

#[async_trait]
impl MarketDataGateway for BinanceClient {
    async fn fetch_candles(
        &self,
        pair: &str,
        interval: &str,
        lookback: usize,
    ) -> Result<Vec<Candle>, MarketDataError> {
        self.klines(pair, interval, lookback)
            .await
            .map_err(|e| MarketDataError::DataUnavailable(format!("{}: {}", pair, e)))
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let symbol = exchange_symbol(&request.pair);
        let quantity = self.format_quantity(&symbol, request.quantity).await?;

        let mut params = vec![
            ("symbol", symbol),
            ("side", request.side.as_str().to_string()),
            ("quantity", quantity),
            ("newClientOrderId", request.idempotency_key.clone()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        match request.price {
            Some(price) => {
                params.push(("type", "LIMIT".to_string()));
                params.push(("timeInForce", "GTC".to_string()));
                params.push(("price", price.to_string()));
            }
            None => params.push(("type", "MARKET".to_string())),
        }
        if request.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }

        tracing::info!(
            pair = %request.pair,
            key = %request.idempotency_key,
            "📤 Submitting {} {} {}",
            request.side,
            request.quantity,
            request.pair
        );

        match self
            .request::<OrderResponse>(Method::POST, "/fapi/v1/order", params, true)
            .await
        {
            Ok(response) => Ok(response.into_ack()),
            // The key already reached the exchange; answer with that order
            Err(e) if e.code == CODE_DUPLICATE_CLIENT_ID => self
                .find_order(&request.pair, &request.idempotency_key)
                .await?
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    async fn query_order(
        &self,
        pair: &str,
        exchange_order_id: &str,
    ) -> Result<OrderAck, ExchangeError> {
        self.order_by(pair, "orderId", exchange_order_id).await
    }

    async fn find_order(
        &self,
        pair: &str,
        idempotency_key: &str,
    ) -> Result<Option<OrderAck>, ExchangeError> {
        match self.order_by(pair, "origClientOrderId", idempotency_key).await {
            Ok(ack) => Ok(Some(ack)),
            Err(e) if e.code == CODE_UNKNOWN_ORDER => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn cancel_order(&self, pair: &str, exchange_order_id: &str) -> Result<(), ExchangeError> {
        let params = vec![
            ("symbol", exchange_symbol(pair)),
            ("orderId", exchange_order_id.to_string()),
        ];
        let _: OrderResponse = self
            .request(Method::DELETE, "/fapi/v1/order", params, true)
            .await?;
        Ok(())
    }

    async fn get_balance(&self) -> Result<Balance, ExchangeError> {
        let entries: Vec<BalanceEntry> = self
            .request(Method::GET, "/fapi/v2/balance", vec![], true)
            .await?;

        let mut balance = Balance::new();
        for entry in entries {
            let total = parse_number(&entry.balance)?;
            let available = parse_number(&entry.available_balance)?;
            balance.insert(
                entry.asset,
                AssetBalance {
                    available,
                    locked: (total - available).max(0.0),
                },
            );
        }
        Ok(balance)
    }

    fn name(&self) -> &str {
        "binance-futures"
    }
}

impl OrderResponse {
    fn into_ack(self) -> OrderAck {
        let filled_quantity = self.executed_qty.parse().unwrap_or(0.0);
        let avg_price = self
            .avg_price
            .parse::<f64>()
            .ok()
            .filter(|price| *price > 0.0);

        OrderAck {
            exchange_order_id: self.order_id.to_string(),
            status: map_status(&self.status, filled_quantity),
            filled_quantity,
            avg_price,
        }
    }
}

/// Map a Binance order status onto the local lifecycle
fn map_status(status: &str, filled_quantity: f64) -> OrderStatus {
    match status {
        "NEW" => OrderStatus::Acknowledged,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" if filled_quantity > 0.0 => {
            OrderStatus::PartiallyFilled
        }
        "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Cancelled,
        _ => OrderStatus::Failed,
    }
}

/// Classify a failed HTTP response
///
/// Throttling, server trouble and the listed Binance codes are retryable;
/// other API errors are final.
pub fn classify_error(status: StatusCode, body: &str) -> ExchangeError {
    let transient_status = status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.as_u16() == 418;

    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(api) => ExchangeError {
            retryable: transient_status || RETRYABLE_CODES.contains(&api.code),
            code: api.code,
            message: api.msg,
        },
        Err(_) => ExchangeError {
            code: -(status.as_u16() as i64),
            message: format!("HTTP {}: {}", status, body.trim()),
            retryable: transient_status,
        },
    }
}

/// HMAC-SHA256 of the query string, hex encoded
fn sign(secret: &str, query: &str) -> Result<String, ExchangeError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::fatal(CODE_MISSING_CREDENTIALS, e.to_string()))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_number(raw: &str) -> Result<f64, ExchangeError> {
    raw.parse()
        .map_err(|_| ExchangeError::fatal(-3, format!("invalid number {:?}", raw)))
}

/// Kline row: `[open_time, open, high, low, close, volume, close_time, ...]`
fn parse_kline(row: &[serde_json::Value]) -> Result<Candle, ExchangeError> {
    let invalid = || ExchangeError::fatal(-3, format!("invalid kline row {:?}", row));

    let open_time = row.first().and_then(|v| v.as_i64()).ok_or_else(invalid)?;
    let field = |i: usize| -> Result<f64, ExchangeError> {
        match row.get(i) {
            Some(serde_json::Value::String(s)) => parse_number(s),
            Some(serde_json::Value::Number(n)) => n.as_f64().ok_or_else(invalid),
            _ => Err(invalid()),
        }
    };

    Ok(Candle {
        timestamp: Utc
            .timestamp_millis_opt(open_time)
            .single()
            .ok_or_else(invalid)?,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}
