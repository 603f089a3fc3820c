//! Binance-style spot REST gateway.
//!
//! Covers Binance.US and any venue speaking the same `/api/v3` dialect.
//!
//! API docs: https://docs.binance.us/#rest-api
//! Auth: `X-MBX-APIKEY` header + HMAC-SHA256 `signature` over the query
//! string, with `timestamp` and `recvWindow` appended.
//!
//! Status semantics: a 5xx response means the venue could not tell
//! whether the request executed, so it maps to `GatewayError::Transport`.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use tracing::{debug, warn};

use super::ExchangeGateway;
use crate::types::{
    Fee, GatewayError, OrderHandle, OrderId, OrderRequest, OrderStatus, OrderType, Side,
    TradeRecord,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BINANCE_US_URL: &str = "https://api.binance.us";
const BINANCE_URL: &str = "https://api.binance.com";

/// Milliseconds a signed request stays valid after its timestamp.
const RECV_WINDOW_MS: u64 = 5_000;

/// Maximum trades returned by `/api/v3/myTrades`.
const TRADE_HISTORY_LIMIT: u32 = 1000;

/// Venue error codes with special meaning.
const CODE_UNKNOWN_ORDER: i64 = -2011;
const CODE_NO_SUCH_ORDER: i64 = -2013;
const AUTH_CODES: &[i64] = &[-1022, -2014, -2015];

type HmacSha256 = Hmac<Sha256>;

/// Whether a venue id speaks the Binance REST dialect.
pub fn is_binance_venue(id: &str) -> bool {
    matches!(id, "binanceus" | "binance")
}

/// Production REST URL for a Binance venue id.
pub fn default_rest_url(id: &str) -> Option<&'static str> {
    match id {
        "binanceus" => Some(BINANCE_US_URL),
        "binance" => Some(BINANCE_URL),
        _ => None,
    }
}

pub struct BinanceConfig {
    pub rest_url: String,
    pub api_key: SecretString,
    pub api_secret: SecretString,
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

/// Response from `POST /api/v3/order`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    order_id: u64,
    #[serde(default)]
    status: Option<String>,
}

/// Response from `GET /api/v3/order`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderQuery {
    order_id: u64,
    status: String,
}

/// One entry of `GET /api/v3/myTrades`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountTrade {
    id: u64,
    order_id: u64,
    qty: String,
    #[serde(default)]
    commission: Option<String>,
    #[serde(default)]
    commission_asset: Option<String>,
    time: i64,
}

/// Error body returned on 4xx.
#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BinanceGateway {
    http: Client,
    cfg: BinanceConfig,
}

impl BinanceGateway {
    pub fn new(cfg: BinanceConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("BRACKETEER/0.1.0")
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, cfg })
    }

    // -- Helpers ---------------------------------------------------------

    /// "BTC/USD" → "BTCUSD".
    fn symbol(pair: &str) -> String {
        pair.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase()
    }

    fn side(side: Side) -> &'static str {
        match side {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    fn order_type(order_type: OrderType) -> &'static str {
        match order_type {
            OrderType::Limit => "LIMIT",
            OrderType::StopLimit => "STOP_LOSS_LIMIT",
        }
    }

    fn map_status(status: &str) -> OrderStatus {
        match status {
            "NEW" | "PARTIALLY_FILLED" | "PENDING_NEW" => OrderStatus::Open,
            "FILLED" => OrderStatus::Closed,
            "CANCELED" | "PENDING_CANCEL" | "EXPIRED" | "EXPIRED_IN_MATCH" => {
                OrderStatus::Canceled
            }
            "REJECTED" => OrderStatus::Rejected,
            other => {
                warn!(status = other, "Unrecognised Binance order status");
                OrderStatus::Unknown
            }
        }
    }

    fn decimal(value: &str, field: &str) -> Result<Decimal, GatewayError> {
        Decimal::from_str(value)
            .map_err(|e| GatewayError::Decode(format!("{field} '{value}': {e}")))
    }

    /// Map a non-success response to a gateway error.
    fn classify_error(status: StatusCode, body: &str) -> GatewayError {
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return GatewayError::RateLimited(body.to_string());
        }
        if status.is_server_error() {
            return GatewayError::Transport(format!("venue {status}: {body}"));
        }
        if status == StatusCode::UNAUTHORIZED {
            return GatewayError::Auth(body.to_string());
        }

        match serde_json::from_str::<ApiError>(body) {
            Ok(err) if err.code == CODE_NO_SUCH_ORDER => GatewayError::NotFound(err.msg),
            Ok(err) if AUTH_CODES.contains(&err.code) => GatewayError::Auth(err.msg),
            Ok(err) => GatewayError::Rejected {
                code: err.code.to_string(),
                message: err.msg,
            },
            Err(_) => GatewayError::Rejected {
                code: status.as_u16().to_string(),
                message: body.to_string(),
            },
        }
    }

    fn sign(secret: &str, query: &str) -> Result<String, GatewayError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| GatewayError::Auth(format!("invalid API secret: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, mut params: Vec<(&'static str, String)>) -> Result<String, GatewayError> {
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let signature = Self::sign(self.cfg.api_secret.expose_secret(), &query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    /// Send a signed request and decode the JSON response.
    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&'static str, String)>,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{path}?{}", self.cfg.rest_url, self.signed_query(params)?);

        debug!(method = %method, path, "Binance API request");

        let resp = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", self.cfg.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| GatewayError::Decode(format!("{path}: {e}")))
    }

    fn order_params(order: &OrderRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", Self::symbol(&order.pair)),
            ("side", Self::side(order.side).to_string()),
            ("type", Self::order_type(order.order_type).to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", order.size.normalize().to_string()),
            ("price", order.price.normalize().to_string()),
        ];
        if let Some(stop) = order.stop_price {
            params.push(("stopPrice", stop.normalize().to_string()));
        }
        params.push(("newClientOrderId", uuid::Uuid::new_v4().simple().to_string()));
        params
    }

    /// Query for `/api/v3/myTrades`, narrowed to one order when given.
    fn trade_params(pair: &str, order_id: Option<&OrderId>) -> Vec<(&'static str, String)> {
        let mut params = vec![("symbol", Self::symbol(pair))];
        match order_id {
            Some(id) => params.push(("orderId", id.to_string())),
            None => params.push(("limit", TRADE_HISTORY_LIMIT.to_string())),
        }
        params
    }

    async fn account_trades(
        &self,
        pair: &str,
        order_id: Option<&OrderId>,
    ) -> Result<Vec<TradeRecord>, GatewayError> {
        let trades: Vec<AccountTrade> = self
            .signed_request(
                Method::GET,
                "/api/v3/myTrades",
                Self::trade_params(pair, order_id),
            )
            .await?;

        trades
            .into_iter()
            .map(|t| Self::to_trade_record(pair, t))
            .collect()
    }

    fn to_trade_record(pair: &str, trade: AccountTrade) -> Result<TradeRecord, GatewayError> {
        let fee = match (trade.commission, trade.commission_asset) {
            (Some(cost), Some(asset)) if !asset.is_empty() => Some(Fee {
                cost: Self::decimal(&cost, "commission")?,
                currency: asset,
            }),
            _ => None,
        };

        Ok(TradeRecord {
            trade_id: trade.id.to_string(),
            order_id: OrderId::new(trade.order_id.to_string()),
            pair: pair.to_string(),
            filled_quantity: Self::decimal(&trade.qty, "qty")?,
            fee,
            timestamp: Utc
                .timestamp_millis_opt(trade.time)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl ExchangeGateway for BinanceGateway {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayError> {
        let ack: OrderAck = self
            .signed_request(Method::POST, "/api/v3/order", Self::order_params(order))
            .await?;

        debug!(order_id = ack.order_id, status = ?ack.status, "Binance order acknowledged");

        Ok(OrderHandle {
            id: OrderId::new(ack.order_id.to_string()),
            pair: order.pair.clone(),
        })
    }

    async fn fetch_order_status(&self, order: &OrderHandle) -> Result<OrderStatus, GatewayError> {
        let query: OrderQuery = self
            .signed_request(
                Method::GET,
                "/api/v3/order",
                vec![
                    ("symbol", Self::symbol(&order.pair)),
                    ("orderId", order.id.to_string()),
                ],
            )
            .await?;

        debug!(order_id = query.order_id, status = %query.status, "Binance order status");
        Ok(Self::map_status(&query.status))
    }

    async fn cancel_order(&self, order: &OrderHandle) -> Result<(), GatewayError> {
        let result: Result<serde_json::Value, GatewayError> = self
            .signed_request(
                Method::DELETE,
                "/api/v3/order",
                vec![
                    ("symbol", Self::symbol(&order.pair)),
                    ("orderId", order.id.to_string()),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            // "Unknown order sent": the order is no longer cancelable. Ask
            // the venue why, so a fill is not mistaken for a cancel.
            Err(GatewayError::Rejected { code, message })
                if code == CODE_UNKNOWN_ORDER.to_string() =>
            {
                match self.fetch_order_status(order).await? {
                    OrderStatus::Closed => Err(GatewayError::AlreadyFilled(order.id.to_string())),
                    OrderStatus::Canceled | OrderStatus::Rejected => Ok(()),
                    _ => Err(GatewayError::Rejected { code, message }),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_trades(&self, pair: &str) -> Result<Vec<TradeRecord>, GatewayError> {
        self.account_trades(pair, None).await
    }

    async fn fetch_order_trades(
        &self,
        order: &OrderHandle,
    ) -> Result<Vec<TradeRecord>, GatewayError> {
        self.account_trades(&order.pair, Some(&order.id)).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
