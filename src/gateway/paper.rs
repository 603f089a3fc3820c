//! Paper venue: an in-memory exchange for dry runs.
//!
//! Orders rest on the simulated book until they have been polled a set
//! number of times, then fill completely at their limit price. Each fill
//! writes one trade record with a fee charged in the pair's quote
//! currency. No network, no real money.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::ExchangeGateway;
use crate::types::{
    Fee, GatewayError, OrderHandle, OrderId, OrderRequest, OrderStatus, TradeRecord,
};

/// One order resting on (or gone from) the paper book.
#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub handle: OrderHandle,
    pub request: OrderRequest,
    pub status: OrderStatus,
    pub polls: u32,
}

#[derive(Debug, Default)]
struct Book {
    orders: Vec<PaperOrder>,
    trades: Vec<TradeRecord>,
    cancels: Vec<OrderHandle>,
}

pub struct PaperGateway {
    /// Orders fill on this status poll; `None` never fills.
    fill_after_polls: Option<u32>,
    fee_rate: Decimal,
    book: Mutex<Book>,
}

impl PaperGateway {
    pub fn new(fill_after_polls: Option<u32>, fee_rate: Decimal) -> Self {
        Self {
            fill_after_polls,
            fee_rate,
            book: Mutex::new(Book::default()),
        }
    }

    /// Every order placed so far, in placement order.
    pub async fn orders(&self) -> Vec<PaperOrder> {
        self.book.lock().await.orders.clone()
    }

    /// Every cancel request received so far.
    pub async fn cancels(&self) -> Vec<OrderHandle> {
        self.book.lock().await.cancels.clone()
    }

    /// Quote currency of a pair ("BTC/USD" → "USD").
    fn quote_currency(pair: &str) -> String {
        pair.rsplit(['/', '-'])
            .next()
            .unwrap_or(pair)
            .to_uppercase()
    }

    fn fill(&self, order: &mut PaperOrder) -> TradeRecord {
        order.status = OrderStatus::Closed;
        let notional = order.request.price * order.request.size;
        TradeRecord {
            trade_id: uuid::Uuid::new_v4().to_string(),
            order_id: order.handle.id.clone(),
            pair: order.handle.pair.clone(),
            filled_quantity: order.request.size,
            fee: Some(Fee {
                cost: (notional * self.fee_rate).round_dp(8),
                currency: Self::quote_currency(&order.handle.pair),
            }),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayError> {
        if order.size <= Decimal::ZERO || order.price <= Decimal::ZERO {
            return Err(GatewayError::Rejected {
                code: "invalid_order".into(),
                message: format!("size and price must be positive: {order}"),
            });
        }

        let handle = OrderHandle {
            id: OrderId::new(format!("paper-{}", uuid::Uuid::new_v4())),
            pair: order.pair.clone(),
        };

        info!(order_id = %handle.id, order = %order, "[DRY RUN] Order accepted");

        self.book.lock().await.orders.push(PaperOrder {
            handle: handle.clone(),
            request: order.clone(),
            status: OrderStatus::Open,
            polls: 0,
        });

        Ok(handle)
    }

    async fn fetch_order_status(&self, handle: &OrderHandle) -> Result<OrderStatus, GatewayError> {
        let mut book = self.book.lock().await;
        let order = book
            .orders
            .iter_mut()
            .find(|o| o.handle == *handle)
            .ok_or_else(|| GatewayError::NotFound(handle.id.to_string()))?;

        if order.status == OrderStatus::Open {
            order.polls += 1;
            if self.fill_after_polls.is_some_and(|n| order.polls >= n) {
                let trade = self.fill(order);
                debug!(order_id = %handle.id, fee = ?trade.fee, "[DRY RUN] Order filled");
                let status = order.status;
                book.trades.push(trade);
                return Ok(status);
            }
        }

        Ok(order.status)
    }

    async fn cancel_order(&self, handle: &OrderHandle) -> Result<(), GatewayError> {
        let mut book = self.book.lock().await;
        book.cancels.push(handle.clone());

        let order = book
            .orders
            .iter_mut()
            .find(|o| o.handle == *handle)
            .ok_or_else(|| GatewayError::NotFound(handle.id.to_string()))?;

        match order.status {
            OrderStatus::Open => {
                order.status = OrderStatus::Canceled;
                info!(order_id = %handle.id, "[DRY RUN] Order canceled");
                Ok(())
            }
            OrderStatus::Closed => Err(GatewayError::AlreadyFilled(handle.id.to_string())),
            other => Err(GatewayError::Rejected {
                code: "not_open".into(),
                message: format!("order {} is {other}", handle.id),
            }),
        }
    }

    async fn fetch_trades(&self, pair: &str) -> Result<Vec<TradeRecord>, GatewayError> {
        let book = self.book.lock().await;
        Ok(book.trades.iter().filter(|t| t.pair == pair).cloned().collect())
    }
}
