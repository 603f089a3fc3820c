//! Scripted exchange gateway for integration testing.
//!
//! Plays back a fixed sequence of entry statuses and records every call
//! so tests can assert on exactly what reached the "venue". All state is
//! in-memory.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bracketeer::gateway::{ExchangeGateway, GatewayProvider};
use bracketeer::resolver::ResolvedVenue;
use bracketeer::types::*;

/// Id assigned to the n-th placed order (1-based).
pub fn order_id(n: usize) -> String {
    format!("MOCK-{n:03}")
}

#[derive(Default)]
struct Calls {
    placed: Vec<OrderRequest>,
    status_polls: Vec<OrderHandle>,
    cancels: Vec<OrderHandle>,
    trade_fetches: Vec<String>,
}

/// A deterministic venue driven by test code.
pub struct ScriptedGateway {
    /// Statuses returned by successive polls. Once drained, the last
    /// one repeats.
    script: Mutex<VecDeque<OrderStatus>>,
    last_status: Mutex<OrderStatus>,
    trades: Mutex<Vec<TradeRecord>>,
    cancel_result: Mutex<Result<(), GatewayError>>,
    /// Placement of the n-th order (1-based) fails with this error.
    fail_placement: Mutex<Option<(usize, GatewayError)>>,
    calls: Mutex<Calls>,
}

impl ScriptedGateway {
    pub fn new(script: &[OrderStatus]) -> Self {
        Self {
            script: Mutex::new(script.iter().copied().collect()),
            last_status: Mutex::new(OrderStatus::Open),
            trades: Mutex::new(Vec::new()),
            cancel_result: Mutex::new(Ok(())),
            fail_placement: Mutex::new(None),
            calls: Mutex::new(Calls::default()),
        }
    }

    /// Entry stays open forever.
    pub fn never_fills() -> Self {
        Self::new(&[OrderStatus::Open])
    }

    /// Add a fill record for the order with id `order_id`.
    pub fn add_trade(&self, order_id: &str, pair: &str, qty: Decimal, fee: Option<(Decimal, &str)>) {
        let mut trades = self.trades.lock().unwrap();
        let n = trades.len() + 1;
        trades.push(TradeRecord {
            trade_id: format!("T-{n}"),
            order_id: OrderId::new(order_id),
            pair: pair.to_string(),
            filled_quantity: qty,
            fee: fee.map(|(cost, currency)| Fee {
                cost,
                currency: currency.to_string(),
            }),
            timestamp: Utc::now(),
        });
    }

    pub fn set_cancel_result(&self, result: Result<(), GatewayError>) {
        *self.cancel_result.lock().unwrap() = result;
    }

    pub fn fail_placement(&self, nth: usize, err: GatewayError) {
        *self.fail_placement.lock().unwrap() = Some((nth, err));
    }

    pub fn placed(&self) -> Vec<OrderRequest> {
        self.calls.lock().unwrap().placed.clone()
    }

    pub fn status_polls(&self) -> usize {
        self.calls.lock().unwrap().status_polls.len()
    }

    pub fn cancels(&self) -> Vec<OrderHandle> {
        self.calls.lock().unwrap().cancels.clone()
    }

    pub fn trade_fetches(&self) -> Vec<String> {
        self.calls.lock().unwrap().trade_fetches.clone()
    }

    /// Total number of gateway calls of any kind.
    pub fn total_calls(&self) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.placed.len() + calls.status_polls.len() + calls.cancels.len() + calls.trade_fetches.len()
    }
}

#[async_trait]
impl ExchangeGateway for ScriptedGateway {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayError> {
        let mut calls = self.calls.lock().unwrap();
        calls.placed.push(order.clone());
        let n = calls.placed.len();

        if let Some((nth, err)) = self.fail_placement.lock().unwrap().as_ref() {
            if *nth == n {
                return Err(err.clone());
            }
        }
        Ok(OrderHandle::new(order_id(n), order.pair.clone()))
    }

    async fn fetch_order_status(&self, order: &OrderHandle) -> Result<OrderStatus, GatewayError> {
        self.calls.lock().unwrap().status_polls.push(order.clone());

        let mut last = self.last_status.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(*last)
    }

    async fn cancel_order(&self, order: &OrderHandle) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().cancels.push(order.clone());
        self.cancel_result.lock().unwrap().clone()
    }

    async fn fetch_trades(&self, pair: &str) -> Result<Vec<TradeRecord>, GatewayError> {
        self.calls.lock().unwrap().trade_fetches.push(pair.to_string());
        Ok(self.trades.lock().unwrap().clone())
    }
}

/// Hands the same scripted gateway out for every venue.
pub struct ScriptedProvider(pub Arc<ScriptedGateway>);

impl GatewayProvider for ScriptedProvider {
    fn gateway_for(
        &self,
        _venue: &ResolvedVenue,
    ) -> Result<Arc<dyn ExchangeGateway>, BracketError> {
        Ok(self.0.clone())
    }
}
