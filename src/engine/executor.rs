//! Bracket service, the caller-facing entry point.
//!
//! Resolves a venue name and credentials, fills in execution defaults,
//! obtains a gateway and hands the request to a [`BracketController`].
//! Configuration errors surface before any gateway is touched.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::controller::BracketController;
use crate::config::ExecutionConfig;
use crate::gateway::GatewayProvider;
use crate::resolver::VenueResolver;
use crate::types::{BracketError, BracketOrder, BracketOrderRequest, BracketOutcome, BracketState};

// ---------------------------------------------------------------------------
// Execution report
// ---------------------------------------------------------------------------

/// One bracket order and how it ended.
#[derive(Debug)]
pub struct BracketRun {
    pub order: BracketOrder,
    pub result: Result<BracketOutcome, BracketError>,
}

/// Results of a batch of bracket executions, in submission order.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub runs: Vec<BracketRun>,
}

impl ExecutionReport {
    pub fn placed(&self) -> usize {
        self.count_state(BracketState::BracketPlaced)
    }

    pub fn aborted(&self) -> usize {
        self.count_state(BracketState::Aborted)
    }

    pub fn failed(&self) -> usize {
        self.runs.iter().filter(|r| r.result.is_err()).count()
    }

    /// Runs that left an open position without full protection.
    pub fn critical(&self) -> impl Iterator<Item = &BracketRun> {
        self.runs
            .iter()
            .filter(|r| r.result.as_ref().err().is_some_and(BracketError::is_critical))
    }

    fn count_state(&self, state: BracketState) -> usize {
        self.runs
            .iter()
            .filter(|r| matches!(&r.result, Ok(o) if o.state == state))
            .count()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct BracketService {
    resolver: VenueResolver,
    gateways: Arc<dyn GatewayProvider>,
    defaults: ExecutionConfig,
}

impl BracketService {
    pub fn new(
        resolver: VenueResolver,
        gateways: Arc<dyn GatewayProvider>,
        defaults: ExecutionConfig,
    ) -> Self {
        Self {
            resolver,
            gateways,
            defaults,
        }
    }

    /// Apply execution defaults to a caller's order.
    pub fn build_request(&self, order: &BracketOrder, venue_id: &str) -> BracketOrderRequest {
        let d = &self.defaults;
        BracketOrderRequest {
            venue: venue_id.to_string(),
            pair: order.pair.clone(),
            side: order.side.unwrap_or(d.entry_side),
            entry_price: order.entry_price,
            stop_price: order.stop_price,
            take_profit_price: order.take_profit_price,
            stop_loss_price: order.stop_loss_price,
            size: order.size.unwrap_or(d.default_size),
            poll_interval: order
                .poll_interval_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| d.poll_interval()),
            timeout: order
                .timeout_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| d.timeout()),
        }
    }

    /// Run one bracket trade.
    ///
    /// Fails with `UnsupportedVenue`, `MissingCredentials` or
    /// `InvalidRequest` before any gateway call; otherwise returns
    /// whatever the controller reports.
    pub async fn execute(&self, order: &BracketOrder) -> Result<BracketOutcome, BracketError> {
        let venue = self.resolver.resolve(&order.venue)?;
        let request = self.build_request(order, &venue.id);
        request.validate().map_err(BracketError::InvalidRequest)?;

        let gateway = self.gateways.gateway_for(&venue)?;

        info!(request = %request, "Executing bracket");
        BracketController::new(gateway).execute(&request).await
    }

    /// Run several bracket trades concurrently.
    pub async fn execute_all(&self, orders: &[BracketOrder]) -> ExecutionReport {
        if orders.is_empty() {
            return ExecutionReport::default();
        }

        info!(count = orders.len(), "Executing bracket batch");

        let results = join_all(orders.iter().map(|order| self.execute(order))).await;

        let runs: Vec<BracketRun> = orders
            .iter()
            .cloned()
            .zip(results)
            .map(|(order, result)| {
                match &result {
                    Ok(outcome) => info!(
                        venue = %order.venue,
                        pair = %order.pair,
                        outcome = %outcome,
                        "Bracket finished"
                    ),
                    Err(e) if e.is_critical() => error!(
                        venue = %order.venue,
                        pair = %order.pair,
                        error = %e,
                        "Bracket left an unprotected position"
                    ),
                    Err(e) => warn!(
                        venue = %order.venue,
                        pair = %order.pair,
                        error = %e,
                        reconcile = e.needs_reconciliation(),
                        "Bracket failed"
                    ),
                }
                BracketRun { order, result }
            })
            .collect();

        ExecutionReport { runs }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
