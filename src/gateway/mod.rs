//! Exchange gateways.
//!
//! Defines the `ExchangeGateway` trait the bracket controller drives and
//! provides implementations for:
//! - Binance-style REST venues (binanceus), live execution
//! - Paper, an in-memory simulated venue for dry runs

pub mod binance;
pub mod paper;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::resolver::ResolvedVenue;
use crate::types::{
    BracketError, GatewayError, OrderHandle, OrderRequest, OrderStatus, TradeRecord,
};

use binance::{BinanceConfig, BinanceGateway};
use paper::PaperGateway;

/// Abstraction over a venue's trading API.
///
/// Implementors must tolerate concurrent use: independent bracket
/// executions share one gateway per venue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Submit an order.
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderHandle, GatewayError>;

    /// Current status of a submitted order.
    async fn fetch_order_status(&self, order: &OrderHandle) -> Result<OrderStatus, GatewayError>;

    /// Cancel an open order. Returns `GatewayError::AlreadyFilled` when
    /// the order filled before the cancel reached the venue.
    async fn cancel_order(&self, order: &OrderHandle) -> Result<(), GatewayError>;

    /// The account's trade history on a pair, each record tagged with the
    /// order that produced it.
    async fn fetch_trades(&self, pair: &str) -> Result<Vec<TradeRecord>, GatewayError>;

    /// Trade records for one order. Venues that can filter by order
    /// should, so busy pairs never push the order's fills out of the
    /// returned window.
    async fn fetch_order_trades(
        &self,
        order: &OrderHandle,
    ) -> Result<Vec<TradeRecord>, GatewayError> {
        self.fetch_trades(&order.pair).await
    }
}

/// Builds the gateway for a resolved venue.
pub trait GatewayProvider: Send + Sync {
    fn gateway_for(&self, venue: &ResolvedVenue) -> Result<Arc<dyn ExchangeGateway>, BracketError>;
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Real venues. Only Binance-style REST venues have a live gateway.
pub struct LiveGateways;

impl GatewayProvider for LiveGateways {
    fn gateway_for(&self, venue: &ResolvedVenue) -> Result<Arc<dyn ExchangeGateway>, BracketError> {
        let unsupported = || BracketError::UnsupportedVenue(format!("{} (no live gateway)", venue.id));
        if !binance::is_binance_venue(&venue.id) {
            return Err(unsupported());
        }
        let rest_url = venue
            .rest_url
            .clone()
            .or_else(|| binance::default_rest_url(&venue.id).map(str::to_string))
            .ok_or_else(unsupported)?;

        info!(venue = %venue.name, id = %venue.id, rest_url = %rest_url, "Connecting live gateway");

        let gateway = BinanceGateway::new(BinanceConfig {
            rest_url,
            api_key: venue.credentials.api_key.clone(),
            api_secret: venue.credentials.api_secret.clone(),
        })
        .map_err(|source| BracketError::GatewayUnavailable {
            venue: venue.id.clone(),
            source,
        })?;

        Ok(Arc::new(gateway))
    }
}

/// Every venue maps to the same simulated venue.
pub struct PaperGateways {
    gateway: Arc<PaperGateway>,
}

impl PaperGateways {
    pub fn new(gateway: PaperGateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }

    pub fn gateway(&self) -> Arc<PaperGateway> {
        self.gateway.clone()
    }
}

impl GatewayProvider for PaperGateways {
    fn gateway_for(&self, venue: &ResolvedVenue) -> Result<Arc<dyn ExchangeGateway>, BracketError> {
        info!(venue = %venue.name, id = %venue.id, "[DRY RUN] Using paper gateway");
        Ok(self.gateway.clone())
    }
}
