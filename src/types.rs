//! Shared types for BRACKETEER.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that gateway, engine, and
//! config modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Fee currency reported when no matching trade carries fee data.
pub const UNKNOWN_FEE_CURRENCY: &str = "unknown";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    #[serde(alias = "long")]
    Buy,
    #[serde(alias = "short")]
    Sell,
}

impl Side {
    /// The opposite side. Both bracket legs close the entry, so they
    /// always trade this way.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Order types the controller submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    StopLimit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::StopLimit => write!(f, "stop_limit"),
        }
    }
}

/// Snapshot of an order's state as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    /// Fully filled.
    Closed,
    Canceled,
    Rejected,
    Unknown,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "open"),
            OrderStatus::Closed => write!(f, "closed"),
            OrderStatus::Canceled => write!(f, "canceled"),
            OrderStatus::Rejected => write!(f, "rejected"),
            OrderStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A protective order of a bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    TakeProfit,
    StopLoss,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::TakeProfit => write!(f, "take-profit"),
            Leg::StopLoss => write!(f, "stop-loss"),
        }
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Venue-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A submitted order: its venue id plus the pair it trades, which some
/// venues need again for status and cancel calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderHandle {
    pub id: OrderId,
    pub pair: String,
}

impl OrderHandle {
    pub fn new(id: impl Into<String>, pair: impl Into<String>) -> Self {
        Self {
            id: OrderId::new(id),
            pair: pair.into(),
        }
    }
}

impl fmt::Display for OrderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.pair)
    }
}

/// Everything a gateway needs to place one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub pair: String,
    pub order_type: OrderType,
    pub side: Side,
    pub size: Decimal,
    /// Limit price.
    pub price: Decimal,
    /// Trigger price; required for stop-limit orders.
    pub stop_price: Option<Decimal>,
}

impl OrderRequest {
    pub fn limit(pair: &str, side: Side, size: Decimal, price: Decimal) -> Self {
        Self {
            pair: pair.to_string(),
            order_type: OrderType::Limit,
            side,
            size,
            price,
            stop_price: None,
        }
    }

    pub fn stop_limit(
        pair: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            pair: pair.to_string(),
            order_type: OrderType::StopLimit,
            side,
            size,
            price,
            stop_price: Some(stop_price),
        }
    }
}

impl fmt::Display for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} @ {}",
            self.order_type, self.side, self.size, self.pair, self.price
        )?;
        if let Some(stop) = self.stop_price {
            write!(f, " (stop {stop})")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Trades & fees
// ---------------------------------------------------------------------------

/// Fee charged on a single fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    pub cost: Decimal,
    pub currency: String,
}

/// A single fill event reported by the venue's trade history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: String,
    /// Id of the order that produced this fill.
    pub order_id: OrderId,
    pub pair: String,
    pub filled_quantity: Decimal,
    /// Absent when the venue does not report fees for this fill.
    pub fee: Option<Fee>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated fees for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeTotal {
    pub amount: Decimal,
    pub currency: String,
}

impl FeeTotal {
    /// Zero fee with unknown currency.
    pub fn unknown() -> Self {
        Self {
            amount: Decimal::ZERO,
            currency: UNKNOWN_FEE_CURRENCY.to_string(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.currency == UNKNOWN_FEE_CURRENCY
    }
}

impl fmt::Display for FeeTotal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

// ---------------------------------------------------------------------------
// Bracket request / outcome
// ---------------------------------------------------------------------------

/// A bracket trade as a caller describes it: venue by human-readable
/// name, with optional overrides of the execution defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrder {
    pub venue: String,
    pub pair: String,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
    #[serde(default)]
    pub side: Option<Side>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl BracketOrder {
    pub fn new(
        venue: &str,
        pair: &str,
        entry_price: Decimal,
        stop_price: Decimal,
        take_profit_price: Decimal,
        stop_loss_price: Decimal,
    ) -> Self {
        Self {
            venue: venue.to_string(),
            pair: pair.to_string(),
            entry_price,
            stop_price,
            take_profit_price,
            stop_loss_price,
            side: None,
            size: None,
            poll_interval_ms: None,
            timeout_ms: None,
        }
    }
}

/// A fully resolved bracket trade, ready for the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrderRequest {
    /// Gateway-specific venue identifier (e.g. "coinbasepro").
    pub venue: String,
    pub pair: String,
    pub side: Side,
    pub entry_price: Decimal,
    /// Trigger price for the entry stop-limit.
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
    pub size: Decimal,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl BracketOrderRequest {
    /// Check the request invariants. Returns a description of the first
    /// violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.pair.trim().is_empty() {
            return Err("trading pair is empty".into());
        }
        if self.size <= Decimal::ZERO {
            return Err(format!("size must be positive, got {}", self.size));
        }
        if self.timeout.is_zero() {
            return Err("timeout must be positive".into());
        }
        if self.poll_interval.is_zero() {
            return Err("poll interval must be positive".into());
        }
        for (name, price) in [
            ("entry", self.entry_price),
            ("stop", self.stop_price),
            ("take-profit", self.take_profit_price),
            ("stop-loss", self.stop_loss_price),
        ] {
            if price <= Decimal::ZERO {
                return Err(format!("{name} price must be positive, got {price}"));
            }
        }

        let (entry, tp, sl) = (
            self.entry_price,
            self.take_profit_price,
            self.stop_loss_price,
        );
        match self.side {
            Side::Buy => {
                if sl >= entry {
                    return Err(format!(
                        "buy bracket needs stop-loss below entry ({sl} >= {entry})"
                    ));
                }
                if tp <= entry {
                    return Err(format!(
                        "buy bracket needs take-profit above entry ({tp} <= {entry})"
                    ));
                }
            }
            Side::Sell => {
                if sl <= entry {
                    return Err(format!(
                        "sell bracket needs stop-loss above entry ({sl} <= {entry})"
                    ));
                }
                if tp >= entry {
                    return Err(format!(
                        "sell bracket needs take-profit below entry ({tp} >= {entry})"
                    ));
                }
            }
        }
        Ok(())
    }

    /// The entry order: stop-limit on the configured side.
    pub fn entry_order(&self) -> OrderRequest {
        OrderRequest::stop_limit(
            &self.pair,
            self.side,
            self.size,
            self.entry_price,
            self.stop_price,
        )
    }

    /// Take-profit leg: limit order on the opposite side.
    pub fn take_profit_order(&self) -> OrderRequest {
        OrderRequest::limit(
            &self.pair,
            self.side.opposite(),
            self.size,
            self.take_profit_price,
        )
    }

    /// Stop-loss leg: stop-limit on the opposite side, triggering at its
    /// own limit price.
    pub fn stop_loss_order(&self) -> OrderRequest {
        OrderRequest::stop_limit(
            &self.pair,
            self.side.opposite(),
            self.size,
            self.stop_loss_price,
            self.stop_loss_price,
        )
    }
}

impl fmt::Display for BracketOrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} @ {} (stop {} | tp {} | sl {})",
            self.venue,
            self.side,
            self.size,
            self.pair,
            self.entry_price,
            self.stop_price,
            self.take_profit_price,
            self.stop_loss_price,
        )
    }
}

/// Lifecycle state of one bracket execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BracketState {
    Init,
    EntrySubmitted,
    EntryFilled,
    TimedOut,
    Aborted,
    BracketPlaced,
}

impl BracketState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BracketState::Aborted | BracketState::BracketPlaced)
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: BracketState) -> bool {
        use BracketState::*;
        matches!(
            (self, next),
            (Init, EntrySubmitted)
                | (EntrySubmitted, EntrySubmitted)
                | (EntrySubmitted, EntryFilled)
                | (EntrySubmitted, Aborted)
                | (EntrySubmitted, TimedOut)
                | (TimedOut, Aborted)
                | (TimedOut, EntryFilled)
                | (EntryFilled, BracketPlaced)
        )
    }
}

impl fmt::Display for BracketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BracketState::Init => write!(f, "INIT"),
            BracketState::EntrySubmitted => write!(f, "ENTRY_SUBMITTED"),
            BracketState::EntryFilled => write!(f, "ENTRY_FILLED"),
            BracketState::TimedOut => write!(f, "TIMED_OUT"),
            BracketState::Aborted => write!(f, "ABORTED"),
            BracketState::BracketPlaced => write!(f, "BRACKET_PLACED"),
        }
    }
}

/// Result of one bracket execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOutcome {
    pub entry: OrderHandle,
    /// Last status observed for the entry order.
    pub entry_status: OrderStatus,
    /// Terminal state: `BracketPlaced` or `Aborted`.
    pub state: BracketState,
    pub fee: FeeTotal,
    /// Quantity reported by the entry's trade records.
    pub filled_quantity: Decimal,
    /// False when the entry filled but its trade history could not be
    /// read, so an unknown `fee` means missing data rather than no fees.
    pub trade_history_available: bool,
    pub take_profit: Option<OrderHandle>,
    pub stop_loss: Option<OrderHandle>,
    pub polls: u32,
}

impl BracketOutcome {
    pub fn is_placed(&self) -> bool {
        self.state == BracketState::BracketPlaced
    }
}

impl fmt::Display for BracketOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entry={} status={} fee={} polls={}",
            self.state, self.entry.id, self.entry_status, self.fee, self.polls
        )?;
        if !self.trade_history_available {
            write!(f, " (trade history unavailable)")?;
        }
        if let (Some(tp), Some(sl)) = (&self.take_profit, &self.stop_loss) {
            write!(f, " tp={} sl={}", tp.id, sl.id)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure reported by an exchange gateway.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// Venue refused the request (bad price, insufficient balance, ...).
    #[error("Rejected by venue ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Order not found: {0}")]
    NotFound(String),

    /// Cancel refused because the order already left the book, usually
    /// because it filled.
    #[error("Order already filled: {0}")]
    AlreadyFilled(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Network failure or venue-side 5xx. The request may or may not
    /// have taken effect.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The venue answered with success but the body could not be read.
    #[error("Failed to decode venue response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Whether the venue may have acted on the request despite the error.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::Decode(_))
    }
}

/// The gateway operation a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    EntryPlacement,
    StatusPoll,
    Cancel,
    LegPlacement,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::EntryPlacement => write!(f, "entry placement"),
            Stage::StatusPoll => write!(f, "status poll"),
            Stage::Cancel => write!(f, "cancel"),
            Stage::LegPlacement => write!(f, "leg placement"),
        }
    }
}

/// Errors surfaced by a bracket execution.
#[derive(Debug, thiserror::Error)]
pub enum BracketError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported venue: {0}")]
    UnsupportedVenue(String),

    #[error("Missing credentials for {venue}: {missing} not set")]
    MissingCredentials { venue: String, missing: String },

    /// The gateway client could not be built; no order was sent.
    #[error("Gateway for {venue} unavailable: {source}")]
    GatewayUnavailable {
        venue: String,
        #[source]
        source: GatewayError,
    },

    #[error("Gateway error during {stage}: {source}")]
    Gateway {
        stage: Stage,
        #[source]
        source: GatewayError,
    },

    /// Entry placement failed in a way that does not rule out the order
    /// having been accepted.
    #[error("Entry order on {pair} unconfirmed, reconcile with the venue: {source}")]
    EntryUnconfirmed {
        pair: String,
        #[source]
        source: GatewayError,
    },

    /// A status poll failed after the entry was accepted. The entry is
    /// live and nobody is watching it.
    #[error("Status poll for entry {entry} failed, the order is unmonitored: {source}")]
    EntryUnmonitored {
        entry: OrderHandle,
        #[source]
        source: GatewayError,
    },

    /// The timeout cancel failed; the entry may still be live or filled.
    #[error("Cancel of entry {entry} failed, its state is unknown: {source}")]
    EntryStateUnknown {
        entry: OrderHandle,
        #[source]
        source: GatewayError,
    },

    /// Entry filled but at least one protective leg was not placed.
    #[error("UNPROTECTED POSITION: entry {entry} filled but {failed_leg} leg failed: {source}")]
    UnprotectedPosition {
        entry: OrderHandle,
        failed_leg: Leg,
        take_profit: Option<OrderHandle>,
        stop_loss: Option<OrderHandle>,
        fee: FeeTotal,
        #[source]
        source: GatewayError,
    },
}

impl BracketError {
    pub fn poll(entry: &OrderHandle, source: GatewayError) -> Self {
        BracketError::EntryUnmonitored {
            entry: entry.clone(),
            source,
        }
    }

    /// Map an entry placement failure, separating ambiguous failures.
    pub fn entry_placement(pair: &str, source: GatewayError) -> Self {
        if source.is_ambiguous() {
            BracketError::EntryUnconfirmed {
                pair: pair.to_string(),
                source,
            }
        } else {
            BracketError::Gateway {
                stage: Stage::EntryPlacement,
                source,
            }
        }
    }

    /// The gateway operation that failed, for gateway-derived errors.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BracketError::Gateway { stage, .. } => Some(*stage),
            BracketError::EntryUnconfirmed { .. } => Some(Stage::EntryPlacement),
            BracketError::EntryUnmonitored { .. } => Some(Stage::StatusPoll),
            BracketError::EntryStateUnknown { .. } => Some(Stage::Cancel),
            BracketError::UnprotectedPosition { .. } => Some(Stage::LegPlacement),
            _ => None,
        }
    }

    /// An open position is left without protection.
    pub fn is_critical(&self) -> bool {
        matches!(self, BracketError::UnprotectedPosition { .. })
    }

    /// The venue's true state must be checked out-of-band.
    pub fn needs_reconciliation(&self) -> bool {
        matches!(
            self,
            BracketError::EntryUnconfirmed { .. }
                | BracketError::EntryUnmonitored { .. }
                | BracketError::EntryStateUnknown { .. }
                | BracketError::UnprotectedPosition { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
