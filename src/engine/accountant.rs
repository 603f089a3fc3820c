//! Accountant: fee tally for a filled entry order.
//!
//! Venues report fills as individual trade records, so a single order
//! filled in pieces shows up several times. The accountant folds the
//! records belonging to one order into a single fee total.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::types::{FeeTotal, OrderHandle, TradeRecord};

// ---------------------------------------------------------------------------
// Fill summary
// ---------------------------------------------------------------------------

/// Fees and quantity attributed to one order.
#[derive(Debug, Clone, PartialEq)]
pub struct FillSummary {
    pub fee: FeeTotal,
    pub filled_quantity: Decimal,
    /// Number of trade records that matched the order.
    pub trades: usize,
}

impl FillSummary {
    /// Nothing known about the fill.
    pub fn empty() -> Self {
        Self {
            fee: FeeTotal::unknown(),
            filled_quantity: Decimal::ZERO,
            trades: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Accountant
// ---------------------------------------------------------------------------

pub struct Accountant;

impl Accountant {
    /// Sum the fees of every trade produced by `order` on its pair.
    ///
    /// The currency is taken from the first matching record that carries
    /// fee data. When no matching record has fee data the total is zero
    /// with currency "unknown".
    pub fn tally(order: &OrderHandle, trades: &[TradeRecord]) -> FillSummary {
        let matching: Vec<&TradeRecord> = trades
            .iter()
            .filter(|t| t.order_id == order.id && t.pair == order.pair)
            .collect();

        let filled_quantity: Decimal = matching.iter().map(|t| t.filled_quantity).sum();

        let mut currency: Option<&str> = None;
        let mut amount = Decimal::ZERO;
        for fee in matching.iter().filter_map(|t| t.fee.as_ref()) {
            match currency {
                None => currency = Some(fee.currency.as_str()),
                Some(c) if c != fee.currency => {
                    warn!(
                        order_id = %order.id,
                        expected = c,
                        found = %fee.currency,
                        "Mixed fee currencies on one order; summing anyway"
                    );
                }
                Some(_) => {}
            }
            amount += fee.cost;
        }

        let fee = match currency {
            Some(c) => FeeTotal {
                amount,
                currency: c.to_string(),
            },
            None => FeeTotal::unknown(),
        };

        debug!(
            order_id = %order.id,
            matched = matching.len(),
            total = trades.len(),
            fee = %fee,
            "Fees tallied"
        );

        FillSummary {
            fee,
            filled_quantity,
            trades: matching.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
