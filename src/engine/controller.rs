//! Bracket controller: the lifecycle of one bracket trade.
//!
//! submit entry → poll until filled or timed out → cancel if unfilled →
//! on fill: tally fees, place take-profit and stop-loss legs.
//!
//! One execution never has two gateway calls in flight; it suspends on
//! every poll wait and every gateway call. Executions share nothing but
//! the gateway, so any number of them may run side by side.

use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::accountant::{Accountant, FillSummary};
use crate::gateway::ExchangeGateway;
use crate::types::{
    BracketError, BracketOrderRequest, BracketOutcome, BracketState, GatewayError, Leg,
    OrderHandle, OrderRequest, OrderStatus, Stage,
};

/// How the polling phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollResult {
    Filled,
    /// The venue canceled or rejected the entry.
    Ended(OrderStatus),
    TimedOut,
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// Mutable bookkeeping for a single execution.
struct Run<'a> {
    request: &'a BracketOrderRequest,
    state: BracketState,
    polls: u32,
    last_status: OrderStatus,
    /// Cleared when the entry's trades could not be fetched.
    trade_history_available: bool,
}

impl<'a> Run<'a> {
    fn new(request: &'a BracketOrderRequest) -> Self {
        Self {
            request,
            state: BracketState::Init,
            polls: 0,
            last_status: OrderStatus::Unknown,
            trade_history_available: true,
        }
    }

    fn advance(&mut self, next: BracketState) {
        let legal = self.state.can_transition_to(next);
        if !legal {
            error!(
                pair = %self.request.pair,
                from = %self.state,
                to = %next,
                "Illegal bracket state transition"
            );
        }
        debug_assert!(legal, "illegal transition {} -> {}", self.state, next);

        if next == self.state {
            debug!(pair = %self.request.pair, state = %next, polls = self.polls, "Bracket state unchanged");
        } else {
            info!(
                venue = %self.request.venue,
                pair = %self.request.pair,
                from = %self.state,
                to = %next,
                "Bracket state change"
            );
        }
        self.state = next;
    }

    fn outcome(
        &self,
        entry: OrderHandle,
        fill: FillSummary,
        take_profit: Option<OrderHandle>,
        stop_loss: Option<OrderHandle>,
    ) -> BracketOutcome {
        debug_assert!(self.state.is_terminal(), "outcome taken in state {}", self.state);
        BracketOutcome {
            entry,
            entry_status: self.last_status,
            state: self.state,
            fee: fill.fee,
            filled_quantity: fill.filled_quantity,
            trade_history_available: self.trade_history_available,
            take_profit,
            stop_loss,
            polls: self.polls,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct BracketController {
    gateway: Arc<dyn ExchangeGateway>,
}

impl BracketController {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self { gateway }
    }

    /// Run one bracket trade to a terminal state.
    ///
    /// Returns the outcome for `BracketPlaced` and `Aborted`. Every other
    /// ending is an error, see [`BracketError`].
    pub async fn execute(
        &self,
        request: &BracketOrderRequest,
    ) -> Result<BracketOutcome, BracketError> {
        request.validate().map_err(BracketError::InvalidRequest)?;

        let mut run = Run::new(request);

        let entry_order = request.entry_order();
        let entry = self
            .gateway
            .place_order(&entry_order)
            .await
            .map_err(|e| {
                error!(order = %entry_order, stage = %Stage::EntryPlacement, error = %e, "Entry placement failed");
                BracketError::entry_placement(&request.pair, e)
            })?;

        run.last_status = OrderStatus::Open;
        info!(order_id = %entry.id, order = %entry_order, "Entry order submitted");
        run.advance(BracketState::EntrySubmitted);

        match self.poll_entry(&mut run, &entry).await? {
            PollResult::Filled => self.place_bracket(run, entry).await,
            PollResult::Ended(status) => {
                warn!(order_id = %entry.id, status = %status, "Entry ended by venue; no bracket placed");
                run.advance(BracketState::Aborted);
                Ok(run.outcome(entry, FillSummary::empty(), None, None))
            }
            PollResult::TimedOut => self.cancel_entry(run, entry).await,
        }
    }

    /// Poll the entry until it leaves the book or the timeout passes.
    ///
    /// The timeout is checked before every wait, so the last status check
    /// lands at most one poll interval past the deadline.
    async fn poll_entry(
        &self,
        run: &mut Run<'_>,
        entry: &OrderHandle,
    ) -> Result<PollResult, BracketError> {
        let started = Instant::now();
        let (interval, timeout) = (run.request.poll_interval, run.request.timeout);

        loop {
            if started.elapsed() >= timeout {
                return Ok(PollResult::TimedOut);
            }

            sleep(interval).await;

            let status = self.gateway.fetch_order_status(entry).await.map_err(|e| {
                error!(
                    order_id = %entry.id,
                    polls = run.polls,
                    stage = %Stage::StatusPoll,
                    error = %e,
                    "Status poll failed; entry left on the book unmonitored"
                );
                BracketError::poll(entry, e)
            })?;
            run.polls += 1;
            run.last_status = status;

            match status {
                OrderStatus::Closed => return Ok(PollResult::Filled),
                OrderStatus::Canceled | OrderStatus::Rejected => {
                    return Ok(PollResult::Ended(status))
                }
                OrderStatus::Open => run.advance(BracketState::EntrySubmitted),
                OrderStatus::Unknown => {
                    warn!(order_id = %entry.id, polls = run.polls, "Venue reported unknown status; still polling");
                }
            }
        }
    }

    /// Cancel an entry that did not fill in time.
    async fn cancel_entry(
        &self,
        mut run: Run<'_>,
        entry: OrderHandle,
    ) -> Result<BracketOutcome, BracketError> {
        run.advance(BracketState::TimedOut);
        warn!(
            order_id = %entry.id,
            timeout_ms = run.request.timeout.as_millis() as u64,
            polls = run.polls,
            "Entry not filled before timeout; canceling"
        );

        match self.gateway.cancel_order(&entry).await {
            Ok(()) => {
                info!(order_id = %entry.id, "Entry canceled");
                run.last_status = OrderStatus::Canceled;
                run.advance(BracketState::Aborted);
                Ok(run.outcome(entry, FillSummary::empty(), None, None))
            }
            Err(GatewayError::AlreadyFilled(_)) => {
                warn!(order_id = %entry.id, "Entry filled while canceling; placing bracket");
                run.last_status = OrderStatus::Closed;
                self.place_bracket(run, entry).await
            }
            Err(source) => {
                error!(
                    order_id = %entry.id,
                    stage = %Stage::Cancel,
                    error = %source,
                    "Cancel failed; entry state unknown, reconcile with the venue"
                );
                Err(BracketError::EntryStateUnknown { entry, source })
            }
        }
    }

    /// Tally the entry's fees, then place both protective legs.
    async fn place_bracket(
        &self,
        mut run: Run<'_>,
        entry: OrderHandle,
    ) -> Result<BracketOutcome, BracketError> {
        run.advance(BracketState::EntryFilled);

        let fill = match self.gateway.fetch_order_trades(&entry).await {
            Ok(trades) => Accountant::tally(&entry, &trades),
            Err(e) => {
                error!(order_id = %entry.id, error = %e, "Trade history unavailable; fee unknown");
                run.trade_history_available = false;
                FillSummary::empty()
            }
        };
        info!(
            order_id = %entry.id,
            fee = %fill.fee,
            filled = %fill.filled_quantity,
            "Entry filled"
        );

        let request = run.request;
        let take_profit = self.place_leg(Leg::TakeProfit, &request.take_profit_order()).await;
        let stop_loss = self.place_leg(Leg::StopLoss, &request.stop_loss_order()).await;

        let (failed_leg, source, take_profit, stop_loss) = match (take_profit, stop_loss) {
            (Ok(tp), Ok(sl)) => {
                run.advance(BracketState::BracketPlaced);
                return Ok(run.outcome(entry, fill, Some(tp), Some(sl)));
            }
            (Err(e), sl) => (Leg::TakeProfit, e, None, sl.ok()),
            (Ok(tp), Err(e)) => (Leg::StopLoss, e, Some(tp), None),
        };

        error!(
            order_id = %entry.id,
            pair = %entry.pair,
            failed_leg = %failed_leg,
            "UNPROTECTED POSITION: entry filled without a full bracket"
        );
        Err(BracketError::UnprotectedPosition {
            entry,
            failed_leg,
            take_profit,
            stop_loss,
            fee: fill.fee,
            source,
        })
    }

    async fn place_leg(&self, leg: Leg, order: &OrderRequest) -> Result<OrderHandle, GatewayError> {
        match self.gateway.place_order(order).await {
            Ok(handle) => {
                info!(leg = %leg, order_id = %handle.id, order = %order, "Bracket leg placed");
                Ok(handle)
            }
            Err(e) => {
                error!(leg = %leg, order = %order, stage = %Stage::LegPlacement, error = %e, "Bracket leg failed");
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
