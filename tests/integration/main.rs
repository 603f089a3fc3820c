//! End-to-end bracket lifecycle tests through `BracketService`.
//!
//! Time is paused, so five-minute timeouts run instantly.

mod mock_gateway;

use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bracketeer::config::{default_venues, ExecutionConfig};
use bracketeer::engine::executor::BracketService;
use bracketeer::resolver::VenueResolver;
use bracketeer::types::*;

use mock_gateway::{order_id, ScriptedGateway, ScriptedProvider};

fn coinbase_secrets() -> HashMap<String, String> {
    HashMap::from([
        ("COINBASEPRO_API_KEY".to_string(), "key".to_string()),
        ("COINBASEPRO_API_SECRET".to_string(), "secret".to_string()),
        ("COINBASEPRO_API_PASSPHRASE".to_string(), "pass".to_string()),
    ])
}

fn service(gateway: &Arc<ScriptedGateway>) -> BracketService {
    BracketService::new(
        VenueResolver::new(default_venues(), coinbase_secrets()),
        Arc::new(ScriptedProvider(gateway.clone())),
        ExecutionConfig::default(),
    )
}

/// coinbase BTC/USD, entry 30500 / stop 30000, tp 31000, sl 29500,
/// size 0.01, poll 10s, timeout 300s.
fn btc_bracket() -> BracketOrder {
    BracketOrder {
        size: Some(dec!(0.01)),
        poll_interval_ms: Some(10_000),
        timeout_ms: Some(300_000),
        ..BracketOrder::new(
            "coinbase",
            "BTC/USD",
            dec!(30500),
            dec!(30000),
            dec!(31000),
            dec!(29500),
        )
    }
}

// ---------------------------------------------------------------------------
// Fill path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_fill_on_third_poll_places_bracket_with_fee() {
    let gw = Arc::new(ScriptedGateway::new(&[
        OrderStatus::Open,
        OrderStatus::Open,
        OrderStatus::Closed,
    ]));
    gw.add_trade(&order_id(1), "BTC/USD", dec!(0.01), Some((dec!(1.5), "USD")));

    let outcome = service(&gw).execute(&btc_bracket()).await.unwrap();

    assert_eq!(outcome.state, BracketState::BracketPlaced);
    assert_eq!(outcome.entry.id.as_str(), order_id(1));
    assert_eq!(outcome.entry_status, OrderStatus::Closed);
    assert_eq!(outcome.fee.amount, dec!(1.5));
    assert_eq!(outcome.fee.currency, "USD");
    assert_eq!(outcome.polls, 3);
    assert_eq!(outcome.take_profit.as_ref().unwrap().id.as_str(), order_id(2));
    assert_eq!(outcome.stop_loss.as_ref().unwrap().id.as_str(), order_id(3));

    let placed = gw.placed();
    assert_eq!(placed.len(), 3);

    let entry = &placed[0];
    assert_eq!(entry.order_type, OrderType::StopLimit);
    assert_eq!(entry.side, Side::Buy);
    assert_eq!(entry.price, dec!(30500));
    assert_eq!(entry.stop_price, Some(dec!(30000)));

    let tp = &placed[1];
    assert_eq!(tp.order_type, OrderType::Limit);
    assert_eq!(tp.side, Side::Sell);
    assert_eq!(tp.size, dec!(0.01));
    assert_eq!(tp.price, dec!(31000));

    let sl = &placed[2];
    assert_eq!(sl.order_type, OrderType::StopLimit);
    assert_eq!(sl.side, Side::Sell);
    assert_eq!(sl.size, dec!(0.01));
    assert_eq!(sl.price, dec!(29500));
    assert_eq!(sl.stop_price, Some(dec!(29500)));

    assert!(gw.cancels().is_empty());
    assert_eq!(gw.trade_fetches(), vec!["BTC/USD".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_status_is_acted_on_once() {
    // The script keeps answering "closed"; the controller must stop at
    // the first one.
    let gw = Arc::new(ScriptedGateway::new(&[
        OrderStatus::Closed,
        OrderStatus::Closed,
        OrderStatus::Closed,
    ]));

    let outcome = service(&gw).execute(&btc_bracket()).await.unwrap();

    assert!(outcome.is_placed());
    assert_eq!(gw.status_polls(), 1);
    assert_eq!(gw.placed().len(), 3);
    assert!(gw.cancels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fee_tally_ignores_other_orders_and_pairs() {
    let gw = Arc::new(ScriptedGateway::new(&[OrderStatus::Closed]));
    gw.add_trade(&order_id(1), "BTC/USD", dec!(0.004), Some((dec!(0.6), "USD")));
    gw.add_trade("SOMEONE-ELSE", "BTC/USD", dec!(1), Some((dec!(40), "USD")));
    gw.add_trade(&order_id(1), "ETH/USD", dec!(1), Some((dec!(7), "USD")));
    gw.add_trade(&order_id(1), "BTC/USD", dec!(0.006), Some((dec!(0.9), "USD")));

    let outcome = service(&gw).execute(&btc_bracket()).await.unwrap();

    assert_eq!(outcome.fee.amount, dec!(1.5));
    assert_eq!(outcome.fee.currency, "USD");
    assert_eq!(outcome.filled_quantity, dec!(0.010));
}

#[tokio::test(start_paused = true)]
async fn test_fill_without_fee_data_reports_unknown() {
    let gw = Arc::new(ScriptedGateway::new(&[OrderStatus::Closed]));
    gw.add_trade(&order_id(1), "BTC/USD", dec!(0.01), None);

    let outcome = service(&gw).execute(&btc_bracket()).await.unwrap();

    assert!(outcome.is_placed());
    assert!(outcome.fee.is_unknown());
    assert_eq!(outcome.fee.amount, rust_decimal::Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_sell_entry_mirrors_the_bracket() {
    let gw = Arc::new(ScriptedGateway::new(&[OrderStatus::Closed]));
    let order = BracketOrder {
        side: Some(Side::Sell),
        ..BracketOrder::new(
            "coinbase",
            "BTC/USD",
            dec!(30500),
            dec!(31000),
            dec!(29500),
            dec!(31500),
        )
    };

    let outcome = service(&gw).execute(&order).await.unwrap();
    assert!(outcome.is_placed());

    let placed = gw.placed();
    assert_eq!(placed[0].side, Side::Sell);
    assert_eq!(placed[1].side, Side::Buy);
    assert_eq!(placed[1].price, dec!(29500));
    assert_eq!(placed[2].side, Side::Buy);
    assert_eq!(placed[2].stop_price, Some(dec!(31500)));
}

// ---------------------------------------------------------------------------
// Timeout path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_open_for_whole_window_cancels_exactly_once() {
    let gw = Arc::new(ScriptedGateway::never_fills());
    let started = tokio::time::Instant::now();

    let outcome = service(&gw).execute(&btc_bracket()).await.unwrap();

    assert_eq!(outcome.state, BracketState::Aborted);
    assert!(outcome.fee.is_unknown());
    assert_eq!(outcome.fee.amount, rust_decimal::Decimal::ZERO);
    assert!(outcome.take_profit.is_none());
    assert!(outcome.stop_loss.is_none());

    let cancels = gw.cancels();
    assert_eq!(cancels, vec![OrderHandle::new(order_id(1), "BTC/USD")]);
    assert_eq!(gw.placed().len(), 1);
    assert!(gw.trade_fetches().is_empty());

    // One status check per interval, ending at the deadline.
    assert_eq!(gw.status_polls(), 30);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(300));
    assert!(elapsed <= Duration::from_secs(310));
}

#[tokio::test(start_paused = true)]
async fn test_fill_in_cancel_race_still_protects() {
    let gw = Arc::new(ScriptedGateway::never_fills());
    gw.set_cancel_result(Err(GatewayError::AlreadyFilled(order_id(1))));
    gw.add_trade(&order_id(1), "BTC/USD", dec!(0.01), Some((dec!(1.5), "USD")));

    let outcome = service(&gw).execute(&btc_bracket()).await.unwrap();

    assert!(outcome.is_placed());
    assert_eq!(outcome.fee.amount, dec!(1.5));
    assert_eq!(gw.cancels().len(), 1);
    assert_eq!(gw.placed().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_failure_needs_reconciliation() {
    let gw = Arc::new(ScriptedGateway::never_fills());
    gw.set_cancel_result(Err(GatewayError::Transport("connection reset".into())));

    let err = service(&gw).execute(&btc_bracket()).await.unwrap_err();

    match &err {
        BracketError::EntryStateUnknown { entry, .. } => {
            assert_eq!(entry.id.as_str(), order_id(1));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.needs_reconciliation());
    assert!(!err.is_critical());
}

// ---------------------------------------------------------------------------
// Venue-ended and failure paths
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_venue_cancel_aborts_without_cancel_call() {
    let gw = Arc::new(ScriptedGateway::new(&[
        OrderStatus::Open,
        OrderStatus::Canceled,
        OrderStatus::Canceled,
    ]));

    let outcome = service(&gw).execute(&btc_bracket()).await.unwrap();

    assert_eq!(outcome.state, BracketState::Aborted);
    assert_eq!(outcome.entry_status, OrderStatus::Canceled);
    assert_eq!(gw.status_polls(), 2);
    assert!(gw.cancels().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_leg_failure_is_unprotected_position() {
    let gw = Arc::new(ScriptedGateway::new(&[OrderStatus::Closed]));
    gw.fail_placement(
        3,
        GatewayError::Rejected {
            code: "insufficient_funds".into(),
            message: "balance too low".into(),
        },
    );

    let err = service(&gw).execute(&btc_bracket()).await.unwrap_err();

    assert!(err.is_critical());
    match err {
        BracketError::UnprotectedPosition {
            failed_leg,
            take_profit,
            stop_loss,
            ..
        } => {
            assert_eq!(failed_leg, Leg::StopLoss);
            assert_eq!(take_profit.unwrap().id.as_str(), order_id(2));
            assert!(stop_loss.is_none());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_invalid_bracket_makes_no_gateway_calls() {
    let gw = Arc::new(ScriptedGateway::new(&[OrderStatus::Closed]));
    // Buy bracket with take-profit below entry.
    let order = BracketOrder::new(
        "coinbase",
        "BTC/USD",
        dec!(30500),
        dec!(30000),
        dec!(30400),
        dec!(29500),
    );

    let err = service(&gw).execute(&order).await.unwrap_err();

    assert!(matches!(err, BracketError::InvalidRequest(_)));
    assert_eq!(gw.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_configuration_errors_make_no_gateway_calls() {
    let gw = Arc::new(ScriptedGateway::new(&[OrderStatus::Closed]));
    let svc = service(&gw);

    let mut unknown = btc_bracket();
    unknown.venue = "kraken".into();
    assert!(matches!(
        svc.execute(&unknown).await,
        Err(BracketError::UnsupportedVenue(_))
    ));

    let mut no_keys = btc_bracket();
    no_keys.venue = "binance".into();
    match svc.execute(&no_keys).await {
        Err(BracketError::MissingCredentials { venue, missing }) => {
            assert_eq!(venue, "binanceus");
            assert_eq!(missing, "BINANCEUS_API_KEY");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(gw.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_entry_transport_failure_is_unconfirmed() {
    let gw = Arc::new(ScriptedGateway::new(&[OrderStatus::Closed]));
    gw.fail_placement(1, GatewayError::Transport("502 Bad Gateway".into()));

    let err = service(&gw).execute(&btc_bracket()).await.unwrap_err();

    assert!(matches!(err, BracketError::EntryUnconfirmed { .. }));
    assert!(err.needs_reconciliation());
    assert_eq!(gw.status_polls(), 0);
}
