//! Scenario: bracket orders are composed as one linked, transmit-last group.
//!
//! # Invariants under test
//!
//! 1. A successful bracket produces exactly one parent id and two child
//!    ids; both children reference the parent; only the stop-loss leg
//!    carries `transmit = true`.
//! 2. Child legs trade the opposite side of the parent.
//! 3. When a leg is refused, the whole submission reports
//!    `PartialBracketFailure` listing the legs the gateway already
//!    accepted.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::broadcast;

use tdk_broker_sim::{SimConfig, SimGateway};
use tdk_gateway::{BrokerGateway, Endpoint, OrderError, WireOrderKind};
use tdk_ledger::TradeLedger;
use tdk_orders::{OrderCoordinator, OrderTicket};
use tdk_schemas::{OrderRequest, Quote, QuoteSource, Side, TerminalEvent};
use tdk_session::{SessionConfig, SessionManager};

struct Fixture {
    coordinator: OrderCoordinator,
    session: SessionManager,
    sim: Arc<SimGateway>,
    _dir: tempfile::TempDir,
}

fn fixture(sim_config: SimConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let ledger = TradeLedger::open(
        dir.path().join("trade_history.jsonl"),
        dir.path().join("positions_snapshot.json"),
    )
    .unwrap();
    let (bus, _rx) = broadcast::channel::<TerminalEvent>(1024);
    let sim = Arc::new(SimGateway::new(sim_config));
    let session = SessionManager::new(
        Arc::clone(&sim) as Arc<dyn BrokerGateway>,
        Arc::new(StdMutex::new(ledger)),
        bus,
        SessionConfig::default(),
    );
    Fixture {
        coordinator: OrderCoordinator::new(session.clone()),
        session,
        sim,
        _dir: dir,
    }
}

fn quote(symbol: &str, last: f64) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        last,
        bid: last * 0.999,
        ask: last * 1.001,
        volume: 1_000_000,
        change: 0.5,
        percent_change: 0.29,
        source: QuoteSource::Secondary,
        observed_at: Utc::now(),
    }
}

async fn armed_fixture(sim_config: SimConfig, symbol: &str, last: f64) -> Fixture {
    let fx = fixture(sim_config);
    fx.session
        .connect(&Endpoint::new("127.0.0.1", 7496, 1))
        .await
        .unwrap();
    fx.coordinator.select_symbol(symbol).await;
    fx.coordinator.observe_quote(&quote(symbol, last)).await;
    fx
}

// ---------------------------------------------------------------------------
// 1 + 2. Linkage, transmit-last, opposite sides
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bracket_produces_linked_transmit_last_group() {
    let fx = armed_fixture(SimConfig::default(), "AAPL", 175.0).await;

    let req = OrderRequest::bracket("AAPL", Side::Buy, 100, 175.0, 178.5, 171.5);
    let ticket = fx.coordinator.submit(&req).await.unwrap();

    let OrderTicket::Bracket {
        parent,
        take_profit,
        stop_loss,
    } = ticket
    else {
        panic!("expected a bracket ticket");
    };
    assert_ne!(parent, take_profit);
    assert_ne!(parent, stop_loss);
    assert_ne!(take_profit, stop_loss);

    let orders = fx.sim.submitted_orders();
    assert_eq!(orders.len(), 3);

    let parent_order = orders.iter().find(|o| o.order_id == parent).unwrap();
    let tp_order = orders.iter().find(|o| o.order_id == take_profit).unwrap();
    let sl_order = orders.iter().find(|o| o.order_id == stop_loss).unwrap();

    // Parent: entry limit, staged.
    assert_eq!(parent_order.kind, WireOrderKind::Limit);
    assert_eq!(parent_order.limit_price, Some(175.0));
    assert_eq!(parent_order.parent_id, None);
    assert!(!parent_order.transmit);

    // Take-profit: opposite-side limit child, staged.
    assert_eq!(tp_order.kind, WireOrderKind::Limit);
    assert_eq!(tp_order.limit_price, Some(178.5));
    assert_eq!(tp_order.parent_id, Some(parent));
    assert_eq!(tp_order.side, Side::Sell);
    assert!(!tp_order.transmit);

    // Stop-loss: opposite-side stop child, releases the group.
    assert_eq!(sl_order.kind, WireOrderKind::Stop);
    assert_eq!(sl_order.stop_price, Some(171.5));
    assert_eq!(sl_order.parent_id, Some(parent));
    assert_eq!(sl_order.side, Side::Sell);
    assert!(sl_order.transmit, "only the stop-loss leg transmits");

    // All three legs ride the same instrument.
    for id in [parent, take_profit, stop_loss] {
        assert_eq!(fx.sim.order_symbol(id).as_deref(), Some("AAPL"));
    }

    // Session records mirror the linkage.
    let parent_rec = fx.session.order(parent).await.unwrap();
    assert_eq!(parent_rec.legs, vec![take_profit, stop_loss]);
    assert_eq!(
        fx.session.order(take_profit).await.unwrap().parent_id,
        Some(parent)
    );
}

#[tokio::test]
async fn sell_bracket_children_buy() {
    let fx = armed_fixture(SimConfig::default(), "TSLA", 250.0).await;

    let req = OrderRequest::bracket("TSLA", Side::Sell, 50, 250.0, 245.0, 255.0);
    fx.coordinator.submit(&req).await.unwrap();

    let orders = fx.sim.submitted_orders();
    let children: Vec<_> = orders.iter().filter(|o| o.parent_id.is_some()).collect();
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|o| o.side == Side::Buy));
}

// ---------------------------------------------------------------------------
// 3. Partial failure reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn third_leg_failure_reports_accepted_legs() {
    // The sim accepts exactly two orders, so the stop-loss leg is refused.
    let fx = armed_fixture(
        SimConfig {
            accept_limit: Some(2),
            ..SimConfig::default()
        },
        "SPY",
        450.0,
    )
    .await;

    let req = OrderRequest::bracket("SPY", Side::Buy, 10, 450.0, 459.0, 441.0);
    let err = fx.coordinator.submit(&req).await.unwrap_err();

    let OrderError::PartialBracketFailure { accepted, .. } = err else {
        panic!("expected PartialBracketFailure, got {err:?}");
    };
    assert_eq!(accepted.len(), 2, "parent and take-profit were accepted");
    // The accepted legs are live at the gateway — compensation is on us.
    assert_eq!(fx.sim.submitted_orders().len(), 2);
}

#[tokio::test]
async fn first_leg_failure_reports_empty_accepted_list() {
    let fx = armed_fixture(
        SimConfig {
            accept_limit: Some(0),
            ..SimConfig::default()
        },
        "SPY",
        450.0,
    )
    .await;

    let req = OrderRequest::bracket("SPY", Side::Buy, 10, 450.0, 459.0, 441.0);
    let err = fx.coordinator.submit(&req).await.unwrap_err();
    assert!(matches!(
        err,
        OrderError::PartialBracketFailure { ref accepted, .. } if accepted.is_empty()
    ));
}
