//! Scenario: gateway pushes flow through the pump.
//!
//! # Invariants under test
//!
//! 1. An execution push appends exactly one trade to the ledger (with the
//!    record-derived symbol and side) and broadcasts a `Trade` event.
//! 2. A status push for an unknown order id is logged and ignored — it
//!    neither panics nor corrupts other records.
//! 3. Terminal records are never mutated again.
//! 4. News ticks land in the headline buffer, which caps at 200 and serves
//!    newest-first with symbol filtering.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::sleep;

use tdk_broker_sim::{SimConfig, SimGateway};
use tdk_gateway::{BrokerGateway, Endpoint};
use tdk_ledger::TradeLedger;
use tdk_schemas::{NewsHeadline, OrderRequest, OrderStatus, Side, TerminalEvent};
use tdk_session::{SessionConfig, SessionManager};

struct Fixture {
    session: SessionManager,
    sim: Arc<SimGateway>,
    ledger: Arc<StdMutex<TradeLedger>>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(StdMutex::new(
        TradeLedger::open(
            dir.path().join("trade_history.jsonl"),
            dir.path().join("positions_snapshot.json"),
        )
        .unwrap(),
    ));
    let (bus, _rx) = broadcast::channel::<TerminalEvent>(4096);
    let sim = Arc::new(SimGateway::new(SimConfig::default()));
    let session = SessionManager::new(
        Arc::clone(&sim) as Arc<dyn BrokerGateway>,
        Arc::clone(&ledger),
        bus,
        SessionConfig::default(),
    );
    Fixture {
        session,
        sim,
        ledger,
        _dir: dir,
    }
}

fn endpoint() -> Endpoint {
    Endpoint::new("127.0.0.1", 7496, 1)
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    false
}

fn headline(text: &str, n: usize) -> NewsHeadline {
    NewsHeadline {
        provider: "Sim Wire".to_string(),
        provider_code: "SIM".to_string(),
        article_id: format!("a-{n}"),
        headline: text.to_string(),
        at: Utc::now(),
        received_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// 1. Execution → ledger + Trade event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execution_push_lands_in_ledger_and_on_bus() {
    let fx = fixture();
    fx.session.connect(&endpoint()).await.unwrap();
    let mut bus = fx.session.subscribe();

    let id = fx
        .session
        .place_order(&OrderRequest::market("TSLA", Side::Sell, 50))
        .await
        .unwrap();
    fx.sim.apply_fill(id, 50, 248.50, 1.25).unwrap();

    let ledger = Arc::clone(&fx.ledger);
    let appended = eventually(|| {
        let ledger = Arc::clone(&ledger);
        async move { ledger.lock().unwrap().entries().len() == 1 }
    })
    .await;
    assert!(appended, "execution must be appended to the ledger");

    {
        let ledger = fx.ledger.lock().unwrap();
        let entry = &ledger.entries()[0];
        assert_eq!(entry.symbol, "TSLA");
        assert_eq!(entry.side, Side::Sell);
        assert_eq!(entry.quantity, 50);
        assert_eq!(entry.price, 248.50);
    }

    // A Trade event must have been broadcast alongside.
    let saw_trade = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match bus.recv().await {
                Ok(TerminalEvent::Trade(rec)) => {
                    assert_eq!(rec.symbol, "TSLA");
                    break true;
                }
                Ok(_) => continue,
                Err(_) => break false,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(saw_trade, "Trade event must reach the bus");
}

// ---------------------------------------------------------------------------
// 2. Unknown order id is tolerated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_order_status_is_ignored() {
    let fx = fixture();
    fx.session.connect(&endpoint()).await.unwrap();

    let id = fx
        .session
        .place_order(&OrderRequest::market("AAPL", Side::Buy, 10))
        .await
        .unwrap();

    fx.sim.push_order_status(9_999, OrderStatus::Filled);
    // Give the pump time to (not) do anything with it.
    sleep(Duration::from_millis(50)).await;

    assert!(fx.session.order(9_999).await.is_none());
    // The session stays fully functional.
    assert!(fx.session.order(id).await.is_some());
    assert_eq!(fx.session.open_orders().await.len(), 1);
}

// ---------------------------------------------------------------------------
// 3. Terminal records stay terminal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn terminal_record_is_not_mutated_again() {
    let fx = fixture();
    fx.session.connect(&endpoint()).await.unwrap();

    let id = fx
        .session
        .place_order(&OrderRequest::market("NVDA", Side::Buy, 25))
        .await
        .unwrap();
    fx.sim.apply_fill(id, 25, 432.10, 1.0).unwrap();

    let session = fx.session.clone();
    let filled = eventually(|| {
        let session = session.clone();
        async move {
            matches!(
                session.order(id).await.map(|r| r.status),
                Some(OrderStatus::Filled)
            )
        }
    })
    .await;
    assert!(filled);

    // A stray late status must not resurrect the record.
    fx.sim.push_order_status(id, OrderStatus::Cancelled);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(
        fx.session.order(id).await.unwrap().status,
        OrderStatus::Filled
    );
}

// ---------------------------------------------------------------------------
// 4. News buffer cap and filtering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn news_buffer_caps_and_filters() {
    let fx = fixture();
    fx.session.connect(&endpoint()).await.unwrap();

    for n in 0..205 {
        let text = if n % 2 == 0 {
            format!("AAPL ships something new ({n})")
        } else {
            format!("Broad market wrap ({n})")
        };
        fx.sim.push_news(headline(&text, n));
    }

    let session = fx.session.clone();
    let capped = eventually(|| {
        let session = session.clone();
        async move { session.recent_headlines(None).await.len() == 200 }
    })
    .await;
    assert!(capped, "buffer must cap at 200 headlines");

    let all = fx.session.recent_headlines(None).await;
    // Newest first: the last pushed headline leads.
    assert!(all[0].headline.contains("(204)"), "{}", all[0].headline);

    let aapl = fx.session.recent_headlines(Some("aapl")).await;
    assert!(!aapl.is_empty());
    assert!(aapl.iter().all(|h| h.headline.contains("AAPL")));
}
