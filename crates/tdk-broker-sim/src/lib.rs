//! In-memory "sim" brokerage gateway for demo mode and tests.
//!
//! Design decisions (kept intentionally simple/deterministic):
//! - Orders are accepted immediately; an `Acknowledged` status event is
//!   pushed on submission.
//! - Fills are never auto-generated. Tests and the demo driver inject them
//!   with [`SimGateway::apply_fill`], which pushes the execution event and
//!   the resulting status transition.
//! - Books are `BTreeMap`s so listing order is stable.
//! - Connect behavior is scriptable: accept, reject with a reason, or hang
//!   forever (for exercising the session's connect timeout).
//! - An optional acceptance cap rejects every order after the first N —
//!   the hook partial-bracket tests use to fail a specific leg.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use tdk_gateway::{
    BrokerGateway, ConnectAck, ConnectionError, DataSourceError, Endpoint, GatewayEvent,
    GatewayOrder, Instrument, LiveTick, OrderError, PortfolioItem,
};
use tdk_schemas::{Fill, NewsHeadline, OrderId, OrderStatus, Side};

/// How a connect attempt behaves.
#[derive(Debug, Clone, Default)]
pub enum ConnectBehavior {
    #[default]
    Accept,
    Reject(String),
    /// Never answers; the session's timeout fires.
    Hang,
}

/// Construction-time knobs.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub connect: ConnectBehavior,
    /// Seed for the session's order-id allocator, reported on connect.
    pub next_order_id: OrderId,
    /// When `Some`, only these symbols qualify.
    pub known_symbols: Option<BTreeSet<String>>,
    /// When `Some(n)`, every order after the first `n` is rejected.
    pub accept_limit: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            connect: ConnectBehavior::Accept,
            next_order_id: 1,
            known_symbols: None,
            accept_limit: None,
        }
    }
}

#[derive(Debug)]
struct SimOrder {
    symbol: String,
    order: GatewayOrder,
    status: OrderStatus,
    filled: i64,
}

#[derive(Default)]
struct SimState {
    connected: bool,
    orders: BTreeMap<OrderId, SimOrder>,
    executions: Vec<Fill>,
    account: BTreeMap<String, f64>,
    portfolio: Vec<PortfolioItem>,
    last_trades: BTreeMap<String, LiveTick>,
    accepted: u64,
}

/// Deterministic in-memory gateway.
pub struct SimGateway {
    config: SimConfig,
    state: Mutex<SimState>,
    events: broadcast::Sender<GatewayEvent>,
}

impl SimGateway {
    pub fn new(config: SimConfig) -> Self {
        let (events, _rx) = broadcast::channel(1024);
        Self {
            config,
            state: Mutex::new(SimState::default()),
            events,
        }
    }

    /// A gateway that accepts everything — the common test fixture.
    pub fn accepting() -> Self {
        Self::new(SimConfig::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: GatewayEvent) {
        // No subscribers is fine — the send result only signals that.
        let _ = self.events.send(event);
    }

    // -- scripting surface (demo driver and tests) --------------------------

    /// Seed the live-feed answer for a symbol.
    pub fn set_last_trade(&self, tick: LiveTick) {
        self.lock().last_trades.insert(tick.symbol.clone(), tick);
    }

    /// Seed one account-summary tag.
    pub fn set_account_tag(&self, tag: impl Into<String>, value: f64) {
        self.lock().account.insert(tag.into(), value);
    }

    /// Seed the portfolio book.
    pub fn set_portfolio(&self, items: Vec<PortfolioItem>) {
        self.lock().portfolio = items;
    }

    /// Inject an execution for an accepted order. Pushes the execution
    /// event and the implied status transition (`PartiallyFilled` until the
    /// order quantity is covered, then `Filled`).
    ///
    /// Returns `None` when the order id is unknown.
    pub fn apply_fill(&self, order_id: OrderId, quantity: i64, price: f64, commission: f64) -> Option<Fill> {
        let (fill, status) = {
            let mut st = self.lock();
            let sim = st.orders.get_mut(&order_id)?;
            let signed = match sim.order.side {
                Side::Buy => quantity.abs(),
                Side::Sell => -quantity.abs(),
            };
            sim.filled += signed.abs();
            sim.status = if sim.filled >= sim.order.quantity {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            let status = sim.status;
            let fill = Fill {
                order_id,
                exec_id: Uuid::new_v4().to_string(),
                quantity: signed,
                price,
                commission,
                executed_at: Utc::now(),
            };
            st.executions.push(fill.clone());
            (fill, status)
        };

        self.emit(GatewayEvent::Execution(fill.clone()));
        self.emit(GatewayEvent::OrderStatus { order_id, status });
        Some(fill)
    }

    /// Push a news tick.
    pub fn push_news(&self, headline: NewsHeadline) {
        self.emit(GatewayEvent::News(headline));
    }

    /// Push a raw order-status event, including for ids this gateway never
    /// issued — used to exercise unknown-order handling downstream.
    pub fn push_order_status(&self, order_id: OrderId, status: OrderStatus) {
        self.emit(GatewayEvent::OrderStatus { order_id, status });
    }

    /// Orders as submitted, in id order.
    pub fn submitted_orders(&self) -> Vec<GatewayOrder> {
        self.lock().orders.values().map(|o| o.order.clone()).collect()
    }

    /// Current sim-side status of one order.
    pub fn order_status(&self, order_id: OrderId) -> Option<OrderStatus> {
        self.lock().orders.get(&order_id).map(|o| o.status)
    }

    /// Symbol an order was submitted against.
    pub fn order_symbol(&self, order_id: OrderId) -> Option<String> {
        self.lock().orders.get(&order_id).map(|o| o.symbol.clone())
    }
}

#[async_trait]
impl BrokerGateway for SimGateway {
    fn name(&self) -> &'static str {
        "sim"
    }

    async fn connect(&self, endpoint: &Endpoint) -> Result<ConnectAck, ConnectionError> {
        match &self.config.connect {
            ConnectBehavior::Accept => {
                debug!(%endpoint, "sim gateway accepting connection");
                self.lock().connected = true;
                Ok(ConnectAck {
                    next_order_id: self.config.next_order_id,
                })
            }
            ConnectBehavior::Reject(reason) => Err(ConnectionError::Rejected(reason.clone())),
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }

    async fn disconnect(&self) {
        self.lock().connected = false;
    }

    async fn qualify(&self, symbol: &str) -> Result<Instrument, OrderError> {
        let st = self.lock();
        if !st.connected {
            return Err(OrderError::GatewayRejected("not connected".into()));
        }
        if let Some(known) = &self.config.known_symbols {
            if !known.contains(symbol) {
                return Err(OrderError::ContractUnresolved {
                    symbol: symbol.to_string(),
                });
            }
        }
        Ok(Instrument {
            symbol: symbol.to_string(),
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            contract_id: symbol.bytes().fold(0i64, |acc, b| acc * 31 + i64::from(b)),
        })
    }

    async fn place_order(
        &self,
        instrument: &Instrument,
        order: &GatewayOrder,
    ) -> Result<(), OrderError> {
        {
            let mut st = self.lock();
            if !st.connected {
                return Err(OrderError::GatewayRejected("not connected".into()));
            }
            if let Some(limit) = self.config.accept_limit {
                if st.accepted >= limit {
                    return Err(OrderError::GatewayRejected(
                        "order capacity exhausted".into(),
                    ));
                }
            }
            st.accepted += 1;
            st.orders.insert(
                order.order_id,
                SimOrder {
                    symbol: instrument.symbol.clone(),
                    order: order.clone(),
                    status: OrderStatus::Acknowledged,
                    filled: 0,
                },
            );
        }
        self.emit(GatewayEvent::OrderStatus {
            order_id: order.order_id,
            status: OrderStatus::Acknowledged,
        });
        Ok(())
    }

    async fn cancel_all(&self) -> Result<(), OrderError> {
        let cancelled: Vec<OrderId> = {
            let mut st = self.lock();
            if !st.connected {
                return Err(OrderError::GatewayRejected("not connected".into()));
            }
            let mut ids = Vec::new();
            for (id, sim) in st.orders.iter_mut() {
                if !sim.status.is_terminal() {
                    sim.status = OrderStatus::Cancelled;
                    ids.push(*id);
                }
            }
            ids
        };
        for order_id in cancelled {
            self.emit(GatewayEvent::OrderStatus {
                order_id,
                status: OrderStatus::Cancelled,
            });
        }
        Ok(())
    }

    async fn account_summary(&self) -> Result<BTreeMap<String, f64>, DataSourceError> {
        let st = self.lock();
        if !st.connected {
            return Err(DataSourceError::Transport("not connected".into()));
        }
        Ok(st.account.clone())
    }

    async fn portfolio(&self) -> Result<Vec<PortfolioItem>, DataSourceError> {
        let st = self.lock();
        if !st.connected {
            return Err(DataSourceError::Transport("not connected".into()));
        }
        Ok(st.portfolio.clone())
    }

    async fn executions(&self) -> Result<Vec<Fill>, DataSourceError> {
        let st = self.lock();
        if !st.connected {
            return Err(DataSourceError::Transport("not connected".into()));
        }
        Ok(st.executions.clone())
    }

    async fn last_trade(&self, symbol: &str) -> Result<LiveTick, DataSourceError> {
        let st = self.lock();
        if !st.connected {
            return Err(DataSourceError::Transport("not connected".into()));
        }
        st.last_trades
            .get(symbol)
            .cloned()
            .ok_or(DataSourceError::Empty("sim"))
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdk_schemas::TimeInForce;
    use tdk_gateway::WireOrderKind;

    fn endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1", 7496, 1)
    }

    fn order(order_id: OrderId, side: Side, quantity: i64) -> GatewayOrder {
        GatewayOrder {
            order_id,
            side,
            quantity,
            kind: WireOrderKind::Market,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            parent_id: None,
            transmit: true,
        }
    }

    #[tokio::test]
    async fn connect_accept_reports_seed_id() {
        let gw = SimGateway::new(SimConfig {
            next_order_id: 41,
            ..SimConfig::default()
        });
        let ack = gw.connect(&endpoint()).await.unwrap();
        assert_eq!(ack.next_order_id, 41);
    }

    #[tokio::test]
    async fn connect_reject_surfaces_reason() {
        let gw = SimGateway::new(SimConfig {
            connect: ConnectBehavior::Reject("client id in use".into()),
            ..SimConfig::default()
        });
        let err = gw.connect(&endpoint()).await.unwrap_err();
        assert_eq!(err, ConnectionError::Rejected("client id in use".into()));
    }

    #[tokio::test]
    async fn unknown_symbol_fails_qualification() {
        let gw = SimGateway::new(SimConfig {
            known_symbols: Some(["AAPL".to_string()].into_iter().collect()),
            ..SimConfig::default()
        });
        gw.connect(&endpoint()).await.unwrap();
        assert!(gw.qualify("AAPL").await.is_ok());
        assert!(matches!(
            gw.qualify("NOPE").await.unwrap_err(),
            OrderError::ContractUnresolved { .. }
        ));
    }

    #[tokio::test]
    async fn place_order_emits_acknowledged() {
        let gw = SimGateway::accepting();
        gw.connect(&endpoint()).await.unwrap();
        let mut rx = gw.subscribe();

        let instrument = gw.qualify("AAPL").await.unwrap();
        gw.place_order(&instrument, &order(1, Side::Buy, 100))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            GatewayEvent::OrderStatus { order_id, status } => {
                assert_eq!(order_id, 1);
                assert_eq!(status, OrderStatus::Acknowledged);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn apply_fill_pushes_execution_then_status() {
        let gw = SimGateway::accepting();
        gw.connect(&endpoint()).await.unwrap();
        let instrument = gw.qualify("AAPL").await.unwrap();
        gw.place_order(&instrument, &order(1, Side::Buy, 100))
            .await
            .unwrap();

        let mut rx = gw.subscribe();
        let fill = gw.apply_fill(1, 100, 175.5, 1.0).unwrap();
        assert_eq!(fill.quantity, 100);

        assert!(matches!(rx.recv().await.unwrap(), GatewayEvent::Execution(f) if f.order_id == 1));
        assert!(matches!(
            rx.recv().await.unwrap(),
            GatewayEvent::OrderStatus { order_id: 1, status: OrderStatus::Filled }
        ));
        assert_eq!(gw.order_status(1), Some(OrderStatus::Filled));
    }

    #[tokio::test]
    async fn partial_fill_keeps_order_live() {
        let gw = SimGateway::accepting();
        gw.connect(&endpoint()).await.unwrap();
        let instrument = gw.qualify("TSLA").await.unwrap();
        gw.place_order(&instrument, &order(2, Side::Sell, 100))
            .await
            .unwrap();

        let fill = gw.apply_fill(2, 40, 250.0, 1.0).unwrap();
        assert_eq!(fill.quantity, -40, "sell fills carry negative shares");
        assert_eq!(gw.order_status(2), Some(OrderStatus::PartiallyFilled));
    }

    #[tokio::test]
    async fn accept_limit_rejects_overflow() {
        let gw = SimGateway::new(SimConfig {
            accept_limit: Some(1),
            ..SimConfig::default()
        });
        gw.connect(&endpoint()).await.unwrap();
        let instrument = gw.qualify("SPY").await.unwrap();
        gw.place_order(&instrument, &order(1, Side::Buy, 10))
            .await
            .unwrap();
        assert!(matches!(
            gw.place_order(&instrument, &order(2, Side::Buy, 10))
                .await
                .unwrap_err(),
            OrderError::GatewayRejected(_)
        ));
    }

    #[tokio::test]
    async fn cancel_all_cancels_live_orders_only() {
        let gw = SimGateway::accepting();
        gw.connect(&endpoint()).await.unwrap();
        let instrument = gw.qualify("SPY").await.unwrap();
        gw.place_order(&instrument, &order(1, Side::Buy, 10))
            .await
            .unwrap();
        gw.place_order(&instrument, &order(2, Side::Buy, 20))
            .await
            .unwrap();
        gw.apply_fill(1, 10, 450.0, 1.0).unwrap();

        gw.cancel_all().await.unwrap();
        assert_eq!(gw.order_status(1), Some(OrderStatus::Filled));
        assert_eq!(gw.order_status(2), Some(OrderStatus::Cancelled));
    }

    #[tokio::test]
    async fn queries_fail_when_disconnected() {
        let gw = SimGateway::accepting();
        assert!(gw.account_summary().await.is_err());
        assert!(gw.portfolio().await.is_err());
        assert!(gw.executions().await.is_err());
        assert!(gw.last_trade("AAPL").await.is_err());
    }
}
