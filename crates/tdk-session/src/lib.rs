//! Brokerage session management.
//!
//! [`SessionManager`] owns the connection lifecycle, order submission and
//! bookkeeping, account queries, and the single pump task that applies
//! gateway-pushed events (order status, executions, news ticks) to session
//! state, the trade ledger, and the event bus.
//!
//! # Concurrency
//!
//! `SessionManager` is a cheap clone over shared inner state. Session state
//! lives behind one async lock and is mutated only through methods on this
//! type, from whichever task calls them. The pump is the sole consumer of
//! the gateway push stream, which preserves per-order event ordering as the
//! gateway produced it. Read operations degrade to cached data while
//! disconnected; write operations fail explicitly with
//! [`OrderError::NotConnected`].

mod demo;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tdk_gateway::{
    BrokerGateway, ConnectionError, DataSourceError, Endpoint, GatewayEvent, LegSpec, LiveTick,
    OrderError, PortfolioItem, WireOrderKind,
};
use tdk_ledger::TradeLedger;
use tdk_schemas::{
    ConnectionState, Fill, NewsHeadline, OrderId, OrderKind, OrderRecord, OrderRequest,
    OrderStatus, OrderValidationError, PortfolioPosition, PortfolioSnapshot, TerminalEvent,
    TradeRecord,
};

pub use demo::demo_portfolio_snapshot;

/// Most headlines retained in the session buffer.
const NEWS_BUFFER_CAP: usize = 200;

/// Session tunables.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on the connect handshake.
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Default)]
struct SessionState {
    next_order_id: OrderId,
    orders: BTreeMap<OrderId, OrderRecord>,
    last_snapshot: Option<PortfolioSnapshot>,
    news: VecDeque<NewsHeadline>,
}

struct SessionInner {
    gateway: Arc<dyn BrokerGateway>,
    ledger: Arc<StdMutex<TradeLedger>>,
    bus: broadcast::Sender<TerminalEvent>,
    config: SessionConfig,
    /// Mirrored separately from `state` so the data cascade can consult
    /// connection status without an await point.
    connection: std::sync::RwLock<ConnectionState>,
    state: RwLock<SessionState>,
    pump: StdMutex<Option<JoinHandle<()>>>,
}

/// Owner of the brokerage session. Clone freely; all clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        ledger: Arc<StdMutex<TradeLedger>>,
        bus: broadcast::Sender<TerminalEvent>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                gateway,
                ledger,
                bus,
                config,
                connection: std::sync::RwLock::new(ConnectionState::Disconnected),
                state: RwLock::new(SessionState {
                    next_order_id: 1,
                    ..SessionState::default()
                }),
                pump: StdMutex::new(None),
            }),
        }
    }

    /// Subscribe to the engine event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<TerminalEvent> {
        self.inner.bus.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Establish the session. Idempotent: any prior live connection is torn
    /// down first. Bounded by [`SessionConfig::connect_timeout`].
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<(), ConnectionError> {
        let inner = &self.inner;
        if inner.is_connected() {
            debug!("connect requested while connected; recycling session");
            self.disconnect().await;
        }

        inner.set_connection(ConnectionState::Connecting);
        info!(%endpoint, gateway = inner.gateway.name(), "connecting to brokerage gateway");

        let ack = match tokio::time::timeout(
            inner.config.connect_timeout,
            inner.gateway.connect(endpoint),
        )
        .await
        {
            Err(_elapsed) => {
                inner.set_connection(ConnectionState::Disconnected);
                warn!(%endpoint, timeout = ?inner.config.connect_timeout, "connect timed out");
                return Err(ConnectionError::Timeout(inner.config.connect_timeout));
            }
            Ok(Err(err)) => {
                inner.set_connection(ConnectionState::Disconnected);
                warn!(%endpoint, error = %err, "gateway refused connection");
                return Err(err);
            }
            Ok(Ok(ack)) => ack,
        };

        {
            let mut st = inner.state.write().await;
            st.next_order_id = ack.next_order_id.max(1);
        }
        self.start_pump();
        inner.set_connection(ConnectionState::Connected);
        info!(%endpoint, next_order_id = ack.next_order_id, "session connected");
        Ok(())
    }

    /// Tear the session down. Best-effort: always leaves the session
    /// disconnected. In-memory order records are cleared and the order-id
    /// allocator reset; the trade ledger is untouched.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.gateway.disconnect().await;
        if let Some(pump) = inner.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            pump.abort();
        }
        {
            let mut st = inner.state.write().await;
            st.orders.clear();
            st.next_order_id = 1;
        }
        inner.set_connection(ConnectionState::Disconnected);
        info!("session disconnected");
    }

    fn start_pump(&self) {
        let rx = self.inner.gateway.subscribe();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            pump_events(inner, rx).await;
        });
        if let Some(old) = self
            .inner
            .pump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle)
        {
            old.abort();
        }
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Validate and submit a simple order. Brackets must go through the
    /// order coordinator, which decomposes them into legs.
    pub async fn place_order(&self, req: &OrderRequest) -> Result<OrderId, OrderError> {
        req.validate()?;
        let kind = match req.kind {
            OrderKind::Market => WireOrderKind::Market,
            OrderKind::Limit => WireOrderKind::Limit,
            OrderKind::Stop => WireOrderKind::Stop,
            OrderKind::Bracket { .. } => {
                return Err(OrderValidationError::UndecomposedBracket.into());
            }
        };
        let leg = LegSpec {
            side: req.side,
            quantity: req.quantity,
            kind,
            limit_price: req.limit_price,
            stop_price: req.stop_price,
            time_in_force: req.time_in_force,
            parent_id: None,
            transmit: true,
        };
        self.submit_leg(&req.symbol, leg).await
    }

    /// Submit one order leg, allocating the next session-unique order id.
    ///
    /// This is the shared path for simple orders and bracket legs: checks
    /// connectivity, qualifies the instrument, submits, and records an
    /// [`OrderRecord`] in `Submitted`. A leg carrying `parent_id` is linked
    /// into its parent's `legs` list.
    pub async fn submit_leg(&self, symbol: &str, leg: LegSpec) -> Result<OrderId, OrderError> {
        let inner = &self.inner;
        if !inner.is_connected() {
            return Err(OrderError::NotConnected);
        }

        let instrument = inner.gateway.qualify(symbol).await?;

        let order_id = {
            let mut st = inner.state.write().await;
            let id = st.next_order_id;
            st.next_order_id += 1;
            id
        };

        let record = OrderRecord {
            order_id,
            request: leg_request(symbol, &leg),
            status: OrderStatus::Submitted,
            parent_id: leg.parent_id,
            legs: Vec::new(),
        };
        let order = leg.into_gateway_order(order_id);

        // Record before submitting: the gateway may push a status event for
        // this id before place_order returns.
        {
            let mut st = inner.state.write().await;
            if let Some(parent_id) = record.parent_id {
                if let Some(parent) = st.orders.get_mut(&parent_id) {
                    parent.legs.push(order_id);
                } else {
                    warn!(order_id, parent_id, "leg references unknown parent order");
                }
            }
            st.orders.insert(order_id, record);
        }

        if let Err(err) = inner.gateway.place_order(&instrument, &order).await {
            let mut st = inner.state.write().await;
            st.orders.remove(&order_id);
            if let Some(parent_id) = order.parent_id {
                if let Some(parent) = st.orders.get_mut(&parent_id) {
                    parent.legs.retain(|id| *id != order_id);
                }
            }
            return Err(err);
        }

        info!(
            order_id,
            symbol,
            side = order.side.as_str(),
            quantity = order.quantity,
            kind = order.kind.as_str(),
            transmit = order.transmit,
            "order submitted"
        );
        inner.emit(TerminalEvent::OrderStatusChanged {
            order_id,
            status: OrderStatus::Submitted,
        });
        Ok(order_id)
    }

    /// Request cancellation of all open orders. Fire-and-forget; final
    /// statuses arrive on the push stream.
    pub async fn cancel_all(&self) -> Result<(), OrderError> {
        if !self.inner.is_connected() {
            return Err(OrderError::NotConnected);
        }
        self.inner.gateway.cancel_all().await?;
        info!("requested cancellation of all open orders");
        Ok(())
    }

    /// One order record, terminal or not.
    pub async fn order(&self, order_id: OrderId) -> Option<OrderRecord> {
        self.inner.state.read().await.orders.get(&order_id).cloned()
    }

    /// Non-terminal order records in id order.
    pub async fn open_orders(&self) -> Vec<OrderRecord> {
        self.inner
            .state
            .read()
            .await
            .orders
            .values()
            .filter(|rec| !rec.status.is_terminal())
            .cloned()
            .collect()
    }

    /// Executions reported by the gateway this session; empty while
    /// disconnected or when the query fails.
    pub async fn recent_executions(&self) -> Vec<Fill> {
        if !self.inner.is_connected() {
            return Vec::new();
        }
        match self.inner.gateway.executions().await {
            Ok(fills) => fills,
            Err(err) => {
                warn!(error = %err, "executions query failed");
                Vec::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Account / portfolio
    // -----------------------------------------------------------------------

    /// Portfolio snapshot. Never fails: while disconnected (or when the
    /// live query breaks) this degrades to the last cached snapshot, or to
    /// the canned demo book on a cold start.
    pub async fn account_snapshot(&self) -> PortfolioSnapshot {
        let inner = &self.inner;
        if !inner.is_connected() {
            return inner.cached_or_demo().await;
        }

        let summary = match inner.gateway.account_summary().await {
            Ok(summary) => summary,
            Err(err) => {
                warn!(error = %err, "account summary query failed; serving cached snapshot");
                return inner.cached_or_demo().await;
            }
        };
        let items = match inner.gateway.portfolio().await {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "portfolio query failed; serving cached snapshot");
                return inner.cached_or_demo().await;
            }
        };

        let snapshot = aggregate_snapshot(summary, items);
        inner.state.write().await.last_snapshot = Some(snapshot.clone());
        snapshot
    }

    // -----------------------------------------------------------------------
    // News
    // -----------------------------------------------------------------------

    /// Buffered headlines, newest first. `filter` keeps headlines whose
    /// text mentions the given symbol (case-insensitive).
    pub async fn recent_headlines(&self, filter: Option<&str>) -> Vec<NewsHeadline> {
        let st = self.inner.state.read().await;
        let needle = filter.map(|s| s.to_uppercase());
        st.news
            .iter()
            .rev()
            .filter(|h| match &needle {
                Some(sym) => h.headline.to_uppercase().contains(sym),
                None => true,
            })
            .cloned()
            .collect()
    }
}

impl SessionInner {
    fn connection_state(&self) -> ConnectionState {
        *self.connection.read().unwrap_or_else(|e| e.into_inner())
    }

    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    fn set_connection(&self, state: ConnectionState) {
        *self.connection.write().unwrap_or_else(|e| e.into_inner()) = state;
        self.emit(TerminalEvent::Connection { state });
    }

    fn emit(&self, event: TerminalEvent) {
        // Nobody listening is fine.
        let _ = self.bus.send(event);
    }

    async fn cached_or_demo(&self) -> PortfolioSnapshot {
        self.state
            .read()
            .await
            .last_snapshot
            .clone()
            .unwrap_or_else(demo_portfolio_snapshot)
    }

    /// Apply one gateway push to session state, the ledger, and the bus.
    async fn apply_gateway_event(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::OrderStatus { order_id, status } => {
                {
                    let mut st = self.state.write().await;
                    match st.orders.get_mut(&order_id) {
                        None => {
                            warn!(order_id, ?status, "status for unknown order id; ignored");
                            return;
                        }
                        Some(rec) if rec.status.is_terminal() => {
                            debug!(order_id, ?status, "status after terminal state; ignored");
                            return;
                        }
                        Some(rec) => rec.status = status,
                    }
                }
                self.emit(TerminalEvent::OrderStatusChanged { order_id, status });
            }

            GatewayEvent::Execution(fill) => {
                let origin = {
                    let st = self.state.read().await;
                    st.orders
                        .get(&fill.order_id)
                        .map(|rec| (rec.request.symbol.clone(), rec.request.side))
                };
                let Some((symbol, side)) = origin else {
                    warn!(order_id = fill.order_id, "execution for unknown order id; ignored");
                    return;
                };

                info!(
                    order_id = fill.order_id,
                    symbol = %symbol,
                    shares = fill.quantity,
                    price = fill.price,
                    "execution received"
                );
                let record = TradeRecord::from_fill(&fill, symbol, side);
                {
                    let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
                    if let Err(err) = ledger.append(record.clone()) {
                        error!(error = %err, "trade ledger append failed");
                    }
                }
                self.emit(TerminalEvent::Trade(record));
            }

            GatewayEvent::News(headline) => {
                {
                    let mut st = self.state.write().await;
                    st.news.push_back(headline.clone());
                    while st.news.len() > NEWS_BUFFER_CAP {
                        st.news.pop_front();
                    }
                }
                self.emit(TerminalEvent::News(headline));
            }
        }
    }
}

/// The live-feed face the data cascade consumes: connection status without
/// an await point, quotes straight off the gateway.
#[async_trait::async_trait]
impl tdk_md::LiveFeed for SessionManager {
    fn is_connected(&self) -> bool {
        SessionManager::is_connected(self)
    }

    async fn last_trade(&self, symbol: &str) -> Result<LiveTick, DataSourceError> {
        if !self.is_connected() {
            return Err(DataSourceError::Transport("session disconnected".into()));
        }
        self.inner.gateway.last_trade(symbol).await
    }
}

async fn pump_events(inner: Arc<SessionInner>, mut rx: broadcast::Receiver<GatewayEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => inner.apply_gateway_event(event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "gateway event stream lagged; events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Reconstruct the per-leg request recorded alongside a submission.
fn leg_request(symbol: &str, leg: &LegSpec) -> OrderRequest {
    let kind = match leg.kind {
        WireOrderKind::Market => OrderKind::Market,
        WireOrderKind::Limit => OrderKind::Limit,
        WireOrderKind::Stop => OrderKind::Stop,
    };
    OrderRequest {
        symbol: symbol.to_string(),
        side: leg.side,
        quantity: leg.quantity,
        kind,
        limit_price: leg.limit_price,
        stop_price: leg.stop_price,
        time_in_force: leg.time_in_force,
    }
}

/// Fold gateway account/portfolio answers into one snapshot.
fn aggregate_snapshot(
    summary: BTreeMap<String, f64>,
    items: Vec<PortfolioItem>,
) -> PortfolioSnapshot {
    let tag = |name: &str| summary.get(name).copied().unwrap_or(0.0);

    let positions = items
        .into_iter()
        .filter(|item| item.position != 0)
        .map(|item| PortfolioPosition {
            symbol: item.symbol,
            quantity: item.position,
            avg_cost: item.average_cost,
            current_price: item.market_price,
            market_value: item.market_value,
            pnl: item.unrealized_pnl,
            pnl_pct: pnl_percent(item.unrealized_pnl, item.market_value),
        })
        .collect();

    PortfolioSnapshot {
        total_value: tag("NetLiquidation"),
        day_change: 0.0,
        day_change_pct: 0.0,
        cash_balance: tag("TotalCashValue"),
        buying_power: tag("BuyingPower"),
        positions,
        account_summary: summary,
    }
}

/// Unrealized P&L percentage as the terminal has always computed it:
/// `pnl / |market_value - pnl| * 100`, 0 when the denominator is 0.
pub fn pnl_percent(pnl: f64, market_value: f64) -> f64 {
    let basis = (market_value - pnl).abs();
    if basis == 0.0 {
        0.0
    } else {
        pnl / basis * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pnl_percent_guards_zero_denominator() {
        assert_eq!(pnl_percent(100.0, 100.0), 0.0);
        assert_eq!(pnl_percent(0.0, 0.0), 0.0);
    }

    #[test]
    fn pnl_percent_matches_long_position_math() {
        // bought at 15_000, now worth 17_543: pnl 2_543 over a 15_000 basis
        let pct = pnl_percent(2_543.0, 17_543.0);
        assert!((pct - 16.953_333).abs() < 1e-3, "{pct}");
    }

    #[test]
    fn pnl_percent_short_position_uses_absolute_basis() {
        // short 30 @ 485 now 475.20: market value -14_256, pnl +294
        let pct = pnl_percent(294.0, -14_256.0);
        assert!((pct - 2.02).abs() < 0.01, "{pct}");
    }

    #[test]
    fn aggregate_snapshot_skips_flat_lines_and_reads_tags() {
        let summary: BTreeMap<String, f64> = [
            ("NetLiquidation".to_string(), 50_000.0),
            ("TotalCashValue".to_string(), 20_000.0),
            ("BuyingPower".to_string(), 80_000.0),
        ]
        .into_iter()
        .collect();
        let items = vec![
            PortfolioItem {
                symbol: "AAPL".into(),
                position: 10,
                market_price: 175.0,
                market_value: 1_750.0,
                average_cost: 150.0,
                unrealized_pnl: 250.0,
            },
            PortfolioItem {
                symbol: "FLAT".into(),
                position: 0,
                market_price: 10.0,
                market_value: 0.0,
                average_cost: 10.0,
                unrealized_pnl: 0.0,
            },
        ];
        let snap = aggregate_snapshot(summary, items);
        assert_eq!(snap.total_value, 50_000.0);
        assert_eq!(snap.cash_balance, 20_000.0);
        assert_eq!(snap.buying_power, 80_000.0);
        assert_eq!(snap.positions.len(), 1);
        assert_eq!(snap.positions[0].symbol, "AAPL");
    }

    #[test]
    fn leg_request_round_trips_wire_kind() {
        let leg = LegSpec {
            side: tdk_schemas::Side::Sell,
            quantity: 10,
            kind: WireOrderKind::Stop,
            limit_price: None,
            stop_price: Some(95.0),
            time_in_force: tdk_schemas::TimeInForce::Day,
            parent_id: Some(1),
            transmit: true,
        };
        let req = leg_request("SPY", &leg);
        assert_eq!(req.kind, OrderKind::Stop);
        assert_eq!(req.stop_price, Some(95.0));
        assert_eq!(req.symbol, "SPY");
    }
}
