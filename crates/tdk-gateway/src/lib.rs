//! Brokerage gateway abstraction.
//!
//! The gateway is opaque transport: this crate defines the seam —
//! [`BrokerGateway`] — and the broker-agnostic request/response types that
//! cross it. Adapters (the in-memory sim, a live vendor adapter) implement
//! the trait; everything above routes through it and never names a vendor.
//!
//! Pushed events (order status, executions, news ticks) arrive on a
//! broadcast channel obtained from [`BrokerGateway::subscribe`]; the session
//! owns the single pump task that drains it, which is what preserves
//! per-order delivery ordering.

pub mod errors;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use tdk_schemas::{Fill, NewsHeadline, OrderId, OrderStatus, Side, TimeInForce};

pub use errors::{ConnectionError, DataSourceError, OrderError};

// ---------------------------------------------------------------------------
// Endpoint / handshake
// ---------------------------------------------------------------------------

/// Where the brokerage gateway listens and who we claim to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, client_id: i32) -> Self {
        Self {
            host: host.into(),
            port,
            client_id,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} (client {})", self.host, self.port, self.client_id)
    }
}

/// Successful connect handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectAck {
    /// The gateway's reported next valid order id; seeds the session's
    /// monotonic allocator. Always positive.
    pub next_order_id: OrderId,
}

// ---------------------------------------------------------------------------
// Instruments and wire orders
// ---------------------------------------------------------------------------

/// A gateway-qualified instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub exchange: String,
    pub currency: String,
    pub contract_id: i64,
}

/// Order kinds that exist on the wire. Brackets do not: the coordinator
/// decomposes them into three [`WireOrderKind::Limit`]/[`WireOrderKind::Stop`]
/// legs before submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireOrderKind {
    Market,
    Limit,
    Stop,
}

impl WireOrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireOrderKind::Market => "MKT",
            WireOrderKind::Limit => "LMT",
            WireOrderKind::Stop => "STP",
        }
    }
}

/// One order leg as the session hands it to the gateway.
///
/// `parent_id`/`transmit` carry bracket linkage: child legs reference their
/// parent, and only the final leg of a group is sent with `transmit = true`,
/// releasing the whole group atomically as seen by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub order_id: OrderId,
    pub side: Side,
    pub quantity: i64,
    pub kind: WireOrderKind,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub parent_id: Option<OrderId>,
    pub transmit: bool,
}

/// Leg shape before an order id is allocated — what callers of the session's
/// leg-level submission API provide.
#[derive(Debug, Clone, PartialEq)]
pub struct LegSpec {
    pub side: Side,
    pub quantity: i64,
    pub kind: WireOrderKind,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub parent_id: Option<OrderId>,
    pub transmit: bool,
}

impl LegSpec {
    /// A plain standalone leg: no parent, transmitted immediately.
    pub fn standalone(side: Side, quantity: i64, kind: WireOrderKind) -> Self {
        Self {
            side,
            quantity,
            kind,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            parent_id: None,
            transmit: true,
        }
    }

    pub fn into_gateway_order(self, order_id: OrderId) -> GatewayOrder {
        GatewayOrder {
            order_id,
            side: self.side,
            quantity: self.quantity,
            kind: self.kind,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            time_in_force: self.time_in_force,
            parent_id: self.parent_id,
            transmit: self.transmit,
        }
    }
}

// ---------------------------------------------------------------------------
// Live feed / account query payloads
// ---------------------------------------------------------------------------

/// Live last-trade observation from the gateway's streaming feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTick {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: i64,
    /// Previous session close, when the feed reports one; used to compute
    /// day change.
    pub prev_close: Option<f64>,
}

/// One portfolio line as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioItem {
    pub symbol: String,
    pub position: i64,
    pub market_price: f64,
    pub market_value: f64,
    pub average_cost: f64,
    pub unrealized_pnl: f64,
}

// ---------------------------------------------------------------------------
// Pushed events
// ---------------------------------------------------------------------------

/// Events the gateway pushes to the session.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    OrderStatus { order_id: OrderId, status: OrderStatus },
    Execution(Fill),
    News(NewsHeadline),
}

// ---------------------------------------------------------------------------
// BrokerGateway
// ---------------------------------------------------------------------------

/// The one seam between the engine and a brokerage vendor.
///
/// Write operations return typed errors; read/query operations return
/// [`DataSourceError`] and are degraded by the caller, never escalated.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Adapter name for logging.
    fn name(&self) -> &'static str;

    /// Establish the session. Implementations do not enforce a timeout —
    /// the session wraps this call in its own bound.
    async fn connect(&self, endpoint: &Endpoint) -> Result<ConnectAck, ConnectionError>;

    /// Tear the session down. Best-effort; must not fail.
    async fn disconnect(&self);

    /// Resolve a symbol to a tradable instrument.
    async fn qualify(&self, symbol: &str) -> Result<Instrument, OrderError>;

    /// Submit one order leg.
    async fn place_order(
        &self,
        instrument: &Instrument,
        order: &GatewayOrder,
    ) -> Result<(), OrderError>;

    /// Request cancellation of every open order. Fire-and-forget: final
    /// statuses arrive on the push stream.
    async fn cancel_all(&self) -> Result<(), OrderError>;

    /// Numeric account-summary tags (NetLiquidation, TotalCashValue, ...).
    async fn account_summary(&self) -> Result<BTreeMap<String, f64>, DataSourceError>;

    /// Current portfolio lines.
    async fn portfolio(&self) -> Result<Vec<PortfolioItem>, DataSourceError>;

    /// Executions reported for the current session.
    async fn executions(&self) -> Result<Vec<Fill>, DataSourceError>;

    /// Latest trade observation for a symbol from the live feed.
    async fn last_trade(&self, symbol: &str) -> Result<LiveTick, DataSourceError>;

    /// Subscribe to the push stream. Each subscriber sees every event from
    /// the moment of subscription.
    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_kind_strings() {
        assert_eq!(WireOrderKind::Market.as_str(), "MKT");
        assert_eq!(WireOrderKind::Limit.as_str(), "LMT");
        assert_eq!(WireOrderKind::Stop.as_str(), "STP");
    }

    #[test]
    fn leg_spec_into_gateway_order_keeps_linkage() {
        let leg = LegSpec {
            side: Side::Sell,
            quantity: 10,
            kind: WireOrderKind::Stop,
            limit_price: None,
            stop_price: Some(95.0),
            time_in_force: TimeInForce::Day,
            parent_id: Some(41),
            transmit: true,
        };
        let order = leg.into_gateway_order(43);
        assert_eq!(order.order_id, 43);
        assert_eq!(order.parent_id, Some(41));
        assert!(order.transmit);
    }

    #[test]
    fn endpoint_display() {
        let ep = Endpoint::new("127.0.0.1", 7496, 1);
        assert_eq!(ep.to_string(), "127.0.0.1:7496 (client 1)");
    }
}
