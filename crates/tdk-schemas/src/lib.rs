//! Shared domain types for the tradedesk workspace.
//!
//! Everything here is plain data: serde-serializable, no I/O, no clocks.
//! The session, market-data, ledger and polling crates all speak these
//! types; the presentation layer consumes them off the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session-unique order identifier, allocated monotonically per session.
pub type OrderId = i64;

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle state of the brokerage session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

// ---------------------------------------------------------------------------
// Quote
// ---------------------------------------------------------------------------

/// Which cascade layer produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    /// Live brokerage feed.
    Live,
    /// Secondary market-data provider (intraday bars).
    Secondary,
    /// Synthetic generator — plausible but not real prices.
    Synthetic,
}

impl QuoteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteSource::Live => "live",
            QuoteSource::Secondary => "secondary",
            QuoteSource::Synthetic => "synthetic",
        }
    }
}

/// Point-in-time snapshot of a symbol's trading state.
///
/// Immutable once constructed: a fresh `Quote` replaces, never mutates, the
/// previous one for a symbol. `bid <= last <= ask` is NOT guaranteed —
/// synthetic and secondary layers derive bid/ask rather than observing them.
/// Consumers may rely on presence, never on ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: i64,
    pub change: f64,
    pub percent_change: f64,
    pub source: QuoteSource,
    pub observed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Logical inverse, used for bracket child legs.
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    #[default]
    Day,
    GoodTillCancelled,
    ImmediateOrCancel,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "DAY",
            TimeInForce::GoodTillCancelled => "GTC",
            TimeInForce::ImmediateOrCancel => "IOC",
        }
    }
}

/// Requested order shape.
///
/// `Bracket` carries its take-profit price inline; the entry limit and the
/// stop-loss price ride in the request's `limit_price` / `stop_price`
/// fields. Brackets never reach the gateway as-is — the order coordinator
/// decomposes them into three linked legs first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
    Stop,
    Bracket { take_profit: f64 },
}

impl OrderKind {
    pub fn is_bracket(&self) -> bool {
        matches!(self, OrderKind::Bracket { .. })
    }
}

/// Validation failures caught before anything is submitted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderValidationError {
    #[error("order quantity must be positive, got {0}")]
    NonPositiveQuantity(i64),
    #[error("limit order requires a limit price")]
    MissingLimitPrice,
    #[error("stop order requires a stop price")]
    MissingStopPrice,
    #[error("bracket order requires an entry limit price and a stop-loss price")]
    IncompleteBracket,
    #[error("{field} must be a positive finite price, got {value}")]
    BadPrice { field: &'static str, value: f64 },
    #[error("bracket orders must be decomposed into legs before submission")]
    UndecomposedBracket,
    #[error("order symbol must not be empty")]
    EmptySymbol,
}

/// A caller's request to trade. Validated in full before submission —
/// an invalid request is rejected without any leg reaching the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    #[serde(flatten)]
    pub kind: OrderKind,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: i64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::Market,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: Side, quantity: i64, limit_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::Limit,
            limit_price: Some(limit_price),
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    pub fn stop(symbol: impl Into<String>, side: Side, quantity: i64, stop_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::Stop,
            limit_price: None,
            stop_price: Some(stop_price),
            time_in_force: TimeInForce::Day,
        }
    }

    /// Bracket entry at `entry_limit`, protected by `take_profit` above and
    /// `stop_loss` below (for a buy; mirrored for a sell).
    pub fn bracket(
        symbol: impl Into<String>,
        side: Side,
        quantity: i64,
        entry_limit: f64,
        take_profit: f64,
        stop_loss: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::Bracket { take_profit },
            limit_price: Some(entry_limit),
            stop_price: Some(stop_loss),
            time_in_force: TimeInForce::Day,
        }
    }

    /// Check the request for internal consistency.
    pub fn validate(&self) -> Result<(), OrderValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(OrderValidationError::EmptySymbol);
        }
        if self.quantity <= 0 {
            return Err(OrderValidationError::NonPositiveQuantity(self.quantity));
        }
        match self.kind {
            OrderKind::Market => {}
            OrderKind::Limit => {
                let px = self.limit_price.ok_or(OrderValidationError::MissingLimitPrice)?;
                check_price("limit_price", px)?;
            }
            OrderKind::Stop => {
                let px = self.stop_price.ok_or(OrderValidationError::MissingStopPrice)?;
                check_price("stop_price", px)?;
            }
            OrderKind::Bracket { take_profit } => {
                let (entry, stop) = match (self.limit_price, self.stop_price) {
                    (Some(entry), Some(stop)) => (entry, stop),
                    _ => return Err(OrderValidationError::IncompleteBracket),
                };
                check_price("limit_price", entry)?;
                check_price("stop_price", stop)?;
                check_price("take_profit", take_profit)?;
            }
        }
        Ok(())
    }
}

fn check_price(field: &'static str, value: f64) -> Result<(), OrderValidationError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(OrderValidationError::BadPrice { field, value });
    }
    Ok(())
}

/// Order lifecycle state, driven only by gateway-pushed status events once
/// the order has been submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Submitted,
    Acknowledged,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal records remain queryable but are never mutated again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Session-side record of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub request: OrderRequest,
    pub status: OrderStatus,
    /// Parent order id when this record is a bracket child leg.
    pub parent_id: Option<OrderId>,
    /// Child order ids, in submission order, when this record is a bracket
    /// parent.
    pub legs: Vec<OrderId>,
}

// ---------------------------------------------------------------------------
// Fills and persisted trades
// ---------------------------------------------------------------------------

/// One execution event as pushed by the gateway.
///
/// `quantity` is signed shares: positive bought, negative sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub exec_id: String,
    pub quantity: i64,
    pub price: f64,
    pub commission: f64,
    pub executed_at: DateTime<Utc>,
}

impl Fill {
    /// Side implied by the sign of the executed quantity.
    pub fn implied_side(&self) -> Side {
        if self.quantity >= 0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

/// Persisted projection of a [`Fill`] plus its derived symbol and side —
/// the unit the trade ledger appends and reloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: f64,
    pub commission: f64,
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Build the persisted projection from an execution event.
    ///
    /// `symbol` and `side` come from the matching order record when one is
    /// known; callers without a record fall back to [`Fill::implied_side`].
    pub fn from_fill(fill: &Fill, symbol: impl Into<String>, side: Side) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity: fill.quantity.abs(),
            price: fill.price,
            commission: fill.commission,
            executed_at: fill.executed_at,
        }
    }

    /// Signed share delta this trade applies to a position.
    pub fn signed_quantity(&self) -> i64 {
        match self.side {
            Side::Buy => self.quantity,
            Side::Sell => -self.quantity,
        }
    }
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioPosition {
    pub symbol: String,
    pub quantity: i64,
    pub avg_cost: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub total_value: f64,
    pub day_change: f64,
    pub day_change_pct: f64,
    pub cash_balance: f64,
    pub buying_power: f64,
    pub positions: Vec<PortfolioPosition>,
    /// Raw numeric account-summary tags as reported by the gateway.
    pub account_summary: std::collections::BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// News
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsHeadline {
    pub provider: String,
    pub provider_code: String,
    pub article_id: String,
    pub headline: String,
    pub at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TerminalEvent — the one-way bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast from the engine to its consumers.
///
/// The polling worker and the session event pump are the only producers;
/// presentation subscribes and renders. Producers never block on consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalEvent {
    Quote(Quote),
    Portfolio(PortfolioSnapshot),
    OpenOrders { orders: Vec<OrderRecord> },
    Executions { fills: Vec<Fill> },
    OrderStatusChanged { order_id: OrderId, status: OrderStatus },
    Trade(TradeRecord),
    News(NewsHeadline),
    Connection { state: ConnectionState },
    /// A single poll step failed; the tick carried on.
    PollError { context: String, message: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
