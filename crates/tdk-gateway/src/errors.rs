//! Typed error taxonomy for the trading engine.
//!
//! Connection and order failures surface to callers as these enums and are
//! never silently swallowed. Transport failures on read paths use
//! [`DataSourceError`] and are absorbed by the data cascade or degraded to
//! cached data by the session — they never reach the presentation layer as
//! hard errors.

use std::time::Duration;

use thiserror::Error;

use tdk_schemas::{OrderId, OrderValidationError};

/// Failure to establish the brokerage session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The gateway did not answer within the configured bound.
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    /// The gateway answered and refused the session.
    #[error("gateway rejected the connection: {0}")]
    Rejected(String),
    /// The transport failed before a protocol-level answer arrived.
    #[error("transport failure during connect: {0}")]
    Transport(String),
}

/// Failure to submit or manage an order.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    #[error("session is not connected to the brokerage gateway")]
    NotConnected,
    #[error("instrument could not be qualified by the gateway: {symbol}")]
    ContractUnresolved { symbol: String },
    #[error("no usable market data for {symbol}; order placement is disabled")]
    NoMarketData { symbol: String },
    /// A bracket leg failed to submit. `accepted` lists the legs the gateway
    /// already accepted; the caller owns best-effort cancellation of those.
    #[error("bracket submission failed after accepting {accepted:?}: {reason}")]
    PartialBracketFailure {
        accepted: Vec<OrderId>,
        reason: String,
    },
    #[error("gateway rejected the order: {0}")]
    GatewayRejected(String),
    #[error(transparent)]
    Invalid(#[from] OrderValidationError),
}

/// Transport-level failure of one data-source layer.
///
/// Always recovered locally: the cascade falls through to the next layer,
/// the session degrades reads to cached data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataSourceError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{0} returned an empty payload")]
    Empty(&'static str),
    #[error("payload decode failed: {0}")]
    Decode(String),
}
