//! Quote resolution for the trading terminal.
//!
//! [`DataSourceCascade`] turns a symbol into a [`Quote`] by walking a fixed
//! source order — live brokerage feed, secondary intraday-bar provider,
//! synthetic generator — and returning the first usable result with its
//! provenance tagged. The cascade never fails and never caches; callers
//! cache if they want to.

pub mod cascade;
pub mod secondary;
pub mod synthetic;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tdk_gateway::{DataSourceError, LiveTick};

pub use cascade::DataSourceCascade;
pub use secondary::YahooChartProvider;
pub use synthetic::SyntheticQuotes;

/// One intraday OHLCV bar from a secondary provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntradayBar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// The live brokerage feed as the cascade sees it.
///
/// Implemented by the session manager over the gateway; the cascade only
/// consults it while the session reports a live connection.
#[async_trait]
pub trait LiveFeed: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn last_trade(&self, symbol: &str) -> Result<LiveTick, DataSourceError>;
}

/// Pluggable secondary provider interface (intraday bars).
#[async_trait]
pub trait BarProvider: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn intraday_bars(&self, symbol: &str) -> Result<Vec<IntradayBar>, DataSourceError>;
}
