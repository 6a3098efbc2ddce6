//! The layered quote-resolution cascade.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use tdk_gateway::LiveTick;
use tdk_schemas::{Quote, QuoteSource};

use crate::{BarProvider, IntradayBar, LiveFeed, SyntheticQuotes};

/// Resolves a quote for a symbol by trying sources in priority order.
///
/// 1. Live brokerage feed — only while the feed reports a live connection,
///    the call succeeds and the reported last price is positive.
/// 2. Secondary bar provider — when it yields non-empty intraday data;
///    change is computed against the period open.
/// 3. Synthetic generator — always usable.
///
/// Each layer's failure is absorbed here (logged at debug) and never
/// escalated; `resolve` cannot fail. The cascade holds no cache.
pub struct DataSourceCascade {
    live: Option<Arc<dyn LiveFeed>>,
    secondary: Arc<dyn BarProvider>,
    synthetic: SyntheticQuotes,
}

impl DataSourceCascade {
    pub fn new(
        live: Option<Arc<dyn LiveFeed>>,
        secondary: Arc<dyn BarProvider>,
        synthetic: SyntheticQuotes,
    ) -> Self {
        Self {
            live,
            secondary,
            synthetic,
        }
    }

    /// Resolve `symbol` to a quote. Always returns; provenance tells the
    /// consumer which layer answered.
    pub async fn resolve(&self, symbol: &str) -> Quote {
        if let Some(live) = &self.live {
            if live.is_connected() {
                match live.last_trade(symbol).await {
                    Ok(tick) if tick.last > 0.0 => return quote_from_live(symbol, &tick),
                    Ok(tick) => {
                        debug!(symbol, last = tick.last, "live feed returned non-positive last");
                    }
                    Err(err) => {
                        debug!(symbol, error = %err, "live feed unusable");
                    }
                }
            }
        }

        match self.secondary.intraday_bars(symbol).await {
            Ok(bars) if !bars.is_empty() => {
                if let Some(quote) = quote_from_bars(symbol, &bars) {
                    return quote;
                }
                debug!(
                    symbol,
                    source = self.secondary.source_name(),
                    "secondary bars unusable"
                );
            }
            Ok(_) => {
                debug!(
                    symbol,
                    source = self.secondary.source_name(),
                    "secondary returned no bars"
                );
            }
            Err(err) => {
                debug!(
                    symbol,
                    source = self.secondary.source_name(),
                    error = %err,
                    "secondary provider unusable"
                );
            }
        }

        self.synthetic.quote(symbol)
    }
}

fn quote_from_live(symbol: &str, tick: &LiveTick) -> Quote {
    let (change, percent_change) = match tick.prev_close {
        Some(prev) if prev > 0.0 => {
            let change = tick.last - prev;
            (change, change / prev * 100.0)
        }
        _ => (0.0, 0.0),
    };
    Quote {
        symbol: symbol.to_string(),
        last: tick.last,
        bid: tick.bid,
        ask: tick.ask,
        volume: tick.volume,
        change,
        percent_change,
        source: QuoteSource::Live,
        observed_at: Utc::now(),
    }
}

/// Derive a quote from a day of intraday bars: last = latest close,
/// change measured against the period open, volume summed over the period.
/// Returns `None` when the latest close is non-positive.
fn quote_from_bars(symbol: &str, bars: &[IntradayBar]) -> Option<Quote> {
    let open = bars.first()?.open;
    let last = bars.last()?.close;
    if last <= 0.0 {
        return None;
    }
    let change = last - open;
    let percent_change = if open != 0.0 { change / open * 100.0 } else { 0.0 };
    Some(Quote {
        symbol: symbol.to_string(),
        last,
        bid: last * 0.999,
        ask: last * 1.001,
        volume: bars.iter().map(|b| b.volume).sum(),
        change,
        percent_change,
        source: QuoteSource::Secondary,
        observed_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(open: f64, close: f64, volume: i64, minute: u32) -> IntradayBar {
        IntradayBar {
            ts: Utc.with_ymd_and_hms(2026, 3, 2, 14, minute, 0).unwrap(),
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume,
        }
    }

    #[test]
    fn bar_quote_measures_change_against_period_open() {
        let bars = vec![bar(100.0, 100.5, 1_000, 30), bar(100.5, 102.0, 2_000, 31)];
        let q = quote_from_bars("AAPL", &bars).unwrap();
        assert_eq!(q.last, 102.0);
        assert!((q.change - 2.0).abs() < 1e-9);
        assert!((q.percent_change - 2.0).abs() < 1e-9);
        assert_eq!(q.volume, 3_000);
        assert_eq!(q.source, QuoteSource::Secondary);
    }

    #[test]
    fn bar_quote_rejects_non_positive_close() {
        let bars = vec![bar(100.0, 0.0, 1_000, 30)];
        assert!(quote_from_bars("AAPL", &bars).is_none());
    }

    #[test]
    fn live_quote_change_against_prev_close() {
        let tick = LiveTick {
            symbol: "MSFT".into(),
            last: 420.0,
            bid: 419.9,
            ask: 420.1,
            volume: 9_000,
            prev_close: Some(400.0),
        };
        let q = quote_from_live("MSFT", &tick);
        assert_eq!(q.source, QuoteSource::Live);
        assert!((q.change - 20.0).abs() < 1e-9);
        assert!((q.percent_change - 5.0).abs() < 1e-9);
    }

    #[test]
    fn live_quote_without_prev_close_reports_zero_change() {
        let tick = LiveTick {
            symbol: "MSFT".into(),
            last: 420.0,
            bid: 419.9,
            ask: 420.1,
            volume: 9_000,
            prev_close: None,
        };
        let q = quote_from_live("MSFT", &tick);
        assert_eq!(q.change, 0.0);
        assert_eq!(q.percent_change, 0.0);
    }
}
