//! Yahoo-chart-backed secondary provider.
//!
//! Fetches one trading day of 1-minute bars from the public chart endpoint.
//! Used only as quote-fallback input; the cascade extracts period open,
//! latest close and summed volume from what this returns.

use chrono::{TimeZone, Utc};
use serde::Deserialize;

use tdk_gateway::DataSourceError;

use crate::{BarProvider, IntradayBar};

/// Secondary provider against the Yahoo v8 chart API.
#[derive(Debug, Clone)]
pub struct YahooChartProvider {
    http: reqwest::Client,
    base_url: String,
}

impl YahooChartProvider {
    pub fn new() -> Self {
        Self::with_base_url("https://query1.finance.yahoo.com".to_string())
    }

    /// Base URL override for tests and self-hosted mirrors.
    pub fn with_base_url(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "{}/v8/finance/chart/{}",
            self.base_url.trim_end_matches('/'),
            symbol
        )
    }
}

impl Default for YahooChartProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BarProvider for YahooChartProvider {
    fn source_name(&self) -> &'static str {
        "yahoo-chart"
    }

    async fn intraday_bars(&self, symbol: &str) -> Result<Vec<IntradayBar>, DataSourceError> {
        let resp = self
            .http
            .get(self.chart_url(symbol))
            .query(&[("range", "1d"), ("interval", "1m")])
            .send()
            .await
            .map_err(|e| DataSourceError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DataSourceError::Transport(format!(
                "chart endpoint returned http {}",
                status.as_u16()
            )));
        }

        let body: ChartResponse = resp
            .json()
            .await
            .map_err(|e| DataSourceError::Decode(e.to_string()))?;

        bars_from_response(body)
    }
}

/// Flatten the chart payload into bars, dropping minutes with missing
/// values (Yahoo reports nulls for halted or not-yet-traded minutes).
fn bars_from_response(body: ChartResponse) -> Result<Vec<IntradayBar>, DataSourceError> {
    if let Some(err) = body.chart.error {
        return Err(DataSourceError::Transport(format!(
            "{}: {}",
            err.code, err.description
        )));
    }

    let result = body
        .chart
        .result
        .and_then(|mut rs| if rs.is_empty() { None } else { Some(rs.remove(0)) })
        .ok_or(DataSourceError::Empty("yahoo-chart"))?;

    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or(DataSourceError::Empty("yahoo-chart"))?;

    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (idx, ts) in result.timestamp.iter().enumerate() {
        let (open, high, low, close) = match (
            value_at(&quote.open, idx),
            value_at(&quote.high, idx),
            value_at(&quote.low, idx),
            value_at(&quote.close, idx),
        ) {
            (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
            _ => continue,
        };
        let ts = match Utc.timestamp_opt(*ts, 0).single() {
            Some(ts) => ts,
            None => continue,
        };
        bars.push(IntradayBar {
            ts,
            open,
            high,
            low,
            close,
            volume: value_at(&quote.volume, idx).map(|v| v as i64).unwrap_or(0),
        });
    }

    if bars.is_empty() {
        return Err(DataSourceError::Empty("yahoo-chart"));
    }
    Ok(bars)
}

fn value_at(series: &[Option<f64>], idx: usize) -> Option<f64> {
    series.get(idx).copied().flatten()
}

// --- response shapes -------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteSeries>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteSeries {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}
