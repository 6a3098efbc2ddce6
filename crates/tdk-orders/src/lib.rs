//! Order validation and routing.
//!
//! [`OrderCoordinator`] sits between callers (the trading panel, automated
//! drivers) and the session. It enforces the one rule the session cannot:
//! trading is only permitted against a fresh quote for the currently
//! selected symbol. Switching symbols resets the cached price state to
//! unknown and disables placement until a fresh quote for the new symbol
//! arrives — a stale price from the previous symbol can never size or
//! price a new order.
//!
//! Simple orders are forwarded to the session. Bracket orders are
//! decomposed into three linked legs (entry, take-profit, stop-loss) with
//! transmit-last release, so the gateway sees the group atomically.

use tokio::sync::RwLock;
use tracing::{info, warn};

use tdk_gateway::{LegSpec, OrderError, WireOrderKind};
use tdk_schemas::{OrderId, OrderKind, OrderRequest, Quote};
use tdk_session::SessionManager;

/// What a successful submission produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderTicket {
    Single(OrderId),
    Bracket {
        parent: OrderId,
        take_profit: OrderId,
        stop_loss: OrderId,
    },
}

/// Pre-trade cost estimate for a prospective order at the cached price.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskPreview {
    pub order_value: f64,
    pub est_commission: f64,
    pub margin_requirement: f64,
}

#[derive(Default)]
struct QuoteGate {
    selected: Option<String>,
    quote: Option<Quote>,
}

/// Validates and routes order requests against live session and price
/// state.
pub struct OrderCoordinator {
    session: SessionManager,
    gate: RwLock<QuoteGate>,
}

impl OrderCoordinator {
    pub fn new(session: SessionManager) -> Self {
        Self {
            session,
            gate: RwLock::new(QuoteGate::default()),
        }
    }

    // -----------------------------------------------------------------------
    // Quote gate
    // -----------------------------------------------------------------------

    /// Select the symbol order entry works against. Resets the cached
    /// quote: placement stays disabled until [`observe_quote`] sees fresh
    /// data for the new symbol.
    ///
    /// [`observe_quote`]: OrderCoordinator::observe_quote
    pub async fn select_symbol(&self, symbol: &str) {
        let symbol = symbol.trim().to_uppercase();
        let mut gate = self.gate.write().await;
        gate.selected = Some(symbol);
        gate.quote = None;
    }

    pub async fn selected_symbol(&self) -> Option<String> {
        self.gate.read().await.selected.clone()
    }

    /// Feed a quote from the bus. Only quotes for the selected symbol with
    /// a positive last price arm the gate; everything else is ignored.
    pub async fn observe_quote(&self, quote: &Quote) {
        let mut gate = self.gate.write().await;
        let matches = gate
            .selected
            .as_deref()
            .is_some_and(|sel| sel == quote.symbol.to_uppercase());
        if matches && quote.last > 0.0 {
            gate.quote = Some(quote.clone());
        }
    }

    /// The quote placement would currently price against, if any.
    pub async fn current_quote(&self) -> Option<Quote> {
        self.gate.read().await.quote.clone()
    }

    pub async fn trading_enabled(&self) -> bool {
        self.gate.read().await.quote.is_some()
    }

    /// Order value, estimated commission and margin requirement for a
    /// prospective order of `quantity` shares at the cached price. `None`
    /// while the gate is closed.
    pub async fn risk_preview(&self, quantity: i64) -> Option<RiskPreview> {
        let quote = self.current_quote().await?;
        let order_value = quantity as f64 * quote.last;
        Some(RiskPreview {
            order_value,
            est_commission: estimated_commission(quantity, order_value),
            margin_requirement: order_value * 0.25,
        })
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Validate and submit. Fails with [`OrderError::NoMarketData`] unless
    /// a fresh quote for the request's symbol is cached.
    pub async fn submit(&self, req: &OrderRequest) -> Result<OrderTicket, OrderError> {
        req.validate()?;

        let symbol = req.symbol.trim().to_uppercase();
        {
            let gate = self.gate.read().await;
            let armed = gate.selected.as_deref() == Some(symbol.as_str()) && gate.quote.is_some();
            if !armed {
                warn!(symbol = %symbol, "order rejected: no fresh market data");
                return Err(OrderError::NoMarketData { symbol });
            }
        }

        match req.kind {
            OrderKind::Bracket { take_profit } => self.submit_bracket(req, take_profit).await,
            _ => {
                let order_id = self.session.place_order(req).await?;
                Ok(OrderTicket::Single(order_id))
            }
        }
    }

    /// Compose and submit the three bracket legs.
    ///
    /// Parent entry and take-profit are staged with `transmit = false`; the
    /// stop-loss carries `transmit = true` and releases the group. If any
    /// leg fails, the whole bracket is reported as
    /// [`OrderError::PartialBracketFailure`] listing the legs already
    /// accepted — compensation (cancelling those) is the caller's call.
    async fn submit_bracket(
        &self,
        req: &OrderRequest,
        take_profit: f64,
    ) -> Result<OrderTicket, OrderError> {
        let (entry, stop_loss) = match (req.limit_price, req.stop_price) {
            (Some(entry), Some(stop)) => (entry, stop),
            // validate() has already rejected this; keep the gate airtight.
            _ => return Err(tdk_schemas::OrderValidationError::IncompleteBracket.into()),
        };
        let child_side = req.side.opposite();

        let parent_leg = LegSpec {
            side: req.side,
            quantity: req.quantity,
            kind: WireOrderKind::Limit,
            limit_price: Some(entry),
            stop_price: None,
            time_in_force: req.time_in_force,
            parent_id: None,
            transmit: false,
        };
        let parent = self
            .session
            .submit_leg(&req.symbol, parent_leg)
            .await
            .map_err(|err| bracket_failure(&[], err))?;

        let tp_leg = LegSpec {
            side: child_side,
            quantity: req.quantity,
            kind: WireOrderKind::Limit,
            limit_price: Some(take_profit),
            stop_price: None,
            time_in_force: req.time_in_force,
            parent_id: Some(parent),
            transmit: false,
        };
        let tp = self
            .session
            .submit_leg(&req.symbol, tp_leg)
            .await
            .map_err(|err| bracket_failure(&[parent], err))?;

        let sl_leg = LegSpec {
            side: child_side,
            quantity: req.quantity,
            kind: WireOrderKind::Stop,
            limit_price: None,
            stop_price: Some(stop_loss),
            time_in_force: req.time_in_force,
            parent_id: Some(parent),
            transmit: true,
        };
        let sl = self
            .session
            .submit_leg(&req.symbol, sl_leg)
            .await
            .map_err(|err| bracket_failure(&[parent, tp], err))?;

        info!(
            symbol = %req.symbol,
            parent,
            take_profit = tp,
            stop_loss = sl,
            "bracket submitted"
        );
        Ok(OrderTicket::Bracket {
            parent,
            take_profit: tp,
            stop_loss: sl,
        })
    }
}

fn bracket_failure(accepted: &[OrderId], err: OrderError) -> OrderError {
    warn!(?accepted, error = %err, "bracket leg failed to submit");
    OrderError::PartialBracketFailure {
        accepted: accepted.to_vec(),
        reason: err.to_string(),
    }
}

/// Commission estimate: half a cent a share, floored at $1, capped at
/// 10 bps of order value.
fn estimated_commission(quantity: i64, order_value: f64) -> f64 {
    (quantity as f64 * 0.005).min(order_value * 0.001).max(1.0)
}

/// Default bracket child prices around an entry: +2% take-profit,
/// -2% stop-loss.
pub fn default_bracket_prices(entry: f64) -> (f64, f64) {
    (entry * 1.02, entry * 0.98)
}
