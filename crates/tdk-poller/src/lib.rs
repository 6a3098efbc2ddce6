//! Background polling worker.
//!
//! One [`PollingScheduler`] task per session refreshes every watched symbol
//! through the quote resolver, then the account snapshot, open orders and
//! recent executions, emitting one bus event per result. The presentation
//! layer never calls into the worker and the worker never calls into
//! presentation state — events flow one way.
//!
//! A single step failing is caught, counted and emitted as an error event;
//! it aborts neither the tick nor the loop. Five consecutive resolver
//! failures insert one extended pause before normal cadence resumes; any
//! success resets the counter. Every sleep races the stop signal, so
//! shutdown is prompt: an in-flight call completes or fails naturally and
//! only the next step is skipped.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use tdk_gateway::DataSourceError;
use tdk_md::DataSourceCascade;
use tdk_schemas::{Fill, OrderRecord, PortfolioSnapshot, Quote, TerminalEvent};
use tdk_session::SessionManager;

/// Polling tunables.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Normal tick cadence.
    pub interval: Duration,
    /// Consecutive resolver failures that trigger one extended pause.
    pub backoff_threshold: u32,
    /// Length of that pause.
    pub backoff_pause: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            backoff_threshold: 5,
            backoff_pause: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Watchlist
// ---------------------------------------------------------------------------

/// The watched-symbol set, mutable while the loop runs.
///
/// The loop snapshots it at each tick boundary, so additions and removals
/// never race an in-flight iteration.
#[derive(Clone, Default)]
pub struct Watchlist {
    inner: Arc<StdRwLock<BTreeSet<String>>>,
}

impl Watchlist {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(StdRwLock::new(
                symbols.into_iter().map(|s| s.into().to_uppercase()).collect(),
            )),
        }
    }

    /// Returns `false` when the symbol was already watched.
    pub fn add(&self, symbol: &str) -> bool {
        self.write().insert(symbol.trim().to_uppercase())
    }

    /// Returns `false` when the symbol was not watched.
    pub fn remove(&self, symbol: &str) -> bool {
        self.write().remove(&symbol.trim().to_uppercase())
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.read().contains(&symbol.trim().to_uppercase())
    }

    /// Stable-ordered copy for one tick.
    pub fn snapshot(&self) -> Vec<String> {
        self.read().iter().cloned().collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeSet<String>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeSet<String>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Poll seams
// ---------------------------------------------------------------------------

/// Where the loop gets quotes. The production impl is the data cascade,
/// which cannot fail; the seam exists so failure handling stays testable.
#[async_trait]
pub trait QuoteResolver: Send + Sync {
    async fn resolve(&self, symbol: &str) -> Result<Quote, DataSourceError>;
}

#[async_trait]
impl QuoteResolver for DataSourceCascade {
    async fn resolve(&self, symbol: &str) -> Result<Quote, DataSourceError> {
        Ok(DataSourceCascade::resolve(self, symbol).await)
    }
}

/// The session reads the loop performs each tick. These degrade internally
/// (cached or empty answers) rather than failing.
#[async_trait]
pub trait SessionPoll: Send + Sync {
    async fn account_snapshot(&self) -> PortfolioSnapshot;
    async fn open_orders(&self) -> Vec<OrderRecord>;
    async fn recent_executions(&self) -> Vec<Fill>;
}

#[async_trait]
impl SessionPoll for SessionManager {
    async fn account_snapshot(&self) -> PortfolioSnapshot {
        SessionManager::account_snapshot(self).await
    }

    async fn open_orders(&self) -> Vec<OrderRecord> {
        SessionManager::open_orders(self).await
    }

    async fn recent_executions(&self) -> Vec<Fill> {
        SessionManager::recent_executions(self).await
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns one background polling task once spawned.
pub struct PollingScheduler {
    resolver: Arc<dyn QuoteResolver>,
    session: Arc<dyn SessionPoll>,
    bus: broadcast::Sender<TerminalEvent>,
    watchlist: Watchlist,
    config: PollerConfig,
}

/// Handle to a running poll loop. Dropping it also stops the loop (the
/// stop channel closes); [`PollerHandle::stop`] additionally waits for the
/// task to finish.
pub struct PollerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal the loop and wait for it to wind down. Prompt: any pending
    /// sleep is interrupted immediately; an in-flight network call is
    /// allowed to complete or fail naturally.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

impl PollingScheduler {
    pub fn new(
        resolver: Arc<dyn QuoteResolver>,
        session: Arc<dyn SessionPoll>,
        bus: broadcast::Sender<TerminalEvent>,
        watchlist: Watchlist,
        config: PollerConfig,
    ) -> Self {
        Self {
            resolver,
            session,
            bus,
            watchlist,
            config,
        }
    }

    /// Start the background worker.
    pub fn spawn(self) -> PollerHandle {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            self.run(stop_rx).await;
            info!("polling worker stopped");
        });
        PollerHandle { stop, task }
    }

    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let mut failures: u32 = 0;
        info!(
            interval = ?self.config.interval,
            watched = self.watchlist.snapshot().len(),
            "polling worker started"
        );

        loop {
            // Watchlist changes apply here, at the tick boundary.
            for symbol in self.watchlist.snapshot() {
                if *stop_rx.borrow() {
                    return;
                }
                match self.resolver.resolve(&symbol).await {
                    Ok(quote) => {
                        failures = 0;
                        self.emit(TerminalEvent::Quote(quote));
                    }
                    Err(err) => {
                        failures += 1;
                        debug!(symbol = %symbol, error = %err, consecutive = failures, "quote refresh failed");
                        self.emit(TerminalEvent::PollError {
                            context: format!("quote:{symbol}"),
                            message: err.to_string(),
                        });
                        if failures >= self.config.backoff_threshold {
                            warn!(
                                consecutive = failures,
                                pause = ?self.config.backoff_pause,
                                "too many consecutive failures; backing off"
                            );
                            self.emit(TerminalEvent::PollError {
                                context: "backoff".to_string(),
                                message: format!(
                                    "{failures} consecutive failures; pausing {:?}",
                                    self.config.backoff_pause
                                ),
                            });
                            if !sleep_unless_stopped(&mut stop_rx, self.config.backoff_pause).await
                            {
                                return;
                            }
                            failures = 0;
                        }
                    }
                }
            }

            if *stop_rx.borrow() {
                return;
            }

            // Session reads degrade internally; each emits exactly one event.
            self.emit(TerminalEvent::Portfolio(self.session.account_snapshot().await));
            self.emit(TerminalEvent::OpenOrders {
                orders: self.session.open_orders().await,
            });
            self.emit(TerminalEvent::Executions {
                fills: self.session.recent_executions().await,
            });

            if !sleep_unless_stopped(&mut stop_rx, self.config.interval).await {
                return;
            }
        }
    }

    fn emit(&self, event: TerminalEvent) {
        let _ = self.bus.send(event);
    }
}

/// Sleep for `duration` unless the stop signal fires first. Returns `false`
/// when the loop should wind down (stop requested or handle dropped).
async fn sleep_unless_stopped(stop_rx: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *stop_rx.borrow() {
        return false;
    }
    tokio::select! {
        changed = stop_rx.changed() => match changed {
            Ok(()) => !*stop_rx.borrow(),
            // Sender dropped: nobody can ever stop us explicitly, wind down.
            Err(_) => false,
        },
        () = sleep(duration) => true,
    }
}
