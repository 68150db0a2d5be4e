//! Reconciliation poller
//!
//! One background task that periodically walks every unresolved order and
//! asks the accrual oracle about it. Oracle answers are applied through
//! [`OrderLedger::apply_resolution`], so the poller can never regress an
//! order even when it races with another writer.
//!
//! # Tick
//!
//! 1. Fetch unresolved orders, oldest first (store error: log, skip tick)
//! 2. For each order, check for cancellation, then look it up with a
//!    per-call deadline
//! 3. A rate-limit signal ends the tick; the remaining orders wait for the
//!    next one
//!
//! Ticks never overlap: a tick that outlasts the interval delays the next.

use crate::{
    ledger::OrderLedger,
    metrics::Metrics,
    oracle::{AccrualOracle, OracleResult},
    types::ResolutionOutcome,
};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Poller timing
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Time between tick starts
    pub interval: Duration,

    /// Deadline for one oracle call
    pub call_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            call_timeout: Duration::from_secs(1),
        }
    }
}

/// Summary of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Orders the oracle was asked about
    pub examined: usize,

    /// Resolutions the ledger applied or already had
    pub resolved: usize,

    /// Resolutions the ledger refused (regression, conflicting terminal
    /// outcome, order gone)
    pub refused: usize,

    /// Orders the oracle has not classified yet
    pub still_registered: usize,

    /// Orders the oracle does not know
    pub unknown: usize,

    /// Transport errors, timeouts and ledger errors
    pub failed: usize,

    /// Tick ended early on a rate-limit signal
    pub rate_limited: bool,

    /// Tick ended early on cancellation
    pub cancelled: bool,
}

/// Background reconciliation loop
#[derive(Clone)]
pub struct ReconciliationPoller {
    ledger: OrderLedger,
    oracle: Arc<dyn AccrualOracle>,
    config: PollerConfig,
    metrics: Metrics,
}

impl fmt::Debug for ReconciliationPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconciliationPoller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReconciliationPoller {
    /// Poller resolving `ledger` orders against `oracle`
    pub fn new(ledger: OrderLedger, oracle: Arc<dyn AccrualOracle>, config: PollerConfig) -> Self {
        let metrics = ledger.metrics().clone();
        Self {
            ledger,
            oracle,
            config,
            metrics,
        }
    }

    /// Start the loop on the current runtime
    pub fn spawn(self) -> PollerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(token).await });

        PollerHandle { cancel, join }
    }

    /// Run ticks until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = self.config.interval.as_millis() as u64,
            call_timeout_ms = self.config.call_timeout.as_millis() as u64,
            "Reconciliation poller started"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    let report = self.run_tick(&cancel).await;
                    if report.examined > 0 {
                        tracing::debug!(
                            examined = report.examined,
                            resolved = report.resolved,
                            refused = report.refused,
                            still_registered = report.still_registered,
                            unknown = report.unknown,
                            failed = report.failed,
                            rate_limited = report.rate_limited,
                            "Reconciliation tick finished"
                        );
                    }
                }
            }
        }

        tracing::info!("Reconciliation poller stopped");
    }

    /// Run a single tick
    pub async fn run_tick(&self, cancel: &CancellationToken) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        let orders = match self.ledger.get_unresolved().await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load unresolved orders, skipping tick");
                return report;
            }
        };

        for order in orders {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            report.examined += 1;

            let result = match tokio::time::timeout(
                self.config.call_timeout,
                self.oracle.lookup(&order.number),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => OracleResult::TransportError(format!(
                    "no answer within {}ms",
                    self.config.call_timeout.as_millis()
                )),
            };
            self.metrics.record_lookup(result.label());

            match result {
                OracleResult::Resolved { status, accrual } => {
                    match self.ledger.apply_resolution(&order.number, status, accrual).await {
                        Ok(ResolutionOutcome::Applied { .. } | ResolutionOutcome::Unchanged) => {
                            report.resolved += 1
                        }
                        Ok(ResolutionOutcome::Rejected { .. } | ResolutionOutcome::NotFound) => {
                            report.refused += 1
                        }
                        Err(e) => {
                            tracing::error!(order = %order.number, error = %e, "Failed to apply resolution");
                            report.failed += 1;
                        }
                    }
                }
                OracleResult::StillRegistered => report.still_registered += 1,
                OracleResult::UnknownOrder => {
                    tracing::debug!(order = %order.number, "Order not registered with the oracle");
                    report.unknown += 1;
                }
                OracleResult::RateLimited { retry_after } => {
                    tracing::warn!(
                        order = %order.number,
                        retry_after_secs = retry_after.map(|d| d.as_secs()),
                        "Oracle rate limit hit, ending tick"
                    );
                    self.metrics.record_rate_limited_tick();
                    report.rate_limited = true;
                    break;
                }
                OracleResult::TransportError(reason) => {
                    tracing::warn!(order = %order.number, error = %reason, "Oracle lookup failed");
                    report.failed += 1;
                }
            }
        }

        self.metrics.record_tick_duration(started.elapsed().as_secs_f64());
        report
    }
}

/// Handle to a spawned poller
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl PollerHandle {
    /// Token that stops the poller when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the loop and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Reconciliation poller task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        money::Money,
        storage::MemoryStore,
        types::OrderStatus,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const NUMBERS: [&str; 5] = ["79927398713", "12345678903", "9278923470", "346436439", "2377225624"];

    #[derive(Default)]
    struct ScriptedOracle {
        answers: HashMap<String, OracleResult>,
        calls: Mutex<Vec<String>>,
        cancel_on_call: Option<(usize, CancellationToken)>,
        delay: Option<Duration>,
    }

    impl ScriptedOracle {
        fn answering(answers: &[(&str, OracleResult)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(n, r)| (n.to_string(), r.clone()))
                    .collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AccrualOracle for ScriptedOracle {
        async fn lookup(&self, order_number: &str) -> OracleResult {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(order_number.to_string());
                calls.len()
            };
            if let Some((n, token)) = &self.cancel_on_call {
                if *n == call {
                    token.cancel();
                }
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.answers
                .get(order_number)
                .cloned()
                .unwrap_or(OracleResult::UnknownOrder)
        }
    }

    async fn ledger_with_orders() -> OrderLedger {
        let ledger = OrderLedger::new(Arc::new(MemoryStore::new()), Metrics::new().unwrap());
        for number in NUMBERS {
            ledger.create_order("alice", number).await.unwrap();
        }
        ledger
    }

    fn processed(points: i64) -> OracleResult {
        OracleResult::Resolved {
            status: OrderStatus::Processed,
            accrual: Some(Money::from(points)),
        }
    }

    fn poller(ledger: &OrderLedger, oracle: Arc<ScriptedOracle>) -> ReconciliationPoller {
        ReconciliationPoller::new(
            ledger.clone(),
            oracle,
            PollerConfig {
                interval: Duration::from_millis(10),
                call_timeout: Duration::from_millis(100),
            },
        )
    }

    #[tokio::test]
    async fn test_rate_limit_ends_tick() {
        let ledger = ledger_with_orders().await;
        let oracle = Arc::new(ScriptedOracle::answering(&[
            (NUMBERS[0], processed(100)),
            (NUMBERS[1], processed(200)),
            (NUMBERS[2], OracleResult::RateLimited { retry_after: Some(Duration::from_secs(60)) }),
            (NUMBERS[3], processed(300)),
            (NUMBERS[4], processed(400)),
        ]));
        let poller = poller(&ledger, oracle.clone());

        let report = poller.run_tick(&CancellationToken::new()).await;

        assert!(report.rate_limited);
        assert_eq!(report.examined, 3);
        assert_eq!(report.resolved, 2);
        assert_eq!(oracle.calls(), NUMBERS[..3].to_vec());

        let unresolved: Vec<String> = ledger
            .get_unresolved()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.number)
            .collect();
        assert_eq!(unresolved, NUMBERS[2..].to_vec());
        assert_eq!(ledger.metrics().rate_limited_ticks.get(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_do_not_stop_tick() {
        let ledger = ledger_with_orders().await;
        let oracle = Arc::new(ScriptedOracle::answering(&[
            (NUMBERS[0], OracleResult::TransportError("connection reset".to_string())),
            (NUMBERS[1], OracleResult::StillRegistered),
            (NUMBERS[2], processed(50)),
            (
                NUMBERS[3],
                OracleResult::Resolved { status: OrderStatus::Processing, accrual: None },
            ),
        ]));
        let poller = poller(&ledger, oracle.clone());

        let report = poller.run_tick(&CancellationToken::new()).await;

        assert_eq!(
            report,
            TickReport {
                examined: 5,
                resolved: 2,
                refused: 0,
                still_registered: 1,
                unknown: 1,
                failed: 1,
                rate_limited: false,
                cancelled: false,
            }
        );

        let orders = ledger.get_orders("alice").await.unwrap();
        let status_of = |n: &str| orders.iter().find(|o| o.number == n).unwrap().status;
        assert_eq!(status_of(NUMBERS[0]), OrderStatus::New);
        assert_eq!(status_of(NUMBERS[1]), OrderStatus::New);
        assert_eq!(status_of(NUMBERS[2]), OrderStatus::Processed);
        assert_eq!(status_of(NUMBERS[3]), OrderStatus::Processing);
        assert_eq!(status_of(NUMBERS[4]), OrderStatus::New);
    }

    #[tokio::test]
    async fn test_refused_resolutions_not_counted_as_resolved() {
        let ledger = ledger_with_orders().await;
        ledger
            .apply_resolution(NUMBERS[0], OrderStatus::Processing, None)
            .await
            .unwrap();
        let oracle = Arc::new(ScriptedOracle::answering(&[
            (
                NUMBERS[0],
                OracleResult::Resolved { status: OrderStatus::Registered, accrual: None },
            ),
            (NUMBERS[1], processed(10)),
        ]));
        let poller = poller(&ledger, oracle);

        let report = poller.run_tick(&CancellationToken::new()).await;

        assert_eq!(report.resolved, 1);
        assert_eq!(report.refused, 1);
        assert_eq!(report.unknown, 3);

        let orders = ledger.get_orders("alice").await.unwrap();
        let status_of = |n: &str| orders.iter().find(|o| o.number == n).unwrap().status;
        assert_eq!(status_of(NUMBERS[0]), OrderStatus::Processing);
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_orders() {
        let ledger = ledger_with_orders().await;
        let cancel = CancellationToken::new();
        let oracle = Arc::new(ScriptedOracle {
            cancel_on_call: Some((2, cancel.clone())),
            ..ScriptedOracle::answering(&[(NUMBERS[0], processed(1)), (NUMBERS[1], processed(2))])
        });
        let poller = poller(&ledger, oracle.clone());

        let report = poller.run_tick(&cancel).await;

        assert!(report.cancelled);
        assert_eq!(report.examined, 2);
        // The in-flight call completes and its answer is applied.
        assert_eq!(report.resolved, 2);
        assert_eq!(oracle.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_slow_oracle_times_out() {
        let ledger = OrderLedger::new(Arc::new(MemoryStore::new()), Metrics::new().unwrap());
        ledger.create_order("alice", NUMBERS[0]).await.unwrap();
        let oracle = Arc::new(ScriptedOracle {
            delay: Some(Duration::from_secs(5)),
            ..ScriptedOracle::answering(&[(NUMBERS[0], processed(10))])
        });
        let poller = poller(&ledger, oracle);

        let report = poller.run_tick(&CancellationToken::new()).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.resolved, 0);
        assert_eq!(ledger.get_unresolved().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_poller_resolves_and_shuts_down() {
        let ledger = ledger_with_orders().await;
        let answers: Vec<(&str, OracleResult)> =
            NUMBERS.iter().map(|n| (*n, processed(100))).collect();
        let oracle = Arc::new(ScriptedOracle::answering(&answers));

        let handle = poller(&ledger, oracle).spawn();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !ledger.get_unresolved().await.unwrap().is_empty() {
            assert!(Instant::now() < deadline, "poller did not resolve orders in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        handle.shutdown().await;

        let orders = ledger.get_orders("alice").await.unwrap();
        assert!(orders.iter().all(|o| o.status == OrderStatus::Processed));
    }
}
