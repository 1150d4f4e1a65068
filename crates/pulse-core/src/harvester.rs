//! The harvesting loop: one sequential pass over the current month's posts.
//!
//! ```text
//! work_items(current month)
//!   for each item:
//!     blocked? --yes--> backoff wait --> renew session
//!     extract (bounded) --ok--> upsert + invalidate cache + record success
//!                       --err-> classify + record failure
//!     jittered pause (not after the last item)
//! ```
//!
//! Requests are never issued in parallel: concurrent traffic to the target is
//! itself a blocking trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backoff::{BackoffPolicy, WaitOutcome};
use crate::cache::AggregateCache;
use crate::config::{HarvestConfig, schedule_interval_from_minutes};
use crate::dashboard::Aggregate;
use crate::detector::{BlockVerdict, BlockingDetector, FailureClass, SchedulerState};
use crate::error::AppError;
use crate::models::{Metrics, MetricsRecord, Period, RunStats, WorkItem};
use crate::owners::OwnerDirectory;
use crate::pacing::PacingConfig;
use crate::traits::{ExtractorFactory, IngestionStore, MetricsExtractor};

/// Events emitted by the harvester for monitoring/logging.
#[derive(Debug, Clone)]
pub enum HarvestEvent<'a> {
    RunStarted {
        run_id: Uuid,
        period: Period,
        items: usize,
    },
    RunSkipped,
    ItemStarted {
        index: usize,
        total: usize,
        item: &'a WorkItem,
    },
    ItemSucceeded {
        item: &'a WorkItem,
        metrics: &'a Metrics,
    },
    ItemFailed {
        item: &'a WorkItem,
        class: FailureClass,
        reason: &'a str,
        failures: u32,
    },
    StoreFailed {
        item: &'a WorkItem,
        error: &'a str,
    },
    OwnerReassigned {
        external_id: &'a str,
        from: &'a str,
        to: &'a str,
    },
    Blocked {
        verdict: BlockVerdict,
        processed: usize,
        total: usize,
    },
    SessionRenewed,
    SessionFailed {
        error: &'a str,
    },
    RunFinished {
        run_id: Uuid,
        stats: &'a RunStats,
    },
    NextRunScheduled {
        after: Duration,
        degraded: bool,
    },
    Stopped,
}

/// Trait for receiving harvest events (decoupled logging).
pub trait HarvestReporter: Send + Sync {
    fn report(&self, event: HarvestEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHarvestReporter;

impl HarvestReporter for TracingHarvestReporter {
    fn report(&self, event: HarvestEvent<'_>) {
        match event {
            HarvestEvent::RunStarted {
                run_id,
                period,
                items,
            } => {
                tracing::info!(%run_id, %period, items, "Harvest run started");
            }
            HarvestEvent::RunSkipped => {
                tracing::warn!("Harvest run already in progress, skipping");
            }
            HarvestEvent::ItemStarted { index, total, item } => {
                tracing::info!(
                    external_id = %item.external_id,
                    owner = %item.owner,
                    url = %item.url,
                    "[{index}/{total}] Processing"
                );
            }
            HarvestEvent::ItemSucceeded { item, metrics } => {
                tracing::info!(
                    external_id = %item.external_id,
                    impressions = metrics.impressions,
                    likes = metrics.likes,
                    reposts = metrics.reposts,
                    replies = metrics.replies,
                    "Metrics updated"
                );
            }
            HarvestEvent::ItemFailed {
                item,
                class,
                reason,
                failures,
            } => match class {
                FailureClass::Blocking => {
                    tracing::error!(
                        external_id = %item.external_id,
                        %class,
                        %reason,
                        failures,
                        "Blocking error detected"
                    );
                }
                FailureClass::Transient => {
                    tracing::warn!(
                        external_id = %item.external_id,
                        %class,
                        %reason,
                        failures,
                        "Extraction failed"
                    );
                }
            },
            HarvestEvent::StoreFailed { item, error } => {
                tracing::error!(external_id = %item.external_id, %error, "Store write failed");
            }
            HarvestEvent::OwnerReassigned {
                external_id,
                from,
                to,
            } => {
                tracing::info!(%external_id, %from, %to, "Owner reassigned from author handle");
            }
            HarvestEvent::Blocked {
                verdict,
                processed,
                total,
            } => {
                tracing::warn!(%verdict, "Blocking detected after {processed}/{total} items");
            }
            HarvestEvent::SessionRenewed => {
                tracing::info!("Extractor session renewed after unblock wait");
            }
            HarvestEvent::SessionFailed { error } => {
                tracing::error!(%error, "Could not open extractor session");
            }
            HarvestEvent::RunFinished { run_id, stats } => {
                tracing::info!(
                    %run_id,
                    total = stats.total,
                    succeeded = stats.succeeded,
                    failed = stats.failed,
                    blocked = stats.blocked,
                    cancelled = stats.cancelled,
                    "Harvest run complete ({:.1}% success)",
                    stats.success_rate()
                );
            }
            HarvestEvent::NextRunScheduled { after, degraded } => {
                if degraded {
                    tracing::info!(
                        minutes = after.as_secs() / 60,
                        "Many failures detected, extending interval"
                    );
                }
                let next_run = Utc::now()
                    + chrono::Duration::from_std(after).unwrap_or(chrono::Duration::zero());
                tracing::info!(
                    next_run = %next_run.format("%Y-%m-%d %H:%M:%S UTC"),
                    "Next run scheduled"
                );
            }
            HarvestEvent::Stopped => {
                tracing::info!("Harvester stopped");
            }
        }
    }
}

/// Interval before the next scheduled run: ×1.5 after a degraded run.
pub fn next_interval(base: Duration, stats: &RunStats) -> Duration {
    if stats.is_degraded() {
        base.mul_f64(1.5)
    } else {
        base
    }
}

/// Clears the in-flight flag on every exit path.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An extractor session scoped to one run.
///
/// `release` must be awaited before the session goes out of scope; a session
/// that is dropped while still open is logged.
struct Session<'a, EF: ExtractorFactory> {
    factory: &'a EF,
    extractor: Option<EF::Extractor>,
}

impl<'a, EF: ExtractorFactory> Session<'a, EF> {
    async fn open(factory: &'a EF) -> Result<Self, AppError> {
        let extractor = factory.open().await?;
        Ok(Self {
            factory,
            extractor: Some(extractor),
        })
    }

    fn extractor(&self) -> Option<&EF::Extractor> {
        self.extractor.as_ref()
    }

    /// Closes the current session and opens a fresh one.
    async fn renew(&mut self) -> Result<(), AppError> {
        self.release().await;
        self.extractor = Some(self.factory.open().await?);
        Ok(())
    }

    async fn release(&mut self) {
        if let Some(extractor) = self.extractor.take() {
            extractor.close().await;
        }
    }
}

impl<EF: ExtractorFactory> Drop for Session<'_, EF> {
    fn drop(&mut self) {
        if self.extractor.is_some() {
            tracing::warn!("Extractor session dropped without release");
        }
    }
}

/// Why the item loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Finished,
    Cancelled,
    SessionLost,
}

/// Sequential harvester over the current month's work set.
///
/// Owns the process's [`SchedulerState`]. Runs are single-flight: a run
/// requested while another is active returns immediately with
/// [`RunStats::skipped`].
pub struct Harvester<S, EF>
where
    S: IngestionStore,
    EF: ExtractorFactory,
{
    store: S,
    factory: EF,
    cache: AggregateCache<Aggregate>,
    owners: OwnerDirectory,
    config: HarvestConfig,
    detector: BlockingDetector,
    backoff: BackoffPolicy,
    pacing: PacingConfig,
    state: Mutex<SchedulerState>,
    running: AtomicBool,
}

impl<S, EF> Harvester<S, EF>
where
    S: IngestionStore,
    EF: ExtractorFactory,
{
    /// Fails with [`AppError::ConfigError`] if the configuration is invalid.
    pub fn new(
        store: S,
        factory: EF,
        cache: AggregateCache<Aggregate>,
        config: HarvestConfig,
    ) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self {
            store,
            factory,
            cache,
            owners: OwnerDirectory::default(),
            detector: config.detector(),
            backoff: config.backoff(),
            pacing: config.pacing(),
            config,
            state: Mutex::new(SchedulerState::new(Instant::now())),
            running: AtomicBool::new(false),
        })
    }

    /// Enables owner reassignment from extracted author handles.
    pub fn with_owners(mut self, owners: OwnerDirectory) -> Self {
        self.owners = owners;
        self
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Copy of the current scheduler state.
    pub fn state(&self) -> SchedulerState {
        self.lock_state().clone()
    }

    /// Current blocked verdict.
    pub fn verdict(&self) -> BlockVerdict {
        self.detector.verdict(&self.lock_state(), Instant::now())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned scheduler state mutex");
            poisoned.into_inner()
        })
    }

    /// Runs one pass over the current month's items.
    ///
    /// Per-item failures never abort the pass and never surface as `Err`;
    /// only an inability to start (store unreachable, no extractor session)
    /// does.
    pub async fn run_once<R: HarvestReporter>(
        &self,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<RunStats, AppError> {
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            reporter.report(HarvestEvent::RunSkipped);
            return Ok(RunStats::skipped());
        };

        let run_id = Uuid::new_v4();
        let period = Period::current();
        let items = self.store.work_items(period).await?;

        reporter.report(HarvestEvent::RunStarted {
            run_id,
            period,
            items: items.len(),
        });

        if items.is_empty() {
            let stats = RunStats::default();
            reporter.report(HarvestEvent::RunFinished {
                run_id,
                stats: &stats,
            });
            return Ok(stats);
        }

        self.lock_state().reset_counters();

        let mut session = Session::open(&self.factory).await?;
        let exit = self
            .process_items(&items, &mut session, cancel, reporter)
            .await;
        session.release().await;

        let stats = {
            let state = self.lock_state();
            RunStats {
                total: state.processed,
                succeeded: state.succeeded,
                failed: state.failed,
                blocked: self.detector.is_blocked(&state, Instant::now()),
                cancelled: exit == LoopExit::Cancelled,
                skipped: false,
            }
        };

        reporter.report(HarvestEvent::RunFinished {
            run_id,
            stats: &stats,
        });
        Ok(stats)
    }

    async fn process_items<R: HarvestReporter>(
        &self,
        items: &[WorkItem],
        session: &mut Session<'_, EF>,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> LoopExit {
        let total = items.len();

        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }

            let verdict = self.verdict();
            if verdict.is_blocked() {
                reporter.report(HarvestEvent::Blocked {
                    verdict,
                    processed: index,
                    total,
                });

                let wait = self.backoff.wait_duration(&self.lock_state());
                if self.backoff.wait(wait, cancel).await == WaitOutcome::Cancelled {
                    return LoopExit::Cancelled;
                }
                {
                    let mut state = self.lock_state();
                    self.backoff.complete(&mut state);
                }

                if let Err(e) = session.renew().await {
                    let error = e.to_string();
                    reporter.report(HarvestEvent::SessionFailed { error: &error });
                    return LoopExit::SessionLost;
                }
                reporter.report(HarvestEvent::SessionRenewed);
            }

            let Some(extractor) = session.extractor() else {
                return LoopExit::SessionLost;
            };

            reporter.report(HarvestEvent::ItemStarted {
                index: index + 1,
                total,
                item,
            });
            self.process_item(item, extractor, reporter).await;
            self.lock_state().processed += 1;

            if index + 1 < total && !self.pacing.pause(cancel).await {
                return LoopExit::Cancelled;
            }
        }

        LoopExit::Finished
    }

    async fn process_item<R: HarvestReporter>(
        &self,
        item: &WorkItem,
        extractor: &EF::Extractor,
        reporter: &R,
    ) {
        let timeout = self.config.extract_timeout();
        let outcome = tokio::time::timeout(timeout, extractor.extract(&item.url))
            .await
            .unwrap_or_else(|_| Err(AppError::Timeout(timeout.as_secs())));

        match outcome {
            Ok(metrics) => self.ingest(item, metrics, reporter).await,
            Err(error) => {
                let class = FailureClass::of(&error);
                let failures = {
                    let mut state = self.lock_state();
                    state.record_extraction_failure();
                    state.consecutive_failures
                };
                let reason = error.to_string();
                reporter.report(HarvestEvent::ItemFailed {
                    item,
                    class,
                    reason: &reason,
                    failures,
                });
            }
        }
    }

    async fn ingest<R: HarvestReporter>(&self, item: &WorkItem, metrics: Metrics, reporter: &R) {
        let record = MetricsRecord::new(item.clone(), metrics, Utc::now());

        if let Err(e) = self.store.upsert(std::slice::from_ref(&record)).await {
            self.lock_state().record_store_failure();
            let error = e.to_string();
            reporter.report(HarvestEvent::StoreFailed {
                item,
                error: &error,
            });
            return;
        }

        self.cache.invalidate_all();
        self.lock_state().record_success(Instant::now());
        reporter.report(HarvestEvent::ItemSucceeded {
            item,
            metrics: &record.metrics,
        });

        self.reconcile_owner(item, &record.metrics, reporter).await;
    }

    /// Moves the item to the owner its author handle belongs to, if that differs.
    async fn reconcile_owner<R: HarvestReporter>(
        &self,
        item: &WorkItem,
        metrics: &Metrics,
        reporter: &R,
    ) {
        let Some(owner) = metrics
            .author_handle
            .as_deref()
            .and_then(|handle| self.owners.owner_for(handle))
        else {
            return;
        };
        if owner == item.owner {
            return;
        }

        match self.store.reassign_owner(&item.external_id, owner).await {
            Ok(true) => {
                self.cache.invalidate_all();
                reporter.report(HarvestEvent::OwnerReassigned {
                    external_id: &item.external_id,
                    from: &item.owner,
                    to: owner,
                });
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    external_id = %item.external_id,
                    error = %e,
                    "Failed to reassign owner"
                );
            }
        }
    }

    /// Runs immediately, then every `interval_minutes` until `cancel` fires.
    ///
    /// A run with more failures than successes stretches the next interval by
    /// half. Errored runs are retried after a fixed pause; after
    /// `max_run_errors` of them in a row the loop gives up.
    pub async fn run_continuous<R: HarvestReporter>(
        &self,
        interval_minutes: u64,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<(), AppError> {
        let base = schedule_interval_from_minutes(interval_minutes)?;
        let mut run_errors = 0u32;

        while !cancel.is_cancelled() {
            let pause = match self.run_once(cancel, reporter).await {
                Ok(stats) => {
                    run_errors = 0;
                    if stats.cancelled {
                        break;
                    }
                    let after = next_interval(base, &stats);
                    reporter.report(HarvestEvent::NextRunScheduled {
                        after,
                        degraded: stats.is_degraded(),
                    });
                    after
                }
                Err(e) => {
                    run_errors += 1;
                    tracing::error!(
                        error = %e,
                        attempt = run_errors,
                        max = self.config.max_run_errors,
                        "Error in continuous run"
                    );
                    if run_errors >= self.config.max_run_errors {
                        reporter.report(HarvestEvent::Stopped);
                        return Err(e);
                    }
                    self.config.run_error_pause
                }
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = cancel.cancelled() => break,
            }
        }

        reporter.report(HarvestEvent::Stopped);
        Ok(())
    }
}
