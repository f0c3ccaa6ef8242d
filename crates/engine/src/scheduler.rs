//! Bounded worker pool over instruments and discovery slots
//!
//! The work list holds every configured instrument plus `S` synthetic
//! discovery slots. A fixed number of workers pull items from a shared queue;
//! each item then loops fetch → persist → gate → analyze → sleep until the
//! deadline has passed or the run is cancelled. Both are checked only after a
//! full iteration, so an in-flight fetch or sleep is never cut short.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::{effective_concurrency, RunConfig};
use crate::discovery::DiscoveryTask;
use crate::error::{PassError, SourceError};
use crate::guard::HistoryGuard;
use crate::indicators::{self, Analysis};
use crate::reporting::{render_batch, GateState, ReportingGate};
use crate::sources::{NotificationBatch, Notifier, PriceSource, RumorFeed};
use crate::store::HistoryStore;
use crate::types::{AnalysisResult, Instrument, PricePoint, PriceQuote, ReportRecord};

/// Source of local wall-clock time
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

// ============================================================================
// Work list
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Instrument(Instrument),
    DiscoverySlot(usize),
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Instrument(i) => write!(f, "{i}"),
            WorkItem::DiscoverySlot(n) => write!(f, "discovery#{n}"),
        }
    }
}

/// `max(1, floor(instruments × 2 × ratio))` in wild mode with a ratio, else 0
pub fn discovery_slot_count(instruments: usize, run_wild: bool, ratio: Option<f64>) -> usize {
    match ratio {
        Some(ratio) if run_wild => ((instruments as f64 * 2.0 * ratio).floor() as usize).max(1),
        _ => 0,
    }
}

/// Instruments first, in configured order, then the discovery slots
pub fn build_work_list(
    instruments: &[Instrument],
    run_wild: bool,
    ratio: Option<f64>,
) -> Vec<WorkItem> {
    let slots = discovery_slot_count(instruments.len(), run_wild, ratio);
    instruments
        .iter()
        .cloned()
        .map(WorkItem::Instrument)
        .chain((0..slots).map(WorkItem::DiscoverySlot))
        .collect()
}

// ============================================================================
// Shared state
// ============================================================================

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Latest analysis per instrument
#[derive(Debug, Default)]
pub struct AnalysisBoard {
    latest: RwLock<BTreeMap<Instrument, AnalysisResult>>,
}

impl AnalysisBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, result: AnalysisResult) {
        write(&self.latest).insert(result.instrument.clone(), result);
    }

    pub fn get(&self, instrument: &Instrument) -> Option<AnalysisResult> {
        read(&self.latest).get(instrument).cloned()
    }

    /// All results, ordered by instrument
    pub fn snapshot(&self) -> Vec<AnalysisResult> {
        read(&self.latest).values().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerStatus {
    Idle,
    Running,
    Stopped,
}

/// Shared run state: status, cancellation and counters
pub struct SchedulerProgress {
    status: RwLock<SchedulerStatus>,
    cancelled: AtomicBool,
    active_workers: AtomicUsize,
    iterations: AtomicU64,
    failures: AtomicU64,
    reports_sent: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub status: SchedulerStatus,
    pub active_workers: usize,
    pub iterations: u64,
    pub failures: u64,
    pub reports_sent: u64,
}

impl SchedulerProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(SchedulerStatus::Idle),
            cancelled: AtomicBool::new(false),
            active_workers: AtomicUsize::new(0),
            iterations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            reports_sent: AtomicU64::new(0),
        }
    }

    /// Ask every worker to stop after its current iteration
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> SchedulerStatus {
        *read(&self.status)
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            status: self.status(),
            active_workers: self.active_workers(),
            iterations: self.iterations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            reports_sent: self.reports_sent.load(Ordering::Relaxed),
        }
    }

    fn start(&self, workers: usize) {
        *write(&self.status) = SchedulerStatus::Running;
        self.active_workers.store(workers, Ordering::Relaxed);
    }

    fn finish(&self) {
        *write(&self.status) = SchedulerStatus::Stopped;
    }

    fn record_iteration(&self, ok: bool) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for SchedulerProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct Scheduler {
    config: RunConfig,
    prices: Arc<dyn PriceSource>,
    store: Arc<dyn HistoryStore>,
    notifier: Arc<dyn Notifier>,
    discovery: Option<DiscoveryTask>,
    guard: HistoryGuard,
    gate: Mutex<ReportingGate>,
    board: Arc<AnalysisBoard>,
    progress: Arc<SchedulerProgress>,
    clock: Clock,
}

impl Scheduler {
    pub fn new(
        config: RunConfig,
        prices: Arc<dyn PriceSource>,
        store: Arc<dyn HistoryStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let gate = Mutex::new(ReportingGate::new(config.report_window));
        Self {
            config,
            prices,
            store,
            notifier,
            discovery: None,
            guard: HistoryGuard::new(),
            gate,
            board: Arc::new(AnalysisBoard::new()),
            progress: Arc::new(SchedulerProgress::new()),
            clock: Arc::new(Local::now),
        }
    }

    /// Feed mined by the discovery slots. Configured instruments are never candidates.
    pub fn with_feed(mut self, feed: Arc<dyn RumorFeed>) -> Self {
        self.discovery = Some(DiscoveryTask::new(
            feed,
            Arc::clone(&self.prices),
            self.config.instruments.iter().cloned(),
        ));
        self
    }

    pub fn with_board(mut self, board: Arc<AnalysisBoard>) -> Self {
        self.board = board;
        self
    }

    pub fn with_progress(mut self, progress: Arc<SchedulerProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn board(&self) -> Arc<AnalysisBoard> {
        Arc::clone(&self.board)
    }

    pub fn progress(&self) -> Arc<SchedulerProgress> {
        Arc::clone(&self.progress)
    }

    fn now(&self) -> DateTime<Local> {
        (self.clock)()
    }

    fn lock_gate(&self) -> MutexGuard<'_, ReportingGate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the pool until every worker has stopped
    pub async fn run(self: Arc<Self>) {
        self.restore_gate().await;

        let run_wild = self.config.run_wild && self.discovery.is_some();
        if self.config.run_wild && !run_wild {
            warn!("Wild mode without a rumor feed, no discovery slots scheduled");
        }
        let work = build_work_list(&self.config.instruments, run_wild, self.config.rumour_ratio);
        if work.is_empty() {
            warn!("Nothing to schedule");
            return;
        }

        let pool_size = effective_concurrency(self.config.concurrency).min(work.len());
        if pool_size < work.len() {
            warn!(
                pool_size,
                items = work.len(),
                "More work than workers, queued items start only when a worker finishes"
            );
        }
        self.progress.start(pool_size);
        info!(
            items = work.len(),
            pool_size,
            interval_secs = self.config.interval.as_secs_f64(),
            deadline = ?self.config.deadline,
            "Scheduler starting"
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(work)));
        let mut workers = JoinSet::new();
        for worker in 0..pool_size {
            let scheduler = Arc::clone(&self);
            let queue = Arc::clone(&queue);
            workers.spawn(async move {
                while let Some(item) = next_item(&queue) {
                    scheduler.run_item(worker, &item).await;
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }

        self.progress.finish();
        info!("Scheduler stopped");
    }

    /// Pick up the last day whose batch already went out
    async fn restore_gate(&self) {
        match self.store.last_batch_date().await {
            Ok(Some(date)) => self.lock_gate().restore(date),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not read the last reported day"),
        }
    }

    async fn run_item(&self, worker: usize, item: &WorkItem) {
        info!(worker, %item, "Worker picked up item");

        loop {
            let outcome = match item {
                WorkItem::Instrument(instrument) => self.instrument_pass(instrument).await,
                WorkItem::DiscoverySlot(slot) => self.discovery_pass(*slot).await,
            };
            if let Err(e) = &outcome {
                warn!(worker, %item, error = %e, "Iteration failed");
            }
            self.progress.record_iteration(outcome.is_ok());

            tokio::time::sleep(self.config.interval).await;

            if self.progress.is_cancelled() {
                info!(worker, %item, "Cancelled");
                break;
            }
            if self.config.deadline.has_passed(self.now().with_timezone(&Utc)) {
                info!(worker, %item, "Deadline reached");
                break;
            }
        }
    }

    async fn instrument_pass(&self, instrument: &Instrument) -> Result<(), PassError> {
        let quote = self.prices.fetch(instrument).await?;
        self.observe(instrument, quote).await
    }

    async fn discovery_pass(&self, slot: usize) -> Result<(), PassError> {
        let Some(task) = &self.discovery else {
            return Err(SourceError::NotConfigured("rumor feed").into());
        };
        debug!(slot, "Discovery pass");

        match task.discover(self.now().with_timezone(&Utc)).await? {
            Some(found) => self.observe(&found.instrument, found.quote).await,
            None => Ok(()),
        }
    }

    /// Persist one observation, then gate, analyze and maybe report
    async fn observe(&self, instrument: &Instrument, quote: PriceQuote) -> Result<(), PassError> {
        self.store
            .append(&PricePoint {
                instrument: instrument.clone(),
                value: quote.value,
                observed_at: quote.observed_at,
            })
            .await?;

        let now = self.now();
        let decision = self.lock_gate().evaluate(now.naive_local());

        let window = self.window(instrument).await?;
        let analysis = self.analyze(instrument, &window, now.with_timezone(&Utc)).await?;
        self.board.publish(analysis.result.clone());

        if decision.state == GateState::AboutToReport {
            self.report(instrument, &window, &analysis.result, now.date_naive())
                .await?;
        }
        Ok(())
    }

    /// Recent history with failed (zero) observations dropped
    async fn window(&self, instrument: &Instrument) -> Result<Vec<f64>, PassError> {
        let points = self
            .store
            .read_recent(instrument, self.config.history_window)
            .await?;
        Ok(points
            .into_iter()
            .map(|p| p.value)
            .filter(|v| *v != 0.0)
            .collect())
    }

    /// The previous-EMA read-modify-write runs under the guard
    async fn analyze(
        &self,
        instrument: &Instrument,
        window: &[f64],
        now: DateTime<Utc>,
    ) -> Result<Analysis, PassError> {
        let store = &self.store;
        self.guard
            .execute(|| async move {
                let previous = store.previous_ema(instrument).await?;
                let analysis = indicators::analyze(instrument, window, previous, now)?;
                store
                    .set_previous_ema(instrument, analysis.next_previous)
                    .await?;
                Ok::<_, PassError>(analysis)
            })
            .await
    }

    async fn report(
        &self,
        instrument: &Instrument,
        window: &[f64],
        result: &AnalysisResult,
        today: NaiveDate,
    ) -> Result<(), PassError> {
        let Some(record) = ReportRecord::snapshot(instrument, today, window, result) else {
            debug!(%instrument, points = window.len(), "No RSI yet, nothing to report");
            return Ok(());
        };
        self.store.save_report(&record).await?;

        let records = self.store.reports_on(today).await?;
        let expected = self.progress.active_workers();
        if records.len() < expected {
            debug!(%today, saved = records.len(), expected, "Waiting for remaining reports");
            return Ok(());
        }

        let won = self.lock_gate().complete(today);
        if !won {
            return Ok(());
        }

        let batch = NotificationBatch {
            date: today,
            subject: format!("Trend report {today}"),
            body: render_batch(today, &records),
            records,
        };
        match self.notifier.send(&batch).await {
            Ok(()) => {
                self.progress.reports_sent.fetch_add(1, Ordering::Relaxed);
                info!(%today, reports = batch.records.len(), "Daily report sent");
            }
            Err(e) => warn!(%today, error = %e, "Failed to send daily report"),
        }
        if let Err(e) = self.store.mark_batch_sent(today, batch.records.len()).await {
            warn!(%today, error = %e, "Could not persist the reported day");
        }
        Ok(())
    }
}

fn next_item(queue: &Mutex<VecDeque<WorkItem>>) -> Option<WorkItem> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}
