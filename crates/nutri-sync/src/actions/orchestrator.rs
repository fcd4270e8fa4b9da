//! Sync orchestrator
//!
//! Coordinates the reachability monitor, the pending-mutation queue and the
//! reconciler for user-initiated writes.

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::abort::{AbortHandle, AbortSignal};
use super::clock::Clock;
use super::guard::{WriteGuard, WriteGuards};
use crate::config::{OrchestratorConfig, SyncConfig};
use crate::error::{RemoteError, SyncError};
use crate::models::{
    DailyProgress, DailyStats, DailyTargets, MealNutrition, MutationId, Payload,
    PendingMutation, StatField,
};
use crate::queue::{DrainBackoff, DrainReport, MutationQueue};
use crate::reachability::{Probe, ReachabilityMonitor};
use crate::reconcile::Reconciler;
use crate::remote::{Document, PlanGenerator, RemoteStore};
use crate::storage::LocalStore;

/// Key of the orchestrator's reconnect callback on the monitor
const RECONNECT_KEY: &str = "orchestrator.drain";


/// How a user write was handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The remote store confirmed the write
    Confirmed,
    /// The write is queued and will be replayed on reconnect
    Queued(MutationId),
    /// Nothing to write (e.g. meal already completed)
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Dropped from the queue after too many failed attempts
    Exhausted,
    /// Neither written nor queued
    NotSaved,
}

/// A one-time, dismissible message for the user
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub target_path: String,
    pub mutation_id: Option<MutationId>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    fn exhausted(mutation: &PendingMutation, at: DateTime<Utc>) -> Self {
        Self {
            kind: NoticeKind::Exhausted,
            target_path: mutation.target_path.clone(),
            mutation_id: Some(mutation.id.clone()),
            message: format!(
                "A change made at {} could not be saved after {} attempts. Please make it again.",
                mutation.created_at.format("%H:%M"),
                mutation.retry_count
            ),
            at,
        }
    }

    fn not_saved(target_path: &str, reason: &str, at: DateTime<Utc>) -> Self {
        Self {
            kind: NoticeKind::NotSaved,
            target_path: target_path.to_string(),
            mutation_id: None,
            message: format!(
                "Your change could not be saved ({}). Please try again.",
                reason
            ),
            at,
        }
    }
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    monitor: ReachabilityMonitor,
    queue: Arc<MutationQueue>,
    reconciler: Arc<Reconciler>,
    remote: Arc<dyn RemoteStore>,
    generator: RwLock<Option<Arc<dyn PlanGenerator>>>,
    clock: Arc<dyn Clock>,
    guards: WriteGuards,
    /// Held from reading the view to the end of a stats write, so writes to
    /// the user document land in the order their values were computed
    stats_write: tokio::sync::Mutex<()>,
    /// Cancels the stat writes currently in flight
    in_flight: Mutex<AbortHandle>,
    notices: Mutex<Vec<Notice>>,
    backoff: Mutex<DrainBackoff>,
}

/// Glue between the UI, the monitor, the queue and the reconciler
///
/// User writes go straight to the remote store when online and into the
/// queue otherwise (or when the direct write fails). Either way the new
/// values are applied to the reconciler as overrides at once.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl SyncOrchestrator {
    pub fn new(
        config: &SyncConfig,
        monitor: ReachabilityMonitor,
        queue: Arc<MutationQueue>,
        reconciler: Arc<Reconciler>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                config: config.orchestrator.clone(),
                monitor,
                queue,
                reconciler,
                remote,
                generator: RwLock::new(None),
                clock,
                guards: WriteGuards::new(config.orchestrator.guard_cooldown()),
                stats_write: tokio::sync::Mutex::new(()),
                in_flight: Mutex::new(AbortHandle::new()),
                notices: Mutex::new(Vec::new()),
                backoff: Mutex::new(DrainBackoff::new(&config.queue)),
            }),
        }
    }

    /// Build every component over one local store, rehydrating the queue
    /// and the stats cache
    pub fn open(
        config: &SyncConfig,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        probe: Arc<dyn Probe>,
        clock: Arc<dyn Clock>,
        initially_online: bool,
    ) -> Result<Self, SyncError> {
        let queue = Arc::new(MutationQueue::open(local.clone(), config.queue.clone())?);
        let reconciler = Arc::new(Reconciler::open(local, config.refresh.clone())?);
        let monitor = ReachabilityMonitor::new(config.monitor.clone(), probe, initially_online);

        info!(
            "Sync core ready ({} pending mutations, {})",
            queue.pending_count(),
            if initially_online { "online" } else { "offline" }
        );
        Ok(Self::new(config, monitor, queue, reconciler, remote, clock))
    }

    pub fn set_plan_generator(&self, generator: Arc<dyn PlanGenerator>) {
        *self.inner.generator.write().unwrap() = Some(generator);
    }

    pub fn monitor(&self) -> &ReachabilityMonitor {
        &self.inner.monitor
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.inner.queue
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.inner.reconciler
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.pending_count()
    }

    /// Today's merged stats
    pub fn view(&self) -> DailyStats {
        self.inner.reconciler.view(self.inner.clock.today())
    }

    pub fn progress(&self, targets: &DailyTargets) -> DailyProgress {
        self.inner
            .reconciler
            .progress(self.inner.clock.today(), targets)
    }

    /// Take (and dismiss) the pending user notices
    pub fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.inner.notices.lock().unwrap())
    }

    /// Add `amount_ml` to today's water intake
    pub async fn log_water(&self, amount_ml: u32) -> Result<WriteOutcome, SyncError> {
        let _guard = self.acquire(&self.stats_guard_key(StatField::Water.document_key()))?;
        let _writing = self.inner.stats_write.lock().await;
        self.refresh_if_stale().await;
        let now = self.inner.clock.now();

        let mut next = self.view();
        let total = next.water_intake.saturating_add(amount_ml);
        next.set(StatField::Water, f64::from(total));
        next.last_updated = now;

        self.write_stats(next, &[StatField::Water], None, false).await
    }

    /// Mark a meal completed and add its nutrition to today's totals
    pub async fn complete_meal(
        &self,
        meal_id: &str,
        nutrition: &MealNutrition,
    ) -> Result<WriteOutcome, SyncError> {
        let _guard = self.acquire(&self.stats_guard_key(&format!("completedMeals.{}", meal_id)))?;
        let _writing = self.inner.stats_write.lock().await;
        self.refresh_if_stale().await;
        let now = self.inner.clock.now();

        let mut next = self.view();
        if next.completed_meal_ids.contains(meal_id) {
            debug!("Meal {} already completed", meal_id);
            return Ok(WriteOutcome::Unchanged);
        }

        const MACROS: [StatField; 4] = [
            StatField::Calories,
            StatField::Protein,
            StatField::Carbs,
            StatField::Fat,
        ];
        for field in MACROS {
            next.set(field, next.get(field) + nutrition.get(field));
        }
        next.completed_meal_ids.insert(meal_id.to_string());
        next.last_updated = now;

        self.write_stats(next, &MACROS, Some(meal_id), false).await
    }

    /// Overwrite today's stats with values entered by the user
    pub async fn check_in(&self, stats: DailyStats) -> Result<WriteOutcome, SyncError> {
        let _guard = self.acquire(&self.stats_guard_key("checkIn"))?;
        let _writing = self.inner.stats_write.lock().await;

        let mut next = stats.sanitized();
        next.date = self.inner.clock.today();
        next.last_updated = self.inner.clock.now();

        self.write_stats(next, &StatField::ALL, None, true).await
    }

    /// Replace the meal plan with a freshly generated one
    ///
    /// Requires a connection. Stat writes still in flight are cancelled,
    /// since the new plan supersedes them.
    pub async fn regenerate_plan(&self) -> Result<(), SyncError> {
        if !self.inner.monitor.is_online() {
            return Err(SyncError::Offline);
        }
        let generator = self
            .inner
            .generator
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| SyncError::Generation {
                message: "no plan generator configured".to_string(),
            })?;

        self.cancel_in_flight();
        info!("Regenerating meal plan for {}", self.inner.config.user_path);

        let profile = self
            .remote_get(&self.inner.config.user_path)
            .await?
            .unwrap_or_default();

        let timeout = self.inner.config.generation_timeout();
        let plan = match tokio::time::timeout(timeout, generator.generate(&profile)).await {
            Ok(Ok(plan)) => plan,
            Ok(Err(e)) => {
                return Err(SyncError::Generation {
                    message: format!("{:#}", e),
                });
            }
            Err(_) => {
                return Err(SyncError::Generation {
                    message: format!("timed out after {}ms", timeout.as_millis()),
                });
            }
        };

        self.remote_set(&self.inner.config.plan_path, &plan).await?;
        info!("Stored new meal plan at {}", self.inner.config.plan_path);

        self.refresh().await
    }

    /// Abort every stat write currently in flight
    pub fn cancel_in_flight(&self) {
        let previous = std::mem::take(&mut *self.inner.in_flight.lock().unwrap());
        previous.abort();
    }

    /// Drain the queue, then refetch if the cache is stale
    ///
    /// Called on every verified offline-to-online transition.
    pub async fn handle_reconnect(&self) -> Result<DrainReport, SyncError> {
        let report = self.drain_now().await?;

        let now = self.inner.clock.now();
        if self.inner.reconciler.should_refresh(now) {
            if let Err(e) = self.refresh().await {
                warn!("Refetch after reconnect failed: {}", e);
            }
        } else {
            self.inner.reconciler.clear_superseded();
        }

        Ok(report)
    }

    /// Run one drain and surface exhausted mutations as notices
    pub async fn drain_now(&self) -> Result<DrainReport, SyncError> {
        let report = self
            .inner
            .queue
            .drain(self.inner.remote.as_ref())
            .await?;

        let now = self.inner.clock.now();
        if !report.succeeded.is_empty() {
            self.inner.reconciler.record_confirmed_write(now);
        }
        if !report.unpersisted.is_empty() {
            warn!(
                "{} drain outcomes could not be stored locally, they will be replayed",
                report.unpersisted.len()
            );
        }
        for mutation in &report.exhausted {
            self.withdraw_overrides(mutation);
            self.inner
                .notices
                .lock()
                .unwrap()
                .push(Notice::exhausted(mutation, now));
        }
        self.inner.backoff.lock().unwrap().record(&report);

        Ok(report)
    }

    /// Refetch the plan and user documents and replace the cached inputs
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let config = &self.inner.config;
        let user = self.remote_get(&config.user_path).await?;
        let plan = self.remote_get(&config.plan_path).await?;

        let parse = |doc: Option<Document>| {
            doc.and_then(|d| DailyStats::from_document(&d, &config.stats_field))
        };

        let fetched_at = self.inner.clock.now();
        self.inner
            .reconciler
            .record_fetch(parse(plan), parse(user), fetched_at)?;
        self.inner.reconciler.clear_superseded();
        Ok(())
    }

    /// Refetch before computing a new absolute value from a stale cache
    async fn refresh_if_stale(&self) {
        if !self.inner.monitor.is_online()
            || !self.inner.reconciler.should_refresh(self.inner.clock.now())
        {
            return;
        }
        if let Err(e) = self.refresh().await {
            warn!("Refetch before write failed, using cached stats: {}", e);
        }
    }

    /// Register the reconnect drain and spawn the polling loop and the
    /// backoff drain timer on the current runtime
    pub fn start(&self) -> BackgroundTasks {
        let runtime = tokio::runtime::Handle::current();

        let this = self.clone();
        let spawner = runtime.clone();
        self.inner.monitor.on_reconnect(RECONNECT_KEY, move || {
            let this = this.clone();
            spawner.spawn(async move {
                if let Err(e) = this.handle_reconnect().await {
                    error!("Reconnect drain failed: {}", e);
                }
            });
        });

        let monitor = self.inner.monitor.clone();
        let polling = runtime.spawn(async move { monitor.run_polling().await });

        let this = self.clone();
        let timer = runtime.spawn(async move { this.run_drain_timer().await });

        BackgroundTasks {
            monitor: self.inner.monitor.clone(),
            tasks: vec![polling, timer],
        }
    }

    /// Drain periodically while online, backing off while drains fail
    pub async fn run_drain_timer(&self) {
        loop {
            let entropy = u64::from(self.inner.clock.now().timestamp_subsec_nanos());
            let delay = self.inner.backoff.lock().unwrap().next_delay(entropy);
            tokio::time::sleep(delay).await;

            if !self.inner.monitor.is_online() || self.inner.queue.pending_count() == 0 {
                continue;
            }
            debug!("Timer drain after {:?}", delay);
            if let Err(e) = self.drain_now().await {
                error!("Timer drain failed: {}", e);
            }
        }
    }

    /// Withdraw optimistic values that only a dropped mutation carried
    fn withdraw_overrides(&self, mutation: &PendingMutation) {
        if mutation.target_path != self.inner.config.user_path {
            return;
        }
        let key = &self.inner.config.stats_field;
        let whole = mutation.payload.get(key).and_then(Value::as_object);
        let overrides = self.inner.reconciler.overrides();

        let dropped: Vec<StatField> = StatField::ALL
            .into_iter()
            .filter(|field| {
                let written = whole
                    .and_then(|o| o.get(field.document_key()))
                    .or_else(|| {
                        mutation
                            .payload
                            .get(&format!("{}.{}", key, field.document_key()))
                    })
                    .and_then(Value::as_f64);
                matches!(
                    (written, overrides.get(*field)),
                    (Some(value), Some(o)) if o.value == value
                )
            })
            .collect();

        if !dropped.is_empty() {
            debug!("Withdrawing {} optimistic values of {}", dropped.len(), mutation.id);
            self.inner.reconciler.revert_overrides(&dropped, &[]);
        }
    }

    /// Double-tap guard key for one kind of write to the user's stats
    fn stats_guard_key(&self, what: &str) -> String {
        format!(
            "{}#{}.{}",
            self.inner.config.user_path, self.inner.config.stats_field, what
        )
    }

    fn acquire(&self, key: &str) -> Result<WriteGuard<'_>, SyncError> {
        self.inner
            .guards
            .try_acquire(key)
            .ok_or_else(|| SyncError::Busy {
                target: key.to_string(),
            })
    }

    /// Apply `next` optimistically, then write it (or queue it)
    ///
    /// On failure the optimistic values this write applied are withdrawn.
    /// Callers hold `stats_write`.
    async fn write_stats(
        &self,
        next: DailyStats,
        fields: &[StatField],
        meal_id: Option<&str>,
        whole_object: bool,
    ) -> Result<WriteOutcome, SyncError> {
        let payload = self.stats_payload(&next, fields, meal_id.is_some(), whole_object)?;

        let mut meals: Vec<String> = meal_id.into_iter().map(str::to_string).collect();
        if whole_object {
            meals.extend(next.completed_meal_ids.iter().cloned());
        }

        let reconciler = &self.inner.reconciler;
        let previous = reconciler.overrides();
        for field in fields {
            reconciler.apply_override(next.date, *field, next.get(*field), next.last_updated);
        }
        for meal in &meals {
            reconciler.apply_meal_override(next.date, meal);
        }

        let signal = self.inner.in_flight.lock().unwrap().signal();
        let target = self.inner.config.user_path.clone();
        let result = self.persist_write(&target, payload, &signal).await;
        if result.is_err() {
            reconciler.restore_overrides(&previous, fields, &meals);
        }
        result
    }

    /// Build an absolute-value payload for the stats object
    ///
    /// Dot-path fields when the remote object already holds today's stats;
    /// the whole object otherwise, so a new day never inherits yesterday's
    /// untouched fields.
    fn stats_payload(
        &self,
        stats: &DailyStats,
        fields: &[StatField],
        meals: bool,
        whole_object: bool,
    ) -> Result<Payload, SyncError> {
        let key = &self.inner.config.stats_field;
        let mut payload = Payload::new();

        let remote_has_today = self
            .inner
            .reconciler
            .cached()
            .user
            .is_some_and(|s| s.date == stats.date);

        if whole_object || !remote_has_today {
            payload.insert(key.clone(), serde_json::to_value(stats)?);
            return Ok(payload);
        }

        for field in fields {
            let value = match field {
                StatField::Water => Value::from(stats.water_intake),
                other => Value::from(stats.get(*other)),
            };
            payload.insert(format!("{}.{}", key, field.document_key()), value);
        }
        if meals {
            payload.insert(
                format!("{}.completedMeals", key),
                serde_json::to_value(&stats.completed_meal_ids)?,
            );
        }
        payload.insert(format!("{}.date", key), serde_json::to_value(stats.date)?);
        payload.insert(
            format!("{}.lastUpdated", key),
            serde_json::to_value(stats.last_updated)?,
        );
        Ok(payload)
    }

    /// Direct write when online, queue otherwise
    async fn persist_write(
        &self,
        target: &str,
        payload: Payload,
        signal: &AbortSignal,
    ) -> Result<WriteOutcome, SyncError> {
        let inner = &self.inner;

        let mut direct = inner.monitor.is_online();
        if direct && inner.queue.pending().iter().any(|m| m.target_path == target) {
            // Earlier writes to this target are still queued; stay behind them.
            debug!("Queued writes pending for {}, queueing", target);
            direct = false;
        }

        if direct {
            match self.remote_update(target, &payload, signal).await {
                Ok(()) => {
                    inner.reconciler.record_confirmed_write(inner.clock.now());
                    return Ok(WriteOutcome::Confirmed);
                }
                Err(RemoteError::Cancelled) => return Err(RemoteError::Cancelled.into()),
                Err(e) => warn!("Direct write to {} failed, queueing: {}", target, e),
            }
        }

        let queue_err = match inner.queue.enqueue(target, payload.clone()) {
            Ok(id) => return Ok(WriteOutcome::Queued(id)),
            Err(e) => e,
        };

        error!("Could not queue write to {}: {}", target, queue_err);
        match self.remote_update(target, &payload, signal).await {
            Ok(()) => {
                inner.reconciler.record_confirmed_write(inner.clock.now());
                Ok(WriteOutcome::Confirmed)
            }
            Err(remote_err) => {
                let reason = format!("{}; retry failed: {}", queue_err, remote_err);
                error!("Write to {} lost: {}", target, reason);
                inner
                    .notices
                    .lock()
                    .unwrap()
                    .push(Notice::not_saved(target, &reason, inner.clock.now()));
                Err(SyncError::NotSaved {
                    target: target.to_string(),
                    reason,
                })
            }
        }
    }

    async fn remote_update(
        &self,
        path: &str,
        payload: &Payload,
        signal: &AbortSignal,
    ) -> Result<(), RemoteError> {
        if signal.is_aborted() {
            return Err(RemoteError::Cancelled);
        }
        let mut signal = signal.clone();
        let timeout = self.inner.config.write_timeout();

        tokio::select! {
            result = tokio::time::timeout(timeout, self.inner.remote.update(path, payload)) => {
                result.unwrap_or(Err(RemoteError::Timeout {
                    millis: timeout.as_millis() as u64,
                }))
            }
            _ = signal.aborted() => {
                info!("Write to {} cancelled", path);
                Err(RemoteError::Cancelled)
            }
        }
    }

    async fn remote_get(&self, path: &str) -> Result<Option<Document>, RemoteError> {
        let timeout = self.inner.config.write_timeout();
        tokio::time::timeout(timeout, self.inner.remote.get(path))
            .await
            .unwrap_or(Err(RemoteError::Timeout {
                millis: timeout.as_millis() as u64,
            }))
    }

    async fn remote_set(&self, path: &str, document: &Document) -> Result<(), RemoteError> {
        let timeout = self.inner.config.write_timeout();
        tokio::time::timeout(timeout, self.inner.remote.set(path, document))
            .await
            .unwrap_or(Err(RemoteError::Timeout {
                millis: timeout.as_millis() as u64,
            }))
    }
}

/// Background work spawned by `SyncOrchestrator::start`
///
/// Dropping it stops the tasks and unregisters the reconnect drain.
pub struct BackgroundTasks {
    monitor: ReachabilityMonitor,
    tasks: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn stop(self) {}
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.monitor.remove_reconnect(RECONNECT_KEY);
    }
}
