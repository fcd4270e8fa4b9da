//! Durable mutation queue with a non-reentrant drain

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::QueueConfig;
use crate::error::{QueueError, RemoteError};
use crate::models::{MutationId, MutationState, Payload, PendingMutation};
use crate::remote::RemoteStore;
use crate::storage::LocalStore;

/// Local storage key owned by the queue
pub const QUEUE_STORAGE_KEY: &str = "pending_mutations";

/// On-disk representation of the queue
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedQueue {
    /// Sequence number for the next mutation id
    next_seq: u64,
    /// In creation order
    mutations: Vec<PendingMutation>,
}

/// Result of one drain pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrainReport {
    /// Confirmed by the remote store and removed
    pub succeeded: Vec<MutationId>,
    /// Dropped after exceeding their retry budget
    pub failed: Vec<MutationId>,
    /// The dropped mutations themselves, for reporting to the user
    pub exhausted: Vec<PendingMutation>,
    /// Failed this pass but kept for the next one
    pub retry_pending: usize,
    /// Outcomes that could not be written to local storage; those
    /// mutations stay queued unchanged and are replayed next pass
    pub unpersisted: Vec<MutationId>,
    /// Another drain was already running; nothing was done
    pub skipped: bool,
}

impl DrainReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    /// Whether at least one write was attempted and none succeeded
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty()
            && (self.retry_pending > 0 || !self.failed.is_empty() || !self.unpersisted.is_empty())
    }
}

/// Resets the in-progress flag when a drain ends, however it ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Durable queue of pending remote writes
///
/// The whole queue is rewritten to local storage on every change, before
/// the changing call returns.
pub struct MutationQueue {
    store: Arc<dyn LocalStore>,
    config: QueueConfig,
    state: Mutex<PersistedQueue>,
    draining: AtomicBool,
}

impl MutationQueue {
    /// Open the queue, rehydrating anything persisted by a previous run
    pub fn open(store: Arc<dyn LocalStore>, config: QueueConfig) -> Result<Self, QueueError> {
        let state = match store.get(QUEUE_STORAGE_KEY).map_err(QueueError::Storage)? {
            Some(json) => serde_json::from_str::<PersistedQueue>(&json).map_err(|e| {
                QueueError::Corrupt {
                    message: e.to_string(),
                }
            })?,
            None => PersistedQueue::default(),
        };

        if !state.mutations.is_empty() {
            info!("Rehydrated {} pending mutations", state.mutations.len());
        }

        Ok(Self {
            store,
            config,
            state: Mutex::new(state),
            draining: AtomicBool::new(false),
        })
    }

    /// Append a mutation and persist the queue before returning its id
    ///
    /// If persisting fails the mutation is not kept.
    pub fn enqueue(&self, target_path: &str, payload: Payload) -> Result<MutationId, QueueError> {
        let mut state = self.state.lock().unwrap();

        let id = MutationId::from_sequence(state.next_seq);
        state.next_seq += 1;
        state.mutations.push(PendingMutation::new(
            id.clone(),
            target_path,
            payload,
            self.config.max_retries,
        ));

        if let Err(e) = self.persist(&state) {
            state.mutations.pop();
            state.next_seq -= 1;
            error!("Failed to persist mutation for {}: {}", target_path, e);
            return Err(e);
        }

        debug!(
            "Enqueued {} for {} ({} pending)",
            id,
            target_path,
            state.mutations.len()
        );
        Ok(id)
    }

    /// Total queued mutations across all targets
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().mutations.len()
    }

    /// Copy of the queued mutations, in creation order
    pub fn pending(&self) -> Vec<PendingMutation> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Replay queued mutations against the remote store
    ///
    /// Non-reentrant: a call made while another drain is running returns an
    /// empty, `skipped` report at once. Mutations are replayed in creation
    /// order per target; the first failure for a target stops that target
    /// for this pass so later writes never overtake it. Failed mutations are
    /// not retried within the same pass.
    ///
    /// A local storage failure while recording an outcome leaves that
    /// mutation queued as it was (in memory and on disk), stops its target
    /// and is listed in `unpersisted`; the rest of the report is kept.
    pub async fn drain(&self, remote: &dyn RemoteStore) -> Result<DrainReport, QueueError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already in progress, skipping");
            return Ok(DrainReport::skipped());
        }
        let _guard = DrainGuard(&self.draining);

        let batch = self.pending();
        let mut report = DrainReport::default();
        if batch.is_empty() {
            return Ok(report);
        }

        info!("Draining {} pending mutations", batch.len());
        let timeout = self.config.write_timeout();

        for (target, mutations) in group_by_target(batch) {
            for mutation in mutations {
                debug!("{} -> {:?}", mutation.id, MutationState::Draining);

                let result = match tokio::time::timeout(
                    timeout,
                    remote.update(&target, &mutation.payload),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::Timeout {
                        millis: timeout.as_millis() as u64,
                    }),
                };

                match result {
                    Ok(()) => {
                        if let Err(store_err) = self.remove(&mutation.id) {
                            // Still on disk, so later writes for this target
                            // must not overtake it
                            error!(
                                "Could not record {} as applied, keeping it queued: {}",
                                mutation.id, store_err
                            );
                            report.unpersisted.push(mutation.id);
                            break;
                        }
                        debug!("{} -> {:?}", mutation.id, MutationState::Succeeded);
                        report.succeeded.push(mutation.id);
                    }
                    Err(e) => {
                        let outcome = match self.record_failure(&mutation.id) {
                            Ok(outcome) => outcome,
                            Err(store_err) => {
                                error!(
                                    "Could not record failed attempt of {}: {}",
                                    mutation.id, store_err
                                );
                                report.unpersisted.push(mutation.id);
                                break;
                            }
                        };
                        match outcome {
                            Some((MutationState::Exhausted, dropped)) => {
                                error!(
                                    "Dropping {} for {} after {} failed attempts: {}",
                                    dropped.id, target, dropped.retry_count, e
                                );
                                report.failed.push(dropped.id.clone());
                                report.exhausted.push(dropped);
                            }
                            Some((state, kept)) => {
                                warn!(
                                    "Write {} for {} failed (attempt {}/{}), {:?}: {}",
                                    kept.id,
                                    target,
                                    kept.retry_count,
                                    kept.max_retries + 1,
                                    state,
                                    e
                                );
                                report.retry_pending += 1;
                            }
                            None => {}
                        }
                        break;
                    }
                }
            }
        }

        info!(
            "Drain finished: {} succeeded, {} dropped, {} awaiting retry, {} unrecorded, {} still queued",
            report.succeeded.len(),
            report.failed.len(),
            report.retry_pending,
            report.unpersisted.len(),
            self.pending_count()
        );
        Ok(report)
    }

    fn persist(&self, state: &PersistedQueue) -> Result<(), QueueError> {
        let json = serde_json::to_string(state)?;
        self.store
            .set(QUEUE_STORAGE_KEY, &json)
            .map_err(QueueError::Storage)
    }

    /// Persist `mutations` as the new queue, then adopt it in memory
    fn commit(
        &self,
        state: &mut PersistedQueue,
        mutations: Vec<PendingMutation>,
    ) -> Result<(), QueueError> {
        let candidate = PersistedQueue {
            next_seq: state.next_seq,
            mutations,
        };
        self.persist(&candidate)?;
        state.mutations = candidate.mutations;
        Ok(())
    }

    fn remove(&self, id: &MutationId) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        let remaining = state
            .mutations
            .iter()
            .filter(|m| &m.id != id)
            .cloned()
            .collect();
        self.commit(&mut state, remaining)
    }

    /// Count a failed attempt; drops the mutation once exhausted.
    /// Returns the new state with the updated mutation. Nothing changes
    /// unless the new queue was persisted.
    fn record_failure(
        &self,
        id: &MutationId,
    ) -> Result<Option<(MutationState, PendingMutation)>, QueueError> {
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.mutations.iter().position(|m| &m.id == id) else {
            return Ok(None);
        };

        let mut mutations = state.mutations.clone();
        let next = mutations[pos].record_failure();
        let updated = if next.is_terminal() {
            mutations.remove(pos)
        } else {
            mutations[pos].clone()
        };
        self.commit(&mut state, mutations)?;
        Ok(Some((next, updated)))
    }
}

/// Group mutations by target, keeping creation order within each group
fn group_by_target(mutations: Vec<PendingMutation>) -> Vec<(String, Vec<PendingMutation>)> {
    let mut groups: Vec<(String, Vec<PendingMutation>)> = Vec::new();
    for mutation in mutations {
        match groups.iter_mut().find(|(t, _)| *t == mutation.target_path) {
            Some((_, group)) => group.push(mutation),
            None => groups.push((mutation.target_path.clone(), vec![mutation])),
        }
    }
    groups
}
