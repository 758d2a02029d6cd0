// ── Task supervisor ──
//
// Owns one long-lived monitoring task per tenant. Each registration hands
// out a fresh generation; a task keeps cycling only while its generation is
// still the registered one, so a stale task can never run beside a fresh
// one. Shutdown cancels every task at its next suspension point.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::engine::{CycleOutcome, ReconciliationEngine, TaskState, TeardownReport};
use crate::error::CoreError;
use crate::model::TenantId;

// ── Registry ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct Slot {
    generation: u64,
    /// Held for the duration of a cycle, a teardown, and a setup write so
    /// none of them interleave for the same tenant.
    cycle: Arc<Mutex<()>>,
}

/// Concurrent map of tenants with a running task.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: DashMap<TenantId, Slot>,
    next: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`, returning its generation. `None` if already registered.
    pub fn register(&self, id: TenantId) -> Option<u64> {
        match self.tasks.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let generation = self.next.fetch_add(1, Ordering::Relaxed) + 1;
                vacant.insert(Slot {
                    generation,
                    cycle: Arc::new(Mutex::new(())),
                });
                Some(generation)
            }
        }
    }

    fn take(&self, id: TenantId) -> Option<Slot> {
        self.tasks.remove(&id).map(|(_, slot)| slot)
    }

    /// Remove `id` only if it is still registered under `generation`.
    pub fn unregister_if(&self, id: TenantId, generation: u64) -> bool {
        self.tasks.remove_if(&id, |_, slot| slot.generation == generation).is_some()
    }

    pub fn contains(&self, id: TenantId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn is_current(&self, id: TenantId, generation: u64) -> bool {
        self.tasks.get(&id).is_some_and(|slot| slot.generation == generation)
    }

    fn cycle_lock(&self, id: TenantId, generation: u64) -> Option<Arc<Mutex<()>>> {
        self.tasks
            .get(&id)
            .filter(|slot| slot.generation == generation)
            .map(|slot| Arc::clone(&slot.cycle))
    }

    fn current_lock(&self, id: TenantId) -> Option<Arc<Mutex<()>>> {
        self.tasks.get(&id).map(|slot| Arc::clone(&slot.cycle))
    }

    /// Registered tenant ids, sorted.
    pub fn ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.tasks.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ── Supervisor ───────────────────────────────────────────────────────

/// Outcome of [`TaskSupervisor::resume_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResumeReport {
    pub started: usize,
    pub removed: usize,
}

/// Starts, stops, and tracks per-tenant monitoring tasks.
///
/// Cheaply cloneable; clones share the same registry and cancellation
/// token.
#[derive(Clone)]
pub struct TaskSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    engine: ReconciliationEngine,
    registry: TaskRegistry,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl TaskSupervisor {
    pub fn new(engine: ReconciliationEngine) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                engine,
                registry: TaskRegistry::new(),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.inner.engine
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    /// Start monitoring `id`. Returns `false` if a task is already running
    /// or the supervisor is shutting down.
    pub fn start(&self, id: TenantId) -> bool {
        if self.inner.cancel.is_cancelled() {
            return false;
        }
        let Some(generation) = self.inner.registry.register(id) else {
            return false;
        };

        debug!(tenant = %id, generation, "starting monitor task");
        self.inner.tracker.spawn(tenant_task(self.clone(), id, generation));
        true
    }

    /// Start a task for every persisted tenant whose space is still
    /// visible. Tenants whose space is gone are torn down.
    pub async fn resume_all(&self) -> Result<ResumeReport, CoreError> {
        let engine = &self.inner.engine;
        let mut report = ResumeReport::default();

        for tenant in engine.store().list_tenants().await? {
            match engine.surface().space_visible(tenant.id).await {
                Ok(false) => {
                    info!(tenant = %tenant.id, "space gone while offline, removing");
                    if let Err(e) = engine.teardown(tenant.id).await {
                        warn!(tenant = %tenant.id, error = %e, "teardown failed");
                    }
                    report.removed += 1;
                }
                visible => {
                    if let Err(e) = visible {
                        warn!(tenant = %tenant.id, error = %e, "visibility check failed, starting anyway");
                    }
                    if self.start(tenant.id) {
                        report.started += 1;
                    }
                }
            }
        }

        info!(started = report.started, removed = report.removed, "monitor tasks resumed");
        Ok(report)
    }

    /// Stop the task for `id` (if any) and tear the tenant down.
    pub async fn cleanup(&self, id: TenantId) -> Result<TeardownReport, CoreError> {
        let slot = self.inner.registry.take(id);
        let _cycle = match &slot {
            Some(slot) => Some(slot.cycle.lock().await),
            None => None,
        };
        self.inner.engine.teardown(id).await
    }

    /// Wait for the running cycle of `id`, if any, and keep the next one
    /// from starting until the guard drops. `None` when no task is
    /// registered.
    pub async fn hold_cycles(&self, id: TenantId) -> Option<OwnedMutexGuard<()>> {
        let lock = self.inner.registry.current_lock(id)?;
        Some(lock.lock_owned().await)
    }

    /// Tenant ids with a running task.
    pub fn running(&self) -> Vec<TenantId> {
        self.inner.registry.ids()
    }

    pub fn is_running(&self, id: TenantId) -> bool {
        self.inner.registry.contains(id)
    }

    /// Cancel every task and wait for all of them to exit.
    pub async fn shutdown(&self) {
        info!(tasks = self.inner.registry.len(), "stopping monitor tasks");
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

/// One tenant's monitoring loop.
async fn tenant_task(supervisor: TaskSupervisor, id: TenantId, generation: u64) {
    let inner = &supervisor.inner;
    let mut state = TaskState::default();

    loop {
        let Some(lock) = inner.registry.cycle_lock(id, generation) else {
            debug!(tenant = %id, "task unregistered, exiting");
            break;
        };

        let outcome = {
            let _cycle = lock.lock().await;
            if !inner.registry.is_current(id, generation) {
                break;
            }
            tokio::select! {
                biased;
                () = inner.cancel.cancelled() => break,
                outcome = inner.engine.run_cycle(id, &mut state) => outcome,
            }
        };

        let wait = match outcome {
            CycleOutcome::Continue { wait } => wait,
            CycleOutcome::Stopped(reason) => {
                info!(tenant = %id, ?reason, "monitor task stopped");
                inner.registry.unregister_if(id, generation);
                break;
            }
        };

        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
    }
}
