// ── Reconciliation engine ──
//
// One poll-and-reconcile cycle for one tenant: query the server, diff the
// roster, accrue player-seconds, persist, announce joins, then bring the
// display channels in line with the rendered targets. Also owns teardown,
// the path that removes a tenant's channels and state.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::CoreError;
use crate::model::{
    ChannelFilter, ChannelHandle, ChannelId, DerivedState, DisplayKind, DisplayPermissions, ObservedState, Tenant,
    TenantId,
};
use crate::query::{QueryClient, QueryError};
use crate::store::{StoreError, TenantStore};
use crate::surface::{DisplaySurface, SurfaceError};

// ── Outcomes ─────────────────────────────────────────────────────────

/// What the task loop should do after a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue { wait: Duration },
    Stopped(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The tenant's configuration is gone (cleanup ran).
    TenantRemoved,
    /// The bot can no longer see the tenant's space; state was torn down.
    SpaceNotVisible,
    /// A display change was refused; state was torn down.
    Forbidden,
}

/// Per-task memory carried between cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskState {
    /// Whether the previous cycle of this task queried successfully.
    /// Starts true so a restart still accrues the gap since the last
    /// persisted query.
    pub continuous: bool,
}

impl Default for TaskState {
    fn default() -> Self {
        Self { continuous: true }
    }
}

/// Result of tearing a tenant down.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Whether any configuration or derived state was stored.
    pub had_state: bool,
    /// Whether the space's channels could be listed at all.
    pub channels_listed: bool,
    pub channels_removed: usize,
    pub channels_failed: usize,
}

impl TeardownReport {
    pub fn channels_clean(&self) -> bool {
        self.channels_listed && self.channels_failed == 0
    }
}

// ── Pure cycle helpers ───────────────────────────────────────────────

/// Names in `current` that were not in `previous`.
pub fn joined(previous: &BTreeSet<String>, current: &BTreeSet<String>) -> Vec<String> {
    current.difference(previous).cloned().collect()
}

/// Derived state after a successful query at `now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accrual {
    pub state: DerivedState,
    /// Whether this cycle contributed an interval to the counter.
    pub accrued: bool,
}

pub fn accrue(previous: &DerivedState, observed: &ObservedState, now: DateTime<Utc>, continuous: bool) -> Accrual {
    let interval_ms = previous
        .last_query_at
        .filter(|_| continuous)
        .map(|last| u64::try_from((now - last).num_milliseconds()).unwrap_or(0));

    // Whole seconds go to the counter; the sub-second rest carries over.
    let (accumulated_seconds, carry_millis) = match interval_ms {
        Some(ms) => {
            let roster = u64::try_from(observed.roster.len()).unwrap_or(u64::MAX);
            let total = roster.saturating_mul(ms).saturating_add(previous.carry_millis);
            (
                previous.accumulated_seconds.saturating_add(total / 1000),
                total % 1000,
            )
        }
        None => (previous.accumulated_seconds, previous.carry_millis),
    };

    Accrual {
        state: DerivedState {
            roster: observed.roster.clone(),
            last_query_at: Some(now),
            accumulated_seconds,
            carry_millis,
        },
        accrued: interval_ms.is_some(),
    }
}

/// Whole player-hours, with exact halves rounded to the even hour.
pub fn display_hours(seconds: u64) -> u64 {
    let hours = seconds / 3600;
    match (seconds % 3600).cmp(&1800) {
        Ordering::Less => hours,
        Ordering::Greater => hours + 1,
        Ordering::Equal => hours + hours % 2,
    }
}

/// `H:MM:SS` with unbounded hours.
pub fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}

/// Desired state of one display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayTarget {
    /// Ensure exactly one channel with this name exists.
    Set(String),
    /// Leave whatever exists; never create.
    Keep,
    /// Remove every channel of this kind.
    Remove,
}

/// What the latest query produced, as far as rendering is concerned.
#[derive(Debug, Clone, Copy)]
pub enum PollView<'a> {
    Observed {
        observed: &'a ObservedState,
        accumulated_seconds: u64,
        accrued: bool,
    },
    Failed,
}

pub fn render_target(kind: DisplayKind, tenant: &Tenant, poll: PollView<'_>) -> DisplayTarget {
    match (kind, poll) {
        (DisplayKind::Address, _) => DisplayTarget::Set(format!("{}{}", kind.prefix(), tenant.address)),
        (DisplayKind::Players, PollView::Observed { observed, .. }) => DisplayTarget::Set(format!(
            "{}{}/{}",
            kind.prefix(),
            observed.online,
            observed.capacity
        )),
        (DisplayKind::Hours, _) if !tenant.show_hours => DisplayTarget::Remove,
        (
            DisplayKind::Hours,
            PollView::Observed {
                accumulated_seconds,
                accrued: true,
                ..
            },
        ) => DisplayTarget::Set(format!("{}{}", kind.prefix(), display_hours(accumulated_seconds))),
        (DisplayKind::Players | DisplayKind::Hours, _) => DisplayTarget::Keep,
    }
}

// ── Engine ───────────────────────────────────────────────────────────

/// Why a cycle ended early.
enum Fault {
    Forbidden(SurfaceError),
    Transient(CoreError),
}

impl From<SurfaceError> for Fault {
    fn from(err: SurfaceError) -> Self {
        if err.is_forbidden() {
            Self::Forbidden(err)
        } else {
            Self::Transient(err.into())
        }
    }
}

impl From<StoreError> for Fault {
    fn from(err: StoreError) -> Self {
        Self::Transient(err.into())
    }
}

pub struct ReconciliationEngine {
    query: Arc<dyn QueryClient>,
    surface: Arc<dyn DisplaySurface>,
    store: Arc<dyn TenantStore>,
    config: MonitorConfig,
}

impl ReconciliationEngine {
    pub fn new(
        query: Arc<dyn QueryClient>,
        surface: Arc<dyn DisplaySurface>,
        store: Arc<dyn TenantStore>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            query,
            surface,
            store,
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    pub fn surface(&self) -> &Arc<dyn DisplaySurface> {
        &self.surface
    }

    pub fn query_client(&self) -> &Arc<dyn QueryClient> {
        &self.query
    }

    /// Run one cycle stamped with the current time.
    pub async fn run_cycle(&self, id: TenantId, task: &mut TaskState) -> CycleOutcome {
        self.run_cycle_at(id, task, Utc::now()).await
    }

    /// Run one cycle as if it happened at `now`.
    pub async fn run_cycle_at(&self, id: TenantId, task: &mut TaskState, now: DateTime<Utc>) -> CycleOutcome {
        match self.cycle(id, task, now).await {
            Ok(outcome) => outcome,
            Err(Fault::Transient(e)) => {
                warn!(tenant = %id, error = %e, "cycle aborted, retrying after the poll interval");
                CycleOutcome::Continue {
                    wait: self.config.poll_interval,
                }
            }
            Err(Fault::Forbidden(e)) => {
                warn!(
                    tenant = %id,
                    error = %e,
                    "missing permission to manage display channels, tearing down"
                );
                self.teardown_logged(id).await;
                CycleOutcome::Stopped(StopReason::Forbidden)
            }
        }
    }

    async fn cycle(&self, id: TenantId, task: &mut TaskState, now: DateTime<Utc>) -> Result<CycleOutcome, Fault> {
        if !self.surface.space_visible(id).await? {
            info!(tenant = %id, "space no longer visible, cleaning up");
            self.teardown_logged(id).await;
            return Ok(CycleOutcome::Stopped(StopReason::SpaceNotVisible));
        }

        let Some(tenant) = self.store.get_tenant(id).await? else {
            debug!(tenant = %id, "tenant removed, stopping");
            return Ok(CycleOutcome::Stopped(StopReason::TenantRemoved));
        };

        if tenant.is_inert() {
            return Ok(CycleOutcome::Continue {
                wait: self.config.poll_interval,
            });
        }

        let previous = self.store.derived_state(id).await?;
        let result = self
            .query
            .query(&tenant.address, tenant.port, self.config.query_timeout)
            .await;

        let changed = match result {
            Ok(observed) => {
                let accrual = accrue(&previous, &observed, now, task.continuous);
                task.continuous = true;

                debug!(
                    tenant = %id,
                    address = %tenant.address,
                    online = observed.online,
                    capacity = observed.capacity,
                    accrued = accrual.accrued,
                    "query succeeded"
                );

                self.store.save_derived_state(id, &accrual.state).await?;

                if let Some(target) = tenant.announce_target() {
                    for name in joined(&previous.roster, &observed.roster) {
                        self.announce(&tenant, target, &name).await;
                    }
                }

                let poll = PollView::Observed {
                    observed: &observed,
                    accumulated_seconds: accrual.state.accumulated_seconds,
                    accrued: accrual.accrued,
                };
                self.reconcile_displays(&tenant, poll).await?
            }
            Err(e) => {
                task.continuous = false;
                log_query_failure(&tenant, &e);
                self.reconcile_displays(&tenant, PollView::Failed).await?
            }
        };

        let wait = if changed {
            self.config.cooldown
        } else {
            self.config.poll_interval
        };
        Ok(CycleOutcome::Continue { wait })
    }

    async fn announce(&self, tenant: &Tenant, target: ChannelId, name: &str) {
        let channel = match self.surface.resolve_channel(tenant.id, target).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                debug!(tenant = %tenant.id, channel = %target, "announce channel gone, skipping");
                return;
            }
            Err(e) => {
                warn!(tenant = %tenant.id, error = %e, "could not resolve announce channel");
                return;
            }
        };

        match self.surface.post_message(channel, &format!("{name} joined the game!")).await {
            Ok(()) => info!(tenant = %tenant.id, player = name, "announced join"),
            Err(e) => warn!(tenant = %tenant.id, player = name, error = %e, "could not announce join"),
        }
    }

    /// Bring every display in line with its target. Returns whether any
    /// channel was renamed.
    async fn reconcile_displays(&self, tenant: &Tenant, poll: PollView<'_>) -> Result<bool, SurfaceError> {
        let channels = self.surface.list_channels(tenant.id, &ChannelFilter::voice()).await?;
        let mut changed = false;

        for kind in DisplayKind::iter() {
            let existing: Vec<&ChannelHandle> = channels
                .iter()
                .filter(|c| DisplayKind::classify(&c.name) == Some(kind))
                .collect();

            let target = render_target(kind, tenant, poll);
            let keep = match target {
                DisplayTarget::Remove => 0,
                DisplayTarget::Set(_) | DisplayTarget::Keep => 1,
            };

            for extra in existing.iter().skip(keep) {
                debug!(tenant = %tenant.id, %kind, channel = %extra.id, "removing surplus display");
                self.surface.delete_channel(extra).await?;
            }

            let DisplayTarget::Set(name) = target else {
                continue;
            };

            match existing.first() {
                Some(current) if current.name == name => {}
                Some(current) => {
                    info!(tenant = %tenant.id, %kind, from = %current.name, to = %name, "display changed");
                    self.surface.rename_channel(current, &name).await?;
                    changed = true;
                }
                None => {
                    info!(tenant = %tenant.id, %kind, name = %name, "creating display");
                    self.surface
                        .create_display_channel(tenant.id, &name, &DisplayPermissions::default())
                        .await?;
                }
            }
        }

        Ok(changed)
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Remove every display channel and all stored state for `id`.
    ///
    /// Channel removal is best-effort. Idempotent.
    pub async fn teardown(&self, id: TenantId) -> Result<TeardownReport, CoreError> {
        let mut report = TeardownReport::default();

        match self.surface.list_channels(id, &ChannelFilter::voice()).await {
            Ok(channels) => {
                report.channels_listed = true;
                for channel in channels.iter().filter(|c| DisplayKind::classify(&c.name).is_some()) {
                    match self.surface.delete_channel(channel).await {
                        Ok(()) => report.channels_removed += 1,
                        Err(e) => {
                            warn!(tenant = %id, channel = %channel.id, error = %e, "could not delete display");
                            report.channels_failed += 1;
                        }
                    }
                }
            }
            Err(e) => debug!(tenant = %id, error = %e, "could not list channels for teardown"),
        }

        report.had_state = self.store.delete_tenant(id).await?;
        info!(
            tenant = %id,
            had_state = report.had_state,
            removed = report.channels_removed,
            failed = report.channels_failed,
            "tenant torn down"
        );
        Ok(report)
    }

    async fn teardown_logged(&self, id: TenantId) {
        if let Err(e) = self.teardown(id).await {
            warn!(tenant = %id, error = %e, "teardown failed");
        }
    }
}

fn log_query_failure(tenant: &Tenant, err: &QueryError) {
    match err {
        QueryError::TimedOut => debug!(tenant = %tenant.id, address = %tenant.address, "query timed out, server lagging?"),
        QueryError::ConnectionRefused { .. } | QueryError::Unresolvable { .. } => {
            debug!(tenant = %tenant.id, address = %tenant.address, error = %err, "cannot reach server, down?");
        }
        QueryError::Protocol(_) => warn!(tenant = %tenant.id, address = %tenant.address, error = %err, "bad query reply"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
