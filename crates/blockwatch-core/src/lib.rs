//! Monitoring core between `blockwatch-api` and the `blockwatch` binary.
//!
//! This crate owns the domain model and the per-tenant monitoring loop:
//!
//! - **[`ReconciliationEngine`]**: one poll-and-reconcile cycle per call.
//!   Queries the game server, diffs the roster, accrues player-seconds,
//!   persists, announces joins and brings the display channels in line.
//!
//! - **[`TaskSupervisor`]**: one tokio task per tenant, tracked in a
//!   generation-stamped [`TaskRegistry`]. Handles startup resume, cleanup
//!   and process-wide shutdown.
//!
//! - **[`CommandService`]**: parses prefixed chat messages into [`Command`]s,
//!   validates setup input and words every reply.
//!
//! - **Ports**: [`QueryClient`], [`DisplaySurface`] and [`TenantStore`] are
//!   injected as `Arc<dyn _>`; the adapters over `blockwatch-api`
//!   ([`DiscordSurface`], `MinecraftQuery`) and the stores ([`SqliteStore`],
//!   [`MemoryStore`]) live here too.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod query;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod surface;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandName, ParseError};
pub use config::MonitorConfig;
pub use engine::{CycleOutcome, ReconciliationEngine, StopReason, TaskState, TeardownReport};
pub use error::CoreError;
pub use query::{QueryClient, QueryError};
pub use service::{CommandContext, CommandService};
pub use store::{MemoryStore, SqliteStore, StoreError, TenantStore};
pub use supervisor::{ResumeReport, TaskRegistry, TaskSupervisor};
pub use surface::{DiscordSurface, DisplaySurface, SurfaceError};

pub use model::{
    ChannelFilter, ChannelHandle, ChannelId, DerivedState, DisplayKind, DisplayPermissions, ObservedState, Tenant,
    TenantId, UserId,
};
