//! `blockwatch tenants`: inspect and remove stored tenants.

use std::fmt::Write as _;
use std::sync::Arc;

use blockwatch_api::MinecraftQuery;
use blockwatch_core::engine::{display_hours, format_duration};
use blockwatch_core::{
    DerivedState, DiscordSurface, ReconciliationEngine, SqliteStore, Tenant, TenantId, TenantStore, TeardownReport,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{GlobalOpts, TenantsArgs, TenantsCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── View model ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TenantView {
    #[serde(flatten)]
    tenant: Tenant,
    roster: Vec<String>,
    last_query_at: Option<DateTime<Utc>>,
    accumulated_seconds: u64,
}

impl TenantView {
    fn new(tenant: Tenant, state: DerivedState) -> Self {
        Self {
            tenant,
            roster: state.roster.into_iter().collect(),
            last_query_at: state.last_query_at,
            accumulated_seconds: state.accumulated_seconds,
        }
    }

    fn last_query(&self) -> String {
        self.last_query_at
            .map_or_else(|| "never".to_owned(), |at| at.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    fn announce(&self) -> String {
        match (self.tenant.announce_enabled, self.tenant.announce_channel) {
            (true, Some(channel)) => channel.to_string(),
            _ => "off".to_owned(),
        }
    }
}

#[derive(Tabled)]
struct TenantRow {
    #[tabled(rename = "Guild")]
    id: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Announce")]
    announce: String,
    #[tabled(rename = "Player Hrs")]
    hours: String,
    #[tabled(rename = "Last Query (UTC)")]
    last_query: String,
}

impl From<&TenantView> for TenantRow {
    fn from(v: &TenantView) -> Self {
        let hours = display_hours(v.accumulated_seconds).to_string();
        Self {
            id: v.tenant.id.to_string(),
            address: format!("{}:{}", v.tenant.address, v.tenant.port),
            announce: v.announce(),
            hours: if v.tenant.show_hours { hours } else { format!("{hours} (hidden)") },
            last_query: v.last_query(),
        }
    }
}

fn detail(v: &TenantView) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Guild:          {}", v.tenant.id);
    let _ = writeln!(out, "Address:        {}:{}", v.tenant.address, v.tenant.port);
    let _ = writeln!(out, "Announce:       {}", v.announce());
    let _ = writeln!(out, "Show hours:     {}", v.tenant.show_hours);
    let _ = writeln!(out, "Player time:    {}", format_duration(v.accumulated_seconds));
    let _ = writeln!(out, "Last query:     {}", v.last_query());
    let roster = if v.roster.is_empty() {
        "-".to_owned()
    } else {
        v.roster.join(", ")
    };
    let _ = write!(out, "Last roster:    {roster}");
    out
}

// ── Handler ─────────────────────────────────────────────────────────

async fn view(store: &SqliteStore, tenant: Tenant) -> Result<TenantView, CliError> {
    let state = store.derived_state(tenant.id).await?;
    Ok(TenantView::new(tenant, state))
}

pub async fn handle(args: TenantsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = util::load_config(global)?;
    let store = util::open_store(&cfg)?;

    match args.command {
        TenantsCommand::List => {
            let mut views = Vec::new();
            for tenant in store.list_tenants().await? {
                views.push(view(&store, tenant).await?);
            }
            let out = output::render_list(&global.output, &views, |v| TenantRow::from(v), |v| v.tenant.id.to_string())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        TenantsCommand::Show { id } => {
            let id = util::parse_tenant_id(&id)?;
            let tenant = find(&store, id).await?;
            let v = view(&store, tenant).await?;
            let out = output::render_single(&global.output, &v, detail, |v| v.tenant.id.to_string())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        TenantsCommand::Remove { id, local_only } => {
            let id = util::parse_tenant_id(&id)?;
            let tenant = find(&store, id).await?;
            let prompt = if local_only {
                format!("Forget {} for guild {id}? Its channels stay in Discord.", tenant.address)
            } else {
                format!("Remove {} from guild {id} and delete its display channels?", tenant.address)
            };
            if !util::confirm(&prompt, "tenants remove", global.yes)? {
                return Ok(());
            }

            if local_only {
                store.delete_tenant(id).await?;
                if !global.quiet {
                    eprintln!("Tenant {id} removed from the local store");
                }
                return Ok(());
            }

            let report = teardown(&cfg, store, id).await?;
            if !global.quiet {
                eprintln!("{}", summarize(id, &report));
            }
            Ok(())
        }
    }
}

async fn find(store: &SqliteStore, id: TenantId) -> Result<Tenant, CliError> {
    store
        .get_tenant(id)
        .await?
        .ok_or_else(|| CliError::TenantNotFound { id: id.to_string() })
}

async fn teardown(cfg: &blockwatch_config::Config, store: SqliteStore, id: TenantId) -> Result<TeardownReport, CliError> {
    let token = blockwatch_config::resolve_token(&cfg.discord)?;
    let client = util::discord_client(cfg, &token)?;
    let engine = ReconciliationEngine::new(
        Arc::new(MinecraftQuery::new()),
        Arc::new(DiscordSurface::new(client)),
        Arc::new(store),
        cfg.monitor.to_monitor_config()?,
    );
    Ok(engine.teardown(id).await?)
}

fn summarize(id: TenantId, report: &TeardownReport) -> String {
    if report.channels_clean() {
        format!("Tenant {id} removed, {} display channel(s) deleted", report.channels_removed)
    } else if report.channels_listed {
        format!(
            "Tenant {id} removed; {} display channel(s) could not be deleted and need manual cleanup",
            report.channels_failed
        )
    } else {
        format!("Tenant {id} removed; the guild's channels could not be read, so none were deleted")
    }
}
