// ── Command service ──
//
// Executes chat commands against the store, the surface and the
// supervisor, and words the reply. Every user-facing string lives here.

use std::sync::Arc;

use tracing::{info, warn};

use crate::command::{Command, ParseError, help_text};
use crate::engine::{TeardownReport, format_duration};
use crate::error::CoreError;
use crate::model::{ChannelId, Tenant, TenantId, UserId};
use crate::query::{QueryClient, QueryError};
use crate::store::TenantStore;
use crate::supervisor::TaskSupervisor;
use crate::surface::DisplaySurface;
use crate::validate::{ServerTarget, check_public, parse_target};

const NO_SETUP: &str = "There is no server query set up. Run the `setup` command to get started.";
const NOT_ADMIN: &str = "You lack permissions: Administrator.";
const INTERNAL: &str = "Something went wrong handling that command. Please try again later.";

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandContext {
    pub tenant: TenantId,
    pub channel: ChannelId,
    pub author: UserId,
}

pub struct CommandService {
    supervisor: TaskSupervisor,
    prefix: String,
}

impl CommandService {
    pub fn new(supervisor: TaskSupervisor, prefix: impl Into<String>) -> Self {
        Self {
            supervisor,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn store(&self) -> &Arc<dyn TenantStore> {
        self.supervisor.engine().store()
    }

    fn surface(&self) -> &Arc<dyn DisplaySurface> {
        self.supervisor.engine().surface()
    }

    fn query(&self) -> &Arc<dyn QueryClient> {
        self.supervisor.engine().query_client()
    }

    /// Handle a raw chat message. `None` if it was not a command.
    pub async fn handle_text(&self, ctx: CommandContext, content: &str) -> Option<String> {
        let prefix = &self.prefix;
        let reply = match Command::parse(prefix, content)? {
            Err(ParseError::Unknown { name }) => {
                format!("Command \"{name}\" does not exist. Use `{prefix}help` for available commands.")
            }
            Err(ParseError::MissingArgument { command }) => {
                let name = command.as_str();
                format!("Command \"{name}\" is missing required arguments. Use `{prefix}help {name}` for details.")
            }
            Ok(command) => {
                let name = command.name();
                self.execute(ctx, command).await.unwrap_or_else(|e| {
                    warn!(tenant = %ctx.tenant, command = name.as_str(), error = %e, "command failed");
                    INTERNAL.to_owned()
                })
            }
        };
        Some(reply)
    }

    /// Run a parsed command and produce its reply.
    pub async fn execute(&self, ctx: CommandContext, command: Command) -> Result<String, CoreError> {
        if command.name().requires_admin() && !self.surface().is_administrator(ctx.tenant, ctx.author).await? {
            return Ok(NOT_ADMIN.to_owned());
        }

        match command {
            Command::Setup {
                address,
                port,
                announce_channel,
            } => {
                self.setup(ctx, &address, port.as_deref(), announce_channel.as_deref())
                    .await
            }
            Command::Cleanup => self.cleanup(ctx).await,
            Command::Announce { channel } => self.announce(ctx, &channel).await,
            Command::NoAnnounce => self.no_announce(ctx).await,
            Command::ShowHours => self.set_hours(ctx, true).await,
            Command::NoHours => self.set_hours(ctx, false).await,
            Command::Status => self.status(ctx).await,
            Command::Players => self.players(ctx).await,
            Command::LastQuery => self.last_query(ctx).await,
            Command::Help { topic } => Ok(help_text(&self.prefix, topic.as_deref())),
        }
    }

    // ── Admin commands ───────────────────────────────────────────────

    async fn setup(
        &self,
        ctx: CommandContext,
        address: &str,
        port: Option<&str>,
        announce: Option<&str>,
    ) -> Result<String, CoreError> {
        let config = self.supervisor.engine().config();

        let target = match parse_target(address, port, config.default_port) {
            Ok(target) => target,
            Err(e) => return Ok(e.to_string()),
        };
        if let Some(rejection) = self.reject_private(&target).await {
            return Ok(rejection);
        }

        let observed = match self.query().query(&target.host, target.port, config.query_timeout).await {
            Ok(observed) => observed,
            Err(QueryError::TimedOut) => return Ok("Setup query error, query port enabled?".to_owned()),
            Err(QueryError::Protocol(_)) => {
                return Ok("Setup query error, the server sent an unexpected reply.".to_owned());
            }
            Err(QueryError::ConnectionRefused { .. } | QueryError::Unresolvable { .. }) => {
                return Ok("Setup query failed, server down?".to_owned());
            }
        };

        let announce_channel = match announce {
            Some(raw) => match self.resolve_channel(ctx.tenant, raw).await? {
                Some(channel) => Some(channel),
                None => return Ok(format!("Channel {raw} does not exist.")),
            },
            None => None,
        };

        // A cycle in flight would otherwise save the old server's state over ours.
        let cycle = self.supervisor.hold_cycles(ctx.tenant).await;
        let existing = self.store().get_tenant(ctx.tenant).await?;
        let tenant = Tenant {
            id: ctx.tenant,
            address: target.host.clone(),
            port: target.port,
            announce_enabled: announce_channel.is_some(),
            announce_channel,
            show_hours: existing.as_ref().is_some_and(|t| t.show_hours),
        };
        self.store().upsert_tenant(&tenant).await?;

        let target_changed = existing
            .as_ref()
            .is_none_or(|old| old.address != tenant.address || old.port != tenant.port);
        let mut state = self.store().derived_state(ctx.tenant).await?;
        state.roster = observed.roster;
        if target_changed {
            state.last_query_at = None;
        }
        self.store().save_derived_state(ctx.tenant, &state).await?;
        drop(cycle);

        let started = self.supervisor.start(ctx.tenant);
        info!(
            tenant = %ctx.tenant,
            address = %tenant.address,
            port = tenant.port,
            started,
            "server query set up"
        );

        Ok(format!(
            "Setup new server query with IP: {}\n{}",
            tenant.address,
            announce_reply(&tenant)
        ))
    }

    /// Reply text if `target` or anything it resolves to is private.
    async fn reject_private(&self, target: &ServerTarget) -> Option<String> {
        if let Err(e) = check_public(target, &[]) {
            return Some(e.to_string());
        }
        if target.ip().is_some() {
            return None;
        }
        match self.query().resolve(&target.host, target.port).await {
            Ok(resolved) => check_public(target, &resolved).err().map(|e| e.to_string()),
            Err(_) => Some("Setup query failed, server down?".to_owned()),
        }
    }

    async fn resolve_channel(&self, tenant: TenantId, raw: &str) -> Result<Option<ChannelId>, CoreError> {
        let Some(id) = ChannelId::parse_mention(raw) else {
            return Ok(None);
        };
        Ok(self.surface().resolve_channel(tenant, id).await?)
    }

    async fn cleanup(&self, ctx: CommandContext) -> Result<String, CoreError> {
        let tenant = self.store().get_tenant(ctx.tenant).await?;
        let report = self.supervisor.cleanup(ctx.tenant).await?;

        Ok(match tenant {
            Some(tenant) if !tenant.is_inert() => cleanup_reply(&tenant.address, &report),
            _ => NO_SETUP.to_owned(),
        })
    }

    async fn announce(&self, ctx: CommandContext, raw: &str) -> Result<String, CoreError> {
        let Some(channel) = self.resolve_channel(ctx.tenant, raw).await? else {
            return Ok(format!("Channel {raw} does not exist."));
        };
        self.update(ctx.tenant, |tenant| {
            tenant.announce_enabled = true;
            tenant.announce_channel = Some(channel);
        })
        .await
        .map(|updated| updated.map_or_else(|| NO_SETUP.to_owned(), |t| announce_reply(&t)))
    }

    async fn no_announce(&self, ctx: CommandContext) -> Result<String, CoreError> {
        self.update(ctx.tenant, |tenant| {
            tenant.announce_enabled = false;
            tenant.announce_channel = None;
        })
        .await
        .map(|updated| updated.map_or_else(|| NO_SETUP.to_owned(), |t| announce_reply(&t)))
    }

    async fn set_hours(&self, ctx: CommandContext, show: bool) -> Result<String, CoreError> {
        let updated = self.update(ctx.tenant, |tenant| tenant.show_hours = show).await?;
        Ok(match updated {
            Some(t) if t.show_hours => format!("Displaying total player hours for {}.", t.address),
            Some(t) => format!("Not displaying total player hours for {}.", t.address),
            None => NO_SETUP.to_owned(),
        })
    }

    /// Apply `change` to the stored tenant, if there is one.
    async fn update(&self, id: TenantId, change: impl FnOnce(&mut Tenant)) -> Result<Option<Tenant>, CoreError> {
        let Some(mut tenant) = self.configured(id).await? else {
            return Ok(None);
        };
        change(&mut tenant);
        self.store().upsert_tenant(&tenant).await?;
        Ok(Some(tenant))
    }

    // ── Read-only commands ───────────────────────────────────────────

    async fn configured(&self, id: TenantId) -> Result<Option<Tenant>, CoreError> {
        Ok(self.store().get_tenant(id).await?.filter(|t| !t.is_inert()))
    }

    async fn status(&self, ctx: CommandContext) -> Result<String, CoreError> {
        let Some(tenant) = self.configured(ctx.tenant).await? else {
            return Ok(NO_SETUP.to_owned());
        };
        let timeout = self.supervisor.engine().config().query_timeout;
        let observed = match self.query().query(&tenant.address, tenant.port, timeout).await {
            Ok(observed) => observed,
            Err(e) => return Ok(unreachable_reply(&tenant, &e)),
        };
        let seconds = self.store().derived_state(ctx.tenant).await?.accumulated_seconds;

        Ok(format!(
            "```Status:\n  {}\n  {}\n\n  Players: {}/{}\n  Total Player Time: {}```",
            tenant.address,
            observed.motd,
            observed.online,
            observed.capacity,
            format_duration(seconds)
        ))
    }

    async fn players(&self, ctx: CommandContext) -> Result<String, CoreError> {
        let Some(tenant) = self.configured(ctx.tenant).await? else {
            return Ok(NO_SETUP.to_owned());
        };
        let timeout = self.supervisor.engine().config().query_timeout;
        let observed = match self.query().query(&tenant.address, tenant.port, timeout).await {
            Ok(observed) => observed,
            Err(e) => return Ok(unreachable_reply(&tenant, &e)),
        };

        let mut text = String::from("```Online Players:");
        for name in &observed.roster {
            text.push_str("\n  ");
            text.push_str(name);
        }
        text.push_str("```");
        Ok(text)
    }

    async fn last_query(&self, ctx: CommandContext) -> Result<String, CoreError> {
        let Some(tenant) = self.configured(ctx.tenant).await? else {
            return Ok(NO_SETUP.to_owned());
        };
        let state = self.store().derived_state(ctx.tenant).await?;
        Ok(match state.last_query_at {
            Some(at) => format!("I last queried {} at {} UTC", tenant.address, at.format("%Y-%m-%d %H:%M:%S")),
            None => format!("I have not queried {} yet.", tenant.address),
        })
    }
}

// ── Replies ──────────────────────────────────────────────────────────

fn announce_reply(tenant: &Tenant) -> String {
    match tenant.announce_target() {
        Some(channel) => format!("Announcing when a player joins {} in <#{channel}>.", tenant.address),
        None => format!("Not announcing when a player joins {}.", tenant.address),
    }
}

fn cleanup_reply(address: &str, report: &TeardownReport) -> String {
    let channels = if report.channels_clean() {
        "and removed my status channels."
    } else {
        "but failed to remove my status channels."
    };
    format!("Cleaned up! Removed {address} querier, deleted this server's data from my storage, {channels}")
}

fn unreachable_reply(tenant: &Tenant, err: &QueryError) -> String {
    match err {
        QueryError::TimedOut => format!("Query to {} timed out, query port enabled?", tenant.address),
        _ => format!("Could not query {}, server down?", tenant.address),
    }
}
