//! `blockwatch run`: wire the adapters together and serve the gateway.

use std::sync::Arc;

use blockwatch_api::MinecraftQuery;
use blockwatch_api::discord::gateway::intents;
use blockwatch_api::discord::{GatewayHandle, ReconnectConfig};
use blockwatch_core::{
    CommandService, CoreError, DiscordSurface, MemoryStore, ReconciliationEngine, TaskSupervisor, TenantStore,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;
use crate::runtime::BotRuntime;

use super::util;

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = util::load_config(global)?;
    let monitor = cfg.monitor.to_monitor_config()?;
    let prefix = args.prefix.unwrap_or_else(|| cfg.discord.command_prefix.clone());
    if prefix.trim().is_empty() {
        return Err(CliError::Validation {
            field: "prefix".into(),
            reason: "must not be empty".into(),
        });
    }

    let token = blockwatch_config::resolve_token(&cfg.discord)?;
    let client = util::discord_client(&cfg, &token)?;
    let me = client
        .get_current_user()
        .await
        .map_err(|e| CliError::from(CoreError::from(e)))?;
    info!(user = %me.username, id = %me.id, "authenticated");

    let store: Arc<dyn TenantStore> = if args.ephemeral {
        warn!("ephemeral mode: tenants are kept in memory only");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(util::open_store(&cfg)?)
    };

    let engine = ReconciliationEngine::new(
        Arc::new(MinecraftQuery::new()),
        Arc::new(DiscordSurface::with_bot_user(Arc::clone(&client), me.id.0)),
        store,
        monitor,
    );
    let supervisor = TaskSupervisor::new(engine);
    let runtime = BotRuntime::new(CommandService::new(supervisor.clone(), prefix.clone()), supervisor);

    let cancel = CancellationToken::new();
    let gateway = GatewayHandle::connect(
        cfg.discord.gateway_url()?,
        token,
        intents::DEFAULT,
        ReconnectConfig::default(),
        cancel.child_token(),
    );
    let events = gateway.subscribe();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                signal_cancel.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    if !global.quiet {
        eprintln!("blockwatch running as {} (prefix `{prefix}`). Press Ctrl-C to stop.", me.username);
    }

    let result = runtime.run(events, &cancel).await;
    gateway.shutdown();
    runtime.shutdown().await;
    info!("stopped");
    result
}
