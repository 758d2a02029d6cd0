//! Bot runtime: routes gateway events to the command service and the
//! task supervisor until shutdown.

use std::sync::Arc;

use blockwatch_api::discord::GatewayEvent;
use blockwatch_api::discord::models::Message;
use blockwatch_core::{ChannelId, CommandContext, CommandService, TaskSupervisor, TenantId, UserId};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::CliError;

/// Where a chat message should be handled, if at all. Direct messages and
/// bot-authored messages are ignored.
pub fn command_context(message: &Message) -> Option<CommandContext> {
    if message.author.bot {
        return None;
    }
    let guild = message.guild_id?;
    Some(CommandContext {
        tenant: TenantId(guild.0),
        channel: ChannelId(message.channel_id.0),
        author: UserId(message.author.id.0),
    })
}

pub struct BotRuntime {
    service: Arc<CommandService>,
    supervisor: TaskSupervisor,
    handlers: TaskTracker,
}

impl BotRuntime {
    pub fn new(service: CommandService, supervisor: TaskSupervisor) -> Self {
        Self {
            service: Arc::new(service),
            supervisor,
            handlers: TaskTracker::new(),
        }
    }

    /// Consume events until `cancel` fires or the gateway gives up.
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<Arc<GatewayEvent>>,
        cancel: &CancellationToken,
    ) -> Result<(), CliError> {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                event = events.recv() => match event {
                    Ok(event) => self.dispatch(&event),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "gateway events dropped"),
                    Err(RecvError::Closed) => {
                        return Err(CliError::Gateway {
                            message: "gateway session ended and will not reconnect".into(),
                        });
                    }
                },
            }
        }
    }

    /// Wait for in-flight command handlers, then stop every monitor task.
    pub async fn shutdown(&self) {
        self.handlers.close();
        self.handlers.wait().await;
        self.supervisor.shutdown().await;
    }

    fn dispatch(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Ready { user_id, guild_ids } => {
                info!(user = %user_id, guilds = guild_ids.len(), "gateway ready");
                let supervisor = self.supervisor.clone();
                self.handlers.spawn(async move {
                    if let Err(e) = supervisor.resume_all().await {
                        warn!(error = %e, "resuming monitor tasks failed");
                    }
                });
            }
            GatewayEvent::GuildCreate { guild_id, name } => {
                debug!(tenant = %guild_id, name, "guild available");
            }
            GatewayEvent::GuildDelete { guild_id, unavailable } => {
                if *unavailable {
                    debug!(tenant = %guild_id, "guild unavailable, keeping state");
                    return;
                }
                let id = TenantId(guild_id.0);
                let supervisor = self.supervisor.clone();
                self.handlers.spawn(async move {
                    info!(tenant = %id, "removed from guild, cleaning up");
                    if let Err(e) = supervisor.cleanup(id).await {
                        warn!(tenant = %id, error = %e, "cleanup after guild removal failed");
                    }
                });
            }
            GatewayEvent::MessageCreate(message) => {
                let Some(ctx) = command_context(message) else {
                    return;
                };
                if !message.content.starts_with(self.service.prefix()) {
                    return;
                }
                let service = Arc::clone(&self.service);
                let supervisor = self.supervisor.clone();
                let content = message.content.clone();
                self.handlers.spawn(async move {
                    let Some(reply) = service.handle_text(ctx, &content).await else {
                        return;
                    };
                    let surface = supervisor.engine().surface();
                    if let Err(e) = surface.post_message(ctx.channel, &reply).await {
                        warn!(tenant = %ctx.tenant, channel = %ctx.channel, error = %e, "could not post reply");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(guild: Option<&str>, bot: bool) -> Message {
        serde_json::from_value(json!({
            "id": "900",
            "channel_id": "50",
            "guild_id": guild,
            "author": {"id": "7", "username": "alex", "bot": bot},
            "content": "$status"
        }))
        .unwrap()
    }

    #[test]
    fn guild_messages_map_to_context() {
        let ctx = command_context(&message(Some("1"), false)).unwrap();
        assert_eq!(
            ctx,
            CommandContext {
                tenant: TenantId(1),
                channel: ChannelId(50),
                author: UserId(7),
            }
        );
    }

    #[test]
    fn direct_and_bot_messages_are_ignored() {
        assert!(command_context(&message(None, false)).is_none());
        assert!(command_context(&message(Some("1"), true)).is_none());
    }
}
