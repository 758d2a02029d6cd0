// Discord-backed `DisplaySurface`
//
// Display channels are voice channels locked so members can see but not
// join them. The bot's own user id is fetched once and cached.

use std::sync::Arc;

use async_trait::async_trait;
use blockwatch_api::discord::models::{
    CHANNEL_TYPE_GUILD_VOICE, CreateChannel, PermissionOverwrite, permissions,
};
use blockwatch_api::discord::{DiscordClient, Snowflake};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{DisplaySurface, SurfaceError};
use crate::model::{ChannelFilter, ChannelHandle, ChannelId, DisplayPermissions, TenantId, UserId};

pub struct DiscordSurface {
    client: Arc<DiscordClient>,
    bot_user: OnceCell<Snowflake>,
}

impl DiscordSurface {
    pub fn new(client: Arc<DiscordClient>) -> Self {
        Self {
            client,
            bot_user: OnceCell::new(),
        }
    }

    /// Seed the bot user id, e.g. from the gateway READY event.
    pub fn with_bot_user(client: Arc<DiscordClient>, bot_user: u64) -> Self {
        Self {
            client,
            bot_user: OnceCell::new_with(Some(Snowflake(bot_user))),
        }
    }

    async fn bot_user(&self) -> Result<Snowflake, SurfaceError> {
        self.bot_user
            .get_or_try_init(|| async {
                self.client
                    .get_current_user()
                    .await
                    .map(|user| user.id)
                    .map_err(map_error)
            })
            .await
            .copied()
    }

    fn overwrites(space: TenantId, bot: Snowflake, perms: &DisplayPermissions) -> Vec<PermissionOverwrite> {
        let mut everyone_allow = 0;
        let mut everyone_deny = 0;
        if perms.everyone_can_view {
            everyone_allow |= permissions::VIEW_CHANNEL;
        } else {
            everyone_deny |= permissions::VIEW_CHANNEL;
        }
        if perms.everyone_can_connect {
            everyone_allow |= permissions::CONNECT;
        } else {
            everyone_deny |= permissions::CONNECT;
        }

        let mut bot_allow = permissions::VIEW_CHANNEL | permissions::CONNECT;
        if perms.bot_can_manage {
            bot_allow |= permissions::MANAGE_CHANNELS;
        }

        // The @everyone role shares the guild's id.
        vec![
            PermissionOverwrite::role(Snowflake(space.0), everyone_allow, everyone_deny),
            PermissionOverwrite::member(bot, bot_allow, 0),
        ]
    }
}

fn map_error(err: blockwatch_api::Error) -> SurfaceError {
    if err.is_forbidden() {
        SurfaceError::Forbidden {
            message: err.to_string(),
        }
    } else {
        SurfaceError::Unavailable {
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl DisplaySurface for DiscordSurface {
    async fn list_channels(
        &self,
        space: TenantId,
        filter: &ChannelFilter,
    ) -> Result<Vec<ChannelHandle>, SurfaceError> {
        let channels = self
            .client
            .list_guild_channels(Snowflake(space.0))
            .await
            .map_err(map_error)?;

        Ok(channels
            .into_iter()
            .filter(|c| filter.matches(c.kind == CHANNEL_TYPE_GUILD_VOICE))
            .filter_map(|c| {
                Some(ChannelHandle {
                    id: ChannelId(c.id.0),
                    name: c.name?,
                })
            })
            .collect())
    }

    async fn create_display_channel(
        &self,
        space: TenantId,
        name: &str,
        permissions: &DisplayPermissions,
    ) -> Result<ChannelHandle, SurfaceError> {
        let bot = self.bot_user().await?;
        let body = CreateChannel {
            name: name.to_owned(),
            kind: CHANNEL_TYPE_GUILD_VOICE,
            permission_overwrites: Self::overwrites(space, bot, permissions),
        };

        let created = self
            .client
            .create_guild_channel(Snowflake(space.0), &body)
            .await
            .map_err(map_error)?;

        Ok(ChannelHandle {
            id: ChannelId(created.id.0),
            name: created.name.unwrap_or_else(|| name.to_owned()),
        })
    }

    async fn rename_channel(&self, channel: &ChannelHandle, name: &str) -> Result<(), SurfaceError> {
        self.client
            .modify_channel_name(Snowflake(channel.id.0), name)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn delete_channel(&self, channel: &ChannelHandle) -> Result<(), SurfaceError> {
        match self.client.delete_channel(Snowflake(channel.id.0)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(channel = %channel.id, "channel already gone");
                Ok(())
            }
            Err(e) => Err(map_error(e)),
        }
    }

    async fn post_message(&self, channel: ChannelId, text: &str) -> Result<(), SurfaceError> {
        self.client
            .create_message(Snowflake(channel.0), text)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn resolve_channel(&self, space: TenantId, id: ChannelId) -> Result<Option<ChannelId>, SurfaceError> {
        match self.client.get_channel(Snowflake(id.0)).await {
            Ok(channel) if channel.guild_id == Some(Snowflake(space.0)) => Ok(Some(id)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() || e.is_forbidden() => Ok(None),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn space_visible(&self, space: TenantId) -> Result<bool, SurfaceError> {
        match self.client.get_guild(Snowflake(space.0)).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() || e.is_forbidden() => Ok(false),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn is_administrator(&self, space: TenantId, user: UserId) -> Result<bool, SurfaceError> {
        let guild_id = Snowflake(space.0);
        let guild = self.client.get_guild(guild_id).await.map_err(map_error)?;
        if guild.owner_id.0 == user.0 {
            return Ok(true);
        }

        let member = self
            .client
            .get_guild_member(guild_id, Snowflake(user.0))
            .await
            .map_err(map_error)?;

        let granted = guild
            .roles
            .iter()
            .filter(|role| role.id == guild_id || member.roles.contains(&role.id))
            .fold(0, |acc, role| acc | role.permission_bits());

        Ok(granted & permissions::ADMINISTRATOR != 0)
    }
}
