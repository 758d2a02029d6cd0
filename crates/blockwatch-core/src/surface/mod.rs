// ── Display surface port ──
//
// Everything the engine and command service do on the chat platform goes
// through `DisplaySurface`. `Forbidden` is kept distinct from every other
// failure because it decides whether a tenant is torn down.

mod discord;

use async_trait::async_trait;
use thiserror::Error;

pub use discord::DiscordSurface;

use crate::model::{ChannelFilter, ChannelHandle, ChannelId, DisplayPermissions, TenantId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    /// The platform refused the action for lack of permissions.
    #[error("forbidden: {message}")]
    Forbidden { message: String },

    /// Network failure, rate limit, outage, or an unexpected response.
    #[error("platform unavailable: {message}")]
    Unavailable { message: String },
}

impl SurfaceError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }
}

#[async_trait]
pub trait DisplaySurface: Send + Sync {
    async fn list_channels(
        &self,
        space: TenantId,
        filter: &ChannelFilter,
    ) -> Result<Vec<ChannelHandle>, SurfaceError>;

    async fn create_display_channel(
        &self,
        space: TenantId,
        name: &str,
        permissions: &DisplayPermissions,
    ) -> Result<ChannelHandle, SurfaceError>;

    async fn rename_channel(&self, channel: &ChannelHandle, name: &str) -> Result<(), SurfaceError>;

    /// Delete a channel. A channel that is already gone counts as deleted.
    async fn delete_channel(&self, channel: &ChannelHandle) -> Result<(), SurfaceError>;

    async fn post_message(&self, channel: ChannelId, text: &str) -> Result<(), SurfaceError>;

    /// Look up `id` inside `space`. `None` if it does not exist there.
    async fn resolve_channel(&self, space: TenantId, id: ChannelId) -> Result<Option<ChannelId>, SurfaceError>;

    /// Whether the bot can still see `space` at all.
    async fn space_visible(&self, space: TenantId) -> Result<bool, SurfaceError>;

    async fn is_administrator(&self, space: TenantId, user: UserId) -> Result<bool, SurfaceError>;
}
