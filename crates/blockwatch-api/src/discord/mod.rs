// Discord bindings: REST client, gateway session, and payload models.

pub mod client;
pub mod gateway;
pub mod models;

pub use client::{DEFAULT_API_BASE, DiscordClient};
pub use gateway::{DEFAULT_GATEWAY_URL, GatewayEvent, GatewayHandle, ReconnectConfig};
pub use models::Snowflake;
