// blockwatch-api: Async wire clients for the Minecraft query protocol and Discord

pub mod discord;
pub mod error;
pub mod query;
pub mod transport;

pub use error::Error;
pub use query::{MinecraftQuery, ServerStatus};
pub use transport::TransportConfig;
