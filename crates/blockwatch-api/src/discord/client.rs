// Discord REST client
//
// Thin wrapper over `reqwest::Client` that builds v10 URLs, attaches the bot
// token, and maps non-2xx statuses onto `Error` variants.

use serde::Serialize;
use serde::de::DeserializeOwned;
use secrecy::SecretString;
use tracing::debug;
use url::Url;

use super::models::{
    ApiErrorBody, Channel, CreateChannel, CreateMessage, Guild, Member, Message, ModifyChannel,
    Snowflake, User,
};
use crate::error::Error;
use crate::transport::TransportConfig;

/// Default REST base for API version 10.
pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10/";

/// Raw HTTP client for the Discord REST API.
pub struct DiscordClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DiscordClient {
    /// Create a client that authenticates with `token` on every request.
    pub fn new(base_url: Url, token: &SecretString, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_bot_client(token)?;
        Ok(Self::with_client(http, base_url))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    ///
    /// The caller is responsible for the `Authorization` header.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url: normalize_base(base_url),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    pub async fn get_current_user(&self) -> Result<User, Error> {
        self.get("users/@me").await
    }

    pub async fn get_guild(&self, guild_id: Snowflake) -> Result<Guild, Error> {
        self.get(&format!("guilds/{guild_id}")).await
    }

    pub async fn get_guild_member(&self, guild_id: Snowflake, user_id: Snowflake) -> Result<Member, Error> {
        self.get(&format!("guilds/{guild_id}/members/{user_id}")).await
    }

    pub async fn list_guild_channels(&self, guild_id: Snowflake) -> Result<Vec<Channel>, Error> {
        self.get(&format!("guilds/{guild_id}/channels")).await
    }

    pub async fn get_channel(&self, channel_id: Snowflake) -> Result<Channel, Error> {
        self.get(&format!("channels/{channel_id}")).await
    }

    pub async fn create_guild_channel(
        &self,
        guild_id: Snowflake,
        body: &CreateChannel,
    ) -> Result<Channel, Error> {
        self.send(reqwest::Method::POST, &format!("guilds/{guild_id}/channels"), Some(body))
            .await
    }

    pub async fn modify_channel_name(&self, channel_id: Snowflake, name: &str) -> Result<Channel, Error> {
        self.send(
            reqwest::Method::PATCH,
            &format!("channels/{channel_id}"),
            Some(&ModifyChannel { name }),
        )
        .await
    }

    pub async fn delete_channel(&self, channel_id: Snowflake) -> Result<(), Error> {
        let url = self.url(&format!("channels/{channel_id}"))?;
        debug!("DELETE {url}");
        let resp = self.http.delete(url).send().await?;
        check_status(resp).await.map(|_| ())
    }

    pub async fn create_message(&self, channel_id: Snowflake, content: &str) -> Result<Message, Error> {
        self.send(
            reqwest::Method::POST,
            &format!("channels/{channel_id}/messages"),
            Some(&CreateMessage { content }),
        )
        .await
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        self.send::<T, ()>(reqwest::Method::GET, path, None).await
    }

    async fn send<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, Error> {
        let url = self.url(path)?;
        debug!("{method} {url}");

        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await?;
        let body = check_status(resp).await?;

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

/// `Url::join` drops the last path segment unless the base ends with `/`.
fn normalize_base(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

/// Return the body of a successful response, or the mapped error.
async fn check_status(resp: reqwest::Response) -> Result<String, Error> {
    let status = resp.status();
    let body = resp.text().await?;

    if status.is_success() {
        return Ok(body);
    }

    let parsed: Option<ApiErrorBody> = serde_json::from_str(&body).ok();
    let message = parsed
        .as_ref()
        .and_then(|p| p.message.clone())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_owned());

    Err(match status.as_u16() {
        401 => Error::Authentication { message },
        403 => Error::Forbidden { message },
        404 => Error::NotFound { message },
        429 => {
            let secs = parsed.and_then(|p| p.retry_after).unwrap_or(1.0);
            Error::RateLimited {
                retry_after_ms: seconds_to_millis(secs),
            }
        }
        code => Error::Discord {
            message,
            code: parsed.and_then(|p| p.code),
            status: code,
        },
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
fn seconds_to_millis(secs: f64) -> u64 {
    (secs.max(0.0) * 1000.0).ceil() as u64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn base_gets_trailing_slash() {
        let base = normalize_base(Url::parse("http://localhost:1234/api/v10").unwrap());
        assert_eq!(base.join("guilds/1").unwrap().as_str(), "http://localhost:1234/api/v10/guilds/1");
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(seconds_to_millis(0.0015), 2);
        assert_eq!(seconds_to_millis(2.5), 2500);
        assert_eq!(seconds_to_millis(-1.0), 0);
    }
}
