// Shared transport configuration for building reqwest::Client instances.
//
// The Discord REST client and the one-shot CLI probes share timeout and
// header settings through this module.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/blockwatch-bot/blockwatch, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        self.build_client_with_headers(HeaderMap::new())
    }

    /// Build a `reqwest::Client` that authenticates as a bot on every request.
    pub fn build_bot_client(&self, token: &SecretString) -> Result<reqwest::Client, crate::error::Error> {
        let mut value = HeaderValue::from_str(&format!("Bot {}", token.expose_secret()))
            .map_err(|_| crate::error::Error::Authentication {
                message: "bot token contains characters not allowed in a header".into(),
            })?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        self.build_client_with_headers(headers)
    }

    /// Build a `reqwest::Client` with additional default headers.
    pub fn build_client_with_headers(
        &self,
        headers: HeaderMap,
    ) -> Result<reqwest::Client, crate::error::Error> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(crate::error::Error::Transport)
    }
}
