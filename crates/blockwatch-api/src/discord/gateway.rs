//! Discord gateway client with auto-reconnect.
//!
//! Opens the gateway websocket, identifies with the bot token, keeps the
//! heartbeat going, and streams the dispatch events blockwatch cares about
//! through a [`tokio::sync::broadcast`] channel. Dropped connections are
//! re-established with exponential backoff and a fresh identify. The
//! backoff only resets once a session reaches READY.
//!
//! # Example
//!
//! ```rust,ignore
//! use blockwatch_api::discord::gateway::{GatewayHandle, ReconnectConfig, intents};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let handle = GatewayHandle::connect(
//!     url, token, intents::DEFAULT, ReconnectConfig::default(), cancel.clone(),
//! );
//! let mut rx = handle.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::models::{Message, Snowflake};
use crate::error::Error;

/// Default gateway endpoint, API version 10 with JSON encoding.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Gateway intent bits.
pub mod intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const MESSAGE_CONTENT: u64 = 1 << 15;

    /// Everything the command surface and guild lifecycle need.
    pub const DEFAULT: u64 = GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT;
}

mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

// ── GatewayEvent ─────────────────────────────────────────────────────

/// Dispatch events surfaced to subscribers.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Session established. Lists every guild the bot belongs to.
    Ready {
        user_id: Snowflake,
        guild_ids: Vec<Snowflake>,
    },
    /// Guild became available or the bot joined it.
    GuildCreate { guild_id: Snowflake, name: String },
    /// Bot left the guild, or the guild went unavailable during an outage.
    GuildDelete { guild_id: Snowflake, unavailable: bool },
    MessageCreate(Message),
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for gateway reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,

    /// Maximum consecutive failures before giving up. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: None,
        }
    }
}

// ── GatewayHandle ────────────────────────────────────────────────────

/// Handle to a running gateway session.
///
/// When the background task exits (cancelled, fatal close code, or retry
/// limit) every subscriber sees [`broadcast::error::RecvError::Closed`].
pub struct GatewayHandle {
    event_rx: broadcast::Receiver<Arc<GatewayEvent>>,
    cancel: CancellationToken,
}

impl GatewayHandle {
    /// Spawn the connection loop. The first connection happens asynchronously.
    pub fn connect(
        url: Url,
        token: SecretString,
        intents: u64,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let session = Session {
                url,
                token,
                intents,
            };
            gateway_loop(&session, &event_tx, &reconnect, &task_cancel).await;
        });

        Self { event_rx, cancel }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<GatewayEvent>> {
        self.event_rx.resubscribe()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

struct Session {
    url: Url,
    token: SecretString,
    intents: u64,
}

// ── Background reconnection loop ─────────────────────────────────────

/// How a session ended without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    /// Op 7: the server asked us to reconnect.
    ReconnectRequested,
    /// Op 9: the session was invalidated and must identify again.
    Invalidated,
    /// The stream closed without a close code.
    Dropped,
}

/// What the loop does after a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconnect {
    Stop,
    After(Duration),
}

/// Decide whether and when to reconnect. `attempt` counts sessions since
/// the last one that reached READY; `ready` says whether this one did.
fn next_reconnect(
    result: &Result<SessionEnd, Error>,
    attempt: u32,
    ready: bool,
    config: &ReconnectConfig,
    invalid_session_wait: Duration,
) -> Reconnect {
    let backoff = || {
        if config.max_retries.is_some_and(|max| attempt >= max) {
            Reconnect::Stop
        } else {
            Reconnect::After(calculate_backoff(attempt, config))
        }
    };

    match result {
        Ok(SessionEnd::Cancelled) => Reconnect::Stop,
        Err(Error::GatewayClosed { code, .. }) if is_fatal_close(*code) => Reconnect::Stop,
        Ok(SessionEnd::ReconnectRequested) if ready => Reconnect::After(Duration::ZERO),
        Ok(SessionEnd::Invalidated) => match backoff() {
            Reconnect::After(delay) => Reconnect::After(delay.max(invalid_session_wait)),
            Reconnect::Stop => Reconnect::Stop,
        },
        Ok(SessionEnd::ReconnectRequested | SessionEnd::Dropped) | Err(_) => backoff(),
    }
}

/// Random 1 to 5 seconds, the wait Discord asks for after op 9.
fn invalid_session_wait() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(1000..=5000))
}

async fn gateway_loop(
    session: &Session,
    event_tx: &broadcast::Sender<Arc<GatewayEvent>>,
    reconnect: &ReconnectConfig,
    cancel: &CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let mut ready = false;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = run_session(session, event_tx, cancel, &mut ready) => result,
        };

        if ready {
            attempt = 0;
        }

        let refused = match &result {
            Ok(end) => {
                tracing::info!(?end, attempt, "gateway session ended");
                false
            }
            Err(Error::GatewayClosed { code, reason }) if is_fatal_close(*code) => {
                tracing::error!(code, %reason, "gateway refused the session, not reconnecting");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "gateway error");
                false
            }
        };

        let delay = match next_reconnect(&result, attempt, ready, reconnect, invalid_session_wait()) {
            Reconnect::Stop => {
                if !refused && !cancel.is_cancelled() {
                    tracing::error!(attempt, "gateway reconnection limit reached, giving up");
                }
                break;
            }
            Reconnect::After(delay) => delay,
        };

        if !delay.is_zero() {
            tracing::info!(delay_ms = delay.as_millis(), attempt, "waiting before reconnect");
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        attempt = attempt.saturating_add(1);
    }

    tracing::debug!("gateway loop exiting");
}

/// Close codes after which identifying again cannot succeed.
fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

// ── Single session lifecycle ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Payload {
    op: u8,
    #[serde(default)]
    d: Option<serde_json::Value>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// Connect, identify, and pump frames until the session drops. Sets
/// `ready` once READY is dispatched.
async fn run_session(
    session: &Session,
    event_tx: &broadcast::Sender<Arc<GatewayEvent>>,
    cancel: &CancellationToken,
    ready: &mut bool,
) -> Result<SessionEnd, Error> {
    tracing::info!(url = %session.url, "connecting to gateway");

    let uri: tungstenite::http::Uri = session
        .url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::GatewayConnect(e.to_string()))?;

    let (stream, _response) = tokio_tungstenite::connect_async(ClientRequestBuilder::new(uri))
        .await
        .map_err(|e| Error::GatewayConnect(e.to_string()))?;
    let (mut write, mut read) = stream.split();

    let Some(heartbeat_every) = read_hello(&mut read).await? else {
        return Ok(SessionEnd::Dropped);
    };
    tracing::debug!(interval_ms = heartbeat_every.as_millis(), "gateway hello");

    write
        .send(tungstenite::Message::text(identify_payload(session).to_string()))
        .await
        .map_err(|e| Error::GatewayConnect(e.to_string()))?;

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_every / 2,
        heartbeat_every,
    );
    let mut sequence: Option<u64> = None;
    let mut acked = true;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(tungstenite::Message::Close(None)).await;
                return Ok(SessionEnd::Cancelled);
            }
            _ = heartbeat.tick() => {
                if !acked {
                    return Err(Error::GatewayConnect("heartbeat not acknowledged".into()));
                }
                acked = false;
                write
                    .send(tungstenite::Message::text(heartbeat_payload(sequence).to_string()))
                    .await
                    .map_err(|e| Error::GatewayConnect(e.to_string()))?;
            }
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => text,
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        return match frame {
                            Some(cf) => {
                                let code = u16::from(cf.code);
                                tracing::info!(code, reason = %cf.reason, "gateway close frame");
                                Err(Error::GatewayClosed { code, reason: cf.reason.to_string() })
                            }
                            None => Ok(SessionEnd::Dropped),
                        };
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(Error::GatewayConnect(e.to_string())),
                    None => return Ok(SessionEnd::Dropped),
                };

                let payload: Payload = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::debug!(error = %e, "unparseable gateway frame");
                        continue;
                    }
                };
                if payload.s.is_some() {
                    sequence = payload.s;
                }

                match payload.op {
                    opcode::DISPATCH => {
                        if payload.t.as_deref() == Some("READY") {
                            *ready = true;
                        }
                        if let Some(event) = parse_dispatch(payload.t.as_deref(), payload.d) {
                            let _ = event_tx.send(Arc::new(event));
                        }
                    }
                    opcode::HEARTBEAT => {
                        write
                            .send(tungstenite::Message::text(heartbeat_payload(sequence).to_string()))
                            .await
                            .map_err(|e| Error::GatewayConnect(e.to_string()))?;
                    }
                    opcode::HEARTBEAT_ACK => acked = true,
                    opcode::RECONNECT => {
                        tracing::info!("gateway requested reconnect");
                        return Ok(SessionEnd::ReconnectRequested);
                    }
                    opcode::INVALID_SESSION => {
                        tracing::info!("gateway invalidated the session");
                        return Ok(SessionEnd::Invalidated);
                    }
                    other => tracing::trace!(op = other, "ignoring gateway opcode"),
                }
            }
        }
    }
}

async fn read_hello<S>(read: &mut S) -> Result<Option<Duration>, Error>
where
    S: futures_util::Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        match frame.map_err(|e| Error::GatewayConnect(e.to_string()))? {
            tungstenite::Message::Text(text) => return parse_hello(&text).map(Some),
            tungstenite::Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}

// ── Payloads ─────────────────────────────────────────────────────────

fn parse_hello(text: &str) -> Result<Duration, Error> {
    let payload: Payload = serde_json::from_str(text).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: text.to_owned(),
    })?;

    if payload.op != opcode::HELLO {
        return Err(Error::GatewayConnect(format!(
            "expected hello, got opcode {}",
            payload.op
        )));
    }

    payload
        .d
        .as_ref()
        .and_then(|d| d["heartbeat_interval"].as_u64())
        .map(Duration::from_millis)
        .ok_or_else(|| Error::GatewayConnect("hello without heartbeat_interval".into()))
}

fn identify_payload(session: &Session) -> serde_json::Value {
    json!({
        "op": opcode::IDENTIFY,
        "d": {
            "token": session.token.expose_secret(),
            "intents": session.intents,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "blockwatch",
                "device": "blockwatch",
            },
        },
    })
}

fn heartbeat_payload(sequence: Option<u64>) -> serde_json::Value {
    json!({ "op": opcode::HEARTBEAT, "d": sequence })
}

#[derive(Debug, Deserialize)]
struct ReadyData {
    user: IdOnly,
    #[serde(default)]
    guilds: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: Snowflake,
}

#[derive(Debug, Deserialize)]
struct GuildCreateData {
    id: Snowflake,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct GuildDeleteData {
    id: Snowflake,
    #[serde(default)]
    unavailable: bool,
}

/// Decode a dispatch into a [`GatewayEvent`]. Unhandled types yield `None`.
fn parse_dispatch(kind: Option<&str>, data: Option<serde_json::Value>) -> Option<GatewayEvent> {
    let data = data?;
    let event = match kind? {
        "READY" => serde_json::from_value::<ReadyData>(data).map(|r| GatewayEvent::Ready {
            user_id: r.user.id,
            guild_ids: r.guilds.into_iter().map(|g| g.id).collect(),
        }),
        "GUILD_CREATE" => serde_json::from_value::<GuildCreateData>(data).map(|g| {
            GatewayEvent::GuildCreate {
                guild_id: g.id,
                name: g.name,
            }
        }),
        "GUILD_DELETE" => serde_json::from_value::<GuildDeleteData>(data).map(|g| {
            GatewayEvent::GuildDelete {
                guild_id: g.id,
                unavailable: g.unavailable,
            }
        }),
        "MESSAGE_CREATE" => serde_json::from_value::<Message>(data).map(GatewayEvent::MessageCreate),
        _ => return None,
    };

    match event {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(error = %e, kind, "could not decode dispatch");
            None
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with +-25% deterministic jitter.
///
/// `delay = min(initial * 2^attempt, max) * jitter`
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap, clippy::as_conversions)]
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.min(30) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}

// ── Tests ────────────────────────────────────────────────────────────
