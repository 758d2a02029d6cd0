// ── Domain model ──
//
// Tenants, the state derived from polling their game server, and the
// display channels that mirror it. Ids are platform snowflakes carried as
// `u64` newtypes so the core never depends on wire representations.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

// ── Identity types ──────────────────────────────────────────────────

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

snowflake_id!(
    /// Identifier of a tenant: the guild whose channels display a server.
    TenantId
);
snowflake_id!(ChannelId);
snowflake_id!(UserId);

impl ChannelId {
    /// Parse a raw id or a `<#id>` channel mention.
    pub fn parse_mention(s: &str) -> Option<Self> {
        let s = s.trim();
        let inner = s
            .strip_prefix("<#")
            .and_then(|rest| rest.strip_suffix('>'))
            .unwrap_or(s);
        inner.parse().ok()
    }
}

// ── Tenant ──────────────────────────────────────────────────────────

/// A monitored game server and how its status is surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// Host name or IPv4 literal. Empty means the tenant is inert.
    pub address: String,
    pub port: u16,
    pub announce_enabled: bool,
    pub announce_channel: Option<ChannelId>,
    pub show_hours: bool,
}

impl Tenant {
    pub fn new(id: TenantId, address: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            address: address.into(),
            port,
            announce_enabled: false,
            announce_channel: None,
            show_hours: false,
        }
    }

    pub fn is_inert(&self) -> bool {
        self.address.is_empty()
    }

    /// Channel join announcements go to, if announcing is on.
    pub fn announce_target(&self) -> Option<ChannelId> {
        if self.announce_enabled {
            self.announce_channel
        } else {
            None
        }
    }
}

// ── Derived state ───────────────────────────────────────────────────

/// Persisted result of previous polls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedState {
    pub roster: BTreeSet<String>,
    /// Time of the last successful query. `None` means never queried.
    pub last_query_at: Option<DateTime<Utc>>,
    /// Player-seconds observed across consecutive successful queries.
    pub accumulated_seconds: u64,
    /// Player-milliseconds not yet adding up to a whole second. Always below 1000.
    #[serde(default)]
    pub carry_millis: u64,
}

/// One poll's view of the server. Never persisted as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedState {
    pub online: u32,
    pub capacity: u32,
    pub roster: BTreeSet<String>,
    pub motd: String,
}

// ── Displays ────────────────────────────────────────────────────────

/// The kinds of status channel kept per tenant, keyed by name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum DisplayKind {
    Address,
    Players,
    Hours,
}

impl DisplayKind {
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Address => "IP: ",
            Self::Players => "Players: ",
            Self::Hours => "Player Hrs: ",
        }
    }

    /// Which display, if any, a channel name belongs to.
    pub fn classify(name: &str) -> Option<Self> {
        Self::iter().find(|kind| name.starts_with(kind.prefix()))
    }
}

/// A live channel on the display surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelHandle {
    pub id: ChannelId,
    pub name: String,
}

/// Which channels `list_channels` should return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelFilter {
    /// Only voice channels.
    pub voice_only: bool,
}

impl ChannelFilter {
    /// Every voice channel, the pool display channels live in.
    pub fn voice() -> Self {
        Self { voice_only: true }
    }

    pub fn matches(&self, is_voice: bool) -> bool {
        !self.voice_only || is_voice
    }
}

/// Access granted on a newly created display channel.
///
/// Everyone may see it; only the bot may join or edit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayPermissions {
    pub everyone_can_view: bool,
    pub everyone_can_connect: bool,
    pub bot_can_manage: bool,
}

impl Default for DisplayPermissions {
    fn default() -> Self {
        Self {
            everyone_can_view: true,
            everyone_can_connect: false,
            bot_can_manage: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_by_prefix() {
        assert_eq!(DisplayKind::classify("IP: mc.example.net"), Some(DisplayKind::Address));
        assert_eq!(DisplayKind::classify("Players: 3/20"), Some(DisplayKind::Players));
        assert_eq!(DisplayKind::classify("Player Hrs: 12"), Some(DisplayKind::Hours));
        assert_eq!(DisplayKind::classify("general"), None);
        assert_eq!(DisplayKind::classify("ip: lower"), None);
    }

    #[test]
    fn channel_mentions_parse() {
        assert_eq!(ChannelId::parse_mention("123"), Some(ChannelId(123)));
        assert_eq!(ChannelId::parse_mention("<#456>"), Some(ChannelId(456)));
        assert_eq!(ChannelId::parse_mention("#general"), None);
    }

    #[test]
    fn voice_filter_skips_text_channels() {
        assert!(ChannelFilter::voice().matches(true));
        assert!(!ChannelFilter::voice().matches(false));
        assert!(ChannelFilter::default().matches(false));
    }

    #[test]
    fn announce_target_requires_flag() {
        let mut tenant = Tenant::new(TenantId(1), "mc.example.net", 25565);
        tenant.announce_channel = Some(ChannelId(9));
        assert_eq!(tenant.announce_target(), None);
        tenant.announce_enabled = true;
        assert_eq!(tenant.announce_target(), Some(ChannelId(9)));
    }

    #[test]
    fn display_kind_names() {
        assert_eq!(DisplayKind::Hours.to_string(), "hours");
        assert_eq!(DisplayKind::iter().count(), 3);
    }
}
