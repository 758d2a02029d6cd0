// Discord REST and gateway payload types
//
// Only the fields blockwatch reads are modelled. Snowflakes travel as JSON
// strings and are held as `u64` on this side.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ── Snowflake ────────────────────────────────────────────────────────

/// A Discord entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Snowflake(pub u64);

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(Self(n)),
        }
    }
}

// ── Permissions ──────────────────────────────────────────────────────

/// Permission bit flags used by blockwatch.
pub mod permissions {
    pub const ADMINISTRATOR: u64 = 1 << 3;
    pub const MANAGE_CHANNELS: u64 = 1 << 4;
    pub const VIEW_CHANNEL: u64 = 1 << 10;
    pub const SEND_MESSAGES: u64 = 1 << 11;
    pub const CONNECT: u64 = 1 << 20;
}

/// Channel type for guild voice channels.
pub const CHANNEL_TYPE_GUILD_VOICE: u8 = 2;

/// Overwrite target types.
pub const OVERWRITE_TYPE_ROLE: u8 = 0;
pub const OVERWRITE_TYPE_MEMBER: u8 = 1;

// ── Resources ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Snowflake,
    pub name: String,
    /// Permission bitset, serialized by Discord as a decimal string.
    pub permissions: String,
}

impl Role {
    pub fn permission_bits(&self) -> u64 {
        self.permissions.parse().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    pub owner_id: Snowflake,
    #[serde(default)]
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    pub author: User,
    #[serde(default)]
    pub content: String,
}

// ── Request bodies ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PermissionOverwrite {
    pub id: Snowflake,
    #[serde(rename = "type")]
    pub kind: u8,
    pub allow: String,
    pub deny: String,
}

impl PermissionOverwrite {
    pub fn role(id: Snowflake, allow: u64, deny: u64) -> Self {
        Self {
            id,
            kind: OVERWRITE_TYPE_ROLE,
            allow: allow.to_string(),
            deny: deny.to_string(),
        }
    }

    pub fn member(id: Snowflake, allow: u64, deny: u64) -> Self {
        Self {
            id,
            kind: OVERWRITE_TYPE_MEMBER,
            allow: allow.to_string(),
            deny: deny.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateChannel {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub permission_overwrites: Vec<PermissionOverwrite>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ModifyChannel<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateMessage<'a> {
    pub content: &'a str,
}

/// Error body Discord returns alongside non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<u64>,
    #[serde(default)]
    pub retry_after: Option<f64>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_reads_string_and_number() {
        let a: Snowflake = serde_json::from_str(r#""175928847299117063""#).unwrap();
        let b: Snowflake = serde_json::from_str("42").unwrap();
        assert_eq!(a, Snowflake(175_928_847_299_117_063));
        assert_eq!(b, Snowflake(42));
        assert_eq!(serde_json::to_string(&a).unwrap(), r#""175928847299117063""#);
    }

    #[test]
    fn channel_type_is_renamed() {
        let channel: Channel = serde_json::from_str(
            r#"{"id":"1","type":2,"name":"IP: mc.example.net","guild_id":"9"}"#,
        )
        .unwrap();
        assert_eq!(channel.kind, CHANNEL_TYPE_GUILD_VOICE);
        assert_eq!(channel.name.as_deref(), Some("IP: mc.example.net"));
        assert_eq!(channel.guild_id, Some(Snowflake(9)));
    }

    #[test]
    fn role_permission_bits() {
        let role: Role =
            serde_json::from_str(r#"{"id":"1","name":"@everyone","permissions":"1049600"}"#).unwrap();
        let bits = role.permission_bits();
        assert_ne!(bits & permissions::VIEW_CHANNEL, 0);
        assert_ne!(bits & permissions::CONNECT, 0);
        assert_eq!(bits & permissions::ADMINISTRATOR, 0);
    }

    #[test]
    fn overwrite_serializes_bitsets_as_strings() {
        let ow = PermissionOverwrite::role(Snowflake(5), permissions::VIEW_CHANNEL, permissions::CONNECT);
        let json = serde_json::to_value(&ow).unwrap();
        assert_eq!(json["id"], "5");
        assert_eq!(json["type"], 0);
        assert_eq!(json["allow"], "1024");
        assert_eq!(json["deny"], "1048576");
    }
}
