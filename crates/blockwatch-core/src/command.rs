// ── Chat commands ──
//
// Parsing of prefixed chat messages into `Command`. Argument values stay
// raw strings here; the command service validates them so it can word the
// reply.

use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Setup {
        address: String,
        port: Option<String>,
        announce_channel: Option<String>,
    },
    Cleanup,
    Announce { channel: String },
    NoAnnounce,
    ShowHours,
    NoHours,
    Status,
    Players,
    LastQuery,
    Help { topic: Option<String> },
}

/// Command names, for lookup and help output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CommandName {
    Setup,
    Cleanup,
    Announce,
    NoAnnounce,
    ShowHours,
    NoHours,
    Status,
    Players,
    LastQuery,
    Help,
}

impl CommandName {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Mutating commands need the Administrator permission.
    pub fn requires_admin(self) -> bool {
        matches!(
            self,
            Self::Setup | Self::Cleanup | Self::Announce | Self::NoAnnounce | Self::ShowHours | Self::NoHours
        )
    }

    pub fn usage(self) -> &'static str {
        match self {
            Self::Setup => "setup <address[:port]> [port] [announceChannelId]",
            Self::Announce => "announce <channelId>",
            Self::Help => "help [command]",
            other => other.as_str(),
        }
    }

    pub fn brief(self) -> &'static str {
        match self {
            Self::Setup => "Sets up new Minecraft server querier",
            Self::Cleanup => "Removes querier and status channels",
            Self::Announce => "Turns on player join announcements",
            Self::NoAnnounce => "Turns off player join announcements",
            Self::ShowHours => "Turns on total player hour display",
            Self::NoHours => "Turns off total player hour display",
            Self::Status => "Shows server status",
            Self::Players => "Lists online players",
            Self::LastQuery => "Shows last query time",
            Self::Help => "Shows this message",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Setup => {
                "Sets up new Minecraft server querier. Replaces the previous querier, if any. \
                 Use a valid domain name or IP address. The default port (25565) is used unless \
                 otherwise specified. Specify a channel ID to announce player joins there."
            }
            Self::Cleanup => {
                "Removes querier and status channels. Deletes your server's data from my storage. \
                 Data deletion also happens automatically when I am removed from your server."
            }
            Self::Announce => "Turns on player join announcements in the specified channel.",
            Self::LastQuery => "Shows last query time. Useful for debugging server connection issues.",
            other => other.brief(),
        }
    }
}

/// Why a prefixed message could not become a `Command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Unknown { name: String },
    MissingArgument { command: CommandName },
}

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Self::Setup { .. } => CommandName::Setup,
            Self::Cleanup => CommandName::Cleanup,
            Self::Announce { .. } => CommandName::Announce,
            Self::NoAnnounce => CommandName::NoAnnounce,
            Self::ShowHours => CommandName::ShowHours,
            Self::NoHours => CommandName::NoHours,
            Self::Status => CommandName::Status,
            Self::Players => CommandName::Players,
            Self::LastQuery => CommandName::LastQuery,
            Self::Help { .. } => CommandName::Help,
        }
    }

    /// Parse `content` if it starts with `prefix`. `None` means the message
    /// is not addressed to the bot at all.
    pub fn parse(prefix: &str, content: &str) -> Option<Result<Self, ParseError>> {
        let body = content.trim_start().strip_prefix(prefix)?;
        let mut words = body.split_whitespace();
        let name = words.next()?;

        let Ok(command) = name.parse::<CommandName>() else {
            return Some(Err(ParseError::Unknown { name: name.to_owned() }));
        };

        let mut next = || words.next().map(str::to_owned);
        let missing = ParseError::MissingArgument { command };

        Some(match command {
            CommandName::Setup => match next() {
                Some(address) => Ok(Self::Setup {
                    address,
                    port: next(),
                    announce_channel: next(),
                }),
                None => Err(missing),
            },
            CommandName::Announce => next().map(|channel| Self::Announce { channel }).ok_or(missing),
            CommandName::Cleanup => Ok(Self::Cleanup),
            CommandName::NoAnnounce => Ok(Self::NoAnnounce),
            CommandName::ShowHours => Ok(Self::ShowHours),
            CommandName::NoHours => Ok(Self::NoHours),
            CommandName::Status => Ok(Self::Status),
            CommandName::Players => Ok(Self::Players),
            CommandName::LastQuery => Ok(Self::LastQuery),
            CommandName::Help => Ok(Self::Help { topic: next() }),
        })
    }
}

/// Render the command list, or one command's description.
pub fn help_text(prefix: &str, topic: Option<&str>) -> String {
    if let Some(topic) = topic {
        return match topic.trim_start_matches(prefix).parse::<CommandName>() {
            Ok(name) => format!("```{prefix}{}\n\n{}```", name.usage(), name.description()),
            Err(_) => format!("No command called \"{topic}\" found."),
        };
    }

    let width = CommandName::iter().map(|n| n.as_str().len()).max().unwrap_or(0);
    let mut admin = String::from("Admin:\n");
    let mut other = String::from("Other:\n");
    for name in CommandName::iter() {
        let section = if name.requires_admin() { &mut admin } else { &mut other };
        section.push_str(&format!("  {:width$}  {}\n", name.as_str(), name.brief()));
    }

    format!("```{admin}{other}\nType {prefix}help command for more info on a command.```")
}
