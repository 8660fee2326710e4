//! Runtime configuration and JID handling.
//!
//! All inputs come from the environment (or equivalent CLI flags), matching
//! the deployment style of the original bots: `BOT_JID`, `BOT_PASSWORD`,
//! `ROOM_JID` and friends.

use std::fmt;
use std::str::FromStr;

use clap::{Parser, ValueEnum};
use thiserror::Error;

pub const DEFAULT_ENDPOINT: &str = "wss://xmpp.ethoradev.com:5443/ws";
pub const DEFAULT_BOT_NAME: &str = "AI Assistant Python";

/// A Jabber identifier: `localpart@domain[/resource]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jid {
    pub localpart: String,
    pub domain: String,
    pub resource: Option<String>,
}

impl Jid {
    /// The JID without its resource suffix.
    pub fn bare(&self) -> String {
        format!("{}@{}", self.localpart, self.domain)
    }
}

#[derive(Debug, Error)]
#[error("invalid JID {0:?}: expected localpart@domain[/resource]")]
pub struct JidError(String);

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bare, resource) = match s.split_once('/') {
            Some((bare, resource)) if !resource.is_empty() => (bare, Some(resource.to_string())),
            Some((bare, _)) => (bare, None),
            None => (s, None),
        };
        let (localpart, domain) = bare.split_once('@').ok_or_else(|| JidError(s.to_string()))?;
        if localpart.is_empty() || domain.is_empty() {
            return Err(JidError(s.to_string()));
        }
        Ok(Jid {
            localpart: localpart.to_string(),
            domain: domain.to_string(),
            resource,
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(resource) => write!(f, "{}@{}/{}", self.localpart, self.domain, resource),
            None => write!(f, "{}@{}", self.localpart, self.domain),
        }
    }
}

/// Which response strategy drives the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Fixed command responses (`/fact`, `/ask`).
    Command,
    /// Replies produced by the generative completion provider.
    Generative,
}

#[derive(Debug, Parser)]
#[command(name = "ethora-bot", about = "XMPP-over-WebSocket group chat bot")]
pub struct Config {
    /// Account JID (localpart@domain[/resource]).
    #[arg(long, env = "BOT_JID")]
    pub jid: Jid,

    /// Account password.
    #[arg(long, env = "BOT_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// MUC room JID to join.
    #[arg(long, env = "ROOM_JID")]
    pub room: Jid,

    /// Display name shown in the room.
    #[arg(long, env = "BOT_NAME", default_value = DEFAULT_BOT_NAME)]
    pub bot_name: String,

    /// API key for the generative provider (generative mode only).
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Response strategy. Defaults to generative when an API key is
    /// configured, command otherwise.
    #[arg(long, env = "BOT_MODE", value_enum)]
    pub mode: Option<Mode>,

    /// WebSocket endpoint of the XMPP server.
    #[arg(long, env = "XMPP_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Verify the server TLS certificate against native roots. Off by
    /// default to match the servers this bot is deployed against, which
    /// present certificates that do not validate.
    #[arg(long, env = "VERIFY_TLS")]
    pub verify_tls: bool,

    /// Drop a message only when the sender's room nickname equals the bot
    /// localpart exactly, instead of the default substring containment.
    #[arg(long, env = "STRICT_SELF_FILTER")]
    pub strict_self_filter: bool,

    /// Log at debug level.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn mode(&self) -> Mode {
        self.mode.unwrap_or(if self.openai_api_key.is_some() {
            Mode::Generative
        } else {
            Mode::Command
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_jid() {
        let jid: Jid = "bot@xmpp.example.com".parse().unwrap();
        assert_eq!(jid.localpart, "bot");
        assert_eq!(jid.domain, "xmpp.example.com");
        assert_eq!(jid.resource, None);
        assert_eq!(jid.bare(), "bot@xmpp.example.com");
    }

    #[test]
    fn parses_full_jid() {
        let jid: Jid = "bot@xmpp.example.com/desk".parse().unwrap();
        assert_eq!(jid.resource.as_deref(), Some("desk"));
        assert_eq!(jid.to_string(), "bot@xmpp.example.com/desk");
    }

    #[test]
    fn rejects_jid_without_domain() {
        assert!("just-a-name".parse::<Jid>().is_err());
        assert!("@domain".parse::<Jid>().is_err());
        assert!("local@".parse::<Jid>().is_err());
    }

    #[test]
    fn room_jid_with_conference_domain() {
        let room: Jid = "6706332d-0193e469@conference.xmpp.ethoradev.com"
            .parse()
            .unwrap();
        assert_eq!(room.domain, "conference.xmpp.ethoradev.com");
    }
}
