//! Line-oriented client commands
//!
//! One command per line, case-insensitive:
//! `LIST`, `GET <id>`, `GET ALL`, `UPDATE <id>`, `UPDATE ALL`, `HELP`, `QUIT`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::BrokerError;

/// Plain-text request a broker sends to a monitor, directly or via multicast
pub const MONITOR_UPDATE_REQUEST: &str = "update\n";

static COMMAND_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(?P<verb>[a-z?]+)(?:\s+(?P<target>\S+))?(?P<extra>\s+.*)?$")
        .expect("command grammar is a valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Monitor(String),
}

impl Target {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("all") {
            Target::All
        } else {
            Target::Monitor(raw.to_string())
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("ALL"),
            Target::Monitor(id) => f.write_str(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Get(Target),
    Update(Target),
    Help,
    Quit,
}

impl Command {
    pub const USAGE: &'static str = "LIST\nGET <id>\nGET ALL\nUPDATE <id>\nUPDATE ALL\nHELP\nQUIT";
}

impl FromStr for Command {
    type Err = BrokerError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let Some(captures) = COMMAND_LINE.captures(line) else {
            return Err(BrokerError::UnknownCommand(line.to_string()));
        };

        let verb = captures["verb"].to_ascii_uppercase();
        let target = captures.name("target").map(|m| m.as_str());
        let has_extra = captures.name("extra").is_some();

        let command = match (verb.as_str(), target) {
            ("LIST", None) => Command::List,
            ("HELP" | "?", None) => Command::Help,
            ("QUIT", None) => Command::Quit,
            ("GET", Some(target)) if !has_extra => Command::Get(Target::parse(target)),
            ("UPDATE", Some(target)) if !has_extra => Command::Update(Target::parse(target)),
            ("GET" | "UPDATE", None) => {
                return Err(BrokerError::BadMessage(format!(
                    "{verb} expects a monitor id or ALL"
                )));
            }
            ("LIST" | "HELP" | "?" | "QUIT" | "GET" | "UPDATE", Some(_)) => {
                return Err(BrokerError::BadMessage(format!(
                    "unexpected arguments for {verb}"
                )));
            }
            _ => return Err(BrokerError::UnknownCommand(line.to_string())),
        };

        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::List => f.write_str("LIST"),
            Command::Get(target) => write!(f, "GET {target}"),
            Command::Update(target) => write!(f, "UPDATE {target}"),
            Command::Help => f.write_str("HELP"),
            Command::Quit => f.write_str("QUIT"),
        }
    }
}

/// Whether a line received by a monitor asks it to push an update.
pub fn is_update_request(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(MONITOR_UPDATE_REQUEST.trim())
}
