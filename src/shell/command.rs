//! Shell command parsing.

use std::fmt;
use std::str::FromStr;

/// Routing role selected by `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// DODAG root
    Root,
    /// Routing node
    Node,
    /// Non-routing host
    Host,
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(Role::Root),
            "n" => Ok(Role::Node),
            "h" => Ok(Role::Host),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Root => "root",
            Role::Node => "node",
            Role::Host => "non-routing",
        };
        f.write_str(name)
    }
}

/// One operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    HaltCcn,
    StartCcn,
    /// Default interest name when `None`
    Interest(Option<String>),
    Populate,
    Prefix {
        prefix: String,
        kind: String,
        face: String,
    },
    Stat,
    Config(usize),
    AppServer,
    Ignore(u16),
    Init(Role),
    Set(u16),
    Server,
    Send {
        address: u16,
        text: String,
    },
    Dodag,
    Help,
}

/// Why a line did not produce a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("")]
    Empty,

    #[error("shell: command not found: {0}")]
    Unknown(String),

    /// Wrong arguments; the payload is the usage line to print
    #[error("{0}")]
    Usage(&'static str),
}

/// Name and one-line description, in `help` order.
pub const COMMANDS: &[(&str, &str)] = &[
    ("haltccn", "stops ccn relay"),
    ("startccn", "starts ccn relay"),
    ("interest", "express an interest"),
    ("populate", "populate the cache of the relay with data"),
    ("prefix", "registers a prefix to a face"),
    ("stat", "prints out forwarding statistics"),
    ("config", "changes the runtime config of the ccn lite relay"),
    ("appserver", "starts an application server to reply to interests"),
    ("ign", "ignore node"),
    ("init", "Initialize network"),
    ("set", "Set ID"),
    ("server", "Starts a UDP server"),
    ("send", "Send a UDP datagram"),
    ("dodag", "Shows the dodag"),
    ("help", "Print this help"),
];

const PREFIX_USAGE: &str = "enter: prefix </path/to/abc> <type> <faceid>";
const CONFIG_USAGE: &str = "config: <max_cache_entries>";
const IGN_USAGE: &str = "Usage: ign <addr>";
const INIT_USAGE: &str = "Usage: init (r|n|h)";
const SET_USAGE: &str = "Usage: set <id>";
const SEND_USAGE: &str = "usage: send <addr> <text>";

impl Command {
    /// Parse one shell line. Arguments are whitespace separated.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, rest)) = args.split_first() else {
            return Err(ParseError::Empty);
        };

        let command = match name {
            "haltccn" => Command::HaltCcn,
            "startccn" => Command::StartCcn,
            "interest" => Command::Interest(rest.first().map(|s| s.to_string())),
            "populate" => Command::Populate,
            "prefix" => match rest {
                [prefix, kind, face, ..] => Command::Prefix {
                    prefix: prefix.to_string(),
                    kind: kind.to_string(),
                    face: face.to_string(),
                },
                _ => return Err(ParseError::Usage(PREFIX_USAGE)),
            },
            "stat" => Command::Stat,
            "config" => Command::Config(number(rest, CONFIG_USAGE)?),
            "appserver" => Command::AppServer,
            "ign" => match rest {
                [_] => Command::Ignore(number(rest, IGN_USAGE)?),
                _ => return Err(ParseError::Usage(IGN_USAGE)),
            },
            "init" => match rest {
                [mode] => Command::Init(mode.parse().map_err(|_| ParseError::Usage(INIT_USAGE))?),
                _ => return Err(ParseError::Usage(INIT_USAGE)),
            },
            "set" => Command::Set(number(rest, SET_USAGE)?),
            "server" => Command::Server,
            "send" => match rest {
                [address, text] => Command::Send {
                    address: address.parse().map_err(|_| ParseError::Usage(SEND_USAGE))?,
                    text: text.to_string(),
                },
                _ => return Err(ParseError::Usage(SEND_USAGE)),
            },
            "dodag" => Command::Dodag,
            "help" => Command::Help,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}

fn number<T: FromStr>(args: &[&str], usage: &'static str) -> Result<T, ParseError> {
    args.first()
        .and_then(|s| s.parse().ok())
        .ok_or(ParseError::Usage(usage))
}
