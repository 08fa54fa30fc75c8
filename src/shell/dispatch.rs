//! Command execution against a [`Node`].
//!
//! Every command writes its outcome to the given stream; failures are
//! printed, never returned. Only a failing output stream is an error.

use std::io::Write;

use super::command::{COMMANDS, Command, ParseError};
use crate::error::{Error, Result};
use crate::node::Node;
use crate::relay::{PREFIX_REGISTERED, RelayStart};
use crate::worker::StartOutcome;

const BANNER: &str = "####################################################";
const RELAY_DOWN: &str = "ccnl stack not running";

pub struct Dispatcher<'a> {
    node: &'a Node,
}

impl<'a> Dispatcher<'a> {
    pub fn new(node: &'a Node) -> Self {
        Self { node }
    }

    /// Parse and execute one line.
    pub fn run_line(&self, line: &str, out: &mut dyn Write) -> Result<()> {
        match Command::parse(line) {
            Ok(command) => self.execute(command, out),
            Err(ParseError::Empty) => Ok(()),
            Err(e) => {
                writeln!(out, "{}", e)?;
                Ok(())
            }
        }
    }

    pub fn execute(&self, command: Command, out: &mut dyn Write) -> Result<()> {
        log::debug!("shell: {:?}", command);
        let node = self.node;

        match command {
            Command::HaltCcn => match node.relay().stop() {
                Ok(()) => writeln!(out, "ccn-lite relay stopped")?,
                Err(e) => relay_failure(out, "haltccn", e)?,
            },
            Command::StartCcn => match node.start_relay() {
                Ok(RelayStart::Started { channel: Some(c) }) => {
                    writeln!(out, "[transceiver] Got channel: {}", c)?
                }
                Ok(RelayStart::Started { channel: None }) => {
                    writeln!(out, "[transceiver] Error setting/getting channel")?
                }
                Ok(RelayStart::AlreadyRunning) => {
                    writeln!(out, "ccn-lite relay already running...please stop it first!")?
                }
                Err(e) => writeln!(out, "startccn failed: {}", e)?,
            },
            Command::Interest(name) => {
                let name = name.unwrap_or_else(|| node.config().relay.default_interest.clone());
                self.interest(&name, out)?;
            }
            Command::Populate => match node.relay().populate() {
                Ok(()) => writeln!(out, "done")?,
                Err(e) => relay_failure(out, "populate", e)?,
            },
            Command::Prefix { prefix, kind, face } => {
                match node.client().publish(&prefix, &kind, &face) {
                    Ok(status) if status == PREFIX_REGISTERED => writeln!(out, "done")?,
                    Ok(status) => writeln!(out, "{}", status)?,
                    Err(e) => relay_failure(out, "prefix", e)?,
                }
            }
            Command::Stat => match node.relay().print_statistics() {
                Ok(()) => writeln!(out, "done")?,
                Err(e) => relay_failure(out, "stat", e)?,
            },
            Command::Config(entries) => match node.relay().configure_cache(entries) {
                Ok(()) => writeln!(out, "cache size set to {}", entries)?,
                Err(e) => relay_failure(out, "config", e)?,
            },
            Command::AppServer => match node.start_appserver() {
                Ok(StartOutcome::Started) => writeln!(out, "ccn-lite appserver started")?,
                Ok(StartOutcome::AlreadyRunning) => {
                    writeln!(out, "ccn-lite appserver already running")?
                }
                Err(e) => writeln!(out, "appserver failed: {}", e)?,
            },
            Command::Ignore(address) => match node.transceiver().ignore(address) {
                Ok(()) => writeln!(out, "[transceiver] ignoring address {}", address)?,
                Err(e) => writeln!(out, "Transceiver not running: {}", e)?,
            },
            Command::Init(role) => match node.init_network(role) {
                Ok(radio) => writeln!(
                    out,
                    "Initialized as {} with address {} on channel {}",
                    role, radio.address, radio.channel
                )?,
                Err(e) => writeln!(out, "init failed: {}", e)?,
            },
            Command::Set(id) => match node.set_id(id) {
                Ok(address) => writeln!(out, "Set node ID to {}", address)?,
                Err(e) => writeln!(out, "[transceiver] could not set address {}: {}", id, e)?,
            },
            Command::Server => match node.bridge().start() {
                Ok(listening) if listening.outcome == StartOutcome::Started => {
                    writeln!(out, "UDP SERVER ON PORT {}", listening.local_addr.port())?
                }
                Ok(listening) => writeln!(
                    out,
                    "UDP server already running on port {}",
                    listening.local_addr.port()
                )?,
                Err(e) => {
                    log::error!("UDP server: {}", e);
                    writeln!(out, "Error bind failed!")?
                }
            },
            Command::Send { address, text } => match node.bridge().send_to(address, &text) {
                Ok(report) => writeln!(
                    out,
                    "Successful deliverd {} bytes over UDP to {} to 6LoWPAN",
                    report.bytes, report.address
                )?,
                Err(e) => {
                    log::warn!("send to {} failed: {}", address, e);
                    writeln!(out, "Error sending packet!")?
                }
            },
            Command::Dodag => self.dodag(out)?,
            Command::Help => {
                for (name, description) in COMMANDS {
                    writeln!(out, "{:<10} {}", name, description)?;
                }
            }
        }
        Ok(())
    }

    fn interest(&self, name: &str, out: &mut dyn Write) -> Result<()> {
        match self.node.client().express_interest(name) {
            Ok(content) => {
                writeln!(out, "{}", BANNER)?;
                writeln!(out, "data='{}'", String::from_utf8_lossy(&content))?;
                writeln!(out, "{}", BANNER)?;
                writeln!(out, "done")?;
            }
            Err(Error::EmptyResult(_)) => {
                writeln!(out, "riot_get returned 0 bytes...aborting!")?;
            }
            Err(Error::NotRunning(_)) => writeln!(out, "{}", RELAY_DOWN)?,
            Err(Error::InvalidParameter(reason)) => writeln!(out, "interest: {}", reason)?,
            Err(e) => writeln!(out, "riot_get failed: {}...aborting!", e)?,
        }
        Ok(())
    }

    fn dodag(&self, out: &mut dyn Write) -> Result<()> {
        let info = match self.node.dodag() {
            Ok(info) => info,
            Err(e) => {
                writeln!(out, "dodag: {}", e)?;
                return Ok(());
            }
        };
        let role = info
            .network
            .role
            .map_or_else(|| "uninitialized".to_string(), |r| r.to_string());
        writeln!(out, "DODAG: {} node, id {}", role, info.network.id)?;
        writeln!(
            out,
            "radio: channel {}, address {}",
            info.radio.channel, info.radio.address
        )?;
        let neighbors: Vec<String> = info
            .neighbors
            .iter()
            .map(|(id, addr)| format!("{}={}", id, addr))
            .collect();
        writeln!(out, "neighbors: {}", neighbors.join(", "))?;
        writeln!(out, "udp: {}", self.node.bridge().stats())?;
        Ok(())
    }

    /// Client-node style address change with read-back.
    pub fn set_radio_address(&self, address: u16, out: &mut dyn Write) -> Result<()> {
        writeln!(out, "[transceiver] trying to set address {}", address)?;
        match self.node.transceiver().set_address(address) {
            Ok(effective) => writeln!(out, "[transceiver] got address: {}", effective)?,
            Err(e) => writeln!(out, "[transceiver] could not set address {}: {}", address, e)?,
        }
        Ok(())
    }
}

/// Report a relay control failure; an absent relay gets the stack-down line.
fn relay_failure(out: &mut dyn Write, what: &str, error: Error) -> Result<()> {
    match error {
        Error::NotRunning(_) => writeln!(out, "{}", RELAY_DOWN)?,
        e => writeln!(out, "{} failed: {}", what, e)?,
    }
    Ok(())
}
