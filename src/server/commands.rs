//! Commands Module
//!
//! This module holds the stock command handlers shipped with netcmd and builds
//! the command registry from a name to handler-kind mapping, usually the
//! `[commands]` table of the daemon configuration file.

use super::command_registry::{Command, CommandError, CommandRegistry, CommandResult};
use super::request_task::{BUILTIN_COMMANDS, VERSION};
use async_std::net::TcpStream;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Replies with the server's current Unix time in milliseconds
#[derive(Debug, Default)]
pub struct Ping;

impl Command for Ping {
    fn setup(
        &mut self,
        _arguments: Vec<String>,
        _connection: &TcpStream,
    ) -> Result<(), CommandError> {
        Ok(())
    }

    fn run(&mut self) -> CommandResult {
        Ok(chrono::Utc::now().timestamp_millis().to_string())
    }
}

/// Health check: the version string followed by `: OK`
#[derive(Debug, Default)]
pub struct Check;

impl Command for Check {
    fn setup(
        &mut self,
        _arguments: Vec<String>,
        _connection: &TcpStream,
    ) -> Result<(), CommandError> {
        Ok(())
    }

    fn run(&mut self) -> CommandResult {
        Ok(format!("{}: OK", VERSION))
    }
}

/// Replies with its arguments joined by single spaces
#[derive(Debug, Default)]
pub struct Echo {
    arguments: Vec<String>,
}

impl Command for Echo {
    fn setup(
        &mut self,
        arguments: Vec<String>,
        _connection: &TcpStream,
    ) -> Result<(), CommandError> {
        self.arguments = arguments;
        Ok(())
    }

    fn run(&mut self) -> CommandResult {
        Ok(self.arguments.join(" "))
    }
}

/// Replies with the address the client connected from
#[derive(Debug, Default)]
pub struct Whoami {
    peer: Option<SocketAddr>,
}

impl Command for Whoami {
    fn setup(
        &mut self,
        _arguments: Vec<String>,
        connection: &TcpStream,
    ) -> Result<(), CommandError> {
        self.peer = Some(connection.peer_addr()?);
        Ok(())
    }

    fn run(&mut self) -> CommandResult {
        self.peer
            .map(|peer| peer.to_string())
            .ok_or_else(|| CommandError::InvalidArguments("peer address unavailable".to_string()))
    }
}

/// Reply of `Website` when the page cannot be fetched
pub const WEBSITE_ERROR: &str = "Error loading page";

/// Upper bound on one page fetch
const WEBSITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches the page named by the first argument and replies with its body,
/// line breaks removed
#[derive(Debug, Default)]
pub struct Website {
    url: String,
}

/// Prefix `http://` unless the URL already names a scheme
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    }
}

fn fetch_page(url: &str) -> reqwest::Result<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(WEBSITE_TIMEOUT)
        .no_proxy()
        .build()?;
    client.get(url).send()?.error_for_status()?.text()
}

impl Command for Website {
    fn setup(
        &mut self,
        arguments: Vec<String>,
        _connection: &TcpStream,
    ) -> Result<(), CommandError> {
        let url = arguments
            .first()
            .ok_or_else(|| CommandError::InvalidArguments("expected a URL".to_string()))?;
        self.url = normalize_url(url);
        Ok(())
    }

    fn run(&mut self) -> CommandResult {
        debug!("Fetching {}", self.url);
        match fetch_page(&self.url) {
            Ok(body) => Ok(body.lines().collect()),
            Err(e) => {
                warn!("Could not load {}: {}", self.url, e);
                Ok(WEBSITE_ERROR.to_string())
            }
        }
    }
}

/// Handler kinds netcmd knows how to build
pub const STOCK_HANDLERS: &[&str] = &["Ping", "Check", "Echo", "Whoami", "Website"];

/// Builds one stock handler
type Constructor = fn() -> Box<dyn Command>;

fn new_ping() -> Box<dyn Command> {
    Box::new(Ping)
}

fn new_check() -> Box<dyn Command> {
    Box::new(Check)
}

fn new_echo() -> Box<dyn Command> {
    Box::new(Echo::default())
}

fn new_whoami() -> Box<dyn Command> {
    Box::new(Whoami::default())
}

fn new_website() -> Box<dyn Command> {
    Box::new(Website::default())
}

/// Look up a stock handler kind (case-insensitive)
///
/// # Returns
/// * `Option<(&'static str, Constructor)>` - Description and constructor
fn stock_handler(kind: &str) -> Option<(&'static str, Constructor)> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "ping" => Some(("Current server time in milliseconds", new_ping as Constructor)),
        "check" => Some(("Server health check", new_check as Constructor)),
        "echo" => Some(("Echo the arguments back", new_echo as Constructor)),
        "whoami" => Some(("Address of the calling client", new_whoami as Constructor)),
        "website" => Some(("Fetch a web page and return its body", new_website as Constructor)),
        _ => None,
    }
}

/// Mapping used when no `[commands]` table is configured
pub fn default_mapping() -> BTreeMap<String, String> {
    STOCK_HANDLERS
        .iter()
        .map(|kind| (kind.to_lowercase(), kind.to_string()))
        .collect()
}

/// Build the registry from a command name to handler kind mapping
///
/// Names that collide with a built-in command are skipped, since built-ins are
/// matched first and the handler could never be reached. A kind that no stock
/// handler provides is still registered; building it always fails, so requests
/// for it get the invalid-command response.
///
/// # Arguments
/// * `mapping` - Command name to handler kind
///
/// # Returns
/// * `CommandRegistry` - A registry containing the mapped commands
pub fn init_commands(mapping: &BTreeMap<String, String>) -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    for (name, kind) in mapping {
        let name = name.trim().to_lowercase();
        if BUILTIN_COMMANDS.contains(&name.as_str()) {
            warn!("Command '{}' is a built-in; ignoring mapping to '{}'", name, kind);
            continue;
        }

        match stock_handler(kind) {
            Some((description, constructor)) => {
                registry.register(name, description, move || Ok(constructor()));
            }
            None => {
                warn!("Command '{}' maps to unknown handler kind '{}'", name, kind);
                let kind = kind.clone();
                registry.register(
                    name,
                    format!("Unavailable handler kind '{}'", kind),
                    move || Err(CommandError::UnknownCommand(kind.clone())),
                );
            }
        }
    }

    registry
}
