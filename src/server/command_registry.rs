//! Command Registry Module
//!
//! This module provides the pluggable half of request dispatch. Command handlers
//! are registered under a lowercase name together with a factory that builds a
//! fresh handler for every request; the request task looks a name up, builds the
//! handler, hands it the parsed arguments and the connection, and runs it.

use async_std::net::TcpStream;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Result type for command execution
///
/// Represents the result of executing a command, containing either the response
/// string or a command error.
pub type CommandResult = Result<String, CommandError>;

/// Error type for command handling
///
/// Enumerates possible errors that can occur while building or running a handler:
/// - InvalidArguments: When a handler receives incorrect or missing arguments
/// - UnknownCommand: When a name maps to a handler kind nobody provides
/// - ExecutionError: When command execution fails due to an underlying error
/// - EmptyCommand: When an empty command string is received
/// - Panicked: When the handler panicked while running
#[derive(Debug)]
pub enum CommandError {
    InvalidArguments(String),
    UnknownCommand(String),
    ExecutionError(Box<dyn std::error::Error + Send + Sync>),
    EmptyCommand,
    Panicked(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::InvalidArguments(msg) => write!(f, "Invalid arguments: {}", msg),
            CommandError::UnknownCommand(cmd) => write!(f, "Unknown command: {}", cmd),
            CommandError::ExecutionError(err) => write!(f, "Execution error: {}", err),
            CommandError::EmptyCommand => write!(f, "Empty command"),
            CommandError::Panicked(msg) => write!(f, "Handler panicked: {}", msg),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<std::io::Error> for CommandError {
    fn from(error: std::io::Error) -> Self {
        CommandError::ExecutionError(Box::new(error))
    }
}

/// Trait for command handlers
///
/// A handler is built fresh for each request. `setup` receives the ordered
/// argument lines and a borrow of the client connection; the borrow ends when
/// `setup` returns, so anything a handler needs from the connection has to be
/// copied out there. `run` produces the single response string.
pub trait Command: Send {
    /// Prepare the handler for one invocation
    ///
    /// # Arguments
    /// * `arguments` - Argument lines in the order the client sent them
    /// * `connection` - The accepted client connection
    fn setup(
        &mut self,
        arguments: Vec<String>,
        connection: &TcpStream,
    ) -> Result<(), CommandError>;

    /// Execute the command
    ///
    /// # Returns
    /// * `CommandResult` - The response to write back to the client
    fn run(&mut self) -> CommandResult;
}

/// Builds a fresh handler for one request
pub type CommandFactory =
    Arc<dyn Fn() -> Result<Box<dyn Command>, CommandError> + Send + Sync>;

struct RegisteredCommand {
    description: String,
    factory: CommandFactory,
}

/// Command registry for dynamic command management
///
/// Maps lowercase command names to handler factories. Lookups are case-insensitive.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, RegisteredCommand>,
}

impl CommandRegistry {
    /// Create a new, empty command registry
    pub fn new() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }

    /// Register a handler factory, replacing any previous one with the same name
    ///
    /// # Arguments
    /// * `name` - The name of the command to register
    /// * `description` - Human-readable summary of the command
    /// * `factory` - Builds a handler for each request
    pub fn register<S, D, F>(&mut self, name: S, description: D, factory: F)
    where
        S: Into<String>,
        D: Into<String>,
        F: Fn() -> Result<Box<dyn Command>, CommandError> + Send + Sync + 'static,
    {
        let name = name.into().trim().to_lowercase();
        info!("Registering command: {}", name);
        self.commands.insert(
            name,
            RegisteredCommand {
                description: description.into(),
                factory: Arc::new(factory),
            },
        );
    }

    /// Find the factory for `name`
    pub fn lookup(&self, name: &str) -> Option<CommandFactory> {
        let name = name.trim().to_lowercase();
        let found = self.commands.get(&name).map(|cmd| Arc::clone(&cmd.factory));
        if found.is_none() {
            debug!("No handler registered for '{}'", name);
        }
        found
    }

    /// Whether a handler is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(&name.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// List all registered commands with descriptions, sorted by name
    pub fn list_commands(&self) -> String {
        let mut commands: Vec<_> = self.commands.iter().collect();
        commands.sort_by_key(|(name, _)| *name);

        commands
            .iter()
            .map(|(name, cmd)| format!("{}: {}", name, cmd.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.commands.keys().collect();
        names.sort();
        f.debug_struct("CommandRegistry").field("commands", &names).finish()
    }
}
