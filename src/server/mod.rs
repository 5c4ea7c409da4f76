//! Server Module
//!
//! This module contains the server half of netcmd: the admission controller
//! that owns the listening socket, the per-connection request task, and the
//! command registry that resolves every non built-in command to a handler.
//!
//! The server module is organized into four components:
//! - command_registry: The handler trait and the name to factory registry
//! - commands: Stock handlers and registry initialization from a mapping
//! - request_task: Request framing, built-in commands and handler dispatch
//! - server: The accept loop and admission control

/// Command registry module - handler trait and dynamic command registration
pub mod command_registry;

/// Commands module - stock handlers and registry initialization
pub mod commands;

/// Request task module - processes one accepted connection
pub mod request_task;

/// Server module - accept loop, admission control and server lifecycle
pub mod server;

pub use command_registry::{Command, CommandError, CommandFactory, CommandRegistry, CommandResult};
pub use server::Server;

/// Server tests module - end-to-end tests over loopback sockets
#[cfg(test)]
mod server_tests;
