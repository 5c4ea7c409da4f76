//! netcmd: a line-oriented command protocol over raw sockets
//!
//! A client opens a connection, writes a command name, optional argument lines
//! and the `END COMMAND` sentinel, then reads a single response line. The server
//! accepts many such connections concurrently under an admission ceiling and
//! answers a few built-in administrative commands itself; everything else is
//! dispatched to handlers looked up by name in a [`server::CommandRegistry`].

pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod utils;

pub use utils::error::{NetcmdError, Result};
