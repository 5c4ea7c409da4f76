//! Unified Error Handling System
//!
//! This module defines the error taxonomy shared by the netcmd client and server.
//! Every variant except `Bind` and `Config` is local to one connection: it is either
//! reported to the caller of a client operation or turned into a fixed textual
//! response by the server, and never affects other connections.

use std::net::SocketAddr;
use thiserror::Error;

/// Enumeration of all error types in the application
#[derive(Error, Debug)]
pub enum NetcmdError {
    /// The socket could not be established; the caller decides whether to retry
    #[error("Connection error {host}:{port}: {source}")]
    Connection {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure in the middle of a request
    #[error("Transport error: {0}")]
    Transport(#[source] std::io::Error),

    /// A request frame that could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server is at its admission ceiling
    #[error("Server has reached maximum capacity ({0} slots)")]
    Capacity(usize),

    /// A dispatched command handler could not be built or failed while running
    #[error("Handler error: {0}")]
    Handler(String),

    /// The listening socket could not be bound; fatal for server startup
    #[error("Could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An operation that needs a live socket was attempted without one
    #[error("Not connected")]
    NotConnected,

    /// `start` was called on a server that is already accepting connections
    #[error("Server already running on {0}")]
    AlreadyRunning(SocketAddr),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// System I/O error outside of a request round trip
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for NetcmdError {
    fn from(error: toml::de::Error) -> Self {
        NetcmdError::Config(error.to_string())
    }
}

impl From<std::string::FromUtf8Error> for NetcmdError {
    fn from(error: std::string::FromUtf8Error) -> Self {
        NetcmdError::Protocol(error.to_string())
    }
}

/// Standardized result type for the entire application
pub type Result<T> = std::result::Result<T, NetcmdError>;
