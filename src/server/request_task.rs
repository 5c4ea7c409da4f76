//! Request Task
//!
//! One accepted connection, processed exactly once: read the request frame,
//! answer built-ins directly or defer to the command registry, write a single
//! response line and close the connection.

use super::command_registry::{CommandError, CommandResult};
use super::server::{ResourceGuard, ServerShared};
use crate::protocol::{self, Request};
use crate::utils::error::{NetcmdError, Result};
use async_std::io::BufReader;
use async_std::net::TcpStream;
use async_std::task;
use futures::io::AsyncWriteExt;
use std::any::Any;
use std::net::Shutdown;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Version string answered by the `version` built-in
pub const VERSION: &str = concat!("netcmd ", env!("CARGO_PKG_VERSION"));

/// Any handler failure, or a command nobody handles
pub const RESPONSE_INVALID: &str = "INVALID";
pub const RESPONSE_PAUSED: &str = "Error: Server is paused.";
pub const RESPONSE_CAPACITY: &str = "Error: Server has reached maximum capacity.";
pub const RESPONSE_NO_COMMAND: &str = "Error: No command.";
pub const RESPONSE_MALFORMED: &str = "Error: Malformed request.";
pub const RESPONSE_PAUSE: &str = "Server paused.";
pub const RESPONSE_UNPAUSE: &str = "Server Unpaused.";

/// Commands answered by the server itself, before the registry is consulted
pub const BUILTIN_COMMANDS: &[&str] = &["stats", "version", "pause", "unpause"];

/// How the accept loop let a connection in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Holds an execution slot
    Slot,
    /// Accepted while the server was full; answers with the capacity error
    OverCapacity,
    /// Accepted while paused, uncounted; may only run `unpause`
    Paused,
}

pub(crate) struct RequestTask {
    connection: TcpStream,
    server: Arc<ServerShared>,
    admission: Admission,
}

impl RequestTask {
    pub(crate) fn new(
        connection: TcpStream,
        server: Arc<ServerShared>,
        admission: Admission,
    ) -> Self {
        Self {
            connection,
            server,
            admission,
        }
    }

    /// Process the connection to completion
    ///
    /// # Arguments
    /// * `slot` - Execution slot held for the whole request; `None` for the
    ///   capacity and paused fast paths, which are never counted
    pub(crate) async fn run(self, slot: Option<ResourceGuard>) {
        // Read the frame; only decode failures still get an answer
        let response = match self.read_request().await {
            Ok(request) => self.respond(request).await,
            Err(NetcmdError::Protocol(reason)) => {
                warn!("Malformed request: {}", reason);
                RESPONSE_MALFORMED.to_string()
            }
            Err(e) => {
                error!("Could not read request: {}", e);
                self.close();
                return;
            }
        };

        // Single response line, then close
        if let Err(e) = self.write_response(&response).await {
            warn!("Could not write response: {}", e);
        }
        self.close();

        // Release the slot last so the next queued request starts after this one is done
        drop(slot);
    }

    async fn read_request(&self) -> Result<Request> {
        let mut reader = BufReader::new(&self.connection);
        protocol::read_request(&mut reader, self.server.idle_timeout()).await
    }

    async fn write_response(&self, response: &str) -> Result<()> {
        let line = protocol::encode_response(response);
        let mut writer = &self.connection;
        async_std::io::timeout(self.server.idle_timeout(), async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        })
        .await
        .map_err(NetcmdError::Transport)
    }

    fn close(&self) {
        if let Err(e) = self.connection.shutdown(Shutdown::Both) {
            debug!("Connection already closed: {}", e);
        }
    }

    /// Pick the response; first matching rule wins
    async fn respond(&self, request: Request) -> String {
        let command = request.command.clone();
        let command = command.as_str();

        // Paused, either now or when this connection was accepted
        let paused = self.admission == Admission::Paused || self.server.is_paused();
        if paused && command != "unpause" {
            warn!("Server is paused.");
            return RESPONSE_PAUSED.to_string();
        }

        // Accepted over the ceiling
        if self.admission == Admission::OverCapacity {
            warn!("Server has reached maximum capacity.");
            return RESPONSE_CAPACITY.to_string();
        }

        if command.is_empty() {
            warn!("Rejecting request: {}", CommandError::EmptyCommand);
            return RESPONSE_NO_COMMAND.to_string();
        }

        // Built-ins first, then the registry
        match command {
            "stats" => {
                info!("Executing command 'stats'");
                self.server.stats_line()
            }
            "version" => {
                info!("Executing command 'version'");
                VERSION.to_string()
            }
            "pause" => {
                self.server.pause();
                RESPONSE_PAUSE.to_string()
            }
            "unpause" => {
                self.server.unpause();
                RESPONSE_UNPAUSE.to_string()
            }
            _ => match self.dispatch(request).await {
                Ok(response) => response,
                Err(e) => {
                    let failure = NetcmdError::Handler(e.to_string());
                    error!("Error executing command '{}': {}", command, failure);
                    RESPONSE_INVALID.to_string()
                }
            },
        }
    }

    /// Build, set up and run the registered handler for the request
    async fn dispatch(&self, request: Request) -> CommandResult {
        // Only requests holding a slot may reach a handler
        if self.admission != Admission::Slot {
            return Err(CommandError::ExecutionError(
                "request was admitted without an execution slot".into(),
            ));
        }

        let Request { command, arguments } = request;
        let factory = self
            .server
            .registry()
            .lookup(&command)
            .ok_or_else(|| CommandError::UnknownCommand(command.clone()))?;

        // Construction and setup see the connection, so they stay on this task
        let connection = &self.connection;
        let mut handler = catch_handler_panic(|| {
            let mut handler = (*factory)()?;
            handler.setup(arguments, connection)?;
            Ok(handler)
        })?;

        // `run` may block; keep it off the executor threads
        info!("Executing command '{}'", command);
        task::spawn_blocking(move || catch_handler_panic(|| handler.run())).await
    }
}

/// Run handler code, turning a panic into a `CommandError`
fn catch_handler_panic<T, F>(f: F) -> std::result::Result<T, CommandError>
where
    F: FnOnce() -> std::result::Result<T, CommandError>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(CommandError::Panicked(panic_message(payload.as_ref())))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
