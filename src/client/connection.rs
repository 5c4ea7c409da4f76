//! Client Connection Manager
//!
//! One `Connection` describes a server endpoint and owns at most one live socket.
//! The protocol is not persistent: every command opens a fresh socket, sends
//! one request, reads the response to end of stream and closes the socket again.

use super::connector::{ClientStream, Connector, TcpConnector};
use super::quality::{QUALITY_FAILURE, quality_for_delta};
use crate::config::IDLE_TIMEOUT;
use crate::protocol;
use crate::utils::error::{NetcmdError, Result};
use futures::io::{AsyncWriteExt, BufReader};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Lifecycle of a `Connection`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    /// A socket is open
    Connected,
    /// The last socket was closed
    Closed,
}

/// A client endpoint and its current socket
pub struct Connection {
    hostname: String,
    port: u16,
    use_tls: bool,
    state: ConnectionState,
    quality: i32,
    stream: Option<Box<dyn ClientStream>>,
    connector: Arc<dyn Connector>,
    idle_timeout: Duration,
}

impl Connection {
    /// Describe an endpoint; nothing is opened until `connect` or `send_command`
    ///
    /// # Arguments
    /// * `hostname` - Host name or IP address of the server
    /// * `port` - Server port
    /// * `use_tls` - Ask the connector for a TLS socket
    pub fn new(hostname: impl Into<String>, port: u16, use_tls: bool) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            use_tls,
            state: ConnectionState::Idle,
            quality: QUALITY_FAILURE,
            stream: None,
            connector: Arc::new(TcpConnector),
            idle_timeout: IDLE_TIMEOUT,
        }
    }

    /// Open sockets through `connector` instead of plain TCP
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Override the 30 second idle timeout
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Open a socket to the endpoint, replacing any socket already open
    ///
    /// # Returns
    /// * `Result<()>` - `Connection` error when the socket cannot be established
    pub async fn connect(&mut self) -> Result<()> {
        self.close();

        let opened = async_std::io::timeout(
            self.idle_timeout,
            self.connector.open_socket(&self.hostname, self.port, self.use_tls),
        )
        .await;

        match opened {
            Ok(stream) => {
                debug!(host = %self.hostname, port = self.port, "Connected");
                self.stream = Some(stream);
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(source) => Err(NetcmdError::Connection {
                host: self.hostname.clone(),
                port: self.port,
                source,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.stream.is_some()
    }

    /// Send one command and return the server's response
    ///
    /// Opens a fresh socket, writes the request frame, reads until the server
    /// closes, and closes the socket whether or not the round trip succeeded.
    ///
    /// # Arguments
    /// * `name` - Command name
    /// * `arguments` - Argument lines, sent in order
    ///
    /// # Returns
    /// * `Result<String>` - The response lines concatenated
    pub async fn send_command<S: AsRef<str>>(
        &mut self,
        name: &str,
        arguments: &[S],
    ) -> Result<String> {
        self.connect().await?;
        let result = self.round_trip(name, arguments).await;
        self.close();
        result
    }

    async fn round_trip<S: AsRef<str>>(&mut self, name: &str, arguments: &[S]) -> Result<String> {
        let idle_timeout = self.idle_timeout;
        let stream = self.stream.as_mut().ok_or(NetcmdError::NotConnected)?;

        let frame = protocol::encode_request(name, arguments);
        async_std::io::timeout(idle_timeout, async {
            stream.write_all(frame.as_bytes()).await?;
            stream.flush().await
        })
        .await
        .map_err(NetcmdError::Transport)?;

        let mut reader = BufReader::new(stream);
        protocol::read_response(&mut reader, idle_timeout).await
    }

    /// Measure the connection quality with one `ping` round trip
    ///
    /// Never fails: a transport error or a reply that is not a millisecond
    /// timestamp records `QUALITY_FAILURE`.
    ///
    /// # Returns
    /// * `i32` - The newly recorded quality
    pub async fn poll_quality(&mut self) -> i32 {
        let sent_at = chrono::Utc::now().timestamp_millis();

        self.quality = match self.send_command::<&str>("ping", &[]).await {
            Ok(response) => match response.trim().parse::<i64>() {
                Ok(server_time) => quality_for_delta(server_time.saturating_sub(sent_at)),
                Err(_) => {
                    warn!("Server does not support ping (replied '{}')", response);
                    QUALITY_FAILURE
                }
            },
            Err(e) => {
                warn!("Quality poll failed: {}", e);
                QUALITY_FAILURE
            }
        };

        self.quality
    }

    /// Last quality recorded by `poll_quality`; never polls by itself
    pub fn connection_quality(&self) -> i32 {
        self.quality
    }

    /// Close the socket; a no-op when none is open
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            self.state = ConnectionState::Closed;
            debug!(host = %self.hostname, port = self.port, "Connection closed");
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("state", &self.state)
            .field("quality", &self.quality)
            .finish()
    }
}
