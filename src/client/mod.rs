//! Client Module
//!
//! The outbound side of netcmd: a connection manager that performs one request
//! per socket, the connector seam that opens plain or TLS sockets, and the
//! latency-derived connection quality estimate.

/// Connector module - opens the socket for a connection attempt
pub mod connector;

/// Connection module - connection lifecycle and the command round trip
pub mod connection;

/// Quality module - maps a ping round trip to a 1-100 score
pub mod quality;

pub use connection::{Connection, ConnectionState};
pub use connector::{ClientStream, Connector, TcpConnector};
pub use quality::{QUALITY_FAILURE, quality_for_delta};
