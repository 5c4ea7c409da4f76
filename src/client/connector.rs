//! Socket construction for client connections.

use async_std::net::TcpStream;
use futures::future::BoxFuture;
use futures::io::{AsyncRead, AsyncWrite};
use std::io;

/// Byte stream a client connection talks over
pub trait ClientStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> ClientStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Opens the socket behind a `Connection`
///
/// Implement this to provide TLS: `secure` is the connection's `use_tls` flag.
pub trait Connector: Send + Sync {
    fn open_socket<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        secure: bool,
    ) -> BoxFuture<'a, io::Result<Box<dyn ClientStream>>>;
}

/// Plain TCP connector; refuses `secure` connections
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn open_socket<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        secure: bool,
    ) -> BoxFuture<'a, io::Result<Box<dyn ClientStream>>> {
        Box::pin(async move {
            if secure {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "no TLS connector configured",
                ));
            }
            let stream = TcpStream::connect((host, port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as Box<dyn ClientStream>)
        })
    }
}
