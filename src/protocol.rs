//! Wire Protocol Module
//!
//! Line-oriented framing shared by the client and the server. A request is the
//! command name on the first line, one argument per following line, and the
//! sentinel line `END COMMAND`. The response is whatever the server writes before
//! closing the connection; end of stream marks completion.

use crate::utils::error::{NetcmdError, Result};
use futures::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use std::time::Duration;

/// Sentinel line terminating the argument block
pub const END_COMMAND: &str = "END COMMAND";

/// Upper bound on the bytes of one request (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// A decoded request frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Case-folded, trimmed command name; empty when none was sent
    pub command: String,
    /// Argument lines in the order they were received
    pub arguments: Vec<String>,
}

/// Encode a command and its arguments as a request frame
pub fn encode_request<S: AsRef<str>>(name: &str, arguments: &[S]) -> String {
    let mut frame = String::with_capacity(name.len() + END_COMMAND.len() + 2);
    frame.push_str(name);
    frame.push('\n');
    for argument in arguments {
        frame.push_str(argument.as_ref());
        frame.push('\n');
    }
    frame.push_str(END_COMMAND);
    frame.push('\n');
    frame
}

/// Encode a response as the single line written back to the client
pub fn encode_response(response: &str) -> String {
    format!("{}\n", response)
}

fn strip_line_ending(line: &mut String) {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
}

/// Read one line, bounded by the idle timeout. `Ok(None)` is end of stream.
///
/// With a `limit`, at most `limit + 1` bytes are buffered across all lines of the
/// frame, so a peer that never sends a newline cannot grow the buffer unbounded.
async fn next_line<R>(
    reader: &mut R,
    idle_timeout: Duration,
    consumed: &mut usize,
    limit: Option<usize>,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    // Bytes still allowed for this frame, plus one to detect overflow
    let remaining = limit.map_or(u64::MAX, |limit| (limit + 1 - *consumed) as u64);

    let mut buf = Vec::new();
    let mut bounded = (&mut *reader).take(remaining);
    let read = async_std::io::timeout(idle_timeout, bounded.read_until(b'\n', &mut buf))
        .await
        .map_err(NetcmdError::Transport)?;
    if read == 0 {
        return Ok(None);
    }

    *consumed += read;
    if let Some(limit) = limit {
        if *consumed > limit {
            return Err(NetcmdError::Protocol(format!(
                "request larger than {} bytes",
                limit
            )));
        }
    }

    let mut line = String::from_utf8(buf)?;
    strip_line_ending(&mut line);
    Ok(Some(line))
}

/// Read a request frame up to the sentinel or end of stream
///
/// # Arguments
/// * `reader` - Buffered side of the connection
/// * `idle_timeout` - Longest wait for any single line
///
/// # Returns
/// * `Result<Request>` - The decoded request; `Protocol` for invalid UTF-8 or an
///   oversized frame, `Transport` for I/O failures and idle timeouts
pub async fn read_request<R>(reader: &mut R, idle_timeout: Duration) -> Result<Request>
where
    R: AsyncBufRead + Unpin,
{
    let limit = Some(MAX_MESSAGE_SIZE);
    let mut consumed = 0;
    let mut request = Request::default();

    match next_line(reader, idle_timeout, &mut consumed, limit).await? {
        None => return Ok(request),
        Some(line) if line == END_COMMAND => return Ok(request),
        Some(line) => request.command = line.trim().to_lowercase(),
    }

    while let Some(line) = next_line(reader, idle_timeout, &mut consumed, limit).await? {
        if line == END_COMMAND {
            break;
        }
        request.arguments.push(line);
    }

    Ok(request)
}

/// Read a response: every line until end of stream, concatenated
///
/// Responses are not size-capped; `MAX_MESSAGE_SIZE` only bounds requests.
pub async fn read_response<R>(reader: &mut R, idle_timeout: Duration) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0;
    let mut response = String::new();
    while let Some(line) = next_line(reader, idle_timeout, &mut consumed, None).await? {
        response.push_str(&line);
    }
    Ok(response)
}
