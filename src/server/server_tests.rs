// Test suite for the server module
// Covers the command registry, the stock commands, and the admission
// controller end to end over loopback sockets.

use crate::client::Connection;
use crate::config::ServerConfig;
use crate::protocol::MAX_MESSAGE_SIZE;
use crate::server::Server;
use crate::server::command_registry::{Command, CommandError, CommandRegistry, CommandResult};
use crate::server::commands::{default_mapping, init_commands};
use crate::server::request_task::{
    RESPONSE_CAPACITY, RESPONSE_INVALID, RESPONSE_MALFORMED, RESPONSE_NO_COMMAND,
    RESPONSE_PAUSE, RESPONSE_PAUSED, RESPONSE_UNPAUSE, VERSION,
};
use async_std::net::TcpStream;
use async_std::task;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

fn loopback(max_concurrency: usize) -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0, max_concurrency)
}

async fn start_server(max_concurrency: usize, registry: CommandRegistry) -> (Server, SocketAddr) {
    let server = Server::new(loopback(max_concurrency), registry);
    let addr = server.start().await.unwrap();
    (server, addr)
}

async fn send(addr: SocketAddr, name: &str, arguments: &[&str]) -> String {
    Connection::new("127.0.0.1", addr.port(), false)
        .send_command(name, arguments)
        .await
        .unwrap()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        task::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Blocks every `hold` handler until opened, tracking how many run at once
#[derive(Clone, Default)]
struct Gate {
    open: Arc<(Mutex<bool>, Condvar)>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gate {
    fn release(&self) {
        let (lock, cvar) = &*self.open;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.open;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

struct Hold {
    gate: Gate,
}

impl Command for Hold {
    fn setup(
        &mut self,
        _arguments: Vec<String>,
        _connection: &TcpStream,
    ) -> Result<(), CommandError> {
        Ok(())
    }

    fn run(&mut self) -> CommandResult {
        let now = self.gate.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate.peak.fetch_max(now, Ordering::SeqCst);
        self.gate.wait();
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
        Ok("released".to_string())
    }
}

fn gated_registry(gate: &Gate) -> CommandRegistry {
    let mut registry = init_commands(&default_mapping());
    let gate = gate.clone();
    registry.register("hold", "Block until the test releases the gate", move || {
        Ok(Box::new(Hold { gate: gate.clone() }) as Box<dyn Command>)
    });
    registry
}

/// Handler whose behaviour is picked per test
struct Scripted {
    fail_setup: bool,
    outcome: fn() -> CommandResult,
}

impl Command for Scripted {
    fn setup(
        &mut self,
        _arguments: Vec<String>,
        _connection: &TcpStream,
    ) -> Result<(), CommandError> {
        if self.fail_setup {
            return Err(CommandError::InvalidArguments("missing argument".to_string()));
        }
        Ok(())
    }

    fn run(&mut self) -> CommandResult {
        (self.outcome)()
    }
}

fn scripted(fail_setup: bool, outcome: fn() -> CommandResult) -> Box<dyn Command> {
    Box::new(Scripted {
        fail_setup,
        outcome,
    })
}

// Tests for the commands module and the registry
#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn test_default_commands_registered() {
        let registry = init_commands(&default_mapping());

        assert_eq!(registry.len(), 5);
        for name in ["ping", "check", "echo", "whoami", "website"] {
            assert!(registry.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_registry_creation() {
        let registry = CommandRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.list_commands(), "");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = init_commands(&default_mapping());
        assert!(registry.lookup("PING").is_some());
        assert!(registry.lookup("  Echo ").is_some());
        assert!(registry.lookup("reddit").is_none());
    }

    #[test]
    fn test_builtin_names_are_not_registered() {
        let mut mapping = BTreeMap::new();
        mapping.insert("version".to_string(), "Echo".to_string());
        mapping.insert("Stats".to_string(), "Ping".to_string());
        mapping.insert("shout".to_string(), "echo".to_string());

        let registry = init_commands(&mapping);
        assert!(!registry.contains("version"));
        assert!(!registry.contains("stats"));
        assert!(registry.contains("shout"));
    }

    #[test]
    fn test_unknown_kind_registers_failing_factory() {
        let mut mapping = BTreeMap::new();
        mapping.insert("reddit".to_string(), "Reddit".to_string());

        let registry = init_commands(&mapping);
        let factory = registry.lookup("reddit").unwrap();
        match (*factory)() {
            Err(CommandError::UnknownCommand(kind)) => assert_eq!(kind, "Reddit"),
            _ => panic!("Expected UnknownCommand error"),
        }
    }

    #[test]
    fn test_list_commands() {
        let registry = init_commands(&default_mapping());
        let listing = registry.list_commands();

        assert!(listing.contains("echo: Echo the arguments back"));
        assert!(listing.contains("ping: Current server time in milliseconds"));
        assert!(listing.starts_with("check:"));
    }

    #[test]
    fn test_register_replaces_existing() {
        let mut registry = CommandRegistry::new();
        registry.register("x", "first", || Ok(scripted(false, || Ok("1".to_string()))));
        registry.register("X", "second", || Ok(scripted(false, || Ok("2".to_string()))));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list_commands(), "x: second");
    }

    #[test]
    fn test_command_error_display() {
        let invalid_args = CommandError::InvalidArguments("test message".to_string());
        assert_eq!(format!("{}", invalid_args), "Invalid arguments: test message");

        let unknown_cmd = CommandError::UnknownCommand("test_command".to_string());
        assert_eq!(format!("{}", unknown_cmd), "Unknown command: test_command");

        let exec_error = CommandError::ExecutionError("test error".into());
        assert_eq!(format!("{}", exec_error), "Execution error: test error");

        assert_eq!(format!("{}", CommandError::EmptyCommand), "Empty command");
        assert_eq!(
            format!("{}", CommandError::Panicked("boom".to_string())),
            "Handler panicked: boom"
        );
    }
}

// Tests for request processing over real sockets
#[cfg(test)]
mod request_tests {
    use super::*;
    use futures::io::{AsyncReadExt, AsyncWriteExt};

    #[async_std::test]
    async fn test_version_builtin() {
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;

        assert_eq!(send(addr, "version", &[]).await, VERSION);
        assert_eq!(send(addr, "VeRsIoN", &[]).await, VERSION);

        server.stop().await;
    }

    #[async_std::test]
    async fn test_stats_shape_and_count() {
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;

        let stats = send(addr, "stats", &[]).await;
        let (started, count) = stats.rsplit_once(',').unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(started).is_ok(), "{}", stats);
        assert_eq!(count, "1");
        assert_eq!(server.stats(), stats);

        send(addr, "version", &[]).await;
        let stats = send(addr, "stats", &[]).await;
        assert!(stats.ends_with(",3"), "{}", stats);

        server.stop().await;
    }

    #[async_std::test]
    async fn test_unknown_commands_are_invalid() {
        let (server, addr) = start_server(4, init_commands(&default_mapping())).await;

        assert_eq!(send(addr, "reddit", &[]).await, RESPONSE_INVALID);
        assert_eq!(send(addr, "no such thing", &["a", "b"]).await, RESPONSE_INVALID);
        assert_eq!(send(addr, "END", &["COMMAND"]).await, RESPONSE_INVALID);

        server.stop().await;
    }

    #[async_std::test]
    async fn test_empty_command() {
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;

        assert_eq!(send(addr, "", &[]).await, RESPONSE_NO_COMMAND);
        assert_eq!(send(addr, "   ", &["arg"]).await, RESPONSE_NO_COMMAND);

        server.stop().await;
    }

    #[async_std::test]
    async fn test_registered_handlers() {
        let (server, addr) = start_server(4, init_commands(&default_mapping())).await;

        assert_eq!(send(addr, "echo", &["hello", "big world"]).await, "hello big world");
        assert_eq!(send(addr, "  ECHO ", &[]).await, "");
        assert_eq!(send(addr, "check", &[]).await, format!("{}: OK", VERSION));

        let ping = send(addr, "ping", &[]).await;
        let server_time: i64 = ping.parse().unwrap();
        assert!((server_time - chrono::Utc::now().timestamp_millis()).abs() < 60_000);

        let peer: SocketAddr = send(addr, "whoami", &[]).await.parse().unwrap();
        assert!(peer.ip().is_loopback());

        server.stop().await;
    }

    #[async_std::test]
    async fn test_handler_failures_answer_invalid() {
        let mut mapping = default_mapping();
        mapping.insert("reddit".to_string(), "Reddit".to_string());
        let mut registry = init_commands(&mapping);

        registry.register("fails", "run fails", || {
            Ok(scripted(false, || Err(CommandError::ExecutionError("down".into()))))
        });
        registry.register("panics", "run panics", || {
            Ok(scripted(false, || panic!("handler blew up")))
        });
        registry.register("badsetup", "setup fails", || {
            Ok(scripted(true, || Ok("unreachable".to_string())))
        });
        registry.register("unbuildable", "factory fails", || {
            Err(CommandError::ExecutionError("cannot build".into()))
        });

        let (server, addr) = start_server(4, registry).await;

        for name in ["fails", "panics", "badsetup", "unbuildable", "reddit", "website"] {
            assert_eq!(send(addr, name, &[]).await, RESPONSE_INVALID, "{}", name);
        }

        // The server keeps serving and every slot came back
        assert_eq!(send(addr, "version", &[]).await, VERSION);
        wait_until(|| server.running_count() == 0).await;

        server.stop().await;
    }

    #[async_std::test]
    async fn test_malformed_request() {
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[0x65, 0xff, 0xfe, b'\n']).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, format!("{}\n", RESPONSE_MALFORMED));

        server.stop().await;
    }

    #[async_std::test]
    async fn test_unterminated_oversized_request_is_malformed() {
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;

        // One byte over the cap and no newline, write half left open
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let flood = vec![b'x'; MAX_MESSAGE_SIZE + 1];
        stream.write_all(&flood).await.unwrap();

        let mut response = String::new();
        async_std::io::timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
            .await
            .unwrap();
        assert_eq!(response, format!("{}\n", RESPONSE_MALFORMED));

        wait_until(|| server.running_count() == 0).await;
        server.stop().await;
    }

    #[async_std::test]
    async fn test_large_response_reaches_client() {
        let mut registry = CommandRegistry::new();
        registry.register("big", "Two megabyte reply", || {
            Ok(scripted(false, || Ok("b".repeat(2 * MAX_MESSAGE_SIZE))))
        });
        let (server, addr) = start_server(2, registry).await;

        let response = send(addr, "big", &[]).await;
        assert_eq!(response.len(), 2 * MAX_MESSAGE_SIZE);

        server.stop().await;
    }

    #[async_std::test]
    async fn test_crlf_terminal_client() {
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"Echo\r\ntyped by hand\r\nEND COMMAND\r\n")
            .await
            .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, "typed by hand\n");

        server.stop().await;
    }
}

// Tests for pause, capacity and lifecycle
#[cfg(test)]
mod admission_tests {
    use super::*;
    use futures::io::{AsyncReadExt, AsyncWriteExt};

    #[async_std::test]
    async fn test_pause_scenario() {
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;

        assert_eq!(send(addr, "version", &[]).await, VERSION);
        assert_eq!(send(addr, "pause", &[]).await, RESPONSE_PAUSE);
        assert!(server.is_paused());

        for name in ["version", "stats", "echo", "pause", "reddit"] {
            assert_eq!(send(addr, name, &["x"]).await, RESPONSE_PAUSED, "{}", name);
            assert_eq!(server.running_count(), 0);
        }

        assert_eq!(send(addr, "UNPAUSE", &[]).await, "Server Unpaused.");
        assert!(!server.is_paused());
        assert_eq!(send(addr, "version", &[]).await, VERSION);

        server.stop().await;
    }

    #[async_std::test]
    async fn test_pause_through_server_handle() {
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;

        server.pause();
        assert_eq!(send(addr, "echo", &["hi"]).await, RESPONSE_PAUSED);
        server.unpause();
        assert_eq!(send(addr, "echo", &["hi"]).await, "hi");

        server.stop().await;
    }

    #[async_std::test]
    async fn test_connection_accepted_while_paused_never_runs_handler() {
        let gate = Gate::default();
        let (server, addr) = start_server(1, gated_registry(&gate)).await;
        server.pause();

        // Accepted on the paused path, then the server resumes before the request arrives
        let mut early = TcpStream::connect(addr).await.unwrap();
        wait_until(|| server.total_requests() == 1).await;
        server.unpause();

        early.write_all(b"hold\nEND COMMAND\n").await.unwrap();
        let mut response = String::new();
        early.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, format!("{}\n", RESPONSE_PAUSED));
        assert_eq!(gate.peak.load(Ordering::SeqCst), 0);
        assert_eq!(server.running_count(), 0);

        // The same path may still lift the pause
        server.pause();
        let mut resumer = TcpStream::connect(addr).await.unwrap();
        wait_until(|| server.total_requests() == 2).await;
        server.unpause();
        resumer.write_all(b"unpause\nEND COMMAND\n").await.unwrap();
        let mut response = String::new();
        resumer.read_to_string(&mut response).await.unwrap();
        assert_eq!(response, format!("{}\n", RESPONSE_UNPAUSE));

        // Normal admission still honours the ceiling of one
        let held = task::spawn(async move { send(addr, "hold", &[]).await });
        wait_until(|| server.running_count() == 1).await;
        assert_eq!(send(addr, "hold", &[]).await, RESPONSE_CAPACITY);
        gate.release();
        assert_eq!(held.await, "released");
        assert!(gate.peak.load(Ordering::SeqCst) <= 1);

        server.stop().await;
    }

    #[async_std::test]
    async fn test_capacity_rejection() {
        let gate = Gate::default();
        let (server, addr) = start_server(2, gated_registry(&gate)).await;

        let held: Vec<_> = (0..2)
            .map(|_| task::spawn(async move { send(addr, "hold", &[]).await }))
            .collect();
        wait_until(|| server.running_count() == 2).await;

        assert_eq!(send(addr, "version", &[]).await, RESPONSE_CAPACITY);
        assert_eq!(send(addr, "hold", &[]).await, RESPONSE_CAPACITY);
        assert_eq!(server.running_count(), 2);
        assert_eq!(server.pending_count(), 0);

        gate.release();
        for handle in held {
            assert_eq!(handle.await, "released");
        }
        wait_until(|| server.running_count() == 0).await;
        assert_eq!(send(addr, "version", &[]).await, VERSION);

        server.stop().await;
    }

    #[async_std::test]
    async fn test_burst_admission_never_exceeds_ceiling() {
        const BURST: usize = 8;
        let gate = Gate::default();
        let (server, addr) = start_server(2, gated_registry(&gate)).await;
        let server = Arc::new(server);

        let clients: Vec<_> = (0..BURST)
            .map(|_| task::spawn(async move { send(addr, "hold", &[]).await }))
            .collect();

        let watched = Arc::clone(&server);
        wait_until(move || {
            assert!(watched.running_count() + watched.pending_count() <= 2);
            watched.total_requests() == BURST as u64 && watched.running_count() == 2
        })
        .await;

        gate.release();
        let mut released = 0;
        let mut rejected = 0;
        for client in clients {
            match client.await.as_str() {
                "released" => released += 1,
                RESPONSE_CAPACITY => rejected += 1,
                other => panic!("unexpected response {}", other),
            }
        }

        assert_eq!(released, 2);
        assert_eq!(rejected, BURST - 2);
        assert!(gate.peak.load(Ordering::SeqCst) <= 2);
        wait_until(|| server.running_count() == 0 && server.pending_count() == 0).await;

        server.stop().await;
    }

    #[async_std::test]
    async fn test_stop_then_start_resets_counters() {
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;
        assert!(!server.is_stopped());

        send(addr, "version", &[]).await;
        send(addr, "version", &[]).await;
        assert_eq!(server.total_requests(), 2);
        let first_start = server.started_at().unwrap();

        server.stop().await;
        assert!(server.is_stopped());
        assert!(server.started_at().is_none());
        assert_eq!(server.total_requests(), 0);
        assert!(server.local_addr().is_none());

        let mut stale = Connection::new("127.0.0.1", addr.port(), false);
        assert!(stale.send_command::<&str>("version", &[]).await.is_err());

        task::sleep(Duration::from_millis(5)).await;
        let addr = server.start().await.unwrap();
        assert_eq!(server.total_requests(), 0);
        assert!(server.started_at().unwrap() > first_start);
        assert!(send(addr, "stats", &[]).await.ends_with(",1"));

        server.stop().await;
        assert_eq!(server.stats(), ",0");
    }

    #[async_std::test]
    async fn test_stop_under_load_leaves_counters_reset() {
        let (server, addr) = start_server(4, init_commands(&default_mapping())).await;

        // Keep connections arriving while the server stops
        let clients: Vec<_> = (0..8)
            .map(|_| {
                task::spawn(async move {
                    let mut connection = Connection::new("127.0.0.1", addr.port(), false);
                    for _ in 0..20 {
                        if connection.send_command::<&str>("version", &[]).await.is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();
        wait_until(|| server.total_requests() > 0).await;

        server.stop().await;
        assert_eq!(server.total_requests(), 0);
        assert!(server.started_at().is_none());
        assert_eq!(server.stats(), ",0");

        for client in clients {
            client.await;
        }
        assert_eq!(server.total_requests(), 0);
    }

    #[async_std::test]
    async fn test_start_twice_is_rejected() {
        let (server, addr) = start_server(2, CommandRegistry::new()).await;

        match server.start().await {
            Err(crate::NetcmdError::AlreadyRunning(running)) => assert_eq!(running, addr),
            other => panic!("Expected AlreadyRunning, got {:?}", other),
        }

        server.stop().await;
    }

    #[async_std::test]
    async fn test_bind_failure_is_fatal() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let server = Server::new(ServerConfig::new("127.0.0.1", port, 2), CommandRegistry::new());
        assert!(matches!(
            server.start().await,
            Err(crate::NetcmdError::Bind { .. })
        ));
        assert!(server.is_stopped());
    }

    #[async_std::test]
    async fn test_zero_concurrency_refuses_to_start() {
        let server = Server::new(loopback(0), CommandRegistry::new());
        assert!(matches!(
            server.start().await,
            Err(crate::NetcmdError::Config(_))
        ));
    }

    #[async_std::test]
    async fn test_independent_instances() {
        let (first, first_addr) = start_server(1, init_commands(&default_mapping())).await;
        let (second, second_addr) = start_server(1, CommandRegistry::new()).await;
        assert_ne!(first_addr.port(), second_addr.port());

        second.pause();
        assert_eq!(send(first_addr, "echo", &["one"]).await, "one");
        assert_eq!(send(second_addr, "echo", &["two"]).await, RESPONSE_PAUSED);
        assert_eq!(first.total_requests(), 1);
        assert_eq!(second.total_requests(), 1);

        first.stop().await;
        second.stop().await;
    }
}

// Tests for the website handler
#[cfg(test)]
mod website_tests {
    use super::*;
    use crate::server::commands::{WEBSITE_ERROR, normalize_url};
    use std::io::{Read, Write};

    /// Serve one HTTP response on a loopback port
    fn serve_once(status: &'static str, body: &'static str) -> SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request);
            let reply = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(reply.as_bytes()).unwrap();
        });
        addr
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("example.org"), "http://example.org");
        assert_eq!(normalize_url(" example.org/a "), "http://example.org/a");
        assert_eq!(normalize_url("http://example.org"), "http://example.org");
        assert_eq!(normalize_url("https://example.org"), "https://example.org");
    }

    #[async_std::test]
    async fn test_website_returns_page_without_line_breaks() {
        let page = serve_once("200 OK", "<html>\r\n<body>hi</body>\n</html>\n");
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;

        let url = format!("{}/index.html", page);
        let response = send(addr, "website", &[url.as_str()]).await;
        assert_eq!(response, "<html><body>hi</body></html>");

        server.stop().await;
    }

    #[async_std::test]
    async fn test_website_failures_answer_error_page() {
        let missing = serve_once("404 Not Found", "gone");
        let closed = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let (server, addr) = start_server(2, init_commands(&default_mapping())).await;

        let url = format!("http://{}/", missing);
        assert_eq!(send(addr, "website", &[url.as_str()]).await, WEBSITE_ERROR);

        let url = closed.to_string();
        assert_eq!(send(addr, "website", &[url.as_str()]).await, WEBSITE_ERROR);

        // No URL at all fails setup
        assert_eq!(send(addr, "website", &[]).await, RESPONSE_INVALID);

        server.stop().await;
    }
}
