//! Netcmd Shell - Interactive command line interface for netcmdd
//!
//! This binary provides an interactive shell to talk to a netcmd server. Each
//! line is split on whitespace: the first word is the command, the remaining
//! words are sent as its arguments.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use async_std::task;
use clap::Parser;
use netcmd::client::{Connection, QUALITY_FAILURE};
use netcmd::config::DEFAULT_PORT;
use netcmd::utils::tracing::setup_client_tracing;

/// Default timeout for requests in seconds
const TIMEOUT: u64 = 30;

/// Netcmd Shell - CLI for netcmdd
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host name or address
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Request a TLS connection
    #[arg(long)]
    tls: bool,

    /// Request timeout in seconds
    #[arg(long, default_value_t = TIMEOUT)]
    timeout: u64,

    /// Enable terminal logging
    #[arg(short, long)]
    log: bool,
}

struct NetcmdShell {
    connection: Connection,
}

impl NetcmdShell {
    fn new(args: &Args) -> Self {
        let connection = Connection::new(args.host.clone(), args.port, args.tls)
            .with_idle_timeout(Duration::from_secs(args.timeout));
        NetcmdShell { connection }
    }

    /// Check that the server answers before entering the loop
    fn connect(&mut self) -> bool {
        match task::block_on(self.connection.send_command::<&str>("version", &[])) {
            Ok(version) => {
                println!("🟢 Connected to {}", version);
                true
            }
            Err(e) => {
                eprintln!("🔴 Connection failed: {}", e);
                eprintln!(
                    "💡 Make sure netcmdd is running and accessible at {}:{}",
                    self.connection.hostname(),
                    self.connection.port()
                );
                false
            }
        }
    }

    /// Format and display the response from the server
    fn format_response(&self, text: &str, start_time: Option<Instant>) {
        if let Some(start_time) = start_time {
            let elapsed = start_time.elapsed();
            println!("⏱️  Response time: {:.3}s", elapsed.as_secs_f64());
        }

        if text.starts_with("Error:") || text == "INVALID" {
            eprintln!("{}", text);
        } else if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(text) {
            // Scalars parse as JSON too; only pretty-print documents
            if json_value.is_object() || json_value.is_array() {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json_value).unwrap_or_else(|_| text.to_string())
                );
            } else {
                println!("{}", text);
            }
        } else {
            println!("{}", text);
        }
    }

    /// Show help information
    fn show_help(&self) {
        let help_text = r#"
🎮 Netcmd Shell Help
====================
Shell Commands:
  help            - Show this help message
  clear           - Clear the screen
  quality         - Measure connection quality (1-100)
  exit/quit/q     - Exit the shell

Server Commands:
  stats           - Start time and requests served
  version         - Server version
  pause/unpause   - Suspend or resume command processing
  [other commands] - Sent with the remaining words as arguments
"#;
        println!("{}", help_text);
    }

    /// Handle internal shell commands; `None` when the line goes to the server
    fn handle_internal_command(&mut self, cmd: &str) -> Option<bool> {
        match cmd.trim().to_lowercase().as_str() {
            "exit" | "quit" | "q" => Some(true),
            "help" | "h" | "?" => {
                self.show_help();
                Some(false)
            }
            "clear" => {
                // Clear screen using ANSI escape codes
                print!("\x1B[2J\x1B[1;1H");
                Some(false)
            }
            "quality" => {
                match task::block_on(self.connection.poll_quality()) {
                    QUALITY_FAILURE => eprintln!("🔴 Server did not answer ping"),
                    quality => println!("📶 Connection quality: {}", quality),
                }
                Some(false)
            }
            _ => None,
        }
    }

    /// Run the main interactive command loop
    fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        println!("Use 'help' for shell commands.");
        println!("Enter a command or 'exit' to quit.");
        println!("{}", "─".repeat(80));

        let hostname = get_hostname();
        let prompt = format!("[{}]> ", hostname);

        loop {
            print!("{}", prompt);
            io::stdout().flush()?;

            let mut input = String::new();
            match io::stdin().read_line(&mut input) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("\n🔴 Error reading input: {}", e);
                    continue;
                }
            }

            let line = input.trim();
            if line.is_empty() {
                continue;
            }

            match self.handle_internal_command(line) {
                Some(true) => break,
                Some(false) => continue,
                None => {}
            }

            let mut words = line.split_whitespace();
            let name = words.next().unwrap_or_default();
            let arguments: Vec<&str> = words.collect();

            let start_time = Some(Instant::now());
            match task::block_on(self.connection.send_command(name, &arguments)) {
                Ok(reply) => self.format_response(&reply, start_time),
                Err(e) => {
                    eprintln!("🔴 Error sending command: {}", e);
                    eprintln!("💡 The server may be down or unresponsive");
                }
            }

            println!("{}", "-".repeat(80));
        }

        Ok(())
    }
}

/// Get the hostname of the current machine
fn get_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().to_string(),
        Err(_) => "localhost".to_string(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_client_tracing(args.log);

    let mut shell = NetcmdShell::new(&args);

    if !shell.connect() {
        eprintln!("🔴 Failed to connect to netcmdd. The server may not be running.");
        std::process::exit(1);
    }

    shell.run()?;

    Ok(())
}
