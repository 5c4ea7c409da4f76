use clap::{Parser, Subcommand};
use netcmd::client::Connection;
use netcmd::config::DEFAULT_PORT;
use netcmd::utils::tracing::setup_client_tracing;

/// Global CLI arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Server host name or address
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Request a TLS connection
    #[arg(long)]
    tls: bool,

    /// Enable terminal logging
    #[arg(short, long)]
    log: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// List of available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Server start time and request count
    Stats,
    /// Server version
    Version,
    /// Answer every command except unpause with an error
    Pause,
    /// Resume normal processing
    Unpause,
    /// Estimate connection quality with a ping round trip
    Quality,
    /// Send any command with its arguments
    Send {
        name: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

const NO_ARGS: &[String] = &[];

/// Entry point
#[async_std::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_client_tracing(cli.log);

    let mut connection = Connection::new(cli.host.clone(), cli.port, cli.tls);

    if let Err(e) = handle_command(&cli, &mut connection).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    Ok(())
}

/// Execute the selected subcommand
async fn handle_command(
    cli: &Cli,
    connection: &mut Connection,
) -> Result<(), Box<dyn std::error::Error>> {
    let (name, args): (&str, &[String]) = match &cli.command {
        Commands::Stats => ("stats", NO_ARGS),
        Commands::Version => ("version", NO_ARGS),
        Commands::Pause => ("pause", NO_ARGS),
        Commands::Unpause => ("unpause", NO_ARGS),
        Commands::Quality => {
            let quality = connection.poll_quality().await;
            if quality < 0 {
                return Err(format!("{}:{} did not answer ping", cli.host, cli.port).into());
            }
            println!("{}", quality);
            return Ok(());
        }
        Commands::Send { name, args } => (name.as_str(), args.as_slice()),
    };

    let reply = connection.send_command(name, args).await?;
    println!("{}", reply);

    Ok(())
}
