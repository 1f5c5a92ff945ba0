//! `ax25` - netcat for AX.25 stations behind pattyd.
//!
//! This is the binary entry point. See the `patty` library for the client
//! itself.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use patty::constants::LOG_ENV;
use patty::{commands, Client, Config};

#[derive(Parser)]
#[command(name = "ax25")]
#[command(version)]
#[command(about = "Dial and listen for AX.25 stations through the pattyd daemon")]
struct Cli {
    /// Path of the pattyd control socket (overrides config and PATTY_SOCKET)
    #[arg(long, global = true, value_name = "PATH")]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an address and print its canonical form and binary record
    Parse {
        /// Callsign with optional SSID, e.g. N0CALL-6
        address: String,
    },
    /// Connect to a station and pipe stdin/stdout over the connection
    Dial {
        /// Remote station, e.g. K3XEC-10
        address: String,
    },
    /// Accept connections on a local address and print what callers send
    Listen {
        /// Local station address to bind
        address: String,
        /// Exit after the first caller hangs up
        #[arg(long)]
        once: bool,
    },
}

fn open_client(socket: Option<PathBuf>) -> Result<Client> {
    let mut config = Config::load().context("load configuration")?;
    if let Some(path) = socket {
        config.socket_path = path;
    }
    Client::from_config(&config)
        .with_context(|| format!("open pattyd at {}", config.socket_path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(LOG_ENV, "info"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { address } => {
            commands::parse::run(&address, io::stdout().lock())?;
        }
        Commands::Dial { address } => {
            let client = open_client(cli.socket)?;
            commands::pipe::dial(&client, &address, io::stdin(), io::stdout().lock())?;
            client.close()?;
        }
        Commands::Listen { address, once } => {
            let client = open_client(cli.socket)?;
            commands::pipe::listen(&client, &address, once, io::stdout().lock())?;
            client.close()?;
        }
    }

    Ok(())
}
