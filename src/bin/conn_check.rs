//! Connectivity probe for a managed connection
//!
//! Opens a managed connection with the given endpoint parameters, sends a
//! PING, and optionally runs a SET/GET round trip through the retry-wrapped
//! dispatch path.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use valkey_conn::client::{Commands, ConnectionManager};
use valkey_conn::config::ConnectionConfig;

/// Connectivity probe for a Valkey/Redis endpoint
#[derive(Parser, Debug)]
#[command(name = "conn-check")]
#[command(version, about, long_about = None)]
#[command(disable_help_flag = true)]
struct Args {
    /// Print help information
    #[arg(long = "help", action = clap::ArgAction::Help)]
    help: (),

    /// Server hostname
    #[arg(short = 'h', long = "host", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short = 'p', long = "port", default_value_t = 6379)]
    port: u16,

    /// Unix socket path (overrides host/port)
    #[arg(short = 's', long = "socket")]
    socket: Option<PathBuf>,

    /// Password for AUTH
    #[arg(short = 'a', long = "auth")]
    password: Option<String>,

    /// Database number to SELECT
    #[arg(long = "dbnum")]
    dbnum: Option<u32>,

    /// Connect timeout in milliseconds
    #[arg(long = "connect-timeout", default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Command retries on transient failures
    #[arg(long = "retries", default_value_t = 0)]
    retries: u32,

    /// Wait between retries in milliseconds
    #[arg(long = "retry-interval", default_value_t = 0)]
    retry_interval_ms: u64,

    /// Run a SET/GET round trip against this key after the ping
    #[arg(long = "probe-key")]
    probe_key: Option<String>,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn run(args: Args) -> Result<()> {
    let config = ConnectionConfig {
        hostname: args.host,
        port: args.port,
        unix_socket: args.socket,
        password: args.password,
        database: args.dbnum,
        connect_timeout: Some(Duration::from_millis(args.connect_timeout_ms)),
        retries: args.retries,
        retry_interval: Duration::from_millis(args.retry_interval_ms),
        ..ConnectionConfig::default()
    };

    let mut manager = ConnectionManager::new(config);
    manager.on_after_open(|| tracing::debug!("connection established"));

    if !manager.ping().context("PING failed")? {
        bail!("server answered PING with something other than PONG");
    }
    println!("PING -> PONG ({})", manager.connection_string());

    if let Some(key) = args.probe_key {
        manager.set(&key, b"conn-check").context("SET failed")?;
        match manager.get(&key).context("GET failed")? {
            Some(value) if value == b"conn-check" => {
                println!("SET/GET round trip ok on '{}'", key);
            }
            other => bail!("GET '{}' returned unexpected value: {:?}", key, other),
        }
        manager.del(&[key.as_str()]).context("DEL failed")?;
    }

    manager.close();
    Ok(())
}

fn main() {
    let args = Args::parse();
    setup_logging(args.verbose);

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
