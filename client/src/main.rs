//! zanrcon - Remote console client for Zandronum game servers
//!
//! Logs in with the RCON password, prints server output as it arrives and
//! forwards each line typed on stdin as a console command.

mod config;
mod output;
mod session;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use output::ConsoleObserver;
use session::{Session, SessionError};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use transport::UdpTransport;

#[derive(Parser, Debug)]
#[command(name = "zanrcon")]
#[command(version)]
#[command(about = "Remote console client for Zandronum game servers", long_about = None)]
struct Args {
    /// Server host name or address
    host: Option<String>,

    /// Server port
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RCON password
    #[arg(short, long, env = "ZANRCON_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Protocol version announced in BeginConnection
    #[arg(long)]
    protocol_version: Option<u8>,
}

/// What to do with one line of input
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Skip,
    Quit,
    Complete(&'a str),
    Command(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Skip;
    }
    if line == ":quit" {
        return Input::Quit;
    }
    if let Some(partial) = line.strip_prefix(":complete") {
        if partial.is_empty() || partial.starts_with(char::is_whitespace) {
            return Input::Complete(partial.trim_start());
        }
    }
    Input::Command(line)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::Config::load(path)?,
        None => config::Config::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(version) = args.protocol_version {
        config.session.protocol_version = version;
    }
    if args.password.is_some() {
        config.server.password = args.password;
    }
    config.validate()?;

    // Logs go to stderr so they never interleave with console output
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("Invalid logging.level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let password = config
        .server
        .password
        .clone()
        .context("No RCON password given (use --password or ZANRCON_PASSWORD)")?;

    run(&config, password).await
}

async fn run(config: &config::Config, password: String) -> Result<()> {
    let transport = UdpTransport::connect(&config.server.host, config.server.port).await?;
    info!("Logging in to {}", transport.server_addr());
    let observer = Arc::new(ConsoleObserver::new(&config.output));

    let mut session = Session::new(
        transport,
        config.session.settings(),
        password,
        observer,
        config.session.read_timeout(),
    );

    tokio::select! {
        result = session.login() => {
            if let Err(e) = result {
                session.shutdown().await;
                anyhow::bail!("Login to {}:{} failed: {}", config.server.host, config.server.port, e);
            }
            let server = session.server().await;
            info!(
                "Authenticated (hostname: {:?}, protocol: {:?}, map: {:?}, players: {}, admins: {})",
                server.hostname,
                server.protocol_version,
                server.map,
                server.players.len(),
                server.admin_count
            );
        }
        _ = tokio::signal::ctrl_c() => {
            session.shutdown().await;
            anyhow::bail!("Interrupted during login");
        }
    }

    let mut lines = spawn_stdin_reader();

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    debug!("End of input");
                    break;
                };

                let result = match parse_input(&line) {
                    Input::Skip => continue,
                    Input::Quit => break,
                    Input::Complete(partial) => session.tab_complete(partial).await,
                    Input::Command(command) => session.send_command(command).await,
                };

                match result {
                    Ok(()) => {}
                    Err(SessionError::TabCompletePending) => {
                        warn!("Still waiting for the previous completion");
                    }
                    Err(e) => {
                        error!("{}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            reason = session.closed() => {
                debug!("Session ended: {}", reason);
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

/// Read stdin on a dedicated thread; the channel closes at end of input.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    rx
}
