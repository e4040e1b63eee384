//! # Tessera Room Server
//!
//! Runs one authoritative room behind a TCP listener.
//!
//! ## Usage
//!
//! ```bash
//! tessera_server --config tessera.toml --bind 0.0.0.0:7777 --tick-rate 20
//! ```
//!
//! `RUST_LOG` overrides the configured log level.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tessera_networking::{RoomServer, ServerError, Transport};
use tessera_shared::TesseraConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "tessera_server", about = "Authoritative chunk-streaming room server")]
struct Args {
    /// TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides `server.bind`
    #[arg(short, long)]
    bind: Option<String>,

    /// Ticks per second, overrides `server.tick_rate`
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("tessera_server: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.server.log_level);

    match run(config, args.duration.map(Duration::from_secs)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "server failed");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<TesseraConfig, ServerError> {
    let mut config = match &args.config {
        Some(path) => TesseraConfig::load(path)?,
        None => TesseraConfig::default(),
    };
    if let Some(bind) = &args.bind {
        config.server.bind.clone_from(bind);
    }
    if let Some(rate) = args.tick_rate {
        config.server.tick_rate = rate;
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let layer = fmt::layer().with_target(true).with_thread_names(true).with_timer(fmt::time::uptime());
    tracing_subscriber::registry().with(filter).with(layer).init();
}

/// Transport on a tokio runtime, the room on this thread.
fn run(config: TesseraConfig, duration: Option<Duration>) -> Result<(), ServerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tessera-io")
        .build()?;

    let bind = config.server.bind.clone();
    let (mut server, channels) = RoomServer::new(config);
    let transport = runtime.block_on(Transport::bind(&bind, channels.events))?;
    let pump = transport.spawn_command_pump(channels.commands)?;
    let accept = runtime.spawn(transport.run());

    server.run(duration);

    // The pump stops the accept loop once it sees the shutdown command.
    if pump.join().is_err() {
        tracing::error!("command pump panicked");
    }
    let result = match runtime.block_on(accept) {
        Ok(result) => result.map_err(ServerError::from),
        Err(err) => {
            tracing::error!(%err, "accept loop aborted");
            Ok(())
        }
    };
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}
