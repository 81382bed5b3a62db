//! Build-configuration server CLI binary.
//!
//! # Commands
//!
//! - `serve` - Serve the protocol on stdio or a local socket
//! - `versions` - List the protocol versions this build implements
//! - `config` - Print the effective configuration as TOML

use std::path::PathBuf;
use std::sync::Arc;

use buildconf::{
    config::Config,
    engine::FilesystemEngineFactory,
    protocol::Protocol,
    server::{Server, ServerConfig},
    transport::{self, TransportKind},
    VERSION,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "buildconf")]
#[command(version = VERSION)]
#[command(about = "Interactive build-configuration server", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/buildconf/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the protocol to one client
    Serve {
        /// Offer experimental protocol versions
        #[arg(long)]
        experimental: bool,

        /// Listen on this Unix-domain socket instead of stdio
        #[arg(long)]
        pipe: Option<PathBuf>,

        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Log as JSON lines
        #[arg(long)]
        json_logs: bool,
    },

    /// List implemented protocol versions
    Versions,

    /// Print the effective configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            experimental,
            pipe,
            verbose,
            json_logs,
        } => cmd_serve(config, experimental, pipe, verbose, json_logs),
        Commands::Versions => {
            cmd_versions();
            Ok(())
        },
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

fn cmd_versions() {
    for version in Protocol::ALL {
        let tag = if version.is_experimental {
            " (experimental)"
        } else {
            ""
        };
        println!("{}{tag}", version.version());
    }
}

fn cmd_serve(
    mut config: Config,
    experimental: bool,
    pipe: Option<PathBuf>,
    verbose: bool,
    json_logs: bool,
) -> anyhow::Result<()> {
    // CLI flags win over file and environment.
    config.server.experimental |= experimental;
    if let Some(pipe) = pipe {
        config.server.transport = TransportKind::Pipe;
        config.server.pipe = Some(pipe);
    }
    if verbose {
        config.logging.level = "debug".to_string();
    }
    config.logging.json |= json_logs;
    config.validate()?;

    init_logging(&config);

    let server = Server::new(
        ServerConfig::from(&config.server),
        Arc::new(FilesystemEngineFactory),
    );
    tracing::info!(
        version = VERSION,
        transport = %config.server.transport,
        experimental = config.server.experimental,
        "Starting build-configuration server"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let stats = runtime.block_on(async {
        match (config.server.transport, config.server.pipe.as_deref()) {
            #[cfg(unix)]
            (TransportKind::Pipe, Some(path)) => transport::serve_pipe(&server, path).await,
            #[cfg(not(unix))]
            (TransportKind::Pipe, Some(_)) => Err(buildconf::ServerError::Config(
                "the pipe transport needs a Unix-domain socket".into(),
            )),
            _ => transport::serve_stdio(&server).await,
        }
    })?;

    tracing::info!(
        session = %stats.session_id,
        requests = stats.requests_received,
        errors = stats.errors_sent,
        uptime_secs = stats.uptime_secs,
        "Session finished"
    );
    Ok(())
}

/// Logs go to stderr; stdout may be the protocol channel.
fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
