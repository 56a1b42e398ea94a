use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use presence_service::{
    build_orchestrator, config::Config, orchestrator::ServiceOrchestrator,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "presence-service")]
#[command(about = "Records when todo-list users were last seen, over HTTP and gRPC")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Raise log verbosity (-v debug, -vv trace). Ignored when RUST_LOG is set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Start both transports and block until one fails (default).
    Serve,
    /// Exit successfully without starting anything; used by startup probes.
    Health,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Health => Ok(ServiceOrchestrator::health()),
        Command::Serve => serve().await,
    }
}

async fn serve() -> Result<ExitCode> {
    let config = Config::from_env().context("load configuration")?;
    info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        build_sha = %config.build_sha,
        http_addr = %config.http_addr(),
        rpc_addr = %config.rpc_addr(),
        development = config.development,
        "starting presence service"
    );

    let mut orchestrator = build_orchestrator(config).await?;
    tokio::select! {
        error = orchestrator.start() => {
            Err(anyhow::Error::new(error).context("presence service stopped"))
        }
        signal = shutdown_signal() => {
            signal?;
            info!("shutdown signal received");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    });

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).context("install SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("listen for ctrl-c")?;
    }
    Ok(())
}
