use anyhow::Context;
use clap::{Parser, Subcommand};
use nat_server::{config::ServerConfig, udp_service, Coordinator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nat-server", about = "Rendezvous server for UDP hole punching")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server: UDP address service and TCP control coordinator.
    Run {
        /// Optional TOML file overriding port / worker count / operation timeout.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the shared TCP+UDP port (wins over --config and the built-in default).
        #[arg(long)]
        port: Option<u16>,
        /// Override the bounded worker pool size.
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let Command::Run { config, port, workers } = cli.command;

    let mut server_config = ServerConfig::load(config.as_deref())?;
    server_config.apply_cli_overrides(port, workers);

    run(server_config).await
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let listener = nat_server::coordinator::bind_listener(config.port).context("binding TCP control listener")?;
    let coordinator = Coordinator::with_operation_timeout(config.server_workers, config.operation_timeout);
    let pool = coordinator.pool();
    info!(port = config.port, workers = config.server_workers, "nat-server listening");

    let udp_socket = udp_service::bind_socket(config.port).context("binding UDP address service")?;
    let table = nat_server::RendezvousTable::new();
    let udp_task = tokio::spawn(async move { udp_service::run(udp_socket, table, pool).await });

    let coordinator_task = tokio::spawn(async move { coordinator.run(listener).await });

    tokio::select! {
        res = udp_task => {
            res.context("udp address service task panicked")?.context("udp address service failed")?;
        }
        res = coordinator_task => {
            res.context("tcp coordinator task panicked")?.context("tcp coordinator failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_with_overrides() {
        let cli = Cli::parse_from(["nat-server", "run", "--port", "9999", "--workers", "4"]);
        let Command::Run { port, workers, config } = cli.command;
        assert_eq!(port, Some(9999));
        assert_eq!(workers, Some(4));
        assert_eq!(config, None);
    }
}
