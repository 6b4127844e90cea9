use anyhow::Context;
use clap::Parser;
use nat_client::{echo, relay, Client, Relay};
use nat_core::constants::{DISCONNECT_TIMEOUT, UDP_SOCKET_TIMEOUT};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "nat-client", about = "UDP hole-punching client")]
#[command(group(clap::ArgGroup::new("mode").args(["listen", "connect", "echo"]).required(true)))]
struct Cli {
    /// Traversal server IP address.
    #[arg(short, long)]
    server: String,

    /// This client's id. Defaults to a fresh 32-hex UUID.
    #[arg(long)]
    id: Option<String>,

    /// The remote peer's id to pair with.
    #[arg(short, long)]
    remote: String,

    /// Relay the peer channel to/from a local application that connects to us.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Relay the peer channel to/from a local application at a fixed address.
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Run the built-in interactive probe loop instead of relaying.
    #[arg(long)]
    echo: bool,
}

#[derive(Clone, Copy)]
enum Mode {
    Echo,
    Listen(SocketAddr),
    Connect(SocketAddr),
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.echo {
            Mode::Echo
        } else if let Some(addr) = self.listen {
            Mode::Listen(addr)
        } else if let Some(addr) = self.connect {
            Mode::Connect(addr)
        } else {
            unreachable!("clap's \"mode\" group requires exactly one of listen/connect/echo")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let server_ip: IpAddr = cli
        .server
        .parse()
        .with_context(|| format!("--server {:?} is not a valid IP address", cli.server))?;
    let id = cli.id.clone().unwrap_or_else(|| Uuid::new_v4().simple().to_string());
    let mode = cli.mode();

    info!(id, remote = cli.remote, "starting nat-client");
    let client = Client::new(server_ip, id.clone(), cli.remote.clone());

    tokio::select! {
        result = session_loop(client, id, mode) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
            Ok(())
        }
    }
}

async fn session_loop(client: Client, id: String, mode: Mode) -> anyhow::Result<()> {
    loop {
        let mut channel = client.connect().await;
        channel.start_keepalive();
        info!("peer channel established");

        match &mode {
            Mode::Echo => {
                echo::run(&mut channel, &id).await?;
                return Ok(());
            }
            Mode::Listen(addr) | Mode::Connect(addr) => {
                let local_endpoint = if matches!(mode, Mode::Listen(_)) {
                    relay::bind_listen(*addr, UDP_SOCKET_TIMEOUT).await?
                } else {
                    relay::bind_connect(*addr, UDP_SOCKET_TIMEOUT).await?
                };

                let channel = Arc::new(Mutex::new(channel));
                let active_relay = Relay::start(channel.clone(), local_endpoint);

                loop {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    if !channel.lock().await.active(DISCONNECT_TIMEOUT) {
                        break;
                    }
                }

                active_relay.stop();
                channel.lock().await.close();
                info!("peer channel went quiet, reconnecting");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_group_accepts_echo() {
        let cli = Cli::parse_from(["nat-client", "--server", "127.0.0.1", "--remote", "bob", "--echo"]);
        assert!(matches!(cli.mode(), Mode::Echo));
    }

    #[test]
    fn mode_group_accepts_listen() {
        let cli = Cli::parse_from([
            "nat-client",
            "--server",
            "127.0.0.1",
            "--remote",
            "bob",
            "--listen",
            "127.0.0.1:4000",
        ]);
        assert!(matches!(cli.mode(), Mode::Listen(_)));
    }

    #[test]
    fn mode_group_rejects_more_than_one() {
        let result = Cli::try_parse_from([
            "nat-client",
            "--server",
            "127.0.0.1",
            "--remote",
            "bob",
            "--echo",
            "--listen",
            "127.0.0.1:4000",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn default_id_is_absent_until_filled_in_main() {
        let cli = Cli::parse_from(["nat-client", "--server", "127.0.0.1", "--remote", "bob", "--echo"]);
        assert!(cli.id.is_none());
    }
}
