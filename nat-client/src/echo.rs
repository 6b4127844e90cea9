//! Interactive probe loop (`--echo`): a terminal REPL that reproduces the
//! original reference client's post-connect behaviour — announce the local
//! id once, then send whatever the user types and print whatever comes
//! back until the channel goes quiet.

use nat_core::{NatError, PeerChannel, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

pub async fn run(channel: &mut PeerChannel, local_id: &str) -> Result<()> {
    send_and_recv(channel, local_id.as_bytes()).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt().await?;
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        send_and_recv(channel, line.as_bytes()).await?;
    }
}

async fn print_prompt() -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"Message to send: ").await?;
    stdout.flush().await?;
    Ok(())
}

/// Sends one payload, then prints every reply that arrives before the
/// channel's read times out — mirroring the reference client's
/// `send_and_recv`, which treats a timeout as "done listening for now".
async fn send_and_recv(channel: &mut PeerChannel, data: &[u8]) -> Result<()> {
    channel.send(data).await?;
    loop {
        match channel.recv().await {
            Ok(reply) => info!(reply = %String::from_utf8_lossy(&reply), "received"),
            Err(NatError::Timeout(_)) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}
