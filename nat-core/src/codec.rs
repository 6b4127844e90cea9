//! Line-framed control codec: newline-terminated UTF-8 tokens over a TCP
//! stream, mapped to/from the operation and result enumerations.

use crate::error::{NatError, Result};
use crate::protocol::{Operation, OperationResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// A single TCP control connection, framed into newline-terminated lines.
///
/// Reads and writes are strictly ordered: this type does not pipeline, which
/// matches the lockstep nature of the traversal script.
pub struct ControlCodec {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlCodec {
    pub fn new(stream: TcpStream) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    /// Read one line, with the trailing `\n` stripped. A half-closed stream
    /// (zero bytes read) surfaces as `Closed`.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| NatError::Transport(e.to_string()))?;
        if n == 0 {
            return Err(NatError::Closed);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line)
    }

    /// Write one line, appending `\n`, and flush immediately.
    pub async fn write_line(&mut self, s: &str) -> Result<()> {
        self.writer
            .write_all(s.as_bytes())
            .await
            .map_err(|e| NatError::Transport(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| NatError::Transport(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| NatError::Transport(e.to_string()))
    }

    pub async fn read_op(&mut self) -> Result<Operation> {
        let line = self.read_line().await?;
        Operation::parse(&line)
    }

    pub async fn read_result(&mut self) -> Result<OperationResult> {
        let line = self.read_line().await?;
        OperationResult::parse(&line)
    }

    pub async fn write_op(&mut self, op: Operation) -> Result<()> {
        self.write_line(op.as_str()).await
    }

    pub async fn write_result(&mut self, result: OperationResult) -> Result<()> {
        self.write_line(result.as_str()).await
    }

    /// Repeatedly send `op` and read a result until the received result
    /// equals `expected`. A mismatched result causes re-send rather than
    /// failing: this is the idempotence-tolerant handshake the coordinator
    /// relies on to ride out stray or retransmitted acknowledgements.
    pub async fn send_and_wait(&mut self, op: Operation, expected: OperationResult) -> Result<()> {
        loop {
            self.write_op(op).await?;
            if self.read_result().await? == expected {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (ControlCodec, ControlCodec) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (server_res, client_stream) = tokio::join!(listener.accept(), connect);
        let (server_stream, _) = server_res.unwrap();
        (
            ControlCodec::new(server_stream),
            ControlCodec::new(client_stream.unwrap()),
        )
    }

    #[tokio::test]
    async fn read_write_line_round_trip() {
        let (mut a, mut b) = loopback_pair().await;
        a.write_line("hello").await.unwrap();
        assert_eq!(b.read_line().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn op_and_result_round_trip() {
        let (mut a, mut b) = loopback_pair().await;
        a.write_op(Operation::Bind).await.unwrap();
        assert_eq!(b.read_op().await.unwrap(), Operation::Bind);
        b.write_result(OperationResult::Ok).await.unwrap();
        assert_eq!(a.read_result().await.unwrap(), OperationResult::Ok);
    }

    #[tokio::test]
    async fn half_close_surfaces_as_closed() {
        let (a, mut b) = loopback_pair().await;
        drop(a);
        let err = b.read_line().await.unwrap_err();
        assert!(matches!(err, NatError::Closed));
    }

    #[tokio::test]
    async fn send_and_wait_ignores_mismatched_results() {
        let (mut a, mut b) = loopback_pair().await;
        let driver = tokio::spawn(async move {
            a.send_and_wait(Operation::Bind, OperationResult::Ok)
                .await
                .unwrap();
        });
        // First ack is a stray FAIL (e.g. a retransmit from a previous step);
        // send_and_wait must not treat this as success and must re-send BIND.
        assert_eq!(b.read_op().await.unwrap(), Operation::Bind);
        b.write_result(OperationResult::Fail).await.unwrap();
        assert_eq!(b.read_op().await.unwrap(), Operation::Bind);
        b.write_result(OperationResult::Ok).await.unwrap();
        driver.await.unwrap();
    }
}
