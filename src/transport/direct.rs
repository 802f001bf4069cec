// MIT License - Copyright (c) 2026 Peter Wright

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::constants::{
    HEADER_SIZE, RECEIVE_BUFFER_SIZE, RECEIVE_RETRY_BACKOFF_MS, RECEIVE_RETRY_LIMIT,
};
use crate::error::{ParadoxError, Result};

/// Direct TCP transport - connects straight to the panel's IP module.
///
/// Performs the actual byte I/O beneath the communicator: timed writes,
/// timed reads with a declared-length consistency check and bounded retry,
/// and an ordered best-effort teardown.
pub struct DirectTcpTransport {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    io_timeout: Duration,
}

impl DirectTcpTransport {
    /// Open a socket to the module. Name resolution and connect failures
    /// surface as `ConnectionFailed`; the timeout covers both.
    pub async fn connect(host: &str, port: u16, timeout_ms: u64) -> Result<Self> {
        let io_timeout = Duration::from_millis(timeout_ms);
        let address = format!("{}:{}", host, port);
        debug!("Connecting to {}", address);

        let stream = timeout(io_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| ParadoxError::ConnectionFailed {
                details: format!("connect to {} timed out", address),
            })?
            .map_err(|e| {
                error!("TCP connect failed: {}", e);
                ParadoxError::ConnectionFailed {
                    details: format!("{}: {}", address, e),
                }
            })?;

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            io_timeout,
        })
    }

    /// Blocking write of a whole frame. A transport-level timeout comes
    /// back as `SocketTimeout` so the caller can route it to the dedicated
    /// time-out listener instead of treating it as an I/O failure.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match timeout(self.io_timeout, self.writer.write_all(bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Socket write failed: {}", e);
                Err(ParadoxError::Io(e))
            }
            Err(_) => Err(ParadoxError::SocketTimeout),
        }
    }

    /// Blocking read of one buffer's worth of frames.
    ///
    /// Reads into a fixed-size buffer and checks that the declared length
    /// byte is internally consistent before returning the trimmed slice.
    /// An inconsistent read is retried a bounded number of times with a
    /// short backoff, then fails as `GarbledReceive`.
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        let mut buffer = [0u8; RECEIVE_BUFFER_SIZE];

        for attempt in 0..=RECEIVE_RETRY_LIMIT {
            let n = match timeout(self.io_timeout, self.reader.read(&mut buffer)).await {
                Ok(Ok(0)) => return Err(ParadoxError::Disconnected),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("Socket read failed: {}", e);
                    return Err(ParadoxError::Io(e));
                }
                Err(_) => return Err(ParadoxError::SocketTimeout),
            };

            if n >= 2 {
                let declared = buffer[1] as usize;
                if declared + HEADER_SIZE < RECEIVE_BUFFER_SIZE {
                    return Ok(buffer[..n].to_vec());
                }
            }

            warn!(
                "Inconsistent receive ({} bytes, attempt {}/{})",
                n,
                attempt + 1,
                RECEIVE_RETRY_LIMIT + 1
            );
            sleep(Duration::from_millis(RECEIVE_RETRY_BACKOFF_MS)).await;
        }

        Err(ParadoxError::GarbledReceive {
            details: "declared length inconsistent after retries".to_string(),
        })
    }

    /// Best-effort teardown: shut the write stream, then drop the read
    /// stream and socket. Failures are logged, never propagated.
    pub async fn close(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("Write stream shutdown failed (ignored): {}", e);
        }
        // Dropping the halves releases the read stream and the socket
        drop(self.reader);
        drop(self.writer);
        debug!("Transport closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 on localhost is essentially never listening
        let result = DirectTcpTransport::connect("127.0.0.1", 1, 1000).await;
        assert!(matches!(
            result,
            Err(ParadoxError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_receive_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            // Echo a minimal well-formed frame back
            let mut reply = vec![0u8; 17];
            reply[0] = 0xAA;
            reply[1] = 17;
            reply[16] = buf[n - 1];
            socket.write_all(&reply).await.unwrap();
        });

        let mut transport = DirectTcpTransport::connect("127.0.0.1", addr.port(), 1000)
            .await
            .unwrap();
        transport.send(&[0xAA, 0x11, 0x42]).await.unwrap();
        let received = transport.receive().await.unwrap();
        assert_eq!(received.len(), 17);
        assert_eq!(received[16], 0x42);

        transport.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            // Hold the connection open without sending anything
            sleep(Duration::from_millis(500)).await;
        });

        let mut transport = DirectTcpTransport::connect("127.0.0.1", addr.port(), 100)
            .await
            .unwrap();
        assert!(matches!(
            transport.receive().await,
            Err(ParadoxError::SocketTimeout)
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_closed_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = DirectTcpTransport::connect("127.0.0.1", addr.port(), 1000)
            .await
            .unwrap();
        server.await.unwrap();
        assert!(matches!(
            transport.receive().await,
            Err(ParadoxError::Disconnected)
        ));
    }
}
