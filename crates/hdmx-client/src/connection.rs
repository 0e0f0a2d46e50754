//! TCP connection to the matrix switch
//!
//! A [`Connection`] owns the socket. Reads happen in exactly one spawned
//! task for the lifetime of the connection; that task turns bytes into lines
//! and hands each line to [`SharedState`] for routing. Writes go through a
//! mutex-guarded write half and are bounded by a deadline.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hdmx_protocol::{EncodeCommand, MatrixCommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::state::SharedState;

/// Socket owner: connect, write, tear down
pub struct Connection {
    state: SharedState,
    connected: Arc<AtomicBool>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    read_backoff: Duration,
    write_timeout: Duration,
}

impl Connection {
    /// Create a disconnected connection that reports into `state`
    pub fn new(state: SharedState, config: &ClientConfig) -> Self {
        Self {
            state,
            connected: Arc::new(AtomicBool::new(false)),
            writer: AsyncMutex::new(None),
            reader_task: Mutex::new(None),
            read_backoff: config.read_backoff(),
            write_timeout: config.write_timeout(),
        }
    }

    /// Whether the socket is believed to be open
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the socket and start the read loop
    ///
    /// Any previous connection is torn down first.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), ClientError> {
        self.disconnect().await;

        let stream = match TcpStream::connect((host, port)).await {
            Ok(stream) => stream,
            Err(source) => {
                error!(
                    "Failed to connect to matrix switch at {}:{}: {}",
                    host, port, source
                );
                return Err(ClientError::Connect {
                    addr: format!("{}:{}", host, port),
                    source,
                });
            }
        };
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);

        let task = tokio::spawn(read_loop(
            BufReader::new(read_half),
            self.state.clone(),
            Arc::clone(&self.connected),
            self.read_backoff,
        ));
        *self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(task);

        info!("Connected to matrix switch at {}:{}", host, port);
        Ok(())
    }

    /// Close the socket, stop the read loop and forget all cached state
    ///
    /// Does nothing when there is no connection to tear down.
    pub async fn disconnect(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let task = self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let writer = self.writer.lock().await.take();

        if !was_connected && task.is_none() && writer.is_none() {
            return;
        }

        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Error shutting down matrix socket: {}", e);
            }
        }

        self.state.clear_cache();
        self.state.end_probing();
        info!("Disconnected from matrix switch");
    }

    /// Write one command and flush it
    ///
    /// A failed or timed-out write tears the connection down.
    pub async fn send(&self, command: &MatrixCommand) -> Result<(), ClientError> {
        if !self.is_connected() {
            error!("Not connected to matrix switch, dropping {}", command);
            return Err(ClientError::NotConnected);
        }

        let bytes = command.encode();
        let result = {
            let mut writer = self.writer.lock().await;
            let Some(writer) = writer.as_mut() else {
                return Err(ClientError::NotConnected);
            };
            tokio::time::timeout(self.write_timeout, write_frame(writer, &bytes)).await
        };

        match result {
            Ok(Ok(())) => {
                debug!("Sent command: {}", command);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Error sending {}: {}", command, e);
                self.disconnect().await;
                Err(ClientError::Write(e))
            }
            Err(_) => {
                let ms = self.write_timeout.as_millis() as u64;
                error!("Timed out after {}ms sending {}", ms, command);
                self.disconnect().await;
                Err(ClientError::WriteTimeout(ms))
            }
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, bytes: &[u8]) -> io::Result<()> {
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Longest status line accepted; anything longer is discarded up to its newline
const MAX_LINE_LEN: usize = 256;

/// Outcome of one bounded line read
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// A complete line, terminator included, is in the buffer
    Line,
    /// The peer closed the stream
    Eof,
    /// The peer closed the stream after this many bytes of an unfinished line
    Truncated(usize),
    /// The line passed [`MAX_LINE_LEN`]; the bytes read so far were dropped
    Overlong,
}

/// Read one line into `buf`, never buffering more than [`MAX_LINE_LEN`] bytes
///
/// After [`LineRead::Overlong`] the caller must keep reading and discard
/// until a line ends.
async fn read_bounded_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let n = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', buf)
        .await?;

    Ok(match n {
        0 => LineRead::Eof,
        _ if buf.last() == Some(&b'\n') => LineRead::Line,
        n if n >= MAX_LINE_LEN => {
            buf.clear();
            LineRead::Overlong
        }
        n => LineRead::Truncated(n),
    })
}

/// Read lines until the peer closes or the task is aborted
async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    state: SharedState,
    connected: Arc<AtomicBool>,
    backoff: Duration,
) {
    let mut buf = Vec::with_capacity(MAX_LINE_LEN);
    let mut discarding = false;

    while connected.load(Ordering::SeqCst) {
        match read_bounded_line(&mut reader, &mut buf).await {
            Ok(LineRead::Eof) => {
                warn!("Connection closed by matrix switch");
                break;
            }
            Ok(LineRead::Truncated(n)) => {
                warn!(
                    "Connection closed by matrix switch mid-line ({} bytes dropped)",
                    n
                );
                break;
            }
            Ok(LineRead::Overlong) => {
                if !discarding {
                    warn!(
                        "Discarding status line longer than {} bytes",
                        MAX_LINE_LEN
                    );
                }
                discarding = true;
            }
            Ok(LineRead::Line) if discarding => {
                // Tail of an overlong line
                discarding = false;
            }
            Ok(LineRead::Line) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim();
                debug!("Received from matrix: {}", line);
                state.dispatch_line(line);
            }
            Err(e) => {
                error!("Error reading from matrix switch: {}", e);
                tokio::time::sleep(backoff).await;
            }
        }
    }

    // Cache must be empty by the time the flag reads false
    if connected.load(Ordering::SeqCst) {
        state.clear_cache();
        state.end_probing();
        connected.store(false, Ordering::SeqCst);
    }
    debug!("Matrix read loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(input: &[u8]) -> Vec<LineRead> {
        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();
        let mut reads = Vec::new();
        loop {
            let read = read_bounded_line(&mut reader, &mut buf).await.unwrap();
            let done = matches!(read, LineRead::Eof | LineRead::Truncated(_));
            reads.push(read);
            if done {
                return reads;
            }
        }
    }

    #[tokio::test]
    async fn test_complete_lines() {
        let mut reader = BufReader::new(&b"s12\r\nRx13 to Tx5\n"[..]);
        let mut buf = Vec::new();

        assert_eq!(read_bounded_line(&mut reader, &mut buf).await.unwrap(), LineRead::Line);
        assert_eq!(buf, b"s12\r\n");
        assert_eq!(read_bounded_line(&mut reader, &mut buf).await.unwrap(), LineRead::Line);
        assert_eq!(buf, b"Rx13 to Tx5\n");
        assert_eq!(read_bounded_line(&mut reader, &mut buf).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test]
    async fn test_unfinished_line_at_eof() {
        assert_eq!(read_all(b"s1").await, vec![LineRead::Truncated(2)]);
    }

    #[tokio::test]
    async fn test_overlong_line_is_bounded() {
        let mut input = vec![b'x'; MAX_LINE_LEN * 3 + 10];
        input.extend_from_slice(b"\r\ns32\r\n");

        let reads = read_all(&input).await;
        assert_eq!(
            reads,
            vec![
                LineRead::Overlong,
                LineRead::Overlong,
                LineRead::Overlong,
                LineRead::Line,
                LineRead::Line,
                LineRead::Eof,
            ]
        );
    }
}
