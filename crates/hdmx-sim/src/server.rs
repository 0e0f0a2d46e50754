//! TCP front end for a virtual matrix
//!
//! [`MatrixServer`] listens like the real switch does and serves one client
//! at a time. Routes and the command log persist across clients.

use std::io;
use std::net::SocketAddr;

use hdmx_protocol::{InputSource, OutputPort};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::task::{run_virtual_matrix_task, SessionEnd, VirtualMatrixCommand, VirtualMatrixEvent};
use crate::{ResponseFormat, VirtualMatrix};

const COMMAND_QUEUE: usize = 32;
const EVENT_QUEUE: usize = 256;

/// A virtual matrix listening on a TCP socket
pub struct MatrixServer {
    local_addr: SocketAddr,
    cmd_tx: mpsc::Sender<VirtualMatrixCommand>,
    event_tx: broadcast::Sender<VirtualMatrixEvent>,
    task: Option<JoinHandle<VirtualMatrix>>,
}

impl MatrixServer {
    /// Bind `addr` and start serving `matrix`
    ///
    /// Bind to port 0 to let the OS pick a free port, then read it back with
    /// [`local_addr`](Self::local_addr).
    pub async fn bind<A: ToSocketAddrs>(addr: A, matrix: VirtualMatrix) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE);

        info!("Virtual matrix {} listening on {}", matrix.id(), local_addr);
        let task = tokio::spawn(serve(listener, matrix, cmd_rx, event_tx.clone()));

        Ok(Self {
            local_addr,
            cmd_tx,
            event_tx,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe to events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<VirtualMatrixEvent> {
        self.event_tx.subscribe()
    }

    /// Send a raw line to the connected client
    ///
    /// Lines injected while no client is connected are dropped.
    pub async fn inject(&self, line: impl Into<String>) {
        self.command(VirtualMatrixCommand::Inject(line.into())).await;
    }

    /// Change a route from the "front panel"
    pub async fn set_route(&self, output: OutputPort, input: InputSource) {
        self.command(VirtualMatrixCommand::SetRoute { output, input })
            .await;
    }

    pub async fn set_format(&self, format: ResponseFormat) {
        self.command(VirtualMatrixCommand::SetFormat(format)).await;
    }

    async fn command(&self, cmd: VirtualMatrixCommand) {
        if self.cmd_tx.send(cmd).await.is_err() {
            warn!("Virtual matrix server is no longer running");
        }
    }

    /// Stop serving and hand back the matrix with its final state
    ///
    /// Returns `None` if the server task died.
    pub async fn shutdown(mut self) -> Option<VirtualMatrix> {
        let _ = self.cmd_tx.send(VirtualMatrixCommand::Shutdown).await;
        let task = self.task.take()?;
        match task.await {
            Ok(matrix) => Some(matrix),
            Err(e) => {
                warn!("Virtual matrix server task failed: {}", e);
                None
            }
        }
    }
}

impl Drop for MatrixServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn serve(
    listener: TcpListener,
    mut matrix: VirtualMatrix,
    mut cmd_rx: mpsc::Receiver<VirtualMatrixCommand>,
    event_tx: broadcast::Sender<VirtualMatrixEvent>,
) -> VirtualMatrix {
    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Virtual matrix client connected from {}", peer);
                    stream
                }
                Err(e) => {
                    warn!("Virtual matrix accept failed: {}", e);
                    continue;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(VirtualMatrixCommand::Shutdown) | None => break,
                Some(VirtualMatrixCommand::SetRoute { output, input }) => {
                    matrix.set_route(output, input);
                    let _ = event_tx.send(VirtualMatrixEvent::RouteChanged { output, input });
                    continue;
                }
                Some(VirtualMatrixCommand::SetFormat(format)) => {
                    matrix.set_format(format);
                    continue;
                }
                Some(VirtualMatrixCommand::Inject(line)) => {
                    debug!("No client connected, dropping injected {:?}", line);
                    continue;
                }
            },
        };
        let _ = stream.set_nodelay(true);

        match run_virtual_matrix_task(stream, &mut matrix, &mut cmd_rx, &event_tx).await {
            Ok(SessionEnd::StreamClosed) => continue,
            Ok(SessionEnd::Shutdown) => break,
            Err(e) => warn!("Virtual matrix session failed: {}", e),
        }
    }

    info!("Virtual matrix server for {} stopped", matrix.id());
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdmx_protocol::MatrixCommand;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_server_serves_sequential_clients() {
        let server = MatrixServer::bind(
            "127.0.0.1:0",
            VirtualMatrix::new("Test", ResponseFormat::Legacy),
        )
        .await
        .unwrap();

        for code in ["01", "02"] {
            let stream = TcpStream::connect(server.local_addr()).await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            write_half
                .write_all(format!("cir {}\r\n", code).as_bytes())
                .await
                .unwrap();

            let mut line = String::new();
            tokio::time::timeout(Duration::from_millis(500), reader.read_line(&mut line))
                .await
                .unwrap()
                .unwrap();
            assert!(line.starts_with("s1"), "{:?}", line);
        }

        let matrix = server.shutdown().await.unwrap();
        let out1 = OutputPort::new(1).unwrap();
        assert_eq!(
            matrix.command_log(),
            &[
                MatrixCommand::route(out1, InputSource::new(2).unwrap()),
                MatrixCommand::route(out1, InputSource::new(3).unwrap()),
            ]
        );
        assert_eq!(matrix.route(out1), InputSource::new(3).unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_without_clients() {
        let server = MatrixServer::bind(
            "127.0.0.1:0",
            VirtualMatrix::new("Idle", ResponseFormat::Silent),
        )
        .await
        .unwrap();
        server
            .set_route(OutputPort::new(2).unwrap(), InputSource::new(4).unwrap())
            .await;

        let matrix = tokio::time::timeout(Duration::from_millis(500), server.shutdown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            matrix.route(OutputPort::new(2).unwrap()),
            InputSource::new(4).unwrap()
        );
    }
}
