//! Virtual matrix session task
//!
//! Serves a [`VirtualMatrix`] over one async stream. The task uses a select!
//! loop to:
//! - Read `cir XX` commands from the stream, apply them and write back the
//!   resulting status lines
//! - Handle [`VirtualMatrixCommand`]s from a channel
//! - Emit [`VirtualMatrixEvent`]s via a broadcast channel

use std::io;

use hdmx_protocol::{CommandCodec, InputSource, MatrixCommand, OutputPort, ProtocolCodec};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::{ResponseFormat, VirtualMatrix};

/// Commands that can be sent to a running virtual matrix
#[derive(Debug, Clone)]
pub enum VirtualMatrixCommand {
    /// Send a raw line to the client as if the switch had produced it
    Inject(String),
    /// Change a route from the "front panel" and announce it
    SetRoute {
        output: OutputPort,
        input: InputSource,
    },
    /// Switch the status line dialect
    SetFormat(ResponseFormat),
    /// Stop serving
    Shutdown,
}

/// Events emitted by a running virtual matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualMatrixEvent {
    /// A client connected
    ClientConnected,
    /// The client closed the stream
    ClientDisconnected,
    /// A command arrived from the client
    CommandReceived(MatrixCommand),
    /// An output now shows a different input
    RouteChanged {
        output: OutputPort,
        input: InputSource,
    },
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the stream
    StreamClosed,
    /// Shutdown was requested or the command channel closed
    Shutdown,
}

/// Serve `matrix` over `stream` until the peer leaves or shutdown is requested
///
/// The matrix is borrowed so its routes and command log outlive the session.
pub async fn run_virtual_matrix_task<S>(
    mut stream: S,
    matrix: &mut VirtualMatrix,
    cmd_rx: &mut mpsc::Receiver<VirtualMatrixCommand>,
    event_tx: &broadcast::Sender<VirtualMatrixEvent>,
) -> io::Result<SessionEnd>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut codec = CommandCodec::new();
    let mut buf = [0u8; 256];

    info!(
        "Starting virtual matrix session for {} ({} format)",
        matrix.id(),
        matrix.format()
    );
    let _ = event_tx.send(VirtualMatrixEvent::ClientConnected);

    // Lines queued before the client arrived are stale
    matrix.clear_output();

    let end = loop {
        tokio::select! {
            result = stream.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Virtual matrix stream closed for {}", matrix.id());
                        let _ = event_tx.send(VirtualMatrixEvent::ClientDisconnected);
                        break SessionEnd::StreamClosed;
                    }
                    Ok(n) => {
                        codec.push_bytes(&buf[..n]);
                        while let Some(command) = codec.next_command() {
                            let before = matrix.route(command.output());
                            let _ = event_tx.send(VirtualMatrixEvent::CommandReceived(command));
                            let report = matrix.apply(command);
                            if report.input != before {
                                let _ = event_tx.send(VirtualMatrixEvent::RouteChanged {
                                    output: report.output,
                                    input: report.input,
                                });
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Virtual matrix {} stream error: {}", matrix.id(), e);
                        return Err(e);
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(VirtualMatrixCommand::Inject(line)) => {
                        debug!("Virtual matrix {} injecting {:?}", matrix.id(), line);
                        matrix.inject(line);
                    }
                    Some(VirtualMatrixCommand::SetRoute { output, input }) => {
                        let changed = matrix.route(output) != input;
                        matrix.set_route(output, input);
                        if changed {
                            let _ = event_tx.send(VirtualMatrixEvent::RouteChanged { output, input });
                        }
                    }
                    Some(VirtualMatrixCommand::SetFormat(format)) => {
                        info!("Virtual matrix {} now answering in {} format", matrix.id(), format);
                        matrix.set_format(format);
                    }
                    Some(VirtualMatrixCommand::Shutdown) => {
                        info!("Shutdown requested for virtual matrix {}", matrix.id());
                        break SessionEnd::Shutdown;
                    }
                    None => {
                        debug!("Command channel closed for virtual matrix {}", matrix.id());
                        break SessionEnd::Shutdown;
                    }
                }
            }
        }

        while let Some(line) = matrix.take_output() {
            debug!("Virtual matrix {} sending {:?}", matrix.id(), line);
            stream.write_all(line.as_bytes()).await?;
            stream.write_all(b"\r\n").await?;
        }
        stream.flush().await?;
    };

    info!("Virtual matrix session ended for {}", matrix.id());
    Ok(end)
}
