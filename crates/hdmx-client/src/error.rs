//! Error types for the matrix client

use thiserror::Error;

/// Errors surfaced by [`MatrixClient`](crate::MatrixClient) operations
///
/// Read faults, peer closes, unparseable lines and probe timeouts are
/// handled inside the client and never appear here.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connect refused or unreachable
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// No open connection
    #[error("not connected to matrix switch")]
    NotConnected,

    /// Socket write failed; the connection has been torn down
    #[error("write failed: {0}")]
    Write(#[from] std::io::Error),

    /// Socket write did not finish in time; the connection has been torn down
    #[error("write timed out after {0}ms")]
    WriteTimeout(u64),

    /// Output or input outside the matrix, or an unknown command key
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] hdmx_protocol::ProtocolError),
}
