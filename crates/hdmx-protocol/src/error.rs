//! Error types for matrix protocol parsing and encoding

use thiserror::Error;

/// Errors that can occur while parsing a line received from, or sent to, the switch
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Nothing left after trimming line endings
    #[error("empty line")]
    Empty,

    /// No recognizer claimed the line
    #[error("unrecognized status line: {0}")]
    Unrecognized(String),

    /// A recognizer matched but the decoded values fall outside the matrix
    #[error("values out of range in {line:?}: output {output}, input {input}")]
    OutOfRange {
        line: String,
        output: i64,
        input: i64,
    },

    /// Not a `cir XX` command line
    #[error("invalid command frame: {0}")]
    InvalidFrame(String),

    /// Well-formed `cir` frame with a code missing from the command table
    #[error("unknown command code: 0x{0:02x}")]
    UnknownCode(u8),
}

/// Higher-level protocol errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Parse error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Output port outside 1..=4
    #[error("invalid output port: {0}")]
    InvalidOutputPort(u8),

    /// Input source outside 1..=4
    #[error("invalid input source: {0}")]
    InvalidInputSource(u8),

    /// Device code that is not a small decimal number
    #[error("invalid device code: {0:?}")]
    InvalidDeviceCode(String),

    /// Command key missing from the command table
    #[error("no command mapping for {0:?}")]
    InvalidCommandKey(String),
}
