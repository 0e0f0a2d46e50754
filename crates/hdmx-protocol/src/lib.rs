//! HDMI Matrix Protocol Library
//!
//! This crate provides encoding and parsing for the ASCII control protocol
//! spoken by 4x4 HDMI matrix switches over a raw TCP socket.
//!
//! # Architecture
//!
//! Traffic is line based in both directions:
//! - Commands TO the switch are `cir XX\r\n`, where `XX` is a two-digit
//!   lowercase hex code from a fixed table (see [`command`])
//! - Status lines FROM the switch are unsolicited and arrive in one of
//!   several historical formats (see [`status`])
//!
//! The switch has no read-only query command. Clients learn the current
//! route of an output either from an unsolicited status line or by nudging
//! the selector and watching what it announces.
//!
//! # Example
//!
//! ```rust
//! use hdmx_protocol::{parse_status_line, EncodeCommand, InputSource, MatrixCommand, OutputPort};
//!
//! let out2 = OutputPort::new(2).unwrap();
//! let in3 = InputSource::new(3).unwrap();
//! assert_eq!(MatrixCommand::route(out2, in3).encode(), b"cir 0a\r\n");
//!
//! let status = parse_status_line("Rx12 to Tx5").unwrap();
//! let report = status.report().unwrap();
//! assert_eq!((report.output.get(), report.input.get()), (2, 2));
//! ```

pub mod codec;
pub mod command;
pub mod error;
pub mod port;
pub mod status;

pub use codec::CommandCodec;
pub use command::{MatrixCommand, Nudge};
pub use error::{ParseError, ProtocolError};
pub use port::{InputSource, OutputPort, PORT_COUNT};
pub use status::{parse_status_line, RouteReport, StatusFormat, StatusLine};

/// Trait for protocol codecs that can parse incoming data streams
pub trait ProtocolCodec {
    /// The command type produced by this codec
    type Command;

    /// Push raw bytes into the codec's buffer
    fn push_bytes(&mut self, data: &[u8]);

    /// Try to extract the next complete command from the buffer
    fn next_command(&mut self) -> Option<Self::Command>;

    /// Try to extract the next complete command along with its raw bytes
    ///
    /// This is useful for traffic logging where we want to show the exact
    /// bytes that were parsed for each command.
    fn next_command_with_bytes(&mut self) -> Option<(Self::Command, Vec<u8>)>;

    /// Clear the internal buffer
    fn clear(&mut self);
}

/// Trait for commands that can be encoded to bytes
pub trait EncodeCommand {
    /// Encode this command to its wire format
    fn encode(&self) -> Vec<u8>;
}
