//! Streaming command codec
//!
//! Splits a byte stream received by the switch into [`MatrixCommand`]s.
//! Frames are terminated by `\n`; a preceding `\r` is optional. Frames that
//! do not decode are dropped with a debug log so one bad line cannot stall
//! the stream.

use tracing::debug;

use crate::command::MatrixCommand;
use crate::ProtocolCodec;

/// Maximum frame length before the buffer is considered garbage
const MAX_FRAME_LEN: usize = 64;

/// Streaming `cir XX` command codec
pub struct CommandCodec {
    buffer: Vec<u8>,
}

impl CommandCodec {
    /// Create a new command codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_FRAME_LEN),
        }
    }

    /// Take the next complete frame out of the buffer
    fn next_frame(&mut self) -> Option<Vec<u8>> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(end) => Some(self.buffer.drain(..=end).collect()),
            None => {
                if self.buffer.len() > MAX_FRAME_LEN {
                    debug!(
                        "Discarding {} bytes without a line terminator",
                        self.buffer.len()
                    );
                    self.buffer.clear();
                }
                None
            }
        }
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolCodec for CommandCodec {
    type Command = MatrixCommand;

    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn next_command(&mut self) -> Option<MatrixCommand> {
        self.next_command_with_bytes().map(|(cmd, _)| cmd)
    }

    fn next_command_with_bytes(&mut self) -> Option<(MatrixCommand, Vec<u8>)> {
        while let Some(frame) = self.next_frame() {
            let text = String::from_utf8_lossy(&frame);
            if text.trim().is_empty() {
                continue;
            }
            match MatrixCommand::decode(&text) {
                Ok(cmd) => return Some((cmd, frame)),
                Err(e) => debug!("Dropping frame {:?}: {}", text.trim(), e),
            }
        }
        None
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InputSource, Nudge, OutputPort};

    #[test]
    fn test_streaming_parse() {
        let mut codec = CommandCodec::new();

        codec.push_bytes(b"cir 0");
        assert!(codec.next_command().is_none());

        codec.push_bytes(b"a\r\n");
        assert_eq!(
            codec.next_command(),
            Some(MatrixCommand::route(
                OutputPort::new(2).unwrap(),
                InputSource::new(3).unwrap()
            ))
        );
    }

    #[test]
    fn test_multiple_commands_and_garbage() {
        let mut codec = CommandCodec::new();
        codec.push_bytes(b"cir 1d\r\nnonsense\r\n\r\ncir 16\n");

        assert_eq!(
            codec.next_command(),
            Some(MatrixCommand::nudge(OutputPort::new(1).unwrap(), Nudge::Decrease))
        );
        let (cmd, raw) = codec.next_command_with_bytes().unwrap();
        assert_eq!(cmd, MatrixCommand::nudge(OutputPort::new(4).unwrap(), Nudge::Increase));
        assert_eq!(raw, b"cir 16\n");
        assert!(codec.next_command().is_none());
    }

    #[test]
    fn test_oversized_garbage_is_discarded() {
        let mut codec = CommandCodec::new();
        codec.push_bytes(&[b'x'; MAX_FRAME_LEN + 1]);
        assert!(codec.next_command().is_none());

        codec.push_bytes(b"cir 00\r\n");
        assert!(codec.next_command().is_some());
    }

    #[test]
    fn test_clear() {
        let mut codec = CommandCodec::new();
        codec.push_bytes(b"cir 0");
        codec.clear();
        codec.push_bytes(b"0\r\n");
        assert!(codec.next_command().is_none());
    }
}
