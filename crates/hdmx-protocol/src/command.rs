//! Matrix control commands
//!
//! Every command is a single `cir <code>\r\n` line where `<code>` is two
//! lowercase hex digits. The code space is closed: sixteen direct routes
//! (one per output × input pair) and a decrease/increase nudge per output.
//!
//! | Output | IN1 | IN2 | IN3 | IN4 | increase | decrease |
//! |--------|-----|-----|-----|-----|----------|----------|
//! | OUT1   | 00  | 01  | 02  | 03  | 1e       | 1d       |
//! | OUT2   | 08  | 09  | 0a  | 0b  | 06       | 05       |
//! | OUT3   | 10  | 11  | 12  | 13  | 0e       | 0d       |
//! | OUT4   | 18  | 19  | 1a  | 1b  | 16       | 15       |

use std::fmt;
use std::str::FromStr;

use crate::error::{ParseError, ProtocolError};
use crate::port::{InputSource, OutputPort};
use crate::EncodeCommand;

/// Command verb prefix
const COMMAND_PREFIX: &str = "cir";

/// Line terminator expected by the switch
const COMMAND_TERMINATOR: &str = "\r\n";

/// Route codes indexed by `[output][input]`
const ROUTE_CODES: [[u8; 4]; 4] = [
    [0x00, 0x01, 0x02, 0x03],
    [0x08, 0x09, 0x0a, 0x0b],
    [0x10, 0x11, 0x12, 0x13],
    [0x18, 0x19, 0x1a, 0x1b],
];

/// Nudge codes indexed by output: `(decrease, increase)`
const NUDGE_CODES: [(u8, u8); 4] = [(0x1d, 0x1e), (0x05, 0x06), (0x0d, 0x0e), (0x15, 0x16)];

/// Direction of a relative selector step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Nudge {
    /// Step to the previous input (`MINUS`)
    Decrease,
    /// Step to the next input (`PLUS`)
    Increase,
}

impl Nudge {
    /// Apply this step to an input, wrapping at either end
    pub fn apply(self, input: InputSource) -> InputSource {
        match self {
            Nudge::Decrease => input.previous(),
            Nudge::Increase => input.next(),
        }
    }

    fn key_suffix(self) -> &'static str {
        match self {
            Nudge::Decrease => "MINUS",
            Nudge::Increase => "PLUS",
        }
    }
}

/// A command that can be sent to the matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MatrixCommand {
    /// Select `input` on `output`
    Route {
        output: OutputPort,
        input: InputSource,
    },
    /// Move the selector of `output` by one step
    Nudge { output: OutputPort, direction: Nudge },
}

impl MatrixCommand {
    /// Direct route command
    pub fn route(output: OutputPort, input: InputSource) -> Self {
        Self::Route { output, input }
    }

    /// Relative nudge command
    pub fn nudge(output: OutputPort, direction: Nudge) -> Self {
        Self::Nudge { output, direction }
    }

    /// The output this command acts on
    pub fn output(&self) -> OutputPort {
        match self {
            Self::Route { output, .. } | Self::Nudge { output, .. } => *output,
        }
    }

    /// Table code for this command
    pub fn code(&self) -> u8 {
        match self {
            Self::Route { output, input } => ROUTE_CODES[output.index()][input.index()],
            Self::Nudge { output, direction } => {
                let (decrease, increase) = NUDGE_CODES[output.index()];
                match direction {
                    Nudge::Decrease => decrease,
                    Nudge::Increase => increase,
                }
            }
        }
    }

    /// Reverse table lookup
    pub fn from_code(code: u8) -> Option<Self> {
        for output in OutputPort::all() {
            for input in InputSource::all() {
                if ROUTE_CODES[output.index()][input.index()] == code {
                    return Some(Self::route(output, input));
                }
            }
            let (decrease, increase) = NUDGE_CODES[output.index()];
            if code == decrease {
                return Some(Self::nudge(output, Nudge::Decrease));
            }
            if code == increase {
                return Some(Self::nudge(output, Nudge::Increase));
            }
        }
        None
    }

    /// Every command in the table, routes first
    pub fn all() -> impl Iterator<Item = MatrixCommand> {
        let routes = OutputPort::all()
            .flat_map(|output| InputSource::all().map(move |input| Self::route(output, input)));
        let nudges = OutputPort::all().flat_map(|output| {
            [Nudge::Decrease, Nudge::Increase]
                .into_iter()
                .map(move |direction| Self::nudge(output, direction))
        });
        routes.chain(nudges)
    }

    /// Stable key naming this command, e.g. `OUT2_IN3` or `OUT1_PLUS`
    pub fn key(&self) -> String {
        match self {
            Self::Route { output, input } => format!("{}_{}", output, input),
            Self::Nudge { output, direction } => format!("{}_{}", output, direction.key_suffix()),
        }
    }

    /// Look a command up by its key
    pub fn from_key(key: &str) -> Result<Self, ProtocolError> {
        let wanted = key.trim();
        Self::all()
            .find(|cmd| cmd.key().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ProtocolError::InvalidCommandKey(key.to_string()))
    }

    /// Decode a `cir XX` line (terminator optional)
    pub fn decode(line: &str) -> Result<Self, ParseError> {
        let trimmed = line.trim();
        let mut parts = trimmed.split_whitespace();

        match (parts.next(), parts.next(), parts.next()) {
            (Some(verb), Some(hex), None)
                if verb.eq_ignore_ascii_case(COMMAND_PREFIX) && hex.len() == 2 =>
            {
                let code = u8::from_str_radix(hex, 16)
                    .map_err(|_| ParseError::InvalidFrame(trimmed.to_string()))?;
                Self::from_code(code).ok_or(ParseError::UnknownCode(code))
            }
            _ => Err(ParseError::InvalidFrame(trimmed.to_string())),
        }
    }
}

impl EncodeCommand for MatrixCommand {
    fn encode(&self) -> Vec<u8> {
        format!("{} {:02x}{}", COMMAND_PREFIX, self.code(), COMMAND_TERMINATOR).into_bytes()
    }
}

impl fmt::Display for MatrixCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {:02x})", self.key(), COMMAND_PREFIX, self.code())
    }
}

impl FromStr for MatrixCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn out(n: u8) -> OutputPort {
        OutputPort::new(n).unwrap()
    }

    fn input(n: u8) -> InputSource {
        InputSource::new(n).unwrap()
    }

    #[test]
    fn test_encode_route() {
        assert_eq!(MatrixCommand::route(out(1), input(1)).encode(), b"cir 00\r\n");
        assert_eq!(MatrixCommand::route(out(2), input(3)).encode(), b"cir 0a\r\n");
        assert_eq!(MatrixCommand::route(out(4), input(4)).encode(), b"cir 1b\r\n");
    }

    #[test]
    fn test_encode_nudges() {
        assert_eq!(
            MatrixCommand::nudge(out(1), Nudge::Increase).encode(),
            b"cir 1e\r\n"
        );
        assert_eq!(
            MatrixCommand::nudge(out(2), Nudge::Decrease).encode(),
            b"cir 05\r\n"
        );
        assert_eq!(
            MatrixCommand::nudge(out(3), Nudge::Increase).encode(),
            b"cir 0e\r\n"
        );
        assert_eq!(
            MatrixCommand::nudge(out(4), Nudge::Decrease).encode(),
            b"cir 15\r\n"
        );
    }

    #[test]
    fn test_table_has_no_duplicate_codes() {
        let mut codes: Vec<u8> = MatrixCommand::all().map(|c| c.code()).collect();
        assert_eq!(codes.len(), 24);
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), 24);
    }

    #[test]
    fn test_keys() {
        assert_eq!(MatrixCommand::route(out(3), input(2)).key(), "OUT3_IN2");
        assert_eq!(
            MatrixCommand::from_key("OUT2_MINUS").unwrap(),
            MatrixCommand::nudge(out(2), Nudge::Decrease)
        );
        assert_eq!(
            "out4_plus".parse::<MatrixCommand>().unwrap(),
            MatrixCommand::nudge(out(4), Nudge::Increase)
        );
        assert_eq!(
            MatrixCommand::from_key("OUT5_IN1"),
            Err(ProtocolError::InvalidCommandKey("OUT5_IN1".into()))
        );
    }

    #[test]
    fn test_decode() {
        assert_eq!(
            MatrixCommand::decode("cir 0a\r\n").unwrap(),
            MatrixCommand::route(out(2), input(3))
        );
        assert_eq!(
            MatrixCommand::decode("CIR 1D").unwrap(),
            MatrixCommand::nudge(out(1), Nudge::Decrease)
        );
        assert_eq!(MatrixCommand::decode("cir 07"), Err(ParseError::UnknownCode(0x07)));
        assert!(matches!(
            MatrixCommand::decode("cir zz"),
            Err(ParseError::InvalidFrame(_))
        ));
        assert!(matches!(
            MatrixCommand::decode("hello"),
            Err(ParseError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_nudge_wraps() {
        assert_eq!(Nudge::Decrease.apply(input(1)), input(4));
        assert_eq!(Nudge::Increase.apply(input(4)), input(1));
        assert_eq!(Nudge::Increase.apply(input(2)), input(3));
    }
}
