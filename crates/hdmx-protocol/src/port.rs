//! Output port and input source identities
//!
//! Both are small 1-based integers bounded by [`PORT_COUNT`]. The device
//! reports inputs on the wire as a zero-based "device code", so
//! `InputSource` knows how to convert to and from that form.

use std::fmt;

use crate::error::ProtocolError;

/// Number of outputs (and inputs) on the matrix
pub const PORT_COUNT: u8 = 4;

/// A physical display/sink terminal on the switch (1..=4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct OutputPort(u8);

/// A selectable upstream device (1..=4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct InputSource(u8);

impl OutputPort {
    /// Validate and wrap a 1-based output number
    pub fn new(n: u8) -> Result<Self, ProtocolError> {
        if (1..=PORT_COUNT).contains(&n) {
            Ok(Self(n))
        } else {
            Err(ProtocolError::InvalidOutputPort(n))
        }
    }

    /// Get the 1-based output number
    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based index, for table lookups
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    /// Iterate over every output in ascending order
    pub fn all() -> impl Iterator<Item = OutputPort> {
        (1..=PORT_COUNT).map(OutputPort)
    }

    /// Parse the historical string key form (`"1"` .. `"4"`)
    pub fn from_key(key: &str) -> Result<Self, ProtocolError> {
        let n = key
            .trim()
            .parse::<u8>()
            .map_err(|_| ProtocolError::InvalidCommandKey(key.to_string()))?;
        Self::new(n)
    }

    /// Display label, e.g. `OUT2`
    pub fn label(self) -> String {
        format!("OUT{}", self.0)
    }
}

impl InputSource {
    /// Validate and wrap a 1-based input number
    pub fn new(n: u8) -> Result<Self, ProtocolError> {
        if (1..=PORT_COUNT).contains(&n) {
            Ok(Self(n))
        } else {
            Err(ProtocolError::InvalidInputSource(n))
        }
    }

    /// The first input; also the degraded default when nothing else is known
    pub const FIRST: InputSource = InputSource(1);

    /// Get the 1-based input number
    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based index, for table lookups
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    /// Iterate over every input in ascending order
    pub fn all() -> impl Iterator<Item = InputSource> {
        (1..=PORT_COUNT).map(InputSource)
    }

    /// Zero-based wire representation (`IN1` is `"0"`)
    pub fn device_code(self) -> String {
        (self.0 - 1).to_string()
    }

    /// Parse a zero-based device code as delivered to status callbacks
    pub fn from_device_code(code: &str) -> Result<Self, ProtocolError> {
        let code = code
            .trim()
            .parse::<u8>()
            .map_err(|_| ProtocolError::InvalidDeviceCode(code.to_string()))?;
        code.checked_add(1)
            .ok_or(ProtocolError::InvalidInputSource(u8::MAX))
            .and_then(Self::new)
    }

    /// Display label, e.g. `IN3`
    pub fn label(self) -> String {
        format!("IN{}", self.0)
    }

    /// Parse a display label (`IN1` .. `IN4`, case-insensitive)
    pub fn from_label(label: &str) -> Result<Self, ProtocolError> {
        let trimmed = label.trim();
        let digits = trimmed
            .get(..2)
            .filter(|prefix| prefix.eq_ignore_ascii_case("in"))
            .map(|_| &trimmed[2..])
            .ok_or_else(|| ProtocolError::InvalidCommandKey(label.to_string()))?;
        let n = digits
            .parse::<u8>()
            .map_err(|_| ProtocolError::InvalidCommandKey(label.to_string()))?;
        Self::new(n)
    }

    /// The next input, wrapping from the last back to `IN1`
    pub fn next(self) -> Self {
        if self.0 == PORT_COUNT {
            Self(1)
        } else {
            Self(self.0 + 1)
        }
    }

    /// The previous input, wrapping from `IN1` to the last
    pub fn previous(self) -> Self {
        if self.0 == 1 {
            Self(PORT_COUNT)
        } else {
            Self(self.0 - 1)
        }
    }
}

impl fmt::Display for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OUT{}", self.0)
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IN{}", self.0)
    }
}

impl TryFrom<u8> for OutputPort {
    type Error = ProtocolError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl TryFrom<u8> for InputSource {
    type Error = ProtocolError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<OutputPort> for u8 {
    fn from(port: OutputPort) -> Self {
        port.0
    }
}

impl From<InputSource> for u8 {
    fn from(input: InputSource) -> Self {
        input.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_validation() {
        assert!(OutputPort::new(0).is_err());
        assert!(OutputPort::new(5).is_err());
        assert_eq!(OutputPort::new(4).unwrap().get(), 4);
        assert_eq!(
            InputSource::new(9),
            Err(ProtocolError::InvalidInputSource(9))
        );
    }

    #[test]
    fn test_device_code_mapping() {
        let input = InputSource::from_device_code("2").unwrap();
        assert_eq!(input.get(), 3);
        assert_eq!(input.device_code(), "2");
        assert!(InputSource::from_device_code("4").is_err());
        assert!(InputSource::from_device_code("x").is_err());
    }

    #[test]
    fn test_labels() {
        assert_eq!(InputSource::from_label("IN2").unwrap().get(), 2);
        assert_eq!(InputSource::from_label("in4").unwrap().get(), 4);
        assert!(InputSource::from_label("IN5").is_err());
        assert!(InputSource::from_label("OUT1").is_err());
        assert_eq!(OutputPort::new(3).unwrap().to_string(), "OUT3");
        assert_eq!(InputSource::new(1).unwrap().label(), "IN1");
    }

    #[test]
    fn test_cyclic_neighbours() {
        let first = InputSource::FIRST;
        assert_eq!(first.previous().get(), PORT_COUNT);
        assert_eq!(first.previous().next(), first);
        assert_eq!(InputSource::new(2).unwrap().next().get(), 3);
    }

    #[test]
    fn test_output_key() {
        assert_eq!(OutputPort::from_key("2").unwrap().get(), 2);
        assert!(OutputPort::from_key("OUT2").is_err());
        assert!(OutputPort::from_key("7").is_err());
    }
}
