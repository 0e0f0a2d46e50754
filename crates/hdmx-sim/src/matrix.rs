//! Virtual matrix switch
//!
//! Holds the route of each output, applies decoded commands the way the
//! hardware does, and queues the status lines the hardware would broadcast.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use hdmx_protocol::{InputSource, MatrixCommand, OutputPort, RouteReport, StatusFormat, PORT_COUNT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Status line dialect a virtual matrix answers in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseFormat {
    /// `s<output><device code>`
    Legacy,
    /// `Rx<NN> to Tx<NN>`
    #[default]
    NamedPair,
    /// `bypass from In<NN> to Out[<n>/4]`
    BypassRoute,
    /// `route <rx> <tx>`
    DigitPair,
    /// Accept commands but never announce anything
    Silent,
}

impl ResponseFormat {
    /// The protocol format of emitted lines, `None` when silent
    pub fn status_format(self) -> Option<StatusFormat> {
        match self {
            ResponseFormat::Legacy => Some(StatusFormat::Legacy),
            ResponseFormat::NamedPair => Some(StatusFormat::NamedPair),
            ResponseFormat::BypassRoute => Some(StatusFormat::BypassRoute),
            ResponseFormat::DigitPair => Some(StatusFormat::DigitPair),
            ResponseFormat::Silent => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ResponseFormat::Legacy => "legacy",
            ResponseFormat::NamedPair => "named-pair",
            ResponseFormat::BypassRoute => "bypass-route",
            ResponseFormat::DigitPair => "digit-pair",
            ResponseFormat::Silent => "silent",
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized [`ResponseFormat`] name
#[derive(Debug, Clone, Error)]
#[error("unknown response format '{0}' (expected legacy, named-pair, bypass-route, digit-pair or silent)")]
pub struct UnknownFormat(pub String);

impl FromStr for ResponseFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        [
            ResponseFormat::Legacy,
            ResponseFormat::NamedPair,
            ResponseFormat::BypassRoute,
            ResponseFormat::DigitPair,
            ResponseFormat::Silent,
        ]
        .into_iter()
        .find(|format| format.as_str() == wanted)
        .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

/// Configuration for creating a virtual matrix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualMatrixConfig {
    /// Display name
    pub id: String,
    /// Dialect of emitted status lines
    pub format: ResponseFormat,
    /// Input shown on each output at power-on, indexed from `OUT1`
    pub initial_routes: [InputSource; PORT_COUNT as usize],
}

impl Default for VirtualMatrixConfig {
    fn default() -> Self {
        Self {
            id: "Virtual Matrix".to_string(),
            format: ResponseFormat::default(),
            initial_routes: [InputSource::FIRST; PORT_COUNT as usize],
        }
    }
}

/// A simulated 4x4 matrix switch
#[derive(Debug)]
pub struct VirtualMatrix {
    id: String,
    format: ResponseFormat,
    routes: [InputSource; PORT_COUNT as usize],
    /// Status lines waiting to go out, without terminators
    pending_output: VecDeque<String>,
    /// Every command applied, oldest first
    command_log: Vec<MatrixCommand>,
}

impl VirtualMatrix {
    /// Create a matrix with every output on `IN1`
    pub fn new(id: impl Into<String>, format: ResponseFormat) -> Self {
        Self::from_config(VirtualMatrixConfig {
            id: id.into(),
            format,
            ..VirtualMatrixConfig::default()
        })
    }

    pub fn from_config(config: VirtualMatrixConfig) -> Self {
        Self {
            id: config.id,
            format: config.format,
            routes: config.initial_routes,
            pending_output: VecDeque::new(),
            command_log: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn format(&self) -> ResponseFormat {
        self.format
    }

    pub fn set_format(&mut self, format: ResponseFormat) {
        self.format = format;
    }

    /// Input currently shown on `output`
    pub fn route(&self, output: OutputPort) -> InputSource {
        self.routes[output.index()]
    }

    /// All routes, indexed from `OUT1`
    pub fn routes(&self) -> [InputSource; PORT_COUNT as usize] {
        self.routes
    }

    /// Change a route as if from the front panel and announce it
    pub fn set_route(&mut self, output: OutputPort, input: InputSource) {
        self.routes[output.index()] = input;
        self.announce(RouteReport::new(output, input));
    }

    /// Apply a received command and announce the resulting route
    ///
    /// The hardware announces after every command, including a route to the
    /// input already selected.
    pub fn apply(&mut self, command: MatrixCommand) -> RouteReport {
        self.command_log.push(command);

        let output = command.output();
        let input = match command {
            MatrixCommand::Route { input, .. } => input,
            MatrixCommand::Nudge { direction, .. } => direction.apply(self.route(output)),
        };
        debug!("{}: {} -> {} on {}", self.id, command.key(), input, output);

        self.routes[output.index()] = input;
        let report = RouteReport::new(output, input);
        self.announce(report);
        report
    }

    /// Queue an arbitrary line, bypassing the route model
    pub fn inject(&mut self, line: impl Into<String>) {
        self.pending_output.push_back(line.into());
    }

    fn announce(&mut self, report: RouteReport) {
        if let Some(line) = self
            .format
            .status_format()
            .and_then(|format| report.to_line(format))
        {
            self.pending_output.push_back(line);
        }
    }

    /// Take the next pending status line
    pub fn take_output(&mut self) -> Option<String> {
        self.pending_output.pop_front()
    }

    pub fn has_output(&self) -> bool {
        !self.pending_output.is_empty()
    }

    pub fn clear_output(&mut self) {
        self.pending_output.clear();
    }

    /// Commands applied so far, oldest first
    pub fn command_log(&self) -> &[MatrixCommand] {
        &self.command_log
    }

    pub fn clear_command_log(&mut self) {
        self.command_log.clear();
    }

    /// One-line summary such as `OUT1=IN1 OUT2=IN3 OUT3=IN1 OUT4=IN4`
    pub fn state_summary(&self) -> String {
        OutputPort::all()
            .map(|output| format!("{}={}", output, self.route(output)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
