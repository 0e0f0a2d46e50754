//! Status line parsing
//!
//! The switch announces route changes with unsolicited newline-terminated
//! text, and different firmware revisions have used different formats. A
//! line is offered to each recognizer in turn and the first one that claims
//! it decides the outcome:
//!
//! 1. Legacy compact: `s<output><device code>` e.g. `s21`
//! 2. Named pair: `Rx12 to Tx5`
//! 3. Bypass route: `bypass from In12 to Out[2/4]` (or `... to Tx5`)
//! 4. Bypass port announcement: `bypass port 2` (observed, carries no route)
//! 5. Digit pair fallback: any line with one number in 11..=14 and another in 4..=7
//!
//! Receiver numbers start at 11 for `IN1` and transmitter numbers start at 4
//! for `OUT1`. A recognizer that claims a line but decodes values outside the
//! matrix yields [`ParseError::OutOfRange`]; later recognizers are not tried.

use crate::error::ParseError;
use crate::port::{InputSource, OutputPort, PORT_COUNT};

/// Receiver number reported for `IN1`
const RX_BASE: i64 = 11;

/// Transmitter number reported for `OUT1`
const TX_BASE: i64 = 4;

/// Which recognizer produced (or should produce) a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StatusFormat {
    /// `s<output><device code>`
    Legacy,
    /// `Rx<NN> to Tx<NN>`
    NamedPair,
    /// `bypass from In<NN> to Out[<n>/<m>]`
    BypassRoute,
    /// `bypass port ...`
    BypassAnnouncement,
    /// Bare receiver/transmitter numbers
    DigitPair,
}

impl StatusFormat {
    /// Returns a human-readable name for the format
    pub fn name(&self) -> &'static str {
        match self {
            StatusFormat::Legacy => "legacy compact",
            StatusFormat::NamedPair => "named pair",
            StatusFormat::BypassRoute => "bypass route",
            StatusFormat::BypassAnnouncement => "bypass port",
            StatusFormat::DigitPair => "digit pair",
        }
    }
}

/// A decoded "output now shows input" fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RouteReport {
    pub output: OutputPort,
    pub input: InputSource,
}

impl RouteReport {
    pub fn new(output: OutputPort, input: InputSource) -> Self {
        Self { output, input }
    }

    /// Zero-based device code, as handed to status callbacks
    pub fn device_code(&self) -> String {
        self.input.device_code()
    }

    /// Render this report as the switch would announce it
    ///
    /// Returns `None` for [`StatusFormat::BypassAnnouncement`], which never
    /// carries a route.
    pub fn to_line(&self, format: StatusFormat) -> Option<String> {
        let rx = i64::from(self.input.get()) - 1 + RX_BASE;
        let tx = i64::from(self.output.get()) - 1 + TX_BASE;
        match format {
            StatusFormat::Legacy => Some(format!("s{}{}", self.output.get(), self.device_code())),
            StatusFormat::NamedPair => Some(format!("Rx{} to Tx{}", rx, tx)),
            StatusFormat::BypassRoute => Some(format!(
                "bypass from In{} to Out[{}/{}]",
                rx,
                self.output.get(),
                PORT_COUNT
            )),
            StatusFormat::BypassAnnouncement => None,
            StatusFormat::DigitPair => Some(format!("route {} {}", rx, tx)),
        }
    }
}

/// Outcome of a successfully recognized line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    /// A route fact
    Route {
        report: RouteReport,
        format: StatusFormat,
    },
    /// A bypass-port announcement; observed but carries no route
    BypassAnnouncement,
}

impl StatusLine {
    /// The route fact, if any
    pub fn report(&self) -> Option<RouteReport> {
        match self {
            StatusLine::Route { report, .. } => Some(*report),
            StatusLine::BypassAnnouncement => None,
        }
    }

    /// Which recognizer matched
    pub fn format(&self) -> StatusFormat {
        match self {
            StatusLine::Route { format, .. } => *format,
            StatusLine::BypassAnnouncement => StatusFormat::BypassAnnouncement,
        }
    }
}

/// A line split into words, kept alongside its lowercase form
struct Tokens<'a> {
    line: &'a str,
    lower: String,
    words: Vec<&'a str>,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Self {
        let words = line
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':'))
            .filter(|w| !w.is_empty())
            .collect();
        Self {
            line,
            lower: line.to_ascii_lowercase(),
            words,
        }
    }

    fn has_word(&self, word: &str) -> bool {
        self.words.iter().any(|w| w.eq_ignore_ascii_case(word))
    }

    /// First `<prefix><digits>` number among the words
    fn prefixed(&self, prefix: &str) -> Option<i64> {
        self.words.iter().find_map(|w| prefixed_number(w, prefix))
    }
}

/// Parse `<prefix><digits>...` where the prefix matches case-insensitively
fn prefixed_number(word: &str, prefix: &str) -> Option<i64> {
    let head = word.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let digits: &str = {
        let rest = &word[prefix.len()..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        &rest[..end]
    };
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Every maximal run of ASCII digits in the line, in order
fn digit_runs(line: &str) -> Vec<i64> {
    line.split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .filter_map(|run| run.parse().ok())
        .collect()
}

/// Validate decoded 1-based numbers against the matrix size
fn validated(line: &str, output: i64, input: i64) -> Result<RouteReport, ParseError> {
    let out_of_range = || ParseError::OutOfRange {
        line: line.to_string(),
        output,
        input,
    };
    let output = u8::try_from(output)
        .ok()
        .and_then(|n| OutputPort::new(n).ok())
        .ok_or_else(out_of_range)?;
    let input = u8::try_from(input)
        .ok()
        .and_then(|n| InputSource::new(n).ok())
        .ok_or_else(out_of_range)?;
    Ok(RouteReport::new(output, input))
}

fn route(
    tokens: &Tokens<'_>,
    format: StatusFormat,
    output: i64,
    input: i64,
) -> Result<StatusLine, ParseError> {
    validated(tokens.line, output, input).map(|report| StatusLine::Route { report, format })
}

/// `None` means "not mine, try the next recognizer"
type Recognizer = fn(&Tokens<'_>) -> Option<Result<StatusLine, ParseError>>;

const RECOGNIZERS: [Recognizer; 5] = [
    recognize_legacy,
    recognize_named_pair,
    recognize_bypass_route,
    recognize_bypass_announcement,
    recognize_digit_pair,
];

fn recognize_legacy(tokens: &Tokens<'_>) -> Option<Result<StatusLine, ParseError>> {
    let word = tokens.words.first()?;
    let rest = word.strip_prefix('s')?;
    let mut chars = rest.chars();
    let port = chars.next()?.to_digit(10)?;
    let code = chars.as_str();
    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let input = code
        .parse::<i64>()
        .ok()
        .and_then(|c| c.checked_add(1))
        .unwrap_or(i64::MAX);
    Some(route(tokens, StatusFormat::Legacy, i64::from(port), input))
}

fn recognize_named_pair(tokens: &Tokens<'_>) -> Option<Result<StatusLine, ParseError>> {
    if !tokens.has_word("to") {
        return None;
    }
    let rx = tokens.prefixed("rx")?;
    let tx = tokens.prefixed("tx")?;
    Some(route(
        tokens,
        StatusFormat::NamedPair,
        tx - TX_BASE + 1,
        rx - RX_BASE + 1,
    ))
}

fn recognize_bypass_route(tokens: &Tokens<'_>) -> Option<Result<StatusLine, ParseError>> {
    if !tokens.lower.contains("bypass") || !tokens.has_word("from") || !tokens.has_word("to") {
        return None;
    }
    let rx = tokens.prefixed("in")?;
    let output = tokens
        .words
        .iter()
        .find_map(|w| prefixed_number(w, "out["))
        .or_else(|| tokens.prefixed("tx").map(|tx| tx - TX_BASE + 1))?;
    Some(route(
        tokens,
        StatusFormat::BypassRoute,
        output,
        rx - RX_BASE + 1,
    ))
}

fn recognize_bypass_announcement(tokens: &Tokens<'_>) -> Option<Result<StatusLine, ParseError>> {
    tokens
        .lower
        .contains("bypass port")
        .then_some(Ok(StatusLine::BypassAnnouncement))
}

fn recognize_digit_pair(tokens: &Tokens<'_>) -> Option<Result<StatusLine, ParseError>> {
    let runs = digit_runs(tokens.line);
    let rx_at = runs.iter().position(|n| (11..=14).contains(n))?;
    let tx_at = runs
        .iter()
        .enumerate()
        .position(|(i, n)| i != rx_at && (4..=7).contains(n))?;
    Some(route(
        tokens,
        StatusFormat::DigitPair,
        runs[tx_at] - TX_BASE + 1,
        runs[rx_at] - RX_BASE + 1,
    ))
}

/// Parse one line received from the switch
///
/// Line-ending whitespace is ignored. Lines no recognizer claims come back as
/// [`ParseError::Unrecognized`].
pub fn parse_status_line(line: &str) -> Result<StatusLine, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let tokens = Tokens::new(trimmed);
    RECOGNIZERS
        .iter()
        .find_map(|recognize| recognize(&tokens))
        .unwrap_or_else(|| Err(ParseError::Unrecognized(trimmed.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(output: u8, input: u8) -> RouteReport {
        RouteReport::new(OutputPort::new(output).unwrap(), InputSource::new(input).unwrap())
    }

    fn parsed(line: &str) -> (RouteReport, StatusFormat) {
        match parse_status_line(line) {
            Ok(StatusLine::Route { report, format }) => (report, format),
            other => panic!("expected route for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_parse_legacy() {
        assert_eq!(parsed("s10"), (report(1, 1), StatusFormat::Legacy));
        assert_eq!(parsed("s23\r\n"), (report(2, 4), StatusFormat::Legacy));
        assert_eq!(parsed("s42 trailing"), (report(4, 3), StatusFormat::Legacy));
    }

    #[test]
    fn test_parse_legacy_out_of_range() {
        assert!(matches!(
            parse_status_line("s14"),
            Err(ParseError::OutOfRange { output: 1, input: 5, .. })
        ));
        assert!(matches!(
            parse_status_line("s52"),
            Err(ParseError::OutOfRange { output: 5, .. })
        ));
        assert!(matches!(
            parse_status_line("s199999999999999999999999"),
            Err(ParseError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_parse_named_pair() {
        assert_eq!(parsed("Rx12 to Tx5"), (report(2, 2), StatusFormat::NamedPair));
        assert_eq!(parsed("switch rx14 to tx4"), (report(1, 4), StatusFormat::NamedPair));
        assert_eq!(parsed("Tx7, to Rx11"), (report(4, 1), StatusFormat::NamedPair));
    }

    #[test]
    fn test_parse_named_pair_rejects_out_of_range() {
        assert!(matches!(
            parse_status_line("Rx15 to Tx5"),
            Err(ParseError::OutOfRange { input: 5, .. })
        ));
        assert!(matches!(
            parse_status_line("Rx12 to Tx9"),
            Err(ParseError::OutOfRange { output: 6, .. })
        ));
    }

    #[test]
    fn test_parse_bypass_route() {
        assert_eq!(
            parsed("bypass from In13 to Out[3/4]"),
            (report(3, 3), StatusFormat::BypassRoute)
        );
        assert_eq!(
            parsed("BYPASS FROM in11 TO tx6"),
            (report(3, 1), StatusFormat::BypassRoute)
        );
    }

    #[test]
    fn test_bypass_announcement_is_observed_without_route() {
        let line = parse_status_line("Bypass Port 2 enabled").unwrap();
        assert_eq!(line, StatusLine::BypassAnnouncement);
        assert_eq!(line.report(), None);
        assert_eq!(line.format(), StatusFormat::BypassAnnouncement);
    }

    #[test]
    fn test_parse_digit_pair() {
        assert_eq!(parsed("route 13 6"), (report(3, 3), StatusFormat::DigitPair));
        assert_eq!(parsed("5/12"), (report(2, 2), StatusFormat::DigitPair));
    }

    #[test]
    fn test_named_pair_without_to_falls_back_to_digit_pair() {
        assert_eq!(parsed("Rx12 Tx5"), (report(2, 2), StatusFormat::DigitPair));
    }

    #[test]
    fn test_legacy_takes_precedence_over_digit_pair() {
        // Also a valid digit pair (11 → IN1, 5 → OUT2)
        assert_eq!(parsed("s12 11 5"), (report(1, 3), StatusFormat::Legacy));
    }

    #[test]
    fn test_named_pair_takes_precedence_over_bypass() {
        assert_eq!(
            parsed("bypass from Rx13 to Tx4 In11 Out[2/4]"),
            (report(1, 3), StatusFormat::NamedPair)
        );
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert_eq!(parse_status_line(""), Err(ParseError::Empty));
        assert_eq!(parse_status_line(" \r\n"), Err(ParseError::Empty));
        assert!(matches!(
            parse_status_line("hello world"),
            Err(ParseError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_status_line("s"),
            Err(ParseError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_status_line("Rx12 to nowhere"),
            Err(ParseError::Unrecognized(_))
        ));
        assert!(matches!(
            parse_status_line("bypass from nowhere to nothing"),
            Err(ParseError::Unrecognized(_))
        ));
    }

    #[test]
    fn test_to_line_round_trips_through_parser() {
        let r = report(2, 2);
        assert_eq!(r.to_line(StatusFormat::NamedPair).unwrap(), "Rx12 to Tx5");
        assert_eq!(r.to_line(StatusFormat::Legacy).unwrap(), "s21");
        assert_eq!(r.to_line(StatusFormat::BypassAnnouncement), None);

        for format in [
            StatusFormat::Legacy,
            StatusFormat::NamedPair,
            StatusFormat::BypassRoute,
            StatusFormat::DigitPair,
        ] {
            let line = r.to_line(format).unwrap();
            assert_eq!(parsed(&line), (r, format));
        }
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn parser_never_panics(line in "\\PC{0,64}") {
            let _ = parse_status_line(&line);
        }

        #[test]
        fn decoded_routes_stay_in_range(line in "[a-zA-Z0-9 \\[\\]/]{0,40}") {
            if let Ok(StatusLine::Route { report, .. }) = parse_status_line(&line) {
                prop_assert!((1..=PORT_COUNT).contains(&report.output.get()));
                prop_assert!((1..=PORT_COUNT).contains(&report.input.get()));
            }
        }

        #[test]
        fn legacy_lines_decode_to_code_plus_one(output in 1u8..=4, code in 0u8..4) {
            let line = format!("s{}{}", output, code);
            let parsed = parse_status_line(&line).unwrap();
            prop_assert_eq!(parsed.format(), StatusFormat::Legacy);
            let report = parsed.report().unwrap();
            prop_assert_eq!(report.output.get(), output);
            prop_assert_eq!(report.input.get(), code + 1);
        }
    }
}
