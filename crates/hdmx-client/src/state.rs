//! Shared client state
//!
//! The status cache, the per-output callback table and the read-loop routing
//! mode live behind one lightweight mutex. The read loop is the only writer
//! of decoded facts; caller-facing methods read the cache and update it
//! optimistically after successful writes. Callbacks are always invoked after
//! the lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hdmx_protocol::{parse_status_line, InputSource, OutputPort, RouteReport, StatusLine};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Callback invoked with the zero-based device code of the new input
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Where the read loop sends decoded lines
#[derive(Debug, Default)]
pub(crate) enum ReadMode {
    /// Lines go to the status parser
    #[default]
    Idle,
    /// Lines go to the pending probe's queue
    Probing(mpsc::UnboundedSender<String>),
}

#[derive(Default)]
struct MatrixState {
    cache: HashMap<OutputPort, InputSource>,
    callbacks: HashMap<OutputPort, StatusCallback>,
    mode: ReadMode,
}

/// Handle to the state shared between the read loop and the client
#[derive(Clone, Default)]
pub struct SharedState {
    inner: Arc<Mutex<MatrixState>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MatrixState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached input for an output, if known
    pub fn cached(&self, output: OutputPort) -> Option<InputSource> {
        self.lock().cache.get(&output).copied()
    }

    /// Copy of the whole cache
    pub fn snapshot(&self) -> HashMap<OutputPort, InputSource> {
        self.lock().cache.clone()
    }

    /// Record an input without notifying callbacks
    pub fn set_cached(&self, output: OutputPort, input: InputSource) {
        self.lock().cache.insert(output, input);
    }

    /// Forget the cached input for one output
    pub fn invalidate(&self, output: OutputPort) {
        self.lock().cache.remove(&output);
    }

    /// Forget every cached input
    pub fn clear_cache(&self) {
        self.lock().cache.clear();
    }

    /// Register the callback for an output, replacing any previous one
    pub fn register_callback(&self, output: OutputPort, callback: StatusCallback) {
        if self.lock().callbacks.insert(output, callback).is_some() {
            debug!("Replaced status callback for {}", output);
        }
    }

    /// Record a decoded route and notify the output's callback
    pub fn apply_report(&self, report: RouteReport) {
        let callback = {
            let mut state = self.lock();
            state.cache.insert(report.output, report.input);
            state.callbacks.get(&report.output).cloned()
        };

        debug!("Status update: {} -> {}", report.output, report.input);
        if let Some(callback) = callback {
            callback(&report.device_code());
        }
    }

    /// Parse an unsolicited line and apply any route it carries
    ///
    /// Unrecognized lines are logged and dropped; they never touch the cache.
    pub fn handle_status_line(&self, line: &str) -> Option<RouteReport> {
        match parse_status_line(line) {
            Ok(StatusLine::Route { report, format }) => {
                trace!("Matched {} status line: {}", format.name(), line);
                self.apply_report(report);
                Some(report)
            }
            Ok(StatusLine::BypassAnnouncement) => {
                info!("Bypass port announcement: {}", line);
                None
            }
            Err(e) => {
                debug!("Discarding status line: {}", e);
                None
            }
        }
    }

    /// Route one line from the read loop
    pub(crate) fn dispatch_line(&self, line: &str) {
        {
            let mut state = self.lock();
            if let ReadMode::Probing(queue) = &state.mode {
                if queue.send(line.to_string()).is_ok() {
                    return;
                }
                // Probe went away without cleaning up
                state.mode = ReadMode::Idle;
            }
        }
        self.handle_status_line(line);
    }

    /// Switch the read loop to probe routing, returning the queue to read from
    pub(crate) fn begin_probing(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().mode = ReadMode::Probing(tx);
        rx
    }

    /// Switch the read loop back to the status parser
    ///
    /// Dropping the probe queue's sender wakes any probe still waiting on it.
    pub(crate) fn end_probing(&self) {
        self.lock().mode = ReadMode::Idle;
    }

    #[cfg(test)]
    pub(crate) fn is_probing(&self) -> bool {
        matches!(self.lock().mode, ReadMode::Probing(_))
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SharedState")
            .field("cache", &state.cache)
            .field("callbacks", &state.callbacks.keys().collect::<Vec<_>>())
            .field("mode", &state.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn out(n: u8) -> OutputPort {
        OutputPort::new(n).unwrap()
    }

    fn recorder(state: &SharedState, output: u8) -> Arc<StdMutex<Vec<String>>> {
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        state.register_callback(
            out(output),
            Arc::new(move |code: &str| sink.lock().unwrap().push(code.to_string())),
        );
        calls
    }

    #[test]
    fn test_status_line_updates_cache_and_callback() {
        let state = SharedState::new();
        let calls = recorder(&state, 2);

        state.handle_status_line("Rx13 to Tx5");

        assert_eq!(state.cached(out(2)), InputSource::new(3).ok());
        assert_eq!(*calls.lock().unwrap(), vec!["2".to_string()]);
    }

    #[test]
    fn test_same_line_twice_is_idempotent() {
        let state = SharedState::new();
        let calls = recorder(&state, 1);

        state.handle_status_line("s12");
        state.handle_status_line("s12");

        assert_eq!(state.cached(out(1)), InputSource::new(3).ok());
        assert_eq!(*calls.lock().unwrap(), vec!["2".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_garbage_never_mutates() {
        let state = SharedState::new();
        let calls = recorder(&state, 1);

        for line in ["hello world", "", "s19", "bypass port 1", "Rx12 to Tx9"] {
            assert!(state.handle_status_line(line).is_none());
        }

        assert!(state.snapshot().is_empty());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_last_callback_registration_wins() {
        let state = SharedState::new();
        let first = recorder(&state, 3);
        let second = recorder(&state, 3);

        state.handle_status_line("s30");

        assert!(first.lock().unwrap().is_empty());
        assert_eq!(*second.lock().unwrap(), vec!["0".to_string()]);
    }

    #[test]
    fn test_probe_mode_routes_lines_to_queue() {
        let state = SharedState::new();
        let mut queue = state.begin_probing();
        assert!(state.is_probing());

        state.dispatch_line("s21");
        assert_eq!(queue.try_recv().unwrap(), "s21");
        assert_eq!(state.cached(out(2)), None);

        state.end_probing();
        assert!(!state.is_probing());
        state.dispatch_line("s21");
        assert_eq!(state.cached(out(2)), InputSource::new(2).ok());
    }

    #[test]
    fn test_dropped_probe_queue_falls_back_to_parser() {
        let state = SharedState::new();
        drop(state.begin_probing());

        state.dispatch_line("s43");
        assert_eq!(state.cached(out(4)), InputSource::new(4).ok());
        assert!(!state.is_probing());
    }
}

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use hdmx_protocol::StatusFormat;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn route_lines_in_any_format_land_in_cache(
            o in 1u8..=4,
            i in 1u8..=4,
            format in prop::sample::select(vec![
                StatusFormat::Legacy,
                StatusFormat::NamedPair,
                StatusFormat::BypassRoute,
                StatusFormat::DigitPair,
            ]),
        ) {
            let state = SharedState::new();
            let report = RouteReport::new(OutputPort::new(o).unwrap(), InputSource::new(i).unwrap());
            let line = report.to_line(format).unwrap();

            prop_assert_eq!(state.handle_status_line(&line), Some(report));
            prop_assert_eq!(state.cached(report.output), Some(report.input));
            prop_assert_eq!(state.snapshot().len(), 1);
        }

        #[test]
        fn arbitrary_text_never_panics(line in ".{0,40}") {
            let state = SharedState::new();
            let _ = state.handle_status_line(&line);
            prop_assert!(state.snapshot().len() <= 1);
        }
    }
}
