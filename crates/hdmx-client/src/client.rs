//! Caller-facing matrix client

use std::collections::HashMap;
use std::sync::Arc;

use hdmx_protocol::{InputSource, MatrixCommand, OutputPort};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::ClientError;
use crate::probe::{ProbeMethod, ProbeOutcome, ProbeSession, StatusProber};
use crate::state::SharedState;

/// Client for one matrix switch
///
/// All methods take `&self`; share the client behind an `Arc` to use it
/// from several tasks.
pub struct MatrixClient {
    config: ClientConfig,
    state: SharedState,
    connection: Connection,
    probe_lock: AsyncMutex<()>,
}

impl MatrixClient {
    /// Create a disconnected client
    pub fn new(config: ClientConfig) -> Self {
        let state = SharedState::new();
        let connection = Connection::new(state.clone(), &config);
        Self {
            config,
            state,
            connection,
            probe_lock: AsyncMutex::new(()),
        }
    }

    /// Try to open a connection and close it again immediately
    pub async fn check_connection(host: &str, port: u16, config: ClientConfig) -> bool {
        let client = Self::new(config);
        let ok = client.connect(host, port).await.is_ok();
        client.disconnect().await;
        ok
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the switch and start consuming status lines
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), ClientError> {
        self.connection.connect(host, port).await
    }

    /// Disconnect and clear the status cache; safe to call repeatedly
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Register the callback for an output's unsolicited status updates
    ///
    /// The callback receives the zero-based device code of the new input
    /// (`"0"` for `IN1`). A later registration for the same output replaces
    /// the earlier one.
    pub fn register_callback<F>(&self, output: u8, callback: F) -> Result<(), ClientError>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let output = OutputPort::new(output)?;
        self.state.register_callback(output, Arc::new(callback));
        Ok(())
    }

    /// [`register_callback`](Self::register_callback) keyed by the output
    /// number as a string (`"1"` .. `"4"`)
    pub fn register_callback_key<F>(&self, key: &str, callback: F) -> Result<(), ClientError>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let output = OutputPort::from_key(key)?;
        self.state.register_callback(output, Arc::new(callback));
        Ok(())
    }

    /// Route `input` to `output`
    ///
    /// Out-of-range numbers are rejected before anything is sent or cached.
    /// On success the cache is updated immediately, without waiting for the
    /// switch to confirm.
    pub async fn set_input_source(&self, output: u8, input: u8) -> Result<(), ClientError> {
        let output = OutputPort::new(output)?;
        let input = InputSource::new(input)?;

        self.connection
            .send(&MatrixCommand::route(output, input))
            .await?;
        self.state.set_cached(output, input);
        info!("Set {} to {}", output, input);

        tokio::time::sleep(self.config.set_settle()).await;
        Ok(())
    }

    /// Send any command from the command table
    ///
    /// Unlike [`set_input_source`](Self::set_input_source) this does not touch
    /// the cache; the switch's status line will.
    pub async fn send_command(&self, command: MatrixCommand) -> Result<(), ClientError> {
        self.connection.send(&command).await
    }

    /// Cached input of an output, without any I/O
    pub fn cached_status(&self, output: u8) -> Option<InputSource> {
        OutputPort::new(output)
            .ok()
            .and_then(|output| self.state.cached(output))
    }

    /// Copy of every cached route
    pub fn status_snapshot(&self) -> HashMap<OutputPort, InputSource> {
        self.state.snapshot()
    }

    /// Current input of `output`, probing the switch when nothing is cached
    ///
    /// A probe's answer is inferred, not read back, and when the switch stays
    /// silent this returns the degraded default `IN1`. Returns `None` when
    /// disconnected or the output is out of range.
    ///
    /// With [`ProbeStrategy::Symmetric`](crate::ProbeStrategy::Symmetric) the
    /// answer returned and cached is the input announced after the decrease
    /// nudge, one input lower (wrapping) than what the output shows once the
    /// increase nudge restores it. Use
    /// [`ProbeStrategy::IncreaseOnly`](crate::ProbeStrategy::IncreaseOnly) for
    /// an exact answer.
    pub async fn get_current_status(&self, output: u8) -> Option<InputSource> {
        self.current_status(output, true).await
    }

    /// Like [`get_current_status`](Self::get_current_status) but returns
    /// `None` instead of the degraded default
    pub async fn get_current_status_safe(&self, output: u8) -> Option<InputSource> {
        self.current_status(output, false).await
    }

    async fn current_status(&self, output: u8, allow_default: bool) -> Option<InputSource> {
        let output = match OutputPort::new(output) {
            Ok(output) => output,
            Err(e) => {
                warn!("Status requested for {}", e);
                return None;
            }
        };
        if !self.is_connected() {
            debug!("Not connected, no status for {}", output);
            return None;
        }
        if let Some(input) = self.state.cached(output) {
            return Some(input);
        }

        self.probe_status(output, allow_default)
            .await
            .map(|outcome| outcome.input)
    }

    /// Run a probe for `output`, waiting for any probe already in flight
    ///
    /// If the waited-for probe (or a status line) filled the cache for
    /// `output` in the meantime, that value is returned without probing.
    pub async fn probe_status(
        &self,
        output: OutputPort,
        allow_default: bool,
    ) -> Option<ProbeOutcome> {
        let lock = self.probe_lock.lock().await;
        if !self.is_connected() {
            return None;
        }
        if let Some(input) = self.state.cached(output) {
            debug!("{} resolved while waiting to probe", output);
            return Some(ProbeOutcome {
                input,
                method: ProbeMethod::Cached,
            });
        }

        let mut session = ProbeSession::begin(lock, &self.state);
        StatusProber::new(&self.connection, &self.state, &self.config)
            .probe(&mut session, output, allow_default)
            .await
    }

    /// Determine the input of every output, one after another
    ///
    /// Useful right after connecting, when nothing is cached yet.
    pub async fn refresh_all(&self) -> HashMap<OutputPort, InputSource> {
        info!("Initializing status of all outputs");
        for output in OutputPort::all() {
            if !self.is_connected() {
                break;
            }
            let _ = self.get_current_status(output.get()).await;
        }
        self.status_snapshot()
    }
}

impl std::fmt::Debug for MatrixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixClient")
            .field("connected", &self.is_connected())
            .field("state", &self.state)
            .finish()
    }
}
