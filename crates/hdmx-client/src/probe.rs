//! Status probing
//!
//! The switch cannot be asked what an output is showing. A probe instead
//! nudges the output's selector, reads the status line the switch
//! broadcasts in response, and puts the selector back:
//!
//! - [`ProbeStrategy::Symmetric`]: decrease, observe `V`, increase, report `V`
//! - [`ProbeStrategy::IncreaseOnly`]: increase, observe `X`, route `X - 1`
//!   back explicitly, report `X - 1`
//!
//! When the nudge draws no answer the prober sends the output's `IN1` route
//! as a direct query. When that also draws nothing the result is the
//! degraded default `IN1`, which callers may refuse.
//!
//! While a probe runs, the read loop delivers every line to the probe's
//! queue instead of the status parser. Only one probe may run at a time;
//! [`ProbeSession`] holds the probe lock for its whole lifetime and restores
//! normal routing when dropped.

use hdmx_protocol::{parse_status_line, InputSource, MatrixCommand, Nudge, OutputPort};
use tokio::sync::{mpsc, MutexGuard};
use tokio::time::{timeout_at, Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::{ClientConfig, ProbeStrategy};
use crate::connection::Connection;
use crate::error::ClientError;
use crate::state::SharedState;

/// How a probe arrived at its answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    /// Observed directly after a decrease nudge (symmetric strategy)
    Nudge,
    /// Derived from an increase nudge and routed back explicitly
    Restored,
    /// Observed after the direct `IN1` query
    DirectQuery,
    /// Nothing was observed; `IN1` is a guess
    DegradedDefault,
    /// Already cached when the probe lock was acquired
    Cached,
}

/// Result of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub input: InputSource,
    pub method: ProbeMethod,
}

impl ProbeOutcome {
    /// Whether the answer is a guess rather than something the switch said
    pub fn is_degraded(&self) -> bool {
        self.method == ProbeMethod::DegradedDefault
    }
}

/// Exclusive right to read the probe queue
pub(crate) struct ProbeSession<'a> {
    _lock: MutexGuard<'a, ()>,
    state: &'a SharedState,
    responses: mpsc::UnboundedReceiver<String>,
}

impl<'a> ProbeSession<'a> {
    /// Switch the read loop to probe routing; `lock` must be the client's probe lock
    pub(crate) fn begin(lock: MutexGuard<'a, ()>, state: &'a SharedState) -> Self {
        let responses = state.begin_probing();
        Self {
            _lock: lock,
            state,
            responses,
        }
    }

    /// Wait for the first status line about `output`
    ///
    /// Lines about other outputs are applied to the shared state as if the
    /// parser had seen them. Returns `None` on timeout or when the connection
    /// goes away.
    async fn wait_for(&mut self, output: OutputPort, wait: Duration) -> Option<InputSource> {
        let deadline = Instant::now() + wait;
        loop {
            let line = match timeout_at(deadline, self.responses.recv()).await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Probe queue closed while waiting for {}", output);
                    return None;
                }
                Err(_) => {
                    trace!("Timed out waiting for status of {}", output);
                    return None;
                }
            };

            match parse_status_line(&line).map(|status| status.report()) {
                Ok(Some(report)) if report.output == output => return Some(report.input),
                Ok(Some(report)) => self.state.apply_report(report),
                Ok(None) => trace!("Probe ignoring {:?}", line),
                Err(e) => debug!("Probe discarding line: {}", e),
            }
        }
    }
}

impl Drop for ProbeSession<'_> {
    fn drop(&mut self) {
        self.state.end_probing();
    }
}

/// Runs the probe strategies against one connection
pub(crate) struct StatusProber<'a> {
    connection: &'a Connection,
    state: &'a SharedState,
    config: &'a ClientConfig,
}

impl<'a> StatusProber<'a> {
    pub(crate) fn new(
        connection: &'a Connection,
        state: &'a SharedState,
        config: &'a ClientConfig,
    ) -> Self {
        Self {
            connection,
            state,
            config,
        }
    }

    /// Infer the current input of `output`
    ///
    /// With `allow_default` false the degraded default is never returned nor
    /// cached. Any answer that is returned is also cached.
    pub(crate) async fn probe(
        &self,
        session: &mut ProbeSession<'_>,
        output: OutputPort,
        allow_default: bool,
    ) -> Option<ProbeOutcome> {
        self.state.invalidate(output);
        info!(
            "Probing {} ({:?} strategy)",
            output,
            self.config.strategy_for(output)
        );

        let result = match self.config.strategy_for(output) {
            ProbeStrategy::Symmetric => self.probe_symmetric(session, output).await,
            ProbeStrategy::IncreaseOnly => self.probe_increase_only(session, output).await,
        };
        let result = match result {
            Ok(None) => self.probe_fallback(session, output, allow_default).await,
            other => other,
        };

        match result {
            Ok(Some(outcome)) => {
                self.state.set_cached(output, outcome.input);
                info!(
                    "{} is showing {} ({:?})",
                    output, outcome.input, outcome.method
                );
                Some(outcome)
            }
            Ok(None) => {
                warn!("Could not determine the input of {}", output);
                None
            }
            Err(e) => {
                warn!("Probe of {} aborted: {}", output, e);
                None
            }
        }
    }

    async fn nudge_and_observe(
        &self,
        session: &mut ProbeSession<'_>,
        output: OutputPort,
        direction: Nudge,
    ) -> Result<Option<InputSource>, ClientError> {
        self.connection
            .send(&MatrixCommand::nudge(output, direction))
            .await?;
        tokio::time::sleep(self.config.probe_settle()).await;
        Ok(session.wait_for(output, self.config.probe_timeout()).await)
    }

    async fn probe_symmetric(
        &self,
        session: &mut ProbeSession<'_>,
        output: OutputPort,
    ) -> Result<Option<ProbeOutcome>, ClientError> {
        let Some(observed) = self
            .nudge_and_observe(session, output, Nudge::Decrease)
            .await?
        else {
            return Ok(None);
        };
        debug!("{} reported {} after decrease", output, observed);

        self.connection
            .send(&MatrixCommand::nudge(output, Nudge::Increase))
            .await?;
        if session
            .wait_for(output, self.config.restore_timeout())
            .await
            .is_none()
        {
            debug!("No confirmation of restoring increase on {}", output);
        }

        Ok(Some(ProbeOutcome {
            input: observed,
            method: ProbeMethod::Nudge,
        }))
    }

    async fn probe_increase_only(
        &self,
        session: &mut ProbeSession<'_>,
        output: OutputPort,
    ) -> Result<Option<ProbeOutcome>, ClientError> {
        let Some(observed) = self
            .nudge_and_observe(session, output, Nudge::Increase)
            .await?
        else {
            return Ok(None);
        };
        let original = observed.previous();
        debug!(
            "{} reported {} after increase, restoring {}",
            output, observed, original
        );

        self.connection
            .send(&MatrixCommand::route(output, original))
            .await?;
        if session
            .wait_for(output, self.config.restore_timeout())
            .await
            .is_none()
        {
            debug!("No confirmation of restoring route on {}", output);
        }

        Ok(Some(ProbeOutcome {
            input: original,
            method: ProbeMethod::Restored,
        }))
    }

    async fn probe_fallback(
        &self,
        session: &mut ProbeSession<'_>,
        output: OutputPort,
        allow_default: bool,
    ) -> Result<Option<ProbeOutcome>, ClientError> {
        warn!("No status from {} after nudging, sending direct query", output);
        self.connection
            .send(&MatrixCommand::route(output, InputSource::FIRST))
            .await?;

        if let Some(input) = session
            .wait_for(output, self.config.fallback_timeout())
            .await
        {
            return Ok(Some(ProbeOutcome {
                input,
                method: ProbeMethod::DirectQuery,
            }));
        }

        if !allow_default || !self.connection.is_connected() {
            return Ok(None);
        }

        warn!(
            "No status from {}, assuming degraded default {}",
            output,
            InputSource::FIRST
        );
        Ok(Some(ProbeOutcome {
            input: InputSource::FIRST,
            method: ProbeMethod::DegradedDefault,
        }))
    }
}
