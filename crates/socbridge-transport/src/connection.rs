use std::fmt;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socbridge_frame::{ProtocolRevision, RawFrame, Response};
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::traits::{Connector, Link, PortHandle};

/// Default deadline for one response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Responses are timing out; the engine is still retrying.
    Degraded { pending_retries: u32 },
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Degraded { pending_retries } => {
                write!(f, "degraded ({pending_retries} retries pending)")
            }
        }
    }
}

/// Bounded reconnect schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: u32,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            multiplier: 2,
            max_backoff_ms: 2_000,
        }
    }
}

impl ReconnectPolicy {
    /// Waits between consecutive attempts (one fewer than `max_attempts`).
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        let cap = Duration::from_millis(self.max_backoff_ms);
        let mut next = Duration::from_millis(self.initial_backoff_ms).min(cap);
        (1..self.max_attempts)
            .map(|_| {
                let current = next;
                next = next.saturating_mul(self.multiplier.max(1)).min(cap);
                current
            })
            .collect()
    }

    /// Upper bound on the time spent sleeping during one reconnect.
    pub fn total_backoff(&self) -> Duration {
        self.backoff_schedule().iter().sum()
    }
}

/// A controller link together with the state needed to recover it.
///
/// Owns the link state exclusively. The protocol revision is fixed at
/// construction so every response on this link is decoded the same way.
pub struct Connection {
    connector: Box<dyn Connector>,
    link: Option<Box<dyn Link>>,
    port: Option<PortHandle>,
    state: LinkState,
    revision: ProtocolRevision,
    timeout: Duration,
}

impl Connection {
    /// A disconnected connection; call [`Connection::open`] to attach.
    pub fn new(
        connector: impl Connector + 'static,
        revision: ProtocolRevision,
        timeout: Duration,
    ) -> Self {
        Self {
            connector: Box::new(connector),
            link: None,
            port: None,
            state: LinkState::Disconnected,
            revision,
            timeout,
        }
    }

    /// Build and open in one step.
    pub fn establish(
        connector: impl Connector + 'static,
        revision: ProtocolRevision,
        timeout: Duration,
    ) -> Result<Self> {
        let mut conn = Self::new(connector, revision, timeout);
        conn.open()?;
        Ok(conn)
    }

    /// Discover and open the controller once.
    pub fn open(&mut self) -> Result<()> {
        self.drop_link();
        self.state = LinkState::Connecting;
        match self.try_open() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = LinkState::Disconnected;
                Err(err)
            }
        }
    }

    fn try_open(&mut self) -> Result<()> {
        let port = self
            .connector
            .discover()
            .ok_or_else(|| LinkError::NotFound("no matching device".to_string()))?;
        let mut link = self.connector.open(&port)?;
        link.discard_input()?;
        info!(port = %port, transport = link.transport_name(), revision = %self.revision, "controller link up");
        self.link = Some(link);
        self.port = Some(port);
        self.state = LinkState::Connected;
        Ok(())
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            LinkState::Connected | LinkState::Degraded { .. }
        ) && self.link.is_some()
    }

    pub fn revision(&self) -> ProtocolRevision {
        self.revision
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Port of the live link, if any.
    pub fn port(&self) -> Option<&PortHandle> {
        self.port.as_ref()
    }

    pub fn transport_name(&self) -> Option<&'static str> {
        self.link.as_ref().map(|link| link.transport_name())
    }

    /// Run one write/read exchange.
    ///
    /// Returns `Ok(None)` when no response was requested. A timeout leaves the
    /// link in place. Any fatal channel error drops the link, moves the state
    /// to `Disconnected` and is reported as [`LinkError::Lost`].
    pub fn transact(
        &mut self,
        frame: &RawFrame,
        expect_response: bool,
        extra_delay: Duration,
    ) -> Result<Option<Response>> {
        let timeout = self.timeout;
        let link = self.link.as_mut().ok_or(LinkError::Closed)?;

        let outcome = exchange(link.as_mut(), frame, expect_response, extra_delay, timeout);
        match outcome {
            Ok(Some(raw)) => {
                let response = Response::from_frame(raw);
                debug!(?frame, response = %response, "transaction complete");
                Ok(Some(response))
            }
            Ok(None) => Ok(None),
            Err(err) if err.is_fatal() => {
                warn!(error = %err, "controller link lost");
                self.drop_link();
                Err(match err {
                    LinkError::Lost(reason) => LinkError::Lost(reason),
                    other => LinkError::Lost(other.to_string()),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// Record that responses are timing out and retries remain.
    pub fn mark_degraded(&mut self, pending_retries: u32) {
        if self.link.is_some() {
            self.state = LinkState::Degraded { pending_retries };
        }
    }

    /// Record that a transaction completed normally.
    pub fn mark_healthy(&mut self) {
        if self.link.is_some() {
            self.state = LinkState::Connected;
        }
    }

    /// Close any stale handle and rediscover with bounded backoff.
    ///
    /// Gives up after `policy.max_attempts`, returning the last error, so a
    /// physically absent device never blocks indefinitely.
    pub fn reconnect(&mut self, policy: &ReconnectPolicy) -> Result<()> {
        self.drop_link();
        let schedule = policy.backoff_schedule();
        let attempts = policy.max_attempts.max(1);
        let mut last_err = LinkError::NotFound("no reconnect attempt made".to_string());

        for attempt in 1..=attempts {
            self.state = LinkState::Connecting;
            match self.try_open() {
                Ok(()) => {
                    info!(attempt, "reconnected");
                    return Ok(());
                }
                Err(err) => {
                    warn!(attempt, max_attempts = attempts, error = %err, "reconnect attempt failed");
                    last_err = err;
                }
            }
            if let Some(wait) = schedule.get(attempt as usize - 1) {
                thread::sleep(*wait);
            }
        }

        self.state = LinkState::Disconnected;
        Err(last_err)
    }

    /// Close the link. Safe to call more than once.
    pub fn close(&mut self) {
        if self.link.is_some() {
            debug!(port = ?self.port.as_ref().map(ToString::to_string), "closing link");
        }
        self.drop_link();
    }

    fn drop_link(&mut self) {
        self.link = None;
        self.port = None;
        self.state = LinkState::Disconnected;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("port", &self.port)
            .field("state", &self.state)
            .field("revision", &self.revision)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn exchange(
    link: &mut dyn Link,
    frame: &RawFrame,
    expect_response: bool,
    extra_delay: Duration,
    timeout: Duration,
) -> Result<Option<RawFrame>> {
    link.discard_input()?;
    link.write_frame(frame)?;
    if !expect_response {
        return Ok(None);
    }
    let wait = extra_delay + link.settle_delay();
    if !wait.is_zero() {
        thread::sleep(wait);
    }
    link.read_response(timeout).map(Some)
}
