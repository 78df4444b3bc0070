use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use socbridge_frame::{Command, Response, RESET, RESET_OPCODE};
use socbridge_transport::{Connection, LinkState};
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::diagnostics::{Diagnostic, DiagnosticsSink, TracingSink};
use crate::discovery;
use crate::engine::{Delivery, Engine};
use crate::error::{CapabilityError, Result};
use crate::topology::Topology;

/// One connected controller.
///
/// Owns the transaction engine, the discovered topology and the set of
/// registers claimed by peripheral handles. Handles borrow the session, so
/// several boards can be driven from one process by opening several
/// sessions.
///
/// Clock dividers recorded in the topology are shared: changing one through
/// any PWM handle changes the output frequency of every channel on that
/// clock. Each such change is reported as
/// [`Diagnostic::SharedClockChanged`].
pub struct ControllerSession {
    engine: Engine,
    topology: Mutex<Option<Topology>>,
    registers: Mutex<HashSet<u8>>,
    config: SessionConfig,
}

impl ControllerSession {
    /// Open the configured transport and discover the controller.
    pub fn connect(config: SessionConfig) -> Result<Self> {
        Self::connect_with_sink(config, Arc::new(TracingSink))
    }

    pub fn connect_with_sink(
        config: SessionConfig,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Result<Self> {
        let conn = Connection::establish(
            config.transport.clone(),
            config.revision,
            config.response_timeout(),
        )?;
        Self::from_connection(conn, config, diagnostics)
    }

    /// Wrap an already open connection.
    ///
    /// The transport in `config` is ignored; every other setting applies.
    pub fn from_connection(
        conn: Connection,
        config: SessionConfig,
        diagnostics: Arc<dyn DiagnosticsSink>,
    ) -> Result<Self> {
        let session = Self {
            engine: Engine::new(conn, config.retry, diagnostics),
            topology: Mutex::new(None),
            registers: Mutex::new(HashSet::new()),
            config,
        };
        if session.config.discover_on_connect {
            session.rediscover()?;
        }
        Ok(session)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn link_state(&self) -> LinkState {
        self.engine.link_state()
    }

    pub fn diagnostics(&self) -> &Arc<dyn DiagnosticsSink> {
        self.engine.diagnostics()
    }

    pub fn report(&self, diagnostic: Diagnostic) {
        self.engine.report(diagnostic);
    }

    /// Snapshot of the discovered topology.
    pub fn topology(&self) -> Result<Topology> {
        self.with_topology(Topology::clone)
    }

    /// Run `f` against the discovered topology without cloning it.
    pub fn with_topology<R>(&self, f: impl FnOnce(&Topology) -> R) -> Result<R> {
        let guard = self.topology_lock();
        let topology = guard.as_ref().ok_or(CapabilityError::NotDiscovered)?;
        Ok(f(topology))
    }

    /// Throw away the current topology and run discovery again.
    pub fn rediscover(&self) -> Result<Topology> {
        *self.topology_lock() = None;
        let topology = discovery::discover(&self.engine)?;
        *self.topology_lock() = Some(topology.clone());
        Ok(topology)
    }

    /// Recover a lost link.
    ///
    /// Reopens the transport with the configured bounded backoff, then
    /// rediscovers: the firmware behind the new link may differ, so the old
    /// topology is never reused.
    pub fn reconnect(&self) -> Result<()> {
        *self.topology_lock() = None;
        let policy = self.config.reconnect.clone();
        self.engine.with_connection(|conn| conn.reconnect(&policy))?;
        if self.config.discover_on_connect {
            self.rediscover()?;
        }
        Ok(())
    }

    /// Reset every controller output and close the link.
    ///
    /// Registrations and topology are cleared even if the reset could not be
    /// sent. Safe to call more than once.
    pub fn disconnect(&self) -> Result<()> {
        let reset = if self.engine.with_connection(|conn| conn.is_connected()) {
            self.engine.fire(&Command::new(RESET, RESET_OPCODE))
        } else {
            Ok(())
        };
        if let Err(err) = &reset {
            warn!(error = %err, "reset before disconnect failed");
        }
        self.registers_lock().clear();
        *self.topology_lock() = None;
        self.engine.with_connection(Connection::close);
        info!("controller session closed");
        reset
    }

    /// Record that a handle uses `register`.
    ///
    /// Returns false, and reports [`Diagnostic::DuplicateRegister`], when the
    /// register was already claimed. The claim is advisory; nothing stops two
    /// handles from driving the same register.
    pub fn claim_register(&self, register: u8) -> bool {
        let fresh = self.registers_lock().insert(register);
        if !fresh {
            self.report(Diagnostic::DuplicateRegister { register });
        }
        fresh
    }

    pub fn release_register(&self, register: u8) {
        self.registers_lock().remove(&register);
    }

    pub fn claimed_registers(&self) -> Vec<u8> {
        let mut registers: Vec<u8> = self.registers_lock().iter().copied().collect();
        registers.sort_unstable();
        registers
    }

    /// Record a new divider for a shared clock.
    ///
    /// Returns the previous divider. Every channel on the clock is listed in
    /// the [`Diagnostic::SharedClockChanged`] report.
    pub fn update_clock_divider(&self, clock: u8, divider: u32) -> Result<u32> {
        let (old, affected) = {
            let mut guard = self.topology_lock();
            let topology = guard.as_mut().ok_or(CapabilityError::NotDiscovered)?;
            let old = topology
                .set_clock_divider(clock, divider)
                .ok_or_else(|| CapabilityError::NotPresent {
                    what: format!("clock {clock}"),
                })?;
            let affected = topology.clock(clock).map(|c| c.channels()).unwrap_or_default();
            (old, affected)
        };
        if old != divider {
            self.report(Diagnostic::SharedClockChanged {
                clock,
                old_divider: old,
                new_divider: divider,
                affected_channels: affected,
            });
        }
        Ok(old)
    }

    pub fn send(&self, command: &Command) -> Result<Delivery> {
        self.engine.send(command)
    }

    pub fn query(&self, command: &Command) -> Result<i64> {
        self.engine.query(command)
    }

    pub fn query_response(&self, command: &Command) -> Result<Response> {
        self.engine.query_response(command)
    }

    fn topology_lock(&self) -> MutexGuard<'_, Option<Topology>> {
        self.topology.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registers_lock(&self) -> MutexGuard<'_, HashSet<u8>> {
        self.registers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ControllerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerSession")
            .field("engine", &self.engine)
            .field("link_state", &self.link_state())
            .field("claimed_registers", &self.claimed_registers())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use socbridge_frame::{ProtocolRevision, STATUS_ACCEPTED};
    use socbridge_transport::mock::{MockController, MockReply};
    use socbridge_transport::DEFAULT_RESPONSE_TIMEOUT;

    use super::*;
    use crate::diagnostics::RecordingSink;

    fn offline_session(controller: &MockController) -> (ControllerSession, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let conn = Connection::establish(
            controller.connector(),
            ProtocolRevision::default(),
            DEFAULT_RESPONSE_TIMEOUT,
        )
        .unwrap();
        let config = SessionConfig {
            discover_on_connect: false,
            ..SessionConfig::default()
        };
        let session = ControllerSession::from_connection(conn, config, sink.clone()).unwrap();
        (session, sink)
    }

    #[test]
    fn topology_before_discovery_is_an_error() {
        let controller = MockController::accepting();
        let (session, _) = offline_session(&controller);
        let err = session.topology().unwrap_err();
        assert!(err.to_string().contains("discovery has not run"), "{err}");
    }

    #[test]
    fn duplicate_claim_is_advisory() {
        let controller = MockController::accepting();
        let (session, sink) = offline_session(&controller);
        assert!(session.claim_register(0x09));
        assert!(!session.claim_register(0x09));
        assert_eq!(session.claimed_registers(), vec![0x09]);
        assert!(sink.any(|d| matches!(d, Diagnostic::DuplicateRegister { register: 0x09 })));
        session.release_register(0x09);
        assert!(session.claim_register(0x09));
    }

    #[test]
    fn discovery_fails_on_bad_parameter() {
        let controller = MockController::new(|_| MockReply::Word(0xFBAD_0080));
        let (session, _) = offline_session(&controller);
        let err = session.rediscover().unwrap_err();
        assert!(err.to_string().contains("bad parameter"), "{err}");
        assert!(session.topology().is_err());
    }

    #[test]
    fn disconnect_resets_and_closes() {
        let controller = MockController::new(|_| MockReply::Word(STATUS_ACCEPTED));
        let (session, _) = offline_session(&controller);
        session.claim_register(0x0A);

        session.disconnect().unwrap();
        assert_eq!(controller.frames(), vec![[0xFF, 0xFF, 0x00, 0x00]]);
        assert!(session.claimed_registers().is_empty());
        assert_eq!(session.link_state(), LinkState::Disconnected);

        // Second call finds no link and sends nothing.
        session.disconnect().unwrap();
        assert_eq!(controller.frames().len(), 1);
    }
}
