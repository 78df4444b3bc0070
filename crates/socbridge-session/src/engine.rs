use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use socbridge_frame::{Command, ProtocolRevision, Response, STATUS_BAD_PARAMETER};
use socbridge_transport::{Connection, LinkError, LinkState};
use tracing::debug;

use crate::diagnostics::{Diagnostic, DiagnosticsSink};
use crate::error::{ProtocolError, Result};

/// How many times a failed transaction is sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra transmissions after the first. Two means three in total.
    pub extra_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { extra_attempts: 2 }
    }
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.extra_attempts.saturating_add(1)
    }
}

/// Outcome of a best-effort write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The controller acknowledged the write.
    Accepted { attempts: u32 },
    /// Every attempt failed; the write was given up on.
    Dropped { attempts: u32, reason: ProtocolError },
}

impl Delivery {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Accepted { attempts } | Self::Dropped { attempts, .. } => *attempts,
        }
    }
}

/// Drives one transaction at a time over a [`Connection`].
///
/// Every call holds the transaction lock for its whole exchange, retries
/// included, so calls from several threads never interleave on the wire.
pub struct Engine {
    conn: Mutex<Connection>,
    retry: RetryPolicy,
    revision: ProtocolRevision,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl Engine {
    pub fn new(conn: Connection, retry: RetryPolicy, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            revision: conn.revision(),
            conn: Mutex::new(conn),
            retry,
            diagnostics,
        }
    }

    pub fn revision(&self) -> ProtocolRevision {
        self.revision
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn link_state(&self) -> LinkState {
        self.lock().state()
    }

    pub(crate) fn diagnostics(&self) -> &Arc<dyn DiagnosticsSink> {
        &self.diagnostics
    }

    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        self.diagnostics.report(diagnostic);
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut Connection) -> R) -> R {
        f(&mut self.lock())
    }

    /// Best-effort write.
    ///
    /// Anything other than the accepted status (bad parameter, rejection,
    /// timeout) is retried up to the retry bound and then dropped with a
    /// diagnostic. Only a lost or closed link is an error.
    pub fn send(&self, command: &Command) -> Result<Delivery> {
        self.note_clamped(command);
        let frame = command.to_frame();
        let total = self.retry.total_attempts();
        let mut conn = self.lock();
        let mut reason = ProtocolError::NoResponse {
            register: command.register,
            opcode: command.opcode,
        };

        for attempt in 1..=total {
            match conn.transact(&frame, true, Duration::ZERO) {
                Ok(Some(response)) if response.is_accepted() => {
                    conn.mark_healthy();
                    return Ok(Delivery::Accepted { attempts: attempt });
                }
                Ok(Some(response)) => {
                    conn.mark_healthy();
                    reason = write_failure(command, response);
                }
                Ok(None) => {}
                Err(LinkError::Timeout(_)) => {
                    conn.mark_degraded(total - attempt);
                    reason = ProtocolError::NoResponse {
                        register: command.register,
                        opcode: command.opcode,
                    };
                }
                Err(LinkError::Rejected) => {
                    reason = ProtocolError::Rejected {
                        register: command.register,
                        opcode: command.opcode,
                    };
                }
                Err(err) => return Err(err.into()),
            }

            if attempt < total {
                self.report(Diagnostic::WriteRetried {
                    command: *command,
                    attempt,
                    reason: reason.clone(),
                });
            }
        }

        self.report(Diagnostic::WriteDropped {
            command: *command,
            attempts: total,
            reason: reason.clone(),
        });
        Ok(Delivery::Dropped {
            attempts: total,
            reason,
        })
    }

    /// Read a value, decoded under the link's protocol revision.
    pub fn query(&self, command: &Command) -> Result<i64> {
        Ok(self.query_response(command)?.value(self.revision))
    }

    /// Like [`Engine::query`], waiting `extra_delay` before reading.
    pub fn query_with_delay(&self, command: &Command, extra_delay: Duration) -> Result<i64> {
        Ok(self
            .exchange_read(command, extra_delay)?
            .value(self.revision))
    }

    /// Read the raw response word.
    ///
    /// A bad-parameter answer is reported and returned as is. Timeouts are
    /// retried; when every attempt times out the bad-parameter sentinel is
    /// returned in place of a value.
    pub fn query_response(&self, command: &Command) -> Result<Response> {
        self.exchange_read(command, Duration::ZERO)
    }

    /// Write without waiting for any response.
    pub fn fire(&self, command: &Command) -> Result<()> {
        self.note_clamped(command);
        self.lock()
            .transact(&command.to_frame(), false, Duration::ZERO)?;
        Ok(())
    }

    fn exchange_read(&self, command: &Command, extra_delay: Duration) -> Result<Response> {
        self.note_clamped(command);
        let frame = command.to_frame();
        let total = self.retry.total_attempts();
        let mut conn = self.lock();

        for attempt in 1..=total {
            match conn.transact(&frame, true, extra_delay) {
                Ok(Some(response)) => {
                    conn.mark_healthy();
                    if response.is_bad_parameter() {
                        self.report(Diagnostic::BadParameter { command: *command });
                    }
                    return Ok(response);
                }
                Ok(None) => {}
                Err(LinkError::Timeout(_)) | Err(LinkError::Rejected) => {
                    conn.mark_degraded(total - attempt);
                    debug!(%command, attempt, "read attempt failed");
                }
                Err(err) => return Err(err.into()),
            }
        }

        self.report(Diagnostic::ReadTimedOut {
            command: *command,
            attempts: total,
        });
        Ok(Response::from_raw(STATUS_BAD_PARAMETER))
    }

    fn note_clamped(&self, command: &Command) {
        if command.was_clamped() {
            self.report(Diagnostic::PayloadClamped { command: *command });
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("retry", &self.retry)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

fn write_failure(command: &Command, response: Response) -> ProtocolError {
    if response.is_bad_parameter() {
        ProtocolError::BadParameter {
            register: command.register,
            opcode: command.opcode,
        }
    } else {
        ProtocolError::UnexpectedReply {
            register: command.register,
            opcode: command.opcode,
            raw: response.raw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    use socbridge_frame::STATUS_ACCEPTED;
    use socbridge_transport::mock::{MockController, MockReply};
    use socbridge_transport::DEFAULT_RESPONSE_TIMEOUT;

    use super::*;
    use crate::diagnostics::RecordingSink;

    fn engine_for(controller: &MockController) -> (Engine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let conn = Connection::establish(
            controller.connector(),
            ProtocolRevision::default(),
            DEFAULT_RESPONSE_TIMEOUT,
        )
        .expect("mock should connect");
        (
            Engine::new(conn, RetryPolicy::default(), sink.clone()),
            sink,
        )
    }

    #[test]
    fn accepted_write_is_sent_once() {
        let controller = MockController::accepting();
        let (engine, sink) = engine_for(&controller);

        let delivery = engine.send(&Command::new(0x09, 0x00)).unwrap();
        assert_eq!(delivery, Delivery::Accepted { attempts: 1 });
        assert_eq!(controller.frames().len(), 1);
        assert!(sink.snapshot().is_empty());
    }

    #[test]
    fn bad_parameter_write_is_retried_then_dropped() {
        let controller = MockController::new(|_| MockReply::Word(STATUS_BAD_PARAMETER));
        let (engine, sink) = engine_for(&controller);

        let delivery = engine.send(&Command::new(0x09, 0x0C).with_payload(7)).unwrap();
        assert_eq!(
            delivery,
            Delivery::Dropped {
                attempts: 3,
                reason: ProtocolError::BadParameter {
                    register: 0x09,
                    opcode: 0x0C
                }
            }
        );
        assert_eq!(controller.frames().len(), 3);
        let diags = sink.snapshot();
        assert_eq!(diags.len(), 3);
        assert!(matches!(diags[2], Diagnostic::WriteDropped { attempts: 3, .. }));
    }

    #[test]
    fn write_recovers_on_second_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let controller = MockController::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                MockReply::Silence
            } else {
                MockReply::Word(STATUS_ACCEPTED)
            }
        });
        let (engine, _sink) = engine_for(&controller);

        let delivery = engine.send(&Command::new(0x16, 0x01)).unwrap();
        assert_eq!(delivery, Delivery::Accepted { attempts: 2 });
        assert_eq!(engine.link_state(), LinkState::Connected);
    }

    #[test]
    fn read_returns_bad_parameter_sentinel_without_retry() {
        let controller = MockController::new(|_| MockReply::Word(STATUS_BAD_PARAMETER));
        let (engine, sink) = engine_for(&controller);

        let value = engine.query(&Command::new(0x09, 0x0D)).unwrap();
        assert_eq!(value, ProtocolRevision::default().bad_parameter_value());
        assert_eq!(controller.frames().len(), 1);
        assert!(sink.any(|d| matches!(d, Diagnostic::BadParameter { .. })));
    }

    #[test]
    fn read_timeouts_fall_back_to_sentinel() {
        let controller = MockController::new(|_| MockReply::Silence);
        let (engine, sink) = engine_for(&controller);

        let response = engine.query_response(&Command::new(0xFE, 0x09)).unwrap();
        assert!(response.is_bad_parameter());
        assert_eq!(controller.frames().len(), 3);
        assert_eq!(engine.link_state(), LinkState::Degraded { pending_retries: 0 });
        assert!(sink.any(|d| matches!(d, Diagnostic::ReadTimedOut { attempts: 3, .. })));
    }

    #[test]
    fn negative_values_decode_through_revision() {
        let controller = MockController::new(|_| MockReply::Word(0xFFFF_FFFE));
        let (engine, _sink) = engine_for(&controller);
        assert_eq!(engine.query(&Command::new(0x17, 0x00)).unwrap(), -1);
    }

    #[test]
    fn lost_link_is_an_error() {
        let controller = MockController::new(|_| MockReply::Lost);
        let (engine, _sink) = engine_for(&controller);

        let err = engine.send(&Command::new(0x09, 0x00)).unwrap_err();
        assert!(err.is_link_lost(), "{err}");
        assert_eq!(engine.link_state(), LinkState::Disconnected);
    }

    #[test]
    fn fire_sends_without_reading() {
        let controller = MockController::new(|_| MockReply::Silence);
        let (engine, sink) = engine_for(&controller);
        engine.fire(&Command::new(0xFF, 0xFF)).unwrap();
        assert_eq!(controller.frames(), vec![[0xFF, 0xFF, 0x00, 0x00]]);
        assert!(sink.snapshot().is_empty());
    }

    #[test]
    fn clamped_payload_is_reported() {
        let controller = MockController::accepting();
        let (engine, sink) = engine_for(&controller);
        let command = Command::try_new(0x09, 0x0C, 70_000).unwrap();
        engine.send(&command).unwrap();
        assert!(sink.any(|d| matches!(d, Diagnostic::PayloadClamped { .. })));
    }

    #[test]
    fn concurrent_callers_never_interleave() {
        // Each reply echoes the payload; an interleaved exchange would return
        // another thread's value.
        let controller = MockController::new(|cmd| MockReply::Word(u32::from(cmd.payload)));
        let (engine, _sink) = engine_for(&controller);
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..4u16)
            .map(|t| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for i in 0..50u16 {
                        let payload = t * 1000 + i;
                        let value = engine
                            .query(&Command::new(0x17, 0x00).with_payload(payload))
                            .unwrap();
                        assert_eq!(value, i64::from(payload));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(controller.frames().len(), 200);
    }
}
