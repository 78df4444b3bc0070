//! Reporting of degraded-but-not-fatal outcomes.
//!
//! Clamped inputs, dropped writes and missed tolerances are not errors: the
//! session carries on with a best-effort result. They are reported through a
//! [`DiagnosticsSink`] so callers (and tests) can observe them.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use socbridge_frame::Command;
use tracing::{info, warn};

use crate::error::ProtocolError;

/// One degraded outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A command payload did not fit in 16 bits and was clamped.
    PayloadClamped { command: Command },

    /// A write was not accepted; it will be sent again.
    WriteRetried {
        command: Command,
        attempt: u32,
        reason: ProtocolError,
    },

    /// A write was never accepted and has been given up on.
    WriteDropped {
        command: Command,
        attempts: u32,
        reason: ProtocolError,
    },

    /// A read was answered with the bad-parameter sentinel.
    BadParameter { command: Command },

    /// A read timed out on every attempt; the sentinel was returned instead.
    ReadTimedOut { command: Command, attempts: u32 },

    /// A register was claimed by more than one peripheral handle.
    DuplicateRegister { register: u8 },

    /// A numeric input was outside its valid range.
    ValueClamped {
        what: &'static str,
        requested: f64,
        applied: f64,
    },

    /// A requested frequency lay outside the achievable band.
    FrequencyClamped {
        channel: u8,
        requested_hz: f64,
        applied_hz: f64,
    },

    /// No divider and period could reach the target within tolerance.
    ToleranceNotMet {
        channel: u8,
        target_hz: f64,
        achieved_hz: f64,
        error_percent: f64,
    },

    /// A shared clock divider changed; every listed channel is affected.
    SharedClockChanged {
        clock: u8,
        old_divider: u32,
        new_divider: u32,
        affected_channels: Vec<u8>,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PayloadClamped { command } => write!(f, "payload clamped: {command}"),
            Self::WriteRetried {
                command,
                attempt,
                reason,
            } => write!(f, "retrying {command} after attempt {attempt}: {reason}"),
            Self::WriteDropped {
                command,
                attempts,
                reason,
            } => write!(f, "dropped {command} after {attempts} attempts: {reason}"),
            Self::BadParameter { command } => write!(f, "bad parameter: {command}"),
            Self::ReadTimedOut { command, attempts } => {
                write!(f, "no response to {command} after {attempts} attempts")
            }
            Self::DuplicateRegister { register } => {
                write!(f, "register {register:#04x} is already in use")
            }
            Self::ValueClamped {
                what,
                requested,
                applied,
            } => write!(f, "{what} {requested} out of range; adjusted to {applied}"),
            Self::FrequencyClamped {
                channel,
                requested_hz,
                applied_hz,
            } => write!(
                f,
                "PWM {channel}: {requested_hz} Hz not achievable; using {applied_hz} Hz"
            ),
            Self::ToleranceNotMet {
                channel,
                target_hz,
                achieved_hz,
                error_percent,
            } => write!(
                f,
                "PWM {channel}: could not reach {target_hz} Hz within tolerance \
                 (achieved {achieved_hz:.3} Hz, {error_percent:.2}% off)"
            ),
            Self::SharedClockChanged {
                clock,
                old_divider,
                new_divider,
                affected_channels,
            } => write!(
                f,
                "clock {clock} divider {old_divider} -> {new_divider}; affects PWM {affected_channels:?}"
            ),
        }
    }
}

/// Receives diagnostics from a session.
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Logs every diagnostic with `tracing`. The default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::WriteRetried { .. } | Diagnostic::SharedClockChanged { .. } => {
                info!(%diagnostic, "controller notice")
            }
            _ => warn!(%diagnostic, "controller degraded"),
        }
    }
}

/// Keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn any(&self, predicate: impl Fn(&Diagnostic) -> bool) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(predicate)
    }
}

impl DiagnosticsSink for RecordingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.report(Diagnostic::DuplicateRegister { register: 0x09 });
        sink.report(Diagnostic::BadParameter {
            command: Command::new(0x16, 0x00),
        });
        assert_eq!(sink.snapshot().len(), 2);
        assert!(sink.any(|d| matches!(d, Diagnostic::DuplicateRegister { register: 0x09 })));
        assert_eq!(sink.take().len(), 2);
        assert!(sink.snapshot().is_empty());
    }

    #[test]
    fn display_is_human_readable() {
        let text = Diagnostic::WriteDropped {
            command: Command::new(0x09, 0x0C).with_payload(100),
            attempts: 3,
            reason: ProtocolError::BadParameter {
                register: 0x09,
                opcode: 0x0C,
            },
        }
        .to_string();
        assert!(text.contains("after 3 attempts"), "{text}");
        assert!(text.contains("bad parameter"), "{text}");
    }
}
