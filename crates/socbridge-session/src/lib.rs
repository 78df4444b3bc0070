//! Talking to a PSoC controller: transactions, discovery and PWM timing.
//!
//! A [`ControllerSession`] wraps one link. Connecting runs capability
//! discovery and keeps the resulting [`Topology`]; [`Pwm`] and
//! [`DigitalPin`] handles are opened against it and fail with
//! [`CapabilityError::NotPresent`] for anything the firmware does not have.
//!
//! Hardware tolerance is handled the way the firmware expects: bad
//! parameters on writes are retried and then dropped, out-of-range inputs
//! are clamped. None of that is an error; each case is reported to the
//! session's [`DiagnosticsSink`].
//!
//! ```ignore
//! let session = ControllerSession::connect(SessionConfig::default())?;
//! let mut pwm = Pwm::open(&session, 0)?;
//! pwm.set_frequency(50.0)?;
//! pwm.start()?;
//! session.disconnect()?;
//! ```

pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod gpio;
pub mod pwm;
pub mod session;
pub mod synthesis;
pub mod topology;

#[cfg(feature = "async")]
pub mod async_session;

#[cfg(feature = "async")]
pub use async_session::AsyncSession;
pub use config::SessionConfig;
pub use diagnostics::{Diagnostic, DiagnosticsSink, RecordingSink, TracingSink};
pub use discovery::{build_topology, RawDiscovery};
pub use engine::{Delivery, Engine, RetryPolicy};
pub use error::{CapabilityError, ProtocolError, Result, SessionError};
pub use gpio::{read_bitmap, DigitalPin, DriveMode};
pub use pwm::Pwm;
pub use session::ControllerSession;
pub use synthesis::{FrequencyPlan, SynthesisLimits};
pub use topology::{ClockEntry, ClockSource, FirmwareVersion, PwmAssignment, Topology};
