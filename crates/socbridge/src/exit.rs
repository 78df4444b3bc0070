use std::fmt;
use std::io;

use socbridge_frame::EncodingError;
use socbridge_session::{CapabilityError, ProtocolError, SessionError};
use socbridge_transport::LinkError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::Unsupported => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    match err {
        LinkError::Open { path, source } => {
            io_error(&format!("{context}: {}", path.display()), source)
        }
        LinkError::Io(source) => io_error(context, source),
        LinkError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

// `Worker` only exists when the session's async feature is on.
#[allow(unreachable_patterns)]
pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Link(err) => link_error(context, err),
        SessionError::Encoding(err @ EncodingError::RegisterOutOfRange(_))
        | SessionError::Encoding(err @ EncodingError::OpcodeOutOfRange(_)) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        SessionError::Capability(err @ CapabilityError::NotPresent { .. }) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        SessionError::Protocol(err @ ProtocolError::NoResponse { .. }) => {
            CliError::new(TIMEOUT, format!("{context}: {err}"))
        }
        SessionError::Protocol(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        SessionError::ConfigRead { path, source } => {
            io_error(&format!("{context}: {}", path.display()), source)
        }
        SessionError::ConfigParse(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn link_errors_map_to_transport_and_timeout() {
        let err = link_error("connect failed", LinkError::NotFound("no matching device".into()));
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("connect failed: "));

        let err = link_error("query failed", LinkError::Timeout(Duration::from_secs(2)));
        assert_eq!(err.code, TIMEOUT);

        let err = link_error(
            "open failed",
            LinkError::Open {
                path: "/dev/ttyACM0".into(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            },
        );
        assert_eq!(err.code, PERMISSION_DENIED);
        assert!(err.message.contains("/dev/ttyACM0"));
    }

    #[test]
    fn missing_capability_is_a_usage_error() {
        let err = session_error(
            "pwm failed",
            CapabilityError::NotPresent {
                what: "PWM 9".into(),
            }
            .into(),
        );
        assert_eq!(err.code, USAGE);
        assert_eq!(
            session_error("info failed", CapabilityError::NotDiscovered.into()).code,
            INTERNAL
        );
    }

    #[test]
    fn protocol_errors_map_to_data_invalid() {
        let err = session_error(
            "send failed",
            ProtocolError::BadParameter {
                register: 0x09,
                opcode: 0x0C,
            }
            .into(),
        );
        assert_eq!(err.code, DATA_INVALID);
        let err = session_error(
            "query failed",
            ProtocolError::NoResponse {
                register: 0x09,
                opcode: 0x0D,
            }
            .into(),
        );
        assert_eq!(err.code, TIMEOUT);
    }
}
