use std::path::PathBuf;

use socbridge_frame::{register_name, EncodingError};
use socbridge_transport::LinkError;

/// A peripheral, pin or clock is missing from the controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CapabilityError {
    /// Discovery ran and did not find it.
    #[error("{what} is not present on this controller")]
    NotPresent { what: String },

    /// Discovery has not completed on this session.
    #[error("capability discovery has not run")]
    NotDiscovered,
}

/// The controller answered, but not with what was asked for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The controller reported a bad parameter.
    #[error("{} [{register:#04x}] op {opcode:#04x}: bad parameter", register_name(*register))]
    BadParameter { register: u8, opcode: u8 },

    /// The block-transport handshake flagged the frame as bad.
    #[error("{} [{register:#04x}] op {opcode:#04x}: frame rejected", register_name(*register))]
    Rejected { register: u8, opcode: u8 },

    /// A write was answered with something other than the accepted status.
    #[error("{} [{register:#04x}] op {opcode:#04x}: unexpected reply {raw:#010x}", register_name(*register))]
    UnexpectedReply { register: u8, opcode: u8, raw: u32 },

    /// Every attempt timed out.
    #[error("{} [{register:#04x}] op {opcode:#04x}: no response", register_name(*register))]
    NoResponse { register: u8, opcode: u8 },
}

/// Errors surfaced by a controller session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The command could not be framed.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The link failed.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// The controller lacks the requested capability.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// The controller rejected a request that has no best-effort fallback.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON for this schema.
    #[error("invalid config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// The blocking worker for an async call went away.
    #[cfg(feature = "async")]
    #[error("session worker failed: {0}")]
    Worker(String),
}

impl SessionError {
    /// True when the link is gone and only a reconnect can help.
    pub fn is_link_lost(&self) -> bool {
        matches!(self, Self::Link(LinkError::Lost(_) | LinkError::Closed))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
