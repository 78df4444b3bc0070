use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur on a controller link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No complete response arrived before the deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The channel failed under us (unplugged, closed handle, I/O fault).
    #[error("link lost: {0}")]
    Lost(String),

    /// Discovery found no matching controller.
    #[error("no controller found ({0})")]
    NotFound(String),

    /// Failed to open or configure the device node.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The controller flagged the frame as bad (block-transport handshake).
    #[error("controller rejected the frame")]
    Rejected,

    /// An I/O error occurred on the channel.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link has been closed.
    #[error("link closed")]
    Closed,
}

impl LinkError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// True for failures after which the link handle cannot be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Lost(_) | Self::Io(_) | Self::Closed)
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
