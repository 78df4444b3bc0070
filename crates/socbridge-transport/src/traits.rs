use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use socbridge_frame::RawFrame;

use crate::error::Result;

/// An open byte channel to one controller.
///
/// Implementations move exactly one frame per call. They do not retry and do
/// not decode; the connection and engine layers above own those policies.
pub trait Link: Send {
    /// Write one command frame.
    fn write_frame(&mut self, frame: &RawFrame) -> Result<()>;

    /// Block until one response frame is available or `timeout` elapses.
    fn read_response(&mut self, timeout: Duration) -> Result<RawFrame>;

    /// Drop stale input left over from an earlier transaction.
    fn discard_input(&mut self) -> Result<()> {
        Ok(())
    }

    /// Extra wait the channel needs between a write and its read.
    fn settle_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// Short name of the channel kind, for logs.
    fn transport_name(&self) -> &'static str;
}

/// Finds and opens controllers.
pub trait Connector: Send {
    /// Look for a controller. `None` if nothing matches.
    fn discover(&self) -> Option<PortHandle>;

    /// Open the channel described by `handle`.
    fn open(&self, handle: &PortHandle) -> Result<Box<dyn Link>>;
}

/// Where a controller was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortHandle {
    /// Device node.
    pub path: PathBuf,
    /// Bus address for addressed buses (I2C).
    pub address: Option<u16>,
    /// Descriptor string reported by the device, if any.
    pub description: Option<String>,
}

impl PortHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            address: None,
            description: None,
        }
    }

    pub fn with_address(mut self, address: u16) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Display for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        if let Some(address) = self.address {
            write!(f, "@{address:#04x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_display_includes_bus_address() {
        let handle = PortHandle::new("/dev/i2c-1").with_address(0x07);
        assert_eq!(handle.to_string(), "/dev/i2c-1@0x07");
        assert_eq!(PortHandle::new("/dev/ttyACM0").to_string(), "/dev/ttyACM0");
    }
}
