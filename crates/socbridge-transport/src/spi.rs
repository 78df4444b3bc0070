use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use socbridge_frame::{RawFrame, FRAME_SIZE};
use tracing::{debug, info};

use crate::error::{LinkError, Result};
use crate::sys;
use crate::traits::Link;

/// `SPI_IOC_WR_MODE`: `_IOW('k', 1, u8)`.
const SPI_IOC_WR_MODE: libc::c_ulong = 0x4001_6B01;

/// `SPI_IOC_WR_MAX_SPEED_HZ`: `_IOW('k', 4, u32)`.
const SPI_IOC_WR_MAX_SPEED_HZ: libc::c_ulong = 0x4004_6B04;

/// Half-duplex block link over a spidev node.
///
/// The controller needs a short settle time between receiving a command and
/// clocking out the response.
pub struct SpiLink {
    file: File,
    path: PathBuf,
    settle_delay: Duration,
}

impl SpiLink {
    /// Open the spidev node in mode 0 at `speed_hz`.
    pub fn open(path: impl AsRef<Path>, speed_hz: u32, settle_delay: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source: std::io::Error| LinkError::Open {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(open_err)?;
        let fd = file.as_raw_fd();
        sys::ioctl_ptr(fd, SPI_IOC_WR_MODE, &0u8).map_err(open_err)?;
        sys::ioctl_ptr(fd, SPI_IOC_WR_MAX_SPEED_HZ, &speed_hz).map_err(open_err)?;

        info!(path = %path.display(), speed_hz, "spi link open");
        Ok(Self {
            file,
            path,
            settle_delay,
        })
    }
}

impl Link for SpiLink {
    fn write_frame(&mut self, frame: &RawFrame) -> Result<()> {
        self.file.write_all(frame)?;
        debug!(path = %self.path.display(), ?frame, "frame written");
        Ok(())
    }

    fn read_response(&mut self, _timeout: Duration) -> Result<RawFrame> {
        // SPI is clocked by the host; a read always completes.
        let mut frame = [0u8; FRAME_SIZE];
        self.file.read_exact(&mut frame)?;
        Ok(frame)
    }

    fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    fn transport_name(&self) -> &'static str {
        "spi"
    }
}

impl std::fmt::Debug for SpiLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpiLink")
            .field("path", &self.path)
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_device_fails() {
        let err = SpiLink::open("/dev/spidev-socbridge-missing", 1_000_000, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, LinkError::Open { .. }), "{err}");
    }
}
