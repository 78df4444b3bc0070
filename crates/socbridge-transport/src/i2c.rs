use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use socbridge_frame::registers::handshake;
use socbridge_frame::{RawFrame, FRAME_SIZE};
use tracing::{debug, info, trace};

use crate::error::{LinkError, Result};
use crate::sys;
use crate::traits::Link;

/// `I2C_SLAVE` from `linux/i2c-dev.h`.
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// Grace period before re-reading an unexpected handshake status.
const RECHECK_DELAY: Duration = Duration::from_millis(1);

/// Block link over an I2C bus using the controller's status handshake.
///
/// A command is written into the data region, then the status byte is set to
/// `SIGNAL`. The controller replaces it with `DONE` (response word valid) or
/// `BAD` (frame rejected).
pub struct I2cLink {
    file: File,
    path: PathBuf,
    address: u16,
    poll_interval: Duration,
}

impl I2cLink {
    /// Open the bus device and bind it to the controller's address.
    pub fn open(path: impl AsRef<Path>, address: u16, poll_interval: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| LinkError::Open {
                path: path.clone(),
                source,
            })?;

        sys::ioctl_arg(file.as_raw_fd(), I2C_SLAVE, libc::c_ulong::from(address)).map_err(
            |source| LinkError::Open {
                path: path.clone(),
                source,
            },
        )?;

        info!(path = %path.display(), address, "i2c link open");
        Ok(Self {
            file,
            path,
            address,
            poll_interval,
        })
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    fn write_at(&mut self, offset: u8, bytes: &[u8]) -> io::Result<()> {
        let mut msg = Vec::with_capacity(bytes.len() + 1);
        msg.push(offset);
        msg.extend_from_slice(bytes);
        self.file.write_all(&msg)
    }

    fn read_at(&mut self, offset: u8, out: &mut [u8]) -> io::Result<()> {
        self.file.write_all(&[offset])?;
        self.file.read_exact(out)
    }

    fn status(&mut self) -> io::Result<u8> {
        let mut status = [0u8; 1];
        self.read_at(handshake::STATUS_OFFSET, &mut status)?;
        Ok(status[0])
    }

    fn read_word(&mut self) -> Result<RawFrame> {
        let mut frame = [0u8; FRAME_SIZE];
        self.read_at(handshake::RESPONSE_OFFSET, &mut frame)?;
        Ok(frame)
    }
}

impl Link for I2cLink {
    fn write_frame(&mut self, frame: &RawFrame) -> Result<()> {
        self.write_at(handshake::DATA_OFFSET, frame)?;
        self.write_at(handshake::STATUS_OFFSET, &[handshake::SIGNAL])?;
        debug!(path = %self.path.display(), ?frame, "frame written");
        Ok(())
    }

    fn read_response(&mut self, timeout: Duration) -> Result<RawFrame> {
        let deadline = Instant::now() + timeout;
        let mut status = self.status()?;
        while status == handshake::SIGNAL {
            if Instant::now() >= deadline {
                return Err(LinkError::Timeout(timeout));
            }
            thread::sleep(self.poll_interval);
            status = self.status()?;
        }

        if status != handshake::DONE && status != handshake::BAD {
            trace!(status, "unexpected handshake status; rechecking");
            thread::sleep(RECHECK_DELAY);
            status = self.status()?;
        }

        match status {
            handshake::DONE => self.read_word(),
            handshake::BAD => Err(LinkError::Rejected),
            _ => Err(LinkError::Timeout(timeout)),
        }
    }

    fn transport_name(&self) -> &'static str {
        "i2c"
    }
}

impl std::fmt::Debug for I2cLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("I2cLink")
            .field("path", &self.path)
            .field("address", &format_args!("{:#04x}", self.address))
            .finish()
    }
}
