use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use socbridge_frame::{RawFrame, FRAME_SIZE};
use tracing::{debug, info};

use crate::error::{LinkError, Result};
use crate::sys;
use crate::traits::Link;

const READ_CHUNK_SIZE: usize = 64;
const WRITE_TIMEOUT: Duration = Duration::from_secs(4);

/// Stream link over a serial tty (USB CDC or UART).
pub struct SerialLink {
    file: File,
    path: PathBuf,
    buf: BytesMut,
}

impl SerialLink {
    /// Open `path` in raw mode at `baud_rate` and flush stale input.
    pub fn open(path: impl AsRef<Path>, baud_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source: io::Error| LinkError::Open {
            path: path.clone(),
            source,
        };

        let speed = baud_constant(baud_rate).ok_or_else(|| {
            open_err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("unsupported baud rate {baud_rate}"),
            ))
        })?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(open_err)?;
        configure_raw(&file, speed).map_err(open_err)?;

        let mut link = Self {
            file,
            path,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        };
        link.discard_input()?;
        info!(path = %link.path.display(), baud_rate, "serial link open");
        Ok(link)
    }

    /// Device node this link was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Link for SerialLink {
    fn write_frame(&mut self, frame: &RawFrame) -> Result<()> {
        let mut written = 0;
        while written < frame.len() {
            match self.file.write(&frame[written..]) {
                Ok(0) => {
                    return Err(LinkError::Lost(format!(
                        "{} accepted no bytes",
                        self.path.display()
                    )))
                }
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if !sys::wait_ready(self.file.as_raw_fd(), libc::POLLOUT, WRITE_TIMEOUT)? {
                        return Err(LinkError::Timeout(WRITE_TIMEOUT));
                    }
                }
                Err(err) => return Err(LinkError::Io(err)),
            }
        }
        debug!(path = %self.path.display(), ?frame, "frame written");
        Ok(())
    }

    fn read_response(&mut self, timeout: Duration) -> Result<RawFrame> {
        let deadline = Instant::now() + timeout;
        while self.buf.len() < FRAME_SIZE {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero()
                || !sys::wait_ready(self.file.as_raw_fd(), libc::POLLIN, remaining)?
            {
                return Err(LinkError::Timeout(timeout));
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            match self.file.read(&mut chunk) {
                Ok(0) => {
                    return Err(LinkError::Lost(format!(
                        "{} reached end of file",
                        self.path.display()
                    )))
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(err)
                    if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) =>
                {
                    continue
                }
                Err(err) => return Err(LinkError::Io(err)),
            }
        }

        let bytes = self.buf.split_to(FRAME_SIZE);
        let mut frame = [0u8; FRAME_SIZE];
        frame.copy_from_slice(&bytes);
        Ok(frame)
    }

    fn discard_input(&mut self) -> Result<()> {
        self.buf.clear();
        // SAFETY: the descriptor is owned by `self.file` and open for the
        // lifetime of this call.
        let rc = unsafe { libc::tcflush(self.file.as_raw_fd(), libc::TCIFLUSH) };
        if rc != 0 {
            return Err(LinkError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "serial"
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.path)
            .field("buffered", &self.buf.len())
            .finish()
    }
}

fn configure_raw(file: &File, speed: libc::speed_t) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: termios is plain old data; zeroed is a valid initial value that
    // tcgetattr overwrites.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is an open tty and `tio` is a valid writable termios.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `tio` was initialised by tcgetattr above.
    unsafe {
        libc::cfmakeraw(&mut tio);
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cc[libc::VMIN] = 0;
    tio.c_cc[libc::VTIME] = 0;

    // SAFETY: `fd` is an open tty and `tio` is fully initialised.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Map a numeric baud rate onto the termios speed constant.
pub fn baud_constant(baud_rate: u32) -> Option<libc::speed_t> {
    let speed = match baud_rate {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460800 => libc::B460800,
        #[cfg(target_os = "linux")]
        921600 => libc::B921600,
        _ => return None,
    };
    Some(speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_rates_are_supported() {
        for rate in [9600, 19200, 38400, 57600, 115200] {
            assert!(baud_constant(rate).is_some(), "{rate}");
        }
        assert!(baud_constant(12345).is_none());
    }

    #[test]
    fn open_missing_device_fails() {
        let err = SerialLink::open("/dev/socbridge-does-not-exist", 9600).unwrap_err();
        assert!(matches!(err, LinkError::Open { .. }), "{err}");
    }

    #[test]
    fn open_rejects_unknown_baud_rate() {
        let err = SerialLink::open("/dev/null", 12345).unwrap_err();
        match err {
            LinkError::Open { source, .. } => assert_eq!(source.kind(), ErrorKind::InvalidInput),
            other => panic!("unexpected error: {other}"),
        }
    }
}
