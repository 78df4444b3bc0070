//! Links to PSoC controller boards.
//!
//! Provides one interface over the physical channels a controller can sit
//! behind:
//! - serial ttys (USB CDC or UART), found by USB signature
//! - I2C, using the controller's status-byte handshake
//! - SPI, half duplex with a settle delay
//!
//! [`Connection`] wraps a [`Connector`] and owns the link state, the
//! response timeout and the bounded reconnect.

pub mod connection;
pub mod discovery;
pub mod error;
pub mod traits;
pub mod transport;

#[cfg(target_os = "linux")]
pub mod i2c;
#[cfg(unix)]
pub mod serial;
#[cfg(target_os = "linux")]
pub mod spi;
#[cfg(unix)]
mod sys;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use connection::{Connection, LinkState, ReconnectPolicy, DEFAULT_RESPONSE_TIMEOUT};
pub use discovery::{
    find_serial_port, list_serial_ports, list_serial_ports_in, DeviceSignature, SerialPortInfo,
};
pub use error::{LinkError, Result};
pub use traits::{Connector, Link, PortHandle};
pub use transport::{I2cConfig, SerialConfig, SpiConfig, Transport};
