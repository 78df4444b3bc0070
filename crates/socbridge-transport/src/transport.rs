use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::discovery::{find_serial_port, DeviceSignature, SYSFS_ROOT};
use crate::error::{LinkError, Result};
use crate::traits::{Connector, Link, PortHandle};

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Explicit device node. Skips enumeration when set.
    pub port: Option<PathBuf>,
    pub baud_rate: u32,
    pub signature: DeviceSignature,
    /// Where sysfs is mounted; overridable for tests.
    pub sysfs_root: PathBuf,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            signature: DeviceSignature::default(),
            sysfs_root: PathBuf::from(SYSFS_ROOT),
        }
    }
}

/// I2C link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct I2cConfig {
    pub bus: u8,
    pub address: u16,
    /// Delay between handshake status polls, in microseconds.
    pub poll_interval_us: u64,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            bus: 1,
            address: 0x07,
            poll_interval_us: 200,
        }
    }
}

impl I2cConfig {
    pub fn device_path(&self) -> PathBuf {
        PathBuf::from(format!("/dev/i2c-{}", self.bus))
    }
}

/// SPI link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiConfig {
    pub device: PathBuf,
    pub speed_hz: u32,
    /// Wait between writing a command and reading its response, in milliseconds.
    pub settle_delay_ms: u64,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/spidev0.0"),
            speed_hz: 1_000_000,
            settle_delay_ms: 10,
        }
    }
}

/// The physical channel a session talks over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transport {
    Serial(SerialConfig),
    I2c(I2cConfig),
    Spi(SpiConfig),
}

impl Default for Transport {
    fn default() -> Self {
        Self::Serial(SerialConfig::default())
    }
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Serial(_) => "serial",
            Self::I2c(_) => "i2c",
            Self::Spi(_) => "spi",
        }
    }
}

impl Connector for Transport {
    fn discover(&self) -> Option<PortHandle> {
        match self {
            Self::Serial(config) => match &config.port {
                Some(port) => existing(port).map(PortHandle::new),
                None => find_serial_port(&config.sysfs_root, &config.signature).map(|info| {
                    let handle = PortHandle::new(&info.path);
                    match info.description() {
                        Some(desc) => handle.with_description(desc),
                        None => handle,
                    }
                }),
            },
            Self::I2c(config) => {
                existing(&config.device_path()).map(|path| PortHandle::new(path).with_address(config.address))
            }
            Self::Spi(config) => existing(&config.device).map(PortHandle::new),
        }
    }

    fn open(&self, handle: &PortHandle) -> Result<Box<dyn Link>> {
        debug!(transport = self.name(), port = %handle, "opening link");
        match self {
            #[cfg(unix)]
            Self::Serial(config) => Ok(Box::new(crate::serial::SerialLink::open(
                &handle.path,
                config.baud_rate,
            )?)),
            #[cfg(target_os = "linux")]
            Self::I2c(config) => Ok(Box::new(crate::i2c::I2cLink::open(
                &handle.path,
                handle.address.unwrap_or(config.address),
                Duration::from_micros(config.poll_interval_us),
            )?)),
            #[cfg(target_os = "linux")]
            Self::Spi(config) => Ok(Box::new(crate::spi::SpiLink::open(
                &handle.path,
                config.speed_hz,
                Duration::from_millis(config.settle_delay_ms),
            )?)),
            #[allow(unreachable_patterns)]
            _ => Err(LinkError::Open {
                path: handle.path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    format!("{} links are not supported on this platform", self.name()),
                ),
            }),
        }
    }
}

fn existing(path: &Path) -> Option<PathBuf> {
    path.exists().then(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_board_wiring() {
        let i2c = I2cConfig::default();
        assert_eq!(i2c.device_path(), PathBuf::from("/dev/i2c-1"));
        assert_eq!(i2c.address, 0x07);
        assert_eq!(SpiConfig::default().speed_hz, 1_000_000);
        assert_eq!(SerialConfig::default().baud_rate, 9600);
    }

    #[test]
    fn explicit_missing_port_is_not_discovered() {
        let transport = Transport::Serial(SerialConfig {
            port: Some(PathBuf::from("/dev/socbridge-missing")),
            ..SerialConfig::default()
        });
        assert!(transport.discover().is_none());
    }

    #[test]
    fn explicit_port_bypasses_enumeration() {
        let transport = Transport::Serial(SerialConfig {
            port: Some(PathBuf::from("/dev/null")),
            sysfs_root: PathBuf::from("/nonexistent"),
            ..SerialConfig::default()
        });
        assert_eq!(transport.discover(), Some(PortHandle::new("/dev/null")));
    }

    #[test]
    fn transport_deserializes_from_tagged_json() {
        let transport: Transport =
            serde_json::from_str(r#"{"kind":"i2c","bus":3,"address":8}"#).unwrap();
        assert_eq!(
            transport,
            Transport::I2c(I2cConfig {
                bus: 3,
                address: 8,
                ..I2cConfig::default()
            })
        );
        assert_eq!(transport.name(), "i2c");
    }
}
