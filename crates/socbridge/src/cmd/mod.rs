use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use socbridge_frame::ProtocolRevision;
use socbridge_session::{ControllerSession, SessionConfig};
use socbridge_transport::discovery::SYSFS_ROOT;
use socbridge_transport::{DeviceSignature, I2cConfig, SerialConfig, SpiConfig, Transport};

use crate::exit::{session_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod info;
pub mod ports;
pub mod pwm;
pub mod query;
pub mod reset;
pub mod send;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports and flag the ones that look like a controller.
    Ports(PortsArgs),
    /// Connect, run capability discovery and print the topology.
    Info(InfoArgs),
    /// Send one read command and print the response word.
    Query(QueryArgs),
    /// Send one write command and report whether it was accepted.
    Send(SendArgs),
    /// Inspect or drive one PWM channel.
    Pwm(PwmArgs),
    /// Poll digital pin levels until interrupted.
    Watch(WatchArgs),
    /// Reset the controller.
    Reset(ResetArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Ports(args) => ports::run(args, link, format),
        Command::Info(args) => info::run(args, link, format),
        Command::Query(args) => query::run(args, link, format),
        Command::Send(args) => send::run(args, link, format),
        Command::Pwm(args) => pwm::run(args, link, format),
        Command::Watch(args) => watch::run(args, link, format),
        Command::Reset(args) => reset::run(args, link, format),
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, link, format),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    Serial,
    I2c,
    Spi,
}

impl TransportKind {
    fn name(self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::I2c => "i2c",
            Self::Spi => "spi",
        }
    }

    fn default_transport(self) -> Transport {
        match self {
            Self::Serial => Transport::Serial(SerialConfig::default()),
            Self::I2c => Transport::I2c(I2cConfig::default()),
            Self::Spi => Transport::Spi(SpiConfig::default()),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum RevisionArg {
    #[value(name = "1.0")]
    V1_0,
    #[value(name = "1.1")]
    V1_1,
    #[value(name = "1.2")]
    V1_2,
    #[value(name = "2.0")]
    V2_0,
}

impl From<RevisionArg> for ProtocolRevision {
    fn from(arg: RevisionArg) -> Self {
        match arg {
            RevisionArg::V1_0 => Self::Rev1_0,
            RevisionArg::V1_1 => Self::Rev1_1,
            RevisionArg::V1_2 => Self::Rev1_2,
            RevisionArg::V2_0 => Self::Rev2_0,
        }
    }
}

/// How to reach the controller. Every flag overrides the config file.
#[derive(Args, Debug, Default)]
pub struct LinkArgs {
    /// Link type. Inferred from the other link flags when omitted.
    #[arg(long, value_name = "KIND", global = true, env = "SOCBRIDGE_TRANSPORT")]
    pub transport: Option<TransportKind>,
    /// Serial device node; skips USB enumeration.
    #[arg(long, value_name = "PATH", global = true, env = "SOCBRIDGE_PORT")]
    pub port: Option<PathBuf>,
    /// Serial baud rate.
    #[arg(long, value_name = "RATE", global = true)]
    pub baud: Option<u32>,
    /// I2C bus number (`/dev/i2c-N`).
    #[arg(long, value_name = "BUS", global = true)]
    pub i2c_bus: Option<u8>,
    /// I2C slave address (e.g. 0x07).
    #[arg(long, value_name = "ADDR", global = true, value_parser = parse_u16)]
    pub i2c_address: Option<u16>,
    /// SPI device node.
    #[arg(long, value_name = "PATH", global = true)]
    pub spi_device: Option<PathBuf>,
    /// Firmware protocol revision (selects the sign convention).
    #[arg(long, value_name = "REV", global = true)]
    pub revision: Option<RevisionArg>,
    /// JSON session config file.
    #[arg(long, value_name = "FILE", global = true, env = "SOCBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Response timeout (e.g. 2s, 500ms).
    #[arg(long, value_name = "DURATION", global = true, value_parser = parse_duration)]
    pub timeout: Option<Duration>,
    #[arg(long, value_name = "DIR", global = true, hide = true, env = "SOCBRIDGE_SYSFS_ROOT")]
    pub sysfs_root: Option<PathBuf>,
}

impl LinkArgs {
    /// The config file (or defaults) with every given flag applied.
    pub fn session_config(&self) -> CliResult<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_json_file(path)
                .map_err(|err| session_error("config failed", err))?,
            None => SessionConfig::default(),
        };

        if let Some(kind) = self.requested_kind() {
            if kind.name() != config.transport.name() {
                config.transport = kind.default_transport();
            }
        }

        match &mut config.transport {
            Transport::Serial(serial) => {
                reject_flags(
                    "serial",
                    &[
                        ("--i2c-bus", self.i2c_bus.is_some()),
                        ("--i2c-address", self.i2c_address.is_some()),
                        ("--spi-device", self.spi_device.is_some()),
                    ],
                )?;
                if let Some(port) = &self.port {
                    serial.port = Some(port.clone());
                }
                if let Some(baud) = self.baud {
                    serial.baud_rate = baud;
                }
                if let Some(root) = &self.sysfs_root {
                    serial.sysfs_root = root.clone();
                }
            }
            Transport::I2c(i2c) => {
                reject_flags(
                    "i2c",
                    &[
                        ("--port", self.port.is_some()),
                        ("--baud", self.baud.is_some()),
                        ("--spi-device", self.spi_device.is_some()),
                    ],
                )?;
                if let Some(bus) = self.i2c_bus {
                    i2c.bus = bus;
                }
                if let Some(address) = self.i2c_address {
                    i2c.address = address;
                }
            }
            Transport::Spi(spi) => {
                reject_flags(
                    "spi",
                    &[
                        ("--port", self.port.is_some()),
                        ("--baud", self.baud.is_some()),
                        ("--i2c-bus", self.i2c_bus.is_some()),
                        ("--i2c-address", self.i2c_address.is_some()),
                    ],
                )?;
                if let Some(device) = &self.spi_device {
                    spi.device = device.clone();
                }
            }
        }

        if let Some(revision) = self.revision {
            config.revision = revision.into();
        }
        if let Some(timeout) = self.timeout {
            config.response_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        }
        Ok(config)
    }

    /// Where to enumerate serial ports, and what a controller looks like.
    pub fn serial_probe(&self) -> CliResult<(PathBuf, DeviceSignature)> {
        let config = self.session_config()?;
        Ok(match config.transport {
            Transport::Serial(serial) => (serial.sysfs_root, serial.signature),
            _ => (
                self.sysfs_root
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(SYSFS_ROOT)),
                DeviceSignature::default(),
            ),
        })
    }

    fn requested_kind(&self) -> Option<TransportKind> {
        self.transport.or_else(|| {
            if self.i2c_bus.is_some() || self.i2c_address.is_some() {
                Some(TransportKind::I2c)
            } else if self.spi_device.is_some() {
                Some(TransportKind::Spi)
            } else if self.port.is_some() || self.baud.is_some() {
                Some(TransportKind::Serial)
            } else {
                None
            }
        })
    }
}

fn reject_flags(transport: &str, flags: &[(&str, bool)]) -> CliResult<()> {
    let stray: Vec<&str> = flags
        .iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| *name)
        .collect();
    if stray.is_empty() {
        Ok(())
    } else {
        Err(CliError::new(
            USAGE,
            format!(
                "{} cannot be used with the {transport} transport",
                stray.join(", ")
            ),
        ))
    }
}

/// Connect with the resolved config. Raw register commands skip discovery.
pub fn open_session(link: &LinkArgs, discover: bool) -> CliResult<ControllerSession> {
    let mut config = link.session_config()?;
    config.discover_on_connect = discover;
    ControllerSession::connect(config).map_err(|err| session_error("connect failed", err))
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {
    /// Only list ports carrying the controller signature.
    #[arg(long)]
    pub matched: bool,
}

#[derive(Args, Debug, Default)]
pub struct InfoArgs {}

/// Register, opcode and payload of one raw command.
#[derive(Args, Debug)]
pub struct FrameArgs {
    /// Register id (decimal or 0x-prefixed hex).
    #[arg(value_parser = parse_u8)]
    pub register: u8,
    /// Opcode within the register.
    #[arg(value_parser = parse_u8)]
    pub opcode: u8,
    /// Payload; values above 0xFFFF are clamped.
    #[arg(value_parser = parse_u32, default_value = "0")]
    pub payload: u32,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub frame: FrameArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub frame: FrameArgs,
}

#[derive(Args, Debug)]
pub struct PwmArgs {
    /// PWM channel number.
    pub channel: u8,
    /// Output frequency in Hz.
    #[arg(long, conflicts_with_all = ["midi", "divider"])]
    pub frequency: Option<f64>,
    /// Output frequency as a MIDI note number.
    #[arg(long, conflicts_with_all = ["frequency", "divider"])]
    pub midi: Option<f64>,
    /// Duty cycle in percent.
    #[arg(long)]
    pub duty: Option<f64>,
    /// Raw clock divider. Shared with every channel on the same clock.
    #[arg(long, conflicts_with_all = ["frequency", "midi"])]
    pub divider: Option<i64>,
    /// Start the channel after applying settings.
    #[arg(long, conflicts_with = "stop")]
    pub start: bool,
    /// Stop the channel after applying settings.
    #[arg(long, conflicts_with = "start")]
    pub stop: bool,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Poll interval (e.g. 100ms, 1s).
    #[arg(long, default_value = "100ms", value_parser = parse_duration)]
    pub interval: Duration,
    /// Exit after printing N samples.
    #[arg(long)]
    pub count: Option<usize>,
    /// Print every sample, not just changes.
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug, Default)]
pub struct ResetArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

fn parse_u32(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|_| format!("invalid number: {input}"))
}

fn parse_u16(input: &str) -> Result<u16, String> {
    let value = parse_u32(input)?;
    u16::try_from(value).map_err(|_| format!("{input} does not fit in 16 bits"))
}

fn parse_u8(input: &str) -> Result<u8, String> {
    let value = parse_u32(input)?;
    u8::try_from(value).map_err(|_| format!("{input} does not fit in one byte"))
}
