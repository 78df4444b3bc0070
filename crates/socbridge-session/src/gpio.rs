//! Digital pin handle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use socbridge_frame::{Command, GPIO};

use crate::engine::Delivery;
use crate::error::{ProtocolError, Result};
use crate::session::ControllerSession;

/// Sub-opcodes of the GPIO register.
pub mod opcode {
    pub const READ: u8 = 0x00;
    pub const WRITE: u8 = 0x01;
    pub const TOGGLE: u8 = 0x02;
    pub const CONFIGURE: u8 = 0x03;
    pub const BITMAP: u8 = 0x04;
    pub const PORT_STATE: u8 = 0x05;
}

/// Electrical configuration of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DriveMode {
    /// High impedance.
    Input = 0x02,
    PullUp = 0x03,
    PullDown = 0x04,
    OpenDrainLow = 0x05,
    OpenDrainHigh = 0x06,
    /// Strong drive.
    Output = 0x07,
    PullUpDown = 0x08,
}

impl DriveMode {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::PullUp => "pull_up",
            Self::PullDown => "pull_down",
            Self::OpenDrainLow => "open_drain_low",
            Self::OpenDrainHigh => "open_drain_high",
            Self::Output => "output",
            Self::PullUpDown => "pull_up_down",
        }
    }
}

impl fmt::Display for DriveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriveMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "input" => Ok(Self::Input),
            "pull_up" => Ok(Self::PullUp),
            "pull_down" => Ok(Self::PullDown),
            "open_drain_low" | "open_drain_lo" => Ok(Self::OpenDrainLow),
            "open_drain_high" | "open_drain_hi" => Ok(Self::OpenDrainHigh),
            "output" => Ok(Self::Output),
            "pull_up_down" => Ok(Self::PullUpDown),
            other => Err(format!("unknown drive mode: {other}")),
        }
    }
}

/// Pin address as packed into a GPIO payload.
fn pin_payload(port: u8, pin: u8) -> u16 {
    (u16::from(port) << 4) | (u16::from(pin) << 1)
}

/// One digital pin on a connected controller.
#[derive(Debug)]
pub struct DigitalPin<'s> {
    session: &'s ControllerSession,
    port: u8,
    pin: u8,
    absolute: u32,
    mode: Option<DriveMode>,
}

impl<'s> DigitalPin<'s> {
    /// Attach to a discovered pin.
    pub fn open(session: &'s ControllerSession, port: u8, pin: u8) -> Result<Self> {
        let absolute = session.with_topology(|t| {
            t.require_pin(port, pin)?;
            Ok::<_, crate::error::CapabilityError>(t.pin_absolute(port, pin).unwrap_or(0))
        })??;
        Ok(Self {
            session,
            port,
            pin,
            absolute,
            mode: None,
        })
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Bit position of this pin in [`read_bitmap`] results.
    pub fn absolute_index(&self) -> u32 {
        self.absolute
    }

    /// Drive mode last configured through this handle.
    pub fn mode(&self) -> Option<DriveMode> {
        self.mode
    }

    pub fn configure(&mut self, mode: DriveMode) -> Result<Delivery> {
        let payload = (u16::from(mode.code()) << 8) | pin_payload(self.port, self.pin);
        let delivery = self.command(opcode::CONFIGURE, payload)?;
        self.mode = Some(mode);
        Ok(delivery)
    }

    pub fn write(&self, high: bool) -> Result<Delivery> {
        self.command(opcode::WRITE, pin_payload(self.port, self.pin) | u16::from(high))
    }

    pub fn toggle(&self) -> Result<Delivery> {
        self.command(opcode::TOGGLE, pin_payload(self.port, self.pin))
    }

    /// Current pin level.
    ///
    /// A bad-parameter answer (or no answer at all) is an error here, since
    /// it cannot be told apart from a level.
    pub fn read(&self) -> Result<bool> {
        Ok(self.read_word(opcode::READ, pin_payload(self.port, self.pin))? != 0)
    }

    /// Levels of every pin on this pin's port, bit `n` for pin `n`.
    pub fn port_state(&self) -> Result<u8> {
        let word = self.read_word(opcode::PORT_STATE, u16::from(self.port) << 4)?;
        Ok((word & 0xFF) as u8)
    }

    /// Level of this pin within a [`DigitalPin::port_state`] result.
    pub fn level_in_port(&self, port_state: u8) -> bool {
        (port_state >> self.pin) & 1 == 1
    }

    /// Level of this pin within a [`read_bitmap`] result.
    pub fn level_in_bitmap(&self, bitmap: u32) -> bool {
        self.absolute < 32 && (bitmap >> self.absolute) & 1 == 1
    }

    fn command(&self, opcode: u8, payload: u16) -> Result<Delivery> {
        self.session
            .send(&Command::new(GPIO, opcode).with_payload(payload))
    }

    fn read_word(&self, opcode: u8, payload: u16) -> Result<u32> {
        read_gpio(self.session, opcode, payload)
    }
}

/// Levels of every discovered pin in one read, ordered as
/// [`Topology::pins`](crate::Topology::pins).
pub fn read_bitmap(session: &ControllerSession) -> Result<u32> {
    read_gpio(session, opcode::BITMAP, 0)
}

fn read_gpio(session: &ControllerSession, opcode: u8, payload: u16) -> Result<u32> {
    let command = Command::new(GPIO, opcode).with_payload(payload);
    let response = session.query_response(&command)?;
    if response.is_bad_parameter() {
        return Err(ProtocolError::BadParameter {
            register: GPIO,
            opcode,
        }
        .into());
    }
    Ok(response.raw())
}
