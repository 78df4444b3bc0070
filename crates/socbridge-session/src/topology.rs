//! What the connected controller actually has.
//!
//! Built by capability discovery and owned by the session. The only
//! mutation after discovery is a clock divider change, which is shared by
//! every PWM channel fed from that clock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::error::CapabilityError;

/// Largest divider a controller clock accepts.
pub const MAX_DIVIDER: u32 = 65_535;

/// Firmware build version reported by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Analog blocks compiled into the firmware.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalogInventory {
    pub delsig_adc: bool,
    pub sar_adc0: bool,
    pub sar_adc1: bool,
    pub vdac0: bool,
    pub vdac1: bool,
    pub idac0: bool,
    pub idac1: bool,
    pub wavedac: bool,
    /// Pins on the sequenced SAR ADC.
    pub analog_pins: u8,
    pub capsense_sensors: u8,
    /// Full-scale ranges in volts.
    pub vdac_range_volts: [f64; 2],
    /// Full-scale ranges in milliamps.
    pub idac_range_milliamps: [f64; 2],
}

/// Source feeding a PWM clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    Master,
    Imo,
    Ilo,
    Pll,
    /// A source code this host does not know; treated as 0 Hz.
    Unknown(u8),
}

impl ClockSource {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Master,
            2 => Self::Imo,
            3 => Self::Ilo,
            4 => Self::Pll,
            other => Self::Unknown(other),
        }
    }

    /// Nominal source frequency.
    pub fn frequency_hz(self) -> u32 {
        match self {
            Self::Master | Self::Imo | Self::Pll => 24_000_000,
            Self::Ilo => 100_000,
            Self::Unknown(_) => 0,
        }
    }
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Imo => f.write_str("IMO"),
            Self::Ilo => f.write_str("ILO"),
            Self::Pll => f.write_str("PLL"),
            Self::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

/// One PWM channel fed by a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PwmAssignment {
    pub channel: u8,
    /// Counter width: 8 or 16.
    pub resolution_bits: u8,
}

impl PwmAssignment {
    /// Largest period the counter can hold.
    pub fn max_count(&self) -> u32 {
        (1u32 << self.resolution_bits) - 1
    }
}

/// A shared PWM clock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClockEntry {
    pub source: ClockSource,
    pub source_hz: u32,
    /// Always at least 1.
    pub divider: u32,
    pub consumers: Vec<PwmAssignment>,
}

impl ClockEntry {
    pub fn new(source: ClockSource, divider: u32) -> Self {
        Self {
            source,
            source_hz: source.frequency_hz(),
            divider: divider.clamp(1, MAX_DIVIDER),
            consumers: Vec::new(),
        }
    }

    /// Current clock rate after division.
    pub fn frequency_hz(&self) -> f64 {
        f64::from(self.source_hz) / f64::from(self.divider)
    }

    pub fn channels(&self) -> Vec<u8> {
        self.consumers.iter().map(|c| c.channel).collect()
    }
}

/// Where a PWM channel gets its clock from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PwmBinding {
    pub clock: u8,
    pub assignment: PwmAssignment,
}

/// Host-side model of the connected controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Topology {
    pub firmware: FirmwareVersion,
    pub analog: AnalogInventory,
    /// Port number to available pin indices.
    pub ports: BTreeMap<u8, BTreeSet<u8>>,
    /// Clock id to clock entry.
    pub clocks: BTreeMap<u8, ClockEntry>,
    pub pwm_count: u8,
}

impl Topology {
    pub fn has_pin(&self, port: u8, pin: u8) -> bool {
        self.ports.get(&port).is_some_and(|pins| pins.contains(&pin))
    }

    pub fn pin_count(&self) -> usize {
        self.ports.values().map(BTreeSet::len).sum()
    }

    /// Ordinal of a pin across all ports, ascending by port then pin.
    ///
    /// This is the bit position the controller uses in its pin bitmap.
    pub fn pin_absolute(&self, port: u8, pin: u8) -> Option<u32> {
        let mut index = 0u32;
        for (&p, pins) in &self.ports {
            for &n in pins {
                if p == port && n == pin {
                    return Some(index);
                }
                index += 1;
            }
        }
        None
    }

    /// Every pin in bitmap order.
    pub fn pins(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.ports
            .iter()
            .flat_map(|(&port, pins)| pins.iter().map(move |&pin| (port, pin)))
    }

    pub fn require_pin(&self, port: u8, pin: u8) -> Result<(), CapabilityError> {
        if self.has_pin(port, pin) {
            Ok(())
        } else {
            Err(CapabilityError::NotPresent {
                what: format!("pin P{port}[{pin}]"),
            })
        }
    }

    pub fn clock(&self, id: u8) -> Option<&ClockEntry> {
        self.clocks.get(&id)
    }

    /// Clock and counter width of a PWM channel.
    pub fn pwm(&self, channel: u8) -> Option<PwmBinding> {
        self.clocks.iter().find_map(|(&clock, entry)| {
            entry
                .consumers
                .iter()
                .find(|c| c.channel == channel)
                .map(|&assignment| PwmBinding { clock, assignment })
        })
    }

    pub fn require_pwm(&self, channel: u8) -> Result<PwmBinding, CapabilityError> {
        self.pwm(channel)
            .filter(|_| channel < self.pwm_count)
            .ok_or_else(|| CapabilityError::NotPresent {
                what: format!("PWM channel {channel}"),
            })
    }

    /// Record a new divider for a shared clock; returns the previous one.
    pub fn set_clock_divider(&mut self, clock: u8, divider: u32) -> Option<u32> {
        let entry = self.clocks.get_mut(&clock)?;
        let old = entry.divider;
        entry.divider = divider.clamp(1, MAX_DIVIDER);
        Some(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Topology {
        let mut topology = Topology {
            pwm_count: 3,
            ..Topology::default()
        };
        topology.ports.insert(2, [0, 3].into_iter().collect());
        topology.ports.insert(5, [1].into_iter().collect());
        let mut clock = ClockEntry::new(ClockSource::Pll, 24);
        clock.consumers = vec![
            PwmAssignment {
                channel: 0,
                resolution_bits: 16,
            },
            PwmAssignment {
                channel: 2,
                resolution_bits: 8,
            },
        ];
        topology.clocks.insert(1, clock);
        topology
    }

    #[test]
    fn absolute_pin_index_follows_sorted_order() {
        let topology = sample();
        assert_eq!(topology.pin_absolute(2, 0), Some(0));
        assert_eq!(topology.pin_absolute(2, 3), Some(1));
        assert_eq!(topology.pin_absolute(5, 1), Some(2));
        assert_eq!(topology.pin_absolute(5, 2), None);
        assert_eq!(topology.pin_count(), 3);
        assert_eq!(topology.pins().collect::<Vec<_>>(), vec![(2, 0), (2, 3), (5, 1)]);
    }

    #[test]
    fn missing_capabilities_are_not_present() {
        let topology = sample();
        assert!(topology.require_pin(2, 3).is_ok());
        let err = topology.require_pin(0, 0).unwrap_err();
        assert_eq!(err.to_string(), "pin P0[0] is not present on this controller");
        assert!(topology.require_pwm(1).is_err());
        assert_eq!(topology.require_pwm(2).unwrap().assignment.max_count(), 255);
    }

    #[test]
    fn clock_divider_change_is_shared() {
        let mut topology = sample();
        assert_eq!(topology.clock(1).unwrap().frequency_hz(), 1_000_000.0);
        assert_eq!(topology.set_clock_divider(1, 48), Some(24));
        assert_eq!(topology.clock(1).unwrap().frequency_hz(), 500_000.0);
        assert_eq!(topology.clock(1).unwrap().channels(), vec![0, 2]);
        assert_eq!(topology.set_clock_divider(9, 2), None);
    }

    #[test]
    fn unknown_source_runs_at_zero() {
        let entry = ClockEntry::new(ClockSource::from_code(6), 0);
        assert_eq!(entry.source_hz, 0);
        assert_eq!(entry.divider, 1);
        assert_eq!(ClockSource::from_code(3).frequency_hz(), 100_000);
    }
}
