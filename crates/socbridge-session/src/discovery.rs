//! Capability discovery.
//!
//! [`fetch`] asks the build-info register for every packed word the
//! firmware reports; [`build_topology`] decodes them without touching the
//! link. Bit layouts:
//!
//! ```text
//! analog      bit 0..7   DelSig, SAR0, SAR1, VDAC0, VDAC1, IDAC0, IDAC1, WaveDAC present
//!             bit 8..13  analog input pins
//!             bit 14..19 CapSense sensors
//!             bit 20/21  VDAC0/VDAC1 range (1 = 4.080 V, 0 = 1.020 V)
//!             bit 23..24 IDAC0 range, bit 25..26 IDAC1 range
//! pwm summary bit 0..3   clock count, bit 4.. PWM count
//! clock       bit 0..15  divider, bit 16..18 source, bit 19.. clock id
//! pwm table   4 x 5 bits: clock id nibble + resolution flag (1 = 16-bit)
//! firmware    major << 8 | minor
//! ```

use serde::{Deserialize, Serialize};
use socbridge_frame::{BuildInfo, Command, BUILD_INFO};
use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{ProtocolError, Result};
use crate::topology::{
    AnalogInventory, ClockEntry, ClockSource, FirmwareVersion, PwmAssignment, Topology,
};

/// Ports reported by each GPIO build-info query, lowest byte first.
pub const GPIO_GROUPS: [&[u8]; 3] = [&[0, 2, 3], &[4, 5, 6], &[12, 15]];

const GPIO_OPCODES: [BuildInfo; 3] = [
    BuildInfo::GpioGroupA,
    BuildInfo::GpioGroupB,
    BuildInfo::GpioGroupC,
];

/// Undecoded discovery words, as read from the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDiscovery {
    pub analog: u32,
    pub pwm_summary: u32,
    pub gpio_groups: [u32; 3],
    pub clock_records: Vec<u32>,
    pub pwm_clock_table: Vec<u32>,
    pub firmware: u32,
}

/// Clock and PWM counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmSummary {
    pub clocks: u8,
    pub channels: u8,
}

impl PwmSummary {
    /// Packed table words needed for every channel.
    pub fn table_words(&self) -> u8 {
        self.channels.div_ceil(4)
    }
}

fn bit(word: u32, n: u32) -> bool {
    (word >> n) & 1 == 1
}

fn vdac_range(flag: bool) -> f64 {
    if flag {
        4.080
    } else {
        1.020
    }
}

fn idac_range(mode: u32) -> f64 {
    match mode {
        1 => 0.031_75,
        2 => 0.255,
        _ => 2.04,
    }
}

pub fn decode_analog(word: u32) -> AnalogInventory {
    AnalogInventory {
        delsig_adc: bit(word, 0),
        sar_adc0: bit(word, 1),
        sar_adc1: bit(word, 2),
        vdac0: bit(word, 3),
        vdac1: bit(word, 4),
        idac0: bit(word, 5),
        idac1: bit(word, 6),
        wavedac: bit(word, 7),
        analog_pins: ((word >> 8) & 0x3F) as u8,
        capsense_sensors: ((word >> 14) & 0x3F) as u8,
        vdac_range_volts: [vdac_range(bit(word, 20)), vdac_range(bit(word, 21))],
        idac_range_milliamps: [idac_range((word >> 23) & 0x3), idac_range((word >> 25) & 0x3)],
    }
}

pub fn decode_pwm_summary(word: u32) -> PwmSummary {
    PwmSummary {
        clocks: (word & 0x0F) as u8,
        channels: u8::try_from(word >> 4).unwrap_or(u8::MAX),
    }
}

/// Pins per port for one GPIO group. Ports without pins are omitted.
pub fn decode_gpio_group(group: usize, word: u32) -> Vec<(u8, Vec<u8>)> {
    let Some(ports) = GPIO_GROUPS.get(group) else {
        return Vec::new();
    };
    ports
        .iter()
        .enumerate()
        .filter_map(|(byte, &port)| {
            let mask = (word >> (8 * byte)) & 0xFF;
            let pins: Vec<u8> = (0..8u8).filter(|&pin| bit(mask, u32::from(pin))).collect();
            (!pins.is_empty()).then_some((port, pins))
        })
        .collect()
}

/// Clock id and entry from one clock record. Consumers are filled in later.
pub fn decode_clock_record(word: u32) -> (u8, ClockEntry) {
    let divider = (word & 0xFFFF).max(1);
    let source = ClockSource::from_code(((word >> 16) & 0x7) as u8);
    let id = u8::try_from(word >> 19).unwrap_or(u8::MAX);
    (id, ClockEntry::new(source, divider))
}

/// Channel assignments packed in one table word.
///
/// `first_channel` is the channel of the lowest slot; slots whose clock
/// nibble is zero, or past `channel_count`, are skipped.
pub fn decode_pwm_clock_word(
    word: u32,
    first_channel: u8,
    channel_count: u8,
) -> Vec<(u8, PwmAssignment)> {
    (0..4u8)
        .filter_map(|slot| {
            let channel = first_channel.checked_add(slot)?;
            if channel >= channel_count {
                return None;
            }
            let shift = 5 * u32::from(slot);
            let clock = ((word >> shift) & 0x0F) as u8;
            if clock == 0 {
                return None;
            }
            let resolution_bits = if bit(word, shift + 4) { 16 } else { 8 };
            Some((
                clock,
                PwmAssignment {
                    channel,
                    resolution_bits,
                },
            ))
        })
        .collect()
}

pub fn decode_firmware(word: u32) -> FirmwareVersion {
    FirmwareVersion {
        major: ((word >> 8) & 0xFF) as u8,
        minor: (word & 0xFF) as u8,
    }
}

/// Decode every discovery word into a topology.
pub fn build_topology(raw: &RawDiscovery) -> Topology {
    let summary = decode_pwm_summary(raw.pwm_summary);
    let mut topology = Topology {
        firmware: decode_firmware(raw.firmware),
        analog: decode_analog(raw.analog),
        pwm_count: summary.channels,
        ..Topology::default()
    };

    for (group, &word) in raw.gpio_groups.iter().enumerate() {
        for (port, pins) in decode_gpio_group(group, word) {
            topology.ports.entry(port).or_default().extend(pins);
        }
    }

    for &word in raw.clock_records.iter().take(usize::from(summary.clocks)) {
        let (id, entry) = decode_clock_record(word);
        topology.clocks.insert(id, entry);
    }

    for (index, &word) in raw.pwm_clock_table.iter().enumerate() {
        let first = u8::try_from(index * 4).unwrap_or(u8::MAX);
        for (clock, assignment) in decode_pwm_clock_word(word, first, summary.channels) {
            match topology.clocks.get_mut(&clock) {
                Some(entry) => entry.consumers.push(assignment),
                None => debug!(clock, channel = assignment.channel, "PWM mapped to unknown clock"),
            }
        }
    }

    topology
}

fn read_word(engine: &Engine, info: BuildInfo, payload: u16) -> Result<u32> {
    let command = Command::new(BUILD_INFO, info.opcode()).with_payload(payload);
    let response = engine.query_response(&command)?;
    if response.is_bad_parameter() {
        return Err(ProtocolError::BadParameter {
            register: command.register,
            opcode: command.opcode,
        }
        .into());
    }
    Ok(response.raw())
}

/// Read every discovery word from the controller.
pub fn fetch(engine: &Engine) -> Result<RawDiscovery> {
    let analog = read_word(engine, BuildInfo::Analog, 0)?;
    let pwm_summary = read_word(engine, BuildInfo::PwmSummary, 0)?;
    let mut gpio_groups = [0u32; 3];
    for (slot, info) in gpio_groups.iter_mut().zip(GPIO_OPCODES) {
        *slot = read_word(engine, info, 0)?;
    }

    let summary = decode_pwm_summary(pwm_summary);
    let clock_records = (0..u16::from(summary.clocks))
        .map(|index| read_word(engine, BuildInfo::ClockRecord, index))
        .collect::<Result<Vec<_>>>()?;
    let pwm_clock_table = (0..u16::from(summary.table_words()))
        .map(|index| read_word(engine, BuildInfo::PwmClockTable, index))
        .collect::<Result<Vec<_>>>()?;
    let firmware = read_word(engine, BuildInfo::FirmwareVersion, 0)?;

    Ok(RawDiscovery {
        analog,
        pwm_summary,
        gpio_groups,
        clock_records,
        pwm_clock_table,
        firmware,
    })
}

/// Run the full discovery sequence and decode the result.
pub fn discover(engine: &Engine) -> Result<Topology> {
    let raw = fetch(engine)?;
    let topology = build_topology(&raw);
    info!(
        firmware = %topology.firmware,
        pins = topology.pin_count(),
        pwm = topology.pwm_count,
        clocks = topology.clocks.len(),
        "capabilities discovered"
    );
    Ok(topology)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> RawDiscovery {
        RawDiscovery {
            // DelSig + SAR0 + VDAC0, 6 analog pins, 4 sensors, VDAC0 4 V range, IDAC0 mode 2.
            analog: 0x01 | 0x02 | 0x08 | (6 << 8) | (4 << 14) | (1 << 20) | (2 << 23),
            // 2 clocks, 5 PWM channels.
            pwm_summary: (5 << 4) | 2,
            gpio_groups: [0x0000_0F01, 0x0000_00FF, 0x0000_8000],
            clock_records: vec![(1 << 19) | (4 << 16) | 24, (2 << 19) | (3 << 16)],
            pwm_clock_table: vec![
                // ch0 clock 1 16-bit, ch1 clock 1 16-bit, ch2 clock 2 8-bit, ch3 unused
                (0x11) | (0x11 << 5) | (0x02 << 10),
                // ch4 clock 9 (unknown)
                0x09,
            ],
            firmware: 0x0102,
        }
    }

    #[test]
    fn analog_word_decodes_flags_counts_and_ranges() {
        let analog = decode_analog(sample_raw().analog);
        assert!(analog.delsig_adc && analog.sar_adc0 && analog.vdac0);
        assert!(!analog.sar_adc1 && !analog.vdac1 && !analog.wavedac);
        assert_eq!(analog.analog_pins, 6);
        assert_eq!(analog.capsense_sensors, 4);
        assert_eq!(analog.vdac_range_volts, [4.080, 1.020]);
        assert_eq!(analog.idac_range_milliamps, [0.255, 2.04]);
    }

    #[test]
    fn gpio_groups_map_bytes_to_ports() {
        assert_eq!(
            decode_gpio_group(0, 0x0000_0F01),
            vec![(0, vec![0]), (2, vec![0, 1, 2, 3])]
        );
        assert_eq!(decode_gpio_group(2, 0x8000), vec![(15, vec![7])]);
        assert!(decode_gpio_group(3, u32::MAX).is_empty());
    }

    #[test]
    fn clock_record_treats_zero_divider_as_one() {
        let (id, entry) = decode_clock_record((2 << 19) | (3 << 16));
        assert_eq!(id, 2);
        assert_eq!(entry.source, ClockSource::Ilo);
        assert_eq!(entry.divider, 1);
        assert_eq!(entry.frequency_hz(), 100_000.0);
    }

    #[test]
    fn pwm_table_skips_empty_slots_and_extra_channels() {
        let word = 0x11 | (0x02 << 10) | (0x13 << 15);
        let slots = decode_pwm_clock_word(word, 0, 3);
        assert_eq!(
            slots,
            vec![
                (
                    1,
                    PwmAssignment {
                        channel: 0,
                        resolution_bits: 16
                    }
                ),
                (
                    2,
                    PwmAssignment {
                        channel: 2,
                        resolution_bits: 8
                    }
                ),
            ]
        );
    }

    #[test]
    fn topology_from_sample() {
        let topology = build_topology(&sample_raw());
        assert_eq!(topology.firmware.to_string(), "1.2");
        assert_eq!(topology.pwm_count, 5);
        assert_eq!(topology.ports.keys().copied().collect::<Vec<_>>(), vec![0, 2, 4, 15]);
        assert_eq!(topology.pin_count(), 1 + 4 + 8 + 1);

        let pll = topology.clock(1).unwrap();
        assert_eq!(pll.source_hz, 24_000_000);
        assert_eq!(pll.divider, 24);
        assert_eq!(pll.channels(), vec![0, 1]);
        assert_eq!(topology.clock(2).unwrap().channels(), vec![2]);
        assert!(topology.pwm(3).is_none());
        assert!(topology.pwm(4).is_none());
    }

    #[test]
    fn decoding_is_idempotent() {
        let raw = sample_raw();
        assert_eq!(build_topology(&raw), build_topology(&raw));
        let empty = build_topology(&RawDiscovery::default());
        assert!(empty.ports.is_empty() && empty.clocks.is_empty());
        assert_eq!(empty.pwm_count, 0);
    }

    #[test]
    fn table_word_count_rounds_up() {
        assert_eq!(decode_pwm_summary(0x52).table_words(), 2);
        assert_eq!(decode_pwm_summary(0x80).table_words(), 2);
        assert_eq!(decode_pwm_summary(0x00).table_words(), 0);
    }
}
