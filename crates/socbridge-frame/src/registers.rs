//! Register map of the controller firmware.
//!
//! Every register id names one peripheral instance. Ids `0xFB..=0xFF` are
//! reserved for utility functions (build info, reset, test).

/// Delta-sigma ADC.
pub const DELSIG_ADC: u8 = 0x01;

/// First SAR ADC.
pub const SAR_ADC0: u8 = 0x02;

/// Second SAR ADC.
pub const SAR_ADC1: u8 = 0x03;

/// Voltage DACs.
pub const VDAC0: u8 = 0x04;
pub const VDAC1: u8 = 0x05;

/// Current DACs.
pub const IDAC0: u8 = 0x06;
pub const IDAC1: u8 = 0x07;

/// Waveform DAC.
pub const WAVEDAC: u8 = 0x08;

/// PWM channel 0. Channel `n` lives at `PWM_BASE + n`.
pub const PWM_BASE: u8 = 0x09;

/// Highest PWM channel the firmware can address.
pub const PWM_LAST: u8 = 0x15;

/// Digital pins, addressed through the payload.
pub const GPIO: u8 = 0x16;

/// Analog input pins.
pub const ANALOG_IN: u8 = 0x17;

/// Capacitive touch sensors.
pub const CAPSENSE: u8 = 0x18;

/// Addressable LED strips.
pub const STRIP_LIGHT: u8 = 0xFB;

/// Ultrasonic range finder.
pub const RANGE_FINDER: u8 = 0xFC;

/// Firmware self-test register.
pub const TEST: u8 = 0xFD;

/// Build-info queries (see [`BuildInfo`]).
pub const BUILD_INFO: u8 = 0xFE;

/// Software reset of every output on the controller.
pub const RESET: u8 = 0xFF;

/// Opcode sent with [`RESET`].
pub const RESET_OPCODE: u8 = 0xFF;

/// Sub-opcodes of the [`BUILD_INFO`] register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BuildInfo {
    /// Analog block presence bits, pin counts and DAC ranges.
    Analog = 0x00,
    /// Clock count (low nibble) and PWM count (upper bits).
    PwmSummary = 0x01,
    /// Pin bitmaps of ports 0, 2 and 3.
    GpioGroupA = 0x02,
    /// Pin bitmaps of ports 4, 5 and 6.
    GpioGroupB = 0x03,
    /// Pin bitmaps of ports 12 and 15.
    GpioGroupC = 0x04,
    /// Packed record of one clock; payload selects the clock.
    ClockRecord = 0x07,
    /// Four packed PWM-to-clock assignments; payload selects the word.
    PwmClockTable = 0x08,
    /// Firmware major/minor version.
    FirmwareVersion = 0x09,
}

impl BuildInfo {
    /// The sub-opcode byte.
    pub const fn opcode(self) -> u8 {
        self as u8
    }
}

/// Returns the PWM channel index for a register id, if it is one.
pub fn pwm_channel(register: u8) -> Option<u8> {
    (PWM_BASE..=PWM_LAST)
        .contains(&register)
        .then(|| register - PWM_BASE)
}

/// Returns the register id of a PWM channel, if the firmware can address it.
pub fn pwm_register(channel: u8) -> Option<u8> {
    PWM_BASE
        .checked_add(channel)
        .filter(|register| *register <= PWM_LAST)
}

/// Returns a human-readable name for a register id.
pub fn register_name(id: u8) -> &'static str {
    match id {
        DELSIG_ADC => "DELSIG_ADC",
        SAR_ADC0 => "SAR_ADC0",
        SAR_ADC1 => "SAR_ADC1",
        VDAC0 => "VDAC0",
        VDAC1 => "VDAC1",
        IDAC0 => "IDAC0",
        IDAC1 => "IDAC1",
        WAVEDAC => "WAVEDAC",
        PWM_BASE..=PWM_LAST => "PWM",
        GPIO => "GPIO",
        ANALOG_IN => "ANALOG_IN",
        CAPSENSE => "CAPSENSE",
        STRIP_LIGHT => "STRIP_LIGHT",
        RANGE_FINDER => "RANGE_FINDER",
        TEST => "TEST",
        BUILD_INFO => "BUILD_INFO",
        RESET => "RESET",
        _ => "UNASSIGNED",
    }
}

/// Returns true if the register id is one of the utility registers.
pub fn is_reserved(id: u8) -> bool {
    id >= STRIP_LIGHT
}

/// Block-transport (I2C) handshake layout.
///
/// The controller exposes a small buffer: one status byte, the four-byte
/// response word, then the four-byte command frame.
pub mod handshake {
    /// Offset of the status byte.
    pub const STATUS_OFFSET: u8 = 0x00;

    /// Offset of the response word.
    pub const RESPONSE_OFFSET: u8 = 0x04;

    /// Offset where command frames are written.
    pub const DATA_OFFSET: u8 = 0x08;

    /// Host raises this after writing a command.
    pub const SIGNAL: u8 = 0xAC;

    /// Controller finished; the response word is valid.
    pub const DONE: u8 = 0xEB;

    /// Controller rejected the command.
    pub const BAD: u8 = 0xBA;
}
