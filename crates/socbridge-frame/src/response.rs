use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{RawFrame, FRAME_SIZE};
use crate::error::{EncodingError, Result};

/// Raw word the controller returns when a write was accepted.
pub const STATUS_ACCEPTED: u32 = 0x0A11_600D;

/// Raw word the controller returns when it rejected a parameter.
pub const STATUS_BAD_PARAMETER: u32 = 0xFBAD_0080;

/// Modulus the firmware uses to encode negative results.
const NEGATIVE_BIAS: i64 = 0xFFFF_FFFF;

/// Firmware protocol revision.
///
/// Revisions differ in the largest raw word still read as a positive
/// number. Words above the threshold encode negative values. The revision is
/// fixed per link so the send and receive paths agree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolRevision {
    /// 24-bit positive range.
    #[default]
    #[serde(alias = "1.0")]
    Rev1_0,
    /// 28-bit positive range.
    #[serde(alias = "1.1")]
    Rev1_1,
    /// 31-bit positive range.
    #[serde(alias = "1.2")]
    Rev1_2,
    /// Everything below `0xFF00_0000` is positive.
    #[serde(alias = "2.0")]
    Rev2_0,
}

impl ProtocolRevision {
    pub const ALL: [Self; 4] = [Self::Rev1_0, Self::Rev1_1, Self::Rev1_2, Self::Rev2_0];

    /// Largest raw word decoded as non-negative.
    pub const fn sign_threshold(self) -> u32 {
        match self {
            Self::Rev1_0 => 0x00FF_FFFF,
            Self::Rev1_1 => 0x0FFF_FFFF,
            Self::Rev1_2 => 0x7FFF_FFFF,
            Self::Rev2_0 => 0xFEFF_FFFF,
        }
    }

    /// The bad-parameter sentinel as seen through this revision's decoding.
    pub const fn bad_parameter_value(self) -> i64 {
        decode_signed(STATUS_BAD_PARAMETER, self)
    }
}

impl fmt::Display for ProtocolRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rev1_0 => f.write_str("1.0"),
            Self::Rev1_1 => f.write_str("1.1"),
            Self::Rev1_2 => f.write_str("1.2"),
            Self::Rev2_0 => f.write_str("2.0"),
        }
    }
}

/// Classification of a response word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// The write was accepted.
    Accepted,
    /// The controller rejected a parameter.
    BadParameter,
    /// Anything else: a numeric result.
    Value,
}

/// One 4-byte response from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Response {
    raw: u32,
}

impl Response {
    /// Wrap a raw word.
    pub const fn from_raw(raw: u32) -> Self {
        Self { raw }
    }

    /// Decode four little-endian bytes.
    pub fn from_frame(frame: RawFrame) -> Self {
        Self::from_raw(u32::from_le_bytes(frame))
    }

    /// Decode from a buffer that must hold exactly one frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let frame: RawFrame = bytes.try_into().map_err(|_| EncodingError::BadLength {
            expected: FRAME_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self::from_frame(frame))
    }

    /// Wire bytes of this response.
    pub fn to_frame(self) -> RawFrame {
        self.raw.to_le_bytes()
    }

    /// The unsigned word as received.
    pub const fn raw(self) -> u32 {
        self.raw
    }

    /// Sentinels are matched on the raw word, before sign reinterpretation.
    pub const fn status(self) -> ResponseStatus {
        match self.raw {
            STATUS_ACCEPTED => ResponseStatus::Accepted,
            STATUS_BAD_PARAMETER => ResponseStatus::BadParameter,
            _ => ResponseStatus::Value,
        }
    }

    pub const fn is_accepted(self) -> bool {
        matches!(self.status(), ResponseStatus::Accepted)
    }

    pub const fn is_bad_parameter(self) -> bool {
        matches!(self.status(), ResponseStatus::BadParameter)
    }

    /// Numeric value under the given revision's sign convention.
    ///
    /// Words above the threshold decode as `raw - 0xFFFF_FFFF`, so
    /// `0xFFFF_FFFF` itself decodes to 0, not -1.
    pub const fn value(self, revision: ProtocolRevision) -> i64 {
        decode_signed(self.raw, revision)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status() {
            ResponseStatus::Accepted => f.write_str("ACCEPTED"),
            ResponseStatus::BadParameter => f.write_str("BAD_PARAMETER"),
            ResponseStatus::Value => write!(f, "{:#010x}", self.raw),
        }
    }
}

const fn decode_signed(raw: u32, revision: ProtocolRevision) -> i64 {
    if raw > revision.sign_threshold() {
        raw as i64 - NEGATIVE_BIAS
    } else {
        raw as i64
    }
}
