use std::fmt;

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::error::{EncodingError, Result};
use crate::registers::register_name;

/// Every command and every response is exactly this many bytes on the wire.
pub const FRAME_SIZE: usize = 4;

/// One frame as it travels over the link.
pub type RawFrame = [u8; FRAME_SIZE];

/// Largest payload a frame can carry.
pub const MAX_PAYLOAD: u16 = u16::MAX;

/// A register-addressed command.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    /// Peripheral instance on the controller.
    pub register: u8,
    /// Sub-command within the register.
    pub opcode: u8,
    /// Optional argument; zero when the command takes none.
    pub payload: u16,
    clamped: bool,
}

impl Command {
    /// A command without payload.
    pub const fn new(register: u8, opcode: u8) -> Self {
        Self {
            register,
            opcode,
            payload: 0,
            clamped: false,
        }
    }

    /// Attach a payload.
    pub const fn with_payload(mut self, payload: u16) -> Self {
        self.payload = payload;
        self
    }

    /// Build a command from untyped integers.
    ///
    /// Register ids and opcodes wider than one byte are rejected. Payloads
    /// wider than 16 bits are clamped to `0xFFFF` rather than rejected, which
    /// is what the controller firmware has always been fed.
    pub fn try_new(register: u32, opcode: u32, payload: u32) -> Result<Self> {
        let register =
            u8::try_from(register).map_err(|_| EncodingError::RegisterOutOfRange(register))?;
        let opcode = u8::try_from(opcode).map_err(|_| EncodingError::OpcodeOutOfRange(opcode))?;

        let (payload, clamped) = match u16::try_from(payload) {
            Ok(value) => (value, false),
            Err(_) => {
                warn!(
                    register,
                    opcode,
                    requested = payload,
                    sent = MAX_PAYLOAD,
                    "payload wider than 16 bits; clamped"
                );
                (MAX_PAYLOAD, true)
            }
        };

        Ok(Self {
            register,
            opcode,
            payload,
            clamped,
        })
    }

    /// Whether [`Command::try_new`] had to clamp the payload.
    pub fn was_clamped(&self) -> bool {
        self.clamped
    }

    /// Encode this command into its wire frame.
    pub fn to_frame(&self) -> RawFrame {
        encode(self)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("register", &format_args!("{:#04x}", self.register))
            .field("opcode", &format_args!("{:#04x}", self.opcode))
            .field("payload", &format_args!("{:#06x}", self.payload))
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{:#04x}] op={:#04x} payload={:#06x}",
            register_name(self.register),
            self.register,
            self.opcode,
            self.payload
        )
    }
}

/// Encode a command into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────┬─────────────┬──────────────┐
/// │ Register   │ Opcode   │ Payload lo  │ Payload hi   │
/// │ (1B)       │ (1B)     │ (1B)        │ (1B)         │
/// └────────────┴──────────┴─────────────┴──────────────┘
/// ```
pub fn encode(command: &Command) -> RawFrame {
    let [lo, hi] = command.payload.to_le_bytes();
    [command.register, command.opcode, lo, hi]
}

/// Append the encoded command to a write buffer.
pub fn encode_frame(command: &Command, dst: &mut BytesMut) {
    dst.reserve(FRAME_SIZE);
    dst.put_u8(command.register);
    dst.put_u8(command.opcode);
    dst.put_u16_le(command.payload);
}

/// Recover the command carried by a frame.
pub fn decode_command(frame: &[u8]) -> Result<Command> {
    let frame: &RawFrame = frame.try_into().map_err(|_| EncodingError::BadLength {
        expected: FRAME_SIZE,
        actual: frame.len(),
    })?;
    Ok(Command::new(frame[0], frame[1]).with_payload(u16::from_le_bytes([frame[2], frame[3]])))
}
